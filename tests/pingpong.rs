//! Ping-pong pool semantics: a pool-2 buffer alternates physical slots
//! across frames, pool=1 behaves like a plain buffer.

use pngine::compile;
use pngine::runtime::Instance;
use pngine::runtime::backend::{ResolvedBindGroup, ResolvedResource};
use pngine::runtime::mock::{Event, MockBackend};

const PINGPONG: &str = r#"
#wgsl sim {
    code="""
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@compute @workgroup_size(64) fn step() {}
"""
}
#buffer particles { size=1024 usage=[STORAGE] pool=2 }
#bindGroupLayout l {
    entries=[
        { binding=0 visibility=[COMPUTE] type=read-only-storage }
        { binding=1 visibility=[COMPUTE] type=storage }
    ]
}
#pipelineLayout pl { layouts=[l] }
#computePipeline pipe { layout=pl module=sim entryPoint="step" }
#bindGroup swap {
    layout=l
    entries=[
        { binding=0 resource=particles poolOffset=0 }
        { binding=1 resource=particles poolOffset=1 }
    ]
}
#computePass step { pipeline=pipe bindGroups=[swap] dispatch=16 }
#frame run { passes=[step] }
"#;

fn buffer_of(desc: &ResolvedBindGroup, binding: u32) -> u32 {
    desc.entries
        .iter()
        .find(|e| e.binding == binding)
        .map(|e| match e.resource {
            ResolvedResource::Buffer { buffer, .. } => buffer,
            other => panic!("expected a buffer, got {other:?}"),
        })
        .expect("binding present")
}

#[test]
fn s3_physical_slots_alternate_per_frame() {
    let output = compile(PINGPONG).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();

    // pool expansion: two physical buffers for one logical id
    let creates: Vec<u32> = instance
        .backend()
        .events
        .iter()
        .filter_map(|e| match e {
            Event::CreateBuffer { id, .. } => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(creates, vec![0, 1]);

    let frame = instance.frame_id("run").unwrap();

    // frame 0: read slot 0, write slot 1
    let mark = instance.backend().events.len();
    instance.render_frame(0.0, frame).unwrap();
    let bg0 = instance.backend().events[mark..]
        .iter()
        .find_map(|e| match e {
            Event::CreateBindGroup { desc, .. } => Some(desc.clone()),
            _ => None,
        })
        .expect("dynamic bind group re-created");
    assert_eq!(buffer_of(&bg0, 0), 0);
    assert_eq!(buffer_of(&bg0, 1), 1);

    // frame 1: roles swap
    let mark = instance.backend().events.len();
    instance.render_frame(0.0, frame).unwrap();
    let bg1 = instance.backend().events[mark..]
        .iter()
        .find_map(|e| match e {
            Event::CreateBindGroup { desc, .. } => Some(desc.clone()),
            _ => None,
        })
        .expect("dynamic bind group re-created");
    assert_eq!(buffer_of(&bg1, 0), 1);
    assert_eq!(buffer_of(&bg1, 1), 0);

    // frame 2: back to the frame-0 assignment
    let mark = instance.backend().events.len();
    instance.render_frame(0.0, frame).unwrap();
    let bg2 = instance.backend().events[mark..]
        .iter()
        .find_map(|e| match e {
            Event::CreateBindGroup { desc, .. } => Some(desc.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(buffer_of(&bg2, 0), 0);
    assert_eq!(buffer_of(&bg2, 1), 1);
}

#[test]
fn pool_of_one_behaves_like_a_plain_buffer() {
    let src = r#"
#wgsl sim {
    code="""
@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@compute @workgroup_size(64) fn step() {}
"""
}
#buffer values { size=256 usage=[STORAGE] pool=1 }
#bindGroupLayout l { entries=[{ binding=0 visibility=[COMPUTE] type=storage }] }
#pipelineLayout pl { layouts=[l] }
#computePipeline pipe { layout=pl module=sim entryPoint="step" }
#bindGroup bg { layout=l entries=[{ binding=0 resource=values }] }
#computePass step { pipeline=pipe bindGroups=[bg] dispatch=4 }
#frame run { passes=[step] }
"#;
    let output = compile(src).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();

    // one physical buffer, bind group created once in the preamble
    let preamble_creates = instance
        .backend()
        .events
        .iter()
        .filter(|e| matches!(e, Event::CreateBindGroup { .. }))
        .count();
    assert_eq!(preamble_creates, 1);

    let frame = instance.frame_id("run").unwrap();
    instance.render_frame(0.0, frame).unwrap();
    instance.render_frame(0.0, frame).unwrap();

    // no per-frame re-creation for a non-pool group
    let creates = instance
        .backend()
        .events
        .iter()
        .filter(|e| matches!(e, Event::CreateBindGroup { .. }))
        .count();
    assert_eq!(creates, 1);
}

//! Check-mode scenarios: crafted payloads with pass-state violations,
//! dangling ids, and nested passes, plus the multi-frame trace mode.

use pngine::compile;
use pngine::error::DispatchError;
use pngine::pngb::builder::PngbBuilder;
use pngine::pngb::enums::BufferUsages;
use pngine::pngb::loader::Pngb;
use pngine::pngb::opcodes::Op;
use pngine::runtime::Dispatcher;
use pngine::runtime::mock::MockBackend;
use pngine::validator;

#[test]
fn s6_draw_outside_pass_is_e002_everywhere() {
    // synthesized payload: a draw with no pass open
    let mut b = PngbBuilder::new();
    b.op(&Op::Draw { vertices: 3, instances: 1, first_vertex: 0, first_instance: 0 });
    let payload = b.finish();

    let report = validator::check(&payload).unwrap();
    let e002 = report
        .errors
        .iter()
        .find(|i| i.code == "E002")
        .expect("validator reports E002");
    assert_eq!(e002.opcode_index, Some(0));

    // the dispatcher agrees
    let index = Pngb::parse(&payload).unwrap();
    let mut d = Dispatcher::new(MockBackend::new());
    let err = d.run_all(index.view(&payload)).unwrap_err();
    assert!(matches!(err, DispatchError::BadState { .. }));
}

#[test]
fn nested_pass_is_e008() {
    let mut b = PngbBuilder::new();
    b.op(&Op::BeginComputePass);
    b.op(&Op::BeginComputePass);
    b.op(&Op::EndPass);
    let payload = b.finish();
    let report = validator::check(&payload).unwrap();
    assert!(report.has_code("E008"), "{report:?}");
}

#[test]
fn unmatched_end_pass_is_e007() {
    let mut b = PngbBuilder::new();
    b.op(&Op::EndPass);
    let payload = b.finish();
    let report = validator::check(&payload).unwrap();
    assert!(report.has_code("E007"), "{report:?}");
}

#[test]
fn reference_to_never_created_id_is_e001() {
    let mut b = PngbBuilder::new();
    b.op(&Op::WriteBuffer { buffer: 9, offset: 0, data: 0, len: 4 });
    let payload = b.finish();
    let report = validator::check(&payload).unwrap();
    assert!(report.has_code("E001"), "{report:?}");
}

#[test]
fn duplicate_creation_is_e005() {
    let mut b = PngbBuilder::new();
    b.op(&Op::CreateBuffer { id: 0, size: 4, usage: BufferUsages::UNIFORM, pool: 1 });
    b.op(&Op::CreateBuffer { id: 0, size: 4, usage: BufferUsages::UNIFORM, pool: 1 });
    let payload = b.finish();
    let report = validator::check(&payload).unwrap();
    assert!(report.has_code("E005"), "{report:?}");
}

#[test]
fn data_out_of_bounds_is_e004() {
    let mut b = PngbBuilder::new();
    let d = b.add_data(vec![0u8; 4]);
    b.op(&Op::CreateBuffer { id: 0, size: 16, usage: BufferUsages::COPY_DST, pool: 1 });
    b.op(&Op::WriteBuffer { buffer: 0, offset: 0, data: d, len: 64 });
    let payload = b.finish();
    let report = validator::check(&payload).unwrap();
    assert!(report.has_code("E004"), "{report:?}");
}

const TRIANGLE: &str = r#"
#wgsl shader {
    code="""
@vertex fn vs() -> @builtin(position) vec4f { return vec4f(0.0); }
@fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }
"""
}
#renderPipeline pipe {
    layout=auto
    vertex={ module=shader entryPoint="vs" }
    fragment={ module=shader entryPoint="fs" targets=[{ format=rgba8unorm }] }
}
#renderPass main {
    colorAttachments=[{ view=canvas clearValue=[0 0 0 1] }]
    pipeline=pipe
    draw=3
}
#frame display { passes=[main] }
"#;

#[test]
fn compiled_output_validates_clean() {
    let payload = compile(TRIANGLE).unwrap().pngb;
    let report = validator::check(&payload).unwrap();
    assert!(report.errors.is_empty(), "{report:?}");
    assert!(report.warnings.is_empty(), "{report:?}");
    assert!(!report.events.is_empty());
}

#[test]
fn w009_flags_uniform_write_buffer_conflict() {
    let src = r#"
#wgsl shader {
    code="""
struct U { time: f32 }
@group(0) @binding(0) var<uniform> u: U;
@vertex fn vs() -> @builtin(position) vec4f { return vec4f(u.time); }
@fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }
"""
}
#data zero { f32=[0] }
#buffer uniforms { size=shader.u usage=[UNIFORM COPY_DST] data=zero }
#renderPipeline pipe {
    layout=auto
    vertex={ module=shader entryPoint="vs" }
    fragment={ module=shader entryPoint="fs" targets=[{ format=rgba8unorm }] }
}
#bindGroup bg { pipeline=pipe entries=[{ binding=0 resource=uniforms }] }
#renderPass main {
    colorAttachments=[{ view=canvas clearValue=[0 0 0 1] }]
    pipeline=pipe
    bindGroups=[bg]
    draw=3
}
#frame display { passes=[main] }
"#;
    // the compiler warns
    let output = compile(src).unwrap();
    assert!(output.warnings.iter().any(|w| w.code == "W009"), "{:?}", output.warnings);
    // and so does check mode on the payload
    let report = validator::check(&output.pngb).unwrap();
    assert!(report.has_code("W009"), "{report:?}");
}

#[test]
fn multi_frame_mode_reports_pingpong_swaps() {
    let src = r#"
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
    let payload = compile(src).unwrap().pngb;
    let traces = validator::check_frames(&payload, &[(0.0, 0), (0.016, 1), (0.033, 2)]).unwrap();
    assert_eq!(traces.frames.len(), 3);
    // same opcode shape every frame
    assert_eq!(traces.frames[0].events.len(), traces.frames[1].events.len());
    // frame 1 swaps the pool slots, so its bind group creation differs
    assert!(!traces.frames[1].changed_from_previous.is_empty());
    // frame 2 swaps back; it differs from frame 1 as well
    assert!(!traces.frames[2].changed_from_previous.is_empty());
    // the first frame has nothing to diff against
    assert!(traces.frames[0]
        .changed_from_previous
        .iter()
        .all(|c| c.contains("+ ")));
}

//! End-to-end compile + execute scenarios against the mock backend:
//! the minimal triangle, uniform time animation, and the failing
//! invalid-reference compile.

use pngine::compile;
use pngine::pngb::enums::UniformType;
use pngine::runtime::Instance;
use pngine::runtime::mock::{Event, MockBackend};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const TRIANGLE: &str = r#"
#wgsl shader {
    code="""
@vertex fn vs(@builtin(vertex_index) i: u32) -> @builtin(position) vec4f {
    return vec4f(0.0);
}
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
fn s1_minimal_triangle_event_log() {
    init_logs();
    let output = compile(TRIANGLE).expect("triangle compiles");
    let mut instance = Instance::load(output.pngb, MockBackend::new()).expect("loads");

    // preamble: shader then pipeline, nothing else
    {
        let events = &instance.backend().events;
        assert!(matches!(events[0], Event::CreateShader { id: 0, .. }));
        assert!(matches!(events[1], Event::CreateRenderPipeline { id: 0, .. }));
        assert_eq!(events.len(), 2, "unexpected preamble: {events:?}");
    }

    let frame = instance.frame_id("display").expect("frame exists");
    instance.render_frame(0.0, frame).expect("frame renders");

    let events = &instance.backend().events[2..];
    assert!(
        matches!(&events[0], Event::BeginRenderPass { desc }
            if desc.color_attachments.len() == 1
            && desc.color_attachments[0].clear_value == [0.0, 0.0, 0.0, 1.0]),
        "got {events:?}"
    );
    assert_eq!(events[1], Event::SetPipeline { id: 0 });
    assert_eq!(
        events[2],
        Event::Draw { vertices: 3, instances: 1, first_vertex: 0, first_instance: 0 }
    );
    assert_eq!(events[3], Event::EndPass);
    assert_eq!(events[4], Event::Submit);
    assert_eq!(events.len(), 5);
}

#[test]
fn s1_renders_every_frame() {
    let output = compile(TRIANGLE).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();
    let frame = instance.frame_id("display").unwrap();
    instance.render_frame(0.0, frame).unwrap();
    instance.render_frame(0.016, frame).unwrap();
    let submits = instance
        .backend()
        .events
        .iter()
        .filter(|e| **e == Event::Submit)
        .count();
    assert_eq!(submits, 2);
    assert_eq!(instance.frame_counter(), 2);
}

const TIMED: &str = r#"
#wgsl shader {
    code="""
struct U { time: f32 }
@group(0) @binding(0) var<uniform> u: U;
@vertex fn vs() -> @builtin(position) vec4f { return vec4f(u.time); }
@fragment fn fs() -> @location(0) vec4f { return vec4f(1.0); }
"""
}
#buffer uniforms { size=shader.u usage=[UNIFORM COPY_DST] }
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

#[test]
fn s2_uniform_table_and_set_uniform() {
    init_logs();
    let output = compile(TIMED).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();

    let uniforms: Vec<_> = instance.uniforms().collect();
    assert_eq!(uniforms.len(), 1);
    assert_eq!(uniforms[0].path, "time");
    assert_eq!(uniforms[0].ty, UniformType::F32);
    assert_eq!(uniforms[0].size, 4);

    let mark = instance.backend().events.len();
    instance
        .set_uniform("time", bytemuck::bytes_of(&1.5f32))
        .unwrap();
    assert_eq!(
        instance.backend().events[mark..],
        [Event::WriteBuffer {
            buffer: 0,
            offset: 0,
            bytes: vec![0x00, 0x00, 0xC0, 0x3F],
        }]
    );
}

#[test]
fn s2_render_frame_auto_writes_time() {
    let output = compile(TIMED).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();
    let frame = instance.frame_id("display").unwrap();
    let mark = instance.backend().events.len();
    instance.render_frame(1.5, frame).unwrap();
    assert_eq!(
        instance.backend().events[mark],
        Event::WriteBuffer {
            buffer: 0,
            offset: 0,
            bytes: vec![0x00, 0x00, 0xC0, 0x3F],
        }
    );
}

#[test]
fn s2_set_uniform_rejects_wrong_size_and_unknown_path() {
    let output = compile(TIMED).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();
    assert!(instance.set_uniform("time", &[0u8; 8]).is_err());
    assert!(instance.set_uniform("nope", &[0u8; 4]).is_err());
}

#[test]
fn s5_invalid_reference_fails_with_resolve_error() {
    let src = r#"
#wgsl shader {
    code="""
@vertex fn vs() -> @builtin(position) vec4f { return vec4f(0.0); }
"""
}
#renderPass main {
    colorAttachments=[{ view=canvas }]
    pipeline=nonexistent
    draw=3
}
#frame display { passes=[main] }
"#;
    let report = compile(src).expect_err("must not compile");
    assert!(report.has_errors());
    assert!(
        report
            .diagnostics
            .iter()
            .any(|d| d.code == "E-RESOLVE" && d.message.contains("nonexistent")),
        "{report}"
    );
}

#[test]
fn compile_accumulates_multiple_errors() {
    let src = r#"
#renderPass a { colorAttachments=[{ view=canvas }] pipeline=ghost1 draw=3 }
#renderPass b { colorAttachments=[{ view=canvas }] pipeline=ghost2 draw=3 }
"#;
    let report = compile(src).expect_err("must not compile");
    let resolve_errors = report
        .diagnostics
        .iter()
        .filter(|d| d.code == "E-RESOLVE")
        .count();
    assert!(resolve_errors >= 2, "{report}");
}

#[test]
fn frame_error_leaves_instance_usable() {
    let output = compile(TRIANGLE).unwrap();
    let mut instance = Instance::load(output.pngb, MockBackend::new()).unwrap();
    let frame = instance.frame_id("display").unwrap();
    // unknown frame name id: the call fails, the instance does not
    assert!(instance.render_frame(0.0, 0xFFFF).is_err());
    instance.render_frame(0.0, frame).expect("still renders");
}

#[test]
fn init_sections_run_once_at_load() {
    let src = r#"
#data seed { f32=[1 2 3 4] }
#buffer values { size=16 usage=[STORAGE COPY_DST] }
#queue upload { writeBuffer=[{ buffer=values data=seed }] }
#init boot { passes=[upload] }
"#;
    let output = compile(src).unwrap();
    let instance = Instance::load(output.pngb, MockBackend::new()).unwrap();
    let writes = instance
        .backend()
        .events
        .iter()
        .filter(|e| matches!(e, Event::WriteBuffer { .. }))
        .count();
    assert_eq!(writes, 1, "{:?}", instance.backend().events);
    // the init body submitted once
    assert_eq!(instance.frame_counter(), 1);
}

// src/validator/mod.rs
// Check mode: decode a PNGB payload, walk the opcode stream structurally
// (id resolution, creation order, duplicates, bounds, descriptors, pass
// state), then execute it against the mock backend and cross-check. The
// report serializes to JSON for hosts.
//
// Fatal codes: E001 unresolved id, E002 pass-state violation, E003
// creation-order violation, E004 data out of bounds, E005 duplicate id,
// E006 malformed descriptor, E007 unmatched pass, E008 nested pass.
// Warnings: W001 never used, W002 redundant state set, W003 empty pass,
// W004 oversized buffer, W005 missing entry point, W006 oversized vertex
// buffer, W009 uniform/write_buffer conflict.

use hashbrown::{HashMap, HashSet};
use serde::Serialize;

use crate::compiler::reflect::{NagaReflector, ReflectionService};
use crate::error::{DispatchError, ObjectKind, PngbError};
use crate::pngb::descriptor as desc;
use crate::pngb::loader::{Pngb, PngbView};
use crate::pngb::opcodes::Op;
use crate::runtime::dispatcher::Dispatcher;
use crate::runtime::instance::scan_sections;
use crate::runtime::mock::MockBackend;
use crate::runtime::uniforms::UniformIndex;

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opcode_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    /// Mock backend event log of the full-stream run (empty if the run
    /// aborted before producing events).
    pub events: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().chain(&self.warnings).any(|i| i.code == code)
    }
}

#[derive(Debug, Serialize)]
pub struct FrameTrace {
    pub time: f32,
    pub frame_counter: u64,
    pub events: Vec<String>,
    /// Events that differ from the previous frame, as `index: old -> new`.
    pub changed_from_previous: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MultiFrameReport {
    pub frames: Vec<FrameTrace>,
}

/// Validate one payload. Header/section parse failures are fatal; every
/// other finding lands in the report.
pub fn check(payload: &[u8]) -> Result<ValidationReport, PngbError> {
    let index = Pngb::parse(payload)?;
    let view = index.view(payload);
    let mut report = ValidationReport::default();

    let ops = decode_all(view, &mut report);
    structural_check(view, &index, &ops, &mut report);
    dispatcher_check(view, &mut report);

    Ok(report)
}

/// Multi-frame mode: run the per-frame body for a sequence of
/// `(time, frame_counter)` pairs and report per-frame event logs plus
/// diffs against the previous frame.
pub fn check_frames(
    payload: &[u8],
    frames: &[(f32, u64)],
) -> Result<MultiFrameReport, PngbError> {
    let index = Pngb::parse(payload)?;
    let view = index.view(payload);
    let (preamble_end, sections) = scan_sections(view).map_err(|_| PngbError::MissingEnd)?;
    let uniforms = UniformIndex::build(view, index.uniforms.as_deref().unwrap_or(&[]))?;

    let mut dispatcher = Dispatcher::new(MockBackend::new());
    let run = |d: &mut Dispatcher<MockBackend>, start: usize, end: usize| {
        if let Err(e) = d.run(view, start, end) {
            log::warn!("multi-frame run aborted: {e}");
            let _ = d.abort_pass();
        }
    };
    run(&mut dispatcher, 0, preamble_end);
    for s in sections.iter().filter(|s| s.init) {
        run(&mut dispatcher, s.start, s.end);
    }
    let body = sections.iter().find(|s| !s.init);

    let mut out = MultiFrameReport { frames: Vec::new() };
    let mut previous: Vec<String> = Vec::new();
    for &(time, frame_counter) in frames {
        let mark = dispatcher.backend().events.len();
        dispatcher.set_frame_counter(frame_counter);
        for (buffer, offset) in uniforms.time_targets() {
            let _ = dispatcher.write_buffer_direct(buffer, offset as u64, &time.to_le_bytes());
        }
        if let Some(s) = body {
            run(&mut dispatcher, s.start, s.end);
        }
        let events: Vec<String> = dispatcher.backend().events[mark..]
            .iter()
            .map(|e| format!("{e:?}"))
            .collect();
        let changed_from_previous = events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match previous.get(i) {
                Some(p) if p == e => None,
                Some(p) => Some(format!("{i}: {p} -> {e}")),
                None => Some(format!("{i}: + {e}")),
            })
            .collect();
        previous = events.clone();
        out.frames.push(FrameTrace {
            time,
            frame_counter,
            events,
            changed_from_previous,
        });
    }
    Ok(out)
}

// ---------------- structural pass ----------------

fn decode_all(view: PngbView, report: &mut ValidationReport) -> Vec<(usize, Op)> {
    let mut out = Vec::new();
    for item in view.ops() {
        match item {
            Ok(pair) => out.push(pair),
            Err(e) => {
                report.errors.push(Issue {
                    code: "E006",
                    message: format!("opcode stream: {e}"),
                    opcode_index: Some(out.len()),
                    offset: None,
                });
                break;
            }
        }
    }
    out
}

#[derive(Clone, Copy, PartialEq)]
enum State {
    Outside,
    Render,
    Compute,
}

#[derive(Default)]
struct Created {
    /// (kind, id) -> opcode index of first creation
    at: HashMap<(u8, u32), usize>,
    used: HashSet<(u8, u32)>,
}

impl Created {
    fn kind_code(kind: ObjectKind) -> u8 {
        kind as u8
    }

    fn create(&mut self, kind: ObjectKind, id: u32, index: usize) -> bool {
        let key = (Self::kind_code(kind), id);
        if self.at.contains_key(&key) {
            return false;
        }
        self.at.insert(key, index);
        true
    }

    fn use_at(
        &mut self,
        kind: ObjectKind,
        id: u32,
        index: usize,
        report: &mut ValidationReport,
        offset: usize,
    ) {
        let key = (Self::kind_code(kind), id);
        self.used.insert(key);
        match self.at.get(&key) {
            Some(&created) if created < index => {}
            Some(&created) => report.errors.push(Issue {
                code: "E003",
                message: format!(
                    "{} {} used at opcode {} but created at {}",
                    kind.name(),
                    id,
                    index,
                    created
                ),
                opcode_index: Some(index),
                offset: Some(offset),
            }),
            None => report.errors.push(Issue {
                code: "E001",
                message: format!("{} {} is never created", kind.name(), id),
                opcode_index: Some(index),
                offset: Some(offset),
            }),
        }
    }
}

struct BufferMeta {
    size: u64,
}

fn structural_check(
    view: PngbView,
    index: &Pngb,
    ops: &[(usize, Op)],
    report: &mut ValidationReport,
) {
    // creation sites are collected up front so a forward reference can be
    // told apart from a dangling one (E003 vs E001)
    let mut created = Created::default();
    for (i, (_, op)) in ops.iter().enumerate() {
        let target = match op {
            Op::CreateBuffer { id, .. } => Some((ObjectKind::Buffer, *id)),
            Op::CreateTexture { id, .. } => Some((ObjectKind::Texture, *id)),
            Op::CreateSampler { id, .. } => Some((ObjectKind::Sampler, *id)),
            Op::CreateShader { id, .. } => Some((ObjectKind::Shader, *id)),
            Op::CreateBindGroupLayout { id, .. } => Some((ObjectKind::BindGroupLayout, *id)),
            Op::CreatePipelineLayout { id, .. } => Some((ObjectKind::PipelineLayout, *id)),
            Op::CreateRenderPipeline { id, .. } => Some((ObjectKind::RenderPipeline, *id)),
            Op::CreateComputePipeline { id, .. } => Some((ObjectKind::ComputePipeline, *id)),
            Op::CreateBindGroup { id, .. } => Some((ObjectKind::BindGroup, *id)),
            Op::CreateTextureView { id, .. } => Some((ObjectKind::TextureView, *id)),
            Op::CreateQuerySet { id, .. } => Some((ObjectKind::QuerySet, *id)),
            _ => None,
        };
        if let Some((kind, id)) = target {
            created.create(kind, id as u32, i);
        }
    }

    let mut buffers: HashMap<u32, BufferMeta> = HashMap::new();
    let mut pipelines: HashMap<u16, desc::RenderPipelineDesc> = HashMap::new();
    let mut state = State::Outside;
    let mut in_frame_body = false;
    let mut pass_had_work = true;
    let mut pass_begin_index = 0usize;
    let mut current_pipeline: Option<u16> = None;
    let mut vertex_slots: HashMap<u32, (u16, u32)> = HashMap::new(); // slot -> (buffer, explicit size)
    let mut seen_dupes: HashSet<(u8, u32)> = HashSet::new();
    let mut w006_buffers: HashSet<u16> = HashSet::new();
    let reflector = NagaReflector;
    let mut reflections: HashMap<u16, Option<crate::compiler::reflect::ReflectionData>> =
        HashMap::new();

    let error = |report: &mut ValidationReport, code, message, i, offset| {
        report.errors.push(Issue {
            code,
            message,
            opcode_index: Some(i),
            offset: Some(offset),
        });
    };
    let warn = |report: &mut ValidationReport, code, message, i: Option<usize>| {
        report.warnings.push(Issue {
            code,
            message,
            opcode_index: i,
            offset: None,
        });
    };

    for (i, (offset, op)) in ops.iter().enumerate() {
        let offset = *offset;

        // pass state machine
        match op {
            Op::BeginRenderPass { .. } | Op::BeginComputePass => {
                if state != State::Outside {
                    error(report, "E008", "pass begun inside a pass".into(), i, offset);
                } else {
                    state = if matches!(op, Op::BeginRenderPass { .. }) {
                        State::Render
                    } else {
                        State::Compute
                    };
                    pass_had_work = false;
                    pass_begin_index = i;
                    current_pipeline = None;
                    vertex_slots.clear();
                }
            }
            Op::EndPass => {
                if state == State::Outside {
                    error(report, "E007", "end_pass without an open pass".into(), i, offset);
                } else {
                    if !pass_had_work {
                        warn(
                            report,
                            "W003",
                            format!("pass at opcode {pass_begin_index} draws nothing"),
                            Some(pass_begin_index),
                        );
                    }
                    state = State::Outside;
                }
            }
            Op::SetPipeline { .. } | Op::SetBindGroup { .. } => {
                if state == State::Outside {
                    error(report, "E002", "state set outside a pass".into(), i, offset);
                }
            }
            Op::SetVertexBuffer { .. } | Op::SetIndexBuffer { .. } | Op::Draw { .. }
            | Op::DrawIndexed { .. } => {
                if state != State::Render {
                    error(report, "E002", "render op outside a render pass".into(), i, offset);
                }
            }
            Op::Dispatch { .. } => {
                if state != State::Compute {
                    error(report, "E002", "dispatch outside a compute pass".into(), i, offset);
                }
            }
            Op::Frame { .. } | Op::Submit | Op::End => {
                if state != State::Outside {
                    error(report, "E007", "section boundary inside a pass".into(), i, offset);
                    state = State::Outside;
                }
            }
            _ => {
                if state != State::Outside {
                    error(report, "E002", "resource op inside a pass".into(), i, offset);
                }
            }
        }

        // W002: consecutive identical state sets
        if i > 0 && ops[i - 1].1 == *op {
            if matches!(
                op,
                Op::SetPipeline { .. }
                    | Op::SetBindGroup { .. }
                    | Op::SetVertexBuffer { .. }
                    | Op::SetIndexBuffer { .. }
            ) {
                warn(report, "W002", format!("redundant {op:?}"), Some(i));
            }
        }

        match op {
            Op::CreateBuffer { id, size, pool, .. } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::Buffer, *id, i, report, offset);
                buffers.insert(*id as u32, BufferMeta { size: *size as u64 });
                if *size > (16 << 20) {
                    warn(report, "W004", format!("buffer {id} is {size} bytes"), Some(i));
                }
                if *pool == 0 {
                    error(report, "E006", format!("buffer {id} pool count 0"), i, offset);
                }
            }
            Op::CreateShader { id, source } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::Shader, *id, i, report, offset);
                match view.data(*source) {
                    Ok(bytes) => {
                        let text = std::str::from_utf8(bytes).unwrap_or("");
                        reflections.insert(*id, reflector.reflect(text).ok());
                    }
                    Err(_) => error(
                        report,
                        "E004",
                        format!("shader {id} source data id {source} out of range"),
                        i,
                        offset,
                    ),
                }
            }
            Op::CreateTexture { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::Texture, *id, i, report, offset);
                check_desc(view, *d, desc::TextureDesc::decode, i, offset, report);
            }
            Op::CreateSampler { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::Sampler, *id, i, report, offset);
                check_desc(view, *d, desc::SamplerDesc::decode, i, offset, report);
            }
            Op::CreateBindGroupLayout { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::BindGroupLayout, *id, i, report, offset);
                check_desc(view, *d, desc::BindGroupLayoutDesc::decode, i, offset, report);
            }
            Op::CreatePipelineLayout { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::PipelineLayout, *id, i, report, offset);
                if let Some(decoded) =
                    check_desc(view, *d, desc::PipelineLayoutDesc::decode, i, offset, report)
                {
                    for bgl in decoded.bind_group_layouts {
                        created.use_at(ObjectKind::BindGroupLayout, bgl as u32, i, report, offset);
                    }
                }
            }
            Op::CreateRenderPipeline { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::RenderPipeline, *id, i, report, offset);
                if let Some(decoded) =
                    check_desc(view, *d, desc::RenderPipelineDesc::decode, i, offset, report)
                {
                    created.use_at(ObjectKind::Shader, decoded.vertex_module as u32, i, report, offset);
                    if let Some(layout) = decoded.layout {
                        created.use_at(ObjectKind::PipelineLayout, layout as u32, i, report, offset);
                    }
                    check_entry_point(
                        view,
                        &reflections,
                        decoded.vertex_module,
                        decoded.vertex_entry,
                        i,
                        report,
                    );
                    if let Some(frag) = &decoded.fragment {
                        created.use_at(ObjectKind::Shader, frag.module as u32, i, report, offset);
                        check_entry_point(
                            view,
                            &reflections,
                            frag.module,
                            frag.entry_point,
                            i,
                            report,
                        );
                    }
                    pipelines.insert(*id, decoded);
                }
            }
            Op::CreateComputePipeline { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::ComputePipeline, *id, i, report, offset);
                if let Some(decoded) =
                    check_desc(view, *d, desc::ComputePipelineDesc::decode, i, offset, report)
                {
                    created.use_at(ObjectKind::Shader, decoded.module as u32, i, report, offset);
                    if let Some(layout) = decoded.layout {
                        created.use_at(ObjectKind::PipelineLayout, layout as u32, i, report, offset);
                    }
                    check_entry_point(view, &reflections, decoded.module, decoded.entry_point, i, report);
                }
            }
            Op::CreateBindGroup { id, desc: d } => {
                // re-creation inside frame bodies is the dynamic-group
                // mechanism, not a duplicate
                let key = (Created::kind_code(ObjectKind::BindGroup), *id as u32);
                let first = created.at.get(&key) == Some(&i);
                if !first && !in_frame_body && seen_dupes.insert(key) {
                    error(report, "E005", format!("bind group {id} created more than once"), i, offset);
                }
                if let Some(decoded) =
                    check_desc(view, *d, desc::BindGroupDesc::decode, i, offset, report)
                {
                    match decoded.layout {
                        desc::BindGroupLayoutRef::Explicit(l) => {
                            created.use_at(ObjectKind::BindGroupLayout, l as u32, i, report, offset)
                        }
                        desc::BindGroupLayoutRef::FromPipeline { pipeline, compute, .. } => {
                            let kind = if compute {
                                ObjectKind::ComputePipeline
                            } else {
                                ObjectKind::RenderPipeline
                            };
                            created.use_at(kind, pipeline as u32, i, report, offset);
                        }
                    }
                    for e in &decoded.entries {
                        match e.resource {
                            desc::BindingResource::Buffer { buffer, .. } => {
                                created.use_at(ObjectKind::Buffer, buffer as u32, i, report, offset)
                            }
                            desc::BindingResource::Sampler(s) => {
                                created.use_at(ObjectKind::Sampler, s as u32, i, report, offset)
                            }
                            desc::BindingResource::TextureView(v) => {
                                created.use_at(ObjectKind::TextureView, v as u32, i, report, offset)
                            }
                        }
                    }
                }
            }
            Op::CreateTextureView { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::TextureView, *id, i, report, offset);
                if let Some(decoded) =
                    check_desc(view, *d, desc::TextureViewDesc::decode, i, offset, report)
                {
                    created.use_at(ObjectKind::Texture, decoded.texture as u32, i, report, offset);
                }
            }
            Op::CreateQuerySet { id, desc: d } => {
                check_dup(&created, &mut seen_dupes, ObjectKind::QuerySet, *id, i, report, offset);
                check_desc(view, *d, desc::QuerySetDesc::decode, i, offset, report);
            }
            Op::WriteBuffer { buffer, offset: woff, data, len } => {
                created.use_at(ObjectKind::Buffer, *buffer as u32, i, report, offset);
                match view.data(*data) {
                    Ok(bytes) if (*len as usize) <= bytes.len() => {}
                    Ok(bytes) => error(
                        report,
                        "E004",
                        format!("write_buffer len {len} exceeds data blob {}", bytes.len()),
                        i,
                        offset,
                    ),
                    Err(_) => error(
                        report,
                        "E004",
                        format!("write_buffer data id {data} out of range"),
                        i,
                        offset,
                    ),
                }
                if let Some(meta) = buffers.get(&(*buffer as u32)) {
                    if *woff as u64 + *len as u64 > meta.size {
                        error(
                            report,
                            "E004",
                            format!("write_buffer overruns buffer {buffer}"),
                            i,
                            offset,
                        );
                    }
                }
            }
            Op::WriteTexture { desc: d, data } => {
                if let Some(decoded) =
                    check_desc(view, *d, desc::WriteTextureDesc::decode, i, offset, report)
                {
                    created.use_at(ObjectKind::Texture, decoded.texture as u32, i, report, offset);
                }
                if view.data(*data).is_err() {
                    error(report, "E004", format!("write_texture data id {data} out of range"), i, offset);
                }
            }
            Op::BeginRenderPass { desc: d } => {
                if let Some(decoded) =
                    check_desc(view, *d, desc::RenderPassDesc::decode, i, offset, report)
                {
                    for a in &decoded.color_attachments {
                        if let desc::AttachmentView::View(v) = a.view {
                            created.use_at(ObjectKind::TextureView, v as u32, i, report, offset);
                        }
                    }
                    if let Some(ds) = &decoded.depth_stencil {
                        if let desc::AttachmentView::View(v) = ds.view {
                            created.use_at(ObjectKind::TextureView, v as u32, i, report, offset);
                        }
                    }
                }
            }
            Op::SetPipeline { id } => {
                let kind = match state {
                    State::Render => ObjectKind::RenderPipeline,
                    State::Compute => ObjectKind::ComputePipeline,
                    State::Outside => ObjectKind::RenderPipeline,
                };
                created.use_at(kind, *id as u32, i, report, offset);
                if state == State::Render {
                    current_pipeline = Some(*id);
                }
            }
            Op::SetBindGroup { id, .. } => {
                created.use_at(ObjectKind::BindGroup, *id as u32, i, report, offset);
            }
            Op::SetVertexBuffer { slot, buffer, size, .. } => {
                created.use_at(ObjectKind::Buffer, *buffer as u32, i, report, offset);
                vertex_slots.insert(*slot, (*buffer, *size));
            }
            Op::SetIndexBuffer { buffer, .. } => {
                created.use_at(ObjectKind::Buffer, *buffer as u32, i, report, offset);
            }
            Op::Draw { vertices, first_vertex, .. } => {
                pass_had_work = true;
                // W006: a bound vertex buffer much larger than the draw needs
                if let Some(pipe) = current_pipeline.and_then(|p| pipelines.get(&p)) {
                    for (slot, layout) in pipe.vertex_buffers.iter().enumerate() {
                        let Some(&(buffer, explicit)) = vertex_slots.get(&(slot as u32)) else {
                            continue;
                        };
                        let bound = if explicit != 0 {
                            explicit as u64
                        } else {
                            buffers.get(&(buffer as u32)).map(|m| m.size).unwrap_or(0)
                        };
                        let needed =
                            (*first_vertex as u64 + *vertices as u64) * layout.array_stride as u64;
                        if layout.array_stride > 0
                            && bound >= needed + layout.array_stride as u64
                            && w006_buffers.insert(buffer)
                        {
                            warn(
                                report,
                                "W006",
                                format!(
                                    "vertex buffer {buffer} binds {bound} bytes but the draw uses {needed}"
                                ),
                                Some(i),
                            );
                        }
                    }
                }
            }
            Op::DrawIndexed { .. } | Op::Dispatch { .. } => {
                pass_had_work = true;
            }
            Op::Frame { name, .. } => {
                in_frame_body = true;
                if view.string(*name).is_err() {
                    error(report, "E004", format!("frame name string id {name} out of range"), i, offset);
                }
            }
            _ => {}
        }
    }

    // W001: created but never used (frames and queues aside, every object
    // exists to be referenced by something else)
    for (&(kind_code, id), &created_at) in &created.at {
        if !created.used.contains(&(kind_code, id)) {
            let kind_name = [
                "buffer",
                "texture",
                "sampler",
                "shader",
                "bind group layout",
                "pipeline layout",
                "render pipeline",
                "compute pipeline",
                "bind group",
                "texture view",
                "query set",
                "frame",
            ][kind_code as usize];
            report.warnings.push(Issue {
                code: "W001",
                message: format!("{kind_name} {id} is created but never used"),
                opcode_index: Some(created_at),
                offset: None,
            });
        }
    }

    // W009: uniform-addressed buffers also written by write_buffer
    if let Some(uniforms) = &index.uniforms {
        let written: HashSet<u16> = ops
            .iter()
            .filter_map(|(_, op)| match op {
                Op::WriteBuffer { buffer, .. } => Some(*buffer),
                _ => None,
            })
            .collect();
        for binding in uniforms {
            if written.contains(&binding.buffer_id) {
                report.warnings.push(Issue {
                    code: "W009",
                    message: format!(
                        "buffer {} is a setUniform target and a write_buffer target",
                        binding.buffer_id
                    ),
                    opcode_index: None,
                    offset: None,
                });
            }
        }
    }

    report.errors.sort_by_key(|e| e.opcode_index);
}

fn check_dup(
    created: &Created,
    seen: &mut HashSet<(u8, u32)>,
    kind: ObjectKind,
    id: u16,
    i: usize,
    report: &mut ValidationReport,
    offset: usize,
) {
    let key = (Created::kind_code(kind), id as u32);
    if created.at.get(&key) != Some(&i) && seen.insert(key) {
        report.errors.push(Issue {
            code: "E005",
            message: format!("{} {} created more than once", kind.name(), id),
            opcode_index: Some(i),
            offset: Some(offset),
        });
    }
}

fn check_desc<T>(
    view: PngbView,
    id: u16,
    decode: impl Fn(&[u8]) -> Result<T, String>,
    i: usize,
    offset: usize,
    report: &mut ValidationReport,
) -> Option<T> {
    match view.data(id) {
        Err(_) => {
            report.errors.push(Issue {
                code: "E004",
                message: format!("descriptor data id {id} out of range"),
                opcode_index: Some(i),
                offset: Some(offset),
            });
            None
        }
        Ok(bytes) => match decode(bytes) {
            Ok(d) => Some(d),
            Err(what) => {
                report.errors.push(Issue {
                    code: "E006",
                    message: what,
                    opcode_index: Some(i),
                    offset: Some(offset),
                });
                None
            }
        },
    }
}

fn check_entry_point(
    view: PngbView,
    reflections: &HashMap<u16, Option<crate::compiler::reflect::ReflectionData>>,
    shader: u16,
    entry_string: u16,
    i: usize,
    report: &mut ValidationReport,
) {
    let Ok(entry) = view.string(entry_string) else {
        report.errors.push(Issue {
            code: "E004",
            message: format!("entry point string id {entry_string} out of range"),
            opcode_index: Some(i),
            offset: None,
        });
        return;
    };
    if let Some(Some(data)) = reflections.get(&shader) {
        if !data.has_entry_point(entry) {
            report.warnings.push(Issue {
                code: "W005",
                message: format!("shader {shader} has no entry point `{entry}`"),
                opcode_index: Some(i),
                offset: None,
            });
        }
    }
}

// ---------------- dispatcher cross-check ----------------

fn dispatch_code(e: &DispatchError) -> &'static str {
    match e {
        DispatchError::BadState { .. } => "E002",
        DispatchError::NestedPass { .. } => "E008",
        DispatchError::UnmatchedPass { .. } => "E007",
        DispatchError::UnknownId { .. } => "E001",
        DispatchError::DuplicateId { .. } => "E005",
        DispatchError::OutOfBounds { .. } | DispatchError::Payload(_) => "E004",
        DispatchError::MalformedDescriptor { .. } => "E006",
        _ => "E006",
    }
}

fn dispatcher_check(view: PngbView, report: &mut ValidationReport) {
    let mut dispatcher = Dispatcher::new(MockBackend::new());
    let result = dispatcher.run_all(view);
    let _ = dispatcher.abort_pass();
    report.events = dispatcher
        .backend()
        .events
        .iter()
        .map(|e| format!("{e:?}"))
        .collect();
    if let Err(e) = result {
        let code = dispatch_code(&e);
        let offset = e.offset();
        let already = report
            .errors
            .iter()
            .any(|issue| issue.code == code && (offset.is_none() || issue.offset == offset));
        if !already {
            report.errors.push(Issue {
                code,
                message: format!("dispatcher: {e}"),
                opcode_index: None,
                offset,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pngb::builder::PngbBuilder;
    use crate::pngb::enums::BufferUsages;

    #[test]
    fn draw_outside_pass_is_e002_in_both_checkers() {
        let mut b = PngbBuilder::new();
        b.op(&Op::Draw { vertices: 3, instances: 1, first_vertex: 0, first_instance: 0 });
        let payload = b.finish();
        let report = check(&payload).unwrap();
        assert!(report.has_code("E002"), "{report:?}");
    }

    #[test]
    fn unknown_id_is_e001() {
        let mut b = PngbBuilder::new();
        b.op(&Op::BeginComputePass);
        b.op(&Op::SetBindGroup { slot: 0, id: 7, dynamic_offsets: vec![] });
        b.op(&Op::Dispatch { x: 1, y: 1, z: 1 });
        b.op(&Op::EndPass);
        let payload = b.finish();
        let report = check(&payload).unwrap();
        assert!(report.has_code("E001"), "{report:?}");
    }

    #[test]
    fn never_used_buffer_is_w001() {
        let mut b = PngbBuilder::new();
        b.op(&Op::CreateBuffer { id: 0, size: 16, usage: BufferUsages::UNIFORM, pool: 1 });
        let payload = b.finish();
        let report = check(&payload).unwrap();
        assert!(report.errors.is_empty(), "{report:?}");
        assert!(report.has_code("W001"), "{report:?}");
    }

    #[test]
    fn empty_pass_is_w003() {
        let mut b = PngbBuilder::new();
        b.op(&Op::BeginComputePass);
        b.op(&Op::EndPass);
        let payload = b.finish();
        let report = check(&payload).unwrap();
        assert!(report.has_code("W003"), "{report:?}");
    }

    #[test]
    fn report_serializes_to_json() {
        let mut b = PngbBuilder::new();
        b.op(&Op::EndPass);
        let payload = b.finish();
        let report = check(&payload).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("E007"));
    }
}

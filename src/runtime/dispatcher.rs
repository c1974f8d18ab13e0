// src/runtime/dispatcher.rs
// Streaming opcode interpreter. Enforces the three-state pass machine,
// validates ids and data ranges before every backend call, expands
// ping-pong pools into physical buffers, and resolves pool slots when
// (re-)creating bind groups.
//
// Physical buffer ids: a logical buffer with pool N occupies N
// consecutive physical ids starting at its base. The slot selected for
// pool offset p at frame k is (k + p) % N.

use crate::error::{DispatchError, ObjectKind, PngbError};
use crate::pngb::descriptor::{
    self as desc, BindGroupDesc, BindGroupLayoutDesc, BindingResource, ComputePipelineDesc,
    PipelineLayoutDesc, QuerySetDesc, RenderPassDesc, RenderPipelineDesc, SamplerDesc, TextureDesc,
    TextureViewDesc, WriteTextureDesc,
};
use crate::pngb::loader::PngbView;
use crate::pngb::opcodes::{Op, OpStream};
use super::backend::{
    Backend, ResolvedBindGroup, ResolvedBindGroupEntry, ResolvedLayout, ResolvedResource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Outside,
    Render,
    Compute,
}

impl PassState {
    fn name(self) -> &'static str {
        match self {
            PassState::Outside => "outside",
            PassState::Render => "render pass",
            PassState::Compute => "compute pass",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BufferSlot {
    size: u64,
    pool: u32,
    phys_base: u32,
}

#[derive(Debug, Default)]
struct IdTable {
    created: Vec<bool>,
}

impl IdTable {
    fn exists(&self, id: u16) -> bool {
        self.created.get(id as usize).copied().unwrap_or(false)
    }

    fn insert(&mut self, id: u16) -> bool {
        let idx = id as usize;
        if self.created.len() <= idx {
            self.created.resize(idx + 1, false);
        }
        let fresh = !self.created[idx];
        self.created[idx] = true;
        fresh
    }
}

pub struct Dispatcher<B: Backend> {
    backend: B,
    state: PassState,
    frame_counter: u64,
    in_frame_body: bool,
    buffers: Vec<Option<BufferSlot>>,
    phys_count: u32,
    textures: IdTable,
    samplers: IdTable,
    shaders: IdTable,
    bgls: IdTable,
    pipeline_layouts: IdTable,
    render_pipelines: IdTable,
    compute_pipelines: IdTable,
    bind_groups: IdTable,
    views: IdTable,
    query_sets: IdTable,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(backend: B) -> Self {
        Dispatcher {
            backend,
            state: PassState::Outside,
            frame_counter: 0,
            in_frame_body: false,
            buffers: Vec::new(),
            phys_count: 0,
            textures: IdTable::default(),
            samplers: IdTable::default(),
            shaders: IdTable::default(),
            bgls: IdTable::default(),
            pipeline_layouts: IdTable::default(),
            render_pipelines: IdTable::default(),
            compute_pipelines: IdTable::default(),
            bind_groups: IdTable::default(),
            views: IdTable::default(),
            query_sets: IdTable::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Validator multi-frame mode pins the counter per run.
    pub fn set_frame_counter(&mut self, value: u64) {
        self.frame_counter = value;
    }

    pub fn is_idle(&self) -> bool {
        self.state == PassState::Outside
    }

    /// Execute the opcode range `code[start..end]`. Offsets in errors are
    /// absolute within the bytecode section.
    pub fn run(&mut self, view: PngbView, start: usize, end: usize) -> Result<(), DispatchError> {
        let code = view.code();
        if start > end || end > code.len() {
            return Err(PngbError::BadOffset { section: "bytecode" }.into());
        }
        for item in OpStream::new(&code[start..end]) {
            let (rel, op) = match item {
                Ok(pair) => pair,
                // a range ends at a section boundary, not at END
                Err(PngbError::MissingEnd) if end != code.len() => break,
                Err(e) => return Err(e.into()),
            };
            self.exec(view, start + rel, &op)?;
        }
        Ok(())
    }

    pub fn run_all(&mut self, view: PngbView) -> Result<(), DispatchError> {
        let len = view.code().len();
        self.run(view, 0, len)
    }

    /// Close a pass left open by a failed frame. The instance calls this
    /// after a dispatch error so teardown never sees an open pass.
    pub fn abort_pass(&mut self) -> Result<(), DispatchError> {
        if self.state != PassState::Outside {
            self.state = PassState::Outside;
            self.backend.end_pass()?;
        }
        Ok(())
    }

    /// Teardown: a partial frame must leave no open pass.
    pub fn end(&mut self) -> Result<(), DispatchError> {
        if self.state != PassState::Outside {
            log::warn!("dispatcher torn down inside a {}", self.state.name());
            return Err(DispatchError::UnmatchedPass { offset: 0 });
        }
        self.backend.end()?;
        Ok(())
    }

    /// Direct write used by uniform-by-name and the frame clock. Resolves
    /// the pool slot for the current frame and bounds-checks the write.
    pub fn write_buffer_direct(
        &mut self,
        buffer: u16,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), DispatchError> {
        let slot = self.buffer_slot(buffer, 0)?;
        let size = self.buffers[buffer as usize].as_ref().map(|b| b.size).unwrap_or(0);
        if offset + bytes.len() as u64 > size {
            return Err(DispatchError::OutOfBounds {
                what: format!(
                    "write of {} bytes at {} into buffer {} ({} bytes)",
                    bytes.len(),
                    offset,
                    buffer,
                    size
                ),
                offset: 0,
            });
        }
        if bytes.is_empty() {
            return Ok(());
        }
        self.backend.write_buffer(slot, offset, bytes)?;
        Ok(())
    }

    fn exec(&mut self, view: PngbView, offset: usize, op: &Op) -> Result<(), DispatchError> {
        self.check_state(offset, op)?;
        match op {
            Op::CreateBuffer { id, size, usage, pool } => {
                if !self.insert_buffer(*id, *size as u64, (*pool).max(1)) {
                    return Err(DispatchError::DuplicateId {
                        kind: ObjectKind::Buffer,
                        id: *id as u32,
                        offset,
                    });
                }
                let slot = self.buffers[*id as usize].expect("just inserted");
                for k in 0..slot.pool {
                    self.backend
                        .create_buffer(slot.phys_base + k, slot.size, *usage)?;
                }
            }
            Op::CreateTexture { id, desc } => {
                let d: TextureDesc = self.decode(view, *desc, offset, TextureDesc::decode)?;
                self.create(ObjectKind::Texture, *id, offset)?;
                self.backend.create_texture(*id, &d)?;
            }
            Op::CreateSampler { id, desc } => {
                let d: SamplerDesc = self.decode(view, *desc, offset, SamplerDesc::decode)?;
                self.create(ObjectKind::Sampler, *id, offset)?;
                self.backend.create_sampler(*id, &d)?;
            }
            Op::CreateShader { id, source } => {
                let bytes = self.data(view, *source, offset)?;
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    DispatchError::MalformedDescriptor {
                        what: format!("shader {} source is not utf-8", id),
                        offset,
                    }
                })?;
                self.create(ObjectKind::Shader, *id, offset)?;
                self.backend.create_shader(*id, text)?;
            }
            Op::CreateBindGroupLayout { id, desc } => {
                let d: BindGroupLayoutDesc =
                    self.decode(view, *desc, offset, BindGroupLayoutDesc::decode)?;
                self.create(ObjectKind::BindGroupLayout, *id, offset)?;
                self.backend.create_bind_group_layout(*id, &d)?;
            }
            Op::CreatePipelineLayout { id, desc } => {
                let d: PipelineLayoutDesc =
                    self.decode(view, *desc, offset, PipelineLayoutDesc::decode)?;
                for &bgl in &d.bind_group_layouts {
                    self.require_exists(&self.bgls, ObjectKind::BindGroupLayout, bgl, offset)?;
                }
                self.create(ObjectKind::PipelineLayout, *id, offset)?;
                self.backend.create_pipeline_layout(*id, &d)?;
            }
            Op::CreateRenderPipeline { id, desc } => {
                let d: RenderPipelineDesc =
                    self.decode(view, *desc, offset, RenderPipelineDesc::decode)?;
                self.require_exists(&self.shaders, ObjectKind::Shader, d.vertex_module, offset)?;
                if let Some(layout) = d.layout {
                    self.require_exists(
                        &self.pipeline_layouts,
                        ObjectKind::PipelineLayout,
                        layout,
                        offset,
                    )?;
                }
                if let Some(frag) = &d.fragment {
                    self.require_exists(&self.shaders, ObjectKind::Shader, frag.module, offset)?;
                }
                let vertex_entry = view.string(d.vertex_entry)?.to_owned();
                let fragment_entry = match &d.fragment {
                    Some(f) => Some(view.string(f.entry_point)?.to_owned()),
                    None => None,
                };
                self.create(ObjectKind::RenderPipeline, *id, offset)?;
                self.backend.create_render_pipeline(
                    *id,
                    &d,
                    &vertex_entry,
                    fragment_entry.as_deref(),
                )?;
            }
            Op::CreateComputePipeline { id, desc } => {
                let d: ComputePipelineDesc =
                    self.decode(view, *desc, offset, ComputePipelineDesc::decode)?;
                self.require_exists(&self.shaders, ObjectKind::Shader, d.module, offset)?;
                if let Some(layout) = d.layout {
                    self.require_exists(
                        &self.pipeline_layouts,
                        ObjectKind::PipelineLayout,
                        layout,
                        offset,
                    )?;
                }
                let entry = view.string(d.entry_point)?.to_owned();
                self.create(ObjectKind::ComputePipeline, *id, offset)?;
                self.backend.create_compute_pipeline(*id, &d, &entry)?;
            }
            Op::CreateBindGroup { id, desc } => {
                let d: BindGroupDesc = self.decode(view, *desc, offset, BindGroupDesc::decode)?;
                let resolved = self.resolve_bind_group(&d, offset)?;
                // dynamic groups are re-created each frame; a duplicate in
                // the preamble is still an error
                let fresh = self.bind_groups.insert(*id);
                if !fresh && !self.in_frame_body {
                    return Err(DispatchError::DuplicateId {
                        kind: ObjectKind::BindGroup,
                        id: *id as u32,
                        offset,
                    });
                }
                self.backend.create_bind_group(*id, &resolved)?;
            }
            Op::CreateTextureView { id, desc } => {
                let d: TextureViewDesc = self.decode(view, *desc, offset, TextureViewDesc::decode)?;
                self.require_exists(&self.textures, ObjectKind::Texture, d.texture, offset)?;
                self.create(ObjectKind::TextureView, *id, offset)?;
                self.backend.create_texture_view(*id, &d)?;
            }
            Op::CreateQuerySet { id, desc } => {
                let d: QuerySetDesc = self.decode(view, *desc, offset, QuerySetDesc::decode)?;
                self.create(ObjectKind::QuerySet, *id, offset)?;
                self.backend.create_query_set(*id, &d)?;
            }
            Op::WriteBuffer { buffer, offset: woff, data, len } => {
                // zero-length writes are a no-op by contract
                if *len == 0 {
                    return Ok(());
                }
                let bytes = self.data(view, *data, offset)?;
                if (*len as usize) > bytes.len() {
                    return Err(DispatchError::OutOfBounds {
                        what: format!("write_buffer len {} exceeds data blob {}", len, bytes.len()),
                        offset,
                    });
                }
                let slot = self.buffer_slot(*buffer, 0).map_err(|_| {
                    DispatchError::UnknownId {
                        kind: ObjectKind::Buffer,
                        id: *buffer as u32,
                        offset,
                    }
                })?;
                let size = self.buffers[*buffer as usize].as_ref().unwrap().size;
                if *woff as u64 + *len as u64 > size {
                    return Err(DispatchError::OutOfBounds {
                        what: format!(
                            "write of {} bytes at {} into buffer {} ({} bytes)",
                            len, woff, buffer, size
                        ),
                        offset,
                    });
                }
                let bytes = &bytes[..*len as usize];
                self.backend.write_buffer(slot, *woff as u64, bytes)?;
            }
            Op::WriteTexture { desc, data } => {
                let d: WriteTextureDesc =
                    self.decode(view, *desc, offset, WriteTextureDesc::decode)?;
                self.require_exists(&self.textures, ObjectKind::Texture, d.texture, offset)?;
                let bytes = self.data(view, *data, offset)?;
                self.backend.write_texture(&d, bytes)?;
            }
            Op::BeginRenderPass { desc } => {
                let d: RenderPassDesc = self.decode(view, *desc, offset, RenderPassDesc::decode)?;
                for a in &d.color_attachments {
                    if let desc::AttachmentView::View(id) = a.view {
                        self.require_exists(&self.views, ObjectKind::TextureView, id, offset)?;
                    }
                }
                if let Some(ds) = &d.depth_stencil {
                    if let desc::AttachmentView::View(id) = ds.view {
                        self.require_exists(&self.views, ObjectKind::TextureView, id, offset)?;
                    }
                }
                self.state = PassState::Render;
                self.backend.begin_render_pass(&d)?;
            }
            Op::BeginComputePass => {
                self.state = PassState::Compute;
                self.backend.begin_compute_pass()?;
            }
            Op::SetPipeline { id } => {
                match self.state {
                    PassState::Render => self.require_exists(
                        &self.render_pipelines,
                        ObjectKind::RenderPipeline,
                        *id,
                        offset,
                    )?,
                    PassState::Compute => self.require_exists(
                        &self.compute_pipelines,
                        ObjectKind::ComputePipeline,
                        *id,
                        offset,
                    )?,
                    PassState::Outside => unreachable!("state checked"),
                }
                self.backend.set_pipeline(*id)?;
            }
            Op::SetBindGroup { slot, id, dynamic_offsets } => {
                self.require_exists(&self.bind_groups, ObjectKind::BindGroup, *id, offset)?;
                self.backend.set_bind_group(*slot, *id, dynamic_offsets)?;
            }
            Op::SetVertexBuffer { slot, buffer, offset: boff, size } => {
                let phys = self.buffer_slot(*buffer, 0).map_err(|_| {
                    DispatchError::UnknownId {
                        kind: ObjectKind::Buffer,
                        id: *buffer as u32,
                        offset,
                    }
                })?;
                let size = if *size == 0 { None } else { Some(*size as u64) };
                self.backend
                    .set_vertex_buffer(*slot, phys, *boff as u64, size)?;
            }
            Op::SetIndexBuffer { buffer, format, offset: boff } => {
                let phys = self.buffer_slot(*buffer, 0).map_err(|_| {
                    DispatchError::UnknownId {
                        kind: ObjectKind::Buffer,
                        id: *buffer as u32,
                        offset,
                    }
                })?;
                self.backend.set_index_buffer(phys, *format, *boff as u64)?;
            }
            Op::Draw { vertices, instances, first_vertex, first_instance } => {
                self.backend
                    .draw(*vertices, *instances, *first_vertex, *first_instance)?;
            }
            Op::DrawIndexed { indices, instances, first_index, base_vertex, first_instance } => {
                self.backend.draw_indexed(
                    *indices,
                    *instances,
                    *first_index,
                    *base_vertex,
                    *first_instance,
                )?;
            }
            Op::Dispatch { x, y, z } => {
                self.backend.dispatch(*x, *y, *z)?;
            }
            Op::EndPass => {
                self.state = PassState::Outside;
                self.backend.end_pass()?;
            }
            Op::Frame { .. } => {
                // section marker; sections are selected by the host
                self.in_frame_body = true;
            }
            Op::Submit => {
                self.backend.submit()?;
                self.frame_counter += 1;
            }
            Op::End => {
                self.backend.end()?;
            }
        }
        Ok(())
    }

    /// The pass state machine of the format spec. Everything else in
    /// `exec` may assume the op is legal for the current state.
    fn check_state(&self, offset: usize, op: &Op) -> Result<(), DispatchError> {
        use Op::*;
        let state = self.state;
        match op {
            BeginRenderPass { .. } | BeginComputePass => {
                if state != PassState::Outside {
                    return Err(DispatchError::NestedPass { offset });
                }
            }
            EndPass => {
                if state == PassState::Outside {
                    return Err(DispatchError::UnmatchedPass { offset });
                }
            }
            SetPipeline { .. } | SetBindGroup { .. } => {
                if state == PassState::Outside {
                    return Err(DispatchError::BadState { state: state.name(), offset });
                }
            }
            SetVertexBuffer { .. } | SetIndexBuffer { .. } | Draw { .. } | DrawIndexed { .. } => {
                if state != PassState::Render {
                    return Err(DispatchError::BadState { state: state.name(), offset });
                }
            }
            Dispatch { .. } => {
                if state != PassState::Compute {
                    return Err(DispatchError::BadState { state: state.name(), offset });
                }
            }
            Submit | End | Frame { .. } => {
                if state != PassState::Outside {
                    return Err(DispatchError::UnmatchedPass { offset });
                }
            }
            _ => {
                // create/write family: outside only
                if state != PassState::Outside {
                    return Err(DispatchError::BadState { state: state.name(), offset });
                }
            }
        }
        Ok(())
    }

    fn insert_buffer(&mut self, id: u16, size: u64, pool: u32) -> bool {
        let idx = id as usize;
        if self.buffers.len() <= idx {
            self.buffers.resize(idx + 1, None);
        }
        if self.buffers[idx].is_some() {
            return false;
        }
        let phys_base = self.phys_count;
        self.phys_count += pool;
        self.buffers[idx] = Some(BufferSlot { size, pool, phys_base });
        true
    }

    /// Physical buffer id for `(frame_counter + pool_offset) % pool`.
    fn buffer_slot(&self, id: u16, pool_offset: u32) -> Result<u32, DispatchError> {
        let slot = self
            .buffers
            .get(id as usize)
            .and_then(|b| b.as_ref())
            .ok_or(DispatchError::UnknownId {
                kind: ObjectKind::Buffer,
                id: id as u32,
                offset: 0,
            })?;
        let k = ((self.frame_counter + pool_offset as u64) % slot.pool as u64) as u32;
        Ok(slot.phys_base + k)
    }

    fn resolve_bind_group(
        &self,
        d: &BindGroupDesc,
        offset: usize,
    ) -> Result<ResolvedBindGroup, DispatchError> {
        let layout = match d.layout {
            desc::BindGroupLayoutRef::Explicit(id) => {
                self.require_exists(&self.bgls, ObjectKind::BindGroupLayout, id, offset)?;
                ResolvedLayout::Explicit(id)
            }
            desc::BindGroupLayoutRef::FromPipeline { pipeline, group, compute: false } => {
                self.require_exists(
                    &self.render_pipelines,
                    ObjectKind::RenderPipeline,
                    pipeline,
                    offset,
                )?;
                ResolvedLayout::FromRenderPipeline { pipeline, group }
            }
            desc::BindGroupLayoutRef::FromPipeline { pipeline, group, compute: true } => {
                self.require_exists(
                    &self.compute_pipelines,
                    ObjectKind::ComputePipeline,
                    pipeline,
                    offset,
                )?;
                ResolvedLayout::FromComputePipeline { pipeline, group }
            }
        };
        let mut entries = Vec::with_capacity(d.entries.len());
        for e in &d.entries {
            let resource = match e.resource {
                BindingResource::Buffer { buffer, offset: boff, size, pool_offset } => {
                    let phys = self.buffer_slot(buffer, pool_offset).map_err(|_| {
                        DispatchError::UnknownId {
                            kind: ObjectKind::Buffer,
                            id: buffer as u32,
                            offset,
                        }
                    })?;
                    let total = self.buffers[buffer as usize].as_ref().unwrap().size;
                    let bind_size = size.map(u64::from);
                    let end = boff as u64 + bind_size.unwrap_or(total - (boff as u64).min(total));
                    if boff as u64 > total || end > total {
                        return Err(DispatchError::OutOfBounds {
                            what: format!("bind group binds past buffer {} end", buffer),
                            offset,
                        });
                    }
                    ResolvedResource::Buffer {
                        buffer: phys,
                        offset: boff as u64,
                        size: bind_size,
                    }
                }
                BindingResource::Sampler(id) => {
                    self.require_exists(&self.samplers, ObjectKind::Sampler, id, offset)?;
                    ResolvedResource::Sampler(id)
                }
                BindingResource::TextureView(id) => {
                    self.require_exists(&self.views, ObjectKind::TextureView, id, offset)?;
                    ResolvedResource::TextureView(id)
                }
            };
            entries.push(ResolvedBindGroupEntry {
                binding: e.binding,
                resource,
            });
        }
        Ok(ResolvedBindGroup { layout, entries })
    }

    fn table_mut(&mut self, kind: ObjectKind) -> &mut IdTable {
        match kind {
            ObjectKind::Texture => &mut self.textures,
            ObjectKind::Sampler => &mut self.samplers,
            ObjectKind::Shader => &mut self.shaders,
            ObjectKind::BindGroupLayout => &mut self.bgls,
            ObjectKind::PipelineLayout => &mut self.pipeline_layouts,
            ObjectKind::RenderPipeline => &mut self.render_pipelines,
            ObjectKind::ComputePipeline => &mut self.compute_pipelines,
            ObjectKind::BindGroup => &mut self.bind_groups,
            ObjectKind::TextureView => &mut self.views,
            ObjectKind::QuerySet => &mut self.query_sets,
            ObjectKind::Buffer | ObjectKind::Frame => {
                unreachable!("{} ids are not table-tracked", kind.name())
            }
        }
    }

    fn create(&mut self, kind: ObjectKind, id: u16, offset: usize) -> Result<(), DispatchError> {
        if !self.table_mut(kind).insert(id) {
            return Err(DispatchError::DuplicateId { kind, id: id as u32, offset });
        }
        Ok(())
    }

    fn require_exists(
        &self,
        table: &IdTable,
        kind: ObjectKind,
        id: u16,
        offset: usize,
    ) -> Result<(), DispatchError> {
        if table.exists(id) {
            Ok(())
        } else {
            Err(DispatchError::UnknownId { kind, id: id as u32, offset })
        }
    }

    fn data<'v>(
        &self,
        view: PngbView<'v>,
        id: u16,
        offset: usize,
    ) -> Result<&'v [u8], DispatchError> {
        view.data(id).map_err(|_| DispatchError::OutOfBounds {
            what: format!("data id {id} out of range"),
            offset,
        })
    }

    fn decode<T>(
        &self,
        view: PngbView,
        id: u16,
        offset: usize,
        f: impl Fn(&[u8]) -> Result<T, String>,
    ) -> Result<T, DispatchError> {
        let bytes = self.data(view, id, offset)?;
        f(bytes).map_err(|what| DispatchError::MalformedDescriptor { what, offset })
    }
}

impl<B: Backend> Drop for Dispatcher<B> {
    fn drop(&mut self) {
        if self.state != PassState::Outside {
            // a partial frame must not leak an open pass into the host
            log::warn!("dispatcher dropped inside a {}", self.state.name());
            debug_assert!(false, "dispatcher dropped with an open pass");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pngb::builder::PngbBuilder;
    use crate::pngb::enums::BufferUsages;
    use crate::pngb::loader::Pngb;
    use crate::runtime::mock::{Event, MockBackend};

    fn run_ops(build: impl FnOnce(&mut PngbBuilder)) -> Result<MockBackend, DispatchError> {
        let mut b = PngbBuilder::new();
        build(&mut b);
        let bytes = b.finish();
        let index = Pngb::parse(&bytes).unwrap();
        let mut d = Dispatcher::new(MockBackend::new());
        let result = d.run_all(index.view(&bytes));
        // drop guard: tests that fail inside a pass close it first
        d.abort_pass().unwrap();
        result.map(|_| std::mem::take(d.backend_mut()))
    }

    #[test]
    fn pool_expansion_creates_physical_buffers() {
        let events = run_ops(|b| {
            b.op(&Op::CreateBuffer {
                id: 0,
                size: 64,
                usage: BufferUsages::STORAGE,
                pool: 2,
            });
        })
        .unwrap()
        .events;
        assert_eq!(
            &events[..2],
            &[
                Event::CreateBuffer { id: 0, size: 64, usage: BufferUsages::STORAGE },
                Event::CreateBuffer { id: 1, size: 64, usage: BufferUsages::STORAGE },
            ]
        );
    }

    #[test]
    fn draw_outside_pass_is_bad_state() {
        let err = run_ops(|b| {
            b.op(&Op::Draw { vertices: 3, instances: 1, first_vertex: 0, first_instance: 0 });
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::BadState { .. }));
    }

    #[test]
    fn nested_pass_is_fatal() {
        let err = run_ops(|b| {
            b.op(&Op::BeginComputePass);
            b.op(&Op::BeginComputePass);
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::NestedPass { .. }));
    }

    #[test]
    fn end_pass_outside_is_unmatched() {
        let err = run_ops(|b| {
            b.op(&Op::EndPass);
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::UnmatchedPass { .. }));
    }

    #[test]
    fn submit_inside_pass_is_unmatched() {
        let err = run_ops(|b| {
            b.op(&Op::BeginComputePass);
            b.op(&Op::Submit);
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::UnmatchedPass { .. }));
    }

    #[test]
    fn duplicate_buffer_id_is_fatal() {
        let err = run_ops(|b| {
            b.op(&Op::CreateBuffer { id: 0, size: 4, usage: BufferUsages::UNIFORM, pool: 1 });
            b.op(&Op::CreateBuffer { id: 0, size: 4, usage: BufferUsages::UNIFORM, pool: 1 });
        })
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::DuplicateId { kind: ObjectKind::Buffer, .. }
        ));
    }

    #[test]
    fn zero_length_write_is_a_noop() {
        let events = run_ops(|b| {
            b.op(&Op::CreateBuffer { id: 0, size: 16, usage: BufferUsages::COPY_DST, pool: 1 });
            b.op(&Op::WriteBuffer { buffer: 0, offset: 0, data: 999, len: 0 });
        })
        .unwrap()
        .events;
        assert!(!events.iter().any(|e| matches!(e, Event::WriteBuffer { .. })));
    }

    #[test]
    fn out_of_bounds_write_is_fatal() {
        let err = run_ops(|b| {
            let d = b.add_data(vec![0u8; 32]);
            b.op(&Op::CreateBuffer { id: 0, size: 16, usage: BufferUsages::COPY_DST, pool: 1 });
            b.op(&Op::WriteBuffer { buffer: 0, offset: 0, data: d, len: 32 });
        })
        .unwrap_err();
        assert!(matches!(err, DispatchError::OutOfBounds { .. }));
    }

    #[test]
    fn frame_counter_increments_per_submit() {
        let mut b = PngbBuilder::new();
        b.op(&Op::Submit);
        b.op(&Op::Submit);
        let bytes = b.finish();
        let index = Pngb::parse(&bytes).unwrap();
        let mut d = Dispatcher::new(MockBackend::new());
        d.run_all(index.view(&bytes)).unwrap();
        assert_eq!(d.frame_counter(), 2);
    }
}

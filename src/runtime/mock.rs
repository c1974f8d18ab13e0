// src/runtime/mock.rs
// Recording backend: every call appends to an event log. Used by tests
// and by the validator's check mode.

use super::backend::{Backend, BackendResult, ResolvedBindGroup};
use crate::pngb::descriptor::{
    BindGroupLayoutDesc, ComputePipelineDesc, PipelineLayoutDesc, QuerySetDesc, RenderPassDesc,
    RenderPipelineDesc, SamplerDesc, TextureDesc, TextureViewDesc, WriteTextureDesc,
};
use crate::pngb::enums::{BufferUsages, IndexFormat};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    CreateBuffer { id: u32, size: u64, usage: BufferUsages },
    CreateTexture { id: u16, desc: TextureDesc },
    CreateSampler { id: u16, desc: SamplerDesc },
    CreateShader { id: u16, source: String },
    CreateBindGroupLayout { id: u16, desc: BindGroupLayoutDesc },
    CreatePipelineLayout { id: u16, desc: PipelineLayoutDesc },
    CreateRenderPipeline { id: u16, vertex_entry: String, fragment_entry: Option<String> },
    CreateComputePipeline { id: u16, entry: String },
    CreateBindGroup { id: u16, desc: ResolvedBindGroup },
    CreateTextureView { id: u16, desc: TextureViewDesc },
    CreateQuerySet { id: u16, desc: QuerySetDesc },
    WriteBuffer { buffer: u32, offset: u64, bytes: Vec<u8> },
    WriteTexture { desc: WriteTextureDesc, len: usize },
    BeginRenderPass { desc: RenderPassDesc },
    BeginComputePass,
    SetPipeline { id: u16 },
    SetBindGroup { slot: u32, id: u16 },
    SetVertexBuffer { slot: u32, buffer: u32, offset: u64, size: Option<u64> },
    SetIndexBuffer { buffer: u32, format: IndexFormat, offset: u64 },
    Draw { vertices: u32, instances: u32, first_vertex: u32, first_instance: u32 },
    DrawIndexed { indices: u32, instances: u32, first_index: u32, base_vertex: i32, first_instance: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    EndPass,
    Submit,
    End,
}

#[derive(Debug, Default)]
pub struct MockBackend {
    pub events: Vec<Event>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events appended since index `from`.
    pub fn events_since(&self, from: usize) -> &[Event] {
        &self.events[from..]
    }
}

impl Backend for MockBackend {
    fn create_buffer(&mut self, id: u32, size: u64, usage: BufferUsages) -> BackendResult {
        self.events.push(Event::CreateBuffer { id, size, usage });
        Ok(())
    }

    fn create_texture(&mut self, id: u16, desc: &TextureDesc) -> BackendResult {
        self.events.push(Event::CreateTexture { id, desc: desc.clone() });
        Ok(())
    }

    fn create_sampler(&mut self, id: u16, desc: &SamplerDesc) -> BackendResult {
        self.events.push(Event::CreateSampler { id, desc: desc.clone() });
        Ok(())
    }

    fn create_shader(&mut self, id: u16, source: &str) -> BackendResult {
        self.events.push(Event::CreateShader { id, source: source.to_owned() });
        Ok(())
    }

    fn create_bind_group_layout(&mut self, id: u16, desc: &BindGroupLayoutDesc) -> BackendResult {
        self.events.push(Event::CreateBindGroupLayout { id, desc: desc.clone() });
        Ok(())
    }

    fn create_pipeline_layout(&mut self, id: u16, desc: &PipelineLayoutDesc) -> BackendResult {
        self.events.push(Event::CreatePipelineLayout { id, desc: desc.clone() });
        Ok(())
    }

    fn create_render_pipeline(
        &mut self,
        id: u16,
        _desc: &RenderPipelineDesc,
        vertex_entry: &str,
        fragment_entry: Option<&str>,
    ) -> BackendResult {
        self.events.push(Event::CreateRenderPipeline {
            id,
            vertex_entry: vertex_entry.to_owned(),
            fragment_entry: fragment_entry.map(str::to_owned),
        });
        Ok(())
    }

    fn create_compute_pipeline(
        &mut self,
        id: u16,
        _desc: &ComputePipelineDesc,
        entry: &str,
    ) -> BackendResult {
        self.events.push(Event::CreateComputePipeline { id, entry: entry.to_owned() });
        Ok(())
    }

    fn create_bind_group(&mut self, id: u16, desc: &ResolvedBindGroup) -> BackendResult {
        self.events.push(Event::CreateBindGroup { id, desc: desc.clone() });
        Ok(())
    }

    fn create_texture_view(&mut self, id: u16, desc: &TextureViewDesc) -> BackendResult {
        self.events.push(Event::CreateTextureView { id, desc: *desc });
        Ok(())
    }

    fn create_query_set(&mut self, id: u16, desc: &QuerySetDesc) -> BackendResult {
        self.events.push(Event::CreateQuerySet { id, desc: *desc });
        Ok(())
    }

    fn write_buffer(&mut self, buffer: u32, offset: u64, bytes: &[u8]) -> BackendResult {
        self.events.push(Event::WriteBuffer { buffer, offset, bytes: bytes.to_vec() });
        Ok(())
    }

    fn write_texture(&mut self, desc: &WriteTextureDesc, bytes: &[u8]) -> BackendResult {
        self.events.push(Event::WriteTexture { desc: *desc, len: bytes.len() });
        Ok(())
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> BackendResult {
        self.events.push(Event::BeginRenderPass { desc: desc.clone() });
        Ok(())
    }

    fn begin_compute_pass(&mut self) -> BackendResult {
        self.events.push(Event::BeginComputePass);
        Ok(())
    }

    fn set_pipeline(&mut self, id: u16) -> BackendResult {
        self.events.push(Event::SetPipeline { id });
        Ok(())
    }

    fn set_bind_group(&mut self, slot: u32, id: u16, _dynamic_offsets: &[u32]) -> BackendResult {
        self.events.push(Event::SetBindGroup { slot, id });
        Ok(())
    }

    fn set_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: u32,
        offset: u64,
        size: Option<u64>,
    ) -> BackendResult {
        self.events.push(Event::SetVertexBuffer { slot, buffer, offset, size });
        Ok(())
    }

    fn set_index_buffer(&mut self, buffer: u32, format: IndexFormat, offset: u64) -> BackendResult {
        self.events.push(Event::SetIndexBuffer { buffer, format, offset });
        Ok(())
    }

    fn draw(
        &mut self,
        vertices: u32,
        instances: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> BackendResult {
        self.events.push(Event::Draw { vertices, instances, first_vertex, first_instance });
        Ok(())
    }

    fn draw_indexed(
        &mut self,
        indices: u32,
        instances: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> BackendResult {
        self.events.push(Event::DrawIndexed {
            indices,
            instances,
            first_index,
            base_vertex,
            first_instance,
        });
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> BackendResult {
        self.events.push(Event::Dispatch { x, y, z });
        Ok(())
    }

    fn end_pass(&mut self) -> BackendResult {
        self.events.push(Event::EndPass);
        Ok(())
    }

    fn submit(&mut self) -> BackendResult {
        self.events.push(Event::Submit);
        Ok(())
    }

    fn end(&mut self) -> BackendResult {
        self.events.push(Event::End);
        Ok(())
    }
}

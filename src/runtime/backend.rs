// src/runtime/backend.rs
// The abstract GPU capability set. A backend receives dense ids and
// decoded descriptors; it owns whatever handle tables it needs. Buffer
// ids are physical: the dispatcher has already expanded ping-pong pools
// and resolved pool offsets, so a backend never sees a pool.

use crate::error::BackendError;
use crate::pngb::descriptor::{
    BindGroupLayoutDesc, ComputePipelineDesc, PipelineLayoutDesc, QuerySetDesc, RenderPassDesc,
    RenderPipelineDesc, SamplerDesc, TextureDesc, TextureViewDesc, WriteTextureDesc,
};
use crate::pngb::enums::{BufferUsages, IndexFormat};

pub type BackendResult = Result<(), BackendError>;

/// Where a bind group's layout comes from, with pipeline ids resolved to
/// their kind-specific tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedLayout {
    Explicit(u16),
    FromRenderPipeline { pipeline: u16, group: u32 },
    FromComputePipeline { pipeline: u16, group: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedResource {
    /// `buffer` is a physical buffer id; pool selection already happened.
    Buffer {
        buffer: u32,
        offset: u64,
        size: Option<u64>,
    },
    Sampler(u16),
    TextureView(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedBindGroupEntry {
    pub binding: u32,
    pub resource: ResolvedResource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBindGroup {
    pub layout: ResolvedLayout,
    pub entries: Vec<ResolvedBindGroupEntry>,
}

/// The WebGPU-shaped operation surface the dispatcher drives. Every call
/// is best-effort synchronous from the dispatcher's view; real submission
/// is ordered by `submit`.
pub trait Backend {
    fn create_buffer(&mut self, id: u32, size: u64, usage: BufferUsages) -> BackendResult;
    fn create_texture(&mut self, id: u16, desc: &TextureDesc) -> BackendResult;
    fn create_sampler(&mut self, id: u16, desc: &SamplerDesc) -> BackendResult;
    fn create_shader(&mut self, id: u16, source: &str) -> BackendResult;
    fn create_bind_group_layout(&mut self, id: u16, desc: &BindGroupLayoutDesc) -> BackendResult;
    fn create_pipeline_layout(&mut self, id: u16, desc: &PipelineLayoutDesc) -> BackendResult;
    fn create_render_pipeline(
        &mut self,
        id: u16,
        desc: &RenderPipelineDesc,
        vertex_entry: &str,
        fragment_entry: Option<&str>,
    ) -> BackendResult;
    fn create_compute_pipeline(
        &mut self,
        id: u16,
        desc: &ComputePipelineDesc,
        entry: &str,
    ) -> BackendResult;
    fn create_bind_group(&mut self, id: u16, desc: &ResolvedBindGroup) -> BackendResult;
    fn create_texture_view(&mut self, id: u16, desc: &TextureViewDesc) -> BackendResult;
    fn create_query_set(&mut self, id: u16, desc: &QuerySetDesc) -> BackendResult;

    fn write_buffer(&mut self, buffer: u32, offset: u64, bytes: &[u8]) -> BackendResult;
    fn write_texture(&mut self, desc: &WriteTextureDesc, bytes: &[u8]) -> BackendResult;

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) -> BackendResult;
    fn begin_compute_pass(&mut self) -> BackendResult;
    fn set_pipeline(&mut self, id: u16) -> BackendResult;
    fn set_bind_group(&mut self, slot: u32, id: u16, dynamic_offsets: &[u32]) -> BackendResult;
    fn set_vertex_buffer(
        &mut self,
        slot: u32,
        buffer: u32,
        offset: u64,
        size: Option<u64>,
    ) -> BackendResult;
    fn set_index_buffer(&mut self, buffer: u32, format: IndexFormat, offset: u64) -> BackendResult;
    fn draw(
        &mut self,
        vertices: u32,
        instances: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> BackendResult;
    fn draw_indexed(
        &mut self,
        indices: u32,
        instances: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> BackendResult;
    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> BackendResult;
    fn end_pass(&mut self) -> BackendResult;

    fn submit(&mut self) -> BackendResult;
    fn end(&mut self) -> BackendResult;
}

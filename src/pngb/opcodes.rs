// src/pngb/opcodes.rs
// Opcode records: one tag byte, then unsigned-LEB128 operands. Descriptor
// payloads live in the data section and are referenced by data id. The
// stream is terminated by END.

use super::Cursor;
use super::enums::{BufferUsages, IndexFormat};
use super::varint;
use crate::error::PngbError;

pub const CREATE_BUFFER: u8 = 0x01;
pub const CREATE_TEXTURE: u8 = 0x02;
pub const CREATE_SAMPLER: u8 = 0x03;
pub const CREATE_SHADER: u8 = 0x04;
pub const CREATE_BIND_GROUP_LAYOUT: u8 = 0x05;
pub const CREATE_PIPELINE_LAYOUT: u8 = 0x06;
pub const CREATE_RENDER_PIPELINE: u8 = 0x07;
pub const CREATE_COMPUTE_PIPELINE: u8 = 0x08;
pub const CREATE_BIND_GROUP: u8 = 0x09;
pub const CREATE_TEXTURE_VIEW: u8 = 0x0A;
pub const CREATE_QUERY_SET: u8 = 0x0B;
pub const WRITE_BUFFER: u8 = 0x10;
pub const WRITE_TEXTURE: u8 = 0x11;
pub const BEGIN_RENDER_PASS: u8 = 0x20;
pub const BEGIN_COMPUTE_PASS: u8 = 0x21;
pub const SET_PIPELINE: u8 = 0x22;
pub const SET_BIND_GROUP: u8 = 0x23;
pub const SET_VERTEX_BUFFER: u8 = 0x24;
pub const SET_INDEX_BUFFER: u8 = 0x25;
pub const DRAW: u8 = 0x26;
pub const DRAW_INDEXED: u8 = 0x27;
pub const END_PASS: u8 = 0x28;
pub const DISPATCH: u8 = 0x30;
pub const FRAME: u8 = 0x40;
pub const SUBMIT: u8 = 0x41;
pub const END: u8 = 0xFF;

/// Marks a frame body that runs once at load (`#init`) rather than per
/// frame (`#frame`).
pub const FRAME_KIND_FRAME: u32 = 0;
pub const FRAME_KIND_INIT: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateBuffer { id: u16, size: u32, usage: BufferUsages, pool: u32 },
    CreateTexture { id: u16, desc: u16 },
    CreateSampler { id: u16, desc: u16 },
    CreateShader { id: u16, source: u16 },
    CreateBindGroupLayout { id: u16, desc: u16 },
    CreatePipelineLayout { id: u16, desc: u16 },
    CreateRenderPipeline { id: u16, desc: u16 },
    CreateComputePipeline { id: u16, desc: u16 },
    CreateBindGroup { id: u16, desc: u16 },
    CreateTextureView { id: u16, desc: u16 },
    CreateQuerySet { id: u16, desc: u16 },
    WriteBuffer { buffer: u16, offset: u32, data: u16, len: u32 },
    WriteTexture { desc: u16, data: u16 },
    BeginRenderPass { desc: u16 },
    BeginComputePass,
    SetPipeline { id: u16 },
    SetBindGroup { slot: u32, id: u16, dynamic_offsets: Vec<u32> },
    SetVertexBuffer { slot: u32, buffer: u16, offset: u32, size: u32 },
    SetIndexBuffer { buffer: u16, format: IndexFormat, offset: u32 },
    Draw { vertices: u32, instances: u32, first_vertex: u32, first_instance: u32 },
    DrawIndexed { indices: u32, instances: u32, first_index: u32, base_vertex: i32, first_instance: u32 },
    Dispatch { x: u32, y: u32, z: u32 },
    EndPass,
    Frame { name: u16, kind: u32 },
    Submit,
    End,
}

fn v(out: &mut Vec<u8>, value: u64) {
    varint::write(out, value);
}

impl Op {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Op::CreateBuffer { id, size, usage, pool } => {
                out.push(CREATE_BUFFER);
                v(out, id as u64);
                v(out, size as u64);
                v(out, usage.bits() as u64);
                v(out, pool as u64);
            }
            Op::CreateTexture { id, desc } => encode_create(out, CREATE_TEXTURE, id, desc),
            Op::CreateSampler { id, desc } => encode_create(out, CREATE_SAMPLER, id, desc),
            Op::CreateShader { id, source } => encode_create(out, CREATE_SHADER, id, source),
            Op::CreateBindGroupLayout { id, desc } => {
                encode_create(out, CREATE_BIND_GROUP_LAYOUT, id, desc)
            }
            Op::CreatePipelineLayout { id, desc } => {
                encode_create(out, CREATE_PIPELINE_LAYOUT, id, desc)
            }
            Op::CreateRenderPipeline { id, desc } => {
                encode_create(out, CREATE_RENDER_PIPELINE, id, desc)
            }
            Op::CreateComputePipeline { id, desc } => {
                encode_create(out, CREATE_COMPUTE_PIPELINE, id, desc)
            }
            Op::CreateBindGroup { id, desc } => encode_create(out, CREATE_BIND_GROUP, id, desc),
            Op::CreateTextureView { id, desc } => encode_create(out, CREATE_TEXTURE_VIEW, id, desc),
            Op::CreateQuerySet { id, desc } => encode_create(out, CREATE_QUERY_SET, id, desc),
            Op::WriteBuffer { buffer, offset, data, len } => {
                out.push(WRITE_BUFFER);
                v(out, buffer as u64);
                v(out, offset as u64);
                v(out, data as u64);
                v(out, len as u64);
            }
            Op::WriteTexture { desc, data } => {
                out.push(WRITE_TEXTURE);
                v(out, desc as u64);
                v(out, data as u64);
            }
            Op::BeginRenderPass { desc } => {
                out.push(BEGIN_RENDER_PASS);
                v(out, desc as u64);
            }
            Op::BeginComputePass => out.push(BEGIN_COMPUTE_PASS),
            Op::SetPipeline { id } => {
                out.push(SET_PIPELINE);
                v(out, id as u64);
            }
            Op::SetBindGroup { slot, id, ref dynamic_offsets } => {
                out.push(SET_BIND_GROUP);
                v(out, slot as u64);
                v(out, id as u64);
                v(out, dynamic_offsets.len() as u64);
                for &off in dynamic_offsets {
                    v(out, off as u64);
                }
            }
            Op::SetVertexBuffer { slot, buffer, offset, size } => {
                out.push(SET_VERTEX_BUFFER);
                v(out, slot as u64);
                v(out, buffer as u64);
                v(out, offset as u64);
                v(out, size as u64);
            }
            Op::SetIndexBuffer { buffer, format, offset } => {
                out.push(SET_INDEX_BUFFER);
                v(out, buffer as u64);
                v(out, format.code() as u64);
                v(out, offset as u64);
            }
            Op::Draw { vertices, instances, first_vertex, first_instance } => {
                out.push(DRAW);
                v(out, vertices as u64);
                v(out, instances as u64);
                v(out, first_vertex as u64);
                v(out, first_instance as u64);
            }
            Op::DrawIndexed { indices, instances, first_index, base_vertex, first_instance } => {
                out.push(DRAW_INDEXED);
                v(out, indices as u64);
                v(out, instances as u64);
                v(out, first_index as u64);
                // i32 carried as its two's-complement bit pattern
                v(out, base_vertex as u32 as u64);
                v(out, first_instance as u64);
            }
            Op::Dispatch { x, y, z } => {
                out.push(DISPATCH);
                v(out, x as u64);
                v(out, y as u64);
                v(out, z as u64);
            }
            Op::EndPass => out.push(END_PASS),
            Op::Frame { name, kind } => {
                out.push(FRAME);
                v(out, name as u64);
                v(out, kind as u64);
            }
            Op::Submit => out.push(SUBMIT),
            Op::End => out.push(END),
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Op::CreateBuffer { .. }
                | Op::CreateTexture { .. }
                | Op::CreateSampler { .. }
                | Op::CreateShader { .. }
                | Op::CreateBindGroupLayout { .. }
                | Op::CreatePipelineLayout { .. }
                | Op::CreateRenderPipeline { .. }
                | Op::CreateComputePipeline { .. }
                | Op::CreateBindGroup { .. }
                | Op::CreateTextureView { .. }
                | Op::CreateQuerySet { .. }
        )
    }
}

fn encode_create(out: &mut Vec<u8>, tag: u8, id: u16, desc: u16) {
    out.push(tag);
    v(out, id as u64);
    v(out, desc as u64);
}

/// Streaming decoder over the bytecode section. Yields `(offset, Op)`
/// pairs; the offset anchors diagnostics.
pub struct OpStream<'a> {
    cur: Cursor<'a>,
    done: bool,
}

impl<'a> OpStream<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        OpStream {
            cur: Cursor::new(code, "bytecode"),
            done: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.cur.pos()
    }

    fn decode_one(&mut self) -> Result<(usize, Op), PngbError> {
        let offset = self.cur.pos();
        let tag = self.cur.u8()?;
        let c = &mut self.cur;
        let op = match tag {
            CREATE_BUFFER => {
                let id = c.varint_u16()?;
                let size = c.varint_u32()?;
                let bits = c.varint_u32()?;
                let usage = BufferUsages::from_bits(bits)
                    .ok_or(PngbError::UnknownOpcode { tag, offset })?;
                let pool = c.varint_u32()?;
                Op::CreateBuffer { id, size, usage, pool }
            }
            CREATE_TEXTURE => decode_create(c, tag)?,
            CREATE_SAMPLER => decode_create(c, tag)?,
            CREATE_SHADER => {
                let id = c.varint_u16()?;
                let source = c.varint_u16()?;
                Op::CreateShader { id, source }
            }
            CREATE_BIND_GROUP_LAYOUT => decode_create(c, tag)?,
            CREATE_PIPELINE_LAYOUT => decode_create(c, tag)?,
            CREATE_RENDER_PIPELINE => decode_create(c, tag)?,
            CREATE_COMPUTE_PIPELINE => decode_create(c, tag)?,
            CREATE_BIND_GROUP => decode_create(c, tag)?,
            CREATE_TEXTURE_VIEW => decode_create(c, tag)?,
            CREATE_QUERY_SET => decode_create(c, tag)?,
            WRITE_BUFFER => Op::WriteBuffer {
                buffer: c.varint_u16()?,
                offset: c.varint_u32()?,
                data: c.varint_u16()?,
                len: c.varint_u32()?,
            },
            WRITE_TEXTURE => Op::WriteTexture {
                desc: c.varint_u16()?,
                data: c.varint_u16()?,
            },
            BEGIN_RENDER_PASS => Op::BeginRenderPass { desc: c.varint_u16()? },
            BEGIN_COMPUTE_PASS => Op::BeginComputePass,
            SET_PIPELINE => Op::SetPipeline { id: c.varint_u16()? },
            SET_BIND_GROUP => {
                let slot = c.varint_u32()?;
                let id = c.varint_u16()?;
                let count = c.varint_u32()? as usize;
                let mut dynamic_offsets = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    dynamic_offsets.push(c.varint_u32()?);
                }
                Op::SetBindGroup { slot, id, dynamic_offsets }
            }
            SET_VERTEX_BUFFER => Op::SetVertexBuffer {
                slot: c.varint_u32()?,
                buffer: c.varint_u16()?,
                offset: c.varint_u32()?,
                size: c.varint_u32()?,
            },
            SET_INDEX_BUFFER => {
                let buffer = c.varint_u16()?;
                let code = c.varint_u32()?;
                let format = u8::try_from(code)
                    .ok()
                    .and_then(IndexFormat::from_code)
                    .ok_or(PngbError::UnknownOpcode { tag, offset })?;
                let off = c.varint_u32()?;
                Op::SetIndexBuffer { buffer, format, offset: off }
            }
            DRAW => Op::Draw {
                vertices: c.varint_u32()?,
                instances: c.varint_u32()?,
                first_vertex: c.varint_u32()?,
                first_instance: c.varint_u32()?,
            },
            DRAW_INDEXED => Op::DrawIndexed {
                indices: c.varint_u32()?,
                instances: c.varint_u32()?,
                first_index: c.varint_u32()?,
                base_vertex: c.varint_u32()? as i32,
                first_instance: c.varint_u32()?,
            },
            DISPATCH => Op::Dispatch {
                x: c.varint_u32()?,
                y: c.varint_u32()?,
                z: c.varint_u32()?,
            },
            END_PASS => Op::EndPass,
            FRAME => Op::Frame {
                name: c.varint_u16()?,
                kind: c.varint_u32()?,
            },
            SUBMIT => Op::Submit,
            END => Op::End,
            _ => return Err(PngbError::UnknownOpcode { tag, offset }),
        };
        Ok((offset, op))
    }
}

fn decode_create(c: &mut Cursor, tag: u8) -> Result<Op, PngbError> {
    let id = c.varint_u16()?;
    let desc = c.varint_u16()?;
    Ok(match tag {
        CREATE_TEXTURE => Op::CreateTexture { id, desc },
        CREATE_SAMPLER => Op::CreateSampler { id, desc },
        CREATE_BIND_GROUP_LAYOUT => Op::CreateBindGroupLayout { id, desc },
        CREATE_PIPELINE_LAYOUT => Op::CreatePipelineLayout { id, desc },
        CREATE_RENDER_PIPELINE => Op::CreateRenderPipeline { id, desc },
        CREATE_COMPUTE_PIPELINE => Op::CreateComputePipeline { id, desc },
        CREATE_BIND_GROUP => Op::CreateBindGroup { id, desc },
        CREATE_TEXTURE_VIEW => Op::CreateTextureView { id, desc },
        CREATE_QUERY_SET => Op::CreateQuerySet { id, desc },
        _ => unreachable!("decode_create called with non-create tag"),
    })
}

impl Iterator for OpStream<'_> {
    type Item = Result<(usize, Op), PngbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cur.is_empty() {
            self.done = true;
            return Some(Err(PngbError::MissingEnd));
        }
        match self.decode_one() {
            Ok((off, Op::End)) => {
                self.done = true;
                Some(Ok((off, Op::End)))
            }
            Ok(pair) => Some(Ok(pair)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ops: &[Op]) {
        let mut code = Vec::new();
        for op in ops {
            op.encode(&mut code);
        }
        let decoded: Vec<Op> = OpStream::new(&code)
            .map(|r| r.unwrap().1)
            .collect();
        assert_eq!(decoded, ops);
    }

    #[test]
    fn stream_round_trip() {
        round_trip(&[
            Op::CreateBuffer {
                id: 0,
                size: 1024,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
                pool: 2,
            },
            Op::CreateShader { id: 0, source: 1 },
            Op::Frame { name: 3, kind: FRAME_KIND_FRAME },
            Op::BeginRenderPass { desc: 2 },
            Op::SetPipeline { id: 0 },
            Op::SetBindGroup { slot: 0, id: 1, dynamic_offsets: vec![] },
            Op::Draw { vertices: 3, instances: 1, first_vertex: 0, first_instance: 0 },
            Op::EndPass,
            Op::Submit,
            Op::End,
        ]);
    }

    #[test]
    fn negative_base_vertex_round_trips() {
        round_trip(&[
            Op::DrawIndexed {
                indices: 6,
                instances: 1,
                first_index: 0,
                base_vertex: -4,
                first_instance: 0,
            },
            Op::End,
        ]);
    }

    #[test]
    fn missing_end_is_reported() {
        let mut code = Vec::new();
        Op::Submit.encode(&mut code);
        let results: Vec<_> = OpStream::new(&code).collect();
        assert!(matches!(results.last(), Some(Err(PngbError::MissingEnd))));
    }

    #[test]
    fn unknown_opcode_is_reported() {
        let code = [0x7Eu8];
        let results: Vec<_> = OpStream::new(&code).collect();
        assert!(matches!(
            results[0],
            Err(PngbError::UnknownOpcode { tag: 0x7E, offset: 0 })
        ));
    }
}

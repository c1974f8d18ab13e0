// src/runtime/instance.rs
// The host-facing renderer instance. `load` accepts a PNG (the payload is
// extracted from the pNGb chunk) or raw PNGB bytes, runs the preamble and
// any #init sections, and indexes frame sections and uniforms. Per-frame
// work happens in `render_frame`; uniform writes go through
// `set_uniform`. A dispatch error aborts the current frame only.

use crate::error::{DispatchError, LoadError, ObjectKind};
use crate::png;
use crate::pngb::PluginSet;
use crate::pngb::enums::UniformType;
use crate::pngb::loader::{Pngb, PngbView};
use crate::pngb::opcodes::{FRAME_KIND_INIT, Op};
use super::backend::Backend;
use super::dispatcher::Dispatcher;
use super::uniforms::UniformIndex;

/// One `FRAME … SUBMIT` section of the bytecode.
#[derive(Debug, Clone)]
pub struct FrameSection {
    pub name: String,
    pub name_id: u16,
    pub init: bool,
    /// Byte range in the bytecode section, starting at the FRAME opcode.
    pub start: usize,
    pub end: usize,
}

/// A uniform visible to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformDesc {
    pub path: String,
    pub ty: UniformType,
    pub size: u32,
}

pub struct Instance<B: Backend> {
    bytes: Vec<u8>,
    index: Pngb,
    dispatcher: Dispatcher<B>,
    uniforms: UniformIndex,
    frames: Vec<FrameSection>,
}

impl<B: Backend> Instance<B> {
    /// Load from PNG or raw PNGB bytes and run the preamble plus every
    /// `#init` section once.
    pub fn load(bytes: Vec<u8>, backend: B) -> Result<Self, LoadError> {
        let payload = if bytes.starts_with(&png::PNG_SIGNATURE) {
            png::extract(&bytes)?
        } else {
            bytes
        };
        let index = Pngb::parse(&payload)?;
        index.check_plugins(PluginSet::all())?;

        let view = index.view(&payload);
        let (preamble_end, frames) = scan_sections(view)?;
        let uniforms = UniformIndex::build(view, index.uniforms.as_deref().unwrap_or(&[]))?;

        let mut dispatcher = Dispatcher::new(backend);
        dispatcher.run(view, 0, preamble_end).map_err(|e| {
            let _ = dispatcher.abort_pass();
            e
        })?;
        for section in frames.iter().filter(|s| s.init) {
            dispatcher.run(view, section.start, section.end).map_err(|e| {
                let _ = dispatcher.abort_pass();
                e
            })?;
        }

        log::debug!(
            "instance loaded: {} frame sections, {} uniform leaves",
            frames.len(),
            uniforms.leaves().len()
        );
        Ok(Instance {
            bytes: payload,
            index,
            dispatcher,
            uniforms,
            frames,
        })
    }

    /// Resolve a frame name to the id `render_frame` takes.
    pub fn frame_id(&self, name: &str) -> Option<u16> {
        self.frames
            .iter()
            .find(|s| !s.init && s.name == name)
            .map(|s| s.name_id)
    }

    pub fn frames(&self) -> &[FrameSection] {
        &self.frames
    }

    /// Run one frame body. `time` lands in every uniform leaf whose path
    /// is exactly `time` before the body executes; the frame counter
    /// advances at the body's SUBMIT. On error the instance stays usable
    /// for subsequent frames.
    pub fn render_frame(&mut self, time: f32, frame: u16) -> Result<(), DispatchError> {
        let section = self
            .frames
            .iter()
            .find(|s| !s.init && s.name_id == frame)
            .ok_or(DispatchError::UnknownId {
                kind: ObjectKind::Frame,
                id: frame as u32,
                offset: 0,
            })?;
        let (start, end) = (section.start, section.end);

        for (buffer, offset) in self.uniforms.time_targets() {
            self.dispatcher
                .write_buffer_direct(buffer, offset as u64, bytemuck::bytes_of(&time))?;
        }

        let view = self.index.view(&self.bytes);
        let result = self.dispatcher.run(view, start, end);
        if result.is_err() {
            let _ = self.dispatcher.abort_pass();
        }
        result
    }

    /// Write a uniform by flattened path. Intermediate paths are accepted
    /// when their subtree is contiguous (a whole-struct write).
    pub fn set_uniform(&mut self, path: &str, bytes: &[u8]) -> Result<(), DispatchError> {
        let entry = self
            .uniforms
            .get(path)
            .ok_or_else(|| DispatchError::UnknownUniform(path.to_owned()))?;
        if entry.ty.is_none() && !entry.contiguous {
            return Err(DispatchError::UniformNotContiguous(path.to_owned()));
        }
        if bytes.len() as u32 != entry.size {
            return Err(DispatchError::UniformSize {
                path: path.to_owned(),
                expected: entry.size,
                got: bytes.len() as u32,
            });
        }
        let (buffer, offset) = (entry.buffer, entry.offset);
        self.dispatcher
            .write_buffer_direct(buffer, offset as u64, bytes)
    }

    /// Host-visible uniforms, sorted by path.
    pub fn uniforms(&self) -> impl Iterator<Item = UniformDesc> + '_ {
        self.uniforms
            .leaves()
            .into_iter()
            .map(|e| UniformDesc {
                path: e.path.clone(),
                ty: e.ty.expect("leaves carry a type"),
                size: e.size,
            })
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn frame_counter(&self) -> u64 {
        self.dispatcher.frame_counter()
    }

    pub fn backend(&self) -> &B {
        self.dispatcher.backend()
    }

    /// Explicit teardown: asserts no open pass and signals `end` to the
    /// backend. Dropping without calling this is fine for hosts that do
    /// not care about the final backend signal.
    pub fn destroy(mut self) {
        if let Err(e) = self.dispatcher.end() {
            log::warn!("teardown: {e}");
        }
    }
}

/// Find the preamble end and every FRAME section. A section spans from
/// its FRAME opcode to the next FRAME (or the END opcode).
pub(crate) fn scan_sections(view: PngbView) -> Result<(usize, Vec<FrameSection>), LoadError> {
    let mut frames: Vec<FrameSection> = Vec::new();
    let mut preamble_end = view.code().len();
    let mut open: Option<usize> = None; // index into frames

    for item in view.ops() {
        let (offset, op) = item.map_err(LoadError::Pngb)?;
        match op {
            Op::Frame { name, kind } => {
                if let Some(i) = open.take() {
                    frames[i].end = offset;
                }
                if frames.is_empty() {
                    preamble_end = offset;
                }
                let name_str = view.string(name).map_err(LoadError::Pngb)?.to_owned();
                open = Some(frames.len());
                frames.push(FrameSection {
                    name: name_str,
                    name_id: name,
                    init: kind == FRAME_KIND_INIT,
                    start: offset,
                    end: offset,
                });
            }
            Op::End => {
                if let Some(i) = open.take() {
                    frames[i].end = offset;
                }
                if frames.is_empty() {
                    preamble_end = offset;
                }
            }
            _ => {}
        }
    }
    Ok((preamble_end, frames))
}

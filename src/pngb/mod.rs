// src/pngb/mod.rs
// The PNGB on-disk contract: header, sections, wire enums, descriptor
// records, opcode stream. Everything here is shared between the compiler
// (encode side) and the runtime (decode side) so the two can never drift.

pub mod builder;
pub mod descriptor;
pub mod enums;
pub mod loader;
pub mod opcodes;
pub mod varint;

use crate::error::PngbError;

pub const MAGIC: &[u8; 4] = b"PNGB";
pub const VERSION: u16 = 1;

/// Fixed header size: magic + version + flags + plugin set + four offsets.
pub const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 4 * 4;

bitflags::bitflags! {
    /// Executor capabilities a payload requires. A loader rejects payloads
    /// carrying bits it does not know.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PluginSet: u32 {
        const RENDER   = 1 << 0;
        const COMPUTE  = 1 << 1;
        const UPDATE   = 1 << 2;
        const UNIFORMS = 1 << 3;
        const QUERY    = 1 << 4;
    }
}

/// One binding's worth of uniform reflection, as carried in the optional
/// uniform table section. Fields are sorted by flattened path; slots were
/// assigned in that order at emission time.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct UniformBinding {
    pub buffer_id: u16,
    /// String id of the WGSL variable name.
    pub name: u16,
    pub group: u8,
    pub binding: u8,
    pub fields: Vec<UniformField>,
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct UniformField {
    pub slot: u16,
    /// String id of the dot-notation flattened path.
    pub name: u16,
    pub offset: u16,
    pub size: u16,
    pub ty: enums::UniformType,
}

/// Little-endian cursor over a byte slice. All section readers go through
/// this so truncation always surfaces as a typed error.
#[derive(Clone, Copy)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8], section: &'static str) -> Self {
        Self { buf, pos: 0, section }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PngbError> {
        if self.remaining() < n {
            return Err(PngbError::Truncated { section: self.section });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, PngbError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, PngbError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, PngbError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&mut self) -> Result<f32, PngbError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], PngbError> {
        self.take(n)
    }

    /// Unsigned LEB128.
    pub fn varint(&mut self) -> Result<u64, PngbError> {
        let start = self.pos;
        match varint::read(&self.buf[self.pos..]) {
            Some((v, n)) => {
                self.pos += n;
                Ok(v)
            }
            None => Err(PngbError::BadVarint(start)),
        }
    }

    pub fn varint_u32(&mut self) -> Result<u32, PngbError> {
        let v = self.varint()?;
        u32::try_from(v).map_err(|_| PngbError::BadVarint(self.pos))
    }

    pub fn varint_u16(&mut self) -> Result<u16, PngbError> {
        let v = self.varint()?;
        u16::try_from(v).map_err(|_| PngbError::BadVarint(self.pos))
    }
}

// src/pngb/loader.rs
// Runtime loader: validates the header and maps sections into borrowed
// views over the payload bytes. Big data (WGSL, vertex blobs) is never
// copied; the index only stores ranges.

use super::enums::UniformType;
use super::opcodes::OpStream;
use super::{Cursor, HEADER_LEN, MAGIC, PluginSet, UniformBinding, UniformField, VERSION};
use crate::error::PngbError;

type Range = (u32, u32); // (start, len) into the payload

/// Parsed section index for one PNGB payload. Owns no payload bytes;
/// pair it with the byte slice via [`Pngb::view`].
#[derive(Debug, Clone)]
pub struct Pngb {
    pub version: u16,
    pub flags: u16,
    pub plugins: PluginSet,
    strings: Vec<Range>,
    data: Vec<Range>,
    code: Range,
    pub uniforms: Option<Vec<UniformBinding>>,
}

impl Pngb {
    pub fn parse(bytes: &[u8]) -> Result<Pngb, PngbError> {
        if bytes.len() < HEADER_LEN {
            return Err(PngbError::Truncated { section: "header" });
        }
        if &bytes[0..4] != MAGIC {
            return Err(PngbError::BadMagic);
        }
        let mut h = Cursor::new(&bytes[4..HEADER_LEN], "header");
        let version = h.u16()?;
        if version != VERSION {
            return Err(PngbError::Version(version));
        }
        let flags = h.u16()?;
        let plugin_bits = h.u32()?;
        let plugins = PluginSet::from_bits(plugin_bits)
            .ok_or(PngbError::PluginSet(plugin_bits & !PluginSet::all().bits()))?;
        let string_off = h.u32()? as usize;
        let data_off = h.u32()? as usize;
        let code_off = h.u32()? as usize;
        let uniform_off = h.u32()? as usize;

        let strings = parse_string_index(bytes, string_off)?;
        let data = parse_data_index(bytes, data_off)?;

        let code_end = if uniform_off != 0 { uniform_off } else { bytes.len() };
        if code_off > code_end || code_end > bytes.len() {
            return Err(PngbError::BadOffset { section: "bytecode" });
        }
        let code = (code_off as u32, (code_end - code_off) as u32);

        let uniforms = if uniform_off != 0 {
            if uniform_off >= bytes.len() {
                return Err(PngbError::BadOffset { section: "uniform table" });
            }
            Some(parse_uniform_table(&bytes[uniform_off..])?)
        } else {
            None
        };

        Ok(Pngb {
            version,
            flags,
            plugins,
            strings,
            data,
            code,
            uniforms,
        })
    }

    /// Reject payloads whose required capabilities exceed `supported`.
    pub fn check_plugins(&self, supported: PluginSet) -> Result<(), PngbError> {
        let missing = self.plugins.difference(supported);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PngbError::PluginSet(missing.bits()))
        }
    }

    pub fn view<'a>(&'a self, bytes: &'a [u8]) -> PngbView<'a> {
        PngbView { bytes, index: self }
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn data_count(&self) -> usize {
        self.data.len()
    }
}

/// The index paired with the payload bytes it indexes.
#[derive(Clone, Copy)]
pub struct PngbView<'a> {
    pub bytes: &'a [u8],
    pub index: &'a Pngb,
}

impl<'a> PngbView<'a> {
    pub fn string(&self, id: u16) -> Result<&'a str, PngbError> {
        let &(start, len) = self
            .index
            .strings
            .get(id as usize)
            .ok_or(PngbError::StringId(id))?;
        let raw = &self.bytes[start as usize..(start + len) as usize];
        // validated at parse time; re-check cheaply rather than unsafe
        std::str::from_utf8(raw).map_err(|_| PngbError::BadUtf8(id))
    }

    pub fn data(&self, id: u16) -> Result<&'a [u8], PngbError> {
        let &(start, len) = self
            .index
            .data
            .get(id as usize)
            .ok_or(PngbError::DataId(id))?;
        Ok(&self.bytes[start as usize..(start + len) as usize])
    }

    pub fn code(&self) -> &'a [u8] {
        let (start, len) = self.index.code;
        &self.bytes[start as usize..(start + len) as usize]
    }

    pub fn ops(&self) -> OpStream<'a> {
        OpStream::new(self.code())
    }

    /// Re-serialize the payload from the parsed views. A payload produced
    /// by the builder re-serializes to the same bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut strings = Vec::new();
        strings.extend_from_slice(&(self.index.strings.len() as u32).to_le_bytes());
        for &(start, len) in &self.index.strings {
            strings.extend_from_slice(&(len as u16).to_le_bytes());
            strings.extend_from_slice(&self.bytes[start as usize..(start + len) as usize]);
        }

        let mut data = Vec::new();
        data.extend_from_slice(&(self.index.data.len() as u32).to_le_bytes());
        for &(start, len) in &self.index.data {
            data.extend_from_slice(&len.to_le_bytes());
            data.extend_from_slice(&self.bytes[start as usize..(start + len) as usize]);
        }

        let uniforms = match &self.index.uniforms {
            Some(bindings) => encode_uniform_table(bindings),
            None => Vec::new(),
        };

        let code = self.code();
        let string_off = HEADER_LEN as u32;
        let data_off = string_off + strings.len() as u32;
        let code_off = data_off + data.len() as u32;
        let uniform_off = if uniforms.is_empty() {
            0
        } else {
            code_off + code.len() as u32
        };

        let mut out =
            Vec::with_capacity(HEADER_LEN + strings.len() + data.len() + code.len() + uniforms.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.index.version.to_le_bytes());
        out.extend_from_slice(&self.index.flags.to_le_bytes());
        out.extend_from_slice(&self.index.plugins.bits().to_le_bytes());
        out.extend_from_slice(&string_off.to_le_bytes());
        out.extend_from_slice(&data_off.to_le_bytes());
        out.extend_from_slice(&code_off.to_le_bytes());
        out.extend_from_slice(&uniform_off.to_le_bytes());
        out.extend_from_slice(&strings);
        out.extend_from_slice(&data);
        out.extend_from_slice(code);
        out.extend_from_slice(&uniforms);
        out
    }
}

fn parse_string_index(bytes: &[u8], off: usize) -> Result<Vec<Range>, PngbError> {
    if off > bytes.len() {
        return Err(PngbError::BadOffset { section: "string table" });
    }
    let mut c = Cursor::new(&bytes[off..], "string table");
    let count = c.u32()? as usize;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let len = c.u16()? as usize;
        let start = off + c.pos();
        let raw = c.bytes(len)?;
        std::str::from_utf8(raw).map_err(|_| PngbError::BadUtf8(i as u16))?;
        out.push((start as u32, len as u32));
    }
    Ok(out)
}

fn parse_data_index(bytes: &[u8], off: usize) -> Result<Vec<Range>, PngbError> {
    if off > bytes.len() {
        return Err(PngbError::BadOffset { section: "data section" });
    }
    let mut c = Cursor::new(&bytes[off..], "data section");
    let count = c.u32()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = c.u32()? as usize;
        let start = off + c.pos();
        c.bytes(len)?;
        out.push((start as u32, len as u32));
    }
    Ok(out)
}

fn parse_uniform_table(bytes: &[u8]) -> Result<Vec<UniformBinding>, PngbError> {
    let mut c = Cursor::new(bytes, "uniform table");
    let binding_count = c.u16()? as usize;
    let mut out = Vec::with_capacity(binding_count);
    for _ in 0..binding_count {
        let buffer_id = c.u16()?;
        let name = c.u16()?;
        let group = c.u8()?;
        let binding = c.u8()?;
        let field_count = c.u16()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let slot = c.u16()?;
            let fname = c.u16()?;
            let offset = c.u16()?;
            let size = c.u16()?;
            let ty_code = c.u8()?;
            let _pad = c.u8()?;
            let ty = UniformType::from_code(ty_code)
                .ok_or(PngbError::Truncated { section: "uniform table" })?;
            fields.push(UniformField { slot, name: fname, offset, size, ty });
        }
        out.push(UniformBinding { buffer_id, name, group, binding, fields });
    }
    Ok(out)
}

fn encode_uniform_table(bindings: &[UniformBinding]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(bindings.len() as u16).to_le_bytes());
    for b in bindings {
        out.extend_from_slice(&b.buffer_id.to_le_bytes());
        out.extend_from_slice(&b.name.to_le_bytes());
        out.push(b.group);
        out.push(b.binding);
        out.extend_from_slice(&(b.fields.len() as u16).to_le_bytes());
        for f in &b.fields {
            out.extend_from_slice(&f.slot.to_le_bytes());
            out.extend_from_slice(&f.name.to_le_bytes());
            out.extend_from_slice(&f.offset.to_le_bytes());
            out.extend_from_slice(&f.size.to_le_bytes());
            out.push(f.ty.code());
            out.push(0);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::super::builder::PngbBuilder;
    use super::super::enums::BufferUsages;
    use super::super::opcodes::Op;
    use super::*;

    fn sample_payload() -> Vec<u8> {
        let mut b = PngbBuilder::new();
        let s = b.intern("time");
        let d = b.add_data(vec![0xAA; 16]);
        b.op(&Op::CreateBuffer {
            id: 0,
            size: 16,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            pool: 1,
        });
        b.set_uniforms(vec![UniformBinding {
            buffer_id: 0,
            name: s,
            group: 0,
            binding: 0,
            fields: vec![UniformField {
                slot: 0,
                name: s,
                offset: 0,
                size: 4,
                ty: UniformType::F32,
            }],
        }]);
        let _ = d;
        b.finish()
    }

    #[test]
    fn parse_then_reserialize_is_identity() {
        let bytes = sample_payload();
        let index = Pngb::parse(&bytes).unwrap();
        let view = index.view(&bytes);
        assert_eq!(view.to_bytes(), bytes);
    }

    #[test]
    fn sections_resolve() {
        let bytes = sample_payload();
        let index = Pngb::parse(&bytes).unwrap();
        let view = index.view(&bytes);
        assert_eq!(view.string(0).unwrap(), "time");
        assert_eq!(view.data(0).unwrap(), &[0xAA; 16]);
        assert!(view.string(9).is_err());
        let uniforms = index.uniforms.as_ref().unwrap();
        assert_eq!(uniforms.len(), 1);
        assert_eq!(uniforms[0].fields[0].ty, UniformType::F32);
    }

    #[test]
    fn bad_magic_and_version_are_distinguished() {
        let bytes = sample_payload();
        let mut wrong_magic = bytes.clone();
        wrong_magic[0] = b'X';
        assert!(matches!(Pngb::parse(&wrong_magic), Err(PngbError::BadMagic)));

        let mut wrong_version = bytes.clone();
        wrong_version[4] = 9;
        assert!(matches!(Pngb::parse(&wrong_version), Err(PngbError::Version(9))));
    }

    #[test]
    fn unknown_plugin_bits_fail_capability_check() {
        let bytes = sample_payload();
        let index = Pngb::parse(&bytes).unwrap();
        // payload only carries UNIFORMS; an executor with no capabilities
        // must reject it
        assert!(index.check_plugins(PluginSet::empty()).is_err());
        assert!(index.check_plugins(PluginSet::all()).is_ok());
    }
}

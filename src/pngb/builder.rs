// src/pngb/builder.rs
// Accumulates the four PNGB sections and writes the final payload.
// Interning is idempotent; section offsets are computed at finalization.

use hashbrown::HashMap;

use super::opcodes::Op;
use super::{HEADER_LEN, MAGIC, PluginSet, UniformBinding, VERSION};

#[derive(Debug, Default)]
pub struct PngbBuilder {
    strings: Vec<String>,
    string_ids: HashMap<String, u16>,
    data: Vec<Vec<u8>>,
    code: Vec<u8>,
    uniforms: Vec<UniformBinding>,
    plugins: PluginSet,
    flags: u16,
}

impl PngbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its stable id. Calling twice with the
    /// same string returns the same id.
    pub fn intern(&mut self, s: &str) -> u16 {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        let id = u16::try_from(self.strings.len()).expect("string table overflow");
        self.strings.push(s.to_owned());
        self.string_ids.insert(s.to_owned(), id);
        id
    }

    pub fn add_data(&mut self, bytes: Vec<u8>) -> u16 {
        let id = u16::try_from(self.data.len()).expect("data section overflow");
        self.data.push(bytes);
        id
    }

    pub fn op(&mut self, op: &Op) {
        op.encode(&mut self.code);
    }

    pub fn require(&mut self, caps: PluginSet) {
        self.plugins |= caps;
    }

    pub fn set_uniforms(&mut self, bindings: Vec<UniformBinding>) {
        if !bindings.is_empty() {
            self.plugins |= PluginSet::UNIFORMS;
        }
        self.uniforms = bindings;
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Write header + sections. Section order is fixed: strings, data,
    /// bytecode, uniform table; every offset is from payload start.
    pub fn finish(mut self) -> Vec<u8> {
        self.op(&Op::End);

        let mut strings = Vec::new();
        strings.extend_from_slice(&(self.strings.len() as u32).to_le_bytes());
        for s in &self.strings {
            let len = u16::try_from(s.len()).expect("string too long");
            strings.extend_from_slice(&len.to_le_bytes());
            strings.extend_from_slice(s.as_bytes());
        }

        let mut data = Vec::new();
        data.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        for d in &self.data {
            data.extend_from_slice(&(d.len() as u32).to_le_bytes());
            data.extend_from_slice(d);
        }

        let uniforms = if self.uniforms.is_empty() {
            Vec::new()
        } else {
            encode_uniform_table(&self.uniforms)
        };

        let string_off = HEADER_LEN as u32;
        let data_off = string_off + strings.len() as u32;
        let code_off = data_off + data.len() as u32;
        let uniform_off = if uniforms.is_empty() {
            0
        } else {
            code_off + self.code.len() as u32
        };

        let mut out = Vec::with_capacity(
            HEADER_LEN + strings.len() + data.len() + self.code.len() + uniforms.len(),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.plugins.bits().to_le_bytes());
        out.extend_from_slice(&string_off.to_le_bytes());
        out.extend_from_slice(&data_off.to_le_bytes());
        out.extend_from_slice(&code_off.to_le_bytes());
        out.extend_from_slice(&uniform_off.to_le_bytes());
        out.extend_from_slice(&strings);
        out.extend_from_slice(&data);
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&uniforms);
        out
    }
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
            out.push(0); // pad
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut b = PngbBuilder::new();
        let a = b.intern("time");
        let c = b.intern("time");
        let d = b.intern("main");
        assert_eq!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn header_offsets_are_consistent() {
        let mut b = PngbBuilder::new();
        b.intern("x");
        b.add_data(vec![1, 2, 3]);
        let bytes = b.finish();
        assert_eq!(&bytes[0..4], MAGIC);
        let string_off = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
        let data_off = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let code_off = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;
        assert_eq!(string_off, HEADER_LEN);
        // count + (len + "x")
        assert_eq!(data_off, string_off + 4 + 2 + 1);
        assert_eq!(code_off, data_off + 4 + 4 + 3);
        // bytecode is just END
        assert_eq!(bytes[code_off], super::super::opcodes::END);
    }
}

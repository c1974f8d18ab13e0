// src/runtime/uniforms.rs
// Uniform-by-name: builds `path -> (buffer, offset, size, type)` from the
// payload's uniform table in one pass over the fields, plus intermediate
// entries for whole-struct writes where the subtree is contiguous.

use hashbrown::HashMap;

use crate::error::PngbError;
use crate::pngb::UniformBinding;
use crate::pngb::enums::UniformType;
use crate::pngb::loader::PngbView;

#[derive(Debug, Clone)]
pub struct UniformEntry {
    pub path: String,
    pub buffer: u16,
    pub offset: u32,
    pub size: u32,
    /// `None` for intermediate (struct) nodes.
    pub ty: Option<UniformType>,
    /// For intermediate nodes: true when the subtree has no padding gaps,
    /// which is what makes a whole-struct write well-defined.
    pub contiguous: bool,
}

#[derive(Debug, Default)]
pub struct UniformIndex {
    entries: Vec<UniformEntry>,
    by_path: HashMap<String, usize>,
}

impl UniformIndex {
    pub fn build(view: PngbView, bindings: &[UniformBinding]) -> Result<Self, PngbError> {
        let mut out = UniformIndex::default();

        // group spans for intermediate paths: path -> (min, max, sum)
        let mut groups: HashMap<String, (u32, u32, u32)> = HashMap::new();

        for binding in bindings {
            for field in &binding.fields {
                let path = view.string(field.name)?.to_owned();
                let offset = field.offset as u32;
                let size = field.size as u32;

                let mut prefix = path.as_str();
                while let Some(dot) = prefix.rfind('.') {
                    prefix = &prefix[..dot];
                    let g = groups.entry(prefix.to_owned()).or_insert((u32::MAX, 0, 0));
                    g.0 = g.0.min(offset);
                    g.1 = g.1.max(offset + size);
                    g.2 += size;
                }

                if out.by_path.contains_key(&path) {
                    log::warn!("uniform path `{path}` bound more than once; first wins");
                    continue;
                }
                out.by_path.insert(path.clone(), out.entries.len());
                out.entries.push(UniformEntry {
                    path,
                    buffer: binding.buffer_id,
                    offset,
                    size,
                    ty: Some(field.ty),
                    contiguous: true,
                });
            }

            for (path, (start, end, sum)) in groups.drain() {
                if out.by_path.contains_key(&path) {
                    continue;
                }
                out.by_path.insert(path.clone(), out.entries.len());
                out.entries.push(UniformEntry {
                    path,
                    buffer: binding.buffer_id,
                    offset: start,
                    size: end - start,
                    ty: None,
                    contiguous: sum == end - start,
                });
            }
        }

        Ok(out)
    }

    pub fn get(&self, path: &str) -> Option<&UniformEntry> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Leaf fields sorted by path, for the host `uniforms()` iterator.
    pub fn leaves(&self) -> Vec<&UniformEntry> {
        let mut out: Vec<&UniformEntry> =
            self.entries.iter().filter(|e| e.ty.is_some()).collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }

    /// Every leaf whose full path is exactly `time`; these receive the
    /// frame clock before each frame body runs.
    pub fn time_targets(&self) -> Vec<(u16, u32)> {
        self.entries
            .iter()
            .filter(|e| e.path == "time" && e.ty == Some(UniformType::F32))
            .map(|e| (e.buffer, e.offset))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pngb::UniformField;
    use crate::pngb::builder::PngbBuilder;
    use crate::pngb::loader::Pngb;

    fn index_for(fields: Vec<(&str, u16, u16, UniformType)>) -> UniformIndex {
        let mut b = PngbBuilder::new();
        let var = b.intern("u");
        let wire_fields: Vec<UniformField> = fields
            .iter()
            .enumerate()
            .map(|(slot, (path, offset, size, ty))| UniformField {
                slot: slot as u16,
                name: b.intern(path),
                offset: *offset,
                size: *size,
                ty: *ty,
            })
            .collect();
        b.set_uniforms(vec![UniformBinding {
            buffer_id: 0,
            name: var,
            group: 0,
            binding: 0,
            fields: wire_fields,
        }]);
        let bytes = b.finish();
        let parsed = Pngb::parse(&bytes).unwrap();
        let idx =
            UniformIndex::build(parsed.view(&bytes), parsed.uniforms.as_deref().unwrap()).unwrap();
        idx
    }

    #[test]
    fn leaf_lookup() {
        let idx = index_for(vec![("time", 0, 4, UniformType::F32)]);
        let e = idx.get("time").unwrap();
        assert_eq!((e.buffer, e.offset, e.size), (0, 0, 4));
        assert_eq!(e.ty, Some(UniformType::F32));
        assert!(idx.get("nope").is_none());
    }

    #[test]
    fn contiguous_intermediate_allows_whole_struct_write() {
        let idx = index_for(vec![
            ("light.color", 0, 12, UniformType::Vec3F),
            ("light.intensity", 12, 4, UniformType::F32),
        ]);
        let e = idx.get("light").unwrap();
        assert_eq!((e.offset, e.size), (0, 16));
        assert!(e.contiguous);
        assert!(e.ty.is_none());
    }

    #[test]
    fn padded_intermediate_is_not_contiguous() {
        // vec3 at 0 (12 bytes), next field at 16: a 4-byte hole
        let idx = index_for(vec![
            ("light.color", 0, 12, UniformType::Vec3F),
            ("light.range", 16, 4, UniformType::F32),
        ]);
        let e = idx.get("light").unwrap();
        assert_eq!((e.offset, e.size), (0, 20));
        assert!(!e.contiguous);
    }

    #[test]
    fn time_targets_require_exact_path() {
        let idx = index_for(vec![
            ("time", 0, 4, UniformType::F32),
            ("sim.time", 16, 4, UniformType::F32),
        ]);
        assert_eq!(idx.time_targets(), vec![(0, 0)]);
    }
}

// src/compiler/reflect.rs
// Reflection bridge: extract uniform struct layouts and entry points from
// WGSL. The service is a trait so hosts can swap the implementation; the
// default walks a naga module. Reflection always runs on the exact
// post-substitution source that will be stored in the data section.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::ReflectError;
use crate::pngb::enums::UniformType;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    pub name: String,
    pub stage: Stage,
}

/// One flattened struct field: dot path, absolute byte offset, size, type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReflField {
    pub path: String,
    pub offset: u32,
    pub size: u32,
    #[serde(rename = "type")]
    pub ty: UniformType,
}

/// A `@group @binding` uniform variable with a struct type.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ReflBinding {
    pub group: u32,
    pub binding: u32,
    pub var_name: String,
    pub type_name: String,
    /// Total struct size under uniform layout rules.
    pub size: u32,
    /// Sorted by `path`; slot indices are implicit in this order.
    pub fields: Vec<ReflField>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReflectionData {
    pub entry_points: Vec<EntryPoint>,
    pub bindings: Vec<ReflBinding>,
}

impl ReflectionData {
    pub fn binding_by_var(&self, var: &str) -> Option<&ReflBinding> {
        self.bindings.iter().find(|b| b.var_name == var)
    }

    pub fn binding_at(&self, group: u32, binding: u32) -> Option<&ReflBinding> {
        self.bindings
            .iter()
            .find(|b| b.group == group && b.binding == binding)
    }

    pub fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|ep| ep.name == name)
    }
}

pub trait ReflectionService {
    fn reflect(&self, wgsl: &str) -> Result<ReflectionData, ReflectError>;
}

/// Per-shader reflection results, keyed by shader name. `None` records a
/// failed reflection so it is not retried (and not re-reported).
#[derive(Default)]
pub struct ReflectionCache {
    map: HashMap<String, Option<ReflectionData>>,
}

impl ReflectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, shader: &str, data: Option<ReflectionData>) {
        self.map.insert(shader.to_owned(), data);
    }

    pub fn get(&self, shader: &str) -> Option<&ReflectionData> {
        self.map.get(shader).and_then(|d| d.as_ref())
    }
}

/// The default service: parse WGSL with naga and walk the module. Member
/// offsets come straight from the front-end, which applies WGSL's uniform
/// address space layout rules.
pub struct NagaReflector;

impl ReflectionService for NagaReflector {
    fn reflect(&self, wgsl: &str) -> Result<ReflectionData, ReflectError> {
        let module = naga::front::wgsl::parse_str(wgsl)
            .map_err(|e| ReflectError::Parse(e.emit_to_string(wgsl)))?;

        let mut out = ReflectionData::default();

        for ep in &module.entry_points {
            let stage = match ep.stage {
                naga::ShaderStage::Vertex => Stage::Vertex,
                naga::ShaderStage::Fragment => Stage::Fragment,
                naga::ShaderStage::Compute => Stage::Compute,
                _ => continue,
            };
            out.entry_points.push(EntryPoint {
                name: ep.name.clone(),
                stage,
            });
        }

        for (_, var) in module.global_variables.iter() {
            if var.space != naga::AddressSpace::Uniform {
                continue;
            }
            let Some(res) = &var.binding else { continue };
            let ty = &module.types[var.ty];
            let naga::TypeInner::Struct { members, span } = &ty.inner else {
                // uniform vars of non-struct type have no named fields
                continue;
            };
            let mut fields = Vec::new();
            flatten_struct(&module, members, "", &mut fields, 0);
            fields.sort_by(|a, b| a.path.cmp(&b.path));
            out.bindings.push(ReflBinding {
                group: res.group,
                binding: res.binding,
                var_name: var.name.clone().unwrap_or_default(),
                type_name: ty.name.clone().unwrap_or_default(),
                size: *span,
                fields,
            });
        }

        out.bindings
            .sort_by_key(|b| (b.group, b.binding));
        Ok(out)
    }
}

fn flatten_struct(
    module: &naga::Module,
    members: &[naga::StructMember],
    prefix: &str,
    out: &mut Vec<ReflField>,
    base_offset: u32,
) {
    for member in members {
        let name = member.name.as_deref().unwrap_or("_");
        let path = if prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{prefix}.{name}")
        };
        let offset = base_offset + member.offset;
        match &module.types[member.ty].inner {
            naga::TypeInner::Struct { members: inner, .. } => {
                flatten_struct(module, inner, &path, out, offset);
            }
            inner => match scalar_type_of(inner) {
                Some(ty) => out.push(ReflField {
                    path,
                    offset,
                    size: ty.size(),
                    ty,
                }),
                None => {
                    log::warn!("skipping uniform field `{path}`: unsupported type");
                }
            },
        }
    }
}

fn scalar_type_of(inner: &naga::TypeInner) -> Option<UniformType> {
    use naga::{ScalarKind, VectorSize};
    match inner {
        naga::TypeInner::Scalar(s) if s.width == 4 => match s.kind {
            ScalarKind::Float => Some(UniformType::F32),
            ScalarKind::Sint => Some(UniformType::I32),
            ScalarKind::Uint => Some(UniformType::U32),
            _ => None,
        },
        naga::TypeInner::Vector { size, scalar } if scalar.width == 4 => {
            match (scalar.kind, size) {
                (ScalarKind::Float, VectorSize::Bi) => Some(UniformType::Vec2F),
                (ScalarKind::Float, VectorSize::Tri) => Some(UniformType::Vec3F),
                (ScalarKind::Float, VectorSize::Quad) => Some(UniformType::Vec4F),
                (ScalarKind::Sint, VectorSize::Bi) => Some(UniformType::Vec2I),
                (ScalarKind::Sint, VectorSize::Tri) => Some(UniformType::Vec3I),
                (ScalarKind::Sint, VectorSize::Quad) => Some(UniformType::Vec4I),
                (ScalarKind::Uint, VectorSize::Bi) => Some(UniformType::Vec2U),
                (ScalarKind::Uint, VectorSize::Tri) => Some(UniformType::Vec3U),
                (ScalarKind::Uint, VectorSize::Quad) => Some(UniformType::Vec4U),
                _ => None,
            }
        }
        naga::TypeInner::Matrix { columns, rows, scalar }
            if scalar.kind == ScalarKind::Float && scalar.width == 4 =>
        {
            match (columns, rows) {
                (VectorSize::Tri, VectorSize::Tri) => Some(UniformType::Mat3),
                (VectorSize::Quad, VectorSize::Quad) => Some(UniformType::Mat4),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
struct Light {
    color: vec3f,
    intensity: f32,
}

struct Params {
    time: f32,
    resolution: vec2f,
    light: Light,
    view: mat4x4f,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@builtin(vertex_index) i: u32) -> @builtin(position) vec4f {
    return vec4f(0.0);
}

@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(params.time);
}
"#;

    #[test]
    fn reflects_entry_points_and_binding() {
        let data = NagaReflector.reflect(SHADER).unwrap();
        assert!(data.has_entry_point("vs_main"));
        assert!(data.has_entry_point("fs_main"));
        let b = data.binding_by_var("params").unwrap();
        assert_eq!((b.group, b.binding), (0, 0));
        assert_eq!(b.type_name, "Params");
    }

    #[test]
    fn flattens_nested_structs_sorted_by_path() {
        let data = NagaReflector.reflect(SHADER).unwrap();
        let b = data.binding_by_var("params").unwrap();
        let paths: Vec<&str> = b.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["light.color", "light.intensity", "resolution", "time", "view"]
        );
        let time = b.fields.iter().find(|f| f.path == "time").unwrap();
        assert_eq!((time.offset, time.size, time.ty), (0, 4, UniformType::F32));
        // vec2f after an f32 aligns to 8
        let res = b.fields.iter().find(|f| f.path == "resolution").unwrap();
        assert_eq!(res.offset, 8);
        // nested struct offsets are absolute
        let intensity = b.fields.iter().find(|f| f.path == "light.intensity").unwrap();
        assert_eq!(intensity.offset, 16 + 12);
    }

    #[test]
    fn path_order_is_stable_under_declaration_shuffle() {
        let shuffled = r#"
struct Params {
    view: mat4x4f,
    light: Light,
    resolution: vec2f,
    time: f32,
}

struct Light {
    intensity: f32,
    color: vec3f,
}

@group(0) @binding(0) var<uniform> params: Params;

@compute @workgroup_size(1)
fn main() {}
"#;
        let data = NagaReflector.reflect(shuffled).unwrap();
        let b = data.binding_by_var("params").unwrap();
        let paths: Vec<&str> = b.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["light.color", "light.intensity", "resolution", "time", "view"]
        );
    }

    #[test]
    fn bad_wgsl_is_a_reflect_error() {
        assert!(matches!(
            NagaReflector.reflect("not wgsl at all {"),
            Err(ReflectError::Parse(_))
        ));
    }

    #[test]
    fn empty_source_has_no_bindings() {
        let data = NagaReflector.reflect("").unwrap();
        assert!(data.bindings.is_empty());
        assert!(data.entry_points.is_empty());
    }
}

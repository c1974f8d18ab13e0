// src/compiler/analyzer.rs
// Two passes over the AST. Pass 1 declares: every declaration gets the
// next dense id within its kind, duplicates are caught. Pass 2 resolves:
// property trees lower into typed declarations, references become ids,
// enum names are checked against the wire dictionaries, and reflection
// results are joined against bind groups to produce the uniform bindings.

use hashbrown::HashMap;

use crate::compiler::ast::{Ast, NIL, NodeId, Span, Tag};
use crate::compiler::lexer::{MACRO_KIND_COUNT, MacroKind};
use crate::compiler::reflect::{ReflField, ReflectionCache, ReflectionService};
use crate::error::{Diagnostic, ResolveError, Severity};
use crate::pngb::descriptor as desc;
use crate::pngb::enums::*;

// ---------------- typed declarations ----------------

#[derive(Debug)]
pub struct ShaderDecl {
    pub name: String,
    /// Post-substitution source; reflection ran on exactly these bytes.
    pub code: String,
}

#[derive(Debug)]
pub struct BufferDecl {
    pub name: String,
    pub size: u32,
    pub usage: BufferUsages,
    pub pool: u32,
    pub data: Option<u16>,
}

#[derive(Debug)]
pub struct TextureDecl {
    pub name: String,
    pub desc: desc::TextureDesc,
    pub data: Option<u16>,
}

#[derive(Debug)]
pub struct SamplerDecl {
    pub name: String,
    pub desc: desc::SamplerDesc,
}

#[derive(Debug)]
pub struct TextureViewDecl {
    pub name: String,
    pub desc: desc::TextureViewDesc,
}

#[derive(Debug)]
pub struct BglDecl {
    pub name: String,
    pub desc: desc::BindGroupLayoutDesc,
}

#[derive(Debug)]
pub struct PipelineLayoutDecl {
    pub name: String,
    pub desc: desc::PipelineLayoutDesc,
}

#[derive(Debug)]
pub struct FragDecl {
    pub module: u16,
    pub entry: String,
    pub targets: Vec<desc::ColorTarget>,
}

#[derive(Debug)]
pub struct RenderPipelineDecl {
    pub name: String,
    pub layout: Option<u16>,
    pub vertex_module: u16,
    pub vertex_entry: String,
    pub vertex_buffers: Vec<desc::VertexBufferLayout>,
    pub fragment: Option<FragDecl>,
    pub topology: PrimitiveTopology,
    pub strip_index_format: Option<IndexFormat>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_stencil: Option<desc::DepthStencilState>,
}

#[derive(Debug)]
pub struct ComputePipelineDecl {
    pub name: String,
    pub layout: Option<u16>,
    pub module: u16,
    pub entry: String,
}

#[derive(Debug)]
pub struct BindGroupDecl {
    pub name: String,
    pub layout: desc::BindGroupLayoutRef,
    pub entries: Vec<desc::BindGroupEntry>,
    /// Explicit `group = N`, when present.
    pub explicit_group: Option<u32>,
    /// Slot inferred from the first `bindGroups = [...]` position.
    pub slot: Option<u32>,
    /// True when any entry selects a pool slot; dynamic groups are
    /// re-created per frame.
    pub dynamic: bool,
}

impl BindGroupDecl {
    pub fn group_index(&self) -> u32 {
        self.explicit_group.or(self.slot).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct QuerySetDecl {
    pub name: String,
    pub desc: desc::QuerySetDesc,
}

#[derive(Debug)]
pub struct DataDecl {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
pub struct QueueWrite {
    pub buffer: u16,
    pub offset: u32,
    pub data: u16,
}

#[derive(Debug)]
pub struct QueueDecl {
    pub name: String,
    pub writes: Vec<QueueWrite>,
}

#[derive(Debug, Clone, Copy)]
pub enum DrawCmd {
    Draw {
        vertices: u32,
        instances: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        indices: u32,
        instances: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    },
}

#[derive(Debug)]
pub struct RenderPassDecl {
    pub name: String,
    pub desc: desc::RenderPassDesc,
    pub pipeline: u16,
    pub bind_groups: Vec<u16>,
    pub vertex_buffers: Vec<u16>,
    pub index_buffer: Option<u16>,
    pub index_format: IndexFormat,
    pub draw: Option<DrawCmd>,
}

#[derive(Debug)]
pub struct ComputePassDecl {
    pub name: String,
    pub pipeline: u16,
    pub bind_groups: Vec<u16>,
    pub dispatch: [u32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameItem {
    Render(u16),
    Compute(u16),
    Queue(u16),
}

#[derive(Debug)]
pub struct FrameDecl {
    pub name: String,
    pub init: bool,
    pub items: Vec<FrameItem>,
}

/// One uniform binding surviving the bind-group x reflection join.
#[derive(Debug, Clone)]
pub struct UniformBindingInfo {
    pub buffer: u16,
    pub var_name: String,
    pub group: u32,
    pub binding: u32,
    pub fields: Vec<ReflField>,
}

/// The analyzer's output: every declaration lowered and resolved, dense
/// ids per kind in declaration order.
#[derive(Debug, Default)]
pub struct Module {
    pub shaders: Vec<ShaderDecl>,
    pub buffers: Vec<BufferDecl>,
    pub textures: Vec<TextureDecl>,
    pub samplers: Vec<SamplerDecl>,
    pub views: Vec<TextureViewDecl>,
    pub bgls: Vec<BglDecl>,
    pub pipeline_layouts: Vec<PipelineLayoutDecl>,
    pub render_pipelines: Vec<RenderPipelineDecl>,
    pub compute_pipelines: Vec<ComputePipelineDecl>,
    pub bind_groups: Vec<BindGroupDecl>,
    pub query_sets: Vec<QuerySetDecl>,
    pub datas: Vec<DataDecl>,
    pub queues: Vec<QueueDecl>,
    pub render_passes: Vec<RenderPassDecl>,
    pub compute_passes: Vec<ComputePassDecl>,
    pub frames: Vec<FrameDecl>,
    pub uniform_bindings: Vec<UniformBindingInfo>,
}

// ---------------- analysis driver ----------------

#[derive(Default)]
struct Table {
    ids: HashMap<String, u16>,
    decls: Vec<NodeId>,
}

#[derive(Debug)]
pub struct Analysis {
    pub module: Module,
    pub warnings: Vec<Diagnostic>,
}

pub fn analyze(
    src: &str,
    ast: &Ast,
    service: &dyn ReflectionService,
) -> Result<Analysis, Vec<Diagnostic>> {
    let mut a = Analyzer {
        src,
        ast,
        tables: std::array::from_fn(|_| Table::default()),
        cache: ReflectionCache::new(),
        module: Module::default(),
        errors: Vec::new(),
        warnings: Vec::new(),
    };
    a.declare();
    a.resolve(service);
    if a.errors.is_empty() {
        Ok(Analysis {
            module: a.module,
            warnings: a.warnings,
        })
    } else {
        let mut diags = a.errors;
        diags.extend(a.warnings);
        Err(diags)
    }
}

struct Analyzer<'a> {
    src: &'a str,
    ast: &'a Ast,
    tables: [Table; MACRO_KIND_COUNT],
    cache: ReflectionCache,
    module: Module,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

type Res<T> = Result<T, ResolveError>;

impl<'a> Analyzer<'a> {
    fn text(&self, node: NodeId) -> &'a str {
        self.ast.node(node).span.text(self.src)
    }

    fn span(&self, node: NodeId) -> Span {
        self.ast.node(node).span
    }

    fn diag(&self, severity: Severity, code: &str, message: String, span: Option<Span>) -> Diagnostic {
        let (line, col) = match span {
            Some(s) => {
                let (l, c) = s.line_col(self.src);
                (Some(l), Some(c))
            }
            None => (None, None),
        };
        Diagnostic {
            severity,
            code: code.to_owned(),
            message,
            line,
            col,
        }
    }

    fn error(&mut self, e: ResolveError) {
        let d = self.diag(Severity::Error, "E-RESOLVE", e.to_string(), Some(e.span()));
        self.errors.push(d);
    }

    fn warn(&mut self, code: &str, message: String, span: Option<Span>) {
        let d = self.diag(Severity::Warning, code, message, span);
        self.warnings.push(d);
    }

    // ---- pass 1: declare ----

    fn declare(&mut self) {
        for decl in self.ast.children(self.ast.root()) {
            let Tag::Decl(kind) = self.ast.node(decl).tag else {
                continue;
            };
            let name = self.text(decl).to_owned();
            let table = &mut self.tables[kind.index()];
            if table.ids.contains_key(&name) {
                let e = ResolveError::DuplicateName {
                    kind: kind.keyword(),
                    name,
                    span: self.span(decl),
                };
                self.error(e);
                continue;
            }
            let id = table.decls.len() as u16;
            table.ids.insert(name, id);
            table.decls.push(decl);
        }
    }

    fn decls_of(&self, kind: MacroKind) -> Vec<NodeId> {
        self.tables[kind.index()].decls.clone()
    }

    fn lookup(&self, kind: MacroKind, name: &str) -> Option<u16> {
        self.tables[kind.index()].ids.get(name).copied()
    }

    // ---- property helpers ----

    fn prop(&self, owner: NodeId, key: &str) -> Option<NodeId> {
        for child in self.ast.children(owner) {
            if self.ast.node(child).tag == Tag::Prop && self.text(child) == key {
                let value = self.ast.node(child).first_child;
                if value != NIL {
                    return Some(value);
                }
            }
        }
        None
    }

    fn require(&self, owner: NodeId, key: &'static str) -> Res<NodeId> {
        self.prop(owner, key).ok_or(ResolveError::MissingProperty {
            key,
            span: self.span(owner),
        })
    }

    fn check_keys(&mut self, owner: NodeId, allowed: &[&str]) {
        let mut bad = Vec::new();
        for child in self.ast.children(owner) {
            if self.ast.node(child).tag == Tag::Prop {
                let key = self.text(child);
                if !allowed.contains(&key) {
                    bad.push(ResolveError::BadValue {
                        key: key.to_owned(),
                        expected: "a known property",
                        span: self.span(child),
                    });
                }
            }
        }
        for e in bad {
            self.error(e);
        }
    }

    fn int(&self, node: NodeId, key: &str) -> Res<i64> {
        match self.ast.node(node).tag {
            Tag::Int(v) => Ok(v),
            _ => Err(ResolveError::BadValue {
                key: key.to_owned(),
                expected: "an integer",
                span: self.span(node),
            }),
        }
    }

    fn uint(&self, node: NodeId, key: &str) -> Res<u32> {
        let v = self.int(node, key)?;
        u32::try_from(v).map_err(|_| ResolveError::BadValue {
            key: key.to_owned(),
            expected: "a non-negative integer",
            span: self.span(node),
        })
    }

    fn float(&self, node: NodeId, key: &str) -> Res<f32> {
        match self.ast.node(node).tag {
            Tag::Float(v) => Ok(v as f32),
            Tag::Int(v) => Ok(v as f32),
            _ => Err(ResolveError::BadValue {
                key: key.to_owned(),
                expected: "a number",
                span: self.span(node),
            }),
        }
    }

    fn string(&self, node: NodeId, key: &str) -> Res<String> {
        match self.ast.node(node).tag {
            Tag::Str(id) => Ok(self.ast.str_value(id).to_owned()),
            Tag::Ident => Ok(self.text(node).to_owned()),
            _ => Err(ResolveError::BadValue {
                key: key.to_owned(),
                expected: "a string",
                span: self.span(node),
            }),
        }
    }

    fn ident(&self, node: NodeId, key: &str) -> Res<&'a str> {
        match self.ast.node(node).tag {
            Tag::Ident | Tag::Ref => Ok(self.text(node)),
            _ => Err(ResolveError::BadValue {
                key: key.to_owned(),
                expected: "an identifier",
                span: self.span(node),
            }),
        }
    }

    fn reference(&self, node: NodeId, kind: MacroKind) -> Res<u16> {
        let name = self.ident(node, kind.keyword())?;
        self.lookup(kind, name).ok_or(ResolveError::UnknownReference {
            kind: kind.keyword(),
            name: name.to_owned(),
            span: self.span(node),
        })
    }

    fn enum_value<T>(
        &self,
        node: NodeId,
        parse: impl Fn(&str) -> Option<T>,
        what: &'static str,
    ) -> Res<T> {
        let text = self.ident(node, what)?;
        parse(text).ok_or(ResolveError::UnknownValue {
            what,
            value: text.to_owned(),
            span: self.span(node),
        })
    }

    /// `usage = [A B]` or `usage = A`
    fn flags<T: bitflags::Flags>(
        &self,
        node: NodeId,
        parse: impl Fn(&str) -> Option<T>,
        what: &'static str,
    ) -> Res<T> {
        let mut out = T::empty();
        match self.ast.node(node).tag {
            Tag::Array => {
                for child in self.ast.children(node) {
                    let name = self.ident(child, what)?;
                    let flag = parse(name).ok_or(ResolveError::UnknownValue {
                        what,
                        value: name.to_owned(),
                        span: self.span(child),
                    })?;
                    out = out.union(flag);
                }
            }
            _ => {
                let name = self.ident(node, what)?;
                out = parse(name).ok_or(ResolveError::UnknownValue {
                    what,
                    value: name.to_owned(),
                    span: self.span(node),
                })?;
            }
        }
        Ok(out)
    }

    fn array_items(&self, node: NodeId, key: &str) -> Res<Vec<NodeId>> {
        match self.ast.node(node).tag {
            Tag::Array => Ok(self.ast.children(node).collect()),
            // a single item is accepted where an array is expected
            Tag::Object | Tag::Ident | Tag::Ref => Ok(vec![node]),
            _ => Err(ResolveError::BadValue {
                key: key.to_owned(),
                expected: "an array",
                span: self.span(node),
            }),
        }
    }

    // ---- pass 2: resolve ----

    fn resolve(&mut self, service: &dyn ReflectionService) {
        let defines = self.collect_defines();
        self.lower_shaders(&defines, service);
        self.lower_datas();
        self.lower_textures();
        self.lower_samplers();
        self.lower_buffers();
        self.lower_views();
        self.lower_bgls();
        self.lower_pipeline_layouts();
        self.lower_render_pipelines();
        self.lower_compute_pipelines();
        self.lower_bind_groups();
        self.lower_query_sets();
        self.lower_render_passes();
        self.lower_compute_passes();
        self.lower_queues();
        self.lower_frames();
        self.infer_bind_group_slots();
        self.join_uniform_bindings();
        self.check_uniform_write_conflicts();
    }

    fn collect_defines(&mut self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for decl in self.decls_of(MacroKind::Define) {
            let name = self.text(decl).to_owned();
            let value = self.ast.node(decl).first_child;
            if value == NIL {
                continue;
            }
            let text = match self.ast.node(value).tag {
                Tag::Int(v) => v.to_string(),
                Tag::Float(v) => v.to_string(),
                Tag::Str(id) => self.ast.str_value(id).to_owned(),
                Tag::Ident | Tag::DottedIdent => self.text(value).to_owned(),
                _ => {
                    self.error(ResolveError::BadValue {
                        key: name.clone(),
                        expected: "a scalar define value",
                        span: self.span(value),
                    });
                    continue;
                }
            };
            out.push((name, text));
        }
        out
    }

    fn lower_shaders(&mut self, defines: &[(String, String)], service: &dyn ReflectionService) {
        for decl in self.decls_of(MacroKind::Wgsl) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["code"]);
            let code = match self.require(decl, "code").and_then(|v| self.string(v, "code")) {
                Ok(raw) => substitute_defines(&raw, defines),
                Err(e) => {
                    self.error(e);
                    String::new()
                }
            };
            let reflected = if code.trim().is_empty() {
                Err(crate::error::ReflectError::Parse("empty shader source".into()))
            } else {
                service.reflect(&code)
            };
            match reflected {
                Ok(data) => self.cache.insert(&name, Some(data)),
                Err(e) => {
                    self.warn(
                        "W-REFLECT",
                        format!("shader `{name}`: {e}; size=shader.* and uniform names disabled"),
                        Some(self.span(decl)),
                    );
                    self.cache.insert(&name, None);
                }
            }
            self.module.shaders.push(ShaderDecl { name, code });
        }
    }

    fn lower_datas(&mut self) {
        for decl in self.decls_of(MacroKind::Data) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["f32", "u32", "i32", "u16", "u8"]);
            let bytes = match self.data_bytes(decl) {
                Ok(b) => b,
                Err(e) => {
                    self.error(e);
                    Vec::new()
                }
            };
            self.module.datas.push(DataDecl { name, bytes });
        }
    }

    fn data_bytes(&self, decl: NodeId) -> Res<Vec<u8>> {
        let mut out = Vec::new();
        let mut seen = false;
        for (key, width) in [("f32", 4), ("u32", 4), ("i32", 4), ("u16", 2), ("u8", 1)] {
            let Some(value) = self.prop(decl, key) else {
                continue;
            };
            if seen {
                return Err(ResolveError::BadValue {
                    key: key.to_owned(),
                    expected: "exactly one payload property",
                    span: self.span(value),
                });
            }
            seen = true;
            for item in self.array_items(value, key)? {
                match (key, width) {
                    ("f32", _) => out.extend_from_slice(&self.float(item, key)?.to_le_bytes()),
                    ("u32", _) => out.extend_from_slice(&self.uint(item, key)?.to_le_bytes()),
                    ("i32", _) => {
                        let v = self.int(item, key)?;
                        let v = i32::try_from(v).map_err(|_| ResolveError::BadValue {
                            key: key.to_owned(),
                            expected: "an i32",
                            span: self.span(item),
                        })?;
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    ("u16", _) => {
                        let v = self.uint(item, key)?;
                        let v = u16::try_from(v).map_err(|_| ResolveError::BadValue {
                            key: key.to_owned(),
                            expected: "a u16",
                            span: self.span(item),
                        })?;
                        out.extend_from_slice(&v.to_le_bytes());
                    }
                    _ => {
                        let v = self.uint(item, key)?;
                        let v = u8::try_from(v).map_err(|_| ResolveError::BadValue {
                            key: key.to_owned(),
                            expected: "a u8",
                            span: self.span(item),
                        })?;
                        out.push(v);
                    }
                }
            }
        }
        if !seen {
            return Err(ResolveError::MissingProperty {
                key: "f32|u32|i32|u16|u8",
                span: self.span(decl),
            });
        }
        Ok(out)
    }

    fn lower_textures(&mut self) {
        for decl in self.decls_of(MacroKind::Texture) {
            let name = self.text(decl).to_owned();
            self.check_keys(
                decl,
                &["width", "height", "format", "usage", "mipLevelCount", "sampleCount", "dimension", "depthOrArrayLayers", "data"],
            );
            match self.texture_desc(decl) {
                Ok((d, data)) => self.module.textures.push(TextureDecl { name, desc: d, data }),
                Err(e) => {
                    self.error(e);
                    self.module.textures.push(TextureDecl {
                        name,
                        desc: desc::TextureDesc {
                            width: 1,
                            height: 1,
                            depth_or_array_layers: 1,
                            mip_level_count: 1,
                            sample_count: 1,
                            dimension: TextureDimension::D2,
                            format: TextureFormat::Rgba8Unorm,
                            usage: TextureUsages::empty(),
                        },
                        data: None,
                    });
                }
            }
        }
    }

    fn texture_desc(&self, decl: NodeId) -> Res<(desc::TextureDesc, Option<u16>)> {
        let width = self.uint(self.require(decl, "width")?, "width")?;
        let height = self.uint(self.require(decl, "height")?, "height")?;
        let format = self.enum_value(
            self.require(decl, "format")?,
            TextureFormat::from_name,
            "texture format",
        )?;
        let usage = self.flags(
            self.require(decl, "usage")?,
            TextureUsages::from_flag_name,
            "texture usage",
        )?;
        let mut d = desc::TextureDesc {
            width,
            height,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage,
        };
        if let Some(v) = self.prop(decl, "depthOrArrayLayers") {
            d.depth_or_array_layers = self.uint(v, "depthOrArrayLayers")?;
        }
        if let Some(v) = self.prop(decl, "mipLevelCount") {
            d.mip_level_count = self.uint(v, "mipLevelCount")?;
        }
        if let Some(v) = self.prop(decl, "sampleCount") {
            d.sample_count = self.uint(v, "sampleCount")?;
        }
        if let Some(v) = self.prop(decl, "dimension") {
            d.dimension = self.enum_value(v, TextureDimension::from_name, "texture dimension")?;
        }
        let data = match self.prop(decl, "data") {
            Some(v) => Some(self.reference(v, MacroKind::Data)?),
            None => None,
        };
        Ok((d, data))
    }

    fn lower_samplers(&mut self) {
        for decl in self.decls_of(MacroKind::Sampler) {
            let name = self.text(decl).to_owned();
            self.check_keys(
                decl,
                &[
                    "addressModeU", "addressModeV", "addressModeW", "magFilter", "minFilter",
                    "mipmapFilter", "lodMinClamp", "lodMaxClamp", "compare", "maxAnisotropy",
                ],
            );
            match self.sampler_desc(decl) {
                Ok(d) => self.module.samplers.push(SamplerDecl { name, desc: d }),
                Err(e) => {
                    self.error(e);
                    self.module.samplers.push(SamplerDecl {
                        name,
                        desc: desc::SamplerDesc::default(),
                    });
                }
            }
        }
    }

    fn sampler_desc(&self, decl: NodeId) -> Res<desc::SamplerDesc> {
        let mut d = desc::SamplerDesc::default();
        if let Some(v) = self.prop(decl, "addressModeU") {
            d.address_mode_u = self.enum_value(v, AddressMode::from_name, "address mode")?;
        }
        if let Some(v) = self.prop(decl, "addressModeV") {
            d.address_mode_v = self.enum_value(v, AddressMode::from_name, "address mode")?;
        }
        if let Some(v) = self.prop(decl, "addressModeW") {
            d.address_mode_w = self.enum_value(v, AddressMode::from_name, "address mode")?;
        }
        if let Some(v) = self.prop(decl, "magFilter") {
            d.mag_filter = self.enum_value(v, FilterMode::from_name, "filter mode")?;
        }
        if let Some(v) = self.prop(decl, "minFilter") {
            d.min_filter = self.enum_value(v, FilterMode::from_name, "filter mode")?;
        }
        if let Some(v) = self.prop(decl, "mipmapFilter") {
            d.mipmap_filter = self.enum_value(v, FilterMode::from_name, "filter mode")?;
        }
        if let Some(v) = self.prop(decl, "lodMinClamp") {
            d.lod_min_clamp = self.float(v, "lodMinClamp")?;
        }
        if let Some(v) = self.prop(decl, "lodMaxClamp") {
            d.lod_max_clamp = self.float(v, "lodMaxClamp")?;
        }
        if let Some(v) = self.prop(decl, "compare") {
            d.compare = Some(self.enum_value(v, CompareFunction::from_name, "compare function")?);
        }
        if let Some(v) = self.prop(decl, "maxAnisotropy") {
            let a = self.uint(v, "maxAnisotropy")?;
            d.max_anisotropy = u16::try_from(a).map_err(|_| ResolveError::BadValue {
                key: "maxAnisotropy".into(),
                expected: "a u16",
                span: self.span(v),
            })?;
        }
        Ok(d)
    }

    fn lower_buffers(&mut self) {
        for decl in self.decls_of(MacroKind::Buffer) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["size", "usage", "pool", "data"]);
            match self.buffer_decl(decl, &name) {
                Ok(b) => self.module.buffers.push(b),
                Err(e) => {
                    self.error(e);
                    self.module.buffers.push(BufferDecl {
                        name,
                        size: 0,
                        usage: BufferUsages::empty(),
                        pool: 1,
                        data: None,
                    });
                }
            }
        }
    }

    fn buffer_decl(&self, decl: NodeId, name: &str) -> Res<BufferDecl> {
        let size_node = self.require(decl, "size")?;
        let size = match self.ast.node(size_node).tag {
            Tag::DottedIdent => self.shader_struct_size(size_node)?,
            _ => self.uint(size_node, "size")?,
        };
        let usage = self.flags(
            self.require(decl, "usage")?,
            BufferUsages::from_flag_name,
            "buffer usage",
        )?;
        let pool = match self.prop(decl, "pool") {
            Some(v) => {
                let p = self.uint(v, "pool")?;
                if p == 0 {
                    return Err(ResolveError::BadValue {
                        key: "pool".into(),
                        expected: "a pool count of at least 1",
                        span: self.span(v),
                    });
                }
                p
            }
            None => 1,
        };
        let data = match self.prop(decl, "data") {
            Some(v) => {
                let id = self.reference(v, MacroKind::Data)?;
                let len = self.module.datas[id as usize].bytes.len() as u32;
                if len > size {
                    return Err(ResolveError::BadValue {
                        key: "data".into(),
                        expected: "initial data no larger than the buffer",
                        span: self.span(v),
                    });
                }
                Some(id)
            }
            None => None,
        };
        Ok(BufferDecl {
            name: name.to_owned(),
            size,
            usage,
            pool,
            data,
        })
    }

    /// `size = shader.var` resolves through the reflection cache.
    fn shader_struct_size(&self, node: NodeId) -> Res<u32> {
        let text = self.text(node);
        let span = self.span(node);
        let (shader, var) = text.split_once('.').ok_or(ResolveError::BadValue {
            key: "size".into(),
            expected: "`shader.binding`",
            span,
        })?;
        if self.lookup(MacroKind::Wgsl, shader).is_none() {
            return Err(ResolveError::UnknownReference {
                kind: "wgsl",
                name: shader.to_owned(),
                span,
            });
        }
        let Some(data) = self.cache.get(shader) else {
            return Err(ResolveError::ReflectionUnavailable {
                shader: shader.to_owned(),
                expr: text.to_owned(),
                span,
            });
        };
        let binding = data.binding_by_var(var).ok_or(ResolveError::UnknownBinding {
            shader: shader.to_owned(),
            var: var.to_owned(),
            span,
        })?;
        Ok(binding.size)
    }

    fn lower_views(&mut self) {
        for decl in self.decls_of(MacroKind::TextureView) {
            let name = self.text(decl).to_owned();
            self.check_keys(
                decl,
                &["texture", "format", "dimension", "baseMipLevel", "mipLevelCount", "baseArrayLayer", "arrayLayerCount"],
            );
            match self.view_desc(decl) {
                Ok(d) => self.module.views.push(TextureViewDecl { name, desc: d }),
                Err(e) => {
                    self.error(e);
                    self.module.views.push(TextureViewDecl {
                        name,
                        desc: desc::TextureViewDesc {
                            texture: 0,
                            format: None,
                            dimension: None,
                            base_mip_level: 0,
                            mip_level_count: None,
                            base_array_layer: 0,
                            array_layer_count: None,
                        },
                    });
                }
            }
        }
    }

    fn view_desc(&self, decl: NodeId) -> Res<desc::TextureViewDesc> {
        let texture = self.reference(self.require(decl, "texture")?, MacroKind::Texture)?;
        let mut d = desc::TextureViewDesc {
            texture,
            format: None,
            dimension: None,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: None,
        };
        if let Some(v) = self.prop(decl, "format") {
            d.format = Some(self.enum_value(v, TextureFormat::from_name, "texture format")?);
        }
        if let Some(v) = self.prop(decl, "dimension") {
            d.dimension = Some(self.enum_value(v, TextureViewDimension::from_name, "view dimension")?);
        }
        if let Some(v) = self.prop(decl, "baseMipLevel") {
            d.base_mip_level = self.uint(v, "baseMipLevel")?;
        }
        if let Some(v) = self.prop(decl, "mipLevelCount") {
            d.mip_level_count = Some(self.uint(v, "mipLevelCount")?);
        }
        if let Some(v) = self.prop(decl, "baseArrayLayer") {
            d.base_array_layer = self.uint(v, "baseArrayLayer")?;
        }
        if let Some(v) = self.prop(decl, "arrayLayerCount") {
            d.array_layer_count = Some(self.uint(v, "arrayLayerCount")?);
        }
        Ok(d)
    }

    fn lower_bgls(&mut self) {
        for decl in self.decls_of(MacroKind::BindGroupLayout) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["entries"]);
            match self.bgl_desc(decl) {
                Ok(d) => self.module.bgls.push(BglDecl { name, desc: d }),
                Err(e) => {
                    self.error(e);
                    self.module.bgls.push(BglDecl {
                        name,
                        desc: desc::BindGroupLayoutDesc { entries: Vec::new() },
                    });
                }
            }
        }
    }

    fn bgl_desc(&self, decl: NodeId) -> Res<desc::BindGroupLayoutDesc> {
        let entries_node = self.require(decl, "entries")?;
        let mut entries = Vec::new();
        for item in self.array_items(entries_node, "entries")? {
            let binding = self.uint(self.require(item, "binding")?, "binding")?;
            let visibility = self.flags(
                self.require(item, "visibility")?,
                ShaderStages::from_flag_name,
                "shader stage",
            )?;
            let ty = self.enum_value(
                self.require(item, "type")?,
                BindingType::from_name,
                "binding type",
            )?;
            let format = match self.prop(item, "format") {
                Some(v) => Some(self.enum_value(v, TextureFormat::from_name, "texture format")?),
                None => None,
            };
            let view_dimension = match self.prop(item, "dimension") {
                Some(v) => Some(self.enum_value(v, TextureViewDimension::from_name, "view dimension")?),
                None => None,
            };
            entries.push(desc::BglEntry {
                binding,
                visibility,
                ty,
                format,
                view_dimension,
            });
        }
        Ok(desc::BindGroupLayoutDesc { entries })
    }

    fn lower_pipeline_layouts(&mut self) {
        for decl in self.decls_of(MacroKind::PipelineLayout) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["layouts"]);
            let layouts = self
                .require(decl, "layouts")
                .and_then(|v| self.array_items(v, "layouts"))
                .and_then(|items| {
                    items
                        .into_iter()
                        .map(|n| self.reference(n, MacroKind::BindGroupLayout))
                        .collect::<Res<Vec<u16>>>()
                });
            match layouts {
                Ok(bind_group_layouts) => self.module.pipeline_layouts.push(PipelineLayoutDecl {
                    name,
                    desc: desc::PipelineLayoutDesc { bind_group_layouts },
                }),
                Err(e) => {
                    self.error(e);
                    self.module.pipeline_layouts.push(PipelineLayoutDecl {
                        name,
                        desc: desc::PipelineLayoutDesc {
                            bind_group_layouts: Vec::new(),
                        },
                    });
                }
            }
        }
    }

    /// `layout = auto` or a pipeline layout reference.
    fn pipeline_layout_ref(&self, decl: NodeId) -> Res<Option<u16>> {
        match self.prop(decl, "layout") {
            None => Ok(None),
            Some(v) => {
                if self.ast.node(v).tag == Tag::Ident && self.text(v) == "auto" {
                    Ok(None)
                } else {
                    Ok(Some(self.reference(v, MacroKind::PipelineLayout)?))
                }
            }
        }
    }

    fn entry_point(&self, owner: NodeId, module_id: u16, stage: &'static str) -> Res<String> {
        let entry = self.string(self.require(owner, "entryPoint")?, "entryPoint")?;
        let shader = &self.module.shaders[module_id as usize];
        if let Some(data) = self.cache.get(&shader.name) {
            if !data.has_entry_point(&entry) {
                // W005: the pipeline will not validate on a real backend
                return Err(ResolveError::UnknownValue {
                    what: stage,
                    value: entry,
                    span: self.span(owner),
                });
            }
        }
        Ok(entry)
    }

    fn lower_render_pipelines(&mut self) {
        for decl in self.decls_of(MacroKind::RenderPipeline) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["layout", "vertex", "fragment", "primitive", "depthStencil"]);
            match self.render_pipeline_decl(decl, &name) {
                Ok(p) => self.module.render_pipelines.push(p),
                Err(e) => {
                    self.error(e);
                    self.module.render_pipelines.push(RenderPipelineDecl {
                        name,
                        layout: None,
                        vertex_module: 0,
                        vertex_entry: String::new(),
                        vertex_buffers: Vec::new(),
                        fragment: None,
                        topology: PrimitiveTopology::TriangleList,
                        strip_index_format: None,
                        cull_mode: CullMode::None,
                        front_face: FrontFace::Ccw,
                        depth_stencil: None,
                    });
                }
            }
        }
    }

    fn render_pipeline_decl(&self, decl: NodeId, name: &str) -> Res<RenderPipelineDecl> {
        let layout = self.pipeline_layout_ref(decl)?;
        let vertex = self.require(decl, "vertex")?;
        let vertex_module = self.reference(self.require(vertex, "module")?, MacroKind::Wgsl)?;
        let vertex_entry = self.entry_point(vertex, vertex_module, "vertex entry point")?;
        let mut vertex_buffers = Vec::new();
        if let Some(buffers) = self.prop(vertex, "buffers") {
            for vb in self.array_items(buffers, "buffers")? {
                vertex_buffers.push(self.vertex_buffer_layout(vb)?);
            }
        }

        let fragment = match self.prop(decl, "fragment") {
            Some(frag) => {
                let module = self.reference(self.require(frag, "module")?, MacroKind::Wgsl)?;
                let entry = self.entry_point(frag, module, "fragment entry point")?;
                let mut targets = Vec::new();
                for t in self.array_items(self.require(frag, "targets")?, "targets")? {
                    targets.push(self.color_target(t)?);
                }
                Some(FragDecl { module, entry, targets })
            }
            None => None,
        };

        let mut topology = PrimitiveTopology::TriangleList;
        let mut strip_index_format = None;
        let mut cull_mode = CullMode::None;
        let mut front_face = FrontFace::Ccw;
        if let Some(prim) = self.prop(decl, "primitive") {
            if let Some(v) = self.prop(prim, "topology") {
                topology = self.enum_value(v, PrimitiveTopology::from_name, "topology")?;
            }
            if let Some(v) = self.prop(prim, "stripIndexFormat") {
                strip_index_format = Some(self.enum_value(v, IndexFormat::from_name, "index format")?);
            }
            if let Some(v) = self.prop(prim, "cullMode") {
                cull_mode = self.enum_value(v, CullMode::from_name, "cull mode")?;
            }
            if let Some(v) = self.prop(prim, "frontFace") {
                front_face = self.enum_value(v, FrontFace::from_name, "front face")?;
            }
        }

        let depth_stencil = match self.prop(decl, "depthStencil") {
            Some(ds) => {
                let format = self.enum_value(
                    self.require(ds, "format")?,
                    TextureFormat::from_name,
                    "texture format",
                )?;
                let depth_write_enabled = match self.prop(ds, "depthWriteEnabled") {
                    Some(v) => {
                        let t = self.ident(v, "depthWriteEnabled")?;
                        t == "true"
                    }
                    None => false,
                };
                let depth_compare = match self.prop(ds, "depthCompare") {
                    Some(v) => self.enum_value(v, CompareFunction::from_name, "compare function")?,
                    None => CompareFunction::Always,
                };
                Some(desc::DepthStencilState {
                    format,
                    depth_write_enabled,
                    depth_compare,
                })
            }
            None => None,
        };

        Ok(RenderPipelineDecl {
            name: name.to_owned(),
            layout,
            vertex_module,
            vertex_entry,
            vertex_buffers,
            fragment,
            topology,
            strip_index_format,
            cull_mode,
            front_face,
            depth_stencil,
        })
    }

    fn vertex_buffer_layout(&self, node: NodeId) -> Res<desc::VertexBufferLayout> {
        let array_stride = self.uint(self.require(node, "arrayStride")?, "arrayStride")?;
        let step_mode = match self.prop(node, "stepMode") {
            Some(v) => self.enum_value(v, VertexStepMode::from_name, "step mode")?,
            None => VertexStepMode::Vertex,
        };
        let mut attributes = Vec::new();
        for a in self.array_items(self.require(node, "attributes")?, "attributes")? {
            attributes.push(desc::VertexAttribute {
                format: self.enum_value(
                    self.require(a, "format")?,
                    VertexFormat::from_name,
                    "vertex format",
                )?,
                offset: self.uint(self.require(a, "offset")?, "offset")?,
                shader_location: self.uint(self.require(a, "shaderLocation")?, "shaderLocation")?,
            });
        }
        Ok(desc::VertexBufferLayout {
            array_stride,
            step_mode,
            attributes,
        })
    }

    fn color_target(&self, node: NodeId) -> Res<desc::ColorTarget> {
        let format = self.enum_value(
            self.require(node, "format")?,
            TextureFormat::from_name,
            "texture format",
        )?;
        let blend = match self.prop(node, "blend") {
            Some(b) => {
                let color = match self.prop(b, "color") {
                    Some(c) => self.blend_component(c)?,
                    None => desc::BlendComponent::default(),
                };
                let alpha = match self.prop(b, "alpha") {
                    Some(a) => self.blend_component(a)?,
                    None => desc::BlendComponent::default(),
                };
                Some(desc::BlendState { color, alpha })
            }
            None => None,
        };
        Ok(desc::ColorTarget { format, blend })
    }

    fn blend_component(&self, node: NodeId) -> Res<desc::BlendComponent> {
        let mut c = desc::BlendComponent::default();
        if let Some(v) = self.prop(node, "srcFactor") {
            c.src_factor = self.enum_value(v, BlendFactor::from_name, "blend factor")?;
        }
        if let Some(v) = self.prop(node, "dstFactor") {
            c.dst_factor = self.enum_value(v, BlendFactor::from_name, "blend factor")?;
        }
        if let Some(v) = self.prop(node, "operation") {
            c.operation = self.enum_value(v, BlendOperation::from_name, "blend operation")?;
        }
        Ok(c)
    }

    fn lower_compute_pipelines(&mut self) {
        for decl in self.decls_of(MacroKind::ComputePipeline) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["layout", "module", "entryPoint"]);
            let lowered = (|| -> Res<ComputePipelineDecl> {
                let layout = self.pipeline_layout_ref(decl)?;
                let module = self.reference(self.require(decl, "module")?, MacroKind::Wgsl)?;
                let entry = self.entry_point(decl, module, "compute entry point")?;
                Ok(ComputePipelineDecl {
                    name: name.clone(),
                    layout,
                    module,
                    entry,
                })
            })();
            match lowered {
                Ok(p) => self.module.compute_pipelines.push(p),
                Err(e) => {
                    self.error(e);
                    self.module.compute_pipelines.push(ComputePipelineDecl {
                        name,
                        layout: None,
                        module: 0,
                        entry: String::new(),
                    });
                }
            }
        }
    }

    fn lower_bind_groups(&mut self) {
        for decl in self.decls_of(MacroKind::BindGroup) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["layout", "pipeline", "group", "entries"]);
            match self.bind_group_decl(decl, &name) {
                Ok(b) => self.module.bind_groups.push(b),
                Err(e) => {
                    self.error(e);
                    self.module.bind_groups.push(BindGroupDecl {
                        name,
                        layout: desc::BindGroupLayoutRef::Explicit(0),
                        entries: Vec::new(),
                        explicit_group: None,
                        slot: None,
                        dynamic: false,
                    });
                }
            }
        }
    }

    fn bind_group_decl(&self, decl: NodeId, name: &str) -> Res<BindGroupDecl> {
        let explicit_group = match self.prop(decl, "group") {
            Some(v) => Some(self.uint(v, "group")?),
            None => None,
        };
        let layout = match (self.prop(decl, "layout"), self.prop(decl, "pipeline")) {
            (Some(l), None) => {
                desc::BindGroupLayoutRef::Explicit(self.reference(l, MacroKind::BindGroupLayout)?)
            }
            (None, Some(p)) => {
                let pname = self.ident(p, "pipeline")?;
                if let Some(id) = self.lookup(MacroKind::RenderPipeline, pname) {
                    desc::BindGroupLayoutRef::FromPipeline {
                        pipeline: id,
                        group: explicit_group.unwrap_or(0),
                        compute: false,
                    }
                } else if let Some(id) = self.lookup(MacroKind::ComputePipeline, pname) {
                    desc::BindGroupLayoutRef::FromPipeline {
                        pipeline: id,
                        group: explicit_group.unwrap_or(0),
                        compute: true,
                    }
                } else {
                    return Err(ResolveError::UnknownReference {
                        kind: "pipeline",
                        name: pname.to_owned(),
                        span: self.span(p),
                    });
                }
            }
            _ => {
                return Err(ResolveError::MissingProperty {
                    key: "layout (or pipeline)",
                    span: self.span(decl),
                });
            }
        };

        let mut entries = Vec::new();
        let mut dynamic = false;
        for item in self.array_items(self.require(decl, "entries")?, "entries")? {
            let binding = self.uint(self.require(item, "binding")?, "binding")?;
            let resource_node = self.require(item, "resource")?;
            let rname = self.ident(resource_node, "resource")?;
            let rspan = self.span(resource_node);

            let as_buffer = self.lookup(MacroKind::Buffer, rname);
            let as_sampler = self.lookup(MacroKind::Sampler, rname);
            let as_view = self.lookup(MacroKind::TextureView, rname);
            let matches = as_buffer.is_some() as u8 + as_sampler.is_some() as u8 + as_view.is_some() as u8;
            if matches > 1 {
                return Err(ResolveError::BadValue {
                    key: "resource".into(),
                    expected: "a name unique across buffers, samplers, and texture views",
                    span: rspan,
                });
            }

            let resource = if let Some(buffer) = as_buffer {
                let offset = match self.prop(item, "offset") {
                    Some(v) => self.uint(v, "offset")?,
                    None => 0,
                };
                let size = match self.prop(item, "size") {
                    Some(v) => Some(self.uint(v, "size")?),
                    None => None,
                };
                let pool_offset = match self.prop(item, "poolOffset") {
                    Some(v) => self.uint(v, "poolOffset")?,
                    None => 0,
                };
                let b = &self.module.buffers[buffer as usize];
                if pool_offset >= b.pool {
                    return Err(ResolveError::BadValue {
                        key: "poolOffset".into(),
                        expected: "an offset below the buffer's pool count",
                        span: rspan,
                    });
                }
                if pool_offset > 0 || b.pool > 1 {
                    dynamic = true;
                }
                desc::BindingResource::Buffer {
                    buffer,
                    offset,
                    size,
                    pool_offset,
                }
            } else if let Some(id) = as_sampler {
                desc::BindingResource::Sampler(id)
            } else if let Some(id) = as_view {
                desc::BindingResource::TextureView(id)
            } else {
                return Err(ResolveError::UnknownReference {
                    kind: "buffer, sampler, or textureView",
                    name: rname.to_owned(),
                    span: rspan,
                });
            };
            entries.push(desc::BindGroupEntry { binding, resource });
        }

        Ok(BindGroupDecl {
            name: name.to_owned(),
            layout,
            entries,
            explicit_group,
            slot: None,
            dynamic,
        })
    }

    fn lower_query_sets(&mut self) {
        for decl in self.decls_of(MacroKind::QuerySet) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["type", "count"]);
            let lowered = (|| -> Res<desc::QuerySetDesc> {
                Ok(desc::QuerySetDesc {
                    ty: self.enum_value(
                        self.require(decl, "type")?,
                        QueryType::from_name,
                        "query type",
                    )?,
                    count: self.uint(self.require(decl, "count")?, "count")?,
                })
            })();
            match lowered {
                Ok(d) => self.module.query_sets.push(QuerySetDecl { name, desc: d }),
                Err(e) => {
                    self.error(e);
                    self.module.query_sets.push(QuerySetDecl {
                        name,
                        desc: desc::QuerySetDesc {
                            ty: QueryType::Occlusion,
                            count: 0,
                        },
                    });
                }
            }
        }
    }

    fn lower_render_passes(&mut self) {
        for decl in self.decls_of(MacroKind::RenderPass) {
            let name = self.text(decl).to_owned();
            self.check_keys(
                decl,
                &[
                    "colorAttachments", "depthStencilAttachment", "pipeline", "bindGroups",
                    "vertexBuffers", "indexBuffer", "indexFormat", "draw", "drawIndexed",
                ],
            );
            match self.render_pass_decl(decl, &name) {
                Ok(p) => self.module.render_passes.push(p),
                Err(e) => {
                    self.error(e);
                    self.module.render_passes.push(RenderPassDecl {
                        name,
                        desc: desc::RenderPassDesc {
                            color_attachments: Vec::new(),
                            depth_stencil: None,
                        },
                        pipeline: 0,
                        bind_groups: Vec::new(),
                        vertex_buffers: Vec::new(),
                        index_buffer: None,
                        index_format: IndexFormat::Uint32,
                        draw: None,
                    });
                }
            }
        }
    }

    fn attachment_view(&self, node: NodeId) -> Res<desc::AttachmentView> {
        let name = self.ident(node, "view")?;
        if name == "canvas" {
            return Ok(desc::AttachmentView::Canvas);
        }
        Ok(desc::AttachmentView::View(
            self.reference(node, MacroKind::TextureView)?,
        ))
    }

    fn render_pass_decl(&self, decl: NodeId, name: &str) -> Res<RenderPassDecl> {
        let mut color_attachments = Vec::new();
        for item in self.array_items(self.require(decl, "colorAttachments")?, "colorAttachments")? {
            let view = self.attachment_view(self.require(item, "view")?)?;
            let load_op = match self.prop(item, "loadOp") {
                Some(v) => self.enum_value(v, LoadOp::from_name, "load op")?,
                None => LoadOp::Clear,
            };
            let store_op = match self.prop(item, "storeOp") {
                Some(v) => self.enum_value(v, StoreOp::from_name, "store op")?,
                None => StoreOp::Store,
            };
            let clear_value = match self.prop(item, "clearValue") {
                Some(v) => {
                    let items = self.array_items(v, "clearValue")?;
                    if items.len() != 4 {
                        return Err(ResolveError::BadValue {
                            key: "clearValue".into(),
                            expected: "[r g b a]",
                            span: self.span(v),
                        });
                    }
                    let mut out = [0.0f32; 4];
                    for (slot, item) in out.iter_mut().zip(items) {
                        *slot = self.float(item, "clearValue")?;
                    }
                    out
                }
                None => [0.0; 4],
            };
            color_attachments.push(desc::ColorAttachment {
                view,
                load_op,
                store_op,
                clear_value,
            });
        }

        let depth_stencil = match self.prop(decl, "depthStencilAttachment") {
            Some(ds) => {
                let view = self.attachment_view(self.require(ds, "view")?)?;
                let depth_load_op = match self.prop(ds, "depthLoadOp") {
                    Some(v) => self.enum_value(v, LoadOp::from_name, "load op")?,
                    None => LoadOp::Clear,
                };
                let depth_store_op = match self.prop(ds, "depthStoreOp") {
                    Some(v) => self.enum_value(v, StoreOp::from_name, "store op")?,
                    None => StoreOp::Store,
                };
                let depth_clear_value = match self.prop(ds, "depthClearValue") {
                    Some(v) => self.float(v, "depthClearValue")?,
                    None => 1.0,
                };
                Some(desc::DepthStencilAttachment {
                    view,
                    depth_load_op,
                    depth_store_op,
                    depth_clear_value,
                })
            }
            None => None,
        };

        let pipeline = self.reference(self.require(decl, "pipeline")?, MacroKind::RenderPipeline)?;

        let mut bind_groups = Vec::new();
        if let Some(v) = self.prop(decl, "bindGroups") {
            for item in self.array_items(v, "bindGroups")? {
                bind_groups.push(self.reference(item, MacroKind::BindGroup)?);
            }
        }
        let mut vertex_buffers = Vec::new();
        if let Some(v) = self.prop(decl, "vertexBuffers") {
            for item in self.array_items(v, "vertexBuffers")? {
                vertex_buffers.push(self.reference(item, MacroKind::Buffer)?);
            }
        }
        let index_buffer = match self.prop(decl, "indexBuffer") {
            Some(v) => Some(self.reference(v, MacroKind::Buffer)?),
            None => None,
        };
        let index_format = match self.prop(decl, "indexFormat") {
            Some(v) => self.enum_value(v, IndexFormat::from_name, "index format")?,
            None => IndexFormat::Uint32,
        };

        let draw = self.draw_cmd(decl)?;
        Ok(RenderPassDecl {
            name: name.to_owned(),
            desc: desc::RenderPassDesc {
                color_attachments,
                depth_stencil,
            },
            pipeline,
            bind_groups,
            vertex_buffers,
            index_buffer,
            index_format,
            draw,
        })
    }

    fn draw_cmd(&self, decl: NodeId) -> Res<Option<DrawCmd>> {
        if let Some(v) = self.prop(decl, "draw") {
            return Ok(Some(match self.ast.node(v).tag {
                Tag::Int(_) => DrawCmd::Draw {
                    vertices: self.uint(v, "draw")?,
                    instances: 1,
                    first_vertex: 0,
                    first_instance: 0,
                },
                Tag::Array => {
                    let items = self.array_items(v, "draw")?;
                    if items.len() != 4 {
                        return Err(ResolveError::BadValue {
                            key: "draw".into(),
                            expected: "a count or [vertices instances firstVertex firstInstance]",
                            span: self.span(v),
                        });
                    }
                    DrawCmd::Draw {
                        vertices: self.uint(items[0], "draw")?,
                        instances: self.uint(items[1], "draw")?,
                        first_vertex: self.uint(items[2], "draw")?,
                        first_instance: self.uint(items[3], "draw")?,
                    }
                }
                _ => {
                    return Err(ResolveError::BadValue {
                        key: "draw".into(),
                        expected: "a count or [vertices instances firstVertex firstInstance]",
                        span: self.span(v),
                    });
                }
            }));
        }
        if let Some(v) = self.prop(decl, "drawIndexed") {
            let cmd = match self.ast.node(v).tag {
                Tag::Int(_) => DrawCmd::DrawIndexed {
                    indices: self.uint(v, "drawIndexed")?,
                    instances: 1,
                    first_index: 0,
                    base_vertex: 0,
                    first_instance: 0,
                },
                Tag::Array => {
                    let items = self.array_items(v, "drawIndexed")?;
                    if items.len() != 5 {
                        return Err(ResolveError::BadValue {
                            key: "drawIndexed".into(),
                            expected: "a count or [indices instances firstIndex baseVertex firstInstance]",
                            span: self.span(v),
                        });
                    }
                    let base = self.int(items[3], "drawIndexed")?;
                    DrawCmd::DrawIndexed {
                        indices: self.uint(items[0], "drawIndexed")?,
                        instances: self.uint(items[1], "drawIndexed")?,
                        first_index: self.uint(items[2], "drawIndexed")?,
                        base_vertex: i32::try_from(base).map_err(|_| ResolveError::BadValue {
                            key: "drawIndexed".into(),
                            expected: "an i32 base vertex",
                            span: self.span(items[3]),
                        })?,
                        first_instance: self.uint(items[4], "drawIndexed")?,
                    }
                }
                _ => {
                    return Err(ResolveError::BadValue {
                        key: "drawIndexed".into(),
                        expected: "a count or an argument array",
                        span: self.span(v),
                    });
                }
            };
            return Ok(Some(cmd));
        }
        Ok(None)
    }

    fn lower_compute_passes(&mut self) {
        for decl in self.decls_of(MacroKind::ComputePass) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["pipeline", "bindGroups", "dispatch"]);
            let lowered = (|| -> Res<ComputePassDecl> {
                let pipeline =
                    self.reference(self.require(decl, "pipeline")?, MacroKind::ComputePipeline)?;
                let mut bind_groups = Vec::new();
                if let Some(v) = self.prop(decl, "bindGroups") {
                    for item in self.array_items(v, "bindGroups")? {
                        bind_groups.push(self.reference(item, MacroKind::BindGroup)?);
                    }
                }
                let dispatch = match self.prop(decl, "dispatch") {
                    Some(v) => match self.ast.node(v).tag {
                        Tag::Int(_) => [self.uint(v, "dispatch")?, 1, 1],
                        Tag::Array => {
                            let items = self.array_items(v, "dispatch")?;
                            if items.is_empty() || items.len() > 3 {
                                return Err(ResolveError::BadValue {
                                    key: "dispatch".into(),
                                    expected: "[x], [x y], or [x y z]",
                                    span: self.span(v),
                                });
                            }
                            let mut out = [1u32; 3];
                            for (slot, item) in out.iter_mut().zip(items) {
                                *slot = self.uint(item, "dispatch")?;
                            }
                            out
                        }
                        _ => {
                            return Err(ResolveError::BadValue {
                                key: "dispatch".into(),
                                expected: "a count or [x y z]",
                                span: self.span(v),
                            });
                        }
                    },
                    None => [1, 1, 1],
                };
                Ok(ComputePassDecl {
                    name: name.clone(),
                    pipeline,
                    bind_groups,
                    dispatch,
                })
            })();
            match lowered {
                Ok(p) => self.module.compute_passes.push(p),
                Err(e) => {
                    self.error(e);
                    self.module.compute_passes.push(ComputePassDecl {
                        name,
                        pipeline: 0,
                        bind_groups: Vec::new(),
                        dispatch: [1, 1, 1],
                    });
                }
            }
        }
    }

    fn lower_queues(&mut self) {
        for decl in self.decls_of(MacroKind::Queue) {
            let name = self.text(decl).to_owned();
            self.check_keys(decl, &["writeBuffer"]);
            let lowered = (|| -> Res<Vec<QueueWrite>> {
                let mut writes = Vec::new();
                for item in self.array_items(self.require(decl, "writeBuffer")?, "writeBuffer")? {
                    let buffer = self.reference(self.require(item, "buffer")?, MacroKind::Buffer)?;
                    let data = self.reference(self.require(item, "data")?, MacroKind::Data)?;
                    let offset = match self.prop(item, "offset") {
                        Some(v) => self.uint(v, "offset")?,
                        None => 0,
                    };
                    let blen = self.module.datas[data as usize].bytes.len() as u32;
                    let bsize = self.module.buffers[buffer as usize].size;
                    if offset + blen > bsize {
                        return Err(ResolveError::BadValue {
                            key: "writeBuffer".into(),
                            expected: "a write within the buffer's size",
                            span: self.span(item),
                        });
                    }
                    writes.push(QueueWrite { buffer, offset, data });
                }
                Ok(writes)
            })();
            match lowered {
                Ok(writes) => self.module.queues.push(QueueDecl { name, writes }),
                Err(e) => {
                    self.error(e);
                    self.module.queues.push(QueueDecl {
                        name,
                        writes: Vec::new(),
                    });
                }
            }
        }
    }

    fn lower_frames(&mut self) {
        // #init and #frame share a shape; #init bodies run once at load
        for (kind, init) in [(MacroKind::Init, true), (MacroKind::Frame, false)] {
            for decl in self.decls_of(kind) {
                let name = self.text(decl).to_owned();
                self.check_keys(decl, &["passes"]);
                let lowered = (|| -> Res<Vec<FrameItem>> {
                    let mut items = Vec::new();
                    for item in self.array_items(self.require(decl, "passes")?, "passes")? {
                        let pname = self.ident(item, "passes")?;
                        let as_render = self.lookup(MacroKind::RenderPass, pname);
                        let as_compute = self.lookup(MacroKind::ComputePass, pname);
                        let as_queue = self.lookup(MacroKind::Queue, pname);
                        let matches = as_render.is_some() as u8
                            + as_compute.is_some() as u8
                            + as_queue.is_some() as u8;
                        if matches > 1 {
                            return Err(ResolveError::BadValue {
                                key: "passes".into(),
                                expected: "a name unique across passes and queues",
                                span: self.span(item),
                            });
                        }
                        items.push(if let Some(id) = as_render {
                            FrameItem::Render(id)
                        } else if let Some(id) = as_compute {
                            FrameItem::Compute(id)
                        } else if let Some(id) = as_queue {
                            FrameItem::Queue(id)
                        } else {
                            return Err(ResolveError::UnknownReference {
                                kind: "renderPass, computePass, or queue",
                                name: pname.to_owned(),
                                span: self.span(item),
                            });
                        });
                    }
                    Ok(items)
                })();
                match lowered {
                    Ok(items) => self.module.frames.push(FrameDecl { name, init, items }),
                    Err(e) => {
                        self.error(e);
                        self.module.frames.push(FrameDecl {
                            name,
                            init,
                            items: Vec::new(),
                        });
                    }
                }
            }
        }
    }

    /// A bind group's group index defaults to its position in the first
    /// `bindGroups = [...]` list that uses it.
    fn infer_bind_group_slots(&mut self) {
        let mut uses: Vec<(u16, u32)> = Vec::new();
        for pass in &self.module.render_passes {
            for (i, &bg) in pass.bind_groups.iter().enumerate() {
                uses.push((bg, i as u32));
            }
        }
        for pass in &self.module.compute_passes {
            for (i, &bg) in pass.bind_groups.iter().enumerate() {
                uses.push((bg, i as u32));
            }
        }
        for (bg, slot) in uses {
            let decl = &mut self.module.bind_groups[bg as usize];
            if decl.slot.is_none() {
                decl.slot = Some(slot);
            }
        }
    }

    /// Join bind-group buffer entries against shader reflection to find
    /// the uniform bindings that go into the uniform table.
    fn join_uniform_bindings(&mut self) {
        struct PassShaders<'m> {
            bind_groups: &'m [u16],
            shaders: Vec<u16>,
        }
        let mut passes: Vec<PassShaders> = Vec::new();
        for pass in &self.module.render_passes {
            let pipe = &self.module.render_pipelines[pass.pipeline as usize];
            let mut shaders = vec![pipe.vertex_module];
            if let Some(frag) = &pipe.fragment {
                if !shaders.contains(&frag.module) {
                    shaders.push(frag.module);
                }
            }
            passes.push(PassShaders {
                bind_groups: &pass.bind_groups,
                shaders,
            });
        }
        for pass in &self.module.compute_passes {
            let pipe = &self.module.compute_pipelines[pass.pipeline as usize];
            passes.push(PassShaders {
                bind_groups: &pass.bind_groups,
                shaders: vec![pipe.module],
            });
        }

        let mut out: Vec<UniformBindingInfo> = Vec::new();
        let mut too_small: Vec<String> = Vec::new();
        for pass in &passes {
            for (slot, &bg) in pass.bind_groups.iter().enumerate() {
                let bg_decl = &self.module.bind_groups[bg as usize];
                let group = bg_decl.explicit_group.unwrap_or(slot as u32);
                for entry in &bg_decl.entries {
                    let desc::BindingResource::Buffer { buffer, .. } = entry.resource else {
                        continue;
                    };
                    for &shader in &pass.shaders {
                        let shader_name = &self.module.shaders[shader as usize].name;
                        let Some(data) = self.cache.get(shader_name) else {
                            continue;
                        };
                        let Some(b) = data.binding_at(group, entry.binding) else {
                            continue;
                        };
                        let seen = out.iter().any(|u| {
                            u.buffer == buffer && u.group == group && u.binding == entry.binding
                        });
                        if !seen {
                            let buf = &self.module.buffers[buffer as usize];
                            if b.size > buf.size {
                                too_small.push(format!(
                                    "buffer `{}` ({} bytes) is smaller than uniform struct `{}` ({} bytes)",
                                    buf.name, buf.size, b.var_name, b.size
                                ));
                            } else {
                                out.push(UniformBindingInfo {
                                    buffer,
                                    var_name: b.var_name.clone(),
                                    group,
                                    binding: entry.binding,
                                    fields: b.fields.clone(),
                                });
                            }
                        }
                        break;
                    }
                }
            }
        }
        drop(passes);
        for message in too_small {
            let d = self.diag(Severity::Error, "E-RESOLVE", message, None);
            self.errors.push(d);
        }
        self.module.uniform_bindings = out;
    }

    /// W009: a buffer addressed by the uniform table that is also the
    /// target of explicit writes can race setUniform at the same offsets.
    fn check_uniform_write_conflicts(&mut self) {
        let mut written: Vec<u16> = Vec::new();
        for (i, buffer) in self.module.buffers.iter().enumerate() {
            if buffer.data.is_some() {
                written.push(i as u16);
            }
        }
        for queue in &self.module.queues {
            for w in &queue.writes {
                written.push(w.buffer);
            }
        }
        let conflicts: Vec<String> = self
            .module
            .uniform_bindings
            .iter()
            .filter(|u| written.contains(&u.buffer))
            .map(|u| self.module.buffers[u.buffer as usize].name.clone())
            .collect();
        for name in conflicts {
            self.warn(
                "W009",
                format!("buffer `{name}` is written by write_buffer and by setUniform"),
                None,
            );
        }
    }
}

/// Whole-word textual substitution of `#define` bindings into WGSL.
fn substitute_defines(code: &str, defines: &[(String, String)]) -> String {
    let mut out = code.to_owned();
    for (name, value) in defines {
        let mut result = String::with_capacity(out.len());
        let bytes = out.as_bytes();
        let mut i = 0;
        while let Some(pos) = out[i..].find(name.as_str()) {
            let start = i + pos;
            let end = start + name.len();
            let left_ok = start == 0 || !is_word(bytes[start - 1]);
            let right_ok = end >= bytes.len() || !is_word(bytes[end]);
            result.push_str(&out[i..start]);
            if left_ok && right_ok {
                result.push_str(value);
            } else {
                result.push_str(name);
            }
            i = end;
        }
        result.push_str(&out[i..]);
        out = result;
    }
    out
}

#[inline]
fn is_word(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::lex;
    use crate::compiler::parser::parse;
    use crate::compiler::reflect::NagaReflector;

    fn analyze_src(src: &str) -> Result<Analysis, Vec<Diagnostic>> {
        let ts = lex(src).unwrap();
        let (ast, errors) = parse(src, &ts);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        analyze(src, &ast, &NagaReflector)
    }

    #[test]
    fn substitution_is_whole_word() {
        let defines = vec![("N".to_owned(), "64".to_owned())];
        assert_eq!(substitute_defines("let x = N;", &defines), "let x = 64;");
        assert_eq!(substitute_defines("let xN = NN;", &defines), "let xN = NN;");
    }

    #[test]
    fn duplicate_names_per_kind_are_errors() {
        let src = "#data d { u8=[1] } #data d { u8=[2] }";
        let err = analyze_src(src).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("duplicate")));
    }

    #[test]
    fn same_name_across_kinds_is_fine() {
        let src = "#data shared { u8=[1] } #queue shared { writeBuffer=[] }";
        assert!(analyze_src(src).is_ok());
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let src = r#"
#buffer b { size=16 usage=[UNIFORM] data=missing }
"#;
        let err = analyze_src(src).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("unknown data `missing`")));
    }

    #[test]
    fn unknown_enum_value_is_fatal() {
        let src = r#"
#texture t { width=4 height=4 format=rgba99unorm usage=[TEXTURE_BINDING] }
"#;
        let err = analyze_src(src).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("rgba99unorm")));
    }

    #[test]
    fn buffer_size_from_reflection() {
        let src = r#"
#wgsl sim {
    code="""
struct Params { time: f32, speed: f32 }
@group(0) @binding(0) var<uniform> params: Params;
@compute @workgroup_size(1) fn main() {}
"""
}
#buffer uniforms { size=sim.params usage=[UNIFORM COPY_DST] }
"#;
        let analysis = analyze_src(src).unwrap();
        assert_eq!(analysis.module.buffers[0].size, 8);
    }

    #[test]
    fn empty_shader_is_a_reflection_warning() {
        let src = r#"#wgsl empty { code="" }"#;
        let analysis = analyze_src(src).unwrap();
        assert!(analysis.warnings.iter().any(|w| w.code == "W-REFLECT"));
    }

    #[test]
    fn reflection_failure_is_warning_until_size_is_needed() {
        let src = r#"
#wgsl broken { code="not wgsl $$$" }
"#;
        let analysis = analyze_src(src).unwrap();
        assert!(analysis.warnings.iter().any(|w| w.code == "W-REFLECT"));

        let src2 = r#"
#wgsl broken { code="not wgsl $$$" }
#buffer b { size=broken.params usage=[UNIFORM] }
"#;
        let err = analyze_src(src2).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("reflection unavailable")));
    }

    #[test]
    fn define_substitutes_into_wgsl_before_reflection() {
        let src = r#"
#define COUNT 4
#wgsl sim {
    code="""
struct P { values: vec4f }
@group(0) @binding(0) var<uniform> p: P;
@compute @workgroup_size(COUNT) fn main() {}
"""
}
"#;
        let analysis = analyze_src(src).unwrap();
        assert!(analysis.module.shaders[0].code.contains("@workgroup_size(4)"));
        assert!(!analysis.module.shaders[0].code.contains("COUNT"));
    }

    #[test]
    fn pool_offset_must_stay_below_pool() {
        let src = r#"
#buffer particles { size=64 usage=[STORAGE] pool=2 }
#bindGroupLayout l { entries=[{ binding=0 visibility=[COMPUTE] type=storage }] }
#bindGroup bad { layout=l entries=[{ binding=0 resource=particles poolOffset=5 }] }
"#;
        let err = analyze_src(src).unwrap_err();
        assert!(err.iter().any(|d| d.message.contains("pool")));
    }

    #[test]
    fn dynamic_flag_set_for_pool_buffers() {
        let src = r#"
#buffer particles { size=64 usage=[STORAGE] pool=2 }
#bindGroupLayout l { entries=[{ binding=0 visibility=[COMPUTE] type=storage }] }
#bindGroup read { layout=l entries=[{ binding=0 resource=particles poolOffset=0 }] }
"#;
        let analysis = analyze_src(src).unwrap();
        assert!(analysis.module.bind_groups[0].dynamic);
    }
}

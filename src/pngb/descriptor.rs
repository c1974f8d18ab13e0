// src/pngb/descriptor.rs
// Self-describing typed-field records for WebGPU-shaped descriptors.
//
// Wire shape: [field_count:u8] ([tag:u8] [value...])*
// The value width is fixed by the tag (u8 enum code, u16 id, u32, f32,
// a u16 id list, a nested record, or a list of nested records). Fields
// at their default value are omitted by the encoder; decoders fill
// defaults back in. Unknown tags are a hard error: the header version
// gates format evolution, not per-field skipping.

use super::enums::*;

// ---------------- encode side ----------------

/// Record under construction. Fields must be pushed in ascending tag
/// order so that encoding is deterministic (round-trip exactness).
pub(crate) struct Rec {
    count: u8,
    body: Vec<u8>,
}

impl Rec {
    pub fn new() -> Self {
        Rec { count: 0, body: Vec::new() }
    }

    fn tag(&mut self, tag: u8) {
        self.count = self.count.checked_add(1).expect("descriptor field overflow");
        self.body.push(tag);
    }

    pub fn u8(&mut self, tag: u8, v: u8) {
        self.tag(tag);
        self.body.push(v);
    }

    pub fn u16(&mut self, tag: u8, v: u16) {
        self.tag(tag);
        self.body.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, tag: u8, v: u32) {
        self.tag(tag);
        self.body.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, tag: u8, v: f32) {
        self.tag(tag);
        self.body.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    pub fn u16_list(&mut self, tag: u8, items: &[u16]) {
        assert!(items.len() <= u8::MAX as usize, "id list too long");
        self.tag(tag);
        self.body.push(items.len() as u8);
        for v in items {
            self.body.extend_from_slice(&v.to_le_bytes());
        }
    }

    pub fn rec(&mut self, tag: u8, nested: Vec<u8>) {
        self.tag(tag);
        self.body.extend_from_slice(&nested);
    }

    pub fn list(&mut self, tag: u8, items: Vec<Vec<u8>>) {
        assert!(items.len() <= u8::MAX as usize, "record list too long");
        self.tag(tag);
        self.body.push(items.len() as u8);
        for item in items {
            self.body.extend_from_slice(&item);
        }
    }

    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.body.len());
        out.push(self.count);
        out.extend_from_slice(&self.body);
        out
    }
}

// ---------------- decode side ----------------

struct Rd<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Rd<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Rd { buf, pos: 0 }
    }

    fn u8(&mut self) -> Result<u8, String> {
        let v = *self.buf.get(self.pos).ok_or("truncated descriptor")?;
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self) -> Result<u16, String> {
        let a = self.u8()?;
        let b = self.u8()?;
        Ok(u16::from_le_bytes([a, b]))
    }

    fn u32(&mut self) -> Result<u32, String> {
        let mut le = [0u8; 4];
        for b in &mut le {
            *b = self.u8()?;
        }
        Ok(u32::from_le_bytes(le))
    }

    fn f32(&mut self) -> Result<f32, String> {
        Ok(f32::from_bits(self.u32()?))
    }

    fn u16_list(&mut self) -> Result<Vec<u16>, String> {
        let n = self.u8()? as usize;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.u16()?);
        }
        Ok(out)
    }

    fn done(&self) -> Result<(), String> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(format!("{} trailing bytes after descriptor", self.buf.len() - self.pos))
        }
    }
}

fn enum_code<T>(parse: impl Fn(u8) -> Option<T>, code: u8, what: &str) -> Result<T, String> {
    parse(code).ok_or_else(|| format!("bad {what} code {code}"))
}

// ---------------- texture ----------------

mod tex {
    pub const WIDTH: u8 = 0;
    pub const HEIGHT: u8 = 1;
    pub const DEPTH: u8 = 2;
    pub const MIPS: u8 = 3;
    pub const SAMPLES: u8 = 4;
    pub const DIMENSION: u8 = 5;
    pub const FORMAT: u8 = 6;
    pub const USAGE: u8 = 7;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsages,
}

impl TextureDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        r.u32(tex::WIDTH, self.width);
        r.u32(tex::HEIGHT, self.height);
        if self.depth_or_array_layers != 1 {
            r.u32(tex::DEPTH, self.depth_or_array_layers);
        }
        if self.mip_level_count != 1 {
            r.u32(tex::MIPS, self.mip_level_count);
        }
        if self.sample_count != 1 {
            r.u32(tex::SAMPLES, self.sample_count);
        }
        if self.dimension != TextureDimension::D2 {
            r.u8(tex::DIMENSION, self.dimension.code());
        }
        r.u8(tex::FORMAT, self.format.code());
        r.u32(tex::USAGE, self.usage.bits());
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = TextureDesc {
            width: 0,
            height: 0,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::empty(),
        };
        let mut have_format = false;
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                tex::WIDTH => out.width = rd.u32()?,
                tex::HEIGHT => out.height = rd.u32()?,
                tex::DEPTH => out.depth_or_array_layers = rd.u32()?,
                tex::MIPS => out.mip_level_count = rd.u32()?,
                tex::SAMPLES => out.sample_count = rd.u32()?,
                tex::DIMENSION => {
                    out.dimension = enum_code(TextureDimension::from_code, rd.u8()?, "dimension")?
                }
                tex::FORMAT => {
                    out.format = enum_code(TextureFormat::from_code, rd.u8()?, "texture format")?;
                    have_format = true;
                }
                tex::USAGE => {
                    out.usage = TextureUsages::from_bits(rd.u32()?)
                        .ok_or("bad texture usage bits")?
                }
                t => return Err(format!("unknown texture field {t}")),
            }
        }
        rd.done()?;
        if out.width == 0 || out.height == 0 || !have_format {
            return Err("texture requires width, height, format".into());
        }
        Ok(out)
    }
}

// ---------------- sampler ----------------

mod smp {
    pub const ADDR_U: u8 = 0;
    pub const ADDR_V: u8 = 1;
    pub const ADDR_W: u8 = 2;
    pub const MAG: u8 = 3;
    pub const MIN: u8 = 4;
    pub const MIPMAP: u8 = 5;
    pub const LOD_MIN: u8 = 6;
    pub const LOD_MAX: u8 = 7;
    pub const COMPARE: u8 = 8;
    pub const ANISOTROPY: u8 = 9;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub mag_filter: FilterMode,
    pub min_filter: FilterMode,
    pub mipmap_filter: FilterMode,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
    pub compare: Option<CompareFunction>,
    pub max_anisotropy: u16,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        SamplerDesc {
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 32.0,
            compare: None,
            max_anisotropy: 1,
        }
    }
}

impl SamplerDesc {
    pub fn encode(&self) -> Vec<u8> {
        let d = SamplerDesc::default();
        let mut r = Rec::new();
        if self.address_mode_u != d.address_mode_u {
            r.u8(smp::ADDR_U, self.address_mode_u.code());
        }
        if self.address_mode_v != d.address_mode_v {
            r.u8(smp::ADDR_V, self.address_mode_v.code());
        }
        if self.address_mode_w != d.address_mode_w {
            r.u8(smp::ADDR_W, self.address_mode_w.code());
        }
        if self.mag_filter != d.mag_filter {
            r.u8(smp::MAG, self.mag_filter.code());
        }
        if self.min_filter != d.min_filter {
            r.u8(smp::MIN, self.min_filter.code());
        }
        if self.mipmap_filter != d.mipmap_filter {
            r.u8(smp::MIPMAP, self.mipmap_filter.code());
        }
        if self.lod_min_clamp != d.lod_min_clamp {
            r.f32(smp::LOD_MIN, self.lod_min_clamp);
        }
        if self.lod_max_clamp != d.lod_max_clamp {
            r.f32(smp::LOD_MAX, self.lod_max_clamp);
        }
        if let Some(c) = self.compare {
            r.u8(smp::COMPARE, c.code());
        }
        if self.max_anisotropy != d.max_anisotropy {
            r.u16(smp::ANISOTROPY, self.max_anisotropy);
        }
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = SamplerDesc::default();
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                smp::ADDR_U => out.address_mode_u = enum_code(AddressMode::from_code, rd.u8()?, "address mode")?,
                smp::ADDR_V => out.address_mode_v = enum_code(AddressMode::from_code, rd.u8()?, "address mode")?,
                smp::ADDR_W => out.address_mode_w = enum_code(AddressMode::from_code, rd.u8()?, "address mode")?,
                smp::MAG => out.mag_filter = enum_code(FilterMode::from_code, rd.u8()?, "filter")?,
                smp::MIN => out.min_filter = enum_code(FilterMode::from_code, rd.u8()?, "filter")?,
                smp::MIPMAP => out.mipmap_filter = enum_code(FilterMode::from_code, rd.u8()?, "filter")?,
                smp::LOD_MIN => out.lod_min_clamp = rd.f32()?,
                smp::LOD_MAX => out.lod_max_clamp = rd.f32()?,
                smp::COMPARE => {
                    out.compare = Some(enum_code(CompareFunction::from_code, rd.u8()?, "compare")?)
                }
                smp::ANISOTROPY => out.max_anisotropy = rd.u16()?,
                t => return Err(format!("unknown sampler field {t}")),
            }
        }
        rd.done()?;
        Ok(out)
    }
}

// ---------------- bind group layout ----------------

mod bgl {
    pub const ENTRIES: u8 = 0;
    // entry record
    pub const BINDING: u8 = 0;
    pub const VISIBILITY: u8 = 1;
    pub const TYPE: u8 = 2;
    pub const FORMAT: u8 = 3;
    pub const VIEW_DIM: u8 = 4;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BglEntry {
    pub binding: u32,
    pub visibility: ShaderStages,
    pub ty: BindingType,
    /// Storage texture format, when `ty` is `StorageTexture`.
    pub format: Option<TextureFormat>,
    pub view_dimension: Option<TextureViewDimension>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindGroupLayoutDesc {
    pub entries: Vec<BglEntry>,
}

impl BindGroupLayoutDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        let items = self
            .entries
            .iter()
            .map(|e| {
                let mut er = Rec::new();
                er.u32(bgl::BINDING, e.binding);
                er.u32(bgl::VISIBILITY, e.visibility.bits());
                er.u8(bgl::TYPE, e.ty.code());
                if let Some(f) = e.format {
                    er.u8(bgl::FORMAT, f.code());
                }
                if let Some(d) = e.view_dimension {
                    er.u8(bgl::VIEW_DIM, d.code());
                }
                er.finish()
            })
            .collect();
        r.list(bgl::ENTRIES, items);
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = BindGroupLayoutDesc { entries: Vec::new() };
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                bgl::ENTRIES => {
                    let count = rd.u8()? as usize;
                    for _ in 0..count {
                        out.entries.push(decode_bgl_entry(&mut rd)?);
                    }
                }
                t => return Err(format!("unknown bind group layout field {t}")),
            }
        }
        rd.done()?;
        Ok(out)
    }
}

fn decode_bgl_entry(rd: &mut Rd) -> Result<BglEntry, String> {
    let mut e = BglEntry {
        binding: 0,
        visibility: ShaderStages::empty(),
        ty: BindingType::Uniform,
        format: None,
        view_dimension: None,
    };
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            bgl::BINDING => e.binding = rd.u32()?,
            bgl::VISIBILITY => {
                e.visibility = ShaderStages::from_bits(rd.u32()?).ok_or("bad visibility bits")?
            }
            bgl::TYPE => e.ty = enum_code(BindingType::from_code, rd.u8()?, "binding type")?,
            bgl::FORMAT => e.format = Some(enum_code(TextureFormat::from_code, rd.u8()?, "format")?),
            bgl::VIEW_DIM => {
                e.view_dimension =
                    Some(enum_code(TextureViewDimension::from_code, rd.u8()?, "view dimension")?)
            }
            t => return Err(format!("unknown bind group layout entry field {t}")),
        }
    }
    Ok(e)
}

// ---------------- pipeline layout ----------------

mod pl {
    pub const BGLS: u8 = 0;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineLayoutDesc {
    pub bind_group_layouts: Vec<u16>,
}

impl PipelineLayoutDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        r.u16_list(pl::BGLS, &self.bind_group_layouts);
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = PipelineLayoutDesc { bind_group_layouts: Vec::new() };
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                pl::BGLS => out.bind_group_layouts = rd.u16_list()?,
                t => return Err(format!("unknown pipeline layout field {t}")),
            }
        }
        rd.done()?;
        Ok(out)
    }
}

// ---------------- render pipeline ----------------

mod rp {
    pub const LAYOUT: u8 = 0;
    pub const VERTEX_MODULE: u8 = 1;
    pub const VERTEX_ENTRY: u8 = 2;
    pub const VERTEX_BUFFERS: u8 = 3;
    pub const FRAG_MODULE: u8 = 4;
    pub const FRAG_ENTRY: u8 = 5;
    pub const TARGETS: u8 = 6;
    pub const TOPOLOGY: u8 = 7;
    pub const STRIP_INDEX: u8 = 8;
    pub const CULL_MODE: u8 = 9;
    pub const FRONT_FACE: u8 = 10;
    pub const DEPTH_STENCIL: u8 = 11;

    // vertex buffer record
    pub const VB_STRIDE: u8 = 0;
    pub const VB_STEP: u8 = 1;
    pub const VB_ATTRS: u8 = 2;
    // attribute record
    pub const AT_FORMAT: u8 = 0;
    pub const AT_OFFSET: u8 = 1;
    pub const AT_LOCATION: u8 = 2;
    // color target record
    pub const CT_FORMAT: u8 = 0;
    pub const CT_BLEND: u8 = 1;
    // blend state record
    pub const BL_COLOR: u8 = 0;
    pub const BL_ALPHA: u8 = 1;
    // blend component record
    pub const BC_SRC: u8 = 0;
    pub const BC_DST: u8 = 1;
    pub const BC_OP: u8 = 2;
    // depth stencil record
    pub const DS_FORMAT: u8 = 0;
    pub const DS_WRITE: u8 = 1;
    pub const DS_COMPARE: u8 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u32,
    pub shader_location: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VertexBufferLayout {
    pub array_stride: u32,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorTarget {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentState {
    pub module: u16,
    /// String id of the entry point name.
    pub entry_point: u16,
    pub targets: Vec<ColorTarget>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPipelineDesc {
    /// `None` means auto layout.
    pub layout: Option<u16>,
    pub vertex_module: u16,
    pub vertex_entry: u16,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub fragment: Option<FragmentState>,
    pub topology: PrimitiveTopology,
    pub strip_index_format: Option<IndexFormat>,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub depth_stencil: Option<DepthStencilState>,
}

fn encode_blend_component(c: &BlendComponent) -> Vec<u8> {
    let mut r = Rec::new();
    r.u8(rp::BC_SRC, c.src_factor.code());
    r.u8(rp::BC_DST, c.dst_factor.code());
    r.u8(rp::BC_OP, c.operation.code());
    r.finish()
}

fn decode_blend_component(rd: &mut Rd) -> Result<BlendComponent, String> {
    let mut c = BlendComponent::default();
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            rp::BC_SRC => c.src_factor = enum_code(BlendFactor::from_code, rd.u8()?, "blend factor")?,
            rp::BC_DST => c.dst_factor = enum_code(BlendFactor::from_code, rd.u8()?, "blend factor")?,
            rp::BC_OP => c.operation = enum_code(BlendOperation::from_code, rd.u8()?, "blend op")?,
            t => return Err(format!("unknown blend component field {t}")),
        }
    }
    Ok(c)
}

impl RenderPipelineDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        if let Some(layout) = self.layout {
            r.u16(rp::LAYOUT, layout);
        }
        r.u16(rp::VERTEX_MODULE, self.vertex_module);
        r.u16(rp::VERTEX_ENTRY, self.vertex_entry);
        if !self.vertex_buffers.is_empty() {
            let items = self
                .vertex_buffers
                .iter()
                .map(|vb| {
                    let mut vr = Rec::new();
                    vr.u32(rp::VB_STRIDE, vb.array_stride);
                    if vb.step_mode != VertexStepMode::Vertex {
                        vr.u8(rp::VB_STEP, vb.step_mode.code());
                    }
                    let attrs = vb
                        .attributes
                        .iter()
                        .map(|a| {
                            let mut ar = Rec::new();
                            ar.u8(rp::AT_FORMAT, a.format.code());
                            ar.u32(rp::AT_OFFSET, a.offset);
                            ar.u32(rp::AT_LOCATION, a.shader_location);
                            ar.finish()
                        })
                        .collect();
                    vr.list(rp::VB_ATTRS, attrs);
                    vr.finish()
                })
                .collect();
            r.list(rp::VERTEX_BUFFERS, items);
        }
        if let Some(frag) = &self.fragment {
            r.u16(rp::FRAG_MODULE, frag.module);
            r.u16(rp::FRAG_ENTRY, frag.entry_point);
            let targets = frag
                .targets
                .iter()
                .map(|t| {
                    let mut tr = Rec::new();
                    tr.u8(rp::CT_FORMAT, t.format.code());
                    if let Some(blend) = &t.blend {
                        let mut br = Rec::new();
                        br.rec(rp::BL_COLOR, encode_blend_component(&blend.color));
                        br.rec(rp::BL_ALPHA, encode_blend_component(&blend.alpha));
                        tr.rec(rp::CT_BLEND, br.finish());
                    }
                    tr.finish()
                })
                .collect();
            r.list(rp::TARGETS, targets);
        }
        if self.topology != PrimitiveTopology::TriangleList {
            r.u8(rp::TOPOLOGY, self.topology.code());
        }
        if let Some(f) = self.strip_index_format {
            r.u8(rp::STRIP_INDEX, f.code());
        }
        if self.cull_mode != CullMode::None {
            r.u8(rp::CULL_MODE, self.cull_mode.code());
        }
        if self.front_face != FrontFace::Ccw {
            r.u8(rp::FRONT_FACE, self.front_face.code());
        }
        if let Some(ds) = &self.depth_stencil {
            let mut dr = Rec::new();
            dr.u8(rp::DS_FORMAT, ds.format.code());
            dr.u8(rp::DS_WRITE, ds.depth_write_enabled as u8);
            dr.u8(rp::DS_COMPARE, ds.depth_compare.code());
            r.rec(rp::DEPTH_STENCIL, dr.finish());
        }
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = RenderPipelineDesc {
            layout: None,
            vertex_module: 0,
            vertex_entry: 0,
            vertex_buffers: Vec::new(),
            fragment: None,
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            cull_mode: CullMode::None,
            front_face: FrontFace::Ccw,
            depth_stencil: None,
        };
        let mut frag_module = None;
        let mut frag_entry = None;
        let mut targets = Vec::new();
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                rp::LAYOUT => out.layout = Some(rd.u16()?),
                rp::VERTEX_MODULE => out.vertex_module = rd.u16()?,
                rp::VERTEX_ENTRY => out.vertex_entry = rd.u16()?,
                rp::VERTEX_BUFFERS => {
                    let count = rd.u8()? as usize;
                    for _ in 0..count {
                        out.vertex_buffers.push(decode_vertex_buffer(&mut rd)?);
                    }
                }
                rp::FRAG_MODULE => frag_module = Some(rd.u16()?),
                rp::FRAG_ENTRY => frag_entry = Some(rd.u16()?),
                rp::TARGETS => {
                    let count = rd.u8()? as usize;
                    for _ in 0..count {
                        targets.push(decode_color_target(&mut rd)?);
                    }
                }
                rp::TOPOLOGY => {
                    out.topology = enum_code(PrimitiveTopology::from_code, rd.u8()?, "topology")?
                }
                rp::STRIP_INDEX => {
                    out.strip_index_format =
                        Some(enum_code(IndexFormat::from_code, rd.u8()?, "index format")?)
                }
                rp::CULL_MODE => out.cull_mode = enum_code(CullMode::from_code, rd.u8()?, "cull mode")?,
                rp::FRONT_FACE => {
                    out.front_face = enum_code(FrontFace::from_code, rd.u8()?, "front face")?
                }
                rp::DEPTH_STENCIL => out.depth_stencil = Some(decode_depth_stencil(&mut rd)?),
                t => return Err(format!("unknown render pipeline field {t}")),
            }
        }
        rd.done()?;
        if let (Some(module), Some(entry_point)) = (frag_module, frag_entry) {
            out.fragment = Some(FragmentState { module, entry_point, targets });
        } else if frag_module.is_some() || frag_entry.is_some() || !targets.is_empty() {
            return Err("incomplete fragment state".into());
        }
        Ok(out)
    }
}

fn decode_vertex_buffer(rd: &mut Rd) -> Result<VertexBufferLayout, String> {
    let mut vb = VertexBufferLayout {
        array_stride: 0,
        step_mode: VertexStepMode::Vertex,
        attributes: Vec::new(),
    };
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            rp::VB_STRIDE => vb.array_stride = rd.u32()?,
            rp::VB_STEP => vb.step_mode = enum_code(VertexStepMode::from_code, rd.u8()?, "step mode")?,
            rp::VB_ATTRS => {
                let count = rd.u8()? as usize;
                for _ in 0..count {
                    vb.attributes.push(decode_vertex_attribute(rd)?);
                }
            }
            t => return Err(format!("unknown vertex buffer field {t}")),
        }
    }
    Ok(vb)
}

fn decode_vertex_attribute(rd: &mut Rd) -> Result<VertexAttribute, String> {
    let mut a = VertexAttribute {
        format: VertexFormat::Float32,
        offset: 0,
        shader_location: 0,
    };
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            rp::AT_FORMAT => a.format = enum_code(VertexFormat::from_code, rd.u8()?, "vertex format")?,
            rp::AT_OFFSET => a.offset = rd.u32()?,
            rp::AT_LOCATION => a.shader_location = rd.u32()?,
            t => return Err(format!("unknown vertex attribute field {t}")),
        }
    }
    Ok(a)
}

fn decode_color_target(rd: &mut Rd) -> Result<ColorTarget, String> {
    let mut t = ColorTarget {
        format: TextureFormat::Rgba8Unorm,
        blend: None,
    };
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            rp::CT_FORMAT => t.format = enum_code(TextureFormat::from_code, rd.u8()?, "format")?,
            rp::CT_BLEND => {
                let mut blend = BlendState::default();
                let bn = rd.u8()?;
                for _ in 0..bn {
                    match rd.u8()? {
                        rp::BL_COLOR => blend.color = decode_blend_component(rd)?,
                        rp::BL_ALPHA => blend.alpha = decode_blend_component(rd)?,
                        f => return Err(format!("unknown blend state field {f}")),
                    }
                }
                t.blend = Some(blend);
            }
            f => return Err(format!("unknown color target field {f}")),
        }
    }
    Ok(t)
}

fn decode_depth_stencil(rd: &mut Rd) -> Result<DepthStencilState, String> {
    let mut ds = DepthStencilState {
        format: TextureFormat::Depth24Plus,
        depth_write_enabled: false,
        depth_compare: CompareFunction::Always,
    };
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            rp::DS_FORMAT => ds.format = enum_code(TextureFormat::from_code, rd.u8()?, "format")?,
            rp::DS_WRITE => ds.depth_write_enabled = rd.u8()? != 0,
            rp::DS_COMPARE => {
                ds.depth_compare = enum_code(CompareFunction::from_code, rd.u8()?, "compare")?
            }
            t => return Err(format!("unknown depth stencil field {t}")),
        }
    }
    Ok(ds)
}

// ---------------- compute pipeline ----------------

mod cp {
    pub const LAYOUT: u8 = 0;
    pub const MODULE: u8 = 1;
    pub const ENTRY: u8 = 2;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputePipelineDesc {
    pub layout: Option<u16>,
    pub module: u16,
    /// String id of the entry point name.
    pub entry_point: u16,
}

impl ComputePipelineDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        if let Some(layout) = self.layout {
            r.u16(cp::LAYOUT, layout);
        }
        r.u16(cp::MODULE, self.module);
        r.u16(cp::ENTRY, self.entry_point);
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = ComputePipelineDesc {
            layout: None,
            module: 0,
            entry_point: 0,
        };
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                cp::LAYOUT => out.layout = Some(rd.u16()?),
                cp::MODULE => out.module = rd.u16()?,
                cp::ENTRY => out.entry_point = rd.u16()?,
                t => return Err(format!("unknown compute pipeline field {t}")),
            }
        }
        rd.done()?;
        Ok(out)
    }
}

// ---------------- bind group ----------------

mod bg {
    pub const LAYOUT: u8 = 0;
    pub const PIPELINE: u8 = 1;
    pub const GROUP: u8 = 2;
    pub const ENTRIES: u8 = 3;
    /// Present (value 1) when PIPELINE names a compute pipeline; render
    /// and compute pipelines have separate dense id spaces.
    pub const PIPELINE_COMPUTE: u8 = 4;
    // entry record
    pub const BINDING: u8 = 0;
    pub const KIND: u8 = 1;
    pub const RESOURCE: u8 = 2;
    pub const OFFSET: u8 = 3;
    pub const SIZE: u8 = 4;
    pub const POOL_OFFSET: u8 = 5;
}

pub const BG_KIND_BUFFER: u8 = 0;
pub const BG_KIND_SAMPLER: u8 = 1;
pub const BG_KIND_VIEW: u8 = 2;

/// Where a bind group's layout comes from: an explicit layout object or a
/// pipeline's auto layout at a group index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindGroupLayoutRef {
    Explicit(u16),
    FromPipeline { pipeline: u16, group: u32, compute: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindingResource {
    Buffer {
        buffer: u16,
        offset: u32,
        size: Option<u32>,
        pool_offset: u32,
    },
    Sampler(u16),
    TextureView(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindingResource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindGroupDesc {
    pub layout: BindGroupLayoutRef,
    pub entries: Vec<BindGroupEntry>,
}

impl BindGroupDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        match self.layout {
            BindGroupLayoutRef::Explicit(id) => r.u16(bg::LAYOUT, id),
            BindGroupLayoutRef::FromPipeline { pipeline, group, compute } => {
                r.u16(bg::PIPELINE, pipeline);
                if group != 0 {
                    r.u32(bg::GROUP, group);
                }
                if compute {
                    r.u8(bg::PIPELINE_COMPUTE, 1);
                }
            }
        }
        let items = self
            .entries
            .iter()
            .map(|e| {
                let mut er = Rec::new();
                er.u32(bg::BINDING, e.binding);
                match e.resource {
                    BindingResource::Buffer { buffer, offset, size, pool_offset } => {
                        er.u8(bg::KIND, BG_KIND_BUFFER);
                        er.u16(bg::RESOURCE, buffer);
                        if offset != 0 {
                            er.u32(bg::OFFSET, offset);
                        }
                        if let Some(size) = size {
                            er.u32(bg::SIZE, size);
                        }
                        if pool_offset != 0 {
                            er.u32(bg::POOL_OFFSET, pool_offset);
                        }
                    }
                    BindingResource::Sampler(id) => {
                        er.u8(bg::KIND, BG_KIND_SAMPLER);
                        er.u16(bg::RESOURCE, id);
                    }
                    BindingResource::TextureView(id) => {
                        er.u8(bg::KIND, BG_KIND_VIEW);
                        er.u16(bg::RESOURCE, id);
                    }
                }
                er.finish()
            })
            .collect();
        r.list(bg::ENTRIES, items);
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut layout = None;
        let mut pipeline = None;
        let mut group = 0u32;
        let mut compute = false;
        let mut entries = Vec::new();
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                bg::LAYOUT => layout = Some(rd.u16()?),
                bg::PIPELINE => pipeline = Some(rd.u16()?),
                bg::GROUP => group = rd.u32()?,
                bg::PIPELINE_COMPUTE => compute = rd.u8()? != 0,
                bg::ENTRIES => {
                    let count = rd.u8()? as usize;
                    for _ in 0..count {
                        entries.push(decode_bg_entry(&mut rd)?);
                    }
                }
                t => return Err(format!("unknown bind group field {t}")),
            }
        }
        rd.done()?;
        let layout = match (layout, pipeline) {
            (Some(id), None) => BindGroupLayoutRef::Explicit(id),
            (None, Some(pipeline)) => BindGroupLayoutRef::FromPipeline { pipeline, group, compute },
            _ => return Err("bind group needs exactly one of layout / pipeline".into()),
        };
        Ok(BindGroupDesc { layout, entries })
    }
}

fn decode_bg_entry(rd: &mut Rd) -> Result<BindGroupEntry, String> {
    let mut binding = 0u32;
    let mut kind = BG_KIND_BUFFER;
    let mut resource = 0u16;
    let mut offset = 0u32;
    let mut size = None;
    let mut pool_offset = 0u32;
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            bg::BINDING => binding = rd.u32()?,
            bg::KIND => kind = rd.u8()?,
            bg::RESOURCE => resource = rd.u16()?,
            bg::OFFSET => offset = rd.u32()?,
            bg::SIZE => size = Some(rd.u32()?),
            bg::POOL_OFFSET => pool_offset = rd.u32()?,
            t => return Err(format!("unknown bind group entry field {t}")),
        }
    }
    let resource = match kind {
        BG_KIND_BUFFER => BindingResource::Buffer { buffer: resource, offset, size, pool_offset },
        BG_KIND_SAMPLER => BindingResource::Sampler(resource),
        BG_KIND_VIEW => BindingResource::TextureView(resource),
        k => return Err(format!("unknown binding resource kind {k}")),
    };
    Ok(BindGroupEntry { binding, resource })
}

// ---------------- texture view ----------------

mod tv {
    pub const TEXTURE: u8 = 0;
    pub const FORMAT: u8 = 1;
    pub const DIMENSION: u8 = 2;
    pub const BASE_MIP: u8 = 3;
    pub const MIP_COUNT: u8 = 4;
    pub const BASE_LAYER: u8 = 5;
    pub const LAYER_COUNT: u8 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureViewDesc {
    pub texture: u16,
    pub format: Option<TextureFormat>,
    pub dimension: Option<TextureViewDimension>,
    pub base_mip_level: u32,
    pub mip_level_count: Option<u32>,
    pub base_array_layer: u32,
    pub array_layer_count: Option<u32>,
}

impl TextureViewDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        r.u16(tv::TEXTURE, self.texture);
        if let Some(f) = self.format {
            r.u8(tv::FORMAT, f.code());
        }
        if let Some(d) = self.dimension {
            r.u8(tv::DIMENSION, d.code());
        }
        if self.base_mip_level != 0 {
            r.u32(tv::BASE_MIP, self.base_mip_level);
        }
        if let Some(c) = self.mip_level_count {
            r.u32(tv::MIP_COUNT, c);
        }
        if self.base_array_layer != 0 {
            r.u32(tv::BASE_LAYER, self.base_array_layer);
        }
        if let Some(c) = self.array_layer_count {
            r.u32(tv::LAYER_COUNT, c);
        }
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = TextureViewDesc {
            texture: 0,
            format: None,
            dimension: None,
            base_mip_level: 0,
            mip_level_count: None,
            base_array_layer: 0,
            array_layer_count: None,
        };
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                tv::TEXTURE => out.texture = rd.u16()?,
                tv::FORMAT => out.format = Some(enum_code(TextureFormat::from_code, rd.u8()?, "format")?),
                tv::DIMENSION => {
                    out.dimension =
                        Some(enum_code(TextureViewDimension::from_code, rd.u8()?, "view dimension")?)
                }
                tv::BASE_MIP => out.base_mip_level = rd.u32()?,
                tv::MIP_COUNT => out.mip_level_count = Some(rd.u32()?),
                tv::BASE_LAYER => out.base_array_layer = rd.u32()?,
                tv::LAYER_COUNT => out.array_layer_count = Some(rd.u32()?),
                t => return Err(format!("unknown texture view field {t}")),
            }
        }
        rd.done()?;
        Ok(out)
    }
}

// ---------------- query set ----------------

mod qs {
    pub const TYPE: u8 = 0;
    pub const COUNT: u8 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuerySetDesc {
    pub ty: QueryType,
    pub count: u32,
}

impl QuerySetDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        r.u8(qs::TYPE, self.ty.code());
        r.u32(qs::COUNT, self.count);
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = QuerySetDesc { ty: QueryType::Occlusion, count: 0 };
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                qs::TYPE => out.ty = enum_code(QueryType::from_code, rd.u8()?, "query type")?,
                qs::COUNT => out.count = rd.u32()?,
                t => return Err(format!("unknown query set field {t}")),
            }
        }
        rd.done()?;
        Ok(out)
    }
}

// ---------------- render pass ----------------

mod pass {
    pub const COLORS: u8 = 0;
    pub const DEPTH_STENCIL: u8 = 1;
    // attachment record
    pub const VIEW: u8 = 0;
    pub const CANVAS: u8 = 1;
    pub const LOAD_OP: u8 = 2;
    pub const STORE_OP: u8 = 3;
    pub const CLEAR_R: u8 = 4;
    pub const CLEAR_G: u8 = 5;
    pub const CLEAR_B: u8 = 6;
    pub const CLEAR_A: u8 = 7;
    pub const DEPTH_CLEAR: u8 = 8;
}

/// Attachment target: the host surface or an explicit texture view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttachmentView {
    Canvas,
    View(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    pub view: AttachmentView,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthStencilAttachment {
    pub view: AttachmentView,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassDesc {
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil: Option<DepthStencilAttachment>,
}

fn encode_attachment_view(r: &mut Rec, view: AttachmentView) {
    match view {
        AttachmentView::View(id) => r.u16(pass::VIEW, id),
        AttachmentView::Canvas => r.u8(pass::CANVAS, 1),
    }
}

impl RenderPassDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        let colors = self
            .color_attachments
            .iter()
            .map(|a| {
                let mut ar = Rec::new();
                encode_attachment_view(&mut ar, a.view);
                if a.load_op != LoadOp::Clear {
                    ar.u8(pass::LOAD_OP, a.load_op.code());
                }
                if a.store_op != StoreOp::Store {
                    ar.u8(pass::STORE_OP, a.store_op.code());
                }
                let [red, g, b, alpha] = a.clear_value;
                if red != 0.0 {
                    ar.f32(pass::CLEAR_R, red);
                }
                if g != 0.0 {
                    ar.f32(pass::CLEAR_G, g);
                }
                if b != 0.0 {
                    ar.f32(pass::CLEAR_B, b);
                }
                if alpha != 0.0 {
                    ar.f32(pass::CLEAR_A, alpha);
                }
                ar.finish()
            })
            .collect();
        r.list(pass::COLORS, colors);
        if let Some(ds) = &self.depth_stencil {
            let mut dr = Rec::new();
            encode_attachment_view(&mut dr, ds.view);
            if ds.depth_load_op != LoadOp::Clear {
                dr.u8(pass::LOAD_OP, ds.depth_load_op.code());
            }
            if ds.depth_store_op != StoreOp::Store {
                dr.u8(pass::STORE_OP, ds.depth_store_op.code());
            }
            if ds.depth_clear_value != 0.0 {
                dr.f32(pass::DEPTH_CLEAR, ds.depth_clear_value);
            }
            r.rec(pass::DEPTH_STENCIL, dr.finish());
        }
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = RenderPassDesc {
            color_attachments: Vec::new(),
            depth_stencil: None,
        };
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                pass::COLORS => {
                    let count = rd.u8()? as usize;
                    for _ in 0..count {
                        out.color_attachments.push(decode_color_attachment(&mut rd)?);
                    }
                }
                pass::DEPTH_STENCIL => out.depth_stencil = Some(decode_depth_attachment(&mut rd)?),
                t => return Err(format!("unknown render pass field {t}")),
            }
        }
        rd.done()?;
        if out.color_attachments.is_empty() && out.depth_stencil.is_none() {
            return Err("render pass needs at least one attachment".into());
        }
        Ok(out)
    }
}

fn decode_color_attachment(rd: &mut Rd) -> Result<ColorAttachment, String> {
    let mut a = ColorAttachment {
        view: AttachmentView::Canvas,
        load_op: LoadOp::Clear,
        store_op: StoreOp::Store,
        clear_value: [0.0; 4],
    };
    let mut have_view = false;
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            pass::VIEW => {
                a.view = AttachmentView::View(rd.u16()?);
                have_view = true;
            }
            pass::CANVAS => {
                rd.u8()?;
                a.view = AttachmentView::Canvas;
                have_view = true;
            }
            pass::LOAD_OP => a.load_op = enum_code(LoadOp::from_code, rd.u8()?, "load op")?,
            pass::STORE_OP => a.store_op = enum_code(StoreOp::from_code, rd.u8()?, "store op")?,
            pass::CLEAR_R => a.clear_value[0] = rd.f32()?,
            pass::CLEAR_G => a.clear_value[1] = rd.f32()?,
            pass::CLEAR_B => a.clear_value[2] = rd.f32()?,
            pass::CLEAR_A => a.clear_value[3] = rd.f32()?,
            t => return Err(format!("unknown color attachment field {t}")),
        }
    }
    if !have_view {
        return Err("color attachment needs a view".into());
    }
    Ok(a)
}

fn decode_depth_attachment(rd: &mut Rd) -> Result<DepthStencilAttachment, String> {
    let mut a = DepthStencilAttachment {
        view: AttachmentView::Canvas,
        depth_load_op: LoadOp::Clear,
        depth_store_op: StoreOp::Store,
        depth_clear_value: 0.0,
    };
    let n = rd.u8()?;
    for _ in 0..n {
        match rd.u8()? {
            pass::VIEW => a.view = AttachmentView::View(rd.u16()?),
            pass::CANVAS => {
                rd.u8()?;
                a.view = AttachmentView::Canvas;
            }
            pass::LOAD_OP => a.depth_load_op = enum_code(LoadOp::from_code, rd.u8()?, "load op")?,
            pass::STORE_OP => a.depth_store_op = enum_code(StoreOp::from_code, rd.u8()?, "store op")?,
            pass::DEPTH_CLEAR => a.depth_clear_value = rd.f32()?,
            t => return Err(format!("unknown depth attachment field {t}")),
        }
    }
    Ok(a)
}

// ---------------- write texture ----------------

mod wt {
    pub const TEXTURE: u8 = 0;
    pub const MIP: u8 = 1;
    pub const ORIGIN_X: u8 = 2;
    pub const ORIGIN_Y: u8 = 3;
    pub const ORIGIN_Z: u8 = 4;
    pub const BYTES_PER_ROW: u8 = 5;
    pub const ROWS_PER_IMAGE: u8 = 6;
    pub const WIDTH: u8 = 7;
    pub const HEIGHT: u8 = 8;
    pub const DEPTH: u8 = 9;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteTextureDesc {
    pub texture: u16,
    pub mip_level: u32,
    pub origin: [u32; 3],
    pub bytes_per_row: u32,
    pub rows_per_image: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl WriteTextureDesc {
    pub fn encode(&self) -> Vec<u8> {
        let mut r = Rec::new();
        r.u16(wt::TEXTURE, self.texture);
        if self.mip_level != 0 {
            r.u32(wt::MIP, self.mip_level);
        }
        if self.origin[0] != 0 {
            r.u32(wt::ORIGIN_X, self.origin[0]);
        }
        if self.origin[1] != 0 {
            r.u32(wt::ORIGIN_Y, self.origin[1]);
        }
        if self.origin[2] != 0 {
            r.u32(wt::ORIGIN_Z, self.origin[2]);
        }
        r.u32(wt::BYTES_PER_ROW, self.bytes_per_row);
        if self.rows_per_image != self.height {
            r.u32(wt::ROWS_PER_IMAGE, self.rows_per_image);
        }
        r.u32(wt::WIDTH, self.width);
        r.u32(wt::HEIGHT, self.height);
        if self.depth != 1 {
            r.u32(wt::DEPTH, self.depth);
        }
        r.finish()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        let mut rd = Rd::new(buf);
        let mut out = WriteTextureDesc {
            texture: 0,
            mip_level: 0,
            origin: [0; 3],
            bytes_per_row: 0,
            rows_per_image: 0,
            width: 0,
            height: 0,
            depth: 1,
        };
        let mut have_rows = false;
        let n = rd.u8()?;
        for _ in 0..n {
            match rd.u8()? {
                wt::TEXTURE => out.texture = rd.u16()?,
                wt::MIP => out.mip_level = rd.u32()?,
                wt::ORIGIN_X => out.origin[0] = rd.u32()?,
                wt::ORIGIN_Y => out.origin[1] = rd.u32()?,
                wt::ORIGIN_Z => out.origin[2] = rd.u32()?,
                wt::BYTES_PER_ROW => out.bytes_per_row = rd.u32()?,
                wt::ROWS_PER_IMAGE => {
                    out.rows_per_image = rd.u32()?;
                    have_rows = true;
                }
                wt::WIDTH => out.width = rd.u32()?,
                wt::HEIGHT => out.height = rd.u32()?,
                wt::DEPTH => out.depth = rd.u32()?,
                t => return Err(format!("unknown write texture field {t}")),
            }
        }
        rd.done()?;
        if !have_rows {
            out.rows_per_image = out.height;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_round_trip_with_defaults_omitted() {
        let desc = TextureDesc {
            width: 256,
            height: 128,
            depth_or_array_layers: 1,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba16Float,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::RENDER_ATTACHMENT,
        };
        let bytes = desc.encode();
        // width, height, format, usage only
        assert_eq!(bytes[0], 4);
        assert_eq!(TextureDesc::decode(&bytes).unwrap(), desc);
    }

    #[test]
    fn render_pipeline_round_trip() {
        let desc = RenderPipelineDesc {
            layout: None,
            vertex_module: 3,
            vertex_entry: 7,
            vertex_buffers: vec![VertexBufferLayout {
                array_stride: 16,
                step_mode: VertexStepMode::Vertex,
                attributes: vec![VertexAttribute {
                    format: VertexFormat::Float32x4,
                    offset: 0,
                    shader_location: 0,
                }],
            }],
            fragment: Some(FragmentState {
                module: 3,
                entry_point: 8,
                targets: vec![ColorTarget {
                    format: TextureFormat::Bgra8Unorm,
                    blend: Some(BlendState {
                        color: BlendComponent {
                            src_factor: BlendFactor::SrcAlpha,
                            dst_factor: BlendFactor::OneMinusSrcAlpha,
                            operation: BlendOperation::Add,
                        },
                        alpha: BlendComponent::default(),
                    }),
                }],
            }),
            topology: PrimitiveTopology::TriangleStrip,
            strip_index_format: Some(IndexFormat::Uint16),
            cull_mode: CullMode::Back,
            front_face: FrontFace::Ccw,
            depth_stencil: None,
        };
        let bytes = desc.encode();
        assert_eq!(RenderPipelineDesc::decode(&bytes).unwrap(), desc);
    }

    #[test]
    fn bind_group_pool_offset_round_trip() {
        let desc = BindGroupDesc {
            layout: BindGroupLayoutRef::FromPipeline { pipeline: 0, group: 0, compute: false },
            entries: vec![BindGroupEntry {
                binding: 0,
                resource: BindingResource::Buffer {
                    buffer: 2,
                    offset: 0,
                    size: None,
                    pool_offset: 1,
                },
            }],
        };
        assert_eq!(BindGroupDesc::decode(&desc.encode()).unwrap(), desc);
    }

    #[test]
    fn bind_group_without_layout_is_malformed() {
        let mut r = Rec::new();
        r.list(3, vec![]);
        assert!(BindGroupDesc::decode(&r.finish()).is_err());
    }

    #[test]
    fn render_pass_clear_round_trip() {
        let desc = RenderPassDesc {
            color_attachments: vec![ColorAttachment {
                view: AttachmentView::Canvas,
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                clear_value: [0.0, 0.0, 0.0, 1.0],
            }],
            depth_stencil: None,
        };
        assert_eq!(RenderPassDesc::decode(&desc.encode()).unwrap(), desc);
    }
}

// src/pngb/enums.rs
// Wire enums shared by the DSL dictionaries, the descriptor encoder, and
// the runtime decoder. Each enum maps three ways: DSL name <-> variant
// <-> u8 wire code. Codes are part of the binary contract; never renumber.

/// Defines a `#[repr(u8)]` wire enum plus its name/code mapping tables.
macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal / $text:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $code,)+
        }

        impl $name {
            /// Parse the WebGPU-style name used in DSL source.
            pub fn from_name(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn from_code(v: u8) -> Option<Self> {
                match v {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn code(self) -> u8 {
                self as u8
            }
        }
    };
}

wire_enum! {
    TextureFormat {
        R8Unorm = 0 / "r8unorm",
        Rg8Unorm = 1 / "rg8unorm",
        Rgba8Unorm = 2 / "rgba8unorm",
        Rgba8UnormSrgb = 3 / "rgba8unorm-srgb",
        Bgra8Unorm = 4 / "bgra8unorm",
        Bgra8UnormSrgb = 5 / "bgra8unorm-srgb",
        Rgba8Snorm = 6 / "rgba8snorm",
        R16Float = 7 / "r16float",
        Rg16Float = 8 / "rg16float",
        Rgba16Float = 9 / "rgba16float",
        R32Float = 10 / "r32float",
        Rg32Float = 11 / "rg32float",
        Rgba32Float = 12 / "rgba32float",
        R32Uint = 13 / "r32uint",
        Rg32Uint = 14 / "rg32uint",
        Rgba32Uint = 15 / "rgba32uint",
        R32Sint = 16 / "r32sint",
        Rgb10a2Unorm = 17 / "rgb10a2unorm",
        Depth24Plus = 18 / "depth24plus",
        Depth24PlusStencil8 = 19 / "depth24plus-stencil8",
        Depth32Float = 20 / "depth32float",
    }
}

wire_enum! {
    TextureDimension {
        D1 = 0 / "1d",
        D2 = 1 / "2d",
        D3 = 2 / "3d",
    }
}

wire_enum! {
    TextureViewDimension {
        D1 = 0 / "1d",
        D2 = 1 / "2d",
        D2Array = 2 / "2d-array",
        Cube = 3 / "cube",
        CubeArray = 4 / "cube-array",
        D3 = 5 / "3d",
    }
}

wire_enum! {
    FilterMode {
        Nearest = 0 / "nearest",
        Linear = 1 / "linear",
    }
}

wire_enum! {
    AddressMode {
        ClampToEdge = 0 / "clamp-to-edge",
        Repeat = 1 / "repeat",
        MirrorRepeat = 2 / "mirror-repeat",
    }
}

wire_enum! {
    CompareFunction {
        Never = 0 / "never",
        Less = 1 / "less",
        Equal = 2 / "equal",
        LessEqual = 3 / "less-equal",
        Greater = 4 / "greater",
        NotEqual = 5 / "not-equal",
        GreaterEqual = 6 / "greater-equal",
        Always = 7 / "always",
    }
}

wire_enum! {
    BlendFactor {
        Zero = 0 / "zero",
        One = 1 / "one",
        Src = 2 / "src",
        OneMinusSrc = 3 / "one-minus-src",
        SrcAlpha = 4 / "src-alpha",
        OneMinusSrcAlpha = 5 / "one-minus-src-alpha",
        Dst = 6 / "dst",
        OneMinusDst = 7 / "one-minus-dst",
        DstAlpha = 8 / "dst-alpha",
        OneMinusDstAlpha = 9 / "one-minus-dst-alpha",
        Constant = 10 / "constant",
        OneMinusConstant = 11 / "one-minus-constant",
    }
}

wire_enum! {
    BlendOperation {
        Add = 0 / "add",
        Subtract = 1 / "subtract",
        ReverseSubtract = 2 / "reverse-subtract",
        Min = 3 / "min",
        Max = 4 / "max",
    }
}

wire_enum! {
    PrimitiveTopology {
        PointList = 0 / "point-list",
        LineList = 1 / "line-list",
        LineStrip = 2 / "line-strip",
        TriangleList = 3 / "triangle-list",
        TriangleStrip = 4 / "triangle-strip",
    }
}

wire_enum! {
    CullMode {
        None = 0 / "none",
        Front = 1 / "front",
        Back = 2 / "back",
    }
}

wire_enum! {
    FrontFace {
        Ccw = 0 / "ccw",
        Cw = 1 / "cw",
    }
}

wire_enum! {
    IndexFormat {
        Uint16 = 0 / "uint16",
        Uint32 = 1 / "uint32",
    }
}

wire_enum! {
    LoadOp {
        Clear = 0 / "clear",
        Load = 1 / "load",
    }
}

wire_enum! {
    StoreOp {
        Store = 0 / "store",
        Discard = 1 / "discard",
    }
}

wire_enum! {
    VertexStepMode {
        Vertex = 0 / "vertex",
        Instance = 1 / "instance",
    }
}

wire_enum! {
    VertexFormat {
        Float32 = 0 / "float32",
        Float32x2 = 1 / "float32x2",
        Float32x3 = 2 / "float32x3",
        Float32x4 = 3 / "float32x4",
        Uint32 = 4 / "uint32",
        Uint32x2 = 5 / "uint32x2",
        Uint32x3 = 6 / "uint32x3",
        Uint32x4 = 7 / "uint32x4",
        Sint32 = 8 / "sint32",
        Sint32x2 = 9 / "sint32x2",
        Sint32x3 = 10 / "sint32x3",
        Sint32x4 = 11 / "sint32x4",
        Unorm8x4 = 12 / "unorm8x4",
        Uint8x4 = 13 / "uint8x4",
        Uint16x2 = 14 / "uint16x2",
        Uint16x4 = 15 / "uint16x4",
    }
}

wire_enum! {
    QueryType {
        Occlusion = 0 / "occlusion",
        Timestamp = 1 / "timestamp",
    }
}

wire_enum! {
    /// Binding layout entry type for `#bindGroupLayout` entries.
    BindingType {
        Uniform = 0 / "uniform",
        Storage = 1 / "storage",
        ReadOnlyStorage = 2 / "read-only-storage",
        Sampler = 3 / "sampler",
        ComparisonSampler = 4 / "comparison-sampler",
        Texture = 5 / "texture",
        StorageTexture = 6 / "storage-texture",
    }
}

wire_enum! {
    /// Uniform reflection scalar type codes (fixed by the format spec).
    UniformType {
        F32 = 0 / "f32",
        I32 = 1 / "i32",
        U32 = 2 / "u32",
        Vec2F = 3 / "vec2f",
        Vec3F = 4 / "vec3f",
        Vec4F = 5 / "vec4f",
        Mat3 = 6 / "mat3x3f",
        Mat4 = 7 / "mat4x4f",
        Vec2I = 8 / "vec2i",
        Vec3I = 9 / "vec3i",
        Vec4I = 10 / "vec4i",
        Vec2U = 11 / "vec2u",
        Vec3U = 12 / "vec3u",
        Vec4U = 13 / "vec4u",
    }
}

impl UniformType {
    /// Byte size of one value of this type. mat3x3f is three 4-wide
    /// columns, so 48 rather than 36.
    pub fn size(self) -> u32 {
        match self {
            UniformType::F32 | UniformType::I32 | UniformType::U32 => 4,
            UniformType::Vec2F | UniformType::Vec2I | UniformType::Vec2U => 8,
            UniformType::Vec3F | UniformType::Vec3I | UniformType::Vec3U => 12,
            UniformType::Vec4F | UniformType::Vec4I | UniformType::Vec4U => 16,
            UniformType::Mat3 => 48,
            UniformType::Mat4 => 64,
        }
    }
}

bitflags::bitflags! {
    /// WebGPU buffer usage bits, same values as the WebGPU spec.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const MAP_READ      = 1 << 0;
        const MAP_WRITE     = 1 << 1;
        const COPY_SRC      = 1 << 2;
        const COPY_DST      = 1 << 3;
        const INDEX         = 1 << 4;
        const VERTEX        = 1 << 5;
        const UNIFORM       = 1 << 6;
        const STORAGE       = 1 << 7;
        const INDIRECT      = 1 << 8;
        const QUERY_RESOLVE = 1 << 9;
    }

    /// WebGPU texture usage bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsages: u32 {
        const COPY_SRC          = 1 << 0;
        const COPY_DST          = 1 << 1;
        const TEXTURE_BINDING   = 1 << 2;
        const STORAGE_BINDING   = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }

    /// Shader stage visibility bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShaderStages: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
    }
}

impl BufferUsages {
    pub fn from_flag_name(s: &str) -> Option<Self> {
        Some(match s {
            "MAP_READ" => BufferUsages::MAP_READ,
            "MAP_WRITE" => BufferUsages::MAP_WRITE,
            "COPY_SRC" => BufferUsages::COPY_SRC,
            "COPY_DST" => BufferUsages::COPY_DST,
            "INDEX" => BufferUsages::INDEX,
            "VERTEX" => BufferUsages::VERTEX,
            "UNIFORM" => BufferUsages::UNIFORM,
            "STORAGE" => BufferUsages::STORAGE,
            "INDIRECT" => BufferUsages::INDIRECT,
            "QUERY_RESOLVE" => BufferUsages::QUERY_RESOLVE,
            _ => return None,
        })
    }
}

impl TextureUsages {
    pub fn from_flag_name(s: &str) -> Option<Self> {
        Some(match s {
            "COPY_SRC" => TextureUsages::COPY_SRC,
            "COPY_DST" => TextureUsages::COPY_DST,
            "TEXTURE_BINDING" => TextureUsages::TEXTURE_BINDING,
            "STORAGE_BINDING" => TextureUsages::STORAGE_BINDING,
            "RENDER_ATTACHMENT" => TextureUsages::RENDER_ATTACHMENT,
            _ => return None,
        })
    }
}

impl ShaderStages {
    pub fn from_flag_name(s: &str) -> Option<Self> {
        Some(match s {
            "VERTEX" => ShaderStages::VERTEX,
            "FRAGMENT" => ShaderStages::FRAGMENT,
            "COMPUTE" => ShaderStages::COMPUTE,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_code_round_trip() {
        for code in 0..=20u8 {
            let f = TextureFormat::from_code(code).expect("dense codes");
            assert_eq!(TextureFormat::from_name(f.name()), Some(f));
        }
        assert_eq!(TextureFormat::from_code(21), None);
        assert_eq!(AddressMode::from_name("clamp-to-edge"), Some(AddressMode::ClampToEdge));
        assert_eq!(BlendFactor::from_name("one-minus-src-alpha"), Some(BlendFactor::OneMinusSrcAlpha));
    }

    #[test]
    fn uniform_type_sizes_match_spec_table() {
        let expect = [
            (UniformType::F32, 4),
            (UniformType::I32, 4),
            (UniformType::U32, 4),
            (UniformType::Vec2F, 8),
            (UniformType::Vec3F, 12),
            (UniformType::Vec4F, 16),
            (UniformType::Mat3, 48),
            (UniformType::Mat4, 64),
            (UniformType::Vec2I, 8),
            (UniformType::Vec3I, 12),
            (UniformType::Vec4I, 16),
            (UniformType::Vec2U, 8),
            (UniformType::Vec3U, 12),
            (UniformType::Vec4U, 16),
        ];
        for (ty, size) in expect {
            assert_eq!(ty.size(), size, "{:?}", ty);
        }
    }

    #[test]
    fn usage_flag_names() {
        let u = BufferUsages::from_flag_name("UNIFORM").unwrap()
            | BufferUsages::from_flag_name("COPY_DST").unwrap();
        assert_eq!(u.bits(), 64 | 8);
        assert!(BufferUsages::from_flag_name("BOGUS").is_none());
    }
}

// src/error.rs
// The crate-wide error taxonomy. Compile-time diagnostics accumulate into a
// report; load-time errors are fatal and immediate; dispatch-time errors
// abort the current frame and leave the instance usable.

use serde::Serialize;
use thiserror::Error;

use crate::compiler::ast::Span;

/// Lexer failure at a byte offset.
#[derive(Debug, Clone, Error, Serialize)]
#[error("lex error at offset {offset}: {reason}")]
pub struct LexError {
    pub offset: u32,
    pub reason: String,
}

/// Parser failure with the token span and the expected set.
#[derive(Debug, Clone, Error, Serialize)]
#[error("parse error: expected {expected}, found {found}")]
pub struct ParseError {
    pub span: Span,
    pub expected: String,
    pub found: String,
}

/// Analyzer failure: names, kinds, enum dictionaries, property shapes.
#[derive(Debug, Clone, Error, Serialize)]
pub enum ResolveError {
    #[error("duplicate {kind} name `{name}`")]
    DuplicateName { kind: &'static str, name: String, span: Span },
    #[error("unknown {kind} `{name}`")]
    UnknownReference { kind: &'static str, name: String, span: Span },
    #[error("unknown {what} value `{value}`")]
    UnknownValue { what: &'static str, value: String, span: Span },
    #[error("`{key}` is required here")]
    MissingProperty { key: &'static str, span: Span },
    #[error("`{key}`: expected {expected}")]
    BadValue { key: String, expected: &'static str, span: Span },
    #[error("reflection unavailable for shader `{shader}`; cannot resolve `{expr}`")]
    ReflectionUnavailable { shader: String, expr: String, span: Span },
    #[error("shader `{shader}` has no uniform binding named `{var}`")]
    UnknownBinding { shader: String, var: String, span: Span },
}

impl ResolveError {
    pub fn span(&self) -> Span {
        match self {
            ResolveError::DuplicateName { span, .. }
            | ResolveError::UnknownReference { span, .. }
            | ResolveError::UnknownValue { span, .. }
            | ResolveError::MissingProperty { span, .. }
            | ResolveError::BadValue { span, .. }
            | ResolveError::ReflectionUnavailable { span, .. }
            | ResolveError::UnknownBinding { span, .. } => *span,
        }
    }
}

/// Reflection bridge failure. A warning at compile time: the shader is still
/// emitted, but `size=shader.*` and uniform-by-name become unavailable.
#[derive(Debug, Clone, Error, Serialize)]
pub enum ReflectError {
    #[error("WGSL parse failed: {0}")]
    Parse(String),
    #[error("binding `{0}` is not a sized struct")]
    NotAStruct(String),
}

/// PNG chunk codec failure.
#[derive(Debug, Clone, Error, Serialize)]
pub enum PngError {
    #[error("not a PNG: bad signature")]
    InvalidSignature,
    #[error("no PNGine chunk found")]
    MissingChunk,
    #[error("unsupported PNGine chunk version {0}")]
    UnsupportedVersion(u8),
    #[error("payload decompression failed: {0}")]
    Decompress(String),
    #[error("chunk CRC mismatch: stored {stored:08x}, computed {computed:08x}")]
    CrcMismatch { stored: u32, computed: u32 },
    #[error("payload exceeds the {limit} byte cap")]
    TooLarge { limit: usize },
    #[error("truncated chunk stream at offset {0}")]
    Truncated(usize),
}

/// PNGB payload failure. Distinguishes magic, version, and plugin set so a
/// host can tell "not ours" from "ours but newer".
#[derive(Debug, Clone, Error, Serialize)]
pub enum PngbError {
    #[error("bad PNGB magic")]
    BadMagic,
    #[error("unsupported PNGB version {0}")]
    Version(u16),
    #[error("payload requires unsupported capabilities (bits {0:#x})")]
    PluginSet(u32),
    #[error("truncated payload in {section}")]
    Truncated { section: &'static str },
    #[error("section offset out of bounds in {section}")]
    BadOffset { section: &'static str },
    #[error("string id {0} out of range")]
    StringId(u16),
    #[error("data id {0} out of range")]
    DataId(u16),
    #[error("string {0} is not valid utf-8")]
    BadUtf8(u16),
    #[error("bad varint in opcode stream at offset {0}")]
    BadVarint(usize),
    #[error("unknown opcode {tag:#04x} at offset {offset}")]
    UnknownOpcode { tag: u8, offset: usize },
    #[error("opcode stream ended without END")]
    MissingEnd,
}

/// What kind of runtime object an id denotes. Used in dispatch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObjectKind {
    Buffer,
    Texture,
    Sampler,
    Shader,
    BindGroupLayout,
    PipelineLayout,
    RenderPipeline,
    ComputePipeline,
    BindGroup,
    TextureView,
    QuerySet,
    Frame,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Buffer => "buffer",
            ObjectKind::Texture => "texture",
            ObjectKind::Sampler => "sampler",
            ObjectKind::Shader => "shader",
            ObjectKind::BindGroupLayout => "bind group layout",
            ObjectKind::PipelineLayout => "pipeline layout",
            ObjectKind::RenderPipeline => "render pipeline",
            ObjectKind::ComputePipeline => "compute pipeline",
            ObjectKind::BindGroup => "bind group",
            ObjectKind::TextureView => "texture view",
            ObjectKind::QuerySet => "query set",
            ObjectKind::Frame => "frame",
        }
    }
}

/// Dispatcher failure. Fatal to the current frame only.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("opcode not permitted in {state} state")]
    BadState { state: &'static str, offset: usize },
    #[error("begin_*_pass while a pass is open")]
    NestedPass { offset: usize },
    #[error("end_pass without an open pass")]
    UnmatchedPass { offset: usize },
    #[error("unknown {} id {id}", .kind.name())]
    UnknownId { kind: ObjectKind, id: u32, offset: usize },
    #[error("duplicate {} id {id}", .kind.name())]
    DuplicateId { kind: ObjectKind, id: u32, offset: usize },
    #[error("data range out of bounds: {what}")]
    OutOfBounds { what: String, offset: usize },
    #[error("malformed descriptor: {what}")]
    MalformedDescriptor { what: String, offset: usize },
    #[error("uniform path `{0}` not found")]
    UnknownUniform(String),
    #[error("uniform `{path}` expects {expected} bytes, got {got}")]
    UniformSize { path: String, expected: u32, got: u32 },
    #[error("uniform `{0}` is not contiguous; whole-struct write refused")]
    UniformNotContiguous(String),
    #[error(transparent)]
    Payload(#[from] PngbError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl DispatchError {
    /// Byte offset of the offending opcode, if the error is stream-anchored.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DispatchError::BadState { offset, .. }
            | DispatchError::NestedPass { offset }
            | DispatchError::UnmatchedPass { offset }
            | DispatchError::UnknownId { offset, .. }
            | DispatchError::DuplicateId { offset, .. }
            | DispatchError::OutOfBounds { offset, .. }
            | DispatchError::MalformedDescriptor { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Backend failure, surfaced unchanged; the dispatcher does not retry.
#[derive(Debug, Clone, Error, Serialize)]
#[error("backend error: {0}")]
pub struct BackendError(pub String);

/// Host-facing load failure.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Png(#[from] PngError),
    #[error(transparent)]
    Pngb(#[from] PngbError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One compile diagnostic, position recovered from the span when available.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
}

/// Aggregate compile failure: a single invocation reports every diagnostic
/// it can, not just the first.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl std::error::Error for CompileReport {}

impl std::fmt::Display for CompileReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for d in &self.diagnostics {
            match (d.line, d.col) {
                (Some(l), Some(c)) => writeln!(f, "{}:{}: [{}] {}", l, c, d.code, d.message)?,
                _ => writeln!(f, "[{}] {}", d.code, d.message)?,
            }
        }
        Ok(())
    }
}

impl CompileReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }
}

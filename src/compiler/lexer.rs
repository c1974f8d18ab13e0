// src/compiler/lexer.rs
// Single-pass byte scanner for the declaration DSL. Produces a flat token
// vector; offsets only, line/column are recovered from spans at report
// time.

use crate::compiler::ast::Span;
use crate::error::LexError;

/// Declaration kind keywords, `#wgsl` through `#define`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MacroKind {
    Wgsl,
    Buffer,
    Texture,
    Sampler,
    BindGroupLayout,
    PipelineLayout,
    RenderPipeline,
    ComputePipeline,
    BindGroup,
    TextureView,
    QuerySet,
    RenderPass,
    ComputePass,
    Queue,
    Init,
    Frame,
    Data,
    Define,
}

pub const MACRO_KIND_COUNT: usize = 18;

impl MacroKind {
    pub fn from_keyword(s: &str) -> Option<Self> {
        Some(match s {
            "wgsl" => MacroKind::Wgsl,
            "buffer" => MacroKind::Buffer,
            "texture" => MacroKind::Texture,
            "sampler" => MacroKind::Sampler,
            "bindGroupLayout" => MacroKind::BindGroupLayout,
            "pipelineLayout" => MacroKind::PipelineLayout,
            "renderPipeline" => MacroKind::RenderPipeline,
            "computePipeline" => MacroKind::ComputePipeline,
            "bindGroup" => MacroKind::BindGroup,
            "textureView" => MacroKind::TextureView,
            "querySet" => MacroKind::QuerySet,
            "renderPass" => MacroKind::RenderPass,
            "computePass" => MacroKind::ComputePass,
            "queue" => MacroKind::Queue,
            "init" => MacroKind::Init,
            "frame" => MacroKind::Frame,
            "data" => MacroKind::Data,
            "define" => MacroKind::Define,
            _ => return None,
        })
    }

    pub fn keyword(self) -> &'static str {
        match self {
            MacroKind::Wgsl => "wgsl",
            MacroKind::Buffer => "buffer",
            MacroKind::Texture => "texture",
            MacroKind::Sampler => "sampler",
            MacroKind::BindGroupLayout => "bindGroupLayout",
            MacroKind::PipelineLayout => "pipelineLayout",
            MacroKind::RenderPipeline => "renderPipeline",
            MacroKind::ComputePipeline => "computePipeline",
            MacroKind::BindGroup => "bindGroup",
            MacroKind::TextureView => "textureView",
            MacroKind::QuerySet => "querySet",
            MacroKind::RenderPass => "renderPass",
            MacroKind::ComputePass => "computePass",
            MacroKind::Queue => "queue",
            MacroKind::Init => "init",
            MacroKind::Frame => "frame",
            MacroKind::Data => "data",
            MacroKind::Define => "define",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokKind {
    Macro(MacroKind),
    Ident,
    Int(i64),
    Float(f64),
    /// Index into `TokenStream::strings` (unescaped).
    Str(u32),
    /// Raw triple-quoted payload, newlines preserved.
    TripleStr(u32),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eq,
    Comma,
    Dot,
    At,
    Eof,
}

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokKind,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
    pub strings: Vec<String>,
}

#[inline]
fn is_alpha(b: u8) -> bool {
    matches!(b, b'a'..=b'z' | b'A'..=b'Z' | b'_')
}

#[inline]
fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

#[inline]
fn is_white(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn err(offset: usize, reason: impl Into<String>) -> LexError {
    LexError {
        offset: offset as u32,
        reason: reason.into(),
    }
}

pub fn lex(src: &str) -> Result<TokenStream, LexError> {
    let bytes = src.as_bytes();
    let n = bytes.len();
    let mut out = TokenStream::default();
    let mut i = 0usize;

    let push = |kind: TokKind, start: usize, end: usize, out: &mut TokenStream| {
        out.tokens.push(Token {
            kind,
            span: Span::new(start as u32, end as u32),
        });
    };

    while i < n {
        let b = bytes[i];

        if is_white(b) {
            i += 1;
            continue;
        }

        // comments
        if b == b'/' && i + 1 < n {
            if bytes[i + 1] == b'/' {
                while i < n && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            if bytes[i + 1] == b'*' {
                let open = i;
                i += 2;
                loop {
                    if i + 1 >= n {
                        return Err(err(open, "unterminated block comment"));
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                continue;
            }
        }

        // macro keyword
        if b == b'#' {
            let start = i;
            i += 1;
            let kw_start = i;
            while i < n && (is_alpha(bytes[i]) || is_digit(bytes[i])) {
                i += 1;
            }
            let kw = &src[kw_start..i];
            match MacroKind::from_keyword(kw) {
                Some(kind) => push(TokKind::Macro(kind), start, i, &mut out),
                None => return Err(err(start, format!("unknown macro keyword `#{kw}`"))),
            }
            continue;
        }

        // strings
        if b == b'"' {
            if i + 2 < n && bytes[i + 1] == b'"' && bytes[i + 2] == b'"' {
                let start = i;
                i += 3;
                let body_start = i;
                loop {
                    if i + 2 >= n {
                        return Err(err(start, "unterminated triple-quoted string"));
                    }
                    if bytes[i] == b'"' && bytes[i + 1] == b'"' && bytes[i + 2] == b'"' {
                        break;
                    }
                    i += 1;
                }
                let id = out.strings.len() as u32;
                out.strings.push(src[body_start..i].to_owned());
                i += 3;
                push(TokKind::TripleStr(id), start, i, &mut out);
                continue;
            }

            let start = i;
            i += 1;
            let mut value = String::new();
            loop {
                if i >= n {
                    return Err(err(start, "unterminated string"));
                }
                match bytes[i] {
                    b'"' => {
                        i += 1;
                        break;
                    }
                    b'\n' => return Err(err(i, "newline in string")),
                    b'\\' => {
                        if i + 1 >= n {
                            return Err(err(start, "unterminated string"));
                        }
                        let esc = bytes[i + 1];
                        value.push(match esc {
                            b'n' => '\n',
                            b't' => '\t',
                            b'r' => '\r',
                            b'\\' => '\\',
                            b'"' => '"',
                            _ => return Err(err(i, format!("invalid escape `\\{}`", esc as char))),
                        });
                        i += 2;
                    }
                    _ => {
                        // multi-byte utf-8 comes through unchanged
                        let ch_len = utf8_len(bytes[i]);
                        value.push_str(&src[i..i + ch_len]);
                        i += ch_len;
                    }
                }
            }
            let id = out.strings.len() as u32;
            out.strings.push(value);
            push(TokKind::Str(id), start, i, &mut out);
            continue;
        }

        // numbers, including a leading sign
        if is_digit(b) || ((b == b'-' || b == b'+') && i + 1 < n && is_digit(bytes[i + 1])) {
            let start = i;
            if b == b'-' || b == b'+' {
                i += 1;
            }
            if i + 1 < n && bytes[i] == b'0' && (bytes[i + 1] == b'x' || bytes[i + 1] == b'X') {
                i += 2;
                let digits = i;
                while i < n && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                if i == digits {
                    return Err(err(start, "hex literal needs digits"));
                }
                let mag = i64::from_str_radix(&src[digits..i], 16)
                    .map_err(|_| err(start, "hex literal out of range"))?;
                let value = if b == b'-' { -mag } else { mag };
                push(TokKind::Int(value), start, i, &mut out);
                continue;
            }
            let mut is_float = false;
            while i < n && is_digit(bytes[i]) {
                i += 1;
            }
            if i + 1 < n && bytes[i] == b'.' && is_digit(bytes[i + 1]) {
                is_float = true;
                i += 1;
                while i < n && is_digit(bytes[i]) {
                    i += 1;
                }
            }
            if i < n && (bytes[i] == b'e' || bytes[i] == b'E') {
                let mut j = i + 1;
                if j < n && (bytes[j] == b'-' || bytes[j] == b'+') {
                    j += 1;
                }
                if j < n && is_digit(bytes[j]) {
                    is_float = true;
                    i = j;
                    while i < n && is_digit(bytes[i]) {
                        i += 1;
                    }
                }
            }
            let text = &src[start..i];
            if is_float {
                let value: f64 = text.parse().map_err(|_| err(start, "bad float literal"))?;
                push(TokKind::Float(value), start, i, &mut out);
            } else {
                let value: i64 = text.parse().map_err(|_| err(start, "int literal out of range"))?;
                push(TokKind::Int(value), start, i, &mut out);
            }
            continue;
        }

        // identifiers; '-' joins only when it glues two word characters
        // (clamp-to-edge, one-minus-src-alpha)
        if is_alpha(b) {
            let start = i;
            i += 1;
            while i < n {
                let c = bytes[i];
                if is_alpha(c) || is_digit(c) {
                    i += 1;
                } else if c == b'-' && i + 1 < n && is_alpha(bytes[i + 1]) {
                    i += 2;
                } else {
                    break;
                }
            }
            push(TokKind::Ident, start, i, &mut out);
            continue;
        }

        let single = match b {
            b'{' => Some(TokKind::LBrace),
            b'}' => Some(TokKind::RBrace),
            b'[' => Some(TokKind::LBracket),
            b']' => Some(TokKind::RBracket),
            b'=' => Some(TokKind::Eq),
            b',' => Some(TokKind::Comma),
            b'.' => Some(TokKind::Dot),
            b'@' => Some(TokKind::At),
            _ => None,
        };
        match single {
            Some(kind) => {
                push(kind, i, i + 1, &mut out);
                i += 1;
            }
            None => return Err(err(i, format!("unrecognized character `{}`", b as char))),
        }
    }

    push(TokKind::Eof, n, n, &mut out);
    Ok(out)
}

#[inline]
fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7F => 1,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        lex(src).unwrap().tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_declaration() {
        let got = kinds("#buffer positions { size=64 usage=[VERTEX] }");
        assert_eq!(
            got,
            vec![
                TokKind::Macro(MacroKind::Buffer),
                TokKind::Ident,
                TokKind::LBrace,
                TokKind::Ident,
                TokKind::Eq,
                TokKind::Int(64),
                TokKind::Ident,
                TokKind::Eq,
                TokKind::LBracket,
                TokKind::Ident,
                TokKind::RBracket,
                TokKind::RBrace,
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn hyphenated_enum_is_one_ident() {
        let ts = lex("mode=clamp-to-edge").unwrap();
        let ident_spans: Vec<&str> = ts
            .tokens
            .iter()
            .filter(|t| t.kind == TokKind::Ident)
            .map(|t| t.span.text("mode=clamp-to-edge"))
            .collect();
        assert_eq!(ident_spans, vec!["mode", "clamp-to-edge"]);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("3")[0], TokKind::Int(3));
        assert_eq!(kinds("-12")[0], TokKind::Int(-12));
        assert_eq!(kinds("0x10")[0], TokKind::Int(16));
        assert_eq!(kinds("0.5")[0], TokKind::Float(0.5));
        assert_eq!(kinds("1e3")[0], TokKind::Float(1000.0));
    }

    #[test]
    fn string_escapes() {
        let ts = lex(r#"s="a\nb""#).unwrap();
        let TokKind::Str(id) = ts.tokens[2].kind else {
            panic!("expected string");
        };
        assert_eq!(ts.strings[id as usize], "a\nb");
    }

    #[test]
    fn triple_string_preserves_newlines() {
        let src = "code=\"\"\"line1\nline2\"\"\"";
        let ts = lex(src).unwrap();
        let TokKind::TripleStr(id) = ts.tokens[2].kind else {
            panic!("expected triple string");
        };
        assert_eq!(ts.strings[id as usize], "line1\nline2");
    }

    #[test]
    fn comments_are_skipped() {
        let got = kinds("a=1 // trailing\n/* block\nblock */ b=2");
        assert_eq!(got.len(), 7); // a = 1 b = 2 eof
    }

    #[test]
    fn lex_failures() {
        assert!(lex("s=\"unterminated").is_err());
        assert!(lex("s=\"bad\\qescape\"").is_err());
        assert!(lex("#nosuchmacro x {}").is_err());
        assert!(lex("a = 1 /* open").is_err());
        assert!(lex("%").is_err());
    }
}

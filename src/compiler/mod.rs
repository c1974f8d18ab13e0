// src/compiler/mod.rs
// The compile pipeline: lex -> parse -> analyze (with reflection) ->
// emit. Errors accumulate into a report; a successful compile still
// carries warnings (reflection failures, W009).

pub mod analyzer;
pub mod ast;
pub mod emitter;
pub mod lexer;
pub mod parser;
pub mod reflect;

use crate::compiler::ast::Span;
use crate::compiler::reflect::{NagaReflector, ReflectionService};
use crate::error::{CompileReport, Diagnostic, Severity};

#[derive(Debug)]
pub struct CompileOutput {
    pub pngb: Vec<u8>,
    pub warnings: Vec<Diagnostic>,
}

/// A compiler instance owns its reflection service; there is no process
/// global state, so instances are independent.
pub struct Compiler {
    reflector: Box<dyn ReflectionService>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            reflector: Box::new(NagaReflector),
        }
    }

    pub fn with_reflector(reflector: Box<dyn ReflectionService>) -> Self {
        Compiler { reflector }
    }

    pub fn compile(&self, source: &str) -> Result<CompileOutput, CompileReport> {
        let tokens = lexer::lex(source).map_err(|e| {
            let (line, col) = Span::new(e.offset, e.offset).line_col(source);
            CompileReport {
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    code: "E-LEX".into(),
                    message: e.to_string(),
                    line: Some(line),
                    col: Some(col),
                }],
            }
        })?;

        let (ast, parse_errors) = parser::parse(source, &tokens);
        if !parse_errors.is_empty() {
            return Err(CompileReport {
                diagnostics: parse_errors
                    .into_iter()
                    .map(|e| {
                        let (line, col) = e.span.line_col(source);
                        Diagnostic {
                            severity: Severity::Error,
                            code: "E-PARSE".into(),
                            message: e.to_string(),
                            line: Some(line),
                            col: Some(col),
                        }
                    })
                    .collect(),
            });
        }

        let analysis = analyzer::analyze(source, &ast, self.reflector.as_ref())
            .map_err(|diagnostics| CompileReport { diagnostics })?;

        let pngb = emitter::emit(&analysis.module).map_err(|message| CompileReport {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                code: "E-EMIT".into(),
                message,
                line: None,
                col: None,
            }],
        })?;

        log::debug!(
            "compiled {} bytes of PNGB ({} warnings)",
            pngb.len(),
            analysis.warnings.len()
        );
        Ok(CompileOutput {
            pngb,
            warnings: analysis.warnings,
        })
    }
}

/// Compile with the default naga-backed reflection service.
pub fn compile(source: &str) -> Result<CompileOutput, CompileReport> {
    Compiler::new().compile(source)
}

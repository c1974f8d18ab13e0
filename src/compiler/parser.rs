// src/compiler/parser.rs
// Recursive descent over macro declarations. Recovery is per declaration:
// a parse error skips ahead to the next `#` keyword so one invocation can
// report several diagnostics.

use crate::compiler::ast::{Ast, NodeId, Span, Tag};
use crate::compiler::lexer::{MacroKind, TokKind, Token, TokenStream};
use crate::error::ParseError;

pub fn parse(src: &str, ts: &TokenStream) -> (Ast, Vec<ParseError>) {
    let mut p = Parser {
        src,
        toks: &ts.tokens,
        pos: 0,
        ast: Ast::new(),
        errors: Vec::new(),
    };
    // string literal ids in tokens index the same table
    p.ast.strings = ts.strings.clone();
    p.run();
    (p.ast, p.errors)
}

struct Parser<'a> {
    src: &'a str,
    toks: &'a [Token],
    pos: usize,
    ast: Ast,
    errors: Vec<ParseError>,
}

impl<'a> Parser<'a> {
    fn run(&mut self) {
        let root = self.ast.root();
        while self.peek().kind != TokKind::Eof {
            match self.parse_decl() {
                Ok(decl) => self.ast.append_child(root, decl),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_next_decl();
                }
            }
        }
    }

    fn peek(&self) -> Token {
        self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let t = self.peek();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn describe(&self, t: Token) -> String {
        match t.kind {
            TokKind::Macro(k) => format!("`#{}`", k.keyword()),
            TokKind::Ident => format!("`{}`", t.span.text(self.src)),
            TokKind::Int(v) => format!("`{v}`"),
            TokKind::Float(v) => format!("`{v}`"),
            TokKind::Str(_) | TokKind::TripleStr(_) => "string".into(),
            TokKind::LBrace => "`{`".into(),
            TokKind::RBrace => "`}`".into(),
            TokKind::LBracket => "`[`".into(),
            TokKind::RBracket => "`]`".into(),
            TokKind::Eq => "`=`".into(),
            TokKind::Comma => "`,`".into(),
            TokKind::Dot => "`.`".into(),
            TokKind::At => "`@`".into(),
            TokKind::Eof => "end of input".into(),
        }
    }

    fn error(&self, expected: &str, found: Token) -> ParseError {
        ParseError {
            span: found.span,
            expected: expected.into(),
            found: self.describe(found),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<Token, ParseError> {
        let t = self.peek();
        if t.kind == TokKind::Ident {
            Ok(self.bump())
        } else {
            Err(self.error(what, t))
        }
    }

    fn expect(&mut self, kind: TokKind, what: &str) -> Result<Token, ParseError> {
        let t = self.peek();
        if t.kind == kind {
            Ok(self.bump())
        } else {
            Err(self.error(what, t))
        }
    }

    fn recover_to_next_decl(&mut self) {
        loop {
            match self.peek().kind {
                TokKind::Eof | TokKind::Macro(_) => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_decl(&mut self) -> Result<NodeId, ParseError> {
        let t = self.peek();
        let TokKind::Macro(kind) = t.kind else {
            return Err(self.error("a `#` declaration keyword", t));
        };
        self.bump();
        let name = self.expect_ident("a declaration name")?;
        let decl = self.ast.push(Tag::Decl(kind), name.span);

        if kind == MacroKind::Define {
            // `#define NAME value` has no braces
            let value = self.parse_value()?;
            self.ast.append_child(decl, value);
            return Ok(decl);
        }

        self.expect(TokKind::LBrace, "`{`")?;
        while self.peek().kind != TokKind::RBrace {
            if self.peek().kind == TokKind::Eof {
                return Err(self.error("`}`", self.peek()));
            }
            if self.peek().kind == TokKind::Comma {
                self.bump();
                continue;
            }
            let prop = self.parse_prop()?;
            self.ast.append_child(decl, prop);
        }
        self.bump(); // `}`
        Ok(decl)
    }

    /// `key = value`, where a dotted key desugars to nested objects:
    /// `primitive.topology = x` is `primitive = { topology = x }`.
    fn parse_prop(&mut self) -> Result<NodeId, ParseError> {
        let first = self.expect_ident("a property name")?;
        let mut segments = vec![first.span];
        while self.peek().kind == TokKind::Dot {
            self.bump();
            let seg = self.expect_ident("a property name after `.`")?;
            segments.push(seg.span);
        }
        self.expect(TokKind::Eq, "`=`")?;
        let value = self.parse_value()?;

        let mut child = value;
        for seg in segments.iter().skip(1).rev() {
            let prop = self.ast.push(Tag::Prop, *seg);
            self.ast.append_child(prop, child);
            let obj = self.ast.push(Tag::Object, *seg);
            self.ast.append_child(obj, prop);
            child = obj;
        }
        let prop = self.ast.push(Tag::Prop, segments[0]);
        self.ast.append_child(prop, child);
        Ok(prop)
    }

    fn parse_value(&mut self) -> Result<NodeId, ParseError> {
        let t = self.peek();
        match t.kind {
            TokKind::Int(v) => {
                self.bump();
                Ok(self.ast.push(Tag::Int(v), t.span))
            }
            TokKind::Float(v) => {
                self.bump();
                Ok(self.ast.push(Tag::Float(v), t.span))
            }
            TokKind::Str(id) | TokKind::TripleStr(id) => {
                self.bump();
                Ok(self.ast.push(Tag::Str(id), t.span))
            }
            TokKind::At => {
                self.bump();
                let name = self.expect_ident("a reference name after `@`")?;
                Ok(self.ast.push(Tag::Ref, name.span))
            }
            TokKind::Ident => {
                self.bump();
                let mut end = t.span.end;
                let mut dotted = false;
                while self.peek().kind == TokKind::Dot {
                    self.bump();
                    let seg = self.expect_ident("an identifier after `.`")?;
                    end = seg.span.end;
                    dotted = true;
                }
                let span = Span::new(t.span.start, end);
                Ok(self
                    .ast
                    .push(if dotted { Tag::DottedIdent } else { Tag::Ident }, span))
            }
            TokKind::LBracket => {
                self.bump();
                let arr = self.ast.push(Tag::Array, t.span);
                loop {
                    match self.peek().kind {
                        TokKind::RBracket => {
                            let close = self.bump();
                            self.ast.nodes[arr as usize].span =
                                Span::new(t.span.start, close.span.end);
                            return Ok(arr);
                        }
                        TokKind::Comma => {
                            self.bump();
                        }
                        TokKind::Eof => return Err(self.error("`]`", self.peek())),
                        _ => {
                            let v = self.parse_value()?;
                            self.ast.append_child(arr, v);
                        }
                    }
                }
            }
            TokKind::LBrace => {
                self.bump();
                let obj = self.ast.push(Tag::Object, t.span);
                loop {
                    match self.peek().kind {
                        TokKind::RBrace => {
                            let close = self.bump();
                            self.ast.nodes[obj as usize].span =
                                Span::new(t.span.start, close.span.end);
                            return Ok(obj);
                        }
                        TokKind::Comma => {
                            self.bump();
                        }
                        TokKind::Eof => return Err(self.error("`}`", self.peek())),
                        _ => {
                            let p = self.parse_prop()?;
                            self.ast.append_child(obj, p);
                        }
                    }
                }
            }
            _ => Err(self.error("a value", t)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::lex;

    fn parse_ok(src: &str) -> Ast {
        let ts = lex(src).unwrap();
        let (ast, errors) = parse(src, &ts);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        ast
    }

    #[test]
    fn declaration_tree_shape() {
        let src = "#buffer b { size=16 usage=[UNIFORM COPY_DST] }";
        let ast = parse_ok(src);
        let decls: Vec<NodeId> = ast.children(ast.root()).collect();
        assert_eq!(decls.len(), 1);
        let decl = ast.node(decls[0]);
        assert_eq!(decl.tag, Tag::Decl(MacroKind::Buffer));
        assert_eq!(decl.span.text(src), "b");
        let props: Vec<NodeId> = ast.children(decls[0]).collect();
        assert_eq!(props.len(), 2);
        assert_eq!(ast.node(props[0]).span.text(src), "size");
        let usage_val = ast.children(props[1]).next().unwrap();
        assert_eq!(ast.node(usage_val).tag, Tag::Array);
        assert_eq!(ast.children(usage_val).count(), 2);
    }

    #[test]
    fn dotted_key_desugars_to_nested_object() {
        let src = "#renderPipeline p { primitive.topology=triangle-list }";
        let ast = parse_ok(src);
        let decl = ast.children(ast.root()).next().unwrap();
        let prop = ast.children(decl).next().unwrap();
        assert_eq!(ast.node(prop).span.text(src), "primitive");
        let obj = ast.children(prop).next().unwrap();
        assert_eq!(ast.node(obj).tag, Tag::Object);
        let inner = ast.children(obj).next().unwrap();
        assert_eq!(ast.node(inner).span.text(src), "topology");
    }

    #[test]
    fn dotted_value_is_a_path() {
        let src = "#buffer b { size=sim.params }";
        let ast = parse_ok(src);
        let decl = ast.children(ast.root()).next().unwrap();
        let prop = ast.children(decl).next().unwrap();
        let value = ast.children(prop).next().unwrap();
        assert_eq!(ast.node(value).tag, Tag::DottedIdent);
        assert_eq!(ast.node(value).span.text(src), "sim.params");
    }

    #[test]
    fn define_has_no_braces() {
        let src = "#define SIZE 256";
        let ast = parse_ok(src);
        let decl = ast.children(ast.root()).next().unwrap();
        assert_eq!(ast.node(decl).tag, Tag::Decl(MacroKind::Define));
        let value = ast.children(decl).next().unwrap();
        assert_eq!(ast.node(value).tag, Tag::Int(256));
    }

    #[test]
    fn error_recovery_reports_both_declarations() {
        let src = "#buffer a { size= } #buffer b { size=[ }";
        let ts = lex(src).unwrap();
        let (_, errors) = parse(src, &ts);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn reference_sigil() {
        let src = "#frame f { passes=[@main] }";
        let ast = parse_ok(src);
        let decl = ast.children(ast.root()).next().unwrap();
        let prop = ast.children(decl).next().unwrap();
        let arr = ast.children(prop).next().unwrap();
        let r = ast.children(arr).next().unwrap();
        assert_eq!(ast.node(r).tag, Tag::Ref);
        assert_eq!(ast.node(r).span.text(src), "main");
    }
}

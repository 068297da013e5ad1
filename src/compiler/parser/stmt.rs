//! Tag statement productions (`{% ... %}`).

use super::*;
use crate::compiler::ast::{Expr, LoopKind, MacroArg, Stmt, SwitchCase};

impl Parser {
    /// Parses one `{% tag ... %}` statement, including its body and end
    /// tag where the grammar has one.
    pub(super) fn parse_tag(&mut self) -> Result<Stmt> {
        let start = self.expect(TokenKind::BlockStart)?;
        let tag = match self.next_token() {
            Some(t) if t.kind == TokenKind::Symbol => t,
            Some(t) => {
                return Err(Error::parse(
                    format!("expected tag name, got {}", t.kind.describe()),
                    t.span,
                ));
            }
            None => {
                return Err(Error::parse("expected tag name, got end of input", self.here()));
            }
        };
        let span = start.span;
        match tag.text.as_str() {
            "if" => self.parse_if(span),
            "for" => self.parse_for(span, LoopKind::Sync),
            "asyncEach" => self.parse_for(span, LoopKind::AsyncEach),
            "asyncAll" => self.parse_for(span, LoopKind::AsyncAll),
            "block" => self.parse_block(span),
            "extends" => {
                let template = self.parse_expression()?;
                self.expect(TokenKind::BlockEnd)?;
                Ok(Stmt::Extends { template, span })
            }
            "include" => self.parse_include(span),
            "import" => self.parse_import(span),
            "from" => self.parse_from_import(span),
            "set" => self.parse_set(span),
            "macro" => self.parse_macro(span),
            "call" => self.parse_call(span),
            "switch" => self.parse_switch(span),
            "elif" | "else" | "case" | "default" | "endif" | "endfor" | "endeach" | "endall"
            | "endblock" | "endset" | "endmacro" | "endcall" | "endswitch" | "endraw" => {
                Err(Error::parse(
                    format!("unexpected tag `{}`", tag.text),
                    tag.span,
                ))
            }
            name => {
                if let Some(ext) = self.extension_tags.get(name).cloned() {
                    return self.parse_extension_tag(name.to_string(), ext, span);
                }
                Err(Error::parse(format!("unknown tag `{}`", name), tag.span))
            }
        }
    }

    fn parse_if(&mut self, span: Span) -> Result<Stmt> {
        let cond = self.parse_expression()?;
        self.expect(TokenKind::BlockEnd)?;
        let body = self.parse_statements(&["elif", "else", "endif"])?;
        let else_body = self.parse_if_tail(span)?;
        Ok(Stmt::If {
            cond,
            body,
            else_body,
            span,
        })
    }

    /// Handles `elif` (as a nested if), `else`, and `endif`.
    fn parse_if_tail(&mut self, span: Span) -> Result<Vec<Stmt>> {
        self.expect(TokenKind::BlockStart)?;
        let tag = self.expect(TokenKind::Symbol)?;
        match tag.text.as_str() {
            "endif" => {
                self.expect(TokenKind::BlockEnd)?;
                Ok(Vec::new())
            }
            "else" => {
                self.expect(TokenKind::BlockEnd)?;
                let body = self.parse_statements(&["endif"])?;
                self.expect_tag("endif")?;
                Ok(body)
            }
            "elif" => {
                let cond = self.parse_expression()?;
                self.expect(TokenKind::BlockEnd)?;
                let body = self.parse_statements(&["elif", "else", "endif"])?;
                let else_body = self.parse_if_tail(span)?;
                Ok(vec![Stmt::If {
                    cond,
                    body,
                    else_body,
                    span: tag.span,
                }])
            }
            other => Err(Error::parse(format!("unexpected tag `{}`", other), tag.span)),
        }
    }

    fn parse_for(&mut self, span: Span, kind: LoopKind) -> Result<Stmt> {
        let mut names = vec![self.expect(TokenKind::Symbol)?.text];
        while self.at(TokenKind::Comma) {
            self.next_token();
            names.push(self.expect(TokenKind::Symbol)?.text);
        }
        self.expect_symbol("in")?;
        let arr = self.parse_expression()?;
        self.expect(TokenKind::BlockEnd)?;

        let (else_tag, end_tag) = match kind {
            LoopKind::Sync => ("else", "endfor"),
            LoopKind::AsyncEach => ("else", "endeach"),
            LoopKind::AsyncAll => ("else", "endall"),
        };
        let body = self.parse_statements(&[else_tag, end_tag])?;
        self.expect(TokenKind::BlockStart)?;
        let tag = self.expect(TokenKind::Symbol)?;
        let else_body = if tag.text == "else" {
            self.expect(TokenKind::BlockEnd)?;
            let body = self.parse_statements(&[end_tag])?;
            self.expect_tag(end_tag)?;
            body
        } else if tag.text == end_tag {
            self.expect(TokenKind::BlockEnd)?;
            Vec::new()
        } else {
            return Err(Error::parse(format!("unexpected tag `{}`", tag.text), tag.span));
        };
        Ok(Stmt::For {
            kind,
            names,
            arr,
            body,
            else_body,
            span,
        })
    }

    fn parse_block(&mut self, span: Span) -> Result<Stmt> {
        let name = self.expect(TokenKind::Symbol)?;
        self.expect(TokenKind::BlockEnd)?;
        self.block_stack.push(name.text.clone());
        let body = self.parse_statements(&["endblock"]);
        self.block_stack.pop();
        let body = body?;
        self.expect(TokenKind::BlockStart)?;
        self.expect_symbol("endblock")?;
        // `{% endblock name %}` is tolerated when the name matches.
        if self.at(TokenKind::Symbol) {
            let end_name = self.expect(TokenKind::Symbol)?;
            if end_name.text != name.text {
                return Err(Error::parse(
                    format!(
                        "mismatched endblock: expected `{}`, got `{}`",
                        name.text, end_name.text
                    ),
                    end_name.span,
                ));
            }
        }
        self.expect(TokenKind::BlockEnd)?;
        Ok(Stmt::Block {
            name: name.text,
            body,
            span,
        })
    }

    fn parse_include(&mut self, span: Span) -> Result<Stmt> {
        let template = self.parse_expression()?;
        let mut ignore_missing = false;
        if self.at_symbol("ignore") {
            self.next_token();
            self.expect_symbol("missing")?;
            ignore_missing = true;
        }
        self.expect(TokenKind::BlockEnd)?;
        Ok(Stmt::Include {
            template,
            ignore_missing,
            span,
        })
    }

    fn parse_import(&mut self, span: Span) -> Result<Stmt> {
        let template = self.parse_expression()?;
        self.expect_symbol("as")?;
        let target = self.expect(TokenKind::Symbol)?.text;
        let with_context = self.parse_context_modifier()?;
        self.expect(TokenKind::BlockEnd)?;
        Ok(Stmt::Import {
            template,
            target,
            with_context,
            span,
        })
    }

    fn parse_from_import(&mut self, span: Span) -> Result<Stmt> {
        let template = self.parse_expression()?;
        self.expect_symbol("import")?;
        let mut names = Vec::new();
        loop {
            let name = self.expect(TokenKind::Symbol)?.text;
            let alias = if self.eat_symbol("as") {
                Some(self.expect(TokenKind::Symbol)?.text)
            } else {
                None
            };
            names.push((name, alias));
            if !self.at(TokenKind::Comma) {
                break;
            }
            self.next_token();
        }
        let with_context = self.parse_context_modifier()?;
        self.expect(TokenKind::BlockEnd)?;
        Ok(Stmt::FromImport {
            template,
            names,
            with_context,
            span,
        })
    }

    /// `with context` / `without context`, defaulting to without.
    fn parse_context_modifier(&mut self) -> Result<bool> {
        if self.eat_symbol("with") {
            self.expect_symbol("context")?;
            Ok(true)
        } else if self.eat_symbol("without") {
            self.expect_symbol("context")?;
            Ok(false)
        } else {
            Ok(false)
        }
    }

    fn parse_set(&mut self, span: Span) -> Result<Stmt> {
        let mut targets = vec![self.expect(TokenKind::Symbol)?.text];
        while self.at(TokenKind::Comma) {
            self.next_token();
            targets.push(self.expect(TokenKind::Symbol)?.text);
        }
        if self.eat_operator("=") {
            let value = self.parse_expression()?;
            self.expect(TokenKind::BlockEnd)?;
            return Ok(Stmt::Set {
                targets,
                value,
                span,
            });
        }
        // `{% set x %}...{% endset %}` captures its body.
        self.expect(TokenKind::BlockEnd)?;
        if targets.len() != 1 {
            return Err(Error::parse("set capture takes exactly one target", span));
        }
        let body = self.parse_statements(&["endset"])?;
        self.expect_tag("endset")?;
        Ok(Stmt::SetCapture {
            target: targets.remove(0),
            body,
            span,
        })
    }

    fn parse_macro(&mut self, span: Span) -> Result<Stmt> {
        let name = self.expect(TokenKind::Symbol)?.text;
        let args = self.parse_signature()?;
        self.expect(TokenKind::BlockEnd)?;
        let body = self.parse_statements(&["endmacro"])?;
        self.expect_tag("endmacro")?;
        Ok(Stmt::Macro {
            name,
            args,
            body,
            span,
        })
    }

    /// `(a, b=default, ...)` in macro definitions and `{% call %}` heads.
    fn parse_signature(&mut self) -> Result<Vec<MacroArg>> {
        self.expect(TokenKind::LeftParen)?;
        let mut args = Vec::new();
        loop {
            if self.at(TokenKind::RightParen) {
                self.next_token();
                return Ok(args);
            }
            if !args.is_empty() {
                self.expect(TokenKind::Comma)?;
            }
            let name = self.expect(TokenKind::Symbol)?;
            let default = if self.eat_operator("=") {
                Some(self.parse_expression()?)
            } else {
                None
            };
            args.push(MacroArg {
                name: name.text,
                default,
                span: name.span,
            });
        }
    }

    fn parse_call(&mut self, span: Span) -> Result<Stmt> {
        let caller_args = if self.at(TokenKind::LeftParen) {
            self.parse_signature()?
        } else {
            Vec::new()
        };
        let call = self.parse_expression()?;
        if !matches!(call, Expr::FunCall { .. }) {
            return Err(Error::parse("expected a macro call after `call`", span));
        }
        self.expect(TokenKind::BlockEnd)?;
        let body = self.parse_statements(&["endcall"])?;
        self.expect_tag("endcall")?;
        Ok(Stmt::Call {
            caller_args,
            call,
            body,
            span,
        })
    }

    fn parse_switch(&mut self, span: Span) -> Result<Stmt> {
        let expr = self.parse_expression()?;
        self.expect(TokenKind::BlockEnd)?;
        // Content before the first case is inert; drop it.
        self.parse_statements(&["case", "default", "endswitch"])?;

        let mut cases = Vec::new();
        let mut default = Vec::new();
        loop {
            self.expect(TokenKind::BlockStart)?;
            let tag = self.expect(TokenKind::Symbol)?;
            match tag.text.as_str() {
                "case" => {
                    let case_expr = self.parse_expression()?;
                    self.expect(TokenKind::BlockEnd)?;
                    let body = self.parse_statements(&["case", "default", "endswitch"])?;
                    cases.push(SwitchCase {
                        expr: case_expr,
                        body,
                        span: tag.span,
                    });
                }
                "default" => {
                    self.expect(TokenKind::BlockEnd)?;
                    default = self.parse_statements(&["case", "endswitch"])?;
                }
                "endswitch" => {
                    self.expect(TokenKind::BlockEnd)?;
                    return Ok(Stmt::Switch {
                        expr,
                        cases,
                        default,
                        span,
                    });
                }
                other => {
                    return Err(Error::parse(format!("unexpected tag `{}`", other), tag.span));
                }
            }
        }
    }

    fn parse_extension_tag(
        &mut self,
        tag: String,
        ext: ExtensionTag,
        span: Span,
    ) -> Result<Stmt> {
        let mut args = Vec::new();
        while !self.at(TokenKind::BlockEnd) {
            if !args.is_empty() {
                self.expect(TokenKind::Comma)?;
            }
            args.push(self.parse_expression()?);
        }
        self.expect(TokenKind::BlockEnd)?;
        let end_tag = format!("end{}", tag);
        let body = self.parse_statements(&[end_tag.as_str()])?;
        self.expect_tag(&end_tag)?;
        Ok(Stmt::CallExtension {
            ext_name: ext.ext_name,
            prop: "run".to_string(),
            args,
            content: Some(body),
            is_async: ext.is_async,
            span,
        })
    }
}

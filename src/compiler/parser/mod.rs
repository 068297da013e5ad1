//! Recursive-descent parser for the template grammar.
//!
//! The parser consumes the lexer's token stream and produces a typed
//! [`Root`] tree. Expression parsing lives in `expr.rs`, tag statements in
//! `stmt.rs`; both extend `impl Parser`. The parser fails fast: the first
//! unexpected token aborts with its span and the expected class.

mod expr;
mod stmt;

use rustc_hash::FxHashMap;

use crate::compiler::ast::{Root, Stmt};
use crate::compiler::lexer::{Lexer, Token};
use crate::compiler::syntax::TokenKind;
use crate::error::{Error, Result, Span};

/// A custom tag contributed by a registered extension.
#[derive(Debug, Clone)]
pub struct ExtensionTag {
    pub ext_name: String,
    pub is_async: bool,
}

/// The template parser.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Names of the blocks currently being parsed, innermost last. Used
    /// to resolve which block a `super()` call refers to.
    block_stack: Vec<String>,
    /// Counter for the temporaries `super()` results bind to.
    super_count: usize,
    /// Custom tag name -> owning extension.
    extension_tags: FxHashMap<String, ExtensionTag>,
}

impl Parser {
    /// Creates a parser over pre-lexed tokens.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            block_stack: Vec::new(),
            super_count: 0,
            extension_tags: FxHashMap::default(),
        }
    }

    /// Lexes and wraps `input`; fails with the lexer's error on bad input.
    pub fn try_from_source(input: &str) -> Result<Self> {
        Ok(Self::new(Lexer::new(input).tokenize()?))
    }

    /// Registers a custom tag handled by an extension.
    pub fn register_tag(&mut self, tag: &str, ext_name: &str, is_async: bool) {
        self.extension_tags.insert(
            tag.to_string(),
            ExtensionTag {
                ext_name: ext_name.to_string(),
                is_async,
            },
        );
    }

    /// Parses the whole token stream into a root node.
    pub fn parse(mut self) -> Result<Root> {
        let body = self.parse_statements(&[])?;
        Ok(Root { body })
    }

    // =========================================================================
    // Token navigation
    // =========================================================================

    pub(super) fn current(&self) -> Option<&Token> {
        self.tokens[self.pos..]
            .iter()
            .find(|t| t.kind != TokenKind::Whitespace)
    }

    /// Advances past whitespace and returns the next meaningful token.
    pub(super) fn next_token(&mut self) -> Option<Token> {
        while let Some(t) = self.tokens.get(self.pos) {
            self.pos += 1;
            if t.kind != TokenKind::Whitespace {
                return Some(t.clone());
            }
        }
        None
    }

    pub(super) fn at(&self, kind: TokenKind) -> bool {
        self.current().is_some_and(|t| t.kind == kind)
    }

    pub(super) fn at_symbol(&self, name: &str) -> bool {
        self.current()
            .is_some_and(|t| t.kind == TokenKind::Symbol && t.text == name)
    }

    pub(super) fn at_operator(&self, op: &str) -> bool {
        self.current()
            .is_some_and(|t| t.kind == TokenKind::Operator && t.text == op)
    }

    /// The span of the current token, or of the end of input.
    pub(super) fn here(&self) -> Span {
        self.current()
            .map(|t| t.span)
            .or_else(|| self.tokens.last().map(|t| t.span))
            .unwrap_or_default()
    }

    pub(super) fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        match self.next_token() {
            Some(t) if t.kind == kind => Ok(t),
            Some(t) => Err(Error::parse(
                format!("expected {}, got {}", kind.describe(), t.kind.describe()),
                t.span,
            )),
            None => Err(Error::parse(
                format!("expected {}, got end of input", kind.describe()),
                self.here(),
            )),
        }
    }

    pub(super) fn expect_symbol(&mut self, name: &str) -> Result<Token> {
        match self.next_token() {
            Some(t) if t.kind == TokenKind::Symbol && t.text == name => Ok(t),
            Some(t) => Err(Error::parse(
                format!("expected `{}`, got `{}`", name, t.text),
                t.span,
            )),
            None => Err(Error::parse(
                format!("expected `{}`, got end of input", name),
                self.here(),
            )),
        }
    }

    /// Consumes the current token when it is the symbol `name`.
    pub(super) fn eat_symbol(&mut self, name: &str) -> bool {
        if self.at_symbol(name) {
            self.next_token();
            true
        } else {
            false
        }
    }

    /// Consumes the current token when it is the operator `op`.
    pub(super) fn eat_operator(&mut self, op: &str) -> bool {
        if self.at_operator(op) {
            self.next_token();
            true
        } else {
            false
        }
    }

    /// The tag name following the current `{%`, without consuming.
    pub(super) fn peek_tag_name(&self) -> Option<String> {
        let mut it = self.tokens[self.pos..]
            .iter()
            .filter(|t| t.kind != TokenKind::Whitespace);
        let first = it.next()?;
        if first.kind != TokenKind::BlockStart {
            return None;
        }
        let second = it.next()?;
        (second.kind == TokenKind::Symbol).then(|| second.text.clone())
    }

    // =========================================================================
    // Statement stream
    // =========================================================================

    /// Parses statements until end of input or until the next tag is one
    /// of `stop_tags` (left unconsumed for the caller).
    pub(super) fn parse_statements(&mut self, stop_tags: &[&str]) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            let Some(token) = self.current() else {
                return Ok(body);
            };
            let token = token.clone();
            match token.kind {
                TokenKind::Text => {
                    self.next_token();
                    body.push(Stmt::TemplateData {
                        text: token.text,
                        span: token.span,
                    });
                }
                TokenKind::CommentStart => {
                    self.next_token();
                    self.expect(TokenKind::CommentEnd)?;
                }
                TokenKind::VariableStart => {
                    self.next_token();
                    let expr = self.parse_expression()?;
                    self.expect(TokenKind::VariableEnd)?;
                    body.push(Stmt::Output {
                        expr,
                        span: token.span,
                    });
                }
                TokenKind::BlockStart => {
                    if let Some(name) = self.peek_tag_name() {
                        if stop_tags.contains(&name.as_str()) {
                            return Ok(body);
                        }
                    }
                    body.push(self.parse_tag()?);
                }
                other => {
                    return Err(Error::parse(
                        format!("unexpected {} outside a tag", other.describe()),
                        token.span,
                    ));
                }
            }
        }
    }

    /// Consumes `{% end<name> %}`-style closers (and `{% else %}` heads).
    pub(super) fn expect_tag(&mut self, name: &str) -> Result<()> {
        self.expect(TokenKind::BlockStart)?;
        self.expect_symbol(name)?;
        self.expect(TokenKind::BlockEnd)?;
        Ok(())
    }
}

//! Lexer for template source.
//!
//! The lexer is a mode-aware scanner. In text mode it emits a single
//! [`TokenKind::Text`] token running up to the next `{{`, `{%` or `{#`
//! delimiter. Inside a tag it emits structured tokens (literals,
//! operators, punctuation) until the matching closer, then falls back to
//! text mode. `{% raw %}...{% endraw %}` collapses to one verbatim text
//! token. `-` markers adjacent to a delimiter trim whitespace on the text
//! side of the delimiter.

#[cfg(test)]
mod tests;

use crate::compiler::syntax::TokenKind;
use crate::error::{Error, Result, Span};

/// A token with its resolved text and source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Resolved text: unescaped contents for strings, raw text otherwise.
    pub text: String,
    pub span: Span,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }
}

/// Scanner mode: outside tags, or inside one of the three tag forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Text,
    Expression,
    Block,
}

/// The template lexer.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    col: usize,
    mode: Mode,
    /// Position where the current tag was opened, for unterminated errors.
    tag_open: Span,
    /// Brace nesting inside a tag, so `}}` inside a dict literal does not
    /// close the expression.
    brace_depth: usize,
    /// Set after a `-` trim closer; the next text token strips its
    /// leading whitespace run.
    trim_next_text: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            col: 0,
            mode: Mode::Text,
            tag_open: Span::new(1, 0),
            brace_depth: 0,
            trim_next_text: false,
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    /// Advances by `n` bytes, tracking line and column.
    fn advance(&mut self, n: usize) {
        for c in self.input[self.pos..self.pos + n].chars() {
            if c == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        self.pos += n;
    }

    /// Tokenizes the entire input, or stops at the first error.
    pub fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while self.pos < self.input.len() {
            match self.mode {
                Mode::Text => self.lex_text(&mut tokens)?,
                Mode::Expression | Mode::Block => self.lex_in_tag(&mut tokens)?,
            }
        }
        if self.mode != Mode::Text {
            return Err(Error::lex("unterminated tag", self.tag_open));
        }
        Ok(tokens)
    }

    // =========================================================================
    // Text mode
    // =========================================================================

    fn lex_text(&mut self, tokens: &mut Vec<Token>) -> Result<()> {
        let start_span = self.span();
        let mut text = String::new();

        while self.pos < self.input.len() {
            let rest = self.remaining();
            if rest.starts_with("{{") || rest.starts_with("{%") || rest.starts_with("{#") {
                break;
            }
            let Some(c) = self.peek() else { break };
            text.push(c);
            self.advance(c.len_utf8());
        }

        if self.trim_next_text {
            text = strip_leading_trim(&text);
            self.trim_next_text = false;
        }

        let rest = self.remaining();
        if rest.is_empty() {
            push_text(tokens, text, start_span);
            return Ok(());
        }

        // A `-` directly after the opener trims the text we just took.
        let opener_span = self.span();
        let trim_open = rest.as_bytes().get(2) == Some(&b'-');
        if trim_open {
            text = strip_trailing_trim(&text);
        }

        if rest.starts_with("{#") {
            push_text(tokens, text, start_span);
            return self.lex_comment(tokens, opener_span, trim_open);
        }

        if rest.starts_with("{%") && self.is_raw_open(trim_open) {
            push_text(tokens, text, start_span);
            return self.lex_raw(tokens, opener_span);
        }

        push_text(tokens, text, start_span);
        if rest.starts_with("{{") {
            tokens.push(Token::new(TokenKind::VariableStart, "{{", opener_span));
            self.mode = Mode::Expression;
        } else {
            tokens.push(Token::new(TokenKind::BlockStart, "{%", opener_span));
            self.mode = Mode::Block;
        }
        self.tag_open = opener_span;
        self.brace_depth = 0;
        self.advance(if trim_open { 3 } else { 2 });
        Ok(())
    }

    fn lex_comment(
        &mut self,
        tokens: &mut Vec<Token>,
        opener_span: Span,
        trim_open: bool,
    ) -> Result<()> {
        tokens.push(Token::new(TokenKind::CommentStart, "{#", opener_span));
        self.advance(if trim_open { 3 } else { 2 });
        loop {
            let rest = self.remaining();
            if rest.is_empty() {
                return Err(Error::lex("unterminated comment", opener_span));
            }
            if rest.starts_with("#}") || rest.starts_with("-#}") {
                let trim_close = rest.starts_with('-');
                let close_span = self.span();
                self.advance(if trim_close { 3 } else { 2 });
                tokens.push(Token::new(TokenKind::CommentEnd, "#}", close_span));
                self.trim_next_text = trim_close;
                return Ok(());
            }
            let Some(c) = self.peek() else {
                return Err(Error::lex("unterminated comment", opener_span));
            };
            self.advance(c.len_utf8());
        }
    }

    /// Looks ahead past `{%` for a `raw` tag without consuming anything.
    fn is_raw_open(&self, trim_open: bool) -> bool {
        let mut rest = &self.remaining()[if trim_open { 3 } else { 2 }..];
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix("raw") {
            let after = after.trim_start();
            after.starts_with("%}") || after.starts_with("-%}")
        } else {
            false
        }
    }

    /// Consumes `{% raw %}...{% endraw %}`, emitting the contents as one
    /// verbatim text token.
    fn lex_raw(&mut self, tokens: &mut Vec<Token>, opener_span: Span) -> Result<()> {
        // Past the `raw` tag closer.
        let rest = self.remaining();
        let open_len = rest
            .find("%}")
            .map(|i| i + 2)
            .ok_or_else(|| Error::lex("unterminated tag", opener_span))?;
        self.advance(open_len);

        let content_start = self.pos;
        let content_span = self.span();
        loop {
            let rest = self.remaining();
            if rest.is_empty() {
                return Err(Error::lex("missing {% endraw %}", opener_span));
            }
            if rest.starts_with("{%") {
                let inner = rest[2..].trim_start_matches('-').trim_start();
                if let Some(after) = inner.strip_prefix("endraw") {
                    let after = after.trim_start();
                    if after.starts_with("%}") || after.starts_with("-%}") {
                        let content = &self.input[content_start..self.pos];
                        tokens.push(Token::new(TokenKind::Text, content, content_span));
                        let Some(close_end) = rest.find("%}") else {
                            return Err(Error::lex("missing {% endraw %}", opener_span));
                        };
                        let close_len = close_end + 2;
                        let trim_close = rest[..close_len].trim_end_matches("%}").ends_with('-');
                        self.advance(close_len);
                        self.trim_next_text = trim_close;
                        return Ok(());
                    }
                }
            }
            let Some(c) = self.peek() else {
                return Err(Error::lex("missing {% endraw %}", opener_span));
            };
            self.advance(c.len_utf8());
        }
    }

    // =========================================================================
    // Tag mode
    // =========================================================================

    fn lex_in_tag(&mut self, tokens: &mut Vec<Token>) -> Result<()> {
        let rest = self.remaining();
        let span = self.span();

        // Whitespace runs are emitted; the parser skips them.
        if self.peek().is_some_and(|c| c.is_whitespace()) {
            let ws: String = rest.chars().take_while(|c| c.is_whitespace()).collect();
            self.advance(ws.len());
            tokens.push(Token::new(TokenKind::Whitespace, ws, span));
            return Ok(());
        }

        // Tag closers, with optional trim marker.
        let (closer, trim) = if rest.starts_with("-}}") || rest.starts_with("-%}") {
            (&rest[1..3], true)
        } else if rest.starts_with("}}") || rest.starts_with("%}") {
            (&rest[..2], false)
        } else {
            ("", false)
        };
        if !closer.is_empty() {
            let closes_expression = closer == "}}";
            if closes_expression && self.brace_depth > 0 {
                // `}}` terminating a nested dict: one brace at a time.
                self.brace_depth -= 1;
                self.advance(1);
                tokens.push(Token::new(TokenKind::RightBrace, "}", span));
                return Ok(());
            }
            match (self.mode, closes_expression) {
                (Mode::Expression, true) | (Mode::Block, false) => {
                    tokens.push(Token::new(
                        if closes_expression {
                            TokenKind::VariableEnd
                        } else {
                            TokenKind::BlockEnd
                        },
                        closer,
                        span,
                    ));
                    self.advance(if trim { 3 } else { 2 });
                    self.mode = Mode::Text;
                    self.trim_next_text = trim;
                    return Ok(());
                }
                _ => {
                    return Err(Error::lex(
                        format!("unexpected `{}` closing the wrong tag", closer),
                        span,
                    ))
                }
            }
        }

        let Some(c) = self.peek() else {
            return Err(Error::lex("unterminated tag", self.tag_open));
        };

        if c == '"' || c == '\'' {
            return self.lex_string(tokens, c);
        }
        if c.is_ascii_digit() {
            return self.lex_number(tokens);
        }
        if c.is_alphabetic() || c == '_' {
            return self.lex_symbol(tokens);
        }

        // Multi-character operators before their prefixes.
        for op in ["//", "**", "==", "!=", "<=", ">="] {
            if rest.starts_with(op) {
                self.advance(2);
                tokens.push(Token::new(TokenKind::Operator, op, span));
                return Ok(());
            }
        }

        let kind = match c {
            '+' | '-' | '*' | '/' | '%' | '=' | '<' | '>' | '.' => TokenKind::Operator,
            '(' => TokenKind::LeftParen,
            ')' => TokenKind::RightParen,
            '[' => TokenKind::LeftBracket,
            ']' => TokenKind::RightBracket,
            '{' => {
                self.brace_depth += 1;
                TokenKind::LeftBrace
            }
            '}' => {
                self.brace_depth = self.brace_depth.saturating_sub(1);
                TokenKind::RightBrace
            }
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '|' => TokenKind::Pipe,
            '~' => TokenKind::Tilde,
            _ => {
                return Err(Error::lex(format!("unexpected character `{}`", c), span));
            }
        };
        self.advance(c.len_utf8());
        tokens.push(Token::new(kind, c.to_string(), span));
        Ok(())
    }

    fn lex_string(&mut self, tokens: &mut Vec<Token>, quote: char) -> Result<()> {
        let open_span = self.span();
        self.advance(1);
        let mut value = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(Error::lex("unterminated string", open_span));
            };
            if c == quote {
                self.advance(1);
                tokens.push(Token::new(TokenKind::Str, value, open_span));
                return Ok(());
            }
            if c == '\\' {
                self.advance(1);
                let Some(esc) = self.peek() else {
                    return Err(Error::lex("unterminated string", open_span));
                };
                let resolved = match esc {
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    'u' => {
                        self.advance(1);
                        let hex = self.remaining().get(..4).ok_or_else(|| {
                            Error::lex("truncated unicode escape", self.span())
                        })?;
                        let code = u32::from_str_radix(hex, 16).map_err(|_| {
                            Error::lex(format!("invalid unicode escape `\\u{}`", hex), self.span())
                        })?;
                        self.advance(4);
                        value.push(char::from_u32(code).ok_or_else(|| {
                            Error::lex(format!("invalid unicode escape `\\u{}`", hex), self.span())
                        })?);
                        continue;
                    }
                    other => {
                        return Err(Error::lex(
                            format!("invalid escape sequence `\\{}`", other),
                            self.span(),
                        ));
                    }
                };
                self.advance(esc.len_utf8());
                value.push(resolved);
                continue;
            }
            self.advance(c.len_utf8());
            value.push(c);
        }
    }

    fn lex_number(&mut self, tokens: &mut Vec<Token>) -> Result<()> {
        let span = self.span();
        let rest = self.remaining();
        let int_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let after = &rest[int_len..];
        let is_float = after.starts_with('.')
            && after[1..].chars().next().is_some_and(|c| c.is_ascii_digit());
        let len = if is_float {
            int_len + 1 + after[1..].chars().take_while(|c| c.is_ascii_digit()).count()
        } else {
            int_len
        };
        let text = &rest[..len];
        self.advance(len);
        tokens.push(Token::new(
            if is_float { TokenKind::Float } else { TokenKind::Int },
            text,
            span,
        ));
        Ok(())
    }

    fn lex_symbol(&mut self, tokens: &mut Vec<Token>) -> Result<()> {
        let span = self.span();
        let rest = self.remaining();
        let len: usize = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .map(|c| c.len_utf8())
            .sum();
        let name = &rest[..len];
        self.advance(len);
        let kind = match name {
            "true" | "false" => TokenKind::Boolean,
            "none" | "null" => TokenKind::None,
            _ => TokenKind::Symbol,
        };
        tokens.push(Token::new(kind, name, span));
        Ok(())
    }
}

fn push_text(tokens: &mut Vec<Token>, text: String, span: Span) {
    if !text.is_empty() {
        tokens.push(Token::new(TokenKind::Text, text, span));
    }
}

/// Strips the trailing whitespace run before a `-` opener: horizontal
/// whitespace, at most one newline, then horizontal whitespace again.
fn strip_trailing_trim(text: &str) -> String {
    let mut s = text.trim_end_matches([' ', '\t', '\r']);
    if let Some(stripped) = s.strip_suffix('\n') {
        s = stripped.trim_end_matches([' ', '\t', '\r']);
    }
    s.to_string()
}

/// Mirror of [`strip_trailing_trim`] for text following a `-` closer.
fn strip_leading_trim(text: &str) -> String {
    let mut s = text.trim_start_matches([' ', '\t', '\r']);
    if let Some(stripped) = s.strip_prefix('\n') {
        s = stripped.trim_start_matches([' ', '\t', '\r']);
    }
    s.to_string()
}

//! Error types for template compilation and rendering.
//!
//! Every error carries the template coordinates it was raised at, so a
//! failure deep inside an included template still points at a line and
//! column in the source that produced it.

use std::fmt;

/// A position in template source. Lines are 1-based, columns 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

impl Span {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// The stage an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Tokenizer failure (unterminated string, stray delimiter, ...).
    Lex,
    /// Parser failure (unexpected token, malformed tag, ...).
    Parse,
    /// Code generator failure (duplicate block, bad call target, ...).
    Compile,
    /// Failure while executing a compiled template.
    Render,
    /// Failure reading template sources.
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lex => "lex error",
            Self::Parse => "parse error",
            Self::Compile => "compile error",
            Self::Render => "render error",
            Self::Io => "io error",
        }
    }
}

/// A template error with span and origin information.
#[derive(Debug, Clone)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Coordinates in the originating template, when known.
    pub span: Option<Span>,
    /// Name of the template the error was raised in, when known.
    pub template_name: Option<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span: None,
            template_name: None,
        }
    }

    pub fn lex(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Lex, message).at(span)
    }

    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Parse, message).at(span)
    }

    pub fn compile(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Compile, message).at(span)
    }

    pub fn render(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Render, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    /// Attaches a source span.
    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches the originating template name. An already-set name wins,
    /// so the innermost template is preserved across re-wrapping.
    pub fn in_template(mut self, name: &str) -> Self {
        if self.template_name.is_none() {
            self.template_name = Some(name.to_string());
        }
        self
    }

    /// Fills in a span if the error does not already carry one. Errors
    /// that already know their coordinates pass through unchanged, so the
    /// innermost source location survives.
    pub fn with_span_fallback(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn is_render(&self) -> bool {
        self.kind == ErrorKind::Render
    }

    /// Formats the error with the offending source line and a caret.
    ///
    /// ```text
    /// parse error: expected end of block, got symbol
    ///  --> greeting.html:2:11
    ///   2 | {% if user %}
    ///     |            ^
    /// ```
    pub fn format_with_source(&self, source: &str) -> String {
        let mut msg = format!("{}: {}\n", self.kind.as_str(), self.message);
        let Some(span) = self.span else {
            return msg;
        };
        let name = self.template_name.as_deref().unwrap_or("input");
        msg.push_str(&format!(" --> {}:{}:{}\n", name, span.line, span.col));

        let lines: Vec<&str> = source.lines().collect();
        if span.line > 0 && span.line <= lines.len() {
            let content = lines[span.line - 1].replace('\t', "    ");
            let width = span.line.to_string().len();
            msg.push_str(&format!("{:>width$} | {}\n", span.line, content.trim_end()));
            msg.push_str(&format!("{:>width$} | {:>col$}^\n", "", "", col = span.col));
        }
        msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)?;
        if let Some(name) = &self.template_name {
            write!(f, " (in {})", name)?;
        }
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_span_and_template() {
        let err = Error::parse("unexpected token", Span::new(3, 7)).in_template("page.html");
        let msg = err.to_string();
        assert!(msg.contains("parse error"));
        assert!(msg.contains("page.html"));
        assert!(msg.contains("3:7"));
    }

    #[test]
    fn span_fallback_does_not_clobber() {
        let err = Error::render("boom").at(Span::new(2, 1));
        let err = err.with_span_fallback(Span::new(9, 9));
        assert_eq!(err.span, Some(Span::new(2, 1)));
    }

    #[test]
    fn inner_template_name_wins() {
        let err = Error::render("boom").in_template("inner.html").in_template("outer.html");
        assert_eq!(err.template_name.as_deref(), Some("inner.html"));
    }

    #[test]
    fn format_with_source_draws_caret() {
        let src = "hello\n{{ oops }\nbye";
        let err = Error::lex("unexpected `}`", Span::new(2, 8));
        let msg = err.format_with_source(src);
        assert!(msg.contains("2 | {{ oops }"));
        assert!(msg.contains("^"));
    }
}

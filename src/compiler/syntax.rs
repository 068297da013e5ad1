//! Token kinds for the template grammar.
//!
//! These are produced by the lexer and consumed by the parser. Tokens are
//! atoms: delimiters, literals, operators and punctuation. Statement
//! keywords (`for`, `endif`, ...) surface as [`TokenKind::Symbol`] and are
//! recognised by the statement parser in block mode only.

/// All token kinds in the template grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Raw template text between tags.
    Text,
    /// `{{` - expression open.
    VariableStart,
    /// `}}` - expression close.
    VariableEnd,
    /// `{%` - block open.
    BlockStart,
    /// `%}` - block close.
    BlockEnd,
    /// `{#` - comment open.
    CommentStart,
    /// `#}` - comment close.
    CommentEnd,
    /// String literal (quotes stripped, escapes resolved).
    Str,
    /// Integer literal.
    Int,
    /// Float literal.
    Float,
    /// `true` / `false`.
    Boolean,
    /// `none` / `null`.
    None,
    /// Identifier or keyword.
    Symbol,
    /// Operator (`+ - * / // % ** == != < > <= >= =`).
    Operator,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `|`
    Pipe,
    /// `~`
    Tilde,
    /// Run of whitespace inside a tag.
    Whitespace,
}

impl TokenKind {
    /// Human-readable name used in parser diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::VariableStart => "`{{`",
            Self::VariableEnd => "`}}`",
            Self::BlockStart => "`{%`",
            Self::BlockEnd => "`%}`",
            Self::CommentStart => "`{#`",
            Self::CommentEnd => "`#}`",
            Self::Str => "string",
            Self::Int => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::None => "none",
            Self::Symbol => "symbol",
            Self::Operator => "operator",
            Self::LeftParen => "`(`",
            Self::RightParen => "`)`",
            Self::LeftBracket => "`[`",
            Self::RightBracket => "`]`",
            Self::LeftBrace => "`{`",
            Self::RightBrace => "`}`",
            Self::Comma => "`,`",
            Self::Colon => "`:`",
            Self::Pipe => "`|`",
            Self::Tilde => "`~`",
            Self::Whitespace => "whitespace",
        }
    }
}

/// Statement keywords recognised in block mode.
///
/// Ordered longest-first so prefix keywords (`endfor` before `for`,
/// `endswitch` before `endset`) never shadow each other when matched
/// against symbol text.
pub const BLOCK_KEYWORDS: &[&str] = &[
    "endswitch", "endmacro", "endblock", "endcall", "endraw", "endfor",
    "endset", "endif", "default", "extends", "include", "import", "switch",
    "macro", "block", "elif", "else", "case", "call", "from", "set", "for",
    "raw", "if", "as", "in", "is", "and", "or", "not",
];

/// Returns true when `name` is a reserved statement keyword.
pub fn is_block_keyword(name: &str) -> bool {
    BLOCK_KEYWORDS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_longest_first_per_stem() {
        // "endfor" must be matched before "for" would be tried.
        let endfor = BLOCK_KEYWORDS.iter().position(|k| *k == "endfor").unwrap();
        let for_ = BLOCK_KEYWORDS.iter().position(|k| *k == "for").unwrap();
        assert!(endfor < for_);
    }

    #[test]
    fn recognises_statement_keywords() {
        assert!(is_block_keyword("extends"));
        assert!(is_block_keyword("endswitch"));
        assert!(!is_block_keyword("loop"));
        assert!(!is_block_keyword("super"));
    }

    #[test]
    fn describe_names_delimiters() {
        assert_eq!(TokenKind::VariableStart.describe(), "`{{`");
        assert_eq!(TokenKind::Pipe.describe(), "`|`");
    }
}

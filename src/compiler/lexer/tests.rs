use super::*;

fn lex(input: &str) -> Vec<Token> {
    Lexer::new(input).tokenize().expect("lexing failed")
}

fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
    tokens
        .iter()
        .map(|t| t.kind)
        .filter(|k| *k != TokenKind::Whitespace)
        .collect()
}

#[test]
fn plain_text_is_one_token() {
    let tokens = lex("hello world");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Text);
    assert_eq!(tokens[0].text, "hello world");
}

#[test]
fn expression_tag_tokens() {
    let tokens = lex("a {{ name }} b");
    assert_eq!(
        kinds(&tokens),
        vec![
            TokenKind::Text,
            TokenKind::VariableStart,
            TokenKind::Symbol,
            TokenKind::VariableEnd,
            TokenKind::Text,
        ]
    );
    assert_eq!(tokens.iter().find(|t| t.kind == TokenKind::Symbol).unwrap().text, "name");
}

#[test]
fn block_tag_tokens() {
    let tokens = lex("{% if x %}");
    assert_eq!(
        kinds(&tokens),
        vec![
            TokenKind::BlockStart,
            TokenKind::Symbol,
            TokenKind::Symbol,
            TokenKind::BlockEnd,
        ]
    );
}

#[test]
fn literal_tokens() {
    let tokens = lex(r#"{{ "hi" 42 3.5 true none }}"#);
    assert_eq!(
        kinds(&tokens),
        vec![
            TokenKind::VariableStart,
            TokenKind::Str,
            TokenKind::Int,
            TokenKind::Float,
            TokenKind::Boolean,
            TokenKind::None,
            TokenKind::VariableEnd,
        ]
    );
}

#[test]
fn string_escapes_resolve() {
    let tokens = lex(r#"{{ "a\nb\t\"c\"" }}"#);
    let s = tokens.iter().find(|t| t.kind == TokenKind::Str).unwrap();
    assert_eq!(s.text, "a\nb\t\"c\"");
}

#[test]
fn unicode_escape_resolves() {
    let tokens = lex(r#"{{ "x\u2028y" }}"#);
    let s = tokens.iter().find(|t| t.kind == TokenKind::Str).unwrap();
    assert_eq!(s.text, "x\u{2028}y");
}

#[test]
fn longest_match_operators() {
    let tokens = lex("{{ a // b ** c <= d == e != f }}");
    let ops: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Operator)
        .map(|t| t.text.as_str())
        .collect();
    assert_eq!(ops, vec!["//", "**", "<=", "==", "!="]);
}

#[test]
fn single_char_operators_and_punctuation() {
    let tokens = lex("{{ (a + b) | f [0] }}");
    assert!(kinds(&tokens).contains(&TokenKind::LeftParen));
    assert!(kinds(&tokens).contains(&TokenKind::Pipe));
    assert!(kinds(&tokens).contains(&TokenKind::LeftBracket));
}

#[test]
fn nested_dict_braces_do_not_close_expression() {
    let tokens = lex(r#"{{ {"a": {"b": 1}} }}"#);
    assert_eq!(tokens.last().unwrap().kind, TokenKind::VariableEnd);
    let rbraces = tokens.iter().filter(|t| t.kind == TokenKind::RightBrace).count();
    assert_eq!(rbraces, 2);
}

#[test]
fn trim_marker_strips_preceding_whitespace() {
    let tokens = lex("a  \n  {{- x }}");
    assert_eq!(tokens[0].text, "a");
}

#[test]
fn trim_marker_strips_following_whitespace() {
    let tokens = lex("{{ x -}}  \n  b");
    assert_eq!(tokens.last().unwrap().text, "b");
}

#[test]
fn trim_marker_keeps_second_newline() {
    let tokens = lex("a\n\n{%- if x %}");
    assert_eq!(tokens[0].text, "a\n");
}

#[test]
fn comments_are_delimited_and_skippable() {
    let tokens = lex("a{# ignore me #}b");
    assert_eq!(
        kinds(&tokens),
        vec![
            TokenKind::Text,
            TokenKind::CommentStart,
            TokenKind::CommentEnd,
            TokenKind::Text,
        ]
    );
}

#[test]
fn raw_block_collapses_to_text() {
    let tokens = lex("{% raw %}{{ not_a_var }}{% endraw %}");
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Text);
    assert_eq!(tokens[0].text, "{{ not_a_var }}");
}

#[test]
fn spans_track_lines_and_columns() {
    let tokens = lex("ab\ncd{{ x }}");
    let start = tokens.iter().find(|t| t.kind == TokenKind::VariableStart).unwrap();
    assert_eq!(start.span, Span::new(2, 2));
    let sym = tokens.iter().find(|t| t.kind == TokenKind::Symbol).unwrap();
    assert_eq!(sym.span, Span::new(2, 5));
}

#[test]
fn unterminated_string_errors_with_span() {
    let err = Lexer::new("{{ \"oops }}").tokenize().unwrap_err();
    assert!(err.message.contains("unterminated string"), "{}", err);
    assert!(err.span.is_some());
}

#[test]
fn unterminated_tag_errors() {
    let err = Lexer::new("text {{ name").tokenize().unwrap_err();
    assert!(err.message.contains("unterminated tag"), "{}", err);
}

#[test]
fn invalid_escape_rejected() {
    let err = Lexer::new(r#"{{ "a\qb" }}"#).tokenize().unwrap_err();
    assert!(err.message.contains("invalid escape"), "{}", err);
}

#[test]
fn minus_before_closer_is_trim_not_operator() {
    let tokens = lex("{{ a -}}x");
    let ops: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Operator)
        .map(|t| t.text.as_str())
        .collect();
    assert!(ops.is_empty());
    assert_eq!(tokens.last().unwrap().text, "x");
}

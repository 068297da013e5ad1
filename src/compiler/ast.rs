//! Abstract syntax tree for templates.
//!
//! The parser produces a [`Node`] tree rooted at [`Node::Root`]. Every
//! node carries the [`Span`] of the source that produced it, which the
//! code generator threads into the IR so render-time failures report
//! template coordinates.

use crate::error::Span;

/// Literal values.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Add,
    /// `~` - string concatenation.
    Concat,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

/// One step of a chained comparison: `<op> <expr>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareOperand {
    pub op: CmpOp,
    pub expr: Expr,
}

/// A `key: value` entry of a dict literal. Keys are symbols or string
/// literals only; the parser enforces this.
#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub key: String,
    pub value: Expr,
    pub span: Span,
}

/// Expression nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },
    Symbol {
        name: String,
        span: Span,
    },
    /// Parenthesised group; kept so the emitter can reproduce it.
    Group {
        inner: Box<Expr>,
        span: Span,
    },
    Array {
        items: Vec<Expr>,
        span: Span,
    },
    Dict {
        pairs: Vec<Pair>,
        span: Span,
    },
    /// Keyword arguments collected from trailing `name=value` in a call.
    /// A dedicated variant rather than a flagged dict, so the marker
    /// cannot be forged or lost.
    KeywordArgs {
        pairs: Vec<Pair>,
        span: Span,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    /// Chained comparison: `a < b <= c`.
    Compare {
        first: Box<Expr>,
        rest: Vec<CompareOperand>,
        span: Span,
    },
    /// `needle in haystack`.
    In {
        needle: Box<Expr>,
        haystack: Box<Expr>,
        negated: bool,
        span: Span,
    },
    /// `value is test(args)`.
    Is {
        value: Box<Expr>,
        test: String,
        args: Vec<Expr>,
        negated: bool,
        span: Span,
    },
    /// `target.name` or `target[expr]`.
    LookupVal {
        target: Box<Expr>,
        val: Box<Expr>,
        span: Span,
    },
    FunCall {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    Filter {
        name: String,
        /// First argument is the piped value.
        args: Vec<Expr>,
        span: Span,
    },
    /// An async filter lifted by the transformer; `symbol` names the
    /// temporary the awaited result is bound to.
    FilterAsync {
        name: String,
        args: Vec<Expr>,
        symbol: String,
        span: Span,
    },
    /// `body if cond else other`.
    InlineIf {
        cond: Box<Expr>,
        body: Box<Expr>,
        else_expr: Option<Box<Expr>>,
        span: Span,
    },
    /// `super()` inside a block body.
    Super {
        block_name: String,
        symbol: String,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Symbol { span, .. }
            | Expr::Group { span, .. }
            | Expr::Array { span, .. }
            | Expr::Dict { span, .. }
            | Expr::KeywordArgs { span, .. }
            | Expr::UnaryOp { span, .. }
            | Expr::BinOp { span, .. }
            | Expr::Compare { span, .. }
            | Expr::In { span, .. }
            | Expr::Is { span, .. }
            | Expr::LookupVal { span, .. }
            | Expr::FunCall { span, .. }
            | Expr::Filter { span, .. }
            | Expr::FilterAsync { span, .. }
            | Expr::InlineIf { span, .. }
            | Expr::Super { span, .. } => *span,
        }
    }

    /// A short name for call-site diagnostics: the symbol or lookup chain
    /// being invoked, or a placeholder for computed callees.
    pub fn debug_name(&self) -> String {
        match self {
            Expr::Symbol { name, .. } => name.clone(),
            Expr::LookupVal { target, val, .. } => {
                if let Expr::Literal {
                    value: Literal::Str(key),
                    ..
                } = &**val
                {
                    format!("{}[\"{}\"]", target.debug_name(), key)
                } else {
                    format!("{}[...]", target.debug_name())
                }
            }
            Expr::Group { inner, .. } => inner.debug_name(),
            _ => "expression".to_string(),
        }
    }
}

/// One `{% case %}` arm of a switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub expr: Expr,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// A macro signature argument: name plus optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct MacroArg {
    pub name: String,
    pub default: Option<Expr>,
    pub span: Span,
}

/// Loop flavour for `for` statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// Plain synchronous iteration.
    Sync,
    /// `asyncEach`: strictly sequential, may suspend per iteration.
    AsyncEach,
    /// `asyncAll`: concurrent iterations, output reassembled in order.
    AsyncAll,
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Raw template text.
    TemplateData {
        text: String,
        span: Span,
    },
    /// `{{ ... }}` output.
    Output {
        expr: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        span: Span,
    },
    Switch {
        expr: Expr,
        cases: Vec<SwitchCase>,
        default: Vec<Stmt>,
        span: Span,
    },
    For {
        kind: LoopKind,
        /// One name, or several for tuple unpacking / key-value pairs.
        names: Vec<String>,
        arr: Expr,
        body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        span: Span,
    },
    /// `{% set a, b = expr %}`.
    Set {
        targets: Vec<String>,
        value: Expr,
        span: Span,
    },
    /// `{% set x %}...{% endset %}`.
    SetCapture {
        target: String,
        body: Vec<Stmt>,
        span: Span,
    },
    Block {
        name: String,
        body: Vec<Stmt>,
        span: Span,
    },
    Extends {
        template: Expr,
        span: Span,
    },
    Include {
        template: Expr,
        ignore_missing: bool,
        span: Span,
    },
    Import {
        template: Expr,
        target: String,
        with_context: bool,
        span: Span,
    },
    FromImport {
        template: Expr,
        /// `(exported name, local alias)` pairs.
        names: Vec<(String, Option<String>)>,
        with_context: bool,
        span: Span,
    },
    Macro {
        name: String,
        args: Vec<MacroArg>,
        body: Vec<Stmt>,
        span: Span,
    },
    /// `{% call [args] macro(...) %}body{% endcall %}`.
    Call {
        caller_args: Vec<MacroArg>,
        call: Expr,
        body: Vec<Stmt>,
        span: Span,
    },
    /// Custom tag handled by a registered extension.
    CallExtension {
        ext_name: String,
        prop: String,
        args: Vec<Expr>,
        content: Option<Vec<Stmt>>,
        is_async: bool,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::TemplateData { span, .. }
            | Stmt::Output { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Set { span, .. }
            | Stmt::SetCapture { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::Extends { span, .. }
            | Stmt::Include { span, .. }
            | Stmt::Import { span, .. }
            | Stmt::FromImport { span, .. }
            | Stmt::Macro { span, .. }
            | Stmt::Call { span, .. }
            | Stmt::CallExtension { span, .. } => *span,
        }
    }
}

/// A parsed template: the root statement list.
#[derive(Debug, Clone, PartialEq)]
pub struct Root {
    pub body: Vec<Stmt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_name_of_lookup_chain() {
        let span = Span::default();
        let expr = Expr::LookupVal {
            target: Box::new(Expr::Symbol {
                name: "user".into(),
                span,
            }),
            val: Box::new(Expr::Literal {
                value: Literal::Str("format".into()),
                span,
            }),
            span,
        };
        assert_eq!(expr.debug_name(), "user[\"format\"]");
    }

    #[test]
    fn cmp_op_text() {
        assert_eq!(CmpOp::Le.as_str(), "<=");
        assert_eq!(CmpOp::Ne.as_str(), "!=");
    }
}

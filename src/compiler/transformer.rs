//! Async-filter transform.
//!
//! A single top-down pass that rewrites every [`Expr::Filter`] whose name
//! is registered as asynchronous into [`Expr::FilterAsync`], binding the
//! awaited result to a fresh temporary symbol. The code generator later
//! hoists one CPS await per lifted filter in front of the statement that
//! uses it; enclosing expressions simply reference the symbol. Subtrees
//! without async filters are left untouched.

use rustc_hash::FxHashSet;

use crate::compiler::ast::{Expr, Root, Stmt, SwitchCase};

/// Rewrites async filter applications in `root`.
pub fn transform(root: &mut Root, async_filters: &FxHashSet<String>) {
    if async_filters.is_empty() {
        return;
    }
    let mut t = Transformer {
        async_filters,
        counter: 0,
    };
    t.walk_stmts(&mut root.body);
}

struct Transformer<'a> {
    async_filters: &'a FxHashSet<String>,
    counter: usize,
}

impl Transformer<'_> {
    fn fresh_symbol(&mut self) -> String {
        self.counter += 1;
        format!("t_await_{}", self.counter)
    }

    fn walk_stmts(&mut self, stmts: &mut [Stmt]) {
        for stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::TemplateData { .. } => {}
            Stmt::Output { expr, .. } => self.walk_expr(expr),
            Stmt::If {
                cond,
                body,
                else_body,
                ..
            } => {
                self.walk_expr(cond);
                self.walk_stmts(body);
                self.walk_stmts(else_body);
            }
            Stmt::Switch {
                expr,
                cases,
                default,
                ..
            } => {
                self.walk_expr(expr);
                for SwitchCase { expr, body, .. } in cases {
                    self.walk_expr(expr);
                    self.walk_stmts(body);
                }
                self.walk_stmts(default);
            }
            Stmt::For {
                arr,
                body,
                else_body,
                ..
            } => {
                self.walk_expr(arr);
                self.walk_stmts(body);
                self.walk_stmts(else_body);
            }
            Stmt::Set { value, .. } => self.walk_expr(value),
            Stmt::SetCapture { body, .. } => self.walk_stmts(body),
            Stmt::Block { body, .. } => self.walk_stmts(body),
            Stmt::Extends { template, .. }
            | Stmt::Include { template, .. }
            | Stmt::Import { template, .. }
            | Stmt::FromImport { template, .. } => self.walk_expr(template),
            Stmt::Macro { args, body, .. } => {
                for arg in args {
                    if let Some(default) = &mut arg.default {
                        self.walk_expr(default);
                    }
                }
                self.walk_stmts(body);
            }
            Stmt::Call { call, body, .. } => {
                self.walk_expr(call);
                self.walk_stmts(body);
            }
            Stmt::CallExtension { args, content, .. } => {
                for arg in args {
                    self.walk_expr(arg);
                }
                if let Some(content) = content {
                    self.walk_stmts(content);
                }
            }
        }
    }

    fn walk_expr(&mut self, expr: &mut Expr) {
        // Children first, so nested async filters lift before the ones
        // that consume their results.
        match expr {
            Expr::Literal { .. } | Expr::Symbol { .. } | Expr::Super { .. } => {}
            Expr::Group { inner, .. } => self.walk_expr(inner),
            Expr::Array { items, .. } => {
                for item in items {
                    self.walk_expr(item);
                }
            }
            Expr::Dict { pairs, .. } | Expr::KeywordArgs { pairs, .. } => {
                for pair in pairs {
                    self.walk_expr(&mut pair.value);
                }
            }
            Expr::UnaryOp { operand, .. } => self.walk_expr(operand),
            Expr::BinOp { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            Expr::Compare { first, rest, .. } => {
                self.walk_expr(first);
                for operand in rest {
                    self.walk_expr(&mut operand.expr);
                }
            }
            Expr::In {
                needle, haystack, ..
            } => {
                self.walk_expr(needle);
                self.walk_expr(haystack);
            }
            Expr::Is { value, args, .. } => {
                self.walk_expr(value);
                for arg in args {
                    self.walk_expr(arg);
                }
            }
            Expr::LookupVal { target, val, .. } => {
                self.walk_expr(target);
                self.walk_expr(val);
            }
            Expr::FunCall { callee, args, .. } => {
                self.walk_expr(callee);
                for arg in args {
                    self.walk_expr(arg);
                }
            }
            Expr::FilterAsync { args, .. } => {
                for arg in args {
                    self.walk_expr(arg);
                }
            }
            Expr::InlineIf {
                cond,
                body,
                else_expr,
                ..
            } => {
                self.walk_expr(cond);
                self.walk_expr(body);
                if let Some(else_expr) = else_expr {
                    self.walk_expr(else_expr);
                }
            }
            Expr::Filter { .. } => {
                self.rewrite_filter(expr);
            }
        }
    }

    fn rewrite_filter(&mut self, expr: &mut Expr) {
        let Expr::Filter { name, args, span } = expr else {
            return;
        };
        for arg in args.iter_mut() {
            self.walk_expr(arg);
        }
        if !self.async_filters.contains(name.as_str()) {
            return;
        }
        *expr = Expr::FilterAsync {
            name: std::mem::take(name),
            args: std::mem::take(args),
            symbol: self.fresh_symbol(),
            span: *span,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::Parser;

    fn transform_source(src: &str, async_names: &[&str]) -> Root {
        let mut root = Parser::try_from_source(src).unwrap().parse().unwrap();
        let names: FxHashSet<String> = async_names.iter().map(|s| s.to_string()).collect();
        transform(&mut root, &names);
        root
    }

    #[test]
    fn sync_filters_are_untouched() {
        let root = transform_source("{{ x | upper }}", &["fetch"]);
        let Stmt::Output { expr, .. } = &root.body[0] else {
            panic!("expected output");
        };
        assert!(matches!(expr, Expr::Filter { .. }));
    }

    #[test]
    fn async_filter_is_lifted() {
        let root = transform_source("{{ x | fetch }}", &["fetch"]);
        let Stmt::Output { expr, .. } = &root.body[0] else {
            panic!("expected output");
        };
        let Expr::FilterAsync { name, symbol, .. } = expr else {
            panic!("expected async filter, got {:?}", expr);
        };
        assert_eq!(name, "fetch");
        assert!(symbol.starts_with("t_await_"));
    }

    #[test]
    fn enclosing_expression_keeps_lifted_node() {
        let root = transform_source("{{ (x | fetch) ~ '!' }}", &["fetch"]);
        let Stmt::Output { expr, .. } = &root.body[0] else {
            panic!("expected output");
        };
        let Expr::BinOp { left, .. } = expr else {
            panic!("expected binop");
        };
        let Expr::Group { inner, .. } = &**left else {
            panic!("expected group");
        };
        assert!(matches!(&**inner, Expr::FilterAsync { .. }));
    }

    #[test]
    fn nested_async_filters_get_distinct_symbols() {
        let root = transform_source("{{ x | fetch | fetch }}", &["fetch"]);
        let Stmt::Output { expr, .. } = &root.body[0] else {
            panic!("expected output");
        };
        let Expr::FilterAsync { symbol: outer, args, .. } = expr else {
            panic!("expected async filter");
        };
        let Expr::FilterAsync { symbol: inner, .. } = &args[0] else {
            panic!("expected nested async filter");
        };
        assert_ne!(outer, inner);
    }

    #[test]
    fn rewrites_inside_statement_bodies() {
        let root = transform_source("{% if a %}{{ b | fetch }}{% endif %}", &["fetch"]);
        let Stmt::If { body, .. } = &root.body[0] else {
            panic!("expected if");
        };
        let Stmt::Output { expr, .. } = &body[0] else {
            panic!("expected output");
        };
        assert!(matches!(expr, Expr::FilterAsync { .. }));
    }
}

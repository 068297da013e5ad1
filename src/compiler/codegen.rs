//! Code generation from the transformed AST to the typed IR.
//!
//! The generator walks the statement tree once, threading a compile-time
//! [`Frame`] that maps template names to generated locals. Statements
//! that contain lifted async filters or `super()` calls get one CPS await
//! hoisted in front of them; the expressions then reference the bound
//! temporaries. Blocks are collected from the whole tree (duplicates are
//! a compile error) and compiled as their own functions after the root.

use std::rc::Rc;

use crate::compiler::ast::{Expr, Literal, LoopKind, MacroArg, Root, Stmt, SwitchCase};
use crate::compiler::frame::Frame;
use crate::compiler::ir::{
    IrBody, IrCase, IrExpr, IrFunction, IrMacroArg, IrProgram, IrStmt,
};
use crate::error::{Error, Result, Span};

/// Compile policies carried by the generator.
#[derive(Debug, Clone, Copy)]
pub struct CodegenOptions {
    /// Escape output values unless marked safe.
    pub autoescape: bool,
    /// Fail renders on undefined output values instead of eliding them.
    pub throw_on_undefined: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            autoescape: true,
            throw_on_undefined: false,
        }
    }
}

/// Generates the IR program for a parsed template.
pub fn generate(root: &Root, opts: CodegenOptions) -> Result<IrProgram> {
    let mut gen = CodeGenerator::new(opts);

    let mut blocks = Vec::new();
    collect_blocks(&root.body, &mut blocks)?;

    let extends_count = count_extends(&root.body);
    if extends_count > 1 {
        if let Some(span) = find_second_extends_span(&root.body) {
            return Err(Error::compile("extends used more than once", span));
        }
    }

    let mut body = vec![IrStmt::Let {
        id: "parentTemplate".to_string(),
        value: IrExpr::Null,
    }];
    gen.compile_stmts(&mut body, &root.body)?;
    body.push(IrStmt::Finish);
    let root_fn = IrFunction {
        name: "root".to_string(),
        body: Rc::new(body),
    };

    let mut block_fns = Vec::new();
    for (name, stmts, _span) in blocks {
        gen.in_block = true;
        gen.frame = Frame::top();
        let mut body = Vec::new();
        gen.compile_stmts(&mut body, stmts)?;
        body.push(IrStmt::Finish);
        block_fns.push((
            name.to_string(),
            IrFunction {
                name: format!("b_{}", name),
                body: Rc::new(body),
            },
        ));
    }

    Ok(IrProgram {
        root: root_fn,
        blocks: block_fns,
    })
}

/// Finds every block in the tree, rejecting duplicate names.
fn collect_blocks<'a>(
    stmts: &'a [Stmt],
    out: &mut Vec<(&'a str, &'a [Stmt], Span)>,
) -> Result<()> {
    for stmt in stmts {
        match stmt {
            Stmt::Block { name, body, span } => {
                if out.iter().any(|(n, _, _)| *n == name.as_str()) {
                    return Err(Error::compile(
                        format!("block `{}` defined twice", name),
                        *span,
                    ));
                }
                out.push((name.as_str(), &body[..], *span));
                collect_blocks(body, out)?;
            }
            Stmt::If {
                body, else_body, ..
            } => {
                collect_blocks(body, out)?;
                collect_blocks(else_body, out)?;
            }
            Stmt::For {
                body, else_body, ..
            } => {
                collect_blocks(body, out)?;
                collect_blocks(else_body, out)?;
            }
            Stmt::Switch { cases, default, .. } => {
                for case in cases {
                    collect_blocks(&case.body, out)?;
                }
                collect_blocks(default, out)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn count_extends(stmts: &[Stmt]) -> usize {
    let mut n = 0;
    walk_extends(stmts, &mut |_| n += 1);
    n
}

fn find_second_extends_span(stmts: &[Stmt]) -> Option<Span> {
    let mut spans = Vec::new();
    walk_extends(stmts, &mut |span| spans.push(span));
    spans.get(1).copied()
}

fn walk_extends(stmts: &[Stmt], f: &mut impl FnMut(Span)) {
    for stmt in stmts {
        match stmt {
            Stmt::Extends { span, .. } => f(*span),
            Stmt::If {
                body, else_body, ..
            } => {
                walk_extends(body, f);
                walk_extends(else_body, f);
            }
            _ => {}
        }
    }
}

struct CodeGenerator {
    opts: CodegenOptions,
    frame: Frame,
    tmp_count: usize,
    in_block: bool,
}

impl CodeGenerator {
    fn new(opts: CodegenOptions) -> Self {
        Self {
            opts,
            frame: Frame::top(),
            tmp_count: 0,
            in_block: false,
        }
    }

    fn tmpid(&mut self) -> String {
        self.tmp_count += 1;
        format!("t_{}", self.tmp_count)
    }

    fn compile_stmts(&mut self, out: &mut Vec<IrStmt>, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.compile_stmt(out, stmt)?;
        }
        Ok(())
    }

    fn compile_body(&mut self, stmts: &[Stmt]) -> Result<IrBody> {
        let mut body = Vec::new();
        self.compile_stmts(&mut body, stmts)?;
        Ok(Rc::new(body))
    }

    fn compile_stmt(&mut self, out: &mut Vec<IrStmt>, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::TemplateData { text, .. } => {
                out.push(IrStmt::Append {
                    value: IrExpr::Str(text.clone()),
                });
            }
            Stmt::Output { expr, span } => {
                self.hoist_awaits(out, expr)?;
                let mut value = self.compile_expr(expr)?;
                if self.opts.throw_on_undefined {
                    value = IrExpr::EnsureDefined {
                        value: Box::new(value),
                        span: *span,
                    };
                }
                out.push(IrStmt::Append {
                    value: IrExpr::Suppress {
                        value: Box::new(value),
                        autoescape: self.opts.autoescape,
                    },
                });
            }
            Stmt::If {
                cond,
                body,
                else_body,
                ..
            } => {
                self.hoist_awaits(out, cond)?;
                let test = self.compile_expr(cond)?;
                let then_body = self.compile_body(body)?;
                let else_body = self.compile_body(else_body)?;
                out.push(IrStmt::If {
                    test,
                    then_body,
                    else_body,
                });
            }
            Stmt::Switch {
                expr,
                cases,
                default,
                ..
            } => {
                self.hoist_awaits(out, expr)?;
                for case in cases {
                    self.hoist_awaits(out, &case.expr)?;
                }
                let subject = self.compile_expr(expr)?;
                let mut ir_cases = Vec::new();
                for SwitchCase { expr, body, .. } in cases {
                    let case_expr = self.compile_expr(expr)?;
                    let case_body = self.compile_body(body)?;
                    ir_cases.push(IrCase {
                        expr: case_expr,
                        // Explicitly empty cases fall through.
                        emit_break: !case_body.is_empty(),
                        body: case_body,
                    });
                }
                let default_body = self.compile_body(default)?;
                out.push(IrStmt::Switch {
                    subject,
                    cases: ir_cases,
                    default_body,
                });
            }
            Stmt::For {
                kind,
                names,
                arr,
                body,
                else_body,
                span,
            } => {
                self.hoist_awaits(out, arr)?;
                let arr = self.compile_expr(arr)?;
                let else_body = self.compile_body(else_body)?;

                self.frame.push(false);
                let ids: Vec<String> = names.iter().map(|_| self.tmpid()).collect();
                for (name, id) in names.iter().zip(&ids) {
                    self.frame.set(name, id, false);
                }
                let body = self.compile_body(body);
                self.frame.pop();
                let body = body?;

                out.push(match kind {
                    LoopKind::Sync => IrStmt::ForIter {
                        names: names.clone(),
                        ids,
                        arr,
                        body,
                        else_body,
                        span: *span,
                    },
                    LoopKind::AsyncEach | LoopKind::AsyncAll => IrStmt::AsyncIter {
                        all: *kind == LoopKind::AsyncAll,
                        names: names.clone(),
                        ids,
                        arr,
                        body,
                        else_body,
                        span: *span,
                    },
                });
            }
            Stmt::Set {
                targets,
                value,
                span: _,
            } => {
                self.hoist_awaits(out, value)?;
                let value = self.compile_expr(value)?;
                let id = self.tmpid();
                out.push(IrStmt::Let {
                    id: id.clone(),
                    value,
                });
                self.bind_set_targets(out, targets, &id);
            }
            Stmt::SetCapture { target, body, .. } => {
                let body = self.compile_body(body)?;
                let id = self.tmpid();
                out.push(IrStmt::Let {
                    id: id.clone(),
                    value: IrExpr::Capture { body },
                });
                self.bind_set_targets(out, std::slice::from_ref(target), &id);
            }
            Stmt::Block { name, span, .. } => {
                out.push(IrStmt::EmitBlock {
                    name: name.clone(),
                    skip_if_parent: !self.in_block,
                    span: *span,
                });
            }
            Stmt::Extends { template, span } => {
                if self.in_block {
                    return Err(Error::compile("extends is not allowed in a block", *span));
                }
                self.hoist_awaits(out, template)?;
                let template = self.compile_expr(template)?;
                out.push(IrStmt::Extends {
                    template,
                    span: *span,
                });
            }
            Stmt::Include {
                template,
                ignore_missing,
                span,
            } => {
                self.hoist_awaits(out, template)?;
                let template = self.compile_expr(template)?;
                out.push(IrStmt::Include {
                    template,
                    ignore_missing: *ignore_missing,
                    span: *span,
                });
            }
            Stmt::Import {
                template,
                target,
                with_context,
                span,
            } => {
                self.hoist_awaits(out, template)?;
                let template = self.compile_expr(template)?;
                let id = self.tmpid();
                out.push(IrStmt::ImportAwait {
                    target: id.clone(),
                    template,
                    with_context: *with_context,
                    span: *span,
                });
                self.bind_import(out, target, &id);
            }
            Stmt::FromImport {
                template,
                names,
                with_context,
                span,
            } => {
                self.hoist_awaits(out, template)?;
                let template = self.compile_expr(template)?;
                let module_id = self.tmpid();
                out.push(IrStmt::ImportAwait {
                    target: module_id.clone(),
                    template,
                    with_context: *with_context,
                    span: *span,
                });
                for (name, alias) in names {
                    let id = self.tmpid();
                    out.push(IrStmt::Let {
                        id: id.clone(),
                        value: IrExpr::ImportedName {
                            module_id: module_id.clone(),
                            name: name.clone(),
                            span: *span,
                        },
                    });
                    let local = alias.as_deref().unwrap_or(name);
                    self.bind_import(out, local, &id);
                }
            }
            Stmt::Macro {
                name,
                args,
                body,
                span,
            } => {
                let id = self.tmpid();
                let (ir_args, body) = self.compile_macro_parts(args, body, true)?;
                out.push(IrStmt::MacroDef {
                    id: id.clone(),
                    name: name.clone(),
                    args: ir_args,
                    body,
                    span: *span,
                });
                self.frame.set(name, &id, false);
                out.push(IrStmt::FrameSet {
                    name: name.clone(),
                    id: id.clone(),
                    resolve_up: false,
                });
                if self.frame.is_top_level() {
                    out.push(IrStmt::ContextSet {
                        name: name.clone(),
                        id: id.clone(),
                    });
                    out.push(IrStmt::ContextExport { name: name.clone() });
                }
            }
            Stmt::Call {
                caller_args,
                call,
                body,
                span,
            } => {
                self.hoist_awaits(out, call)?;
                let (ir_args, caller_body) = self.compile_macro_parts(caller_args, body, false)?;
                let caller = IrExpr::CallerDef {
                    args: ir_args,
                    body: caller_body,
                    span: *span,
                };
                let call = self.compile_call_with_caller(call, caller)?;
                out.push(IrStmt::Append {
                    value: IrExpr::Suppress {
                        value: Box::new(call),
                        autoescape: self.opts.autoescape,
                    },
                });
            }
            Stmt::CallExtension {
                ext_name,
                prop,
                args,
                content,
                is_async,
                span,
            } => {
                for arg in args {
                    self.hoist_awaits(out, arg)?;
                }
                let args = args
                    .iter()
                    .map(|a| self.compile_expr(a))
                    .collect::<Result<Vec<_>>>()?;
                let content = match content {
                    Some(stmts) => Some(self.compile_body(stmts)?),
                    None => None,
                };
                out.push(IrStmt::CallExtension {
                    ext: ext_name.clone(),
                    prop: prop.clone(),
                    args,
                    content,
                    is_async: *is_async,
                    autoescape: self.opts.autoescape,
                    span: *span,
                });
            }
        }
        Ok(())
    }

    /// Shared tail of `set` / `set ... endset`: frame binding plus
    /// context variable and export writes at top level.
    fn bind_set_targets(&mut self, out: &mut Vec<IrStmt>, targets: &[String], id: &str) {
        for target in targets {
            self.frame.set(target, id, true);
            out.push(IrStmt::FrameSet {
                name: target.clone(),
                id: id.to_string(),
                resolve_up: true,
            });
            if self.frame.is_top_level() {
                out.push(IrStmt::ContextSet {
                    name: target.clone(),
                    id: id.to_string(),
                });
                if !target.starts_with('_') {
                    out.push(IrStmt::ContextExport {
                        name: target.clone(),
                    });
                }
            }
        }
    }

    fn bind_import(&mut self, out: &mut Vec<IrStmt>, name: &str, id: &str) {
        self.frame.set(name, id, false);
        out.push(IrStmt::FrameSet {
            name: name.to_string(),
            id: id.to_string(),
            resolve_up: false,
        });
        if self.frame.is_top_level() {
            out.push(IrStmt::ContextSet {
                name: name.to_string(),
                id: id.to_string(),
            });
        }
    }

    /// Compiles a macro or caller signature plus body under a pushed
    /// frame. Macros isolate their frame; callers close over the
    /// enclosing one.
    fn compile_macro_parts(
        &mut self,
        args: &[MacroArg],
        body: &[Stmt],
        isolate: bool,
    ) -> Result<(Vec<IrMacroArg>, IrBody)> {
        self.frame.push(isolate);
        let mut ir_args = Vec::new();
        for arg in args {
            self.frame.set(&arg.name, &format!("l_{}", arg.name), false);
        }
        for arg in args {
            let default = match &arg.default {
                Some(expr) => Some(self.compile_expr(expr)?),
                None => None,
            };
            ir_args.push(IrMacroArg {
                name: arg.name.clone(),
                default,
            });
        }
        let body = self.compile_body(body);
        self.frame.pop();
        Ok((ir_args, body?))
    }

    /// Compiles a `{% call %}` invocation, splicing the caller into the
    /// call's keyword arguments.
    fn compile_call_with_caller(&mut self, call: &Expr, caller: IrExpr) -> Result<IrExpr> {
        let Expr::FunCall { callee, args, span } = call else {
            return Err(Error::compile("expected a macro call", call.span()));
        };
        let compiled = self.compile_expr(callee)?;
        self.check_callable(callee)?;
        let mut ir_args = args
            .iter()
            .map(|a| self.compile_expr(a))
            .collect::<Result<Vec<_>>>()?;
        match ir_args.last_mut() {
            Some(IrExpr::KeywordArgs(pairs)) => {
                pairs.push(("caller".to_string(), caller));
            }
            _ => ir_args.push(IrExpr::KeywordArgs(vec![("caller".to_string(), caller)])),
        }
        Ok(IrExpr::FunCall {
            callee: Box::new(compiled),
            name: callee.debug_name(),
            args: ir_args,
            span: *span,
        })
    }

    // =========================================================================
    // CPS hoisting
    // =========================================================================

    /// Emits one await statement per lifted async filter or `super()`
    /// call in `expr`, innermost first. The expression compiler then
    /// resolves those nodes to their bound temporaries.
    fn hoist_awaits(&mut self, out: &mut Vec<IrStmt>, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal { .. } | Expr::Symbol { .. } => {}
            Expr::Group { inner, .. } => self.hoist_awaits(out, inner)?,
            Expr::Array { items, .. } => {
                for item in items {
                    self.hoist_awaits(out, item)?;
                }
            }
            Expr::Dict { pairs, .. } | Expr::KeywordArgs { pairs, .. } => {
                for pair in pairs {
                    self.hoist_awaits(out, &pair.value)?;
                }
            }
            Expr::UnaryOp { operand, .. } => self.hoist_awaits(out, operand)?,
            Expr::BinOp { left, right, .. } => {
                self.hoist_awaits(out, left)?;
                self.hoist_awaits(out, right)?;
            }
            Expr::Compare { first, rest, .. } => {
                self.hoist_awaits(out, first)?;
                for operand in rest {
                    self.hoist_awaits(out, &operand.expr)?;
                }
            }
            Expr::In {
                needle, haystack, ..
            } => {
                self.hoist_awaits(out, needle)?;
                self.hoist_awaits(out, haystack)?;
            }
            Expr::Is { value, args, .. } => {
                self.hoist_awaits(out, value)?;
                for arg in args {
                    self.hoist_awaits(out, arg)?;
                }
            }
            Expr::LookupVal { target, val, .. } => {
                self.hoist_awaits(out, target)?;
                self.hoist_awaits(out, val)?;
            }
            Expr::FunCall { callee, args, .. } => {
                self.hoist_awaits(out, callee)?;
                for arg in args {
                    self.hoist_awaits(out, arg)?;
                }
            }
            Expr::Filter { args, .. } => {
                for arg in args {
                    self.hoist_awaits(out, arg)?;
                }
            }
            Expr::FilterAsync {
                name,
                args,
                symbol,
                span,
            } => {
                for arg in args {
                    self.hoist_awaits(out, arg)?;
                }
                let args = args
                    .iter()
                    .map(|a| self.compile_expr(a))
                    .collect::<Result<Vec<_>>>()?;
                out.push(IrStmt::FilterAwait {
                    target: symbol.clone(),
                    name: remap_filter_name(name),
                    args,
                    span: *span,
                });
            }
            Expr::InlineIf {
                cond,
                body,
                else_expr,
                ..
            } => {
                self.hoist_awaits(out, cond)?;
                self.hoist_awaits(out, body)?;
                if let Some(else_expr) = else_expr {
                    self.hoist_awaits(out, else_expr)?;
                }
            }
            Expr::Super {
                block_name,
                symbol,
                span,
            } => {
                out.push(IrStmt::SuperAwait {
                    target: symbol.clone(),
                    block_name: block_name.clone(),
                    span: *span,
                });
            }
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn compile_expr(&mut self, expr: &Expr) -> Result<IrExpr> {
        Ok(match expr {
            Expr::Literal { value, .. } => match value {
                Literal::Str(s) => IrExpr::Str(s.clone()),
                Literal::Int(i) => IrExpr::Int(*i),
                Literal::Float(f) => IrExpr::Float(*f),
                Literal::Bool(b) => IrExpr::Bool(*b),
                Literal::None => IrExpr::Null,
            },
            Expr::Symbol { name, .. } => match self.frame.lookup(name) {
                Some(id) => IrExpr::Ident(id.to_string()),
                None => IrExpr::ContextLookup { name: name.clone() },
            },
            Expr::Group { inner, .. } => self.compile_expr(inner)?,
            Expr::Array { items, .. } => IrExpr::Array(
                items
                    .iter()
                    .map(|i| self.compile_expr(i))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Expr::Dict { pairs, .. } => IrExpr::Dict(self.compile_pairs(pairs)?),
            Expr::KeywordArgs { pairs, .. } => {
                IrExpr::KeywordArgs(self.compile_pairs(pairs)?)
            }
            Expr::UnaryOp { op, operand, .. } => IrExpr::Unary {
                op: *op,
                operand: Box::new(self.compile_expr(operand)?),
            },
            Expr::BinOp {
                op,
                left,
                right,
                span,
            } => IrExpr::Binary {
                op: *op,
                left: Box::new(self.compile_expr(left)?),
                right: Box::new(self.compile_expr(right)?),
                span: *span,
            },
            Expr::Compare {
                first, rest, span, ..
            } => IrExpr::Compare {
                first: Box::new(self.compile_expr(first)?),
                rest: rest
                    .iter()
                    .map(|o| Ok((o.op, self.compile_expr(&o.expr)?)))
                    .collect::<Result<Vec<_>>>()?,
                span: *span,
            },
            Expr::In {
                needle,
                haystack,
                negated,
                span,
            } => {
                let op = IrExpr::InOp {
                    needle: Box::new(self.compile_expr(needle)?),
                    haystack: Box::new(self.compile_expr(haystack)?),
                    span: *span,
                };
                if *negated {
                    IrExpr::Unary {
                        op: crate::compiler::ast::UnaryOp::Not,
                        operand: Box::new(op),
                    }
                } else {
                    op
                }
            }
            Expr::Is {
                value,
                test,
                args,
                negated,
                span,
            } => {
                let mut ir_args = vec![self.compile_expr(value)?];
                for arg in args {
                    ir_args.push(self.compile_expr(arg)?);
                }
                let call = IrExpr::TestCall {
                    name: test.clone(),
                    args: ir_args,
                    span: *span,
                };
                if *negated {
                    IrExpr::Unary {
                        op: crate::compiler::ast::UnaryOp::Not,
                        operand: Box::new(call),
                    }
                } else {
                    call
                }
            }
            Expr::LookupVal { target, val, span } => IrExpr::MemberLookup {
                obj: Box::new(self.compile_expr(target)?),
                key: Box::new(self.compile_expr(val)?),
                span: *span,
            },
            Expr::FunCall { callee, args, span } => {
                self.check_callable(callee)?;
                IrExpr::FunCall {
                    callee: Box::new(self.compile_expr(callee)?),
                    name: callee.debug_name(),
                    args: args
                        .iter()
                        .map(|a| self.compile_expr(a))
                        .collect::<Result<Vec<_>>>()?,
                    span: *span,
                }
            }
            Expr::Filter { name, args, span } => IrExpr::FilterCall {
                name: remap_filter_name(name),
                args: args
                    .iter()
                    .map(|a| self.compile_expr(a))
                    .collect::<Result<Vec<_>>>()?,
                span: *span,
            },
            Expr::FilterAsync { symbol, .. } => IrExpr::Ident(symbol.clone()),
            Expr::InlineIf {
                cond,
                body,
                else_expr,
                ..
            } => IrExpr::Cond {
                test: Box::new(self.compile_expr(cond)?),
                cons: Box::new(self.compile_expr(body)?),
                alt: Box::new(match else_expr {
                    Some(e) => self.compile_expr(e)?,
                    None => IrExpr::Undefined,
                }),
            },
            Expr::Super { symbol, .. } => IrExpr::Ident(symbol.clone()),
        })
    }

    fn compile_pairs(
        &mut self,
        pairs: &[crate::compiler::ast::Pair],
    ) -> Result<Vec<(String, IrExpr)>> {
        pairs
            .iter()
            .map(|p| Ok((p.key.clone(), self.compile_expr(&p.value)?)))
            .collect()
    }

    /// Rejects call targets that are known not to be callable before the
    /// template ever runs.
    fn check_callable(&self, callee: &Expr) -> Result<()> {
        if let Expr::Literal { .. } = callee {
            return Err(Error::compile(
                format!("unable to call `{}`: not a function", callee.debug_name()),
                callee.span(),
            ));
        }
        Ok(())
    }
}

/// `default` cannot name an emitted function in the IR's target
/// language; the environment resolves the alias back.
fn remap_filter_name(name: &str) -> String {
    if name == "default" {
        "default_".to_string()
    } else {
        name.to_string()
    }
}

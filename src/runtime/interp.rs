//! The IR evaluator.
//!
//! Executes a compiled program in continuation-passing style: every
//! statement completes into the continuation that runs the remainder of
//! its list, so template loads, async filters, async iteration and async
//! extensions are real suspension points while synchronous work calls
//! its continuation inline. A completion guard makes sure each render
//! callback fires exactly once; callbacks arriving after the first error
//! are discarded.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::compiler::ast::{BinOp, CmpOp, UnaryOp};
use crate::compiler::ir::{IrBody, IrCase, IrExpr, IrStmt};
use crate::environment::Environment;
use crate::error::{Error, Result, Span};
use crate::runtime::context::{BlockRef, Context};
use crate::runtime::frame::Frame;
use crate::runtime::value::{MacroValue, Value};
use crate::runtime::{
    context_or_frame_lookup, copy_safeness, ensure_defined, from_iterator, handle_error,
    in_operator, make_keyword_args, mark_safe, member_lookup, suppress_value, type_name,
};
use crate::template::Template;

/// Callback receiving a finished render.
pub type RenderCallback = Box<dyn FnOnce(Result<String>)>;
/// Continuation for one statement; `Some` short-circuits with an error.
type DoneCallback = Box<dyn FnOnce(Option<Error>)>;
/// Callback receiving an evaluated value.
pub type ValueCallback = Box<dyn FnOnce(Result<Value>)>;

/// One-shot wrapper around a render callback. Late completions are
/// dropped rather than re-invoking the callback.
#[derive(Clone)]
pub struct Completion {
    inner: Rc<RefCell<Option<RenderCallback>>>,
}

impl Completion {
    pub fn new(cb: RenderCallback) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Some(cb))),
        }
    }

    pub fn complete(&self, result: Result<String>) {
        if let Some(cb) = self.inner.borrow_mut().take() {
            cb(result);
        }
    }
}

/// Shared execution state for one emitted function.
#[derive(Clone)]
pub struct Exec {
    env: Environment,
    context: Context,
    frame: Frame,
    vars: Rc<RefCell<FxHashMap<String, Value>>>,
    buffer: Rc<RefCell<String>>,
    parent_template: Rc<RefCell<Option<Rc<Template>>>>,
    current_block: Option<BlockRef>,
    template_name: Option<Rc<str>>,
}

impl Exec {
    fn with_frame(&self, frame: Frame) -> Exec {
        Exec {
            frame,
            ..self.clone()
        }
    }

    fn with_buffer(&self, buffer: Rc<RefCell<String>>) -> Exec {
        Exec {
            buffer,
            ..self.clone()
        }
    }

    fn with_vars(&self, vars: Rc<RefCell<FxHashMap<String, Value>>>) -> Exec {
        Exec {
            vars,
            ..self.clone()
        }
    }

    fn get_var(&self, id: &str) -> Value {
        self.vars
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or(Value::Undefined)
    }

    fn set_var(&self, id: &str, value: Value) {
        self.vars.borrow_mut().insert(id.to_string(), value);
    }

    fn append(&self, text: &str) {
        self.buffer.borrow_mut().push_str(text);
    }

    fn wrap_err(&self, err: Error, span: Span) -> Error {
        handle_error(err, span, self.template_name.as_deref())
    }
}

/// Runs one emitted function (`root` or a block) to completion.
pub fn render_function(
    env: &Environment,
    body: IrBody,
    context: &Context,
    frame: &Frame,
    current_block: Option<BlockRef>,
    template_name: Option<Rc<str>>,
    cb: RenderCallback,
) {
    let exec = Exec {
        env: env.clone(),
        context: context.clone(),
        frame: frame.clone(),
        vars: Rc::new(RefCell::new(FxHashMap::default())),
        buffer: Rc::new(RefCell::new(String::new())),
        parent_template: Rc::new(RefCell::new(None)),
        current_block,
        template_name,
    };
    let completion = Completion::new(cb);
    let done_exec = exec.clone();
    let done_completion = completion.clone();
    exec_stmts(
        exec,
        body,
        0,
        Box::new(move |err| {
            if let Some(e) = err {
                let name = done_exec.template_name.as_deref();
                let e = match name {
                    Some(name) => e.in_template(name),
                    None => e,
                };
                done_completion.complete(Err(e));
                return;
            }
            let parent = done_exec.parent_template.borrow_mut().take();
            match parent {
                // An extends was taken: the child's own output is
                // discarded in favour of the parent chain.
                Some(parent) => {
                    let completion = done_completion.clone();
                    parent.render_in(
                        &done_exec.context,
                        &done_exec.frame,
                        Box::new(move |result| completion.complete(result)),
                    );
                }
                None => {
                    let output = done_exec.buffer.borrow().clone();
                    done_completion.complete(Ok(output));
                }
            }
        }),
    );
}

fn exec_stmts(exec: Exec, body: IrBody, index: usize, done: DoneCallback) {
    let Some(stmt) = body.get(index) else {
        done(None);
        return;
    };
    let stmt = stmt.clone();
    let next_exec = exec.clone();
    exec_stmt(
        exec,
        stmt,
        Box::new(move |err| {
            if err.is_some() {
                done(err);
                return;
            }
            exec_stmts(next_exec, body, index + 1, done);
        }),
    );
}

fn exec_stmt(exec: Exec, stmt: IrStmt, done: DoneCallback) {
    match stmt {
        IrStmt::Let { id, value } | IrStmt::Assign { id, value } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                value,
                Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(v) => {
                        e2.set_var(&id, v);
                        done(None);
                    }
                }),
            );
        }
        IrStmt::Append { value } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                value,
                Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(v) => {
                        e2.append(&v.to_display());
                        done(None);
                    }
                }),
            );
        }
        IrStmt::FrameSet {
            name,
            id,
            resolve_up,
        } => {
            exec.frame.set(&name, exec.get_var(&id), resolve_up);
            done(None);
        }
        IrStmt::ContextSet { name, id } => {
            exec.context.set_variable(&name, exec.get_var(&id));
            done(None);
        }
        IrStmt::ContextExport { name } => {
            exec.context.add_export(&name);
            done(None);
        }
        IrStmt::If {
            test,
            then_body,
            else_body,
        } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                test,
                Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(v) => {
                        let body = if v.is_truthy() { then_body } else { else_body };
                        exec_stmts(e2, body, 0, done);
                    }
                }),
            );
        }
        IrStmt::Switch {
            subject,
            cases,
            default_body,
        } => exec_switch(exec, subject, cases, default_body, done),
        IrStmt::ForIter {
            names,
            ids,
            arr,
            body,
            else_body,
            span,
        } => exec_for(exec, names, ids, arr, body, else_body, span, done),
        IrStmt::AsyncIter {
            all,
            names,
            ids,
            arr,
            body,
            else_body,
            span,
        } => {
            if all {
                exec_async_all(exec, names, ids, arr, body, else_body, span, done);
            } else {
                // asyncEach runs iterations strictly in sequence, which
                // is exactly the synchronous loop's CPS shape.
                exec_for(exec, names, ids, arr, body, else_body, span, done);
            }
        }
        IrStmt::FilterAwait {
            target,
            name,
            args,
            span,
        } => {
            let e2 = exec.clone();
            eval_exprs(
                exec,
                args,
                Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(args) => {
                        let e3 = e2.clone();
                        e2.env.call_filter_async(
                            &name,
                            args,
                            Box::new(move |result| match result {
                                Err(e) => done(Some(e3.wrap_err(e, span))),
                                Ok(v) => {
                                    e3.set_var(&target, v);
                                    done(None);
                                }
                            }),
                        );
                    }
                }),
            );
        }
        IrStmt::SuperAwait {
            target,
            block_name,
            span,
        } => {
            let Some(current) = exec.current_block.clone() else {
                done(Some(
                    Error::render("super() outside of a block").at(span),
                ));
                return;
            };
            let sup = match exec.context.get_super_block(&block_name, &current) {
                Ok(sup) => sup,
                Err(e) => {
                    done(Some(exec.wrap_err(e, span)));
                    return;
                }
            };
            let Some(func) = sup.program.block(&sup.name) else {
                done(Some(
                    Error::render(format!("block `{}` has no implementation", sup.name)).at(span),
                ));
                return;
            };
            let e2 = exec.clone();
            render_function(
                &exec.env,
                func.body.clone(),
                &exec.context,
                &exec.frame,
                Some(sup.clone()),
                exec.template_name.clone(),
                Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(output) => {
                        e2.set_var(&target, mark_safe(Value::str(output)));
                        done(None);
                    }
                }),
            );
        }
        IrStmt::Extends { template, span } => {
            let done = Rc::new(RefCell::new(Some(done)));
            let done_err = Rc::clone(&done);
            eval_template_name(
                exec,
                template,
                span,
                move |exec, name| {
                    let e2 = exec.clone();
                    exec.env.get_template_cb(
                        &name,
                        Box::new(move |result| match result {
                            Err(e) => {
                                if let Some(done) = done.borrow_mut().take() {
                                    done(Some(e2.wrap_err(e, span)));
                                }
                            }
                            Ok(parent) => {
                                // Parent blocks are appended, so overrides
                                // already registered by the child win.
                                for (block_name, _) in &parent.program.blocks {
                                    e2.context.add_block(
                                        block_name,
                                        BlockRef {
                                            program: Rc::clone(&parent.program),
                                            name: block_name.clone(),
                                        },
                                    );
                                }
                                *e2.parent_template.borrow_mut() = Some(parent);
                                if let Some(done) = done.borrow_mut().take() {
                                    done(None);
                                }
                            }
                        }),
                    );
                },
                Box::new(move |e| {
                    if let Some(done) = done_err.borrow_mut().take() {
                        done(Some(e));
                    }
                }),
            );
        }
        IrStmt::Include {
            template,
            ignore_missing,
            span,
        } => exec_include(exec, template, ignore_missing, span, done),
        IrStmt::ImportAwait {
            target,
            template,
            with_context,
            span,
        } => exec_import(exec, target, template, with_context, span, done),
        IrStmt::MacroDef {
            id,
            name,
            args,
            body,
            span,
        } => {
            let value = Value::Macro(Rc::new(MacroValue {
                name,
                args,
                body,
                def_frame: exec.frame.clone(),
                def_context: exec.context.clone(),
                def_vars: None,
                isolate: true,
                span,
            }));
            exec.set_var(&id, value);
            done(None);
        }
        IrStmt::EmitBlock {
            name,
            skip_if_parent,
            span,
        } => {
            if skip_if_parent && exec.parent_template.borrow().is_some() {
                done(None);
                return;
            }
            let block = match exec.context.get_block(&name) {
                Ok(block) => block,
                Err(e) => {
                    done(Some(exec.wrap_err(e, span)));
                    return;
                }
            };
            let Some(func) = block.program.block(&block.name) else {
                done(Some(
                    Error::render(format!("block `{}` has no implementation", name)).at(span),
                ));
                return;
            };
            let e2 = exec.clone();
            render_function(
                &exec.env,
                func.body.clone(),
                &exec.context,
                &exec.frame,
                Some(block.clone()),
                exec.template_name.clone(),
                Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(output) => {
                        e2.append(&output);
                        done(None);
                    }
                }),
            );
        }
        IrStmt::CallExtension {
            ext,
            prop: _,
            args,
            content,
            is_async,
            autoescape,
            span,
        } => exec_call_extension(exec, ext, args, content, is_async, autoescape, span, done),
        IrStmt::Finish => {
            // Function epilogues are handled by render_function once the
            // statement list drains.
            done(None);
        }
    }
}

/// Evaluates a template-name expression and requires a string.
fn eval_template_name(
    exec: Exec,
    expr: IrExpr,
    span: Span,
    then: impl FnOnce(Exec, String) + 'static,
    on_err: Box<dyn FnOnce(Error)>,
) {
    let e2 = exec.clone();
    eval_expr(
        exec,
        expr,
        Box::new(move |result| match result {
            Err(e) => on_err(e),
            Ok(v) => match v.as_str() {
                Some(name) => then(e2, name.to_string()),
                None => on_err(
                    Error::render(format!(
                        "template names must be strings, got {}",
                        type_name(&v)
                    ))
                    .at(span),
                ),
            },
        }),
    );
}

fn exec_switch(
    exec: Exec,
    subject: IrExpr,
    cases: Vec<IrCase>,
    default_body: IrBody,
    done: DoneCallback,
) {
    let e2 = exec.clone();
    eval_expr(
        exec,
        subject,
        Box::new(move |result| match result {
            Err(e) => done(Some(e)),
            Ok(subject) => {
                let exprs: Vec<IrExpr> = cases.iter().map(|c| c.expr.clone()).collect();
                let e3 = e2.clone();
                eval_exprs(
                    e2,
                    exprs,
                    Box::new(move |result| match result {
                        Err(e) => done(Some(e)),
                        Ok(case_values) => {
                            let matched = case_values
                                .iter()
                                .position(|v| v.loose_eq(&subject));
                            // From the matched arm, empty bodies fall
                            // through; the first non-empty body runs and
                            // breaks. No match lands in default.
                            let body = match matched {
                                Some(start) => cases[start..]
                                    .iter()
                                    .map(|c| c.body.clone())
                                    .find(|b| !b.is_empty())
                                    .unwrap_or(default_body),
                                None => default_body,
                            };
                            exec_stmts(e3, body, 0, done);
                        }
                    }),
                );
            }
        }),
    );
}

/// Decomposes an iterable into per-iteration bindings, one vector of
/// values per loop variable.
fn iteration_items(arr: &Value, dim: usize, span: Span) -> Result<Vec<Vec<Value>>> {
    match from_iterator(arr) {
        Value::Array(items) => Ok(items
            .iter()
            .map(|item| {
                if dim == 1 {
                    vec![item.clone()]
                } else {
                    (0..dim)
                        .map(|j| member_lookup(item, &Value::Int(j as i64)))
                        .collect()
                }
            })
            .collect()),
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| {
                let mut bindings = vec![Value::str(k)];
                if dim > 1 {
                    bindings.push(v.clone());
                }
                while bindings.len() < dim {
                    bindings.push(Value::Undefined);
                }
                bindings
            })
            .collect()),
        other => Err(Error::render(format!(
            "cannot iterate over {}",
            type_name(&other)
        ))
        .at(span)),
    }
}

/// The per-iteration `loop` record.
fn loop_record(index: usize, length: usize) -> Value {
    let mut map = IndexMap::new();
    map.insert("index".to_string(), Value::Int(index as i64 + 1));
    map.insert("index0".to_string(), Value::Int(index as i64));
    map.insert(
        "revindex".to_string(),
        Value::Int((length - index) as i64),
    );
    map.insert(
        "revindex0".to_string(),
        Value::Int((length - index) as i64 - 1),
    );
    map.insert("first".to_string(), Value::Bool(index == 0));
    map.insert("last".to_string(), Value::Bool(index + 1 == length));
    map.insert("length".to_string(), Value::Int(length as i64));
    Value::object(map)
}

#[allow(clippy::too_many_arguments)]
fn exec_for(
    exec: Exec,
    names: Vec<String>,
    ids: Vec<String>,
    arr: IrExpr,
    body: IrBody,
    else_body: IrBody,
    span: Span,
    done: DoneCallback,
) {
    let e2 = exec.clone();
    eval_expr(
        exec,
        arr,
        Box::new(move |result| match result {
            Err(e) => done(Some(e)),
            Ok(arr) => {
                let items = match iteration_items(&arr, ids.len(), span) {
                    Ok(items) => items,
                    Err(e) => {
                        done(Some(e));
                        return;
                    }
                };
                if items.is_empty() {
                    exec_stmts(e2, else_body, 0, done);
                    return;
                }
                let loop_exec = e2.with_frame(e2.frame.push(false));
                for_step(
                    loop_exec,
                    Rc::new(names),
                    Rc::new(ids),
                    Rc::new(items),
                    body,
                    0,
                    done,
                );
            }
        }),
    );
}

#[allow(clippy::too_many_arguments)]
fn for_step(
    exec: Exec,
    names: Rc<Vec<String>>,
    ids: Rc<Vec<String>>,
    items: Rc<Vec<Vec<Value>>>,
    body: IrBody,
    index: usize,
    done: DoneCallback,
) {
    let Some(bindings) = items.get(index) else {
        done(None);
        return;
    };
    bind_iteration(&exec, &names, &ids, bindings, index, items.len());
    let next_exec = exec.clone();
    exec_stmts(
        exec,
        body.clone(),
        0,
        Box::new(move |err| {
            if err.is_some() {
                done(err);
                return;
            }
            for_step(next_exec, names, ids, items, body, index + 1, done);
        }),
    );
}

/// Binds one iteration: locals for compiled references, frame entries
/// for nested renders that resolve through `contextOrFrameLookup`, and
/// the `loop` record.
fn bind_iteration(
    exec: &Exec,
    names: &[String],
    ids: &[String],
    bindings: &[Value],
    index: usize,
    length: usize,
) {
    for ((name, id), value) in names.iter().zip(ids).zip(bindings) {
        exec.set_var(id, value.clone());
        exec.frame.set(name, value.clone(), false);
    }
    exec.frame.set("loop", loop_record(index, length), false);
}

#[allow(clippy::too_many_arguments)]
fn exec_async_all(
    exec: Exec,
    names: Vec<String>,
    ids: Vec<String>,
    arr: IrExpr,
    body: IrBody,
    else_body: IrBody,
    span: Span,
    done: DoneCallback,
) {
    let e2 = exec.clone();
    eval_expr(
        exec,
        arr,
        Box::new(move |result| match result {
            Err(e) => done(Some(e)),
            Ok(arr) => {
                let items = match iteration_items(&arr, ids.len(), span) {
                    Ok(items) => items,
                    Err(e) => {
                        done(Some(e));
                        return;
                    }
                };
                if items.is_empty() {
                    exec_stmts(e2, else_body, 0, done);
                    return;
                }
                let length = items.len();
                // Output slots are reassembled in input order however
                // the iterations complete.
                let slots: Rc<RefCell<Vec<Option<String>>>> =
                    Rc::new(RefCell::new(vec![None; length]));
                let pending = Rc::new(Cell::new(length));
                let finished = Rc::new(Cell::new(false));
                let done = Rc::new(RefCell::new(Some(done)));

                for (i, bindings) in items.iter().enumerate() {
                    let iter_exec = e2
                        .with_frame(e2.frame.push(false))
                        .with_buffer(Rc::new(RefCell::new(String::new())))
                        .with_vars(Rc::new(RefCell::new(e2.vars.borrow().clone())));
                    bind_iteration(&iter_exec, &names, &ids, bindings, i, length);
                    let slots = Rc::clone(&slots);
                    let pending = Rc::clone(&pending);
                    let finished = Rc::clone(&finished);
                    let done = Rc::clone(&done);
                    let outer = e2.clone();
                    let buffer = Rc::clone(&iter_exec.buffer);
                    exec_stmts(
                        iter_exec,
                        body.clone(),
                        0,
                        Box::new(move |err| {
                            if finished.get() {
                                return;
                            }
                            if let Some(e) = err {
                                finished.set(true);
                                if let Some(done) = done.borrow_mut().take() {
                                    done(Some(e));
                                }
                                return;
                            }
                            slots.borrow_mut()[i] = Some(buffer.borrow().clone());
                            pending.set(pending.get() - 1);
                            if pending.get() == 0 {
                                finished.set(true);
                                let text: String = slots
                                    .borrow()
                                    .iter()
                                    .map(|s| s.clone().unwrap_or_default())
                                    .collect();
                                outer.append(&text);
                                if let Some(done) = done.borrow_mut().take() {
                                    done(None);
                                }
                            }
                        }),
                    );
                }
            }
        }),
    );
}

fn exec_include(
    exec: Exec,
    template: IrExpr,
    ignore_missing: bool,
    span: Span,
    done: DoneCallback,
) {
    let done = Rc::new(RefCell::new(Some(done)));
    let done_err = Rc::clone(&done);
    eval_template_name(
        exec,
        template,
        span,
        move |exec, name| {
            let e2 = exec.clone();
            let missing_name = name.clone();
            exec.env.get_template_opt_cb(
                &name,
                Box::new(move |result| {
                    let template = match result {
                        Err(e) => {
                            if let Some(done) = done.borrow_mut().take() {
                                done(Some(e2.wrap_err(e, span)));
                            }
                            return;
                        }
                        Ok(None) => {
                            if ignore_missing {
                                if let Some(done) = done.borrow_mut().take() {
                                    done(None);
                                }
                            } else if let Some(done) = done.borrow_mut().take() {
                                done(Some(
                                    e2.wrap_err(
                                        Error::render(format!(
                                            "template not found: {}",
                                            missing_name
                                        )),
                                        span,
                                    ),
                                ));
                            }
                            return;
                        }
                        Ok(Some(t)) => t,
                    };
                    let e3 = e2.clone();
                    let included = Context::new(e2.context.get_variables(), &template.program);
                    template.render_in(
                        &included,
                        &e2.frame,
                        Box::new(move |result| match result {
                            Err(e) => {
                                if let Some(done) = done.borrow_mut().take() {
                                    done(Some(e));
                                }
                            }
                            Ok(output) => {
                                e3.append(&output);
                                if let Some(done) = done.borrow_mut().take() {
                                    done(None);
                                }
                            }
                        }),
                    );
                }),
            );
        },
        Box::new(move |e| {
            if let Some(done) = done_err.borrow_mut().take() {
                done(Some(e));
            }
        }),
    );
}

fn exec_import(
    exec: Exec,
    target: String,
    template: IrExpr,
    with_context: bool,
    span: Span,
    done: DoneCallback,
) {
    let done = Rc::new(RefCell::new(Some(done)));
    let done_err = Rc::clone(&done);
    eval_template_name(
        exec,
        template,
        span,
        move |exec, name| {
            let e2 = exec.clone();
            exec.env.get_template_cb(
                &name,
                Box::new(move |result| {
                    let template = match result {
                        Err(e) => {
                            if let Some(done) = done.borrow_mut().take() {
                                done(Some(e2.wrap_err(e, span)));
                            }
                            return;
                        }
                        Ok(t) => t,
                    };
                    let vars = if with_context {
                        e2.context.get_variables()
                    } else {
                        IndexMap::new()
                    };
                    let frame = if with_context {
                        e2.frame.clone()
                    } else {
                        Frame::new()
                    };
                    let e3 = e2.clone();
                    template.get_exported_in(
                        vars,
                        &frame,
                        Box::new(move |result| match result {
                            Err(e) => {
                                if let Some(done) = done.borrow_mut().take() {
                                    done(Some(e));
                                }
                            }
                            Ok(module) => {
                                e3.set_var(&target, module);
                                if let Some(done) = done.borrow_mut().take() {
                                    done(None);
                                }
                            }
                        }),
                    );
                }),
            );
        },
        Box::new(move |e| {
            if let Some(done) = done_err.borrow_mut().take() {
                done(Some(e));
            }
        }),
    );
}

#[allow(clippy::too_many_arguments)]
fn exec_call_extension(
    exec: Exec,
    ext: String,
    args: Vec<IrExpr>,
    content: Option<IrBody>,
    is_async: bool,
    autoescape: bool,
    span: Span,
    done: DoneCallback,
) {
    let e2 = exec.clone();
    eval_exprs(
        exec,
        args,
        Box::new(move |result| match result {
            Err(e) => done(Some(e)),
            Ok(args) => {
                // Content renders first; the extension receives the
                // finished string.
                let e3 = e2.clone();
                render_optional_body(e2, content, Box::new(move |result| match result {
                    Err(e) => done(Some(e)),
                    Ok(content) => {
                        let extension = match e3.env.get_extension(&ext) {
                            Ok(ext) => ext,
                            Err(e) => {
                                done(Some(e3.wrap_err(e, span)));
                                return;
                            }
                        };
                        let e4 = e3.clone();
                        let finish: ValueCallback = Box::new(move |result| match result {
                            Err(e) => done(Some(e4.wrap_err(e, span))),
                            Ok(v) => {
                                let text = suppress_value(&v, autoescape);
                                e4.append(&text);
                                done(None);
                            }
                        });
                        if is_async {
                            extension.run_async(args, content, finish);
                        } else {
                            finish(extension.run(&args, content.as_deref()));
                        }
                    }
                }));
            }
        }),
    );
}

/// Renders a captured body (if any) into a string.
fn render_optional_body(
    exec: Exec,
    body: Option<IrBody>,
    cb: Box<dyn FnOnce(Result<Option<String>>)>,
) {
    let Some(body) = body else {
        cb(Ok(None));
        return;
    };
    let capture_exec = exec.with_buffer(Rc::new(RefCell::new(String::new())));
    let buffer = Rc::clone(&capture_exec.buffer);
    exec_stmts(
        capture_exec,
        body,
        0,
        Box::new(move |err| match err {
            Some(e) => cb(Err(e)),
            None => cb(Ok(Some(buffer.borrow().clone()))),
        }),
    );
}

// =============================================================================
// Expressions
// =============================================================================

fn eval_exprs(
    exec: Exec,
    exprs: Vec<IrExpr>,
    cb: Box<dyn FnOnce(Result<Vec<Value>>)>,
) {
    eval_exprs_step(exec, exprs.into_iter(), Vec::new(), cb)
}

fn eval_exprs_step(
    exec: Exec,
    mut exprs: std::vec::IntoIter<IrExpr>,
    mut acc: Vec<Value>,
    cb: Box<dyn FnOnce(Result<Vec<Value>>)>,
) {
    let Some(expr) = exprs.next() else {
        cb(Ok(acc));
        return;
    };
    let e2 = exec.clone();
    eval_expr(
        exec,
        expr,
        Box::new(move |result| match result {
            Err(e) => cb(Err(e)),
            Ok(v) => {
                acc.push(v);
                eval_exprs_step(e2, exprs, acc, cb);
            }
        }),
    );
}

fn eval_pairs(
    exec: Exec,
    pairs: Vec<(String, IrExpr)>,
    cb: Box<dyn FnOnce(Result<IndexMap<String, Value>>)>,
) {
    let (keys, exprs): (Vec<String>, Vec<IrExpr>) = pairs.into_iter().unzip();
    eval_exprs(
        exec,
        exprs,
        Box::new(move |result| match result {
            Err(e) => cb(Err(e)),
            Ok(values) => cb(Ok(keys.into_iter().zip(values).collect())),
        }),
    );
}

pub fn eval_expr(exec: Exec, expr: IrExpr, cb: ValueCallback) {
    match expr {
        IrExpr::Undefined => cb(Ok(Value::Undefined)),
        IrExpr::Null => cb(Ok(Value::Null)),
        IrExpr::Bool(b) => cb(Ok(Value::Bool(b))),
        IrExpr::Int(i) => cb(Ok(Value::Int(i))),
        IrExpr::Float(f) => cb(Ok(Value::Float(f))),
        IrExpr::Str(s) => cb(Ok(Value::str(s))),
        IrExpr::Ident(id) => cb(Ok(exec.get_var(&id))),
        IrExpr::ContextLookup { name } => {
            cb(Ok(context_or_frame_lookup(&exec.context, &exec.frame, &name)))
        }
        IrExpr::Array(items) => eval_exprs(
            exec,
            items,
            Box::new(move |result| cb(result.map(Value::array))),
        ),
        IrExpr::Dict(pairs) => eval_pairs(
            exec,
            pairs,
            Box::new(move |result| cb(result.map(Value::object))),
        ),
        IrExpr::KeywordArgs(pairs) => eval_pairs(
            exec,
            pairs,
            Box::new(move |result| cb(result.map(make_keyword_args))),
        ),
        IrExpr::Unary { op, operand } => eval_expr(
            exec,
            *operand,
            Box::new(move |result| match result {
                Err(e) => cb(Err(e)),
                Ok(v) => cb(Ok(eval_unary(op, &v))),
            }),
        ),
        IrExpr::Binary {
            op,
            left,
            right,
            span,
        } => eval_binary(exec, op, *left, *right, span, cb),
        IrExpr::Compare { first, rest, .. } => eval_compare(exec, *first, rest, cb),
        IrExpr::InOp {
            needle,
            haystack,
            span,
        } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                *needle,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(needle) => eval_expr(
                        e2,
                        *haystack,
                        Box::new(move |result| match result {
                            Err(e) => cb(Err(e)),
                            Ok(haystack) => cb(in_operator(&needle, &haystack)
                                .map(Value::Bool)
                                .map_err(|e| e.at(span))),
                        }),
                    ),
                }),
            );
        }
        IrExpr::Cond { test, cons, alt } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                *test,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(test) => {
                        let branch = if test.is_truthy() { cons } else { alt };
                        eval_expr(e2, *branch, cb);
                    }
                }),
            );
        }
        IrExpr::MemberLookup { obj, key, .. } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                *obj,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(obj) => eval_expr(
                        e2,
                        *key,
                        Box::new(move |result| match result {
                            Err(e) => cb(Err(e)),
                            Ok(key) => cb(Ok(member_lookup(&obj, &key))),
                        }),
                    ),
                }),
            );
        }
        IrExpr::FunCall {
            callee,
            name,
            args,
            span,
        } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                *callee,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(callee) => {
                        let e3 = e2.clone();
                        eval_exprs(
                            e2,
                            args,
                            Box::new(move |result| match result {
                                Err(e) => cb(Err(e)),
                                Ok(args) => call_value(e3, callee, name, args, span, cb),
                            }),
                        );
                    }
                }),
            );
        }
        IrExpr::FilterCall { name, args, span } => {
            let e2 = exec.clone();
            eval_exprs(
                exec,
                args,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(args) => match e2.env.call_filter(&name, &args) {
                        Ok(v) => cb(Ok(v)),
                        Err(e) => cb(Err(e2.wrap_err(e, span))),
                    },
                }),
            );
        }
        IrExpr::TestCall { name, args, span } => {
            let e2 = exec.clone();
            eval_exprs(
                exec,
                args,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(args) => match e2.env.call_test(&name, &args) {
                        Ok(v) => cb(Ok(Value::Bool(v))),
                        Err(e) => cb(Err(e2.wrap_err(e, span))),
                    },
                }),
            );
        }
        IrExpr::Suppress { value, autoescape } => eval_expr(
            exec,
            *value,
            Box::new(move |result| match result {
                Err(e) => cb(Err(e)),
                Ok(v) => cb(Ok(Value::str(suppress_value(&v, autoescape)))),
            }),
        ),
        IrExpr::EnsureDefined { value, span } => eval_expr(
            exec,
            *value,
            Box::new(move |result| match result {
                Err(e) => cb(Err(e)),
                Ok(v) => cb(ensure_defined(v, span)),
            }),
        ),
        IrExpr::MarkSafe(value) => eval_expr(
            exec,
            *value,
            Box::new(move |result| cb(result.map(mark_safe))),
        ),
        IrExpr::CopySafeness { of, value } => {
            let e2 = exec.clone();
            eval_expr(
                exec,
                *of,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(of) => eval_expr(
                        e2,
                        *value,
                        Box::new(move |result| match result {
                            Err(e) => cb(Err(e)),
                            Ok(v) => cb(Ok(copy_safeness(&of, v))),
                        }),
                    ),
                }),
            );
        }
        IrExpr::Capture { body } => {
            let capture_exec = exec.with_buffer(Rc::new(RefCell::new(String::new())));
            let buffer = Rc::clone(&capture_exec.buffer);
            exec_stmts(
                capture_exec,
                body,
                0,
                Box::new(move |err| match err {
                    Some(e) => cb(Err(e)),
                    None => cb(Ok(Value::str(buffer.borrow().clone()))),
                }),
            );
        }
        IrExpr::CallerDef { args, body, span } => {
            cb(Ok(Value::Macro(Rc::new(MacroValue {
                name: "caller".to_string(),
                args,
                body,
                def_frame: exec.frame.clone(),
                def_context: exec.context.clone(),
                def_vars: Some(Rc::clone(&exec.vars)),
                isolate: false,
                span,
            }))))
        }
        IrExpr::ImportedName {
            module_id,
            name,
            span,
        } => {
            let module = exec.get_var(&module_id);
            match &module {
                Value::Object(map) => match map.get(&name) {
                    Some(v) => cb(Ok(v.clone())),
                    None => cb(Err(exec.wrap_err(
                        Error::render(format!("cannot import '{}'", name)),
                        span,
                    ))),
                },
                _ => cb(Err(exec.wrap_err(
                    Error::render(format!("cannot import '{}'", name)),
                    span,
                ))),
            }
        }
    }
}

fn eval_unary(op: UnaryOp, v: &Value) -> Value {
    match op {
        UnaryOp::Not => Value::Bool(!v.is_truthy()),
        UnaryOp::Neg => match v {
            Value::Int(i) => Value::Int(-i),
            other => match other.as_number() {
                Some(n) => Value::Float(-n),
                None => Value::Float(f64::NAN),
            },
        },
        UnaryOp::Pos => match v {
            Value::Int(_) | Value::Float(_) => v.clone(),
            other => match other.as_number() {
                Some(n) => Value::Float(n),
                None => Value::Float(f64::NAN),
            },
        },
    }
}

fn eval_binary(
    exec: Exec,
    op: BinOp,
    left: IrExpr,
    right: IrExpr,
    span: Span,
    cb: ValueCallback,
) {
    let e2 = exec.clone();
    eval_expr(
        exec,
        left,
        Box::new(move |result| match result {
            Err(e) => cb(Err(e)),
            Ok(l) => match op {
                // Logical operators yield their operands.
                BinOp::And if !l.is_truthy() => cb(Ok(l)),
                BinOp::Or if l.is_truthy() => cb(Ok(l)),
                BinOp::And | BinOp::Or => eval_expr(e2, right, cb),
                _ => eval_expr(
                    e2,
                    right,
                    Box::new(move |result| match result {
                        Err(e) => cb(Err(e)),
                        Ok(r) => cb(eval_arith(op, &l, &r, span)),
                    }),
                ),
            },
        }),
    );
}

fn eval_arith(op: BinOp, l: &Value, r: &Value, span: Span) -> Result<Value> {
    let type_error = || {
        Err(Error::render(format!(
            "cannot apply `{:?}` to {} and {}",
            op,
            type_name(l),
            type_name(r)
        ))
        .at(span))
    };
    match op {
        BinOp::Add => {
            // String concatenation wins when either side is a string.
            if l.as_str().is_some() || r.as_str().is_some() {
                return Ok(Value::str(format!("{}{}", l.to_display(), r.to_display())));
            }
            match (l, r) {
                (Value::Int(a), Value::Int(b)) => Ok(match a.checked_add(*b) {
                    Some(n) => Value::Int(n),
                    None => Value::Float(*a as f64 + *b as f64),
                }),
                _ => match (l.as_number(), r.as_number()) {
                    (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                    _ => type_error(),
                },
            }
        }
        BinOp::Concat => Ok(Value::str(format!(
            "{}{}",
            l.to_display(),
            r.to_display()
        ))),
        BinOp::Sub => int_or_float(l, r, span, op, |a, b| a.checked_sub(b), |a, b| a - b),
        BinOp::Mul => int_or_float(l, r, span, op, |a, b| a.checked_mul(b), |a, b| a * b),
        BinOp::Div => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Float(a / b)),
            _ => type_error(),
        },
        BinOp::FloorDiv => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => {
                let v = (a / b).floor();
                if v.is_finite() {
                    Ok(Value::Int(v as i64))
                } else {
                    Ok(Value::Float(v))
                }
            }
            _ => type_error(),
        },
        BinOp::Mod => match (l, r) {
            (Value::Int(a), Value::Int(b)) if *b != 0 => Ok(Value::Int(a % b)),
            _ => match (l.as_number(), r.as_number()) {
                (Some(a), Some(b)) => Ok(Value::Float(a % b)),
                _ => type_error(),
            },
        },
        BinOp::Pow => match (l, r) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 && *b <= u32::MAX as i64 => {
                match a.checked_pow(*b as u32) {
                    Some(n) => Ok(Value::Int(n)),
                    None => Ok(Value::Float((*a as f64).powf(*b as f64))),
                }
            }
            _ => match (l.as_number(), r.as_number()) {
                (Some(a), Some(b)) => Ok(Value::Float(a.powf(b))),
                _ => type_error(),
            },
        },
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval_binary"),
    }
}

fn int_or_float(
    l: &Value,
    r: &Value,
    span: Span,
    op: BinOp,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Ok(match int_op(*a, *b) {
            Some(n) => Value::Int(n),
            None => Value::Float(float_op(*a as f64, *b as f64)),
        }),
        _ => match (l.as_number(), r.as_number()) {
            (Some(a), Some(b)) => Ok(Value::Float(float_op(a, b))),
            _ => Err(Error::render(format!(
                "cannot apply `{:?}` to {} and {}",
                op,
                type_name(l),
                type_name(r)
            ))
            .at(span)),
        },
    }
}

fn eval_compare(exec: Exec, first: IrExpr, rest: Vec<(CmpOp, IrExpr)>, cb: ValueCallback) {
    let (ops, exprs): (Vec<CmpOp>, Vec<IrExpr>) = rest.into_iter().unzip();
    let e2 = exec.clone();
    eval_expr(
        exec,
        first,
        Box::new(move |result| match result {
            Err(e) => cb(Err(e)),
            Ok(first) => eval_exprs(
                e2,
                exprs,
                Box::new(move |result| match result {
                    Err(e) => cb(Err(e)),
                    Ok(values) => {
                        let mut left = first;
                        for (op, right) in ops.into_iter().zip(values) {
                            let holds = match op {
                                CmpOp::Eq => left.loose_eq(&right),
                                CmpOp::Ne => !left.loose_eq(&right),
                                CmpOp::Lt => matches!(
                                    left.compare(&right),
                                    Some(std::cmp::Ordering::Less)
                                ),
                                CmpOp::Gt => matches!(
                                    left.compare(&right),
                                    Some(std::cmp::Ordering::Greater)
                                ),
                                CmpOp::Le => matches!(
                                    left.compare(&right),
                                    Some(
                                        std::cmp::Ordering::Less
                                            | std::cmp::Ordering::Equal
                                    )
                                ),
                                CmpOp::Ge => matches!(
                                    left.compare(&right),
                                    Some(
                                        std::cmp::Ordering::Greater
                                            | std::cmp::Ordering::Equal
                                    )
                                ),
                            };
                            if !holds {
                                cb(Ok(Value::Bool(false)));
                                return;
                            }
                            left = right;
                        }
                        cb(Ok(Value::Bool(true)));
                    }
                }),
            ),
        }),
    );
}

/// Dispatches a call target: macros render their bodies, native
/// functions run directly, anything else is a render error.
pub fn call_value(
    exec: Exec,
    callee: Value,
    name: String,
    args: Vec<Value>,
    span: Span,
    cb: ValueCallback,
) {
    match callee {
        Value::Macro(m) => call_macro(exec, m, args, cb),
        Value::Func(_, f) => {
            let result = f(&args).map_err(|e| exec.wrap_err(e, span));
            cb(result);
        }
        other => cb(Err(exec.wrap_err(
            Error::render(format!(
                "unable to call `{}`, which is {}",
                name,
                type_name(&other)
            )),
            span,
        ))),
    }
}

/// Invokes a macro: binds positional and keyword arguments (and the
/// caller, when present), evaluates missing defaults, runs the body in a
/// frame pushed from the definition site, and returns the output marked
/// safe.
fn call_macro(exec: Exec, macro_value: Rc<MacroValue>, args: Vec<Value>, cb: ValueCallback) {
    let (positional, kwargs) = crate::runtime::get_keyword_args(&args);
    let frame = macro_value.def_frame.push(macro_value.isolate);
    let vars = match &macro_value.def_vars {
        // Callers share the defining function's locals so their bodies
        // can reference enclosing temporaries.
        Some(vars) => Rc::clone(vars),
        None => Rc::new(RefCell::new(FxHashMap::default())),
    };
    let mut macro_exec = exec
        .with_frame(frame.clone())
        .with_buffer(Rc::new(RefCell::new(String::new())))
        .with_vars(vars);
    // The body runs against the defining template's context.
    macro_exec.context = macro_value.def_context.clone();

    if let Some(kwargs) = kwargs {
        if let Some(caller) = kwargs.get("caller") {
            frame.set("caller", caller.clone(), false);
        }
    }

    let mut missing_defaults = Vec::new();
    for (i, arg) in macro_value.args.iter().enumerate() {
        let value = positional
            .get(i)
            .cloned()
            .or_else(|| kwargs.and_then(|k| k.get(&arg.name).cloned()));
        match value {
            Some(v) => {
                macro_exec.set_var(&format!("l_{}", arg.name), v.clone());
                frame.set(&arg.name, v, false);
            }
            None => match &arg.default {
                Some(default) => missing_defaults.push((arg.name.clone(), default.clone())),
                None => {
                    macro_exec.set_var(&format!("l_{}", arg.name), Value::Undefined);
                    frame.set(&arg.name, Value::Undefined, false);
                }
            },
        }
    }

    let buffer = Rc::clone(&macro_exec.buffer);
    let body = macro_value.body.clone();
    bind_defaults(
        macro_exec.clone(),
        missing_defaults.into_iter(),
        Box::new(move |err| match err {
            Some(e) => cb(Err(e)),
            None => {
                exec_stmts(
                    macro_exec,
                    body,
                    0,
                    Box::new(move |err| match err {
                        Some(e) => cb(Err(e)),
                        None => cb(Ok(mark_safe(Value::str(buffer.borrow().clone())))),
                    }),
                );
            }
        }),
    );
}

fn bind_defaults(
    exec: Exec,
    mut defaults: std::vec::IntoIter<(String, IrExpr)>,
    done: DoneCallback,
) {
    let Some((name, default)) = defaults.next() else {
        done(None);
        return;
    };
    let e2 = exec.clone();
    eval_expr(
        exec,
        default,
        Box::new(move |result| match result {
            Err(e) => done(Some(e)),
            Ok(v) => {
                e2.set_var(&format!("l_{}", name), v.clone());
                e2.frame.set(&name, v, false);
                bind_defaults(e2, defaults, done);
            }
        }),
    );
}

//! Textual rendering of the IR.
//!
//! This produces the precompile product: the `root` function, one
//! `b_<name>` function per block, and the final record mapping names to
//! implementations. Statements that suspend print in callback form; the
//! `})` fragments needed to terminate those callbacks accumulate per
//! scope and are flushed when the scope ends.

use crate::compiler::ast::{BinOp, UnaryOp};
use crate::compiler::ir::{IrCase, IrExpr, IrFunction, IrMacroArg, IrProgram, IrStmt};

/// Prints a full program.
pub fn emit_program(program: &IrProgram) -> String {
    let mut e = Emitter::new();
    e.emit_function(&program.root, true);
    for (_, func) in &program.blocks {
        e.emit_function(func, false);
    }
    e.writeln("return {");
    e.writeln("root: root,");
    for (_, func) in &program.blocks {
        e.writeln(&format!("{}: {},", func.name, func.name));
    }
    e.writeln("};");
    e.buf
}

struct Emitter {
    buf: String,
    indent: usize,
    at_line_start: bool,
    /// Print-only temporaries (loop counters and the like).
    uid: usize,
}

impl Emitter {
    fn new() -> Self {
        Self {
            buf: String::new(),
            indent: 0,
            at_line_start: true,
            uid: 0,
        }
    }

    fn uid(&mut self) -> usize {
        self.uid += 1;
        self.uid
    }

    fn write(&mut self, s: &str) {
        if self.at_line_start {
            for _ in 0..self.indent {
                self.buf.push_str("  ");
            }
            self.at_line_start = false;
        }
        self.buf.push_str(s);
    }

    /// Writes one line, adjusting the indent for lines that open or
    /// close a brace scope.
    fn writeln(&mut self, s: &str) {
        if s.starts_with('}') {
            self.indent = self.indent.saturating_sub(1);
        }
        self.write(s);
        if s.ends_with('{') {
            self.indent += 1;
        }
        self.buf.push('\n');
        self.at_line_start = true;
    }

    // =========================================================================
    // Functions
    // =========================================================================

    fn emit_function(&mut self, func: &IrFunction, is_root: bool) {
        self.writeln(&format!(
            "function {}(env, context, frame, runtime, cb) {{",
            func.name
        ));
        self.writeln("var lineno = null;");
        self.writeln("var colno = null;");
        self.writeln("var output = \"\";");
        self.writeln("try {");
        self.emit_scope(&func.body, is_root);
        self.writeln("} catch (e) {");
        self.writeln("cb(runtime.handleError(e, lineno, colno));");
        self.writeln("}");
        self.writeln("}");
    }

    /// Emits a statement list, closing any callbacks opened inside it.
    fn emit_scope(&mut self, stmts: &[IrStmt], is_root: bool) {
        self.emit_scope_with_tail(stmts, is_root, None);
    }

    /// Like [`Emitter::emit_scope`], with a tail line placed after the
    /// last statement but before the callback closers flush, so the tail
    /// runs inside the innermost continuation when the scope suspends.
    fn emit_scope_with_tail(&mut self, stmts: &[IrStmt], is_root: bool, tail: Option<&str>) {
        let mut closers: Vec<&'static str> = Vec::new();
        for stmt in stmts {
            self.emit_stmt(stmt, is_root, &mut closers);
        }
        if let Some(tail) = tail {
            self.writeln(tail);
        }
        for closer in closers.into_iter().rev() {
            self.writeln(closer);
        }
    }

    fn emit_stmt(&mut self, stmt: &IrStmt, is_root: bool, closers: &mut Vec<&'static str>) {
        match stmt {
            IrStmt::Let { id, value } => {
                if let IrExpr::ImportedName {
                    module_id,
                    name,
                    span: _,
                } = value
                {
                    // Missing names fail the render, not the lookup.
                    self.writeln(&format!(
                        "if(Object.prototype.hasOwnProperty.call({}, {})) {{",
                        module_id,
                        js_str(name)
                    ));
                    self.writeln(&format!("var {} = {}[{}];", id, module_id, js_str(name)));
                    self.writeln("} else {");
                    self.writeln(&format!(
                        "cb(new Error(\"cannot import '\" + {} + \"'\")); return;",
                        js_str(name)
                    ));
                    self.writeln("}");
                    return;
                }
                let value = self.expr(value);
                self.writeln(&format!("var {} = {};", id, value));
            }
            IrStmt::Assign { id, value } => {
                let value = self.expr(value);
                self.writeln(&format!("{} = {};", id, value));
            }
            IrStmt::Append { value } => {
                let value = self.expr(value);
                self.writeln(&format!("output += {};", value));
            }
            IrStmt::FrameSet {
                name,
                id,
                resolve_up,
            } => {
                if *resolve_up {
                    self.writeln(&format!("frame.set({}, {}, true);", js_str(name), id));
                } else {
                    self.writeln(&format!("frame.set({}, {});", js_str(name), id));
                }
            }
            IrStmt::ContextSet { name, id } => {
                self.writeln(&format!("context.setVariable({}, {});", js_str(name), id));
            }
            IrStmt::ContextExport { name } => {
                self.writeln(&format!("context.addExport({});", js_str(name)));
            }
            IrStmt::If {
                test,
                then_body,
                else_body,
            } => {
                let suspends = body_suspends(then_body) || body_suspends(else_body);
                if suspends {
                    // Branch tails call back so the remainder can resume
                    // after either side completes. The tail nests inside
                    // any callbacks the branch opened, so it only fires
                    // once the branch's own async work has resolved.
                    self.writeln("(function(cb) {");
                    let test = self.expr(test);
                    self.writeln(&format!("if({}) {{", test));
                    self.emit_scope_with_tail(then_body, is_root, Some("cb();"));
                    self.writeln("} else {");
                    self.emit_scope_with_tail(else_body, is_root, Some("cb();"));
                    self.writeln("}");
                    self.writeln("})(function() {");
                    closers.push("});");
                } else {
                    let test = self.expr(test);
                    self.writeln(&format!("if({}) {{", test));
                    self.emit_scope(then_body, is_root);
                    if else_body.is_empty() {
                        self.writeln("}");
                    } else {
                        self.writeln("} else {");
                        self.emit_scope(else_body, is_root);
                        self.writeln("}");
                    }
                }
            }
            IrStmt::Switch {
                subject,
                cases,
                default_body,
            } => {
                let subject = self.expr(subject);
                self.writeln(&format!("switch({}) {{", subject));
                for IrCase {
                    expr,
                    body,
                    emit_break,
                } in cases
                {
                    let expr = self.expr(expr);
                    self.writeln(&format!("case {}: {{", expr));
                    self.emit_scope(body, is_root);
                    if *emit_break {
                        self.writeln("break;");
                    }
                    self.writeln("}");
                }
                if !default_body.is_empty() {
                    self.writeln("default: {");
                    self.emit_scope(default_body, is_root);
                    self.writeln("}");
                }
                self.writeln("}");
            }
            IrStmt::ForIter {
                names,
                ids,
                arr,
                body,
                else_body,
                ..
            } => self.emit_for(names, ids, arr, body, else_body, is_root),
            IrStmt::AsyncIter {
                all,
                names,
                ids,
                arr,
                body,
                else_body,
                ..
            } => self.emit_async_iter(*all, names, ids, arr, body, else_body, is_root, closers),
            IrStmt::FilterAwait {
                target,
                name,
                args,
                ..
            } => {
                let args = self.expr_list(args);
                self.writeln(&format!(
                    "env.getFilter({}).call(context, {}, function(err, {}) {{",
                    js_str(name),
                    args,
                    target
                ));
                self.writeln("if(err) { cb(err); return; }");
                closers.push("});");
            }
            IrStmt::SuperAwait {
                target, block_name, ..
            } => {
                self.writeln(&format!(
                    "context.getSuper(env, {}, b_{}, frame, runtime, function(err, {}) {{",
                    js_str(block_name),
                    block_name,
                    target
                ));
                self.writeln("if(err) { cb(err); return; }");
                self.writeln(&format!("{} = runtime.markSafe({});", target, target));
                closers.push("});");
            }
            IrStmt::Extends { template, .. } => {
                let template = self.expr(template);
                let id = self.uid();
                self.writeln(&format!(
                    "env.getTemplate({}, true, null, false, function(err, parent_{}) {{",
                    template, id
                ));
                self.writeln("if(err) { cb(err); return; }");
                self.writeln(&format!("parentTemplate = parent_{};", id));
                self.writeln(&format!("for(var name_{} in parentTemplate.blocks) {{", id));
                self.writeln(&format!(
                    "context.addBlock(name_{}, parentTemplate.blocks[name_{}]);",
                    id, id
                ));
                self.writeln("}");
                closers.push("});");
            }
            IrStmt::Include {
                template,
                ignore_missing,
                ..
            } => {
                let template = self.expr(template);
                self.writeln("var tasks = [];");
                self.writeln("tasks.push(function(callback) {");
                self.writeln(&format!(
                    "env.getTemplate({}, false, null, {}, callback);",
                    template, ignore_missing
                ));
                self.writeln("});");
                self.writeln("tasks.push(function(template, callback) {");
                if *ignore_missing {
                    self.writeln("if(!template) { callback(null, \"\"); return; }");
                }
                self.writeln("template.render(context.getVariables(), frame, callback);");
                self.writeln("});");
                self.writeln("tasks.push(function(result, callback) {");
                self.writeln("output += result;");
                self.writeln("callback(null);");
                self.writeln("});");
                self.writeln("env.waterfall(tasks, function() {");
                closers.push("});");
            }
            IrStmt::ImportAwait {
                target,
                template,
                with_context,
                ..
            } => {
                let template = self.expr(template);
                let id = self.uid();
                self.writeln(&format!(
                    "env.getTemplate({}, false, null, false, function(err, module_{}) {{",
                    template, id
                ));
                self.writeln("if(err) { cb(err); return; }");
                if *with_context {
                    self.writeln(&format!(
                        "module_{}.getExported(context.getVariables(), frame, function(err, {}) {{",
                        id, target
                    ));
                } else {
                    self.writeln(&format!(
                        "module_{}.getExported(function(err, {}) {{",
                        id, target
                    ));
                }
                self.writeln("if(err) { cb(err); return; }");
                closers.push("});");
                closers.push("});");
            }
            IrStmt::MacroDef {
                id, args, body, ..
            } => {
                let value = self.macro_text(args, body, true);
                self.writeln(&format!("var {} = {};", id, value));
            }
            IrStmt::EmitBlock {
                name,
                skip_if_parent,
                ..
            } => {
                let id = self.uid();
                if *skip_if_parent {
                    self.writeln("if(parentTemplate === null) {");
                }
                self.writeln(&format!(
                    "context.getBlock({})(env, context, frame, runtime, function(err, result_{}) {{",
                    js_str(name),
                    id
                ));
                self.writeln("if(err) { cb(err); return; }");
                self.writeln(&format!("output += result_{};", id));
                self.writeln("});");
                if *skip_if_parent {
                    self.writeln("}");
                }
            }
            IrStmt::CallExtension {
                ext,
                prop,
                args,
                content,
                is_async,
                ..
            } => {
                let mut parts = vec!["context".to_string()];
                for arg in args {
                    parts.push(self.expr(arg));
                }
                if let Some(body) = content {
                    parts.push(self.content_thunk(body));
                }
                let call = format!(
                    "env.getExtension({})[{}]({})",
                    js_str(ext),
                    js_str(prop),
                    parts.join(", ")
                );
                if *is_async {
                    let id = self.uid();
                    self.writeln(&format!(
                        "env.getExtension({})[{}]({}, function(err, result_{}) {{",
                        js_str(ext),
                        js_str(prop),
                        parts.join(", "),
                        id
                    ));
                    self.writeln("if(err) { cb(err); return; }");
                    self.writeln(&format!(
                        "output += runtime.suppressValue(result_{}, env.opts.autoescape);",
                        id
                    ));
                    closers.push("});");
                } else {
                    self.writeln(&format!(
                        "output += runtime.suppressValue({}, env.opts.autoescape);",
                        call
                    ));
                }
            }
            IrStmt::Finish => {
                if is_root {
                    self.writeln("if(parentTemplate !== null) {");
                    self.writeln(
                        "parentTemplate.rootRenderFunc(env, context, frame, runtime, cb);",
                    );
                    self.writeln("} else {");
                    self.writeln("cb(null, output);");
                    self.writeln("}");
                } else {
                    self.writeln("cb(null, output);");
                }
            }
        }
    }

    fn emit_for(
        &mut self,
        names: &[String],
        ids: &[String],
        arr: &IrExpr,
        body: &[IrStmt],
        else_body: &[IrStmt],
        is_root: bool,
    ) {
        let n = self.uid();
        let arr = self.expr(arr);
        self.writeln("frame = frame.push();");
        self.writeln(&format!("var arr_{} = runtime.fromIterator({});", n, arr));
        self.writeln(&format!("var len_{} = 0;", n));
        self.writeln(&format!("if(Array.isArray(arr_{})) {{", n));
        self.writeln(&format!("len_{} = arr_{}.length;", n, n));
        self.writeln(&format!(
            "for(var i_{} = 0; i_{} < arr_{}.length; i_{}++) {{",
            n, n, n, n
        ));
        if ids.len() == 1 {
            self.writeln(&format!("var {} = arr_{}[i_{}];", ids[0], n, n));
        } else {
            for (j, id) in ids.iter().enumerate() {
                self.writeln(&format!("var {} = arr_{}[i_{}][{}];", id, n, n, j));
            }
        }
        self.emit_loop_bindings(names, ids, n);
        self.emit_scope(body, is_root);
        self.writeln("}");
        self.writeln("} else {");
        self.writeln(&format!("var keys_{} = runtime.keys(arr_{});", n, n));
        self.writeln(&format!("len_{} = keys_{}.length;", n, n));
        self.writeln(&format!(
            "for(var i_{} = 0; i_{} < keys_{}.length; i_{}++) {{",
            n, n, n, n
        ));
        self.writeln(&format!("var {} = keys_{}[i_{}];", ids[0], n, n));
        if let Some(value_id) = ids.get(1) {
            self.writeln(&format!("var {} = arr_{}[{}];", value_id, n, ids[0]));
        }
        self.emit_loop_bindings(names, ids, n);
        self.emit_scope(body, is_root);
        self.writeln("}");
        self.writeln("}");
        if !else_body.is_empty() {
            self.writeln(&format!("if(len_{} === 0) {{", n));
            self.emit_scope(else_body, is_root);
            self.writeln("}");
        }
        self.writeln("frame = frame.pop();");
    }

    fn emit_loop_bindings(&mut self, names: &[String], ids: &[String], n: usize) {
        for (name, id) in names.iter().zip(ids) {
            self.writeln(&format!("frame.set({}, {});", js_str(name), id));
        }
        self.writeln(&format!("frame.set(\"loop.index\", i_{} + 1);", n));
        self.writeln(&format!("frame.set(\"loop.index0\", i_{});", n));
        self.writeln(&format!("frame.set(\"loop.revindex\", len_{} - i_{});", n, n));
        self.writeln(&format!(
            "frame.set(\"loop.revindex0\", len_{} - i_{} - 1);",
            n, n
        ));
        self.writeln(&format!("frame.set(\"loop.first\", i_{} === 0);", n));
        self.writeln(&format!(
            "frame.set(\"loop.last\", i_{} === len_{} - 1);",
            n, n
        ));
        self.writeln(&format!("frame.set(\"loop.length\", len_{});", n));
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_async_iter(
        &mut self,
        all: bool,
        names: &[String],
        ids: &[String],
        arr: &IrExpr,
        body: &[IrStmt],
        else_body: &[IrStmt],
        is_root: bool,
        closers: &mut Vec<&'static str>,
    ) {
        let n = self.uid();
        let arr = self.expr(arr);
        let helper = if all { "asyncAll" } else { "asyncEach" };
        self.writeln(&format!("var arr_{} = runtime.fromIterator({});", n, arr));
        if !else_body.is_empty() {
            self.writeln(&format!("if(arr_{}.length === 0) {{", n));
            self.emit_scope(else_body, is_root);
            self.writeln("}");
        }
        let params = ids.join(", ");
        self.writeln(&format!(
            "runtime.{}(arr_{}, {}, function({}, i_{}, len_{}, next) {{",
            helper,
            n,
            ids.len(),
            params,
            n,
            n
        ));
        self.writeln("frame = frame.push();");
        if all {
            self.writeln("var output = \"\";");
        }
        self.emit_loop_bindings(names, ids, n);
        self.emit_scope(body, is_root);
        self.writeln("frame = frame.pop();");
        if all {
            self.writeln("next(null, output);");
        } else {
            self.writeln("next(null);");
        }
        if all {
            let id = self.uid();
            self.writeln(&format!("}}, function(err, result_{}) {{", id));
            self.writeln("if(err) { cb(err); return; }");
            self.writeln(&format!("output += result_{};", id));
        } else {
            self.writeln("}, function(err) {");
            self.writeln("if(err) { cb(err); return; }");
        }
        closers.push("});");
    }

    /// Renders a body into a `function() { ... return output; }` thunk.
    fn content_thunk(&mut self, body: &[IrStmt]) -> String {
        let mut sub = Emitter::new();
        sub.indent = self.indent;
        sub.writeln("function() {");
        sub.writeln("var output = \"\";");
        sub.emit_scope(body, false);
        sub.writeln("return output;");
        sub.write("}");
        sub.buf
    }

    fn macro_text(&mut self, args: &[IrMacroArg], body: &[IrStmt], isolate_frame: bool) -> String {
        let arg_names: Vec<String> = args
            .iter()
            .filter(|a| a.default.is_none())
            .map(|a| js_str(&a.name))
            .collect();
        let kwarg_names: Vec<String> = args
            .iter()
            .filter(|a| a.default.is_some())
            .map(|a| js_str(&a.name))
            .collect();
        let params: Vec<String> = args.iter().map(|a| format!("l_{}", a.name)).collect();

        let mut sub = Emitter::new();
        sub.indent = self.indent;
        sub.write(&format!(
            "runtime.makeMacro([{}], [{}], function ({}kwargs) {{",
            arg_names.join(", "),
            kwarg_names.join(", "),
            if params.is_empty() {
                String::new()
            } else {
                format!("{}, ", params.join(", "))
            },
        ));
        sub.buf.push('\n');
        sub.at_line_start = true;
        sub.indent += 1;
        sub.writeln(&format!(
            "frame = frame.push({});",
            if isolate_frame { "true" } else { "" }
        ));
        sub.writeln("kwargs = kwargs || {};");
        sub.writeln("if (Object.prototype.hasOwnProperty.call(kwargs, \"caller\")) {");
        sub.writeln("frame.set(\"caller\", kwargs.caller);");
        sub.writeln("}");
        for arg in args {
            match &arg.default {
                None => sub.writeln(&format!(
                    "frame.set({}, l_{});",
                    js_str(&arg.name),
                    arg.name
                )),
                Some(default) => {
                    let default = sub.expr(default);
                    sub.writeln(&format!(
                        "frame.set({}, l_{} !== undefined ? l_{} : {});",
                        js_str(&arg.name),
                        arg.name,
                        arg.name,
                        default
                    ));
                }
            }
        }
        sub.writeln("var output = \"\";");
        sub.emit_scope(body, false);
        sub.writeln("frame = frame.pop();");
        sub.writeln("return runtime.markSafe(output);");
        sub.write("})");
        self.uid = sub.uid.max(self.uid);
        sub.buf
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr_list(&mut self, exprs: &[IrExpr]) -> String {
        exprs
            .iter()
            .map(|e| self.expr(e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&mut self, expr: &IrExpr) -> String {
        match expr {
            IrExpr::Undefined => "undefined".to_string(),
            IrExpr::Null => "null".to_string(),
            IrExpr::Bool(b) => b.to_string(),
            IrExpr::Int(i) => i.to_string(),
            IrExpr::Float(f) => f.to_string(),
            IrExpr::Str(s) => js_str(s),
            IrExpr::Ident(id) => id.clone(),
            IrExpr::ContextLookup { name } => format!(
                "runtime.contextOrFrameLookup(context, frame, {})",
                js_str(name)
            ),
            IrExpr::Array(items) => format!("[{}]", self.expr_list(items)),
            IrExpr::Dict(pairs) => self.dict_text(pairs),
            IrExpr::KeywordArgs(pairs) => {
                format!("runtime.makeKeywordArgs({})", self.dict_text(pairs))
            }
            IrExpr::Unary { op, operand } => {
                let operand = self.expr(operand);
                match op {
                    UnaryOp::Not => format!("!({})", operand),
                    UnaryOp::Neg => format!("-({})", operand),
                    UnaryOp::Pos => format!("+({})", operand),
                }
            }
            IrExpr::Binary {
                op, left, right, ..
            } => {
                let l = self.expr(left);
                let r = self.expr(right);
                match op {
                    BinOp::Or => format!("({} || {})", l, r),
                    BinOp::And => format!("({} && {})", l, r),
                    BinOp::Add => format!("({} + {})", l, r),
                    BinOp::Concat => format!("({} + \"\" + {})", l, r),
                    BinOp::Sub => format!("({} - {})", l, r),
                    BinOp::Mul => format!("({} * {})", l, r),
                    BinOp::Div => format!("({} / {})", l, r),
                    BinOp::FloorDiv => format!("Math.floor({} / {})", l, r),
                    BinOp::Mod => format!("({} % {})", l, r),
                    BinOp::Pow => format!("Math.pow({}, {})", l, r),
                }
            }
            IrExpr::Compare { first, rest, .. } => {
                let mut out = self.expr(first);
                for (op, operand) in rest {
                    out.push_str(&format!(" {} {}", op.as_str(), self.expr(operand)));
                }
                format!("({})", out)
            }
            IrExpr::InOp {
                needle, haystack, ..
            } => {
                let needle = self.expr(needle);
                let haystack = self.expr(haystack);
                format!("runtime.inOperator({}, {})", needle, haystack)
            }
            IrExpr::Cond { test, cons, alt } => {
                let test = self.expr(test);
                let cons = self.expr(cons);
                let alt = self.expr(alt);
                format!("({} ? {} : {})", test, cons, alt)
            }
            IrExpr::MemberLookup { obj, key, .. } => {
                let obj = self.expr(obj);
                let key = self.expr(key);
                format!("runtime.memberLookup(({}), {})", obj, key)
            }
            IrExpr::FunCall {
                callee,
                name,
                args,
                span,
            } => {
                let callee = self.expr(callee);
                let args = self.expr_list(args);
                format!(
                    "(lineno = {}, colno = {}, runtime.callWrap({}, {}, context, [{}]))",
                    span.line,
                    span.col,
                    callee,
                    js_str(name),
                    args
                )
            }
            IrExpr::FilterCall { name, args, .. } => {
                let args = self.expr_list(args);
                format!("env.getFilter({}).call(context, {})", js_str(name), args)
            }
            IrExpr::TestCall { name, args, .. } => {
                let args = self.expr_list(args);
                format!(
                    "env.getTest({}).call(context, {}) === true",
                    js_str(name),
                    args
                )
            }
            IrExpr::Suppress { value, .. } => {
                let value = self.expr(value);
                format!("runtime.suppressValue({}, env.opts.autoescape)", value)
            }
            IrExpr::EnsureDefined { value, span } => {
                let value = self.expr(value);
                format!(
                    "runtime.ensureDefined({}, {}, {})",
                    value, span.line, span.col
                )
            }
            IrExpr::MarkSafe(value) => {
                let value = self.expr(value);
                format!("runtime.markSafe({})", value)
            }
            IrExpr::CopySafeness { of, value } => {
                let of = self.expr(of);
                let value = self.expr(value);
                format!("runtime.copySafeness({}, {})", of, value)
            }
            IrExpr::Capture { body } => {
                let mut sub = Emitter::new();
                sub.indent = self.indent;
                sub.writeln("(function() {");
                sub.writeln("var output = \"\";");
                sub.emit_scope(body, false);
                sub.writeln("return output;");
                sub.write("})()");
                self.uid = sub.uid.max(self.uid);
                sub.buf
            }
            IrExpr::CallerDef { args, body, .. } => self.macro_text(args, body, false),
            IrExpr::ImportedName {
                module_id, name, ..
            } => {
                // Statement emission special-cases the guarded form; in
                // expression position a plain lookup suffices.
                format!("{}[{}]", module_id, js_str(name))
            }
        }
    }

    fn dict_text(&mut self, pairs: &[(String, IrExpr)]) -> String {
        let body = pairs
            .iter()
            .map(|(k, v)| {
                let v = self.expr(v);
                format!("{}: {}", js_str(k), v)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", body)
    }
}

/// True when a body contains a statement that prints in callback form.
fn body_suspends(stmts: &[IrStmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        IrStmt::FilterAwait { .. }
        | IrStmt::SuperAwait { .. }
        | IrStmt::Extends { .. }
        | IrStmt::Include { .. }
        | IrStmt::ImportAwait { .. }
        | IrStmt::AsyncIter { .. } => true,
        IrStmt::CallExtension { is_async, .. } => *is_async,
        IrStmt::If {
            then_body,
            else_body,
            ..
        } => body_suspends(then_body) || body_suspends(else_body),
        IrStmt::Switch {
            cases,
            default_body,
            ..
        } => {
            cases.iter().any(|c| body_suspends(&c.body)) || body_suspends(default_body)
        }
        IrStmt::ForIter {
            body, else_body, ..
        } => body_suspends(body) || body_suspends(else_body),
        _ => false,
    })
}

/// Escapes a string as a double-quoted JS literal.
fn js_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::{generate, CodegenOptions};
    use crate::compiler::parser::Parser;

    fn emit(src: &str) -> String {
        let root = Parser::try_from_source(src).unwrap().parse().unwrap();
        let program = generate(&root, CodegenOptions::default()).unwrap();
        emit_program(&program)
    }

    #[test]
    fn root_function_shape() {
        let out = emit("hi");
        assert!(
            out.contains("function root(env, context, frame, runtime, cb) {"),
            "Expected root header. Got:\n{}",
            out
        );
        assert!(out.contains("cb(runtime.handleError(e, lineno, colno));"));
        assert!(out.contains("cb(null, output);"));
        assert!(out.contains("return {"));
        assert!(out.contains("root: root,"));
    }

    #[test]
    fn output_uses_suppress_value() {
        let out = emit("{{ name }}");
        assert!(
            out.contains("output += runtime.suppressValue(runtime.contextOrFrameLookup(context, frame, \"name\"), env.opts.autoescape);"),
            "Got:\n{}",
            out
        );
    }

    #[test]
    fn template_data_is_plain_append() {
        let out = emit("a&b");
        assert!(out.contains("output += \"a&b\";"), "Got:\n{}", out);
        assert!(!out.contains("suppressValue(\"a&b\""));
    }

    #[test]
    fn floordiv_and_pow_use_math() {
        let out = emit("{{ a // b }}{{ a ** b }}");
        assert!(out.contains("Math.floor("), "Got:\n{}", out);
        assert!(out.contains("Math.pow("), "Got:\n{}", out);
    }

    #[test]
    fn concat_coerces_through_empty_string() {
        let out = emit("{{ a ~ b }}");
        assert!(out.contains("+ \"\" +"), "Got:\n{}", out);
    }

    #[test]
    fn block_functions_and_record() {
        let out = emit("{% block title %}x{% endblock %}");
        assert!(
            out.contains("function b_title(env, context, frame, runtime, cb) {"),
            "Got:\n{}",
            out
        );
        assert!(out.contains("b_title: b_title,"), "Got:\n{}", out);
        assert!(
            out.contains("context.getBlock(\"title\")(env, context, frame, runtime, function(err, result_"),
            "Got:\n{}",
            out
        );
        assert!(out.contains("if(parentTemplate === null) {"), "Got:\n{}", out);
    }

    #[test]
    fn call_sites_record_line_and_column() {
        let out = emit("{{ fn(1) }}");
        assert!(out.contains("(lineno = 1, colno ="), "Got:\n{}", out);
        assert!(
            out.contains("runtime.callWrap(runtime.contextOrFrameLookup(context, frame, \"fn\"), \"fn\", context, [1])"),
            "Got:\n{}",
            out
        );
    }

    #[test]
    fn async_filter_opens_callback_and_closes_scope() {
        use crate::compiler::transformer::transform;
        use rustc_hash::FxHashSet;
        let mut root = Parser::try_from_source("{{ x | fetch }}done")
            .unwrap()
            .parse()
            .unwrap();
        let names: FxHashSet<String> = ["fetch".to_string()].into_iter().collect();
        transform(&mut root, &names);
        let program = generate(&root, CodegenOptions::default()).unwrap();
        let out = emit_program(&program);
        assert!(
            out.contains("env.getFilter(\"fetch\").call(context, runtime.contextOrFrameLookup(context, frame, \"x\"), function(err, t_await_1) {"),
            "Got:\n{}",
            out
        );
        assert!(out.contains("if(err) { cb(err); return; }"), "Got:\n{}", out);
        // The trailing text nests inside the callback, closed before the catch.
        let done = out.find("output += \"done\";").expect("done append");
        let closer = out[done..].find("});").expect("scope closer");
        let _ = closer;
    }

    #[test]
    fn for_loop_installs_loop_bindings() {
        let out = emit("{% for x in items %}{{ x }}{% endfor %}");
        for binding in [
            "loop.index",
            "loop.index0",
            "loop.revindex",
            "loop.revindex0",
            "loop.first",
            "loop.last",
            "loop.length",
        ] {
            assert!(out.contains(binding), "missing {}. Got:\n{}", binding, out);
        }
        assert!(out.contains("runtime.fromIterator("), "Got:\n{}", out);
        assert!(out.contains("runtime.keys("), "Got:\n{}", out);
    }

    #[test]
    fn for_else_guards_on_length() {
        let out = emit("{% for x in items %}a{% else %}b{% endfor %}");
        assert!(out.contains("=== 0) {"), "Got:\n{}", out);
    }

    #[test]
    fn async_all_reassembles_output() {
        let out = emit("{% asyncAll x in items %}{{ x }}{% endall %}");
        assert!(out.contains("runtime.asyncAll("), "Got:\n{}", out);
        assert!(out.contains("next(null, output);"), "Got:\n{}", out);
    }

    #[test]
    fn extends_registers_parent_blocks() {
        let out = emit("{% extends \"base.html\" %}");
        assert!(
            out.contains("env.getTemplate(\"base.html\", true, null, false, function(err, parent_"),
            "Got:\n{}",
            out
        );
        assert!(out.contains("context.addBlock("), "Got:\n{}", out);
        assert!(
            out.contains("parentTemplate.rootRenderFunc(env, context, frame, runtime, cb);"),
            "Got:\n{}",
            out
        );
    }

    #[test]
    fn include_chains_through_waterfall() {
        let out = emit("{% include \"part.html\" %}");
        assert!(out.contains("env.waterfall(tasks, function() {"), "Got:\n{}", out);
        assert!(
            out.contains("template.render(context.getVariables(), frame, callback);"),
            "Got:\n{}",
            out
        );
    }

    #[test]
    fn macro_compiles_to_make_macro() {
        let out = emit("{% macro m(a, b=2) %}{{ a }}{% endmacro %}");
        assert!(
            out.contains("runtime.makeMacro([\"a\"], [\"b\"], function (l_a, l_b, kwargs) {"),
            "Got:\n{}",
            out
        );
        assert!(out.contains("return runtime.markSafe(output);"), "Got:\n{}", out);
    }

    #[test]
    fn switch_empty_case_falls_through() {
        let out = emit("{% switch x %}{% case 1 %}{% case 2 %}b{% default %}d{% endswitch %}");
        let case1 = out.find("case 1: {").expect("case 1");
        let case2 = out.find("case 2: {").expect("case 2");
        let breaks: Vec<usize> = out
            .match_indices("break;")
            .map(|(i, _)| i)
            .collect();
        // No break between case 1 and case 2; one after case 2's body.
        assert!(!breaks.iter().any(|&b| b > case1 && b < case2), "Got:\n{}", out);
        assert!(breaks.iter().any(|&b| b > case2), "Got:\n{}", out);
    }

    #[test]
    fn super_call_marks_safe() {
        let out = emit("{% block b %}{{ super() }}{% endblock %}");
        assert!(
            out.contains("context.getSuper(env, \"b\", b_b, frame, runtime, function(err, t_super_1) {"),
            "Got:\n{}",
            out
        );
        assert!(
            out.contains("t_super_1 = runtime.markSafe(t_super_1);"),
            "Got:\n{}",
            out
        );
    }

    #[test]
    fn capture_swaps_buffers() {
        let out = emit("{% set x %}hi{% endset %}");
        assert!(out.contains("(function() {"), "Got:\n{}", out);
        assert!(out.contains("return output;"), "Got:\n{}", out);
    }

    #[test]
    fn from_import_guards_missing_names() {
        let out = emit("{% from \"m.html\" import field %}");
        assert!(
            out.contains("if(Object.prototype.hasOwnProperty.call("),
            "Got:\n{}",
            out
        );
        assert!(out.contains("cannot import"), "Got:\n{}", out);
    }

    #[test]
    fn suspended_if_wraps_in_callback_function() {
        use crate::compiler::transformer::transform;
        use rustc_hash::FxHashSet;
        let mut root =
            Parser::try_from_source("{% if a %}{{ x | fetch }}{% endif %}after")
                .unwrap()
                .parse()
                .unwrap();
        let names: FxHashSet<String> = ["fetch".to_string()].into_iter().collect();
        transform(&mut root, &names);
        let program = generate(&root, CodegenOptions::default()).unwrap();
        let out = emit_program(&program);
        assert!(out.contains("(function(cb) {"), "Got:\n{}", out);
        assert!(out.contains("})(function() {"), "Got:\n{}", out);
    }

    #[test]
    fn suspended_branch_tail_nests_inside_filter_callback() {
        use crate::compiler::transformer::transform;
        use rustc_hash::FxHashSet;
        let mut root =
            Parser::try_from_source("{% if a %}{{ x | fetch }}{% endif %}after")
                .unwrap()
                .parse()
                .unwrap();
        let names: FxHashSet<String> = ["fetch".to_string()].into_iter().collect();
        transform(&mut root, &names);
        let program = generate(&root, CodegenOptions::default()).unwrap();
        let out = emit_program(&program);

        // The branch continuation must fire only after the async filter
        // resolves: `cb();` sits inside the filter callback, before the
        // `});` that closes it. Outside that ordering the trailing
        // output would be appended before the filter result.
        let filter_open = out
            .find("function(err, t_await_1) {")
            .expect("filter callback opener");
        let after_open = &out[filter_open..];
        let append = after_open
            .find("output += runtime.suppressValue(t_await_1")
            .expect("filter result append");
        let tail = after_open.find("cb();").expect("branch tail");
        let closer = after_open.find("});").expect("filter callback closer");
        assert!(
            append < tail && tail < closer,
            "branch tail must nest inside the filter callback. Got:\n{}",
            out
        );
    }
}

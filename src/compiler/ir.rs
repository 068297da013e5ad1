//! Intermediate representation emitted by the code generator.
//!
//! The IR is a typed, JS-shaped program: one `root` function plus one
//! `b_<name>` function per template block, each a statement list executed
//! against `(env, context, frame, runtime, cb)`. Two consumers walk it:
//!
//! - the **emitter** (`emit.rs`) prints it as text, the precompile
//!   product;
//! - the **evaluator** (`runtime/interp.rs`) executes it in
//!   continuation-passing style.
//!
//! Statement order is the continuation order: any statement may suspend,
//! and the remainder of its list is the continuation that resumes after
//! it. Rust expressions in bodies are shared via `Rc` so suspended
//! continuations can hold them without copying.

use std::rc::Rc;

use crate::compiler::ast::{BinOp, CmpOp, UnaryOp};
use crate::error::Span;

/// A shared statement list.
pub type IrBody = Rc<Vec<IrStmt>>;

/// An argument in a macro or caller signature.
#[derive(Debug, Clone, PartialEq)]
pub struct IrMacroArg {
    pub name: String,
    pub default: Option<IrExpr>,
}

/// One arm of a switch. `emit_break` is false for explicitly empty
/// bodies, which therefore fall through to the next arm.
#[derive(Debug, Clone, PartialEq)]
pub struct IrCase {
    pub expr: IrExpr,
    pub body: IrBody,
    pub emit_break: bool,
}

/// IR statements.
#[derive(Debug, Clone, PartialEq)]
pub enum IrStmt {
    /// `var <id> = <value>;`
    Let { id: String, value: IrExpr },
    /// `<id> = <value>;`
    Assign { id: String, value: IrExpr },
    /// `<buffer> += <value>;` against the active output buffer.
    Append { value: IrExpr },
    /// `frame.set("<name>", <id>[, true]);`
    FrameSet {
        name: String,
        id: String,
        resolve_up: bool,
    },
    /// `context.setVariable("<name>", <id>);`
    ContextSet { name: String, id: String },
    /// `context.addExport("<name>");`
    ContextExport { name: String },
    If {
        test: IrExpr,
        then_body: IrBody,
        else_body: IrBody,
    },
    Switch {
        subject: IrExpr,
        cases: Vec<IrCase>,
        default_body: IrBody,
    },
    /// Synchronous iteration; covers the array, tuple-unpack and
    /// key/value shapes. `ids` are the generated locals the loop names
    /// bind to; a `loop` record is installed in the frame per iteration.
    ForIter {
        names: Vec<String>,
        ids: Vec<String>,
        arr: IrExpr,
        body: IrBody,
        else_body: IrBody,
        span: Span,
    },
    /// `runtime.asyncEach(...)` / `runtime.asyncAll(...)`.
    AsyncIter {
        all: bool,
        names: Vec<String>,
        ids: Vec<String>,
        arr: IrExpr,
        body: IrBody,
        else_body: IrBody,
        span: Span,
    },
    /// CPS await of an async filter, binding its result:
    /// `env.getFilter("<name>").call(context, <args>, function(err, <target>) { ... })`
    FilterAwait {
        target: String,
        name: String,
        args: Vec<IrExpr>,
        span: Span,
    },
    /// CPS await of a parent block:
    /// `context.getSuper(env, "<name>", b_<name>, frame, runtime, cb)`,
    /// result marked safe and bound to `target`.
    SuperAwait {
        target: String,
        block_name: String,
        span: Span,
    },
    /// Eager parent-template load: binds `parentTemplate` and registers
    /// the parent's blocks on the context.
    Extends { template: IrExpr, span: Span },
    /// Load + render + append waterfall.
    Include {
        template: IrExpr,
        ignore_missing: bool,
        span: Span,
    },
    /// Loads a template and binds its export record to `target`.
    ImportAwait {
        target: String,
        template: IrExpr,
        with_context: bool,
        span: Span,
    },
    /// `var <id> = runtime.makeMacro([...], [...], function(...) {...})`
    MacroDef {
        id: String,
        name: String,
        args: Vec<IrMacroArg>,
        body: IrBody,
        span: Span,
    },
    /// Block dispatch in body position, appending the block's output.
    /// `skip_if_parent` guards root-level blocks so a taken `extends`
    /// leaves rendering to the parent chain.
    EmitBlock {
        name: String,
        skip_if_parent: bool,
        span: Span,
    },
    /// Custom-tag dispatch, appending the extension's result.
    CallExtension {
        ext: String,
        prop: String,
        args: Vec<IrExpr>,
        content: Option<IrBody>,
        is_async: bool,
        autoescape: bool,
        span: Span,
    },
    /// Function epilogue: the root either tail-calls
    /// `parentTemplate.rootRenderFunc` or completes with its buffer;
    /// block functions always complete with their buffer.
    Finish,
}

/// IR expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum IrExpr {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A generated local (`t_<n>`, await symbols, macro ids).
    Ident(String),
    /// `runtime.contextOrFrameLookup(context, frame, "<name>")`
    ContextLookup { name: String },
    Array(Vec<IrExpr>),
    Dict(Vec<(String, IrExpr)>),
    /// `runtime.makeKeywordArgs({...})`
    KeywordArgs(Vec<(String, IrExpr)>),
    Unary {
        op: UnaryOp,
        operand: Box<IrExpr>,
    },
    /// Binary operation. `And`/`Or` short-circuit and yield operands;
    /// FloorDiv prints as `Math.floor(a / b)`, Pow as `Math.pow(a, b)`,
    /// Concat as `a + "" + b`.
    Binary {
        op: BinOp,
        left: Box<IrExpr>,
        right: Box<IrExpr>,
        span: Span,
    },
    /// Chained comparison, printed with native operators.
    Compare {
        first: Box<IrExpr>,
        rest: Vec<(CmpOp, IrExpr)>,
        span: Span,
    },
    /// `runtime.inOperator(needle, haystack)`
    InOp {
        needle: Box<IrExpr>,
        haystack: Box<IrExpr>,
        span: Span,
    },
    /// `test ? cons : alt`
    Cond {
        test: Box<IrExpr>,
        cons: Box<IrExpr>,
        alt: Box<IrExpr>,
    },
    /// `runtime.memberLookup(obj, key)`
    MemberLookup {
        obj: Box<IrExpr>,
        key: Box<IrExpr>,
        span: Span,
    },
    /// `(lineno = l, colno = c, runtime.callWrap(callee, "<name>", context, [args]))`
    FunCall {
        callee: Box<IrExpr>,
        name: String,
        args: Vec<IrExpr>,
        span: Span,
    },
    /// `env.getFilter("<name>").call(context, args...)`
    FilterCall {
        name: String,
        args: Vec<IrExpr>,
        span: Span,
    },
    /// `env.getTest("<name>").call(context, subject, args...) === true`
    TestCall {
        name: String,
        args: Vec<IrExpr>,
        span: Span,
    },
    /// `runtime.suppressValue(value, env.opts.autoescape)`
    Suppress {
        value: Box<IrExpr>,
        autoescape: bool,
    },
    /// `runtime.ensureDefined(value, lineno, colno)`
    EnsureDefined { value: Box<IrExpr>, span: Span },
    /// `runtime.markSafe(value)`
    MarkSafe(Box<IrExpr>),
    /// `runtime.copySafeness(of, value)`
    CopySafeness {
        of: Box<IrExpr>,
        value: Box<IrExpr>,
    },
    /// Captured sub-render: prints as an immediately-invoked function
    /// with its own `output`, evaluates to the captured string.
    Capture { body: IrBody },
    /// Anonymous macro closing over the current frame, passed to macros
    /// as the `caller` keyword argument.
    CallerDef {
        args: Vec<IrMacroArg>,
        body: IrBody,
        span: Span,
    },
    /// A name looked up on an imported module record; missing names are
    /// a render error.
    ImportedName {
        module_id: String,
        name: String,
        span: Span,
    },
}

/// One emitted function.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    /// `root` or `b_<block>`.
    pub name: String,
    pub body: IrBody,
}

/// The complete program for one template.
#[derive(Debug, Clone, PartialEq)]
pub struct IrProgram {
    pub root: IrFunction,
    /// Block functions in declaration order.
    pub blocks: Vec<(String, IrFunction)>,
}

impl IrProgram {
    pub fn block_names(&self) -> Vec<String> {
        self.blocks.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn block(&self, name: &str) -> Option<&IrFunction> {
        self.blocks
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }
}

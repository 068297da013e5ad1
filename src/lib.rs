//! tessera - a Jinja-lineage template engine.
//!
//! Templates are compiled through a mode-aware lexer, a
//! recursive-descent parser and a code generator that emits a typed,
//! JS-shaped IR program (one `root` function plus one function per
//! block). The IR has two consumers: a text emitter (the precompile
//! product) and a continuation-passing evaluator that renders against an
//! [`Environment`] of filters, tests, extensions and globals.
//!
//! ```
//! use tessera::{Environment, vars_from_json};
//! use serde_json::json;
//!
//! let env = Environment::new();
//! let out = env
//!     .render_str("Hello {{ name }}!", vars_from_json(json!({"name": "world"})))
//!     .unwrap();
//! assert_eq!(out, "Hello world!");
//! ```
//!
//! Template inheritance (`extends` / `block` / `super()`), includes,
//! imports, macros with keyword arguments, filters (sync and async),
//! tests, `if`/`for`/`switch` control flow and whitespace-trim markers
//! are supported; see the module docs for the moving parts.

pub mod compiler;
pub mod environment;
pub mod error;
pub mod filters;
pub mod globals;
pub mod loader;
pub mod runtime;
pub mod template;
pub mod testers;

pub use compiler::{compile, precompile, CompileOptions, Precompiled};
pub use environment::{Environment, EnvironmentOptions, Extension};
pub use error::{Error, ErrorKind, Result, Span};
pub use loader::{FileSystemLoader, Loader, MemoryLoader, TemplateSource};
pub use runtime::value::Value;
pub use template::Template;

use indexmap::IndexMap;

/// Render variables: an ordered name → value map.
pub type Vars = IndexMap<String, Value>;

/// Builds render variables from a JSON object. Non-object values yield
/// an empty variable set.
pub fn vars_from_json(json: serde_json::Value) -> Vars {
    match Value::from(json) {
        Value::Object(map) => (*map).clone(),
        _ => Vars::new(),
    }
}

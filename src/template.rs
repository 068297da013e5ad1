//! Compiled templates.
//!
//! A [`Template`] pairs a compiled IR program with the environment that
//! produced it. Rendering creates a per-render [`Context`] (seeded with
//! the environment's globals, then the caller's variables) and executes
//! the program's root function.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::compiler::ir::IrProgram;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::runtime::context::Context;
use crate::runtime::frame::Frame;
use crate::runtime::interp::{render_function, RenderCallback};
use crate::runtime::value::Value;

/// A compiled template bound to its environment.
pub struct Template {
    env: Environment,
    /// Loader name, when the template came from one.
    pub name: Option<String>,
    /// The (preprocessed) source, kept for error formatting.
    pub source: String,
    pub program: Rc<IrProgram>,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Template {
    pub(crate) fn new(
        env: Environment,
        name: Option<String>,
        source: String,
        program: Rc<IrProgram>,
    ) -> Self {
        Self {
            env,
            name,
            source,
            program,
        }
    }

    /// Names of the blocks this template defines.
    pub fn blocks(&self) -> Vec<String> {
        self.program.block_names()
    }

    fn template_name(&self) -> Option<Rc<str>> {
        self.name.as_deref().map(Rc::from)
    }

    fn make_context(&self, vars: IndexMap<String, Value>) -> Context {
        let mut seeded = self.env.globals();
        seeded.extend(vars);
        Context::new(seeded, &self.program)
    }

    /// Renders synchronously. Templates that suspend on work which does
    /// not complete inline (deferred async filters, async extensions)
    /// cannot finish here; use [`Template::render_with`] for those.
    pub fn render(&self, vars: IndexMap<String, Value>) -> Result<String> {
        let result = Rc::new(std::cell::RefCell::new(None));
        let slot = Rc::clone(&result);
        self.render_with(
            vars,
            Box::new(move |r| {
                *slot.borrow_mut() = Some(r);
            }),
        );
        let taken = result.borrow_mut().take();
        match taken {
            Some(r) => r,
            None => Err(Error::render(
                "render did not complete synchronously; use render_with for async templates",
            )),
        }
    }

    /// Renders through a callback; the callback fires exactly once.
    pub fn render_with(&self, vars: IndexMap<String, Value>, cb: RenderCallback) {
        tracing::debug!(
            name = self.name.as_deref().unwrap_or("<string>"),
            blocks = self.program.blocks.len(),
            "rendering template"
        );
        let context = self.make_context(vars);
        self.render_in(&context, &Frame::new(), cb);
    }

    /// Renders against an existing context and frame. Used for includes
    /// and parent-template delegation, where the caller owns both.
    pub fn render_in(&self, context: &Context, frame: &Frame, cb: RenderCallback) {
        render_function(
            &self.env,
            self.program.root.body.clone(),
            context,
            frame,
            None,
            self.template_name(),
            cb,
        );
    }

    /// Renders the template for its exports only.
    pub fn get_exported(&self, cb: Box<dyn FnOnce(Result<Value>)>) {
        self.get_exported_in(IndexMap::new(), &Frame::new(), cb);
    }

    /// Export extraction against explicit variables and frame (the
    /// `with context` import form passes the caller's).
    pub fn get_exported_in(
        &self,
        vars: IndexMap<String, Value>,
        frame: &Frame,
        cb: Box<dyn FnOnce(Result<Value>)>,
    ) {
        let context = self.make_context(vars);
        let exported = context.clone();
        render_function(
            &self.env,
            self.program.root.body.clone(),
            &context,
            frame,
            None,
            self.template_name(),
            Box::new(move |result| match result {
                Err(e) => cb(Err(e)),
                // The output is discarded; only the exports matter.
                Ok(_) => cb(Ok(exported.get_exported())),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reports_blocks() {
        let env = Environment::new();
        let t = env
            .compile_str("{% block a %}x{% endblock %}", Some("t.html"))
            .unwrap();
        assert_eq!(t.blocks(), vec!["a".to_string()]);
    }

    #[test]
    fn exports_come_back_as_an_object() {
        let env = Environment::new();
        let t = env.compile_str("{% set x = 41 + 1 %}", None).unwrap();
        let result = Rc::new(std::cell::RefCell::new(None));
        let slot = Rc::clone(&result);
        t.get_exported(Box::new(move |r| {
            *slot.borrow_mut() = Some(r);
        }));
        let exported = result.borrow_mut().take().unwrap().unwrap();
        let Value::Object(map) = exported else {
            panic!("expected object");
        };
        assert_eq!(map.get("x"), Some(&Value::Int(42)));
    }
}

//! The environment façade.
//!
//! An [`Environment`] holds everything user code registers — filters,
//! tests, extensions, globals, loaders — plus the options bag consulted
//! by the compiler, and a cache of compiled templates. Generated code
//! reaches back into it by name (`getFilter`, `getTest`, `getTemplate`,
//! `getExtension`). The handle is cheap to clone; registration is
//! expected between renders, not during them.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::compiler::{self, CompileOptions};
use crate::error::{Error, Result};
use crate::loader::Loader;
use crate::runtime::interp::ValueCallback;
use crate::runtime::value::Value;
use crate::template::Template;

/// The options bag.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentOptions {
    /// Escape expression output unless marked safe.
    pub autoescape: bool,
    /// Fail renders on undefined output instead of eliding it.
    pub throw_on_undefined: bool,
}

impl Default for EnvironmentOptions {
    fn default() -> Self {
        Self {
            autoescape: true,
            throw_on_undefined: false,
        }
    }
}

/// A synchronous filter.
pub type FilterFn = Rc<dyn Fn(&[Value]) -> Result<Value>>;
/// An asynchronous filter completing through a callback.
pub type AsyncFilterFn = Rc<dyn Fn(Vec<Value>, ValueCallback)>;
/// A test predicate for the `is` operator.
pub type TestFn = Rc<dyn Fn(&[Value]) -> Result<bool>>;

#[derive(Clone)]
enum FilterKind {
    Sync(FilterFn),
    Async(AsyncFilterFn),
}

/// A custom-tag extension.
pub trait Extension {
    /// Registry name, as referenced by generated code.
    fn name(&self) -> &str;
    /// Tag names this extension claims.
    fn tags(&self) -> Vec<String>;
    /// Optional source rewrite before lexing.
    fn preprocess(&self, source: &str) -> Option<String> {
        let _ = source;
        None
    }
    /// Whether the extension completes through a callback.
    fn is_async(&self) -> bool {
        false
    }
    /// Runs the tag. `content` is the rendered tag body, when the tag
    /// has one.
    fn run(&self, args: &[Value], content: Option<&str>) -> Result<Value>;
    /// Callback form; the default defers to [`Extension::run`].
    fn run_async(&self, args: Vec<Value>, content: Option<String>, cb: ValueCallback) {
        cb(self.run(&args, content.as_deref()));
    }
}

struct EnvInner {
    opts: EnvironmentOptions,
    filters: RefCell<FxHashMap<String, FilterKind>>,
    tests: RefCell<FxHashMap<String, TestFn>>,
    extensions: RefCell<Vec<Rc<dyn Extension>>>,
    globals: RefCell<IndexMap<String, Value>>,
    loaders: RefCell<Vec<Box<dyn Loader>>>,
    cache: RefCell<FxHashMap<String, Rc<Template>>>,
}

/// The environment handle.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<EnvInner>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An environment with the built-in filters, tests and globals.
    pub fn new() -> Self {
        Self::with_options(EnvironmentOptions::default())
    }

    pub fn with_options(opts: EnvironmentOptions) -> Self {
        let env = Environment {
            inner: Rc::new(EnvInner {
                opts,
                filters: RefCell::new(FxHashMap::default()),
                tests: RefCell::new(FxHashMap::default()),
                extensions: RefCell::new(Vec::new()),
                globals: RefCell::new(IndexMap::new()),
                loaders: RefCell::new(Vec::new()),
                cache: RefCell::new(FxHashMap::default()),
            }),
        };
        crate::filters::register_builtins(&env);
        crate::testers::register_builtins(&env);
        crate::globals::register_builtins(&env);
        env
    }

    pub fn opts(&self) -> EnvironmentOptions {
        self.inner.opts
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn add_filter(
        &self,
        name: &str,
        f: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) {
        self.inner
            .filters
            .borrow_mut()
            .insert(name.to_string(), FilterKind::Sync(Rc::new(f)));
    }

    pub fn add_async_filter(&self, name: &str, f: impl Fn(Vec<Value>, ValueCallback) + 'static) {
        self.inner
            .filters
            .borrow_mut()
            .insert(name.to_string(), FilterKind::Async(Rc::new(f)));
    }

    pub fn add_test(&self, name: &str, f: impl Fn(&[Value]) -> Result<bool> + 'static) {
        self.inner
            .tests
            .borrow_mut()
            .insert(name.to_string(), Rc::new(f));
    }

    pub fn add_global(&self, name: &str, value: Value) {
        self.inner
            .globals
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    pub fn add_extension(&self, ext: impl Extension + 'static) {
        self.inner.extensions.borrow_mut().push(Rc::new(ext));
    }

    pub fn add_loader(&self, loader: impl Loader + 'static) {
        self.inner.loaders.borrow_mut().push(Box::new(loader));
    }

    pub fn globals(&self) -> IndexMap<String, Value> {
        self.inner.globals.borrow().clone()
    }

    // =========================================================================
    // Lookup (the contract generated code assumes)
    // =========================================================================

    /// Names registered as asynchronous, for the transformer.
    pub fn async_filter_names(&self) -> FxHashSet<String> {
        self.inner
            .filters
            .borrow()
            .iter()
            .filter(|(_, kind)| matches!(kind, FilterKind::Async(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn filter_kind(&self, name: &str) -> Result<FilterKind> {
        // The generator emits `default_` for the reserved name.
        let name = if name == "default_" { "default" } else { name };
        self.inner
            .filters
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::render(format!("filter not found: {}", name)))
    }

    /// Invokes a synchronous filter.
    pub fn call_filter(&self, name: &str, args: &[Value]) -> Result<Value> {
        match self.filter_kind(name)? {
            FilterKind::Sync(f) => f(args),
            FilterKind::Async(_) => Err(Error::render(format!(
                "filter `{}` is asynchronous; the template must be compiled with it registered",
                name
            ))),
        }
    }

    /// Invokes a filter in callback form; synchronous filters complete
    /// inline.
    pub fn call_filter_async(&self, name: &str, args: Vec<Value>, cb: ValueCallback) {
        match self.filter_kind(name) {
            Err(e) => cb(Err(e)),
            Ok(FilterKind::Sync(f)) => cb(f(&args)),
            Ok(FilterKind::Async(f)) => f(args, cb),
        }
    }

    /// Invokes a test; the subject is the first argument.
    pub fn call_test(&self, name: &str, args: &[Value]) -> Result<bool> {
        let test = self
            .inner
            .tests
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::render(format!("test not found: {}", name)))?;
        test(args)
    }

    pub fn get_extension(&self, name: &str) -> Result<Rc<dyn Extension>> {
        self.inner
            .extensions
            .borrow()
            .iter()
            .find(|e| e.name() == name)
            .cloned()
            .ok_or_else(|| Error::render(format!("extension not found: {}", name)))
    }

    // =========================================================================
    // Templates
    // =========================================================================

    fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            autoescape: self.inner.opts.autoescape,
            throw_on_undefined: self.inner.opts.throw_on_undefined,
            async_filters: self.async_filter_names(),
            extension_tags: self
                .inner
                .extensions
                .borrow()
                .iter()
                .flat_map(|e| {
                    let name = e.name().to_string();
                    let is_async = e.is_async();
                    e.tags()
                        .into_iter()
                        .map(move |tag| (tag, name.clone(), is_async))
                })
                .collect(),
        }
    }

    fn preprocess(&self, source: &str) -> String {
        let mut source = source.to_string();
        for ext in self.inner.extensions.borrow().iter() {
            if let Some(rewritten) = ext.preprocess(&source) {
                source = rewritten;
            }
        }
        source
    }

    /// Compiles source text into a template without caching it.
    pub fn compile_str(&self, source: &str, name: Option<&str>) -> Result<Rc<Template>> {
        let source = self.preprocess(source);
        let program = compiler::compile(&source, &self.compile_options()).map_err(|e| {
            match name {
                Some(name) => e.in_template(name),
                None => e,
            }
        })?;
        Ok(Rc::new(Template::new(
            self.clone(),
            name.map(str::to_string),
            source,
            program,
        )))
    }

    /// Resolves a template by name through the loaders, caching the
    /// compiled result.
    pub fn get_template(&self, name: &str) -> Result<Rc<Template>> {
        match self.get_template_opt(name)? {
            Some(t) => Ok(t),
            None => Err(Error::render(format!("template not found: {}", name))),
        }
    }

    /// Like [`Environment::get_template`] but missing templates resolve
    /// to `None`.
    pub fn get_template_opt(&self, name: &str) -> Result<Option<Rc<Template>>> {
        if let Some(t) = self.inner.cache.borrow().get(name) {
            return Ok(Some(Rc::clone(t)));
        }
        let found = {
            let loaders = self.inner.loaders.borrow();
            let mut found = None;
            for loader in loaders.iter() {
                if let Some(source) = loader.get_source(name)? {
                    found = Some(source);
                    break;
                }
            }
            found
        };
        let Some(found) = found else {
            return Ok(None);
        };
        let template = self.compile_str(&found.source, Some(&found.name))?;
        self.inner
            .cache
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&template));
        Ok(Some(template))
    }

    /// Callback form of template resolution: the load is a suspension
    /// point for generated code.
    pub fn get_template_cb(&self, name: &str, cb: Box<dyn FnOnce(Result<Rc<Template>>)>) {
        cb(self.get_template(name));
    }

    /// Callback form tolerating missing templates.
    pub fn get_template_opt_cb(
        &self,
        name: &str,
        cb: Box<dyn FnOnce(Result<Option<Rc<Template>>>)>,
    ) {
        cb(self.get_template_opt(name));
    }

    /// Drops all cached templates.
    pub fn clear_cache(&self) {
        self.inner.cache.borrow_mut().clear();
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Compiles and renders source text against `vars`.
    pub fn render_str(&self, source: &str, vars: IndexMap<String, Value>) -> Result<String> {
        self.compile_str(source, None)?.render(vars)
    }

    /// Renders a named template.
    pub fn render(&self, name: &str, vars: IndexMap<String, Value>) -> Result<String> {
        self.get_template(name)?.render(vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;

    #[test]
    fn filter_alias_resolves_reserved_name() {
        let env = Environment::new();
        assert!(env.call_filter("default_", &[Value::Int(1), Value::Int(2)]).is_ok());
    }

    #[test]
    fn unknown_filter_is_a_render_error() {
        let env = Environment::new();
        let err = env.call_filter("nope", &[]).unwrap_err();
        assert!(err.message.contains("filter not found"), "{}", err);
    }

    #[test]
    fn async_filters_are_reported_to_the_compiler() {
        let env = Environment::new();
        env.add_async_filter("fetch", |args, cb| cb(Ok(args[0].clone())));
        assert!(env.async_filter_names().contains("fetch"));
        // And calling one synchronously is an error.
        assert!(env.call_filter("fetch", &[]).is_err());
    }

    #[test]
    fn template_cache_reuses_compilations() {
        let env = Environment::new();
        let mut loader = MemoryLoader::new();
        loader.add("a.html", "A");
        env.add_loader(loader);
        let first = env.get_template("a.html").unwrap();
        let second = env.get_template("a.html").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_template_errors_by_name() {
        let env = Environment::new();
        let err = env.get_template("gone.html").unwrap_err();
        assert!(err.message.contains("gone.html"), "{}", err);
    }
}

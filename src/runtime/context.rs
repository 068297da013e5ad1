//! Per-render context: user variables, block override tables and
//! exports.
//!
//! A context is created for each render and shared (cheaply, via `Rc`)
//! with every function the render executes. Blocks are kept as ordered
//! override chains: the child template registers its blocks first, each
//! `extends` appends the parent's afterwards, so `get_block` resolves the
//! innermost override and `get_super` walks outward from the currently
//! executing one.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::compiler::ir::IrProgram;
use crate::error::{Error, Result};
use crate::runtime::value::Value;

/// A reference to one compiled block function.
#[derive(Clone)]
pub struct BlockRef {
    pub program: Rc<IrProgram>,
    pub name: String,
}

impl BlockRef {
    /// Identity: same program object, same block name.
    pub fn same_as(&self, other: &BlockRef) -> bool {
        Rc::ptr_eq(&self.program, &other.program) && self.name == other.name
    }
}

#[derive(Default)]
struct ContextInner {
    variables: IndexMap<String, Value>,
    blocks: FxHashMap<String, Vec<BlockRef>>,
    exports: Vec<String>,
}

/// The render-time context object.
#[derive(Clone, Default)]
pub struct Context {
    inner: Rc<RefCell<ContextInner>>,
}

impl Context {
    /// Creates a context over `variables`, registering the rendering
    /// template's own blocks.
    pub fn new(variables: IndexMap<String, Value>, program: &Rc<IrProgram>) -> Self {
        let ctx = Context {
            inner: Rc::new(RefCell::new(ContextInner {
                variables,
                ..Default::default()
            })),
        };
        for (name, _) in &program.blocks {
            ctx.add_block(
                name,
                BlockRef {
                    program: Rc::clone(program),
                    name: name.clone(),
                },
            );
        }
        ctx
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.inner.borrow().variables.get(name).cloned()
    }

    pub fn set_variable(&self, name: &str, value: Value) {
        self.inner
            .borrow_mut()
            .variables
            .insert(name.to_string(), value);
    }

    pub fn get_variables(&self) -> IndexMap<String, Value> {
        self.inner.borrow().variables.clone()
    }

    pub fn add_export(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        if !inner.exports.iter().any(|n| n == name) {
            inner.exports.push(name.to_string());
        }
    }

    /// The exported bindings as an object value.
    pub fn get_exported(&self) -> Value {
        let inner = self.inner.borrow();
        let map: IndexMap<String, Value> = inner
            .exports
            .iter()
            .filter_map(|name| {
                inner
                    .variables
                    .get(name)
                    .map(|v| (name.clone(), v.clone()))
            })
            .collect();
        Value::object(map)
    }

    /// Appends a block implementation to the end of `name`'s override
    /// chain. Child overrides registered earlier keep precedence.
    pub fn add_block(&self, name: &str, block: BlockRef) {
        self.inner
            .borrow_mut()
            .blocks
            .entry(name.to_string())
            .or_default()
            .push(block);
    }

    /// The innermost override of block `name`.
    pub fn get_block(&self, name: &str) -> Result<BlockRef> {
        self.inner
            .borrow()
            .blocks
            .get(name)
            .and_then(|chain| chain.first())
            .cloned()
            .ok_or_else(|| Error::render(format!("block `{}` not found", name)))
    }

    /// The next implementation of `name` above `current` in the chain.
    pub fn get_super_block(&self, name: &str, current: &BlockRef) -> Result<BlockRef> {
        let inner = self.inner.borrow();
        let chain = inner
            .blocks
            .get(name)
            .ok_or_else(|| Error::render(format!("block `{}` not found", name)))?;
        let index = chain
            .iter()
            .position(|b| b.same_as(current))
            .ok_or_else(|| Error::render(format!("block `{}` is not in the chain", name)))?;
        chain
            .get(index + 1)
            .cloned()
            .ok_or_else(|| Error::render(format!("no super block for `{}`", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::{IrFunction, IrStmt};

    fn program_with_block(name: &str) -> Rc<IrProgram> {
        Rc::new(IrProgram {
            root: IrFunction {
                name: "root".into(),
                body: Rc::new(vec![IrStmt::Finish]),
            },
            blocks: vec![(
                name.to_string(),
                IrFunction {
                    name: format!("b_{}", name),
                    body: Rc::new(vec![IrStmt::Finish]),
                },
            )],
        })
    }

    #[test]
    fn child_block_wins_over_added_parent() {
        let child = program_with_block("b");
        let parent = program_with_block("b");
        let ctx = Context::new(IndexMap::new(), &child);
        ctx.add_block(
            "b",
            BlockRef {
                program: Rc::clone(&parent),
                name: "b".into(),
            },
        );
        let first = ctx.get_block("b").unwrap();
        assert!(Rc::ptr_eq(&first.program, &child));
    }

    #[test]
    fn super_walks_outward_from_current() {
        let child = program_with_block("b");
        let parent = program_with_block("b");
        let ctx = Context::new(IndexMap::new(), &child);
        ctx.add_block(
            "b",
            BlockRef {
                program: Rc::clone(&parent),
                name: "b".into(),
            },
        );
        let current = ctx.get_block("b").unwrap();
        let sup = ctx.get_super_block("b", &current).unwrap();
        assert!(Rc::ptr_eq(&sup.program, &parent));
        assert!(ctx.get_super_block("b", &sup).is_err());
    }

    #[test]
    fn exports_capture_variables() {
        let program = program_with_block("b");
        let ctx = Context::new(IndexMap::new(), &program);
        ctx.set_variable("x", Value::Int(1));
        ctx.add_export("x");
        let Value::Object(map) = ctx.get_exported() else {
            panic!("expected object");
        };
        assert_eq!(map.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn missing_block_is_a_render_error() {
        let program = program_with_block("b");
        let ctx = Context::new(IndexMap::new(), &program);
        assert!(ctx.get_block("nope").is_err());
    }
}

//! Render-time variable frames.
//!
//! The runtime twin of the compiler's frame: a chain of scopes re-created
//! per render so shadowing behaves exactly as the generator assumed.
//! Frames are shared (`Rc`) because macros and callers close over the
//! frame they were defined in.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::value::Value;

#[derive(Debug)]
struct FrameInner {
    vars: RefCell<FxHashMap<String, Value>>,
    parent: Option<Frame>,
    /// Lookups from this frame do not continue into the parent.
    isolate: bool,
}

/// One scope in the render-time frame chain.
#[derive(Debug, Clone)]
pub struct Frame {
    inner: Rc<FrameInner>,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// A fresh root frame.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(FrameInner {
                vars: RefCell::new(FxHashMap::default()),
                parent: None,
                isolate: false,
            }),
        }
    }

    /// Returns a child frame. With `isolate`, lookups in the child stop
    /// at the child.
    pub fn push(&self, isolate: bool) -> Frame {
        Frame {
            inner: Rc::new(FrameInner {
                vars: RefCell::new(FxHashMap::default()),
                parent: Some(self.clone()),
                isolate,
            }),
        }
    }

    /// Returns the parent frame, or this frame at the root.
    pub fn pop(&self) -> Frame {
        self.inner.parent.clone().unwrap_or_else(|| self.clone())
    }

    /// Resolves `name`, stopping at isolation boundaries.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = self.clone();
        loop {
            if let Some(value) = frame.inner.vars.borrow().get(name) {
                return Some(value.clone());
            }
            if frame.inner.isolate {
                return None;
            }
            frame = frame.inner.parent.clone()?;
        }
    }

    /// Writes `name` into this frame, or, with `resolve_up`, into the
    /// visible ancestor frame that already defines it.
    pub fn set(&self, name: &str, value: Value, resolve_up: bool) {
        if resolve_up {
            let mut frame = self.clone();
            loop {
                if frame.inner.vars.borrow().contains_key(name) {
                    frame
                        .inner
                        .vars
                        .borrow_mut()
                        .insert(name.to_string(), value);
                    return;
                }
                if frame.inner.isolate {
                    break;
                }
                match frame.inner.parent.clone() {
                    Some(parent) => frame = parent,
                    None => break,
                }
            }
        }
        self.inner
            .vars
            .borrow_mut()
            .insert(name.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_chains_to_parent() {
        let root = Frame::new();
        root.set("x", Value::Int(1), false);
        let child = root.push(false);
        assert_eq!(child.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn isolated_frames_stop_lookup() {
        let root = Frame::new();
        root.set("x", Value::Int(1), false);
        let child = root.push(true);
        assert_eq!(child.lookup("x"), None);
    }

    #[test]
    fn resolve_up_updates_defining_frame() {
        let root = Frame::new();
        root.set("x", Value::Int(1), false);
        let child = root.push(false);
        child.set("x", Value::Int(2), true);
        assert_eq!(root.lookup("x"), Some(Value::Int(2)));
    }

    #[test]
    fn plain_set_shadows_locally() {
        let root = Frame::new();
        root.set("x", Value::Int(1), false);
        let child = root.push(false);
        child.set("x", Value::Int(2), false);
        assert_eq!(child.lookup("x"), Some(Value::Int(2)));
        assert_eq!(root.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn pop_returns_parent() {
        let root = Frame::new();
        let child = root.push(false);
        child.set("y", Value::Int(3), false);
        let back = child.pop();
        assert_eq!(back.lookup("y"), None);
    }
}

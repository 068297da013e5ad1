//! Compile-time lexical frames.
//!
//! A frame maps template variable names to the identifiers the code
//! generator bound them to. Frames form a stack; macro bodies push an
//! isolating frame so lookups do not escape into the enclosing template
//! scope.

use rustc_hash::FxHashMap;

/// One lexical scope in the frame stack.
#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: FxHashMap<String, String>,
    /// Lookups from inner scopes stop here when set.
    isolate: bool,
}

/// A stack of compile-time scopes.
#[derive(Debug, Clone)]
pub struct Frame {
    scopes: Vec<Scope>,
    /// Marks the template's top-level frame, where `set` also exports.
    top_level: bool,
}

impl Frame {
    /// Creates the top-level frame of a template.
    pub fn top() -> Self {
        Self {
            scopes: vec![Scope::default()],
            top_level: true,
        }
    }

    /// Pushes a child scope. When `isolate` is set, lookups from the new
    /// scope will not see bindings made outside it.
    pub fn push(&mut self, isolate: bool) {
        self.scopes.push(Scope {
            bindings: FxHashMap::default(),
            isolate,
        });
    }

    /// Pops the innermost scope. The root scope is never popped.
    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Resolves `name` against this scope and its visible ancestors.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        for scope in self.scopes.iter().rev() {
            if let Some(id) = scope.bindings.get(name) {
                return Some(id);
            }
            if scope.isolate {
                return None;
            }
        }
        None
    }

    /// Binds `name` to `id` in the current scope. With `resolve_up`, an
    /// existing binding in a visible ancestor scope is overwritten in the
    /// scope that defines it instead.
    pub fn set(&mut self, name: &str, id: &str, resolve_up: bool) {
        if resolve_up {
            let mut target = None;
            for (i, scope) in self.scopes.iter().enumerate().rev() {
                if scope.bindings.contains_key(name) {
                    target = Some(i);
                    break;
                }
                if scope.isolate {
                    break;
                }
            }
            if let Some(i) = target {
                self.scopes[i].bindings.insert(name.to_string(), id.to_string());
                return;
            }
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string(), id.to_string());
        }
    }

    /// True while no scope has been pushed: `set` at this depth also
    /// writes context variables and exports.
    pub fn is_top_level(&self) -> bool {
        self.top_level && self.scopes.len() == 1
    }
}

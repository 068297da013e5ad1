//! Dynamic values flowing through rendered templates.
//!
//! The value model follows the IR's host language: numbers are ints or
//! floats with cross-type comparison, `undefined` and `null` are
//! distinct, empty arrays are truthy, and equality is the loose flavour
//! (`null == undefined`). Strings marked safe skip autoescaping.
//! Aggregates are shared via `Rc`, so cloning a value is cheap.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::compiler::ir::{IrBody, IrMacroArg};
use crate::error::Span;
use crate::runtime::context::Context;
use crate::runtime::frame::Frame;

/// A macro (or `{% call %}` caller) value: signature, compiled body and
/// the scope it closed over.
pub struct MacroValue {
    pub name: String,
    pub args: Vec<IrMacroArg>,
    pub body: IrBody,
    /// The frame the definition closed over.
    pub def_frame: Frame,
    /// The context of the defining template, so imported macros keep
    /// seeing their own module's variables and blocks.
    pub def_context: Context,
    /// Locals of the defining function. Callers capture these so their
    /// bodies can reference enclosing temporaries; macros start clean.
    pub def_vars: Option<Rc<RefCell<FxHashMap<String, Value>>>>,
    /// Macros isolate their frame; callers see the enclosing scope.
    pub isolate: bool,
    pub span: Span,
}

impl fmt::Debug for MacroValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroValue")
            .field("name", &self.name)
            .field("args", &self.args.len())
            .finish()
    }
}

/// A host function exposed to templates (globals like `range`).
pub type NativeFn = Rc<dyn Fn(&[Value]) -> crate::error::Result<Value>>;

/// A template value.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// A string that autoescaping must not touch.
    Safe(Rc<str>),
    Array(Rc<Vec<Value>>),
    Object(Rc<IndexMap<String, Value>>),
    /// Keyword arguments marshalled for a call; a dedicated variant so
    /// the marker cannot be forged by template data.
    KeywordArgs(Rc<IndexMap<String, Value>>),
    Macro(Rc<MacroValue>),
    Func(&'static str, NativeFn),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Safe(s) => write!(f, "safe({:?})", s),
            Value::Array(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Object(map) => f.debug_map().entries(map.iter()).finish(),
            Value::KeywordArgs(map) => {
                write!(f, "kwargs")?;
                f.debug_map().entries(map.iter()).finish()
            }
            Value::Macro(m) => write!(f, "<macro {}>", m.name),
            Value::Func(name, _) => write!(f, "<function {}>", name),
        }
    }
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn safe(s: impl AsRef<str>) -> Self {
        Value::Safe(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(items))
    }

    pub fn object(map: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(map))
    }

    pub fn is_undefined_or_null(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, Value::Safe(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::Safe(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view for arithmetic and comparison.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Truthiness in the host language's sense: `0`, `""`, `null`,
    /// `undefined` and `NaN` are falsy; empty aggregates are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) | Value::Safe(s) => !s.is_empty(),
            Value::Array(_)
            | Value::Object(_)
            | Value::KeywordArgs(_)
            | Value::Macro(_)
            | Value::Func(..) => true,
        }
    }

    /// String coercion for concatenation and display.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) | Value::Safe(s) => s.to_string(),
            Value::Array(items) => items
                .iter()
                .map(|v| v.to_display())
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) | Value::KeywordArgs(_) => "[object Object]".to_string(),
            Value::Macro(m) => format!("<macro {}>", m.name),
            Value::Func(name, _) => format!("<function {}>", name),
        }
    }

    /// Loose equality: cross-numeric comparison, `null == undefined`,
    /// content comparison for strings (safe or not), structural for
    /// aggregates.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (a, b) => {
                if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
                    return x == y;
                }
                match (a, b) {
                    (Value::Str(_) | Value::Safe(_), Value::Str(_) | Value::Safe(_)) => {
                        a.as_str() == b.as_str()
                    }
                    (Value::Array(x), Value::Array(y)) => {
                        x.len() == y.len()
                            && x.iter().zip(y.iter()).all(|(a, b)| a.loose_eq(b))
                    }
                    (Value::Object(x), Value::Object(y)) => {
                        x.len() == y.len()
                            && x.iter().all(|(k, v)| {
                                y.get(k).is_some_and(|other| v.loose_eq(other))
                            })
                    }
                    (Value::Macro(x), Value::Macro(y)) => Rc::ptr_eq(x, y),
                    _ => false,
                }
            }
        }
    }

    /// Relational comparison; numbers numerically, strings
    /// lexicographically. Anything else is incomparable and yields
    /// `None`.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return a.partial_cmp(&b);
        }
        if let (Some(a), Some(b)) = (self.as_str(), other.as_str()) {
            return Some(a.cmp(b));
        }
        None
    }

    /// Number of items for `loop.length`-style bookkeeping.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) | Value::Safe(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) | Value::KeywordArgs(map) => Some(map.len()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

/// Host-style float printing: integral values print without a fraction.
pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::str(s)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::array(items.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::str(s),
            serde_json::Value::Array(items) => {
                Value::array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::object(
                map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_host_rules() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::str("").is_truthy());
        // Empty aggregates are truthy.
        assert!(Value::array(vec![]).is_truthy());
        assert!(Value::object(IndexMap::new()).is_truthy());
    }

    #[test]
    fn loose_equality_crosses_numeric_types() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Null.loose_eq(&Value::Undefined));
        assert!(!Value::Int(0).loose_eq(&Value::str("")));
        assert!(Value::str("x").loose_eq(&Value::safe("x")));
    }

    #[test]
    fn structural_equality_for_aggregates() {
        let a = Value::from(vec![1i64, 2]);
        let b = Value::from(vec![1i64, 2]);
        assert!(a.loose_eq(&b));
    }

    #[test]
    fn float_display_drops_integral_fraction() {
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(Value::Float(8.0).to_display(), "8");
    }

    #[test]
    fn array_display_joins_with_commas() {
        assert_eq!(Value::from(vec![1i64, 2, 3]).to_display(), "1,2,3");
    }

    #[test]
    fn from_json_preserves_structure() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"name": "x", "tags": ["a", "b"], "n": 3}"#,
        )
        .unwrap();
        let value = Value::from(json);
        let Value::Object(map) = &value else {
            panic!("expected object");
        };
        assert_eq!(map.get("name"), Some(&Value::str("x")));
        assert_eq!(map.get("n"), Some(&Value::Int(3)));
    }

    #[test]
    fn comparison_orders_numbers_and_strings() {
        use std::cmp::Ordering;
        assert_eq!(Value::Int(1).compare(&Value::Float(2.0)), Some(Ordering::Less));
        assert_eq!(
            Value::str("b").compare(&Value::str("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int(1).compare(&Value::str("a")), None);
    }
}

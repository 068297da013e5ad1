//! Runtime support for compiled templates.
//!
//! The helper vocabulary referenced by generated code: value suppression
//! and escaping, member lookup, keyword-argument marshalling, safe-string
//! propagation, the `in` operator, iteration adapters and error wrapping.
//! The evaluator in [`interp`] is the engine that binds an IR program
//! against these helpers.

pub mod context;
pub mod frame;
pub mod interp;
pub mod value;

use indexmap::IndexMap;

use crate::error::{Error, Result, Span};
use crate::runtime::context::Context;
use crate::runtime::frame::Frame;
use crate::runtime::value::Value;

/// Escapes `&`, `<`, `>`, `"` and `'` for HTML output.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Renders a value into the output buffer. Undefined and null vanish;
/// safe strings bypass escaping; everything else is escaped when
/// autoescape is on.
pub fn suppress_value(value: &Value, autoescape: bool) -> String {
    match value {
        Value::Undefined | Value::Null => String::new(),
        Value::Safe(s) => s.to_string(),
        other => {
            let text = other.to_display();
            if autoescape {
                escape_html(&text)
            } else {
                text
            }
        }
    }
}

/// Fails the render when a value is undefined or null.
pub fn ensure_defined(value: Value, span: Span) -> Result<Value> {
    if value.is_undefined_or_null() {
        Err(Error::render("attempted to output null or undefined value").at(span))
    } else {
        Ok(value)
    }
}

/// `obj[key]` in the host language's sense. Missing members resolve to
/// undefined rather than failing; `length` works on strings and arrays.
pub fn member_lookup(obj: &Value, key: &Value) -> Value {
    match (obj, key) {
        (Value::Object(map) | Value::KeywordArgs(map), key) => {
            if let Some(name) = key.as_str() {
                return map.get(name).cloned().unwrap_or(Value::Undefined);
            }
            Value::Undefined
        }
        (Value::Array(items), Value::Int(i)) => {
            if *i >= 0 {
                items.get(*i as usize).cloned().unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }
        }
        (Value::Array(items), key) if key.as_str() == Some("length") => {
            Value::Int(items.len() as i64)
        }
        (Value::Str(s) | Value::Safe(s), key) if key.as_str() == Some("length") => {
            Value::Int(s.chars().count() as i64)
        }
        (Value::Str(s) | Value::Safe(s), Value::Int(i)) => {
            if *i >= 0 {
                s.chars()
                    .nth(*i as usize)
                    .map(|c| Value::str(c.to_string()))
                    .unwrap_or(Value::Undefined)
            } else {
                Value::Undefined
            }
        }
        _ => Value::Undefined,
    }
}

/// Frame first, then context; the compiler emits this for every symbol
/// it could not bind statically.
pub fn context_or_frame_lookup(context: &Context, frame: &Frame, name: &str) -> Value {
    if let Some(value) = frame.lookup(name) {
        return value;
    }
    context.lookup(name).unwrap_or(Value::Undefined)
}

/// Membership: substring for strings, element for arrays, key for
/// objects. Anything else cannot be searched.
pub fn in_operator(needle: &Value, haystack: &Value) -> Result<bool> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|v| v.loose_eq(needle))),
        Value::Object(map) | Value::KeywordArgs(map) => Ok(needle
            .as_str()
            .is_some_and(|name| map.contains_key(name))),
        Value::Str(s) | Value::Safe(s) => match needle.as_str() {
            Some(sub) => Ok(s.contains(sub)),
            None => Ok(s.contains(&needle.to_display())),
        },
        other => Err(Error::render(format!(
            "cannot use `in` to search {}",
            type_name(other)
        ))),
    }
}

/// Object keys in insertion order.
pub fn keys(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) | Value::KeywordArgs(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Adapts a value for iteration: arrays pass through, strings iterate
/// per character, undefined and null iterate zero times.
pub fn from_iterator(value: &Value) -> Value {
    match value {
        Value::Str(s) | Value::Safe(s) => Value::array(
            s.chars().map(|c| Value::str(c.to_string())).collect(),
        ),
        Value::Undefined | Value::Null => Value::array(Vec::new()),
        other => other.clone(),
    }
}

/// Wraps a map as the keyword-args marker value.
pub fn make_keyword_args(map: IndexMap<String, Value>) -> Value {
    Value::KeywordArgs(std::rc::Rc::new(map))
}

pub fn is_keyword_args(value: &Value) -> bool {
    matches!(value, Value::KeywordArgs(_))
}

/// Splits a call's argument list into positionals and keyword args.
pub fn get_keyword_args(args: &[Value]) -> (&[Value], Option<&IndexMap<String, Value>>) {
    match args.last() {
        Some(Value::KeywordArgs(map)) => (&args[..args.len() - 1], Some(map)),
        _ => (args, None),
    }
}

/// Number of positional arguments.
pub fn num_args(args: &[Value]) -> usize {
    get_keyword_args(args).0.len()
}

/// Marks a string value safe; other values pass through.
pub fn mark_safe(value: Value) -> Value {
    match value {
        Value::Str(s) => Value::Safe(s),
        other => other,
    }
}

/// Propagates safeness from `of` onto `value`.
pub fn copy_safeness(of: &Value, value: Value) -> Value {
    if of.is_safe() {
        mark_safe(value)
    } else {
        value
    }
}

/// Wraps an error with template coordinates unless it already carries
/// its own, preserving the innermost source.
pub fn handle_error(err: Error, span: Span, template_name: Option<&str>) -> Error {
    let err = err.with_span_fallback(span);
    match template_name {
        Some(name) => err.in_template(name),
        None => err,
    }
}

/// A short value-kind name for diagnostics.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Int(_) | Value::Float(_) => "a number",
        Value::Str(_) | Value::Safe(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
        Value::KeywordArgs(_) => "keyword arguments",
        Value::Macro(_) => "a macro",
        Value::Func(..) => "a function",
    }
}

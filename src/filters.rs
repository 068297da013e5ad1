//! Built-in filters.
//!
//! The first argument is always the piped value; keyword arguments, when
//! present, arrive as a trailing marker value and are unpacked here.
//! String-shaping filters propagate safeness so a `| safe` upstream is
//! not undone.

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::runtime::value::Value;
use crate::runtime::{copy_safeness, escape_html, get_keyword_args, mark_safe, type_name};

/// Registers the built-in filter set on an environment.
pub fn register_builtins(env: &Environment) {
    env.add_filter("abs", abs);
    env.add_filter("capitalize", capitalize);
    env.add_filter("default", default);
    env.add_filter("escape", escape);
    env.add_filter("first", first);
    env.add_filter("float", float);
    env.add_filter("int", int);
    env.add_filter("join", join);
    env.add_filter("last", last);
    env.add_filter("length", length);
    env.add_filter("lower", lower);
    env.add_filter("replace", replace);
    env.add_filter("reverse", reverse);
    env.add_filter("round", round);
    env.add_filter("safe", safe);
    env.add_filter("sort", sort);
    env.add_filter("string", string);
    env.add_filter("sum", sum);
    env.add_filter("title", title);
    env.add_filter("trim", trim);
    env.add_filter("upper", upper);
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// Resolves an argument positionally or by keyword name.
fn named_arg(args: &[Value], index: usize, name: &str) -> Value {
    let (positional, kwargs) = get_keyword_args(args);
    if let Some(v) = positional.get(index) {
        return v.clone();
    }
    kwargs
        .and_then(|k| k.get(name))
        .cloned()
        .unwrap_or(Value::Undefined)
}

fn abs(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(Error::render(format!(
            "abs expects a number, got {}",
            type_name(&other)
        ))),
    }
}

fn capitalize(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let s = value.to_display();
    let mut chars = s.chars();
    let capitalized = match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(copy_safeness(&value, Value::str(capitalized)))
}

/// `default(value, fallback, boolean=false)`: the fallback applies to
/// undefined values, or to all falsy values when `boolean` is set.
fn default(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let fallback = named_arg(args, 1, "default");
    let falsy_too = named_arg(args, 2, "boolean").is_truthy();
    let use_fallback = if falsy_too {
        !value.is_truthy()
    } else {
        matches!(value, Value::Undefined)
    };
    Ok(if use_fallback { fallback } else { value })
}

/// Force-escapes now and marks the result safe so it is not escaped
/// again.
fn escape(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        already @ Value::Safe(_) => Ok(already),
        other => Ok(Value::safe(escape_html(&other.to_display()))),
    }
}

fn first(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Undefined)),
        Value::Str(s) | Value::Safe(s) => Ok(s
            .chars()
            .next()
            .map(|c| Value::str(c.to_string()))
            .unwrap_or(Value::Undefined)),
        other => Err(Error::render(format!(
            "first expects a sequence, got {}",
            type_name(&other)
        ))),
    }
}

fn float(args: &[Value]) -> Result<Value> {
    let fallback = match args.get(1) {
        Some(v) => v.clone(),
        None => Value::Float(0.0),
    };
    Ok(match arg(args, 0) {
        Value::Int(i) => Value::Float(i as f64),
        Value::Float(f) => Value::Float(f),
        Value::Str(s) | Value::Safe(s) => match s.trim().parse::<f64>() {
            Ok(f) => Value::Float(f),
            Err(_) => fallback,
        },
        _ => fallback,
    })
}

fn int(args: &[Value]) -> Result<Value> {
    let fallback = match args.get(1) {
        Some(v) => v.clone(),
        None => Value::Int(0),
    };
    Ok(match arg(args, 0) {
        Value::Int(i) => Value::Int(i),
        Value::Float(f) => Value::Int(f as i64),
        Value::Str(s) | Value::Safe(s) => match s.trim().parse::<i64>() {
            Ok(i) => Value::Int(i),
            Err(_) => fallback,
        },
        _ => fallback,
    })
}

fn join(args: &[Value]) -> Result<Value> {
    let sep = match args.get(1) {
        Some(v) => v.to_display(),
        None => String::new(),
    };
    match arg(args, 0) {
        Value::Array(items) => Ok(Value::str(
            items
                .iter()
                .map(|v| v.to_display())
                .collect::<Vec<_>>()
                .join(&sep),
        )),
        other => Err(Error::render(format!(
            "join expects an array, got {}",
            type_name(&other)
        ))),
    }
}

fn last(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Undefined)),
        Value::Str(s) | Value::Safe(s) => Ok(s
            .chars()
            .last()
            .map(|c| Value::str(c.to_string()))
            .unwrap_or(Value::Undefined)),
        other => Err(Error::render(format!(
            "last expects a sequence, got {}",
            type_name(&other)
        ))),
    }
}

fn length(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    match value.len() {
        Some(n) => Ok(Value::Int(n as i64)),
        None => Err(Error::render(format!(
            "{} has no length",
            type_name(&value)
        ))),
    }
}

fn lower(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let lowered = value.to_display().to_lowercase();
    Ok(copy_safeness(&value, Value::str(lowered)))
}

fn replace(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let s = value.to_display();
    let old = arg(args, 1).to_display();
    let new = arg(args, 2).to_display();
    let replaced = if old.is_empty() { s } else { s.replace(&old, &new) };
    Ok(copy_safeness(&value, Value::str(replaced)))
}

fn reverse(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        Value::Array(items) => {
            let mut reversed = (*items).clone();
            reversed.reverse();
            Ok(Value::array(reversed))
        }
        Value::Str(s) | Value::Safe(s) => Ok(Value::str(s.chars().rev().collect::<String>())),
        other => Err(Error::render(format!(
            "reverse expects a sequence, got {}",
            type_name(&other)
        ))),
    }
}

/// `round(value, precision=0, method="common")`, methods `common`,
/// `ceil` and `floor`.
fn round(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0)
        .as_number()
        .ok_or_else(|| Error::render("round expects a number"))?;
    let precision = match named_arg(args, 1, "precision") {
        Value::Undefined => 0,
        v => v.as_number().unwrap_or(0.0) as i32,
    };
    let method = match named_arg(args, 2, "method") {
        Value::Undefined => "common".to_string(),
        v => v.to_display(),
    };
    let factor = 10f64.powi(precision);
    let scaled = value * factor;
    let rounded = match method.as_str() {
        "common" => scaled.round(),
        "ceil" => scaled.ceil(),
        "floor" => scaled.floor(),
        other => {
            return Err(Error::render(format!("unknown rounding method `{}`", other)));
        }
    };
    Ok(Value::Float(rounded / factor))
}

fn safe(args: &[Value]) -> Result<Value> {
    match arg(args, 0) {
        already @ Value::Safe(_) => Ok(already),
        Value::Undefined => Ok(Value::Undefined),
        other => Ok(mark_safe(Value::str(other.to_display()))),
    }
}

/// `sort(reverse=false)`: numbers and strings, stable.
fn sort(args: &[Value]) -> Result<Value> {
    let Value::Array(items) = arg(args, 0) else {
        return Err(Error::render(format!(
            "sort expects an array, got {}",
            type_name(&arg(args, 0))
        )));
    };
    let descending = named_arg(args, 1, "reverse").is_truthy();
    let mut sorted = (*items).clone();
    sorted.sort_by(|a, b| {
        let ord = a.compare(b).unwrap_or(std::cmp::Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    Ok(Value::array(sorted))
}

fn string(args: &[Value]) -> Result<Value> {
    Ok(Value::str(arg(args, 0).to_display()))
}

fn sum(args: &[Value]) -> Result<Value> {
    let Value::Array(items) = arg(args, 0) else {
        return Err(Error::render(format!(
            "sum expects an array, got {}",
            type_name(&arg(args, 0))
        )));
    };
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut saw_float = false;
    for item in items.iter() {
        match item {
            Value::Int(i) => int_total += i,
            Value::Float(f) => {
                saw_float = true;
                float_total += f;
            }
            other => {
                return Err(Error::render(format!(
                    "sum expects numbers, got {}",
                    type_name(other)
                )));
            }
        }
    }
    Ok(if saw_float {
        Value::Float(float_total + int_total as f64)
    } else {
        Value::Int(int_total)
    })
}

fn title(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let s = value.to_display();
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            out.push(c);
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.extend(c.to_lowercase());
        }
    }
    Ok(copy_safeness(&value, Value::str(out)))
}

fn trim(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let trimmed = value.to_display().trim().to_string();
    Ok(copy_safeness(&value, Value::str(trimmed)))
}

fn upper(args: &[Value]) -> Result<Value> {
    let value = arg(args, 0);
    let raised = value.to_display().to_uppercase();
    Ok(copy_safeness(&value, Value::str(raised)))
}

//! Built-in tests for the `is` operator.
//!
//! A test receives the subject as its first argument, any test arguments
//! after it, and answers a plain boolean.

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::runtime::value::Value;

/// Registers the built-in test set on an environment.
pub fn register_builtins(env: &Environment) {
    env.add_test("callable", callable);
    env.add_test("defined", defined);
    env.add_test("divisibleby", divisibleby);
    env.add_test("eq", eq);
    env.add_test("equalto", eq);
    env.add_test("even", even);
    env.add_test("iterable", iterable);
    env.add_test("lower", is_lower);
    env.add_test("none", none);
    env.add_test("null", none);
    env.add_test("number", number);
    env.add_test("odd", odd);
    env.add_test("string", string);
    env.add_test("undefined", undefined);
    env.add_test("upper", is_upper);
}

fn subject(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or(Value::Undefined)
}

fn callable(args: &[Value]) -> Result<bool> {
    Ok(matches!(subject(args), Value::Macro(_) | Value::Func(..)))
}

fn defined(args: &[Value]) -> Result<bool> {
    Ok(!matches!(subject(args), Value::Undefined))
}

fn undefined(args: &[Value]) -> Result<bool> {
    Ok(matches!(subject(args), Value::Undefined))
}

fn none(args: &[Value]) -> Result<bool> {
    Ok(matches!(subject(args), Value::Null))
}

fn integer_subject(args: &[Value], test: &str) -> Result<i64> {
    match subject(args) {
        Value::Int(i) => Ok(i),
        other => Err(Error::render(format!(
            "`is {}` expects an integer, got {}",
            test,
            crate::runtime::type_name(&other)
        ))),
    }
}

fn divisibleby(args: &[Value]) -> Result<bool> {
    let n = integer_subject(args, "divisibleby")?;
    match args.get(1) {
        Some(Value::Int(d)) if *d != 0 => Ok(n % d == 0),
        Some(Value::Int(_)) => Err(Error::render("`is divisibleby` by zero")),
        _ => Err(Error::render("`is divisibleby` expects an integer argument")),
    }
}

fn even(args: &[Value]) -> Result<bool> {
    Ok(integer_subject(args, "even")? % 2 == 0)
}

fn odd(args: &[Value]) -> Result<bool> {
    Ok(integer_subject(args, "odd")? % 2 != 0)
}

fn eq(args: &[Value]) -> Result<bool> {
    let other = args.get(1).cloned().unwrap_or(Value::Undefined);
    Ok(subject(args).loose_eq(&other))
}

fn iterable(args: &[Value]) -> Result<bool> {
    Ok(matches!(
        subject(args),
        Value::Array(_) | Value::Object(_) | Value::Str(_) | Value::Safe(_)
    ))
}

fn number(args: &[Value]) -> Result<bool> {
    Ok(matches!(subject(args), Value::Int(_) | Value::Float(_)))
}

fn string(args: &[Value]) -> Result<bool> {
    Ok(matches!(subject(args), Value::Str(_) | Value::Safe(_)))
}

fn is_lower(args: &[Value]) -> Result<bool> {
    match subject(args).as_str() {
        Some(s) => Ok(!s.is_empty() && s.chars().all(|c| !c.is_uppercase())),
        None => Ok(false),
    }
}

fn is_upper(args: &[Value]) -> Result<bool> {
    match subject(args).as_str() {
        Some(s) => Ok(!s.is_empty() && s.chars().all(|c| !c.is_lowercase())),
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_and_undefined_split_on_undefined_only() {
        assert!(defined(&[Value::Null]).unwrap());
        assert!(!defined(&[Value::Undefined]).unwrap());
        assert!(undefined(&[Value::Undefined]).unwrap());
    }

    #[test]
    fn parity_tests_require_integers() {
        assert!(even(&[Value::Int(4)]).unwrap());
        assert!(odd(&[Value::Int(3)]).unwrap());
        assert!(even(&[Value::str("x")]).is_err());
    }

    #[test]
    fn divisibleby_checks_remainder() {
        assert!(divisibleby(&[Value::Int(9), Value::Int(3)]).unwrap());
        assert!(!divisibleby(&[Value::Int(10), Value::Int(3)]).unwrap());
        assert!(divisibleby(&[Value::Int(1), Value::Int(0)]).is_err());
    }

    #[test]
    fn case_tests() {
        assert!(is_lower(&[Value::str("abc")]).unwrap());
        assert!(!is_lower(&[Value::str("aBc")]).unwrap());
        assert!(is_upper(&[Value::str("ABC")]).unwrap());
    }
}

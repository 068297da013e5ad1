//! Built-in global values: `range`, `cycler` and `joiner`.

use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::runtime::value::Value;

/// Registers the built-in globals on an environment.
pub fn register_builtins(env: &Environment) {
    env.add_global("range", Value::Func("range", Rc::new(range)));
    env.add_global("cycler", Value::Func("cycler", Rc::new(cycler)));
    env.add_global("joiner", Value::Func("joiner", Rc::new(joiner)));
}

fn int_arg(args: &[Value], index: usize, name: &str) -> Result<i64> {
    match args.get(index) {
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(Error::render(format!(
            "{} expects integers, got {}",
            name,
            crate::runtime::type_name(other)
        ))),
        None => Err(Error::render(format!("{}: missing argument", name))),
    }
}

/// `range(stop)` / `range(start, stop[, step])`.
fn range(args: &[Value]) -> Result<Value> {
    let (start, stop, step) = match args.len() {
        1 => (0, int_arg(args, 0, "range")?, 1),
        2 => (int_arg(args, 0, "range")?, int_arg(args, 1, "range")?, 1),
        _ => (
            int_arg(args, 0, "range")?,
            int_arg(args, 1, "range")?,
            int_arg(args, 2, "range")?,
        ),
    };
    if step == 0 {
        return Err(Error::render("range: step must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        i += step;
    }
    Ok(Value::array(items))
}

/// `cycler(a, b, ...)`: an object whose `next()` walks the items in a
/// loop and whose `reset()` starts over.
fn cycler(args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        return Err(Error::render("cycler: at least one item required"));
    }
    let items: Rc<Vec<Value>> = Rc::new(args.to_vec());
    let position = Rc::new(Cell::new(0usize));

    let next_items = Rc::clone(&items);
    let next_position = Rc::clone(&position);
    let next = move |_args: &[Value]| -> Result<Value> {
        let i = next_position.get();
        next_position.set((i + 1) % next_items.len());
        Ok(next_items[i].clone())
    };

    let reset_position = Rc::clone(&position);
    let reset = move |_args: &[Value]| -> Result<Value> {
        reset_position.set(0);
        Ok(Value::Undefined)
    };

    let mut map = IndexMap::new();
    map.insert("next".to_string(), Value::Func("next", Rc::new(next)));
    map.insert("reset".to_string(), Value::Func("reset", Rc::new(reset)));
    Ok(Value::object(map))
}

/// `joiner(sep=", ")`: a function returning "" on first call and the
/// separator afterwards.
fn joiner(args: &[Value]) -> Result<Value> {
    let sep = match args.first() {
        Some(v) => v.to_display(),
        None => ", ".to_string(),
    };
    let fired = Cell::new(false);
    let f = move |_args: &[Value]| -> Result<Value> {
        if fired.get() {
            Ok(Value::str(sep.clone()))
        } else {
            fired.set(true);
            Ok(Value::str(""))
        }
    };
    Ok(Value::Func("joiner", Rc::new(f)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_forms() {
        assert_eq!(range(&[Value::Int(3)]).unwrap(), Value::from(vec![0i64, 1, 2]));
        assert_eq!(
            range(&[Value::Int(2), Value::Int(5)]).unwrap(),
            Value::from(vec![2i64, 3, 4])
        );
        assert_eq!(
            range(&[Value::Int(5), Value::Int(0), Value::Int(-2)]).unwrap(),
            Value::from(vec![5i64, 3, 1])
        );
        assert!(range(&[Value::Int(0), Value::Int(1), Value::Int(0)]).is_err());
    }

    #[test]
    fn cycler_loops_and_resets() {
        let c = cycler(&[Value::str("a"), Value::str("b")]).unwrap();
        let Value::Object(map) = &c else { panic!("expected object") };
        let Some(Value::Func(_, next)) = map.get("next") else {
            panic!("expected next()");
        };
        assert_eq!(next(&[]).unwrap(), Value::str("a"));
        assert_eq!(next(&[]).unwrap(), Value::str("b"));
        assert_eq!(next(&[]).unwrap(), Value::str("a"));
        let Some(Value::Func(_, reset)) = map.get("reset") else {
            panic!("expected reset()");
        };
        reset(&[]).unwrap();
        assert_eq!(next(&[]).unwrap(), Value::str("a"));
    }

    #[test]
    fn joiner_skips_first_separator() {
        let j = joiner(&[Value::str("|")]).unwrap();
        let Value::Func(_, f) = j else { panic!("expected function") };
        assert_eq!(f(&[]).unwrap(), Value::str(""));
        assert_eq!(f(&[]).unwrap(), Value::str("|"));
    }
}

//! Built-in functions for `func` nodes
//!
//! A session file cannot carry code, so `func` nodes name one of the
//! functions below. Each receives the evaluated arguments and returns a value
//! that becomes the state's `result` attribute.

use anyhow::{bail, Result};
use trialstate::{Function, Value};

/// Names accepted by [`builtin`]
pub const BUILTIN_NAMES: [&str; 6] = ["print", "sum", "min", "max", "concat", "len"];

/// Look up a built-in function by name
pub fn builtin(name: &str) -> Option<Function> {
    let function: Function = match name {
        "print" => Box::new(print),
        "sum" => Box::new(sum),
        "min" => Box::new(|args: &[Value]| extremum(args, "min", |a, b| a < b)),
        "max" => Box::new(|args: &[Value]| extremum(args, "max", |a, b| a > b)),
        "concat" => Box::new(concat),
        "len" => Box::new(len),
        _ => return None,
    };
    Some(function)
}

fn print(args: &[Value]) -> Result<Value> {
    let line = args
        .iter()
        .map(|value| match value {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    log::info!("{}", line);
    println!("{}", line);
    Ok(Value::Null)
}

fn numbers(args: &[Value], function: &str) -> Result<Vec<f64>> {
    args.iter()
        .map(|value| match value.as_f64() {
            Some(v) => Ok(v),
            None => bail!("{}() expects numbers, got {}", function, value.type_name()),
        })
        .collect()
}

fn sum(args: &[Value]) -> Result<Value> {
    if args.iter().all(|value| matches!(value, Value::Int(_))) {
        let mut total: i64 = 0;
        for value in args {
            if let Value::Int(v) = value {
                total = total
                    .checked_add(*v)
                    .ok_or_else(|| anyhow::anyhow!("sum() overflowed"))?;
            }
        }
        return Ok(Value::Int(total));
    }
    Ok(Value::Float(numbers(args, "sum")?.iter().sum()))
}

/// Smallest or largest argument, returned unconverted
fn extremum(args: &[Value], function: &str, better: fn(f64, f64) -> bool) -> Result<Value> {
    let values = numbers(args, function)?;
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        if best.map_or(true, |b| better(*v, values[b])) {
            best = Some(i);
        }
    }
    match best {
        Some(i) => Ok(args[i].clone()),
        None => bail!("{}() needs at least one argument", function),
    }
}

fn concat(args: &[Value]) -> Result<Value> {
    let mut out = String::new();
    for value in args {
        match value {
            Value::Str(s) => out.push_str(s),
            Value::Null => {}
            other => out.push_str(&other.to_string()),
        }
    }
    Ok(Value::Str(out))
}

fn len(args: &[Value]) -> Result<Value> {
    match args {
        [Value::List(items)] => Ok(Value::Int(items.len() as i64)),
        [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
        [other] => bail!("len() expects a list or string, got {}", other.type_name()),
        _ => bail!("len() takes exactly one argument, got {}", args.len()),
    }
}

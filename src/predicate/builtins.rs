//! Builtin functions available to predicates.
//!
//! All builtins are pure functions over JSON values. Higher-order builtins
//! (`any`, `all`, `count`, `filter`, `map`) take a lambda as their second
//! argument and charge one budget step per element.

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::Value;

use super::interpreter::{
    as_number, as_str, compare, contains, number, runtime, type_name, ArrayBuilder, Interpreter,
};
use super::parser::Expr;
use super::PredicateError;

/// Upper bound on compiled regex size, in bytes.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

pub(crate) fn call(
    interp: &mut Interpreter,
    name: &str,
    args: &[Expr],
) -> Result<Value, PredicateError> {
    match name {
        "any" | "all" | "count" | "filter" | "map" => higher_order(interp, name, args),
        _ => {
            let values = args
                .iter()
                .map(|arg| interp.eval(arg))
                .collect::<Result<Vec<_>, _>>()?;
            match plain(name, &values)? {
                text @ Value::String(_) => interp.admit(text),
                other => Ok(other),
            }
        }
    }
}

fn arity(name: &str, values: &[Value], expected: usize) -> Result<(), PredicateError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(runtime(format!(
            "`{name}` takes {expected} argument(s), got {}",
            values.len()
        )))
    }
}

fn count_value(n: usize) -> Value {
    Value::from(u64::try_from(n).unwrap_or(u64::MAX))
}

fn plain(name: &str, values: &[Value]) -> Result<Value, PredicateError> {
    match name {
        "len" => {
            arity(name, values, 1)?;
            match &values[0] {
                Value::String(s) => Ok(count_value(s.chars().count())),
                Value::Array(items) => Ok(count_value(items.len())),
                Value::Object(map) => Ok(count_value(map.len())),
                other => Err(runtime(format!("`len` cannot measure a {}", type_name(other)))),
            }
        }
        "contains" => {
            arity(name, values, 2)?;
            contains(&values[0], &values[1]).map(Value::Bool)
        }
        "starts_with" => {
            arity(name, values, 2)?;
            let text = as_str(&values[0], "`starts_with`")?;
            let prefix = as_str(&values[1], "`starts_with`")?;
            Ok(Value::Bool(text.starts_with(prefix)))
        }
        "ends_with" => {
            arity(name, values, 2)?;
            let text = as_str(&values[0], "`ends_with`")?;
            let suffix = as_str(&values[1], "`ends_with`")?;
            Ok(Value::Bool(text.ends_with(suffix)))
        }
        "matches" => {
            arity(name, values, 2)?;
            let text = as_str(&values[0], "`matches`")?;
            let pattern = as_str(&values[1], "`matches`")?;
            let regex = RegexBuilder::new(pattern)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| runtime(format!("invalid regex {pattern:?}: {e}")))?;
            Ok(Value::Bool(regex.is_match(text)))
        }
        "lower" => {
            arity(name, values, 1)?;
            Ok(Value::String(as_str(&values[0], "`lower`")?.to_lowercase()))
        }
        "upper" => {
            arity(name, values, 1)?;
            Ok(Value::String(as_str(&values[0], "`upper`")?.to_uppercase()))
        }
        "trim" => {
            arity(name, values, 1)?;
            Ok(Value::String(as_str(&values[0], "`trim`")?.trim().to_owned()))
        }
        "number" => {
            arity(name, values, 1)?;
            match &values[0] {
                Value::Number(_) => Ok(values[0].clone()),
                Value::String(s) => {
                    let parsed = s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| runtime(format!("`number` cannot parse {s:?}")))?;
                    number(parsed)
                }
                other => Err(runtime(format!(
                    "`number` expects a string or number, got {}",
                    type_name(other)
                ))),
            }
        }
        "string" => {
            arity(name, values, 1)?;
            match &values[0] {
                Value::String(_) => Ok(values[0].clone()),
                other => Ok(Value::String(other.to_string())),
            }
        }
        "type_of" => {
            arity(name, values, 1)?;
            Ok(Value::String(type_name(&values[0]).to_owned()))
        }
        "keys" => {
            arity(name, values, 1)?;
            match &values[0] {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(runtime(format!("`keys` expects an object, got {}", type_name(other)))),
            }
        }
        "values" => {
            arity(name, values, 1)?;
            match &values[0] {
                Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
                other => Err(runtime(format!(
                    "`values` expects an object, got {}",
                    type_name(other)
                ))),
            }
        }
        "sum" => {
            arity(name, values, 1)?;
            let numbers = array_arg(name, &values[0])?
                .iter()
                .map(|item| as_number(item, "`sum`"))
                .collect::<Result<Vec<f64>, _>>()?;
            number(numbers.iter().sum())
        }
        "min" | "max" => {
            arity(name, values, 1)?;
            let wanted = if name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<&Value> = None;
            for item in array_arg(name, &values[0])? {
                best = match best {
                    Some(current) if compare(item, current, name)? != wanted => Some(current),
                    _ => Some(item),
                };
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
        "abs" => {
            arity(name, values, 1)?;
            number(as_number(&values[0], "`abs`")?.abs())
        }
        other => Err(runtime(format!("unknown function `{other}`"))),
    }
}

fn array_arg<'v>(name: &str, value: &'v Value) -> Result<&'v [Value], PredicateError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(runtime(format!(
            "`{name}` expects an array, got {}",
            type_name(other)
        ))),
    }
}

fn expect_bool(name: &str, value: Value) -> Result<bool, PredicateError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(runtime(format!(
            "`{name}` needs a boolean, got {}",
            type_name(&other)
        ))),
    }
}

fn higher_order(
    interp: &mut Interpreter,
    name: &str,
    args: &[Expr],
) -> Result<Value, PredicateError> {
    let (list, lambda) = match args {
        [list] if matches!(name, "any" | "all") => (list, None),
        [list, lambda @ Expr::Lambda { .. }] => (list, Some(lambda)),
        _ => {
            return Err(runtime(format!(
                "`{name}` takes an array and a lambda such as `x => x > 0`"
            )))
        }
    };
    let list = interp.eval(list)?;
    let items = array_arg(name, &list)?;

    // Without a lambda, `any`/`all` fold an array of booleans.
    let Some(lambda) = lambda else {
        let mut flags = Vec::with_capacity(items.len());
        for item in items {
            interp.tick()?;
            flags.push(expect_bool(name, item.clone())?);
        }
        let result = if name == "any" {
            flags.iter().any(|b| *b)
        } else {
            flags.iter().all(|b| *b)
        };
        return Ok(Value::Bool(result));
    };

    match name {
        "any" => {
            for item in items {
                if expect_bool(name, interp.apply(lambda, item.clone())?)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "all" => {
            for item in items {
                if !expect_bool(name, interp.apply(lambda, item.clone())?)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "count" => {
            let mut matched = 0_usize;
            for item in items {
                if expect_bool(name, interp.apply(lambda, item.clone())?)? {
                    matched = matched.saturating_add(1);
                }
            }
            Ok(count_value(matched))
        }
        "filter" => {
            let mut kept = Vec::new();
            for item in items {
                if expect_bool(name, interp.apply(lambda, item.clone())?)? {
                    kept.push(item.clone());
                }
            }
            Ok(Value::Array(kept))
        }
        _ => {
            let mut mapped = ArrayBuilder::with_capacity(items.len());
            for item in items {
                let value = interp.apply(lambda, item.clone())?;
                mapped.push(interp, value)?;
            }
            Ok(mapped.finish())
        }
    }
}

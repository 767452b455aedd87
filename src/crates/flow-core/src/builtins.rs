//! The normative builtin set from §4.1: collection helpers, string helpers,
//! list mutators, time, and id generation. Every builtin validates its
//! argument types and names itself in the error it raises.

use crate::expr::{ExpressionError, Result};
use crate::value::Value;
use chrono::Utc;

pub fn call(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "length" | "count" => length(args),
        "first" => first(args),
        "last" => last(args),
        "sorted" => sorted(args),
        "reverse" => reverse(args),
        "unique" => unique(args),
        "sum" => sum(args),
        "minimum" => minimum(args),
        "maximum" => maximum(args),
        "mean" => mean(args),
        "round" => round(args),
        "abs" => abs(args),
        "trim" => string_op(name, args, |s| s.trim().to_string()),
        "lowercase" => string_op(name, args, |s| s.to_lowercase()),
        "uppercase" => string_op(name, args, |s| s.to_uppercase()),
        "replace" => replace(args),
        "split" => split(args),
        "join" => join(args),
        "slugify" => string_op(name, args, slugify_impl),
        "append" => append(args),
        "remove" => remove(args),
        "insert" => insert(args),
        "current_timestamp" => Ok(Value::Str(Utc::now().to_rfc3339())),
        "current_date" => Ok(Value::Str(Utc::now().format("%Y-%m-%d").to_string())),
        "random_uuid" => Ok(Value::Str(uuid::Uuid::new_v4().to_string())),
        other => Err(ExpressionError::UnknownBuiltin(other.to_string())),
    }
}

fn misuse(builtin: &str, expected: &str, received: &Value) -> ExpressionError {
    ExpressionError::BuiltinMisuse {
        builtin: builtin.to_string(),
        expected: expected.to_string(),
        received: format!("{} ({})", received.type_name(), received),
    }
}

fn as_list<'a>(builtin: &str, args: &'a [Value]) -> Result<&'a [Value]> {
    let v = args.first().ok_or_else(|| misuse(builtin, "a list argument", &Value::Null))?;
    v.as_list().ok_or_else(|| misuse(builtin, "a list", v))
}

fn length(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::List(l)) => Ok(Value::Int(l.len() as i64)),
        Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
        Some(Value::Map(m)) => Ok(Value::Int(m.len() as i64)),
        Some(other) => Err(misuse("length", "a list, string, or map", other)),
        None => Err(misuse("length", "one argument", &Value::Null)),
    }
}

fn first(args: &[Value]) -> Result<Value> {
    Ok(as_list("first", args)?.first().cloned().unwrap_or(Value::Null))
}

fn last(args: &[Value]) -> Result<Value> {
    Ok(as_list("last", args)?.last().cloned().unwrap_or(Value::Null))
}

fn sorted(args: &[Value]) -> Result<Value> {
    let mut items = as_list("sorted", args)?.to_vec();
    items.sort_by(|a, b| a.partial_cmp_value(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(Value::List(items))
}

fn reverse(args: &[Value]) -> Result<Value> {
    let mut items = as_list("reverse", args)?.to_vec();
    items.reverse();
    Ok(Value::List(items))
}

fn unique(args: &[Value]) -> Result<Value> {
    let items = as_list("unique", args)?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.iter().any(|v| v.values_equal(item)) {
            out.push(item.clone());
        }
    }
    Ok(Value::List(out))
}

fn numeric_seq(builtin: &str, args: &[Value]) -> Result<Vec<f64>> {
    as_list(builtin, args)?
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| misuse(builtin, "a list of numbers", v)))
        .collect()
}

fn sum(args: &[Value]) -> Result<Value> {
    let nums = numeric_seq("sum", args)?;
    let total: f64 = nums.iter().sum();
    Ok(if nums.iter().all(|n| n.fract() == 0.0) {
        Value::Int(total as i64)
    } else {
        Value::Float(total)
    })
}

fn minimum(args: &[Value]) -> Result<Value> {
    let items = as_list("minimum", args)?;
    items
        .iter()
        .cloned()
        .reduce(|a, b| if b.partial_cmp_value(&a) == Some(std::cmp::Ordering::Less) { b } else { a })
        .ok_or_else(|| misuse("minimum", "a non-empty list", &Value::List(vec![])))
}

fn maximum(args: &[Value]) -> Result<Value> {
    let items = as_list("maximum", args)?;
    items
        .iter()
        .cloned()
        .reduce(|a, b| if b.partial_cmp_value(&a) == Some(std::cmp::Ordering::Greater) { b } else { a })
        .ok_or_else(|| misuse("maximum", "a non-empty list", &Value::List(vec![])))
}

fn mean(args: &[Value]) -> Result<Value> {
    let nums = numeric_seq("mean", args)?;
    if nums.is_empty() {
        return Err(misuse("mean", "a non-empty list", &Value::List(vec![])));
    }
    Ok(Value::Float(nums.iter().sum::<f64>() / nums.len() as f64))
}

fn round(args: &[Value]) -> Result<Value> {
    let n = args.first().and_then(Value::as_f64).ok_or_else(|| misuse("round", "a number", args.first().unwrap_or(&Value::Null)))?;
    let digits = args.get(1).and_then(Value::as_f64).unwrap_or(0.0) as i32;
    let factor = 10f64.powi(digits);
    let r = (n * factor).round() / factor;
    Ok(if digits <= 0 { Value::Int(r as i64) } else { Value::Float(r) })
}

fn abs(args: &[Value]) -> Result<Value> {
    match args.first() {
        Some(Value::Int(i)) => Ok(Value::Int(i.abs())),
        Some(Value::Float(f)) => Ok(Value::Float(f.abs())),
        Some(other) => Err(misuse("abs", "a number", other)),
        None => Err(misuse("abs", "one argument", &Value::Null)),
    }
}

fn as_str<'a>(builtin: &str, v: Option<&'a Value>) -> Result<&'a str> {
    match v {
        Some(Value::Str(s)) => Ok(s.as_str()),
        Some(other) => Err(misuse(builtin, "a string", other)),
        None => Err(misuse(builtin, "a string argument", &Value::Null)),
    }
}

fn string_op(builtin: &str, args: &[Value], f: impl Fn(&str) -> String) -> Result<Value> {
    let s = as_str(builtin, args.first())?;
    Ok(Value::Str(f(s)))
}

fn replace(args: &[Value]) -> Result<Value> {
    let s = as_str("replace", args.first())?;
    let from = as_str("replace", args.get(1))?;
    let to = as_str("replace", args.get(2))?;
    Ok(Value::Str(s.replace(from, to)))
}

fn split(args: &[Value]) -> Result<Value> {
    let s = as_str("split", args.first())?;
    let sep = as_str("split", args.get(1))?;
    Ok(Value::List(s.split(sep).map(|p| Value::Str(p.to_string())).collect()))
}

fn join(args: &[Value]) -> Result<Value> {
    let items = as_list("join", args)?;
    let sep = as_str("join", args.get(1))?;
    let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    Ok(Value::Str(parts.join(sep)))
}

fn slugify_impl(s: &str) -> String {
    let mut out = String::new();
    let mut last_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    if out.ends_with('-') {
        out.pop();
    }
    out
}

fn append(args: &[Value]) -> Result<Value> {
    let list = as_list("append", args)?;
    let value = args.get(1).cloned().unwrap_or(Value::Null);
    let mut out = list.to_vec();
    out.push(value);
    Ok(Value::List(out))
}

fn remove(args: &[Value]) -> Result<Value> {
    let value = args.first().cloned().unwrap_or(Value::Null);
    let list = args.get(1).and_then(Value::as_list).ok_or_else(|| misuse("remove", "(value, list)", args.get(1).unwrap_or(&Value::Null)))?;
    Ok(Value::List(list.iter().filter(|v| !v.values_equal(&value)).cloned().collect()))
}

fn insert(args: &[Value]) -> Result<Value> {
    let value = args.first().cloned().unwrap_or(Value::Null);
    let index = args.get(1).and_then(Value::as_f64).ok_or_else(|| misuse("insert", "(value, index, list)", args.get(1).unwrap_or(&Value::Null)))? as i64;
    let list = args.get(2).and_then(Value::as_list).ok_or_else(|| misuse("insert", "(value, index, list)", args.get(2).unwrap_or(&Value::Null)))?;
    if index < 0 || index as usize > list.len() {
        return Err(ExpressionError::InsertOutOfBounds { index, len: list.len() });
    }
    let mut out = list.to_vec();
    out.insert(index as usize, value);
    Ok(Value::List(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_of_ints_stays_int() {
        let r = call("sum", &[Value::List(vec![Value::Int(1), Value::Int(2)])]).unwrap();
        assert_eq!(r, Value::Int(3));
    }

    #[test]
    fn insert_out_of_bounds_errors() {
        let r = call("insert", &[Value::Int(1), Value::Int(5), Value::List(vec![])]);
        assert!(r.is_err());
    }

    #[test]
    fn slugify_collapses_punctuation() {
        let r = call("slugify", &[Value::Str("Hello, World!".into())]).unwrap();
        assert_eq!(r, Value::Str("hello-world".into()));
    }

    #[test]
    fn unknown_builtin_names_itself() {
        let err = call("frobnicate", &[]).unwrap_err();
        assert!(err.to_string().contains("frobnicate"));
    }
}

//! Built-in functions callable from DApp programs
//!
//! Pure built-ins are always available and never observe anything outside
//! their arguments. Host capabilities (`print`, `now`, `env`) exist only in
//! unsandboxed mode. Module loading is never available.

use crate::executor::Fault;
use crate::value::Value;

/// Names of host capabilities, gated on unsandboxed mode
pub const HOST_CAPABILITIES: &[&str] = &["print", "now", "env"];

/// Invoke a built-in by name
pub fn call(name: &str, args: Vec<Value>, host_capabilities: bool) -> Result<Value, Fault> {
    if name == "require" {
        return Err(Fault::Forbidden("module loading is not available".into()));
    }
    if HOST_CAPABILITIES.contains(&name) {
        if !host_capabilities {
            return Err(Fault::Forbidden(format!(
                "'{}' is not available in sandboxed mode",
                name
            )));
        }
        return host_call(name, args);
    }

    match name {
        "len" => {
            let [value] = arity::<1>(name, args)?;
            match value {
                Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
                Value::Array(items) => Ok(Value::Integer(items.len() as i64)),
                Value::Object(map) => Ok(Value::Integer(map.len() as i64)),
                other => Err(type_error(name, &other)),
            }
        }
        "keys" => match arity::<1>(name, args)? {
            [Value::Object(map)] => Ok(Value::Array(map.into_keys().map(Value::String).collect())),
            [other] => Err(type_error(name, &other)),
        },
        "values" => match arity::<1>(name, args)? {
            [Value::Object(map)] => Ok(Value::Array(map.into_values().collect())),
            [other] => Err(type_error(name, &other)),
        },
        "has" => match arity::<2>(name, args)? {
            [Value::Object(map), Value::String(key)] => Ok(Value::Boolean(map.contains_key(&key))),
            [Value::Array(items), needle] => {
                Ok(Value::Boolean(items.iter().any(|item| item.loose_eq(&needle))))
            }
            [Value::String(s), Value::String(needle)] => Ok(Value::Boolean(s.contains(&needle))),
            [other, _] => Err(type_error(name, &other)),
        },
        "push" => {
            let mut args = args.into_iter();
            match args.next() {
                Some(Value::Array(mut items)) => {
                    items.extend(args);
                    Ok(Value::Array(items))
                }
                Some(other) => Err(type_error(name, &other)),
                None => Err(arity_error(name, 1, 0)),
            }
        }
        "slice" => slice(args),
        "str" => {
            let [value] = arity::<1>(name, args)?;
            Ok(Value::String(value.to_text()))
        }
        "int" => {
            let [value] = arity::<1>(name, args)?;
            to_int(value)
        }
        "float" => {
            let [value] = arity::<1>(name, args)?;
            match value {
                Value::Integer(i) => Ok(Value::Float(i as f64)),
                Value::Float(f) => Ok(Value::Float(f)),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Value::Float)
                    .ok_or_else(|| Fault::Runtime(format!("Cannot convert '{}' to float", s))),
                other => Err(type_error(name, &other)),
            }
        }
        "abs" => match arity::<1>(name, args)? {
            [Value::Integer(i)] => i
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| Fault::Runtime("Integer overflow".into())),
            [Value::Float(f)] => Ok(Value::Float(f.abs())),
            [other] => Err(type_error(name, &other)),
        },
        "floor" => match arity::<1>(name, args)? {
            [Value::Integer(i)] => Ok(Value::Integer(i)),
            [Value::Float(f)] => float_to_int(f.floor()),
            [other] => Err(type_error(name, &other)),
        },
        "min" | "max" => extremum(name, args),
        "typeOf" => {
            let [value] = arity::<1>(name, args)?;
            Ok(Value::String(value.type_name().to_string()))
        }
        _ => Err(Fault::Runtime(format!("'{}' is not a function", name))),
    }
}

fn host_call(name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    match name {
        "print" => {
            let line: Vec<String> = args.iter().map(Value::to_text).collect();
            tracing::info!(target: "spire::dapp", "{}", line.join(" "));
            Ok(Value::Null)
        }
        "now" => {
            let millis = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            Ok(Value::Integer(millis))
        }
        _ => match arity::<1>(name, args)? {
            [Value::String(var)] => Ok(std::env::var(var).map(Value::String).unwrap_or(Value::Null)),
            [other] => Err(type_error(name, &other)),
        },
    }
}

// ── Helpers ───────────────────────────────────────────────

fn arity<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], Fault> {
    let got = args.len();
    <[Value; N]>::try_from(args).map_err(|_| arity_error(name, N, got))
}

fn arity_error(name: &str, expected: usize, got: usize) -> Fault {
    Fault::Runtime(format!(
        "{}() expects {} argument(s), got {}",
        name, expected, got
    ))
}

fn type_error(name: &str, value: &Value) -> Fault {
    Fault::Runtime(format!("{}() cannot be applied to {}", name, value.type_name()))
}

fn float_to_int(f: f64) -> Result<Value, Fault> {
    if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Ok(Value::Integer(f as i64))
    } else {
        Err(Fault::Runtime(format!("{} is out of integer range", f)))
    }
}

fn to_int(value: Value) -> Result<Value, Fault> {
    match value {
        Value::Integer(i) => Ok(Value::Integer(i)),
        Value::Float(f) => float_to_int(f.trunc()),
        Value::Boolean(b) => Ok(Value::Integer(b as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| Fault::Runtime(format!("Cannot convert '{}' to int", s))),
        other => Err(type_error("int", &other)),
    }
}

/// Resolve a possibly negative bound against a length
fn bound(value: Option<&Value>, len: usize, default: usize) -> Result<usize, Fault> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Integer(i)) if *i < 0 => Ok(len.saturating_sub(i.unsigned_abs() as usize)),
        Some(Value::Integer(i)) => Ok((*i as usize).min(len)),
        Some(other) => Err(type_error("slice", other)),
    }
}

fn slice(args: Vec<Value>) -> Result<Value, Fault> {
    if args.is_empty() || args.len() > 3 {
        return Err(arity_error("slice", 3, args.len()));
    }
    match &args[0] {
        Value::Array(items) => {
            let start = bound(args.get(1), items.len(), 0)?;
            let end = bound(args.get(2), items.len(), items.len())?;
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let start = bound(args.get(1), chars.len(), 0)?;
            let end = bound(args.get(2), chars.len(), chars.len())?;
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }
        other => Err(type_error("slice", other)),
    }
}

fn extremum(name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    let mut args = args.into_iter();
    let mut best = args.next().ok_or_else(|| arity_error(name, 1, 0))?;
    best.as_f64().ok_or_else(|| type_error(name, &best))?;
    for candidate in args {
        let (a, b) = match (best.as_f64(), candidate.as_f64()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(type_error(name, &candidate)),
        };
        let replace = if name == "min" { b < a } else { b > a };
        if replace {
            best = candidate;
        }
    }
    Ok(best)
}

//! Metered tree-walking interpreter for DApp programs
//!
//! The interpreter is the inside of the sandbox. A program sees exactly two
//! bindings, `storage` and `msg`, both owned copies. Every statement,
//! expression and loop iteration consumes one unit of fuel and polls the
//! interrupt flag raised by the execution watchdog, so a runaway program is
//! stopped by the host rather than by anything the program cooperates with.
//!
//! # Determinism
//!
//! No clock, randomness, I/O or hash-ordered iteration is reachable unless
//! host capabilities are explicitly enabled (unsandboxed mode).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ast::*;
use super::builtins;
use super::parser::is_place;
use crate::executor::Fault;
use crate::value::Value;

/// Bytes of copied composite data that cost one unit of fuel
const COPY_BYTES_PER_FUEL: usize = 16;

/// Resource envelope for one program run
#[derive(Debug, Clone)]
pub struct Limits {
    /// Step budget; `None` means unmetered
    pub fuel: Option<u64>,
    /// Largest string or committed value the program may produce
    pub max_value_bytes: usize,
    /// Whether `print`, `now` and `env` are callable
    pub host_capabilities: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            fuel: Some(10_000_000),
            max_value_bytes: 1 << 20,
            host_capabilities: false,
        }
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A single program evaluation
pub struct Interpreter {
    scopes: Vec<BTreeMap<String, Value>>,
    fuel: Option<u64>,
    interrupt: Option<Arc<AtomicBool>>,
    max_value_bytes: usize,
    host_capabilities: bool,
}

impl Interpreter {
    /// Create an interpreter binding `storage` and `msg`
    pub fn new(storage: Value, msg: Value, limits: &Limits) -> Self {
        let mut globals = BTreeMap::new();
        globals.insert("storage".to_string(), storage);
        globals.insert("msg".to_string(), msg);
        Interpreter {
            scopes: vec![globals],
            fuel: limits.fuel,
            interrupt: None,
            max_value_bytes: limits.max_value_bytes,
            host_capabilities: limits.host_capabilities,
        }
    }

    /// Attach the flag a watchdog raises to stop this run
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Run the program to completion.
    ///
    /// The result is the value of the first `return` executed, or `null` when
    /// the program finishes without one.
    pub fn run(mut self, program: &Program) -> Result<Value, Fault> {
        match self.exec_block(&program.body, false)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Null),
            Flow::Break | Flow::Continue => Err(Fault::Runtime(
                "'break' or 'continue' outside of a loop".into(),
            )),
        }
    }

    // ── Metering ───────────────────────────────────────────

    fn tick(&mut self) -> Result<(), Fault> {
        self.consume(1)
    }

    fn consume(&mut self, amount: u64) -> Result<(), Fault> {
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::Relaxed) {
                return Err(Fault::Timeout);
            }
        }
        if let Some(remaining) = self.fuel.as_mut() {
            if *remaining < amount {
                *remaining = 0;
                return Err(Fault::FuelExhausted);
            }
            *remaining -= amount;
        }
        Ok(())
    }

    /// Copying composite values is paid for by size
    fn charge_copy(&mut self, value: &Value) -> Result<(), Fault> {
        match value {
            Value::Array(_) | Value::Object(_) => {
                self.consume((value.estimated_size() / COPY_BYTES_PER_FUEL) as u64)
            }
            Value::String(s) => self.consume((s.len() / COPY_BYTES_PER_FUEL) as u64),
            _ => Ok(()),
        }
    }

    // ── Scopes ─────────────────────────────────────────────

    fn declare(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn binding(&self, name: &str) -> Result<&Value, Fault> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| Fault::Runtime(format!("'{}' is not defined", name)))
    }

    fn binding_mut(&mut self, name: &str) -> Result<&mut Value, Fault> {
        self.scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
            .ok_or_else(|| Fault::Runtime(format!("'{}' is not defined", name)))
    }

    // ── Statements ─────────────────────────────────────────

    fn exec_block(&mut self, stmts: &[Stmt], scoped: bool) -> Result<Flow, Fault> {
        if scoped {
            self.scopes.push(BTreeMap::new());
        }
        let mut flow = Flow::Normal;
        for stmt in stmts {
            flow = self.exec(stmt)?;
            if !matches!(flow, Flow::Normal) {
                break;
            }
        }
        if scoped {
            self.scopes.pop();
        }
        Ok(flow)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        self.tick()?;
        match stmt {
            Stmt::Let { name, init } => {
                let value = match init {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                self.declare(name, value);
                Ok(Flow::Normal)
            }
            Stmt::Expr(expr) => {
                self.eval(expr)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.exec_block(then_branch, true)
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch, true)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.is_truthy() {
                    match self.exec_block(body, true)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf {
                name,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable)? {
                    Value::Array(items) => items,
                    Value::Object(map) => map.into_keys().map(Value::String).collect(),
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => {
                        return Err(Fault::Runtime(format!(
                            "{} is not iterable",
                            other.type_name()
                        )))
                    }
                };
                for item in items {
                    self.tick()?;
                    self.scopes.push(BTreeMap::new());
                    self.declare(name, item);
                    let flow = self.exec_block(body, false);
                    self.scopes.pop();
                    match flow? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts) => self.exec_block(stmts, true),
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw(expr) => Err(Fault::Thrown(self.eval(expr)?)),
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
        }
    }

    // ── Expressions ────────────────────────────────────────

    fn eval(&mut self, expr: &Expr) -> Result<Value, Fault> {
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(_) | Expr::Member(..) | Expr::Index(..) if is_place(expr) => {
                let (root, path) = self.resolve_path(expr)?;
                let value = read_path(self.binding(&root)?, &path)?;
                self.charge_copy(&value)?;
                Ok(value)
            }
            Expr::Member(base, name) => {
                let base = self.eval(base)?;
                read_path(&base, &[Value::String(name.clone())])
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                read_path(&base, &[index])
            }
            Expr::Ident(name) => Err(Fault::Runtime(format!("'{}' is not defined", name))),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Object(props) => {
                let mut out = BTreeMap::new();
                for (key, value) in props {
                    let value = self.eval(value)?;
                    out.insert(key.clone(), value);
                }
                Ok(Value::Object(out))
            }
            Expr::Call { callee, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let result = builtins::call(callee, values, self.host_capabilities)?;
                self.check_size(&result)?;
                Ok(result)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Boolean(!value.is_truthy())),
                    UnaryOp::Neg => match value {
                        Value::Integer(i) => i
                            .checked_neg()
                            .map(Value::Integer)
                            .ok_or_else(|| Fault::Runtime("Integer overflow".into())),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(Fault::Runtime(format!(
                            "Cannot negate {}",
                            other.type_name()
                        ))),
                    },
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let result = binary(*op, &left, &right)?;
                self.check_size(&result)?;
                Ok(result)
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::Assign { op, target, value } => self.assign(*op, target, value),
        }
    }

    fn check_size(&self, value: &Value) -> Result<(), Fault> {
        if let Value::String(s) = value {
            if s.len() > self.max_value_bytes {
                return Err(Fault::SizeLimit(format!(
                    "string of {} bytes exceeds limit of {} bytes",
                    s.len(),
                    self.max_value_bytes
                )));
            }
        }
        Ok(())
    }

    /// Flatten an identifier/member/index chain into its root and keys
    fn resolve_path(&mut self, expr: &Expr) -> Result<(String, Vec<Value>), Fault> {
        match expr {
            Expr::Ident(name) => Ok((name.clone(), Vec::new())),
            Expr::Member(base, name) => {
                let (root, mut path) = self.resolve_path(base)?;
                path.push(Value::String(name.clone()));
                Ok((root, path))
            }
            Expr::Index(base, index) => {
                let (root, mut path) = self.resolve_path(base)?;
                path.push(self.eval(index)?);
                Ok((root, path))
            }
            _ => Err(Fault::Runtime("Invalid assignment target".into())),
        }
    }

    fn assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> Result<Value, Fault> {
        let (root, path) = self.resolve_path(target)?;
        let rhs = self.eval(value)?;
        let new_value = match op {
            AssignOp::Set => rhs,
            AssignOp::Add | AssignOp::Sub => {
                let current = read_path(self.binding(&root)?, &path)?;
                let binop = if op == AssignOp::Add {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                let result = binary(binop, &current, &rhs)?;
                self.check_size(&result)?;
                result
            }
        };
        let slot = self.binding_mut(&root)?;
        write_path(slot, &path, new_value.clone())?;
        self.charge_copy(&new_value)?;
        Ok(new_value)
    }
}

// ── Paths ─────────────────────────────────────────────────


fn key_text(key: &Value) -> Result<String, Fault> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        other => Err(Fault::Runtime(format!(
            "Cannot use {} as a property key",
            other.type_name()
        ))),
    }
}

fn read_path(current: &Value, path: &[Value]) -> Result<Value, Fault> {
    let (key, rest) = match path.split_first() {
        Some(split) => split,
        None => return Ok(current.clone()),
    };

    match (current, key) {
        (Value::Array(items), Value::String(name)) if name == "length" => {
            read_path(&Value::Integer(items.len() as i64), rest)
        }
        (Value::String(s), Value::String(name)) if name == "length" => {
            read_path(&Value::Integer(s.chars().count() as i64), rest)
        }
        (Value::Array(items), Value::Integer(i)) => {
            match usize::try_from(*i).ok().and_then(|i| items.get(i)) {
                Some(item) => read_path(item, rest),
                None => read_path(&Value::Null, rest),
            }
        }
        (Value::String(s), Value::Integer(i)) => {
            let ch = usize::try_from(*i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null);
            read_path(&ch, rest)
        }
        (Value::Object(map), key) => match map.get(&key_text(key)?) {
            Some(item) => read_path(item, rest),
            None => read_path(&Value::Null, rest),
        },
        (Value::Array(_) | Value::String(_), _) => read_path(&Value::Null, rest),
        (other, key) => Err(Fault::Runtime(format!(
            "Cannot read property '{}' of {}",
            key.to_text(),
            other.type_name()
        ))),
    }
}

fn write_path(slot: &mut Value, path: &[Value], new_value: Value) -> Result<(), Fault> {
    let (key, rest) = match path.split_first() {
        Some(split) => split,
        None => {
            *slot = new_value;
            return Ok(());
        }
    };

    match slot {
        Value::Object(map) => {
            let key = key_text(key)?;
            if rest.is_empty() {
                map.insert(key, new_value);
                return Ok(());
            }
            match map.get_mut(&key) {
                Some(child) => write_path(child, rest, new_value),
                None => Err(Fault::Runtime(format!(
                    "Cannot set property '{}' of null",
                    rest[0].to_text()
                ))),
            }
        }
        Value::Array(items) => {
            let index = match key {
                Value::Integer(i) => usize::try_from(*i)
                    .map_err(|_| Fault::Runtime(format!("Invalid array index {}", i)))?,
                other => {
                    return Err(Fault::Runtime(format!(
                        "Cannot index array with {}",
                        other.type_name()
                    )))
                }
            };
            if index < items.len() {
                write_path(&mut items[index], rest, new_value)
            } else if index == items.len() && rest.is_empty() {
                items.push(new_value);
                Ok(())
            } else {
                Err(Fault::Runtime(format!(
                    "Array index {} out of bounds (length {})",
                    index,
                    items.len()
                )))
            }
        }
        other => Err(Fault::Runtime(format!(
            "Cannot set property '{}' of {}",
            key.to_text(),
            other.type_name()
        ))),
    }
}

// ── Operators ─────────────────────────────────────────────

fn finite(f: f64) -> Result<Value, Fault> {
    if f.is_finite() {
        Ok(Value::Float(f))
    } else {
        Err(Fault::Runtime("Arithmetic produced a non-finite number".into()))
    }
}

fn overflow() -> Fault {
    Fault::Runtime("Integer overflow".into())
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, Fault> {
    use Value::{Float, Integer};

    match op {
        BinaryOp::Eq => return Ok(Value::Boolean(left.loose_eq(right))),
        BinaryOp::NotEq => return Ok(Value::Boolean(!left.loose_eq(right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => a
                        .partial_cmp(&b)
                        .ok_or_else(|| Fault::Runtime("Cannot compare NaN".into()))?,
                    _ => {
                        return Err(Fault::Runtime(format!(
                            "Cannot compare {} with {}",
                            left.type_name(),
                            right.type_name()
                        )))
                    }
                },
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Boolean(result));
        }
        _ => {}
    }

    if op == BinaryOp::Add
        && (matches!(left, Value::String(_)) || matches!(right, Value::String(_)))
    {
        return Ok(Value::String(format!("{}{}", left.to_text(), right.to_text())));
    }

    match (left, right) {
        (Integer(a), Integer(b)) => {
            let (a, b) = (*a, *b);
            match op {
                BinaryOp::Add => a.checked_add(b).map(Integer).ok_or_else(overflow),
                BinaryOp::Sub => a.checked_sub(b).map(Integer).ok_or_else(overflow),
                BinaryOp::Mul => a.checked_mul(b).map(Integer).ok_or_else(overflow),
                BinaryOp::Div => {
                    if b == 0 {
                        return Err(Fault::Runtime("Division by zero".into()));
                    }
                    match a.checked_rem(b) {
                        Some(0) | None => a.checked_div(b).map(Integer).ok_or_else(overflow),
                        Some(_) => finite(a as f64 / b as f64),
                    }
                }
                _ => {
                    if b == 0 {
                        Err(Fault::Runtime("Modulo by zero".into()))
                    } else {
                        a.checked_rem(b).map(Integer).ok_or_else(overflow)
                    }
                }
            }
        }
        (Integer(_) | Float(_), Integer(_) | Float(_)) => {
            let a = left.as_f64().unwrap_or_default();
            let b = right.as_f64().unwrap_or_default();
            match op {
                BinaryOp::Add => finite(a + b),
                BinaryOp::Sub => finite(a - b),
                BinaryOp::Mul => finite(a * b),
                BinaryOp::Div if b == 0.0 => Err(Fault::Runtime("Division by zero".into())),
                BinaryOp::Div => finite(a / b),
                _ if b == 0.0 => Err(Fault::Runtime("Modulo by zero".into())),
                _ => finite(a % b),
            }
        }
        _ => Err(Fault::Runtime(format!(
            "Unsupported operand types {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parse;

    fn run_with(text: &str, storage: Value, msg: Value) -> Result<Value, Fault> {
        let program = parse(text).unwrap();
        Interpreter::new(storage, msg, &Limits::default()).run(&program)
    }

    fn run(text: &str) -> Result<Value, Fault> {
        run_with(text, Value::empty_object(), Value::empty_object())
    }

    fn json(text: &str) -> Value {
        Value::from_json(&serde_json::from_str(text).unwrap())
    }

    #[test]
    fn test_return_value() {
        assert_eq!(run("return 'storage';").unwrap(), Value::from("storage"));
    }

    #[test]
    fn test_no_return_yields_null() {
        assert_eq!(run("1 + 1; 'last'").unwrap(), Value::Null);
        assert_eq!(run("storage.n = 1; storage.n += 1;").unwrap(), Value::Null);
        assert_eq!(run("let x = 5;").unwrap(), Value::Null);
    }

    #[test]
    fn test_storage_update() {
        let result = run_with(
            "storage.count = storage.count + 1; storage.log = push(storage.log, msg.sender); return storage;",
            json(r#"{"count": 1, "log": []}"#),
            json(r#"{"sender": "alice"}"#),
        )
        .unwrap();
        assert_eq!(result, json(r#"{"count": 2, "log": ["alice"]}"#));
    }

    #[test]
    fn test_value_semantics_copy_on_assign() {
        let result = run("let a = [1]; let b = a; b[1] = 2; return [a, b];").unwrap();
        assert_eq!(result, json("[[1], [1, 2]]"));
    }

    #[test]
    fn test_nested_assignment_and_compound_ops() {
        let result = run(
            "storage.balances = {}; storage.balances['bob'] = 10; storage.balances.bob -= 3; storage.balances.bob += 1; return storage;",
        )
        .unwrap();
        assert_eq!(result, json(r#"{"balances": {"bob": 8}}"#));
    }

    #[test]
    fn test_missing_reads_are_null() {
        assert_eq!(run("return storage.nope;").unwrap(), Value::Null);
        assert_eq!(run("return [1, 2][5];").unwrap(), Value::Null);
        assert_eq!(run("return [1, 2][-1];").unwrap(), Value::Null);
    }

    #[test]
    fn test_read_through_null_faults() {
        assert!(matches!(run("return storage.a.b;"), Err(Fault::Runtime(_))));
    }

    #[test]
    fn test_write_through_null_faults() {
        assert!(matches!(run("storage.a.b = 1;"), Err(Fault::Runtime(_))));
    }

    #[test]
    fn test_array_append_and_bounds() {
        assert_eq!(run("let a = []; a[0] = 'x'; a[1] = 'y'; return a;").unwrap(), json(r#"["x","y"]"#));
        assert!(matches!(run("let a = []; a[2] = 1;"), Err(Fault::Runtime(_))));
    }

    #[test]
    fn test_length_property() {
        assert_eq!(run("return [1, 2, 3].length + 'abcd'.length;").unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_undefined_variable_faults() {
        let err = run("return nope;").unwrap_err();
        assert_eq!(err, Fault::Runtime("'nope' is not defined".into()));
        assert!(run("nope = 1;").is_err());
    }

    #[test]
    fn test_block_scoping() {
        let result = run("let x = 1; if (true) { let x = 2; } return x;").unwrap();
        assert_eq!(result, Value::Integer(1));
        assert!(run("if (true) { let y = 2; } return y;").is_err());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("return 7 / 2;").unwrap(), Value::Float(3.5));
        assert_eq!(run("return 8 / 2;").unwrap(), Value::Integer(4));
        assert_eq!(run("return 7 % 3;").unwrap(), Value::Integer(1));
        assert_eq!(run("return 1.5 + 1;").unwrap(), Value::Float(2.5));
        assert_eq!(run("return -(3 - 5) * 2;").unwrap(), Value::Integer(4));
        assert_eq!(run("return 'n=' + 3;").unwrap(), Value::from("n=3"));
    }

    #[test]
    fn test_arithmetic_faults() {
        assert!(matches!(run("return 1 / 0;"), Err(Fault::Runtime(_))));
        assert!(matches!(run("return 1 % 0;"), Err(Fault::Runtime(_))));
        assert!(matches!(run("return 9223372036854775807 + 1;"), Err(Fault::Runtime(_))));
        let min = "let m = -9223372036854775807 - 1;";
        assert!(matches!(run(&format!("{} return m / -1;", min)), Err(Fault::Runtime(_))));
        assert!(matches!(run(&format!("{} return m % -1;", min)), Err(Fault::Runtime(_))));
        assert!(matches!(run("return [] - 1;"), Err(Fault::Runtime(_))));
        assert!(matches!(run("return {} < 1;"), Err(Fault::Runtime(_))));
    }

    #[test]
    fn test_equality_and_logic() {
        assert_eq!(run("return 1 === 1.0;").unwrap(), Value::Boolean(true));
        assert_eq!(run("return [1, {a: 2}] == [1, {a: 2}];").unwrap(), Value::Boolean(true));
        assert_eq!(run("return 'a' != 'b';").unwrap(), Value::Boolean(true));
        assert_eq!(run("return null || 'fallback';").unwrap(), Value::from("fallback"));
        assert_eq!(run("return 0 && nope;").unwrap(), Value::Integer(0));
        assert_eq!(run("return 'b' > 'a' ? 'yes' : 'no';").unwrap(), Value::from("yes"));
    }

    #[test]
    fn test_loops() {
        let result = run(
            "let total = 0; let i = 0; while (true) { i += 1; if (i % 2 == 0) continue; if (i > 9) break; total += i; } return total;",
        )
        .unwrap();
        assert_eq!(result, Value::Integer(25));

        let keys = run("let out = ''; for (let k of {b: 1, a: 2}) { out += k; } return out;").unwrap();
        assert_eq!(keys, Value::from("ab"));

        let found = run("for (let x of [1, 2, 3]) { if (x == 2) return x * 10; } return 0;").unwrap();
        assert_eq!(found, Value::Integer(20));
    }

    #[test]
    fn test_for_of_non_iterable_faults() {
        assert!(matches!(run("for (let x of 5) {}"), Err(Fault::Runtime(_))));
    }

    #[test]
    fn test_throw() {
        assert_eq!(run("throw 'bad input';").unwrap_err(), Fault::Thrown(Value::from("bad input")));
    }

    #[test]
    fn test_break_outside_loop_faults() {
        assert!(run("break;").is_err());
    }

    #[test]
    fn test_fuel_exhaustion() {
        let program = parse("while (true) {}").unwrap();
        let limits = Limits {
            fuel: Some(1_000),
            ..Limits::default()
        };
        let err = Interpreter::new(Value::Null, Value::Null, &limits)
            .run(&program)
            .unwrap_err();
        assert_eq!(err, Fault::FuelExhausted);
    }

    #[test]
    fn test_interrupt_flag_stops_run() {
        let program = parse("while (true) {}").unwrap();
        let flag = Arc::new(AtomicBool::new(true));
        let limits = Limits {
            fuel: None,
            ..Limits::default()
        };
        let err = Interpreter::new(Value::Null, Value::Null, &limits)
            .with_interrupt(flag)
            .run(&program)
            .unwrap_err();
        assert_eq!(err, Fault::Timeout);
    }

    #[test]
    fn test_string_growth_hits_size_limit() {
        let program = parse("let s = 'xx'; while (true) { s = s + s; }").unwrap();
        let limits = Limits {
            max_value_bytes: 1024,
            ..Limits::default()
        };
        let err = Interpreter::new(Value::Null, Value::Null, &limits)
            .run(&program)
            .unwrap_err();
        assert!(matches!(err, Fault::SizeLimit(_)));
    }

    #[test]
    fn test_large_copies_cost_fuel() {
        let program = parse(
            "let s = 'x'; let i = 0; while (i < 12) { s = s + s; i += 1; } let t = ''; let j = 0; while (j < 100) { t = s; j += 1; } return len(t);",
        )
        .unwrap();
        let limits = Limits {
            fuel: Some(10_000),
            ..Limits::default()
        };
        let err = Interpreter::new(Value::Null, Value::Null, &limits)
            .run(&program)
            .unwrap_err();
        assert_eq!(err, Fault::FuelExhausted);
    }

    #[test]
    fn test_capabilities_forbidden_by_default() {
        assert!(matches!(run("now();"), Err(Fault::Forbidden(_))));
        assert!(matches!(run("print('hi');"), Err(Fault::Forbidden(_))));
        assert!(matches!(run("require('fs');"), Err(Fault::Forbidden(_))));
    }

    #[test]
    fn test_execution_determinism_100_iterations() {
        let text = "let acc = {}; for (let k of ['z', 'a', 'm']) { acc[k] = len(keys(acc)); } return acc;";
        let first = run(text).unwrap();
        for i in 0..100 {
            assert_eq!(first, run(text).unwrap(), "Determinism failure at iteration {}", i);
        }
    }
}

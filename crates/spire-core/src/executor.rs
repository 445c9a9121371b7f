//! Sandboxed execution engine
//!
//! Runs one DApp program against a copy of its storage and a message
//! context, and reports either the new storage or a fault. Nothing here
//! touches the registry; committing is the caller's decision.
//!
//! In sandboxed mode the program runs on a worker thread. The caller waits
//! for the configured budget and, if the budget expires, raises the
//! interpreter's interrupt flag and discards whatever the worker produces.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::context::MessageContext;
use crate::script::{self, Interpreter, Limits};
use crate::value::Value;
use crate::Error;

/// Deepest nesting a committed value may have
pub const MAX_VALUE_DEPTH: usize = 100;

const WORKER_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Why an execution did not commit
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Program text failed to parse
    Syntax(String),
    /// Program executed `throw`
    Thrown(Value),
    /// Type error, overflow, division by zero, unknown name
    Runtime(String),
    /// Attempted to use a capability the sandbox withholds
    Forbidden(String),
    /// Wall-clock budget expired
    Timeout,
    /// Step budget exhausted
    FuelExhausted,
    /// A produced value exceeded the size or depth limit
    SizeLimit(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Syntax(msg) => write!(f, "syntax error: {}", msg),
            Fault::Thrown(value) => write!(f, "uncaught exception: {}", value),
            Fault::Runtime(msg) => write!(f, "runtime error: {}", msg),
            Fault::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            Fault::Timeout => write!(f, "execution timed out"),
            Fault::FuelExhausted => write!(f, "execution step budget exhausted"),
            Fault::SizeLimit(msg) => write!(f, "size limit: {}", msg),
        }
    }
}

/// Result of one execution
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Committed(Value),
    Faulted(Fault),
}

impl Outcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed(_))
    }
}

/// Executes programs under one fixed configuration
#[derive(Debug, Clone)]
pub struct Engine {
    timeout: Duration,
    sandboxed: bool,
    limits: Limits,
}

impl Engine {
    pub fn new(config: &EngineConfig) -> Self {
        if !config.sandboxed {
            tracing::warn!(
                "sandbox disabled: programs run without timeout or step budget and may use host capabilities"
            );
        }
        Engine {
            timeout: Duration::from_millis(config.timeout_ms),
            sandboxed: config.sandboxed,
            limits: Limits {
                fuel: if config.sandboxed { Some(config.fuel) } else { None },
                max_value_bytes: config.max_value_bytes,
                host_capabilities: !config.sandboxed,
            },
        }
    }

    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    /// Run `program` with `storage` and `ctx` bound.
    ///
    /// `storage` is copied into the run; the caller's value is never aliased.
    pub fn execute(&self, storage: &Value, program: &str, ctx: &MessageContext) -> Outcome {
        let result = if self.sandboxed {
            self.execute_sandboxed(storage.clone(), program.to_string(), ctx.to_value())
        } else {
            run_program(program, storage.clone(), ctx.to_value(), &self.limits, None)
        };

        match result.and_then(|value| self.check_committed(value)) {
            Ok(value) => Outcome::Committed(value),
            Err(fault) => Outcome::Faulted(fault),
        }
    }

    fn execute_sandboxed(&self, storage: Value, program: String, msg: Value) -> Result<Value, Fault> {
        let interrupt = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&interrupt);
        let limits = self.limits.clone();
        let (result_tx, result_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("spire-exec".into())
            .stack_size(WORKER_STACK_BYTES)
            .spawn(move || {
                let result = run_program(&program, storage, msg, &limits, Some(worker_flag));
                // Receiver is gone after a timeout; the result is discarded either way.
                let _ = result_tx.send(result);
            })
            .map_err(|e| Fault::Runtime(format!("failed to start execution worker: {}", e)))?;

        let result = match result_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                interrupt.store(true, Ordering::Relaxed);
                Err(Fault::Timeout)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(Fault::Runtime("execution worker aborted".into()))
            }
        };

        // The worker polls the interrupt flag every step, so this returns promptly.
        if handle.join().is_err() {
            tracing::error!("execution worker panicked");
        }
        result
    }

    fn check_committed(&self, value: Value) -> Result<Value, Fault> {
        let size = value.estimated_size();
        if size > self.limits.max_value_bytes {
            return Err(Fault::SizeLimit(format!(
                "result of {} bytes exceeds limit of {} bytes",
                size, self.limits.max_value_bytes
            )));
        }
        check_shape(&value, MAX_VALUE_DEPTH)?;
        Ok(value)
    }
}

fn run_program(
    text: &str,
    storage: Value,
    msg: Value,
    limits: &Limits,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<Value, Fault> {
    let program = script::parse(text).map_err(|e| match e {
        Error::Syntax(msg) => Fault::Syntax(msg),
        other => Fault::Syntax(other.to_string()),
    })?;
    let mut interpreter = Interpreter::new(storage, msg, limits);
    if let Some(flag) = interrupt {
        interpreter = interpreter.with_interrupt(flag);
    }
    interpreter.run(&program)
}

/// Reject results that are nested too deeply or hold a number JSON cannot
/// represent. Iterative so that hostile nesting cannot overflow the caller's
/// stack.
fn check_shape(value: &Value, max_depth: usize) -> Result<(), Fault> {
    let mut pending = vec![(value, 1usize)];
    while let Some((value, depth)) = pending.pop() {
        if depth > max_depth {
            return Err(Fault::SizeLimit(format!(
                "result nesting exceeds depth {}",
                max_depth
            )));
        }
        match value {
            Value::Float(f) if !f.is_finite() => {
                return Err(Fault::Runtime(format!("result holds non-finite number {}", f)));
            }
            Value::Array(items) => pending.extend(items.iter().map(|v| (v, depth + 1))),
            Value::Object(map) => pending.extend(map.values().map(|v| (v, depth + 1))),
            _ => {}
        }
    }
    Ok(())
}

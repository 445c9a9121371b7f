//! DApp script language
//!
//! Pipeline: text → [`tokenizer`] → [`parser`] → [`ast::Program`] →
//! [`interpreter::Interpreter`]. Parsing is pure; evaluation is metered and
//! interruptible.

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod parser;
pub mod tokenizer;

pub use ast::Program;
pub use interpreter::{Interpreter, Limits};
pub use parser::parse;

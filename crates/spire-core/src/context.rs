//! Message context handed to every DApp execution
//!
//! A context is plain data: which kind of message is running, the function
//! requested, its arguments and, for chain-originated messages, who sent it
//! and in which block. Programs see it as the `msg` binding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Kind of message a program is answering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Init,
    Transaction,
    View,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Init => "init",
            MessageType::Transaction => "transaction",
            MessageType::View => "view",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable execution context
#[derive(Debug, Clone, PartialEq)]
pub struct MessageContext {
    pub msg_type: MessageType,
    pub func: String,
    pub args: Value,
    pub sender: Option<String>,
    pub block: Option<Value>,
    pub block_number: Option<u64>,
}

impl MessageContext {
    /// Context for the one-time initialisation run at creation
    pub fn init(args: Value, sender: impl Into<String>, block: Value, block_number: u64) -> Self {
        Self::from_chain(MessageType::Init, "", args, Some(sender.into()), block, block_number)
    }

    pub fn transaction(
        func: impl Into<String>,
        args: Value,
        sender: impl Into<String>,
        block: Value,
        block_number: u64,
    ) -> Self {
        Self::from_chain(
            MessageType::Transaction,
            func,
            args,
            Some(sender.into()),
            block,
            block_number,
        )
    }

    /// Context for a message observed in a block, whose sender may be unknown
    pub fn from_chain(
        msg_type: MessageType,
        func: impl Into<String>,
        args: Value,
        sender: Option<String>,
        block: Value,
        block_number: u64,
    ) -> Self {
        MessageContext {
            msg_type,
            func: func.into(),
            args,
            sender,
            block: Some(block),
            block_number: Some(block_number),
        }
    }

    /// Read-only query context; carries no sender or block
    pub fn view(func: impl Into<String>, args: Value) -> Self {
        MessageContext {
            msg_type: MessageType::View,
            func: func.into(),
            args,
            sender: None,
            block: None,
            block_number: None,
        }
    }

    /// The `msg` object a program sees; absent fields are `null`
    pub fn to_value(&self) -> Value {
        let mut msg = BTreeMap::new();
        msg.insert("type".to_string(), Value::from(self.msg_type.as_str()));
        msg.insert("func".to_string(), Value::String(self.func.clone()));
        msg.insert("args".to_string(), self.args.clone());
        msg.insert(
            "sender".to_string(),
            self.sender.clone().map(Value::String).unwrap_or_default(),
        );
        msg.insert("block".to_string(), self.block.clone().unwrap_or_default());
        msg.insert(
            "blockNumber".to_string(),
            self.block_number.map(block_number_value).unwrap_or_default(),
        );
        Value::Object(msg)
    }
}

fn block_number_value(n: u64) -> Value {
    i64::try_from(n)
        .map(Value::Integer)
        .unwrap_or(Value::Float(n as f64))
}

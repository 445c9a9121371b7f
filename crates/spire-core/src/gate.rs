//! Schema gate for raw feed operations
//!
//! Feed operations arrive as `[name, body]` pairs. Only `custom_json`
//! bodies whose id carries this engine's prefix are of interest; everything
//! else passes by untouched. Interesting bodies must match the create or
//! transact shape exactly before they become an [`Operation`].

use serde_json::Value as Json;

use crate::value::Value;
use crate::{Error, Result};

/// Characters a DApp id may contain
pub const ID_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz-0123456789";

/// A validated operation for the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Create {
        id: String,
        program: String,
        args: Value,
        sender: Option<String>,
    },
    Transact {
        id: String,
        func: String,
        args: Value,
        sender: Option<String>,
    },
}

impl Operation {
    pub fn id(&self) -> &str {
        match self {
            Operation::Create { id, .. } | Operation::Transact { id, .. } => id,
        }
    }
}

/// Whether `id` is a non-empty string over [`ID_ALPHABET`]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| ID_ALPHABET.contains(c))
}

#[derive(Debug, Clone)]
pub struct Gate {
    create_id: String,
    transact_id: String,
}

impl Gate {
    pub fn new(prefix: &str) -> Self {
        Gate {
            create_id: format!("{}dapp_create", prefix),
            transact_id: format!("{}transact", prefix),
        }
    }

    /// Admit one raw operation.
    ///
    /// `Ok(None)` means the operation is not addressed to this engine.
    pub fn admit(&self, name: &str, body: &Json) -> Result<Option<Operation>> {
        if name != "custom_json" {
            return Ok(None);
        }
        let op_id = body.get("id").and_then(Json::as_str).unwrap_or_default();
        let is_create = op_id == self.create_id;
        if !is_create && op_id != self.transact_id {
            return Ok(None);
        }

        let payload = decode_payload(body.get("json"))?;
        let sender = field_sender(body)?;

        let id = field_id(&payload)?;
        let args = field_args(&payload)?;
        if is_create {
            Ok(Some(Operation::Create {
                id,
                program: field_string(&payload, "source")?,
                args,
                sender,
            }))
        } else {
            Ok(Some(Operation::Transact {
                id,
                func: field_string(&payload, "func")?,
                args,
                sender,
            }))
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Gate::new("spire_")
    }
}

/// `json` is either an object or a JSON-encoded string of one
fn decode_payload(raw: Option<&Json>) -> Result<Json> {
    let payload = match raw {
        Some(Json::String(text)) => serde_json::from_str(text)
            .map_err(|e| Error::rejected("json", format!("not valid JSON: {}", e)))?,
        Some(value) => value.clone(),
        None => return Err(Error::rejected("json", "missing")),
    };
    if !payload.is_object() {
        return Err(Error::rejected("json", "expected an object"));
    }
    Ok(payload)
}

/// First posting authority; operations signed with active authority only
/// carry none and run with a `null` sender
fn field_sender(body: &Json) -> Result<Option<String>> {
    let first = body
        .get("required_posting_auths")
        .and_then(Json::as_array)
        .and_then(|auths| auths.first());
    match first {
        None => Ok(None),
        Some(Json::String(sender)) => Ok(Some(sender.clone())),
        Some(_) => Err(Error::rejected("required_posting_auths", "expected account names")),
    }
}

fn field_id(payload: &Json) -> Result<String> {
    let id = field_string(payload, "id")?;
    if !is_valid_id(&id) {
        return Err(Error::rejected("id", format!("'{}' is not a valid DApp id", id)));
    }
    Ok(id)
}

fn field_string(payload: &Json, key: &str) -> Result<String> {
    match payload.get(key) {
        Some(Json::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::rejected(key, "expected a string")),
        None => Err(Error::rejected(key, "missing")),
    }
}

fn field_args(payload: &Json) -> Result<Value> {
    match payload.get("args") {
        Some(args @ (Json::Object(_) | Json::Array(_))) => Ok(Value::from_json(args)),
        Some(_) => Err(Error::rejected("args", "expected an object or array")),
        None => Err(Error::rejected("args", "missing")),
    }
}

//! Operation dispatcher
//!
//! The dispatcher owns the registry and applies one operation at a time, in
//! the order it is handed them. Creates and transacts never fail from the
//! caller's point of view; their effect is described by a [`Receipt`].
//! Views are answered with a [`ViewResponse`] and never change anything.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::context::{MessageContext, MessageType};
use crate::executor::Outcome;
use crate::gate::Operation;
use crate::provisioning::{ProvisioningController, Receipt};
use crate::registry::Registry;
use crate::value::Value;

/// Error code for a view of an absent (or unavailable) DApp
pub const NONEXISTENT_DAPP_ERROR: &str = "NonexistentDappError";
/// Error code for a view whose execution faulted
pub const EXECUTION_ERROR: &str = "ExecutionError";

/// Answer to a view query: `{"result": …}` or `{"error": "…"}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewResponse {
    Result(Value),
    Error(String),
}

impl ViewResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, ViewResponse::Error(_))
    }
}

/// Single writer over the registry
#[derive(Debug)]
pub struct Dispatcher {
    registry: Registry,
    controller: ProvisioningController,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, Registry::new())
    }

    pub fn with_registry(config: EngineConfig, registry: Registry) -> Self {
        Dispatcher {
            registry,
            controller: ProvisioningController::new(config),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn create(
        &mut self,
        id: &str,
        program: &str,
        args: Value,
        sender: &str,
        block: &Value,
        block_number: u64,
    ) -> Receipt {
        let ctx = MessageContext::init(args, sender, block.clone(), block_number);
        self.controller.create(&mut self.registry, id, program, &ctx)
    }

    pub fn transact(
        &mut self,
        id: &str,
        func: &str,
        args: Value,
        sender: &str,
        block: &Value,
        block_number: u64,
    ) -> Receipt {
        let ctx = MessageContext::transaction(func, args, sender, block.clone(), block_number);
        self.controller.transact(&mut self.registry, id, &ctx)
    }

    /// Apply a gated operation observed in `block`
    pub fn apply(&mut self, op: Operation, block: &Value, block_number: u64) -> Receipt {
        match op {
            Operation::Create {
                id,
                program,
                args,
                sender,
            } => {
                let ctx = MessageContext::from_chain(
                    MessageType::Init,
                    "",
                    args,
                    sender,
                    block.clone(),
                    block_number,
                );
                self.controller.create(&mut self.registry, &id, &program, &ctx)
            }
            Operation::Transact {
                id,
                func,
                args,
                sender,
            } => {
                let ctx = MessageContext::from_chain(
                    MessageType::Transaction,
                    func,
                    args,
                    sender,
                    block.clone(),
                    block_number,
                );
                self.controller.transact(&mut self.registry, &id, &ctx)
            }
        }
    }

    /// Run a read-only query against committed storage
    pub fn view(&self, id: &str, func: &str, args: Value) -> ViewResponse {
        let serve_deprovisioned = self.controller.config().serve_deprovisioned_views;
        let entry = match self.registry.lookup(id) {
            Some(entry) if entry.provisioned || serve_deprovisioned => entry,
            _ => return ViewResponse::Error(NONEXISTENT_DAPP_ERROR.to_string()),
        };

        let ctx = MessageContext::view(func, args);
        match self.controller.engine().execute(&entry.storage, &entry.program, &ctx) {
            Outcome::Committed(result) => ViewResponse::Result(result),
            Outcome::Faulted(fault) => {
                tracing::debug!(dapp = %id, func, fault = %fault, "view faulted");
                ViewResponse::Error(EXECUTION_ERROR.to_string())
            }
        }
    }
}

//! Provisioning state machine
//!
//! ```text
//! Absent ──create──▶ Provisioned ──transact ok──▶ Provisioned
//!    │                    │
//!    │ init faults        │ transact faults
//!    ▼                    ▼
//! Deprovisioned ◀─────────┘   (terminal)
//! ```
//!
//! This is the only code that writes an entry's `provisioned` flag or
//! commits execution results into the registry.

use crate::config::EngineConfig;
use crate::context::MessageContext;
use crate::executor::{Engine, Fault, Outcome};
use crate::registry::Registry;
use crate::value::Value;

/// What a create or transact did to the registry
#[derive(Debug, Clone, PartialEq)]
pub enum Receipt {
    /// Entry created and init result committed
    Created,
    /// Entry created, init faulted, entry deprovisioned
    CreateFaulted(Fault),
    /// Id already registered; nothing changed
    Duplicate,
    /// Id not on the allow-list; nothing changed
    NotAllowed,
    /// Transaction result committed
    Committed,
    /// Transaction faulted; entry deprovisioned with storage untouched
    Deprovisioned(Fault),
    /// Target absent or deprovisioned; nothing changed
    Ignored,
}

impl Receipt {
    pub fn kind(&self) -> &'static str {
        match self {
            Receipt::Created => "created",
            Receipt::CreateFaulted(_) => "create_faulted",
            Receipt::Duplicate => "duplicate",
            Receipt::NotAllowed => "not_allowed",
            Receipt::Committed => "committed",
            Receipt::Deprovisioned(_) => "deprovisioned",
            Receipt::Ignored => "ignored",
        }
    }
}

/// Drives entries through the provisioning states
#[derive(Debug, Clone)]
pub struct ProvisioningController {
    engine: Engine,
    config: EngineConfig,
}

impl ProvisioningController {
    pub fn new(config: EngineConfig) -> Self {
        ProvisioningController {
            engine: Engine::new(&config),
            config,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register `id` and run its init message
    pub fn create(
        &self,
        registry: &mut Registry,
        id: &str,
        program: &str,
        ctx: &MessageContext,
    ) -> Receipt {
        let sender = ctx.sender.as_deref().unwrap_or_default();
        if registry.contains(id) {
            tracing::info!(dapp = %id, sender, "create ignored: DApp with same id already exists");
            return Receipt::Duplicate;
        }
        if !self.config.allows(id) {
            tracing::info!(dapp = %id, sender, "create ignored: id not on allow-list");
            return Receipt::NotAllowed;
        }
        if let Err(e) = registry.insert(id, program, Value::empty_object()) {
            tracing::error!(dapp = %id, error = %e, "create failed");
            return Receipt::Duplicate;
        }
        tracing::info!(dapp = %id, sender, "DApp created");

        match self.engine.execute(&Value::empty_object(), program, ctx) {
            Outcome::Committed(storage) => {
                self.commit(registry, id, storage);
                Receipt::Created
            }
            Outcome::Faulted(fault) => {
                self.deprovision(registry, id, &fault);
                Receipt::CreateFaulted(fault)
            }
        }
    }

    /// Run a transaction message against a provisioned entry
    pub fn transact(&self, registry: &mut Registry, id: &str, ctx: &MessageContext) -> Receipt {
        let outcome = match registry.lookup(id) {
            Some(entry) if entry.provisioned => {
                self.engine.execute(&entry.storage, &entry.program, ctx)
            }
            Some(_) => {
                tracing::debug!(dapp = %id, "transact ignored: DApp is deprovisioned");
                return Receipt::Ignored;
            }
            None => {
                tracing::debug!(dapp = %id, "transact ignored: no such DApp");
                return Receipt::Ignored;
            }
        };

        match outcome {
            Outcome::Committed(storage) => {
                self.commit(registry, id, storage);
                Receipt::Committed
            }
            Outcome::Faulted(fault) => {
                self.deprovision(registry, id, &fault);
                Receipt::Deprovisioned(fault)
            }
        }
    }

    fn commit(&self, registry: &mut Registry, id: &str, storage: Value) {
        if let Err(e) = registry.replace_storage(id, storage) {
            tracing::error!(dapp = %id, error = %e, "commit failed");
        }
    }

    fn deprovision(&self, registry: &mut Registry, id: &str, fault: &Fault) {
        tracing::warn!(dapp = %id, fault = %fault, "execution faulted, DApp deprovisioned");
        if let Err(e) = registry.set_provisioned(id, false) {
            tracing::error!(dapp = %id, error = %e, "deprovision failed");
        }
    }
}

//! Spire Core - deterministic execution engine for DApps
//!
//! DApps are small programs, each owning a JSON-shaped storage value, driven
//! by operations replayed from an ordered block feed. Every operation runs
//! the DApp's program in a sandbox; a clean run replaces its storage, a
//! faulting run deprovisions it for good.
//!
//! # Architecture
//!
//! ```text
//! Block feed → Gate → Dispatcher → MessageContext + Registry lookup
//!                         ↓
//!                      Engine (script runtime, watchdog) → Outcome
//!                         ↓
//!                  ProvisioningController → Registry → StateStore
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic**: same storage, program and context give the same outcome
//! - **Isolated**: programs see only `storage` and `msg`
//! - **Bounded**: every run is limited in wall-clock time, steps and size
//! - **Atomic**: storage is replaced whole, and only by a clean run

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod gate;
pub mod provisioning;
pub mod registry;
pub mod replay;
pub mod script;
pub mod store;
pub mod value;

pub use config::{EngineConfig, ReplayConfig};
pub use context::{MessageContext, MessageType};
pub use dispatcher::{Dispatcher, ViewResponse, EXECUTION_ERROR, NONEXISTENT_DAPP_ERROR};
pub use error::{Error, Result};
pub use executor::{Engine, Fault, Outcome};
pub use gate::{Gate, Operation};
pub use provisioning::{ProvisioningController, Receipt};
pub use registry::{DappEntry, Registry};
pub use replay::{ReplaySummary, Replayer};
pub use store::{JsonFileStore, MemoryStore, Snapshot, StateStore};
pub use value::Value;

/// Version of this library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

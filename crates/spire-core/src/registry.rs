//! DApp registry: the authoritative id → entry table
//!
//! Entries are created once and never removed. The program text of an entry
//! never changes; storage is only ever replaced wholesale.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::Snapshot;
use crate::value::Value;
use crate::{Error, Result};

/// One registered DApp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DappEntry {
    pub program: String,
    pub storage: Value,
    pub provisioned: bool,
}

/// In-memory table of every DApp ever created
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    dapps: BTreeMap<String, DappEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: &str) -> Option<&DappEntry> {
        self.dapps.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.dapps.contains_key(id)
    }

    /// Add a provisioned entry; fails if the id is taken
    pub fn insert(&mut self, id: &str, program: &str, initial_storage: Value) -> Result<()> {
        if self.dapps.contains_key(id) {
            return Err(Error::DuplicateId(id.to_string()));
        }
        self.dapps.insert(
            id.to_string(),
            DappEntry {
                program: program.to_string(),
                storage: initial_storage,
                provisioned: true,
            },
        );
        Ok(())
    }

    pub fn replace_storage(&mut self, id: &str, storage: Value) -> Result<()> {
        let entry = self
            .dapps
            .get_mut(id)
            .ok_or_else(|| Error::UnknownDapp(id.to_string()))?;
        entry.storage = storage;
        Ok(())
    }

    pub fn set_provisioned(&mut self, id: &str, provisioned: bool) -> Result<()> {
        let entry = self
            .dapps
            .get_mut(id)
            .ok_or_else(|| Error::UnknownDapp(id.to_string()))?;
        entry.provisioned = provisioned;
        Ok(())
    }

    /// Entries in id order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DappEntry)> {
        self.dapps.iter()
    }

    pub fn len(&self) -> usize {
        self.dapps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dapps.is_empty()
    }

    pub fn snapshot(&self, cursor: u64) -> Snapshot {
        Snapshot {
            cursor,
            dapps: self.dapps.clone(),
        }
    }

    /// Rebuild a registry from a snapshot, returning it with the snapshot cursor
    pub fn restore(snapshot: Snapshot) -> (Self, u64) {
        (
            Registry {
                dapps: snapshot.dapps,
            },
            snapshot.cursor,
        )
    }

    /// SHA-256 over the canonical JSON of every entry, lowercase hex
    pub fn state_digest(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&self.dapps)?;
        Ok(format!("{:x}", Sha256::digest(&canonical)))
    }
}

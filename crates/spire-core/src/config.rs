//! Startup configuration
//!
//! Both structs have working defaults. `from_env` overlays the process
//! environment; the CLI overlays its flags on top of that.

use std::collections::BTreeSet;

use crate::{Error, Result};

/// Execution engine and provisioning settings
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Wall-clock budget per execution (`DAPP_TIMEOUT`)
    pub timeout_ms: u64,
    /// Run programs in the sandbox (`USE_SANDBOX`, anything but `false` keeps it on)
    pub sandboxed: bool,
    /// Ids allowed to be created (`WHITELIST`); `None` allows all
    pub allow_list: Option<BTreeSet<String>>,
    /// Serve views from deprovisioned DApps (`VIEW_DEPROVISIONED`)
    pub serve_deprovisioned_views: bool,
    /// Interpreter step budget per sandboxed execution
    pub fuel: u64,
    /// Largest committed storage or produced string, in estimated bytes
    pub max_value_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timeout_ms: 200,
            sandboxed: true,
            allow_list: None,
            serve_deprovisioned_views: false,
            fuel: 10_000_000,
            max_value_bytes: 1 << 20,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = EngineConfig::default();
        if let Some(raw) = non_empty(lookup("DAPP_TIMEOUT")) {
            config.timeout_ms = parse_positive("DAPP_TIMEOUT", &raw)?;
        }
        if let Some(raw) = non_empty(lookup("USE_SANDBOX")) {
            config.sandboxed = raw != "false";
        }
        if let Some(raw) = non_empty(lookup("WHITELIST")) {
            config.allow_list = Some(parse_allow_list(&raw));
        }
        if let Some(raw) = non_empty(lookup("VIEW_DEPROVISIONED")) {
            config.serve_deprovisioned_views = matches!(raw.as_str(), "true" | "1");
        }
        Ok(config)
    }

    /// Whether creation of `id` passes the allow-list
    pub fn allows(&self, id: &str) -> bool {
        self.allow_list
            .as_ref()
            .map_or(true, |list| list.contains(id))
    }
}

/// Block replay settings
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    /// First block to apply when no saved state exists (`START_BLOCK`)
    pub start_block: u64,
    /// Save state whenever the block number is a multiple of this
    pub save_interval: u64,
    /// Prefix of the operation ids this engine consumes
    pub op_prefix: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            start_block: 31_239_400,
            save_interval: 100,
            op_prefix: "spire_".to_string(),
        }
    }
}

impl ReplayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ReplayConfig::default();
        if let Some(raw) = non_empty(lookup("START_BLOCK")) {
            config.start_block = parse_number("START_BLOCK", &raw)?;
        }
        Ok(config)
    }
}

/// Comma-separated ids, trimmed and lowercased
pub fn parse_allow_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|id| id.trim().to_lowercase())
        .filter(|id| !id.is_empty())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}

fn parse_positive(key: &str, raw: &str) -> Result<u64> {
    match parse_number(key, raw)? {
        0 => Err(Error::Config(format!("{} must be greater than zero", key))),
        value => Ok(value),
    }
}

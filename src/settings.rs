//! User settings persistence.
//!
//! Stores probe configuration in ~/.agent-probe/settings.json.
//! Settings are loaded with env var > settings.json > default priority.
//!
//! Env overrides:
//! - `AGENT_PROBE_RPC_<CHAINID>`: RPC URL for one chain (adds the chain if
//!   it is in the built-in catalog but missing from the file)
//! - `AGENT_PROBE_IPFS_GATEWAY`: gateway for `ipfs://` registration URIs

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::chain::RpcEndpoint;
use crate::discovery::chains::{ChainTarget, KNOWN_CHAINS, known_chain};
use crate::discovery::scanner::ScanOptions;
use crate::identity::verifier::VerifyOptions;
use crate::probe::ProbeOptions;
use crate::transport::{DEFAULT_IPFS_GATEWAY, HttpTransport};

const RPC_ENV_PREFIX: &str = "AGENT_PROBE_RPC_";
const IPFS_GATEWAY_ENV: &str = "AGENT_PROBE_IPFS_GATEWAY";

/// User settings persisted to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Chains to read, with their RPC endpoints and registries.
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainSettings>,

    /// Multi-chain discovery.
    #[serde(default)]
    pub scan: ScanSettings,

    /// Capability probe.
    #[serde(default)]
    pub probe: ProbeSettings,

    /// Registration fetching and RPC transport.
    #[serde(default)]
    pub transport: TransportSettings,

    /// Identity verification policy.
    #[serde(default)]
    pub identity: IdentitySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chains: default_chains(),
            scan: ScanSettings::default(),
            probe: ProbeSettings::default(),
            transport: TransportSettings::default(),
            identity: IdentitySettings::default(),
        }
    }
}

/// One chain with an ERC-8004 Identity Registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub registry: Address,
    /// First block to search for mint logs.
    #[serde(default)]
    pub from_block: u64,
    /// Disabled chains are kept in the file but never contacted.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_chains() -> Vec<ChainSettings> {
    KNOWN_CHAINS
        .iter()
        .map(|c| ChainSettings {
            chain_id: c.chain_id,
            name: c.name.to_string(),
            rpc_url: c.rpc_url.to_string(),
            registry: c.registry(),
            from_block: 0,
            enabled: true,
        })
        .collect()
}

/// Multi-chain discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Budget for each chain's first call, in milliseconds.
    #[serde(default = "default_timeout_per_chain_ms")]
    pub timeout_per_chain_ms: u64,

    /// Fetch registration files for discovered identities.
    #[serde(default)]
    pub fetch_registration: bool,

    /// Bound on a whole scan, in milliseconds. None = wait for every chain.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_timeout_per_chain_ms() -> u64 {
    10_000
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            timeout_per_chain_ms: default_timeout_per_chain_ms(),
            fetch_registration: false,
            deadline_ms: None,
        }
    }
}

/// Capability probe configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Bound on the advisory payment request, in milliseconds.
    #[serde(default = "default_payment_timeout_ms")]
    pub payment_timeout_ms: u64,
}

fn default_payment_timeout_ms() -> u64 {
    5_000
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            payment_timeout_ms: default_payment_timeout_ms(),
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Gateway used to resolve `ipfs://` URIs.
    #[serde(default = "default_ipfs_gateway")]
    pub ipfs_gateway: String,

    /// Registration fetch timeout, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Per-call RPC timeout, in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Largest registration file accepted, in bytes.
    #[serde(default = "default_max_registration_bytes")]
    pub max_registration_bytes: usize,
}

fn default_ipfs_gateway() -> String {
    DEFAULT_IPFS_GATEWAY.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_rpc_timeout_ms() -> u64 {
    15_000
}

fn default_max_registration_bytes() -> usize {
    1024 * 1024
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            ipfs_gateway: default_ipfs_gateway(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            max_registration_bytes: default_max_registration_bytes(),
        }
    }
}

/// Identity verification policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySettings {
    /// Require a registration file that lists registrations to list the
    /// identity it was fetched through.
    #[serde(default = "default_true")]
    pub strict_back_reference: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            strict_back_reference: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Get the default settings file path (~/.agent-probe/settings.json).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".agent-probe")
            .join("settings.json")
    }

    /// Load settings from disk and the environment, returning defaults if
    /// nothing is configured.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        let mut settings = Self::load_from(&Self::default_path());
        settings.apply_env();
        settings
    }

    /// Load settings from a specific path without env overrides.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!(
                    "Ignoring unreadable settings file {}: {}",
                    path.display(),
                    e
                );
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Write settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| format!("mkdir error: {}", e))?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Serialize error: {}", e))?;

        // Atomic write
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|e| format!("Write error: {}", e))?;
        std::fs::rename(&tmp, path).map_err(|e| format!("Rename error: {}", e))?;
        Ok(())
    }

    /// Overlay `AGENT_PROBE_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(gateway) = std::env::var(IPFS_GATEWAY_ENV)
            && !gateway.trim().is_empty()
        {
            self.transport.ipfs_gateway = gateway.trim().to_string();
        }

        for (key, value) in std::env::vars() {
            let Some(suffix) = key.strip_prefix(RPC_ENV_PREFIX) else {
                continue;
            };
            let Ok(chain_id) = suffix.parse::<u64>() else {
                tracing::warn!("Ignoring {}: '{}' is not a chain id", key, suffix);
                continue;
            };
            self.set_rpc_url(chain_id, value);
        }
    }

    fn set_rpc_url(&mut self, chain_id: u64, url: String) {
        if let Some(chain) = self.chains.iter_mut().find(|c| c.chain_id == chain_id) {
            chain.rpc_url = url;
            return;
        }
        match known_chain(chain_id) {
            Some(known) => self.chains.push(ChainSettings {
                chain_id,
                name: known.name.to_string(),
                rpc_url: url,
                registry: known.registry(),
                from_block: 0,
                enabled: true,
            }),
            None => tracing::warn!(
                "Ignoring RPC override for chain {}: registry address unknown, add it to settings.json",
                chain_id
            ),
        }
    }

    /// Enabled chains as scan targets, optionally restricted to `only`.
    pub fn chain_targets(&self, only: &[u64]) -> Vec<ChainTarget> {
        self.enabled_chains(only)
            .map(|c| ChainTarget {
                chain_id: c.chain_id,
                name: c.name.clone(),
                registry: c.registry,
            })
            .collect()
    }

    /// RPC endpoints for enabled chains.
    pub fn rpc_endpoints(&self) -> Vec<RpcEndpoint> {
        self.enabled_chains(&[])
            .map(|c| RpcEndpoint {
                chain_id: c.chain_id,
                url: c.rpc_url.clone(),
                from_block: c.from_block,
            })
            .collect()
    }

    fn enabled_chains<'a>(&'a self, only: &'a [u64]) -> impl Iterator<Item = &'a ChainSettings> + 'a {
        self.chains
            .iter()
            .filter(move |c| c.enabled && (only.is_empty() || only.contains(&c.chain_id)))
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            fetch_registration: self.scan.fetch_registration,
            timeout_per_chain: Duration::from_millis(self.scan.timeout_per_chain_ms),
            deadline: self.scan.deadline_ms.map(Duration::from_millis),
        }
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            payment_timeout: Duration::from_millis(self.probe.payment_timeout_ms),
        }
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            strict_back_reference: self.identity.strict_back_reference,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.rpc_timeout_ms)
    }

    pub fn http_transport(&self) -> HttpTransport {
        HttpTransport::new(
            self.transport.ipfs_gateway.clone(),
            Duration::from_millis(self.transport.fetch_timeout_ms),
            self.transport.max_registration_bytes,
        )
    }

    /// Get a setting value by dotted path (e.g., "scan.timeout_per_chain_ms").
    pub fn get(&self, path: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        value_at(&json, path).map(display_value)
    }

    /// Set a setting value by dotted path.
    ///
    /// The new value is coerced to the type of the value it replaces.
    /// Returns error if path is invalid or value cannot be parsed.
    pub fn set(&mut self, path: &str, value: &str) -> Result<(), String> {
        self.update(path, |existing| coerce_value(existing, path, value))
    }

    /// Reset a setting to its default value.
    pub fn reset(&mut self, path: &str) -> Result<(), String> {
        let defaults = serde_json::to_value(Self::default())
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        let default_value = value_at(&defaults, path)
            .cloned()
            .ok_or_else(|| format!("Unknown setting: {}", path))?;
        self.update(path, |_| Ok(default_value))
    }

    /// Replace the value at `path` with `f(existing)` and re-validate the
    /// whole tree. On error `self` is left untouched.
    fn update(
        &mut self,
        path: &str,
        f: impl FnOnce(&serde_json::Value) -> Result<serde_json::Value, String>,
    ) -> Result<(), String> {
        let mut json = serde_json::to_value(&self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        let (parent_path, final_key) = match path.rsplit_once('.') {
            Some((parent, key)) => (Some(parent), key),
            None => (None, path),
        };
        if final_key.is_empty() {
            return Err("Empty path".to_string());
        }

        let mut current = &mut json;
        for part in parent_path.into_iter().flat_map(|p| p.split('.')) {
            current = match current {
                serde_json::Value::Array(items) => part
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i)),
                other => other.get_mut(part),
            }
            .ok_or_else(|| format!("Path not found: {}", path))?;
        }

        let obj = current
            .as_object_mut()
            .ok_or_else(|| format!("Parent is not an object: {}", path))?;
        let existing = obj
            .get(final_key)
            .ok_or_else(|| format!("Path not found: {}", path))?;
        let new_value = f(existing)?;
        obj.insert(final_key.to_string(), new_value);

        *self =
            serde_json::from_value(json).map_err(|e| format!("Failed to apply setting: {}", e))?;
        Ok(())
    }

    /// List all settings as (path, value) pairs, sorted by path.
    pub fn list(&self) -> Vec<(String, String)> {
        let json = match serde_json::to_value(self) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let mut results = Vec::new();
        collect_settings(&json, String::new(), &mut results);
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

/// Walk a dotted path; array elements are addressed by index.
fn value_at<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = json;
    for part in path.split('.') {
        current = match current {
            serde_json::Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current)
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Parse `value` as the same JSON type as `existing`.
fn coerce_value(
    existing: &serde_json::Value,
    path: &str,
    value: &str,
) -> Result<serde_json::Value, String> {
    use serde_json::Value;

    Ok(match existing {
        Value::Bool(_) => Value::Bool(
            value
                .parse::<bool>()
                .map_err(|_| format!("Expected boolean for {}, got '{}'", path, value))?,
        ),
        Value::Number(n) if n.is_u64() => Value::Number(
            value
                .parse::<u64>()
                .map_err(|_| format!("Expected non-negative integer for {}, got '{}'", path, value))?
                .into(),
        ),
        Value::Number(_) => {
            let n = value
                .parse::<f64>()
                .map_err(|_| format!("Expected number for {}, got '{}'", path, value))?;
            serde_json::Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| format!("Expected finite number for {}, got '{}'", path, value))?
        }
        // Option<T>: JSON if it parses, else a string
        Value::Null => serde_json::from_str(value).unwrap_or(Value::String(value.to_string())),
        Value::Array(_) => serde_json::from_str(value)
            .map_err(|e| format!("Invalid JSON array for {}: {}", path, e))?,
        Value::Object(_) => serde_json::from_str(value)
            .map_err(|e| format!("Invalid JSON object for {}: {}", path, e))?,
        Value::String(_) => Value::String(value.to_string()),
    })
}

/// Recursively collect leaf paths and display values. Array elements are
/// addressed by index.
fn collect_settings(value: &serde_json::Value, prefix: String, results: &mut Vec<(String, String)>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                collect_settings(val, join(key), results);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, val) in items.iter().enumerate() {
                collect_settings(val, join(&i.to_string()), results);
            }
        }
        other => results.push((prefix, display_value(other))),
    }
}

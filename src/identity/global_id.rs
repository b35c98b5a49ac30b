//! Global agent identifiers.
//!
//! An ERC-8004 agent is named across chains by a compact string of the form
//! `{namespace}:{chainId}:{identityRegistry}#{agentId}`, for example
//! `eip155:8453:0x8004A169FB4a3325136EB29fA0ceB6D2e539a432#2376`.
//!
//! The registry text is kept exactly as written so that formatting a parsed
//! identifier reproduces the input byte for byte (checksum casing included).

use std::fmt;
use std::str::FromStr;

use alloy::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Parse failures. Every variant renders as "malformed identifier: ...".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GlobalIdError {
    #[error("malformed identifier: expected namespace:chainId:registry#agentId, got '{0}'")]
    Shape(String),
    #[error("malformed identifier: invalid namespace '{0}'")]
    Namespace(String),
    #[error("malformed identifier: chain id '{0}' is not a non-negative integer")]
    ChainId(String),
    #[error("malformed identifier: registry '{0}' is not a 0x-prefixed 20-byte address")]
    Registry(String),
    #[error("malformed identifier: agent id '{0}' is not a non-negative integer")]
    AgentId(String),
}

/// Structured reference to one agent identity token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentRef {
    /// CAIP-2 namespace (`eip155` for EVM chains).
    pub namespace: String,
    pub chain_id: u64,
    registry: String,
    registry_address: Address,
    /// ERC-721 token id in the registry.
    pub agent_id: u64,
}

impl AgentRef {
    /// Build a reference from typed parts. The registry is rendered lowercase.
    pub fn new(namespace: impl Into<String>, chain_id: u64, registry: Address, agent_id: u64) -> Self {
        Self {
            namespace: namespace.into(),
            chain_id,
            registry: format!("{:#x}", registry),
            registry_address: registry,
            agent_id,
        }
    }

    /// Shorthand for an `eip155` reference.
    pub fn evm(chain_id: u64, registry: Address, agent_id: u64) -> Self {
        Self::new("eip155", chain_id, registry, agent_id)
    }

    /// Parse a global identifier.
    pub fn parse(id: &str) -> Result<Self, GlobalIdError> {
        let (head, agent) = id
            .split_once('#')
            .ok_or_else(|| GlobalIdError::Shape(truncate(id, 80)))?;

        let mut parts = head.splitn(3, ':');
        let (Some(namespace), Some(chain), Some(registry)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GlobalIdError::Shape(truncate(id, 80)));
        };

        if !is_caip2_namespace(namespace) {
            return Err(GlobalIdError::Namespace(truncate(namespace, 40)));
        }
        let chain_id =
            parse_canonical_u64(chain).ok_or_else(|| GlobalIdError::ChainId(truncate(chain, 40)))?;
        if !is_hex_address(registry) {
            return Err(GlobalIdError::Registry(truncate(registry, 60)));
        }
        let registry_address = registry
            .parse::<Address>()
            .map_err(|_| GlobalIdError::Registry(registry.to_string()))?;
        let agent_id =
            parse_canonical_u64(agent).ok_or_else(|| GlobalIdError::AgentId(truncate(agent, 40)))?;

        Ok(Self {
            namespace: namespace.to_string(),
            chain_id,
            registry: registry.to_string(),
            registry_address,
            agent_id,
        })
    }

    /// Registry address as written in the identifier.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn registry_address(&self) -> Address {
        self.registry_address
    }

    /// The registry part alone: `{namespace}:{chainId}:{registry}`.
    ///
    /// This is the form registration files use in their `agentRegistry` field.
    pub fn registry_id(&self) -> String {
        format!("{}:{}:{}", self.namespace, self.chain_id, self.registry)
    }

    /// Whether `agent_registry` (a `registry_id`-shaped string) names the same
    /// registry. Address comparison ignores checksum casing.
    pub fn same_registry(&self, agent_registry: &str) -> bool {
        let mut parts = agent_registry.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(chain), Some(addr)) => {
                ns == self.namespace
                    && parse_canonical_u64(chain) == Some(self.chain_id)
                    && addr.eq_ignore_ascii_case(&self.registry)
            }
            _ => false,
        }
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}#{}",
            self.namespace, self.chain_id, self.registry, self.agent_id
        )
    }
}

impl FromStr for AgentRef {
    type Err = GlobalIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for AgentRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AgentRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Format a reference as a global identifier.
pub fn format_global_id(agent: &AgentRef) -> String {
    agent.to_string()
}

/// CAIP-2 namespace: `[-a-z0-9]{3,8}`.
fn is_caip2_namespace(s: &str) -> bool {
    (3..=8).contains(&s.len())
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn is_hex_address(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(hex) => hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Decimal digits only, no sign, no leading zeros (so formatting round-trips).
fn parse_canonical_u64(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

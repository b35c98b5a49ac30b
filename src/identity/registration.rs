//! ERC-8004 registration files.
//!
//! The registration file is the off-chain JSON document an agent publishes
//! and points its identity token's `tokenURI` at. This module parses the
//! document (after the transport has unwrapped any data-URI envelope) and
//! resolves named service endpoints from it.
//!
//! Schema: <https://eips.ethereum.org/EIPS/eip-8004#registration-v1>

use alloy::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize};

use super::global_id::AgentRef;

/// Schema type constant for ERC-8004 v1 registration files.
pub const REGISTRATION_V1_TYPE: &str = "https://eips.ethereum.org/EIPS/eip-8004#registration-v1";

/// Reserved service names with resolver shortcuts.
pub const SERVICE_MCP: &str = "MCP";
pub const SERVICE_A2A: &str = "A2A";
pub const SERVICE_WEB: &str = "web";
/// Service whose endpoint carries the agent's payment wallet (CAIP-10 or bare address).
pub const SERVICE_AGENT_WALLET: &str = "agentWallet";

/// ERC-8004 agent registration file.
///
/// Parsed once and never mutated; the canonical copy lives off-system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRegistrationFile")]
pub struct RegistrationFile {
    /// Schema type identifier.
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Agent display name.
    pub name: String,

    /// Natural language description of the agent.
    pub description: String,

    /// Agent image URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Service endpoints in publication order.
    pub services: Vec<Service>,

    /// Whether the agent accepts x402 payments.
    #[serde(rename = "x402Support")]
    pub x402_support: bool,

    /// Whether the agent is currently active.
    pub active: bool,

    /// On-chain registrations the agent claims.
    pub registrations: Vec<Registration>,

    /// Supported trust models.
    #[serde(rename = "supportedTrust", skip_serializing_if = "Vec::is_empty")]
    pub supported_trust: Vec<String>,
}

/// Wire form, tolerant of the draft key spellings. Files migrating between
/// schema drafts may carry both `services` and `endpoints`; the current key
/// wins.
#[derive(Deserialize)]
struct RawRegistrationFile {
    #[serde(rename = "type", default)]
    schema_type: String,
    name: String,
    description: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    services: Option<Vec<Service>>,
    #[serde(default)]
    endpoints: Option<Vec<Service>>,
    #[serde(rename = "x402Support", default)]
    x402_support: Option<bool>,
    #[serde(rename = "x402support", default)]
    x402_support_legacy: Option<bool>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    registrations: Vec<Registration>,
    #[serde(rename = "supportedTrust", default)]
    supported_trust: Vec<String>,
}

impl TryFrom<RawRegistrationFile> for RegistrationFile {
    type Error = String;

    fn try_from(raw: RawRegistrationFile) -> Result<Self, Self::Error> {
        let services = raw
            .services
            .or(raw.endpoints)
            .ok_or_else(|| "missing field `services`".to_string())?;
        Ok(Self {
            schema_type: raw.schema_type,
            name: raw.name,
            description: raw.description,
            image: raw.image,
            services,
            x402_support: raw.x402_support.or(raw.x402_support_legacy).unwrap_or(false),
            active: raw.active,
            registrations: raw.registrations,
            supported_trust: raw.supported_trust,
        })
    }
}

/// A service endpoint in the registration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service name (e.g., "MCP", "A2A", "web", "ENS", "DID", "agentWallet").
    pub name: String,

    /// Endpoint URL or identifier.
    pub endpoint: String,

    /// Protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<Vec<String>>,
}

/// On-chain registration reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// ERC-721 token ID. Some publishers write it as a string.
    #[serde(rename = "agentId", deserialize_with = "de_agent_id")]
    pub agent_id: u64,

    /// Registry identifier: `{namespace}:{chainId}:{identityRegistry}`.
    #[serde(rename = "agentRegistry")]
    pub agent_registry: String,
}

/// Schema violations in a fetched registration file.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("invalid registration: content is not UTF-8")]
    NotUtf8,
    #[error("invalid registration: {0}")]
    Schema(#[from] serde_json::Error),
}

/// Parse transport-delivered registration bytes.
pub fn parse_registration(bytes: &[u8]) -> Result<RegistrationFile, RegistrationError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).map_err(|_| RegistrationError::NotUtf8)?;
    Ok(serde_json::from_str(text)?)
}

impl RegistrationFile {
    /// Case-insensitive exact match on service name. The first service in
    /// publication order wins when several share a name.
    pub fn resolve_service(&self, name: &str) -> Option<&Service> {
        self.services
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn endpoint_of(&self, name: &str) -> Option<&str> {
        self.resolve_service(name).map(|s| s.endpoint.as_str())
    }

    pub fn mcp(&self) -> Option<&str> {
        self.endpoint_of(SERVICE_MCP)
    }

    pub fn a2a(&self) -> Option<&str> {
        self.endpoint_of(SERVICE_A2A)
    }

    pub fn web(&self) -> Option<&str> {
        self.endpoint_of(SERVICE_WEB)
    }

    /// Payment wallet declared through an `agentWallet` service, if any.
    ///
    /// Accepts a CAIP-10 account (`eip155:8453:0x...`) or a bare address.
    /// An unparseable endpoint counts as undeclared.
    pub fn payment_wallet(&self) -> Option<Address> {
        let endpoint = self.endpoint_of(SERVICE_AGENT_WALLET)?;
        let account = endpoint.rsplit(':').next().unwrap_or(endpoint);
        account.trim().parse::<Address>().ok()
    }

    /// Whether the file lists `agent` among its registrations.
    pub fn declares(&self, agent: &AgentRef) -> bool {
        self.registrations
            .iter()
            .any(|r| r.agent_id == agent.agent_id && agent.same_registry(&r.agent_registry))
    }
}

fn de_agent_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("agentId '{}' is not an integer", s))),
    }
}

//! On-chain identity verification.
//!
//! `verify` turns a global identifier into a verdict: who owns the identity
//! token right now, and whether the registration file it points at parses
//! and refers back to it. The operation is total: every failure becomes a
//! `valid: false` result with a readable `error`, never an `Err` or a panic.
//!
//! # Policy
//!
//! - A registration file that cannot be fetched makes the result invalid,
//!   but the on-chain owner is still reported.
//! - With `strict_back_reference`, a file that lists `registrations` must
//!   list the queried `(registry, agentId)`. A file that lists none is
//!   trusted for the identity it was fetched through. Other listed
//!   registrations are never re-verified here.
//! - `paymentWallet` is what the file declares. Falling back to the owner
//!   is left to callers.

use std::sync::Arc;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::global_id::{AgentRef, GlobalIdError};
use super::registration::{RegistrationError, RegistrationFile, parse_registration};
use crate::chain::{ChainError, ChainReader};
use crate::transport::{FetchError, RegistrationFetcher};

/// Namespace served by [`ChainReader`].
pub const EVM_NAMESPACE: &str = "eip155";

/// Everything that can make a verification fail.
#[derive(Debug, thiserror::Error)]
pub enum VerifyFailure {
    #[error(transparent)]
    MalformedIdentifier(#[from] GlobalIdError),
    #[error("unsupported namespace '{0}': only eip155 registries can be read")]
    UnsupportedNamespace(String),
    #[error("chain unreachable: {0}")]
    ChainUnreachable(#[from] ChainError),
    #[error("agent {0} has no owner")]
    Unowned(String),
    #[error("registration fetch failed: {0}")]
    RegistrationFetchFailed(#[from] FetchError),
    #[error(transparent)]
    InvalidRegistration(#[from] RegistrationError),
    #[error("back-reference mismatch: registration file does not list {0}")]
    BackReferenceMismatch(String),
}

/// Machine-readable failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedIdentifier,
    ChainUnreachable,
    RegistrationFetchFailed,
    InvalidRegistration,
    BackReferenceMismatch,
}

impl VerifyFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::MalformedIdentifier(_) => FailureKind::MalformedIdentifier,
            Self::UnsupportedNamespace(_) | Self::ChainUnreachable(_) | Self::Unowned(_) => {
                FailureKind::ChainUnreachable
            }
            Self::RegistrationFetchFailed(_) => FailureKind::RegistrationFetchFailed,
            Self::InvalidRegistration(_) => FailureKind::InvalidRegistration,
            Self::BackReferenceMismatch(_) => FailureKind::BackReferenceMismatch,
        }
    }
}

/// Verdict for one identifier. Produced once per call, never cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub valid: bool,
    /// The parsed identifier, when it parsed.
    pub agent: Option<AgentRef>,
    /// Current on-chain owner, when the chain answered.
    pub owner: Option<Address>,
    pub payment_wallet: Option<Address>,
    /// `tokenURI` of the identity, when the chain answered.
    pub agent_uri: Option<String>,
    pub registration: Option<RegistrationFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl VerificationResult {
    fn invalid(agent: Option<AgentRef>, failure: VerifyFailure) -> Self {
        Self {
            valid: false,
            agent,
            owner: None,
            payment_wallet: None,
            agent_uri: None,
            registration: None,
            error: Some(failure.to_string()),
            failure: Some(failure.kind()),
        }
    }

    fn with_owner(mut self, owner: Address, agent_uri: Option<String>) -> Self {
        self.owner = Some(owner);
        self.agent_uri = agent_uri;
        self
    }
}

/// Verification knobs.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub strict_back_reference: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            strict_back_reference: true,
        }
    }
}

/// Resolves and verifies ERC-8004 identities.
#[derive(Clone)]
pub struct IdentityVerifier {
    chain: Arc<dyn ChainReader>,
    fetcher: Arc<dyn RegistrationFetcher>,
    options: VerifyOptions,
}

impl IdentityVerifier {
    pub fn new(chain: Arc<dyn ChainReader>, fetcher: Arc<dyn RegistrationFetcher>) -> Self {
        Self {
            chain,
            fetcher,
            options: VerifyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    /// Verify a global identifier string.
    pub async fn verify(&self, global_id: &str) -> VerificationResult {
        match AgentRef::parse(global_id) {
            Ok(agent) => self.verify_ref(&agent).await,
            Err(e) => {
                debug!("Rejecting identifier: {}", e);
                VerificationResult::invalid(None, e.into())
            }
        }
    }

    /// Verify an already-parsed reference.
    pub async fn verify_ref(&self, agent: &AgentRef) -> VerificationResult {
        let result = self.run(agent).await;
        match &result.error {
            None => info!("Verified {} (owner {:?})", agent, result.owner),
            Some(error) => info!("Verification of {} failed: {}", agent, error),
        }
        result
    }

    async fn run(&self, agent: &AgentRef) -> VerificationResult {
        let fail = |failure: VerifyFailure| VerificationResult::invalid(Some(agent.clone()), failure);

        if agent.namespace != EVM_NAMESPACE {
            return fail(VerifyFailure::UnsupportedNamespace(agent.namespace.clone()));
        }

        let registry = agent.registry_address();
        let (owner, uri) = tokio::join!(
            self.chain.owner_of(agent.chain_id, registry, agent.agent_id),
            self.chain.token_uri(agent.chain_id, registry, agent.agent_id),
        );

        let owner = match owner {
            Ok(owner) if owner == Address::ZERO => {
                return fail(VerifyFailure::Unowned(agent.to_string()));
            }
            Ok(owner) => owner,
            Err(e) => return fail(e.into()),
        };
        let uri = match uri {
            Ok(uri) => uri,
            Err(e) => return fail(e.into()).with_owner(owner, None),
        };
        debug!("{} owned by {:#x}, tokenURI {}", agent, owner, short_uri(&uri));

        let bytes = match self.fetcher.fetch(&uri).await {
            Ok(bytes) => bytes,
            Err(e) => return fail(e.into()).with_owner(owner, Some(uri)),
        };
        let registration = match parse_registration(&bytes) {
            Ok(file) => file,
            Err(e) => return fail(e.into()).with_owner(owner, Some(uri)),
        };

        if self.options.strict_back_reference
            && !registration.registrations.is_empty()
            && !registration.declares(agent)
        {
            let mut result =
                fail(VerifyFailure::BackReferenceMismatch(agent.to_string())).with_owner(owner, Some(uri));
            result.registration = Some(registration);
            return result;
        }

        VerificationResult {
            valid: true,
            agent: Some(agent.clone()),
            owner: Some(owner),
            payment_wallet: registration.payment_wallet(),
            agent_uri: Some(uri),
            registration: Some(registration),
            error: None,
            failure: None,
        }
    }
}

/// Data URIs can be kilobytes long; keep log lines short.
fn short_uri(uri: &str) -> &str {
    match uri.char_indices().nth(64) {
        Some((idx, _)) => &uri[..idx],
        None => uri,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeChain, FakeFetcher, registration_json};
    use alloy::primitives::address;

    const REGISTRY: &str = "0x8004A169FB4a3325136EB29fA0ceB6D2e539a432";
    const OWNER: Address = address!("00000000000000000000000000000000000000aa");

    fn global_id(agent_id: u64) -> String {
        format!("eip155:8453:{REGISTRY}#{agent_id}")
    }

    fn verifier(chain: FakeChain, fetcher: FakeFetcher) -> IdentityVerifier {
        IdentityVerifier::new(Arc::new(chain), Arc::new(fetcher))
    }

    #[tokio::test]
    async fn valid_identity_reports_owner_and_registration() {
        let chain = FakeChain::new().with_agent(8453, 1, OWNER, "https://x/agent.json");
        let fetcher = FakeFetcher::new().with_file(
            "https://x/agent.json",
            &registration_json(&[("MCP", "https://x/mcp")], true, &[]),
        );

        let result = verifier(chain, fetcher).verify(&global_id(1)).await;
        assert!(result.valid, "{:?}", result.error);
        assert_eq!(result.owner, Some(OWNER));
        assert_eq!(result.registration.as_ref().unwrap().services.len(), 1);
        assert_eq!(result.payment_wallet, None);
        assert_eq!(result.agent_uri.as_deref(), Some("https://x/agent.json"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn fetch_failure_keeps_owner() {
        let chain = FakeChain::new().with_agent(8453, 1, OWNER, "https://x/agent.json");
        let fetcher = FakeFetcher::new().with_error(
            "https://x/agent.json",
            FetchError::Timeout {
                url: "https://x/agent.json".into(),
                timeout: std::time::Duration::from_secs(10),
            },
        );

        let result = verifier(chain, fetcher).verify(&global_id(1)).await;
        assert!(!result.valid);
        assert_eq!(result.owner, Some(OWNER));
        assert!(result.registration.is_none());
        assert_eq!(result.failure, Some(FailureKind::RegistrationFetchFailed));
        assert!(result.error.unwrap().starts_with("registration fetch failed"));
    }

    #[tokio::test]
    async fn malformed_identifiers_never_panic() {
        let v = verifier(FakeChain::new(), FakeFetcher::new());
        for input in ["not-an-id", "", "#", ":::#", "eip155:1:0x12#", "\u{0}\u{fffd}#1"] {
            let result = v.verify(input).await;
            assert!(!result.valid);
            assert_eq!(result.failure, Some(FailureKind::MalformedIdentifier));
            let error = result.error.unwrap();
            assert!(error.contains("malformed"), "{input:?} -> {error}");
        }
    }

    #[tokio::test]
    async fn unknown_token_is_chain_failure() {
        let result = verifier(FakeChain::new(), FakeFetcher::new())
            .verify(&global_id(99))
            .await;
        assert!(!result.valid);
        assert!(result.owner.is_none());
        assert_eq!(result.failure, Some(FailureKind::ChainUnreachable));
        assert!(result.error.unwrap().contains("reverted"));
    }

    #[tokio::test]
    async fn unreachable_chain_is_reported() {
        let chain = FakeChain::new()
            .with_agent(8453, 1, OWNER, "https://x/agent.json")
            .unreachable(8453);
        let result = verifier(chain, FakeFetcher::new()).verify(&global_id(1)).await;
        assert!(!result.valid);
        assert!(result.error.unwrap().starts_with("chain unreachable"));
    }

    #[tokio::test]
    async fn invalid_registration_is_reported() {
        let chain = FakeChain::new().with_agent(8453, 1, OWNER, "https://x/agent.json");
        let fetcher = FakeFetcher::new().with_file("https://x/agent.json", r#"{"name": 5}"#);
        let result = verifier(chain, fetcher).verify(&global_id(1)).await;
        assert!(!result.valid);
        assert_eq!(result.owner, Some(OWNER));
        assert_eq!(result.failure, Some(FailureKind::InvalidRegistration));
    }

    #[tokio::test]
    async fn back_reference_must_match_when_listed() {
        let other = format!("eip155:1:{REGISTRY}");
        let here = format!("eip155:8453:{}", REGISTRY.to_lowercase());
        let chain = FakeChain::new()
            .with_agent(8453, 1, OWNER, "https://x/1.json")
            .with_agent(8453, 2, OWNER, "https://x/2.json");
        let fetcher = FakeFetcher::new()
            .with_file("https://x/1.json", &registration_json(&[], false, &[(1, other.as_str())]))
            .with_file(
                "https://x/2.json",
                &registration_json(&[], false, &[(7, other.as_str()), (2, here.as_str())]),
            );
        let v = verifier(chain, fetcher);

        let mismatch = v.verify(&global_id(1)).await;
        assert!(!mismatch.valid);
        assert_eq!(mismatch.failure, Some(FailureKind::BackReferenceMismatch));
        assert!(mismatch.registration.is_some());

        let listed = v.verify(&global_id(2)).await;
        assert!(listed.valid, "{:?}", listed.error);

        let lenient = v
            .clone()
            .with_options(VerifyOptions {
                strict_back_reference: false,
            })
            .verify(&global_id(1))
            .await;
        assert!(lenient.valid);
    }

    #[tokio::test]
    async fn payment_wallet_comes_from_file() {
        let chain = FakeChain::new().with_agent(8453, 1, OWNER, "https://x/agent.json");
        let fetcher = FakeFetcher::new().with_file(
            "https://x/agent.json",
            &registration_json(
                &[("agentWallet", "eip155:8453:0x00000000000000000000000000000000000000bb")],
                false,
                &[],
            ),
        );
        let result = verifier(chain, fetcher).verify(&global_id(1)).await;
        assert_eq!(
            result.payment_wallet,
            Some(address!("00000000000000000000000000000000000000bb"))
        );
    }

    #[tokio::test]
    async fn zero_owner_and_foreign_namespace_are_rejected() {
        let chain = FakeChain::new().with_owner_only(8453, 3, Address::ZERO);
        let v = verifier(chain, FakeFetcher::new());
        let burned = v.verify(&global_id(3)).await;
        assert!(!burned.valid);
        assert!(burned.owner.is_none());
        assert!(burned.error.unwrap().contains("no owner"));

        let solana = v.verify(&format!("solana:1:{REGISTRY}#1")).await;
        assert!(!solana.valid);
        assert!(solana.error.unwrap().contains("unsupported namespace"));
    }
}

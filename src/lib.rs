//! agent-probe: resolve, verify, and probe ERC-8004 agent identities.
//!
//! - [`identity`] parses global identifiers and verifies them against the
//!   Identity Registry and the agent's registration file
//! - [`discovery`] finds the identities a wallet owns across chains
//! - [`probe`] reports an agent's declared capabilities and reads its x402
//!   price from a payment challenge
//!
//! Chain and HTTP access go through the traits in [`chain`] and
//! [`transport`], so every component can run against in-memory doubles.

pub mod chain;
pub mod discovery;
pub mod identity;
pub mod probe;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use chain::{ChainError, ChainReader, RpcChainReader};
pub use discovery::{ChainRegistration, MultichainScanner, ScanOptions};
pub use identity::{AgentRef, IdentityVerifier, VerificationResult};
pub use probe::{AgentProbeResult, CapabilityProbe, ProbeOptions};
pub use settings::Settings;
pub use transport::{ChallengeTransport, HttpTransport, RegistrationFetcher};

//! Chain-RPC seam.
//!
//! Everything the identity and discovery code needs from a chain goes through
//! [`ChainReader`]: three ERC-721 views and one historical mint query. The
//! production implementation is [`rpc::RpcChainReader`]; tests plug in
//! in-memory doubles.

pub mod abi;
pub mod rpc;

use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

pub use rpc::{RpcChainReader, RpcEndpoint};

/// Chain access failures. All of them mean "chain unreachable" to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("no rpc endpoint configured for chain {0}")]
    UnknownChain(u64),
    #[error("invalid rpc endpoint for chain {chain_id}: {message}")]
    InvalidEndpoint { chain_id: u64, message: String },
    #[error("{call} on chain {chain_id} timed out after {timeout:?}")]
    Timeout {
        chain_id: u64,
        call: &'static str,
        timeout: Duration,
    },
    #[error("{call} on chain {chain_id} reverted: {message}")]
    Reverted {
        chain_id: u64,
        call: &'static str,
        message: String,
    },
    #[error("{call} on chain {chain_id} failed: {message}")]
    Rpc {
        chain_id: u64,
        call: &'static str,
        message: String,
    },
}

impl ChainError {
    /// Classify a failed call by its error text.
    pub fn from_call(chain_id: u64, call: &'static str, message: String) -> Self {
        if message.to_ascii_lowercase().contains("revert") {
            Self::Reverted {
                chain_id,
                call,
                message,
            }
        } else {
            Self::Rpc {
                chain_id,
                call,
                message,
            }
        }
    }
}

/// Read-only access to ERC-8004 identity registries on many chains.
///
/// Implementations enforce their own per-call timeouts and never retry.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// `balanceOf(owner)` on the registry.
    async fn balance_of(
        &self,
        chain_id: u64,
        registry: Address,
        owner: Address,
    ) -> Result<U256, ChainError>;

    /// `ownerOf(agentId)` on the registry.
    async fn owner_of(
        &self,
        chain_id: u64,
        registry: Address,
        agent_id: u64,
    ) -> Result<Address, ChainError>;

    /// `tokenURI(agentId)` on the registry.
    async fn token_uri(
        &self,
        chain_id: u64,
        registry: Address,
        agent_id: u64,
    ) -> Result<String, ChainError>;

    /// Token ids ever minted to `wallet` (`Transfer` from the zero address),
    /// across the full history of the registry, in log order.
    async fn minted_to(
        &self,
        chain_id: u64,
        registry: Address,
        wallet: Address,
    ) -> Result<Vec<u64>, ChainError>;
}

//! Known ERC-8004 deployments.
//!
//! The Identity Registry is deployed at the same vanity address on every
//! mainnet, and at a second one on every testnet.

use alloy::primitives::{Address, address};
use serde::{Deserialize, Serialize};

/// Identity Registry on mainnets.
pub const MAINNET_IDENTITY_REGISTRY: Address = address!("8004A169FB4a3325136EB29fA0ceB6D2e539a432");

/// Identity Registry on testnets.
pub const TESTNET_IDENTITY_REGISTRY: Address = address!("8004A818BFB912233c491871b3d84c89A494BD9e");

/// A chain the scanner should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTarget {
    pub chain_id: u64,
    pub name: String,
    pub registry: Address,
}

/// Catalog entry with a public RPC endpoint.
#[derive(Debug, Clone, Copy)]
pub struct KnownChain {
    pub chain_id: u64,
    pub name: &'static str,
    pub rpc_url: &'static str,
    pub testnet: bool,
}

impl KnownChain {
    pub fn registry(&self) -> Address {
        if self.testnet {
            TESTNET_IDENTITY_REGISTRY
        } else {
            MAINNET_IDENTITY_REGISTRY
        }
    }
}

pub const KNOWN_CHAINS: &[KnownChain] = &[
    KnownChain { chain_id: 1, name: "Ethereum", rpc_url: "https://ethereum-rpc.publicnode.com", testnet: false },
    KnownChain { chain_id: 10, name: "Optimism", rpc_url: "https://mainnet.optimism.io", testnet: false },
    KnownChain { chain_id: 137, name: "Polygon", rpc_url: "https://polygon-rpc.com", testnet: false },
    KnownChain { chain_id: 8453, name: "Base", rpc_url: "https://mainnet.base.org", testnet: false },
    KnownChain { chain_id: 42161, name: "Arbitrum One", rpc_url: "https://arb1.arbitrum.io/rpc", testnet: false },
    KnownChain { chain_id: 59144, name: "Linea", rpc_url: "https://rpc.linea.build", testnet: false },
    KnownChain { chain_id: 84532, name: "Base Sepolia", rpc_url: "https://sepolia.base.org", testnet: true },
    KnownChain { chain_id: 11155111, name: "Sepolia", rpc_url: "https://ethereum-sepolia-rpc.publicnode.com", testnet: true },
];

pub fn known_chain(chain_id: u64) -> Option<&'static KnownChain> {
    KNOWN_CHAINS.iter().find(|c| c.chain_id == chain_id)
}

/// Display name for a chain id, falling back to `chain-<id>`.
pub fn chain_name(chain_id: u64) -> String {
    known_chain(chain_id)
        .map(|c| c.name.to_string())
        .unwrap_or_else(|| format!("chain-{}", chain_id))
}

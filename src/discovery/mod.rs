//! Wallet-to-identity discovery across chains.

pub mod chains;
pub mod scanner;

pub use chains::{ChainTarget, KNOWN_CHAINS, KnownChain, chain_name, known_chain};
pub use scanner::{ChainRegistration, MultichainScanner, ScanOptions};

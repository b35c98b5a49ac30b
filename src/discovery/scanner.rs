//! Multi-chain identity discovery.
//!
//! Given a wallet, find every ERC-8004 identity it currently owns across a
//! set of chains. Each chain is scanned independently and concurrently:
//!
//! 1. `balanceOf(wallet)`, raced against the per-chain timeout
//! 2. zero balance: nothing to do on this chain
//! 3. mint `Transfer` logs to the wallet give the candidate agent ids
//! 4. `ownerOf` re-check drops tokens that have since moved
//! 5. optional registration fetch (failure drops only the file)
//!
//! A chain that errors or times out contributes no rows. Output is sorted by
//! chain id, then agent id, so completion order never shows.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use futures::StreamExt;
use futures::future::join_all;
use futures::stream::FuturesUnordered;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::chains::ChainTarget;
use crate::chain::ChainReader;
use crate::identity::global_id::AgentRef;
use crate::identity::registration::{RegistrationFile, parse_registration};
use crate::transport::RegistrationFetcher;

/// One identity currently owned by the scanned wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRegistration {
    pub chain_id: u64,
    pub chain_name: String,
    pub agent_id: u64,
    /// Owner at re-check time; always the scanned wallet.
    pub owner: Address,
    pub agent_uri: Option<String>,
    pub registration: Option<RegistrationFile>,
    pub global_id: String,
}

/// Scan knobs.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Fetch and parse each surviving identity's registration file.
    pub fetch_registration: bool,
    /// Budget for a chain's first call (`balanceOf`).
    pub timeout_per_chain: Duration,
    /// Bound on the whole scan. Chains still running when it fires are dropped.
    pub deadline: Option<Duration>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            fetch_registration: false,
            timeout_per_chain: Duration::from_secs(10),
            deadline: None,
        }
    }
}

/// Scans many chains for identities owned by one wallet.
#[derive(Clone)]
pub struct MultichainScanner {
    chain: Arc<dyn ChainReader>,
    fetcher: Arc<dyn RegistrationFetcher>,
}

impl MultichainScanner {
    pub fn new(chain: Arc<dyn ChainReader>, fetcher: Arc<dyn RegistrationFetcher>) -> Self {
        Self { chain, fetcher }
    }

    /// Scan `chains` for identities `wallet` owns. Never fails; unreachable
    /// chains simply contribute nothing.
    pub async fn scan(
        &self,
        wallet: Address,
        chains: &[ChainTarget],
        options: &ScanOptions,
    ) -> Vec<ChainRegistration> {
        let mut pending: FuturesUnordered<_> = chains
            .iter()
            .map(|target| self.scan_chain(wallet, target, options))
            .collect();

        let deadline = options
            .deadline
            .map(|d| tokio::time::Instant::now() + d);
        let mut rows = Vec::new();
        let mut settled = 0usize;

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            "Scan deadline reached; dropping {} unsettled chains",
                            pending.len()
                        );
                        break;
                    }
                },
                None => pending.next().await,
            };
            match next {
                Some(chain_rows) => {
                    settled += 1;
                    rows.extend(chain_rows);
                }
                None => break,
            }
        }

        rows.sort_by_key(|r| (r.chain_id, r.agent_id));
        info!(
            "Scanned {}/{} chains for {}: {} identities",
            settled,
            chains.len(),
            wallet,
            rows.len()
        );
        rows
    }

    async fn scan_chain(
        &self,
        wallet: Address,
        target: &ChainTarget,
        options: &ScanOptions,
    ) -> Vec<ChainRegistration> {
        let balance = tokio::time::timeout(
            options.timeout_per_chain,
            self.chain.balance_of(target.chain_id, target.registry, wallet),
        )
        .await;
        let balance = match balance {
            Ok(Ok(balance)) => balance,
            Ok(Err(e)) => {
                warn!("Skipping {} ({}): {}", target.name, target.chain_id, e);
                return Vec::new();
            }
            Err(_) => {
                debug!(
                    "Skipping {} ({}): balanceOf exceeded {:?}",
                    target.name, target.chain_id, options.timeout_per_chain
                );
                return Vec::new();
            }
        };
        if balance.is_zero() {
            return Vec::new();
        }

        let mut candidates = match self
            .chain
            .minted_to(target.chain_id, target.registry, wallet)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Skipping {} ({}): {}", target.name, target.chain_id, e);
                return Vec::new();
            }
        };
        let mut seen = HashSet::new();
        candidates.retain(|id| seen.insert(*id));
        debug!(
            "{} ({}): balance {}, {} minted candidates",
            target.name,
            target.chain_id,
            balance,
            candidates.len()
        );

        join_all(
            candidates
                .into_iter()
                .map(|agent_id| self.check_candidate(wallet, target, agent_id, options)),
        )
        .await
        .into_iter()
        .flatten()
        .collect()
    }

    async fn check_candidate(
        &self,
        wallet: Address,
        target: &ChainTarget,
        agent_id: u64,
        options: &ScanOptions,
    ) -> Option<ChainRegistration> {
        match self
            .chain
            .owner_of(target.chain_id, target.registry, agent_id)
            .await
        {
            Ok(owner) if owner == wallet => {}
            Ok(owner) => {
                debug!(
                    "Agent {} on {} moved to {}; dropping",
                    agent_id, target.chain_id, owner
                );
                return None;
            }
            Err(e) => {
                debug!("Agent {} on {}: {}", agent_id, target.chain_id, e);
                return None;
            }
        }

        let agent_uri = match self
            .chain
            .token_uri(target.chain_id, target.registry, agent_id)
            .await
        {
            Ok(uri) => Some(uri),
            Err(e) => {
                debug!("Agent {} on {}: {}", agent_id, target.chain_id, e);
                None
            }
        };

        let registration = match (&agent_uri, options.fetch_registration) {
            (Some(uri), true) => self.load_registration(uri).await,
            _ => None,
        };

        Some(ChainRegistration {
            chain_id: target.chain_id,
            chain_name: target.name.clone(),
            agent_id,
            owner: wallet,
            agent_uri,
            registration,
            global_id: AgentRef::evm(target.chain_id, target.registry, agent_id).to_string(),
        })
    }

    async fn load_registration(&self, uri: &str) -> Option<RegistrationFile> {
        let bytes = self
            .fetcher
            .fetch(uri)
            .await
            .map_err(|e| debug!("Registration fetch failed: {}", e))
            .ok()?;
        parse_registration(&bytes)
            .map_err(|e| debug!("Registration unusable: {}", e))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::chains::{MAINNET_IDENTITY_REGISTRY, chain_name};
    use crate::test_support::{FakeChain, FakeFetcher, registration_json};
    use crate::transport::FetchError;
    use alloy::primitives::address;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    const WALLET: Address = address!("00000000000000000000000000000000000000aa");
    const OTHER: Address = address!("00000000000000000000000000000000000000bb");

    fn targets(ids: &[u64]) -> Vec<ChainTarget> {
        ids.iter()
            .map(|&chain_id| ChainTarget {
                chain_id,
                name: chain_name(chain_id),
                registry: MAINNET_IDENTITY_REGISTRY,
            })
            .collect()
    }

    fn scanner(chain: FakeChain, fetcher: FakeFetcher) -> (Arc<FakeChain>, MultichainScanner) {
        let chain = Arc::new(chain);
        let scanner = MultichainScanner::new(chain.clone(), Arc::new(fetcher));
        (chain, scanner)
    }

    #[tokio::test]
    async fn zero_balance_chain_is_skipped_without_log_scan() {
        let (chain, s) = scanner(
            FakeChain::new().with_agent(8453, 12, WALLET, "https://x/12.json"),
            FakeFetcher::new(),
        );
        let rows = s.scan(WALLET, &targets(&[1, 8453]), &ScanOptions::default()).await;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chain_id, 8453);
        assert_eq!(rows[0].chain_name, "Base");
        assert_eq!(rows[0].owner, WALLET);
        assert_eq!(rows[0].agent_uri.as_deref(), Some("https://x/12.json"));
        assert_eq!(
            rows[0].global_id,
            "eip155:8453:0x8004a169fb4a3325136eb29fa0ceb6d2e539a432#12"
        );
        assert_eq!(chain.mint_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn output_order_ignores_completion_order() {
        let state = |slow: u64| {
            FakeChain::new()
                .with_agent(1, 3, WALLET, "u")
                .with_agent(137, 1, WALLET, "u")
                .with_agent(8453, 9, WALLET, "u")
                .with_agent(8453, 2, WALLET, "u")
                .with_delay(slow, Duration::from_millis(40))
        };

        let (_, fast_base) = scanner(state(1), FakeFetcher::new());
        let (_, slow_base) = scanner(state(8453), FakeFetcher::new());
        let chains = targets(&[8453, 137, 1]);
        let a = fast_base.scan(WALLET, &chains, &ScanOptions::default()).await;
        let b = slow_base.scan(WALLET, &chains, &ScanOptions::default()).await;

        let keys: Vec<(u64, u64)> = a.iter().map(|r| (r.chain_id, r.agent_id)).collect();
        assert_eq!(keys, vec![(1, 3), (137, 1), (8453, 2), (8453, 9)]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn transferred_tokens_are_dropped() {
        let (_, s) = scanner(
            FakeChain::new()
                .with_agent(8453, 5, WALLET, "u5")
                .with_agent(8453, 6, WALLET, "u6")
                .with_transfer(8453, 5, OTHER),
            FakeFetcher::new(),
        );
        let rows = s.scan(WALLET, &targets(&[8453]), &ScanOptions::default()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].agent_id, 6);
        assert!(rows.iter().all(|r| r.owner == WALLET));
    }

    #[tokio::test]
    async fn failing_and_slow_chains_do_not_block_others() {
        let (_, s) = scanner(
            FakeChain::new()
                .with_agent(1, 1, WALLET, "u")
                .with_agent(10, 1, WALLET, "u")
                .with_agent(8453, 1, WALLET, "u")
                .unreachable(1)
                .with_delay(10, Duration::from_secs(5)),
            FakeFetcher::new(),
        );
        let options = ScanOptions {
            timeout_per_chain: Duration::from_millis(50),
            ..Default::default()
        };
        let started = std::time::Instant::now();
        let rows = s.scan(WALLET, &targets(&[1, 10, 8453]), &options).await;

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chain_id, 8453);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn every_chain_unreachable_yields_empty() {
        let (_, s) = scanner(
            FakeChain::new().unreachable(1).unreachable(8453),
            FakeFetcher::new(),
        );
        let rows = s.scan(WALLET, &targets(&[1, 8453]), &ScanOptions::default()).await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn registration_fetch_is_optional_and_non_fatal() {
        let chain = || {
            FakeChain::new()
                .with_agent(8453, 1, WALLET, "https://x/1.json")
                .with_agent(8453, 2, WALLET, "https://x/2.json")
        };
        let fetcher = || {
            FakeFetcher::new()
                .with_file("https://x/1.json", &registration_json(&[("MCP", "https://x/mcp")], true, &[]))
                .with_error(
                    "https://x/2.json",
                    FetchError::Status {
                        url: "https://x/2.json".into(),
                        status: 500,
                    },
                )
        };

        let (_, s) = scanner(chain(), fetcher());
        let rows = s.scan(WALLET, &targets(&[8453]), &ScanOptions::default()).await;
        assert!(rows.iter().all(|r| r.registration.is_none()));

        let (_, s) = scanner(chain(), fetcher());
        let options = ScanOptions {
            fetch_registration: true,
            ..Default::default()
        };
        let rows = s.scan(WALLET, &targets(&[8453]), &options).await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].registration.as_ref().unwrap().mcp(), Some("https://x/mcp"));
        assert!(rows[1].registration.is_none());
    }

    #[tokio::test]
    async fn deadline_returns_settled_chains() {
        let (_, s) = scanner(
            FakeChain::new()
                .with_agent(1, 4, WALLET, "u")
                .with_agent(8453, 7, WALLET, "u")
                .with_delay(1, Duration::from_secs(3)),
            FakeFetcher::new(),
        );
        let options = ScanOptions {
            deadline: Some(Duration::from_millis(200)),
            ..Default::default()
        };
        let rows = s.scan(WALLET, &targets(&[1, 8453]), &options).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].chain_id, 8453);
    }
}

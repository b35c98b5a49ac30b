//! In-memory doubles for the chain and transport seams.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::chain::{ChainError, ChainReader};
use crate::transport::{ChallengeResponse, ChallengeTransport, FetchError, RegistrationFetcher};

/// Fixed chain state keyed by chain id. Registry addresses are ignored.
#[derive(Default)]
pub(crate) struct FakeChain {
    balances: HashMap<(u64, Address), U256>,
    owners: HashMap<(u64, u64), Address>,
    uris: HashMap<(u64, u64), String>,
    mints: HashMap<(u64, Address), Vec<u64>>,
    unreachable: HashSet<u64>,
    delays: HashMap<u64, Duration>,
    pub mint_queries: AtomicUsize,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint `agent_id` to `wallet` on `chain_id` and keep it there.
    pub fn with_agent(mut self, chain_id: u64, agent_id: u64, wallet: Address, uri: &str) -> Self {
        *self
            .balances
            .entry((chain_id, wallet))
            .or_insert(U256::ZERO) += U256::from(1u64);
        self.owners.insert((chain_id, agent_id), wallet);
        self.uris.insert((chain_id, agent_id), uri.to_string());
        self.mints.entry((chain_id, wallet)).or_default().push(agent_id);
        self
    }

    /// Move an already-minted agent to `to`, leaving the mint log in place.
    pub fn with_transfer(mut self, chain_id: u64, agent_id: u64, to: Address) -> Self {
        if let Some(from) = self.owners.insert((chain_id, agent_id), to) {
            if let Some(balance) = self.balances.get_mut(&(chain_id, from)) {
                *balance = balance.saturating_sub(U256::from(1u64));
            }
        }
        *self
            .balances
            .entry((chain_id, to))
            .or_insert(U256::ZERO) += U256::from(1u64);
        self
    }

    pub fn with_owner_only(mut self, chain_id: u64, agent_id: u64, owner: Address) -> Self {
        self.owners.insert((chain_id, agent_id), owner);
        self
    }

    pub fn unreachable(mut self, chain_id: u64) -> Self {
        self.unreachable.insert(chain_id);
        self
    }

    pub fn with_delay(mut self, chain_id: u64, delay: Duration) -> Self {
        self.delays.insert(chain_id, delay);
        self
    }

    async fn enter(&self, chain_id: u64, call: &'static str) -> Result<(), ChainError> {
        if let Some(delay) = self.delays.get(&chain_id) {
            tokio::time::sleep(*delay).await;
        }
        if self.unreachable.contains(&chain_id) {
            return Err(ChainError::Rpc {
                chain_id,
                call,
                message: "connection refused".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn balance_of(&self, chain_id: u64, _: Address, owner: Address) -> Result<U256, ChainError> {
        self.enter(chain_id, "balanceOf").await?;
        Ok(self
            .balances
            .get(&(chain_id, owner))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn owner_of(&self, chain_id: u64, _: Address, agent_id: u64) -> Result<Address, ChainError> {
        self.enter(chain_id, "ownerOf").await?;
        self.owners
            .get(&(chain_id, agent_id))
            .copied()
            .ok_or_else(|| ChainError::Reverted {
                chain_id,
                call: "ownerOf",
                message: "execution reverted: ERC721NonexistentToken".into(),
            })
    }

    async fn token_uri(&self, chain_id: u64, _: Address, agent_id: u64) -> Result<String, ChainError> {
        self.enter(chain_id, "tokenURI").await?;
        self.uris
            .get(&(chain_id, agent_id))
            .cloned()
            .ok_or_else(|| ChainError::Reverted {
                chain_id,
                call: "tokenURI",
                message: "execution reverted".into(),
            })
    }

    async fn minted_to(&self, chain_id: u64, _: Address, wallet: Address) -> Result<Vec<u64>, ChainError> {
        self.mint_queries.fetch_add(1, Ordering::SeqCst);
        self.enter(chain_id, "getLogs").await?;
        Ok(self
            .mints
            .get(&(chain_id, wallet))
            .cloned()
            .unwrap_or_default())
    }
}

/// Registration files by URI.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    files: HashMap<String, Result<Vec<u8>, FetchError>>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, uri: &str, json: &str) -> Self {
        self.files.insert(uri.to_string(), Ok(json.as_bytes().to_vec()));
        self
    }

    pub fn with_error(mut self, uri: &str, err: FetchError) -> Self {
        self.files.insert(uri.to_string(), Err(err));
        self
    }
}

#[async_trait]
impl RegistrationFetcher for FakeFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        self.files.get(uri).cloned().unwrap_or_else(|| {
            Err(FetchError::Status {
                url: uri.to_string(),
                status: 404,
            })
        })
    }
}

/// Canned answer to the payment probe.
pub(crate) struct FakeChallenge {
    response: Result<ChallengeResponse, FetchError>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl FakeChallenge {
    pub fn responding(response: ChallengeResponse) -> Self {
        Self {
            response: Ok(response),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(err: FetchError) -> Self {
        Self {
            response: Err(err),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Stall before answering, ignoring the caller's timeout.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ChallengeTransport for FakeChallenge {
    async fn send_probe(&self, _: &str, _: Duration) -> Result<ChallengeResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.clone()
    }
}

/// Registration JSON with the given services, x402 flag, and registrations.
pub(crate) fn registration_json(
    services: &[(&str, &str)],
    x402: bool,
    registrations: &[(u64, &str)],
) -> String {
    let services: Vec<_> = services
        .iter()
        .map(|(name, endpoint)| serde_json::json!({"name": name, "endpoint": endpoint}))
        .collect();
    let registrations: Vec<_> = registrations
        .iter()
        .map(|(id, registry)| serde_json::json!({"agentId": id, "agentRegistry": registry}))
        .collect();
    serde_json::json!({
        "type": crate::identity::registration::REGISTRATION_V1_TYPE,
        "name": "Frick",
        "description": "test agent",
        "services": services,
        "x402Support": x402,
        "active": true,
        "registrations": registrations,
    })
    .to_string()
}

/// Runs `f` with temporary environment variable overrides under a global
/// process-wide lock to avoid cross-test races.
pub(crate) fn with_locked_env<T>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let previous = vars
        .iter()
        .map(|(name, _)| ((*name).to_string(), std::env::var(name).ok()))
        .collect::<Vec<_>>();

    for (name, value) in vars {
        set_env(name, *value);
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    for (name, value) in previous {
        set_env(&name, value.as_deref());
    }

    match result {
        Ok(output) => output,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

fn set_env(name: &str, value: Option<&str>) {
    // Tests touching the environment hold the lock above.
    unsafe {
        match value {
            Some(v) => std::env::set_var(name, v),
            None => std::env::remove_var(name),
        }
    }
}

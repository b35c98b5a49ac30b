//! JSON-RPC backed [`ChainReader`] using alloy HTTP providers.
//!
//! One provider per configured chain. Every call is raced against the
//! configured per-call timeout; nothing is retried.

use std::collections::HashMap;
use std::future::IntoFuture;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::Filter;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use tracing::debug;

use super::abi::IIdentityRegistry;
use super::{ChainError, ChainReader};

/// RPC endpoint for one chain.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub chain_id: u64,
    pub url: String,
    /// First block to scan for mint logs (the registry's deployment block).
    pub from_block: u64,
}

/// [`ChainReader`] over HTTP JSON-RPC.
pub struct RpcChainReader {
    providers: HashMap<u64, (DynProvider, u64)>,
    call_timeout: Duration,
}

impl RpcChainReader {
    /// Build providers for every endpoint. Fails on the first bad URL.
    pub fn new(
        endpoints: impl IntoIterator<Item = RpcEndpoint>,
        call_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let mut providers = HashMap::new();
        for endpoint in endpoints {
            let url: url::Url =
                endpoint
                    .url
                    .parse()
                    .map_err(|e: url::ParseError| ChainError::InvalidEndpoint {
                        chain_id: endpoint.chain_id,
                        message: e.to_string(),
                    })?;
            let provider = ProviderBuilder::new().connect_http(url).erased();
            providers.insert(endpoint.chain_id, (provider, endpoint.from_block));
        }

        debug!("Configured RPC providers for {} chains", providers.len());
        Ok(Self {
            providers,
            call_timeout,
        })
    }

    /// Chains this reader can reach.
    pub fn chain_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.providers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn provider(&self, chain_id: u64) -> Result<&(DynProvider, u64), ChainError> {
        self.providers
            .get(&chain_id)
            .ok_or(ChainError::UnknownChain(chain_id))
    }

    async fn timed<T, E, F>(&self, chain_id: u64, call: &'static str, fut: F) -> Result<T, ChainError>
    where
        F: IntoFuture<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::from_call(chain_id, call, e.to_string())),
            Err(_) => Err(ChainError::Timeout {
                chain_id,
                call,
                timeout: self.call_timeout,
            }),
        }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn balance_of(
        &self,
        chain_id: u64,
        registry: Address,
        owner: Address,
    ) -> Result<U256, ChainError> {
        let (provider, _) = self.provider(chain_id)?;
        let contract = IIdentityRegistry::new(registry, provider.clone());
        let call = contract.balanceOf(owner);
        self.timed(chain_id, "balanceOf", call.call()).await
    }

    async fn owner_of(
        &self,
        chain_id: u64,
        registry: Address,
        agent_id: u64,
    ) -> Result<Address, ChainError> {
        let (provider, _) = self.provider(chain_id)?;
        let contract = IIdentityRegistry::new(registry, provider.clone());
        let call = contract.ownerOf(U256::from(agent_id));
        self.timed(chain_id, "ownerOf", call.call()).await
    }

    async fn token_uri(
        &self,
        chain_id: u64,
        registry: Address,
        agent_id: u64,
    ) -> Result<String, ChainError> {
        let (provider, _) = self.provider(chain_id)?;
        let contract = IIdentityRegistry::new(registry, provider.clone());
        let call = contract.tokenURI(U256::from(agent_id));
        self.timed(chain_id, "tokenURI", call.call()).await
    }

    async fn minted_to(
        &self,
        chain_id: u64,
        registry: Address,
        wallet: Address,
    ) -> Result<Vec<u64>, ChainError> {
        let (provider, from_block) = self.provider(chain_id)?;
        let filter = Filter::new()
            .address(registry)
            .event_signature(IIdentityRegistry::Transfer::SIGNATURE_HASH)
            .topic1(Address::ZERO.into_word())
            .topic2(wallet.into_word())
            .from_block(*from_block);

        let logs = self
            .timed(chain_id, "getLogs", provider.get_logs(&filter))
            .await?;

        let mut ids = Vec::with_capacity(logs.len());
        for log in logs {
            let decoded = match log.log_decode::<IIdentityRegistry::Transfer>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!("Skipping undecodable Transfer log on chain {}: {}", chain_id, e);
                    continue;
                }
            };
            match u64::try_from(decoded.inner.data.tokenId) {
                Ok(id) => ids.push(id),
                Err(_) => debug!(
                    "Skipping token id {} on chain {}: exceeds u64",
                    decoded.inner.data.tokenId, chain_id
                ),
            }
        }

        debug!(
            "Found {} mint logs to {} on chain {}",
            ids.len(),
            wallet,
            chain_id
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_urls() {
        let err = RpcChainReader::new(
            [RpcEndpoint {
                chain_id: 8453,
                url: "not a url".into(),
                from_block: 0,
            }],
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ChainError::InvalidEndpoint { chain_id: 8453, .. }));
    }

    #[tokio::test]
    async fn unknown_chain_is_an_error_not_a_panic() {
        let reader = RpcChainReader::new(
            [RpcEndpoint {
                chain_id: 1,
                url: "http://127.0.0.1:1".into(),
                from_block: 0,
            }],
            Duration::from_millis(200),
        )
        .unwrap();
        assert_eq!(reader.chain_ids(), vec![1]);
        let err = reader
            .owner_of(8453, Address::ZERO, 1)
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::UnknownChain(8453));
    }
}

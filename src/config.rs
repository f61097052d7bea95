//! Chain configuration: a JSON list of per-chain settings, validated at load
//! time rather than deferred to first use (the teacher's `Manifest` validates
//! the same way before any indexer starts).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One chain's worth of fetcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// Human-readable chain name, e.g. "ethereum-mainnet".
    pub name: String,

    /// Base58-check blockchain id, as used by some multi-chain registries.
    /// Opaque to this crate; carried through for the supervisor's benefit.
    pub blockchain_id: String,

    /// EVM chain id (`eth_chainId`), e.g. 1 for Ethereum mainnet.
    pub evm_chain_id: u64,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Starting/base batch size for `eth_getBlockByNumber` calls.
    pub request_batch_size: u32,

    /// Maximum number of concurrent in-flight HTTP requests to this endpoint.
    pub max_concurrency: u32,

    /// Maximum requests admitted per second.
    pub requests_per_second: u32,

    /// Whether to call `debug_traceBlockByNumber` for each fetched block.
    #[serde(default)]
    pub debug_tracing: bool,

    /// Maximum number of blocks fetched per Fetch Loop iteration.
    pub blocks_per_fetch_batch: u32,
}

impl ChainConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid { chain: self.name.clone(), reason: reason.to_string() };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(invalid("rpc_url must not be empty"));
        }
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(invalid("rpc_url must be an http(s) url"));
        }
        if self.request_batch_size == 0 {
            return Err(invalid("request_batch_size must be > 0"));
        }
        if self.max_concurrency == 0 {
            return Err(invalid("max_concurrency must be > 0"));
        }
        if self.requests_per_second == 0 {
            return Err(invalid("requests_per_second must be > 0"));
        }
        if self.blocks_per_fetch_batch == 0 {
            return Err(invalid("blocks_per_fetch_batch must be > 0"));
        }
        Ok(())
    }
}

/// The full set of chains this deployment knows about.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainConfigList {
    pub chains: Vec<ChainConfig>,
}

impl ChainConfigList {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
        let list: Self = serde_json::from_str(&raw)?;
        for chain in &list.chains {
            chain.validate()?;
        }
        Ok(list)
    }

    pub fn find(&self, name: &str) -> Result<&ChainConfig, ConfigError> {
        self.chains
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConfigError::ChainNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChainConfig {
        ChainConfig {
            name: "local-devnet".to_string(),
            blockchain_id: "11111111111111111111111111111111LpoYY".to_string(),
            evm_chain_id: 1337,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            request_batch_size: 20,
            max_concurrency: 8,
            requests_per_second: 50,
            debug_tracing: true,
            blocks_per_fetch_batch: 50,
        }
    }

    #[test]
    fn validates_good_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_empty_rpc_url() {
        let mut cfg = sample();
        cfg.rpc_url = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_http_scheme() {
        let mut cfg = sample();
        cfg.rpc_url = "ws://127.0.0.1:8545".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_batch_size() {
        let mut cfg = sample();
        cfg.request_batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_list_from_json() {
        let json = serde_json::to_string(&vec![sample()]).unwrap();
        let list: ChainConfigList = serde_json::from_str(&json).unwrap();
        assert_eq!(list.chains.len(), 1);
        assert!(list.find("local-devnet").is_ok());
        assert!(list.find("missing").is_err());
    }
}

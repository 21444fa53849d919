use std::{path::PathBuf, time::Duration};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The location of the cross transaction database. If not set, an in-memory database is used and nothing survives
    /// a restart.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// The ledger channel records are stored under. Each channel's records are kept apart from every other channel's.
    #[serde(default = "channel_default")]
    pub channel: String,
    /// The account-based chain to watch.
    pub chain: ChainConfig,
    /// Handling of blocks delivered by the permissioned ledger.
    #[serde(default)]
    pub courier: CourierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    /// JSON-RPC endpoint of a node on the watched chain.
    pub rpc_url: String,
    /// Address of the cross-chain contract whose logs are scanned.
    pub contract: Address,
    /// The last block height that has already been scanned. Scanning resumes at the block after this one.
    #[serde(default)]
    pub start_height: u64,
    /// How often the chain is polled for new logs. Defaults to 5 seconds.
    #[serde(default = "poll_interval_default")]
    pub poll_interval: Duration,
    /// Timeout for each individual RPC call. Defaults to 30 seconds.
    #[serde(default = "rpc_timeout_default")]
    pub rpc_timeout: Duration,
    /// The maximum number of blocks scanned in one poll while catching up.
    #[serde(default = "batch_size_default")]
    pub batch_size: u64,
    /// The number of most recent blocks which are never scanned, to tolerate shallow reorganisations.
    #[serde(default = "confirmations_default")]
    pub confirmations: u64,
    /// Chain identifier mixed into every cross transaction signature.
    #[serde(default = "chain_id_default")]
    pub chain_id: u64,
    /// Identifier of the destination chain recorded on every cross transaction.
    #[serde(default = "destination_id_default")]
    pub destination_id: u64,
    /// Path to an event catalog to use instead of the built-in one.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    /// Chaincode event name prefixes which are relayed. If empty, every event is relayed.
    #[serde(default)]
    pub event_filter: Vec<String>,
}

impl CourierConfig {
    pub fn is_relevant(&self, event_name: &str) -> bool {
        self.event_filter.is_empty()
            || self
                .event_filter
                .iter()
                .any(|prefix| event_name.starts_with(prefix.as_str()))
    }
}

pub fn channel_default() -> String {
    "mychannel".to_owned()
}

pub fn poll_interval_default() -> Duration {
    Duration::from_secs(5)
}

pub fn rpc_timeout_default() -> Duration {
    Duration::from_secs(30)
}

pub fn batch_size_default() -> u64 {
    100
}

pub fn confirmations_default() -> u64 {
    12
}

pub fn chain_id_default() -> u64 {
    11
}

pub fn destination_id_default() -> u64 {
    1
}

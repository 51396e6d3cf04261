use serde::{Deserialize, Serialize};

// Serde default helpers; keep literals out of struct derives.
fn default_network_id() -> u32 {
    1
}
fn default_initial_difficulty() -> u32 {
    1
}
fn default_adjustment_interval() -> u32 {
    10
}
fn default_target_block_time_ms() -> u64 {
    10_000
}
fn default_max_transactions_per_block() -> u32 {
    100
}
fn default_max_block_size() -> usize {
    1024 * 1024
}
fn default_miner_reward() -> u64 {
    50
}
fn default_mempool_limit() -> u32 {
    5_000
}
fn default_true() -> bool {
    true
}
fn default_max_nonce_attempts() -> u64 {
    10_000_000
}
fn default_max_timestamp_drift_ms() -> u64 {
    2 * 3600 * 1000
}
fn default_snapshot_interval() -> u64 {
    100
}
fn default_gas_per_fee_unit() -> u64 {
    1000
}

/// Consensus-relevant node configuration. Every replica on a network must
/// agree on these values; they feed directly into validation and the
/// deterministic VM.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_network_id")]
    pub network_id: u32,

    #[serde(default = "default_initial_difficulty")]
    pub initial_difficulty: u32,

    /// Retarget difficulty every this many blocks.
    #[serde(default = "default_adjustment_interval")]
    pub difficulty_adjustment_interval: u32,

    #[serde(default = "default_target_block_time_ms")]
    pub target_block_time_ms: u64,

    #[serde(default = "default_max_transactions_per_block")]
    pub max_transactions_per_block: u32,

    /// Upper bound on a block's wire size in bytes.
    #[serde(default = "default_max_block_size")]
    pub max_block_size: usize,

    /// Fixed coinbase amount; exactly one coinbase per block, in the last
    /// slot.
    #[serde(default = "default_miner_reward")]
    pub miner_reward: u64,

    #[serde(default = "default_mempool_limit")]
    pub mempool_limit: u32,

    #[serde(default = "default_true")]
    pub enable_smart_contracts: bool,

    /// `create_block` gives up after this many nonce attempts.
    #[serde(default = "default_max_nonce_attempts")]
    pub max_nonce_attempts: u64,

    /// How far into the future a block timestamp may run ahead of the local
    /// clock before the block is rejected.
    #[serde(default = "default_max_timestamp_drift_ms")]
    pub max_timestamp_drift_ms: u64,

    /// Contract gas budget per unit of fee.
    #[serde(default = "default_gas_per_fee_unit")]
    pub gas_per_fee_unit: u64,

    /// Durable-storage retention window in blocks; `None` keeps everything.
    #[serde(default)]
    pub max_retained_blocks: Option<u64>,

    /// Persist a `{height, state, utxo}` snapshot every this many blocks.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network_id: default_network_id(),
            initial_difficulty: default_initial_difficulty(),
            difficulty_adjustment_interval: default_adjustment_interval(),
            target_block_time_ms: default_target_block_time_ms(),
            max_transactions_per_block: default_max_transactions_per_block(),
            max_block_size: default_max_block_size(),
            miner_reward: default_miner_reward(),
            mempool_limit: default_mempool_limit(),
            enable_smart_contracts: true,
            max_nonce_attempts: default_max_nonce_attempts(),
            max_timestamp_drift_ms: default_max_timestamp_drift_ms(),
            gas_per_fee_unit: default_gas_per_fee_unit(),
            max_retained_blocks: None,
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

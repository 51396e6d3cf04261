use sha2::{Digest, Sha256};

use hivebolt_core::types::Address;

/// Numeric account handle used on the VM stack in place of an address: the
/// first 8 bytes of `SHA256(address string)` as a big-endian i64. Handles
/// are opaque to contracts; `CALLER` produces one and `BALANCE` consumes one.
pub fn account_handle(addr: &Address) -> i64 {
    let digest = Sha256::digest(addr.to_string().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

/// Everything a contract may observe about the transaction and block it
/// executes in. Assembled by the chain manager per contract transaction.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    /// Transaction sender.
    pub caller: Address,
    /// The contract account being executed (`tx.to`).
    pub contract: Address,
    /// Amount transferred to the contract by the enclosing transaction.
    pub value: u64,
    /// Height of the enclosing block.
    pub block_index: u64,
    /// The enclosing block's declared timestamp. This, not wall clock, feeds
    /// `TIMESTAMP` and the syscall rate limiter so replicas agree.
    pub block_timestamp_ms: u64,
    /// Hash of the enclosing block; deferred hardware actions bind to it.
    pub block_hash: String,
}

impl ExecutionContext {
    pub fn caller_handle(&self) -> i64 {
        account_handle(&self.caller)
    }

    pub fn contract_handle(&self) -> i64 {
        account_handle(&self.contract)
    }
}

use thiserror::Error;

/// Contract execution failures. Any of these aborts the enclosing block
/// application atomically; none of them leaves partial state behind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpCode(u8),

    #[error("stack overflow at pc {pc}")]
    StackOverflow { pc: usize },

    #[error("stack underflow at pc {pc}")]
    StackUnderflow { pc: usize },

    #[error("division by zero at pc {pc}")]
    DivByZero { pc: usize },

    #[error("out of gas: op costs {needed}, {remaining} remaining")]
    OutOfGas { needed: u64, remaining: u64 },

    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),

    #[error("missing capability for syscall {syscall} on device {device_id}")]
    Unauthorized { syscall: u8, device_id: u64 },

    #[error("syscall {syscall} rate-limited for contract (window {window_ms} ms)")]
    RateLimited { syscall: u8, window_ms: u64 },

    #[error("invalid syscall {0}")]
    InvalidSyscall(i64),
}

/// Every failure the chain core can surface, grouped by kind: validation
/// errors are transaction-local, consensus errors reject a block, execution
/// wraps a VM abort, io wraps the storage layer, and the fatal variants
/// terminate startup.
#[derive(Debug, Error)]
pub enum ChainError {
    // ── Validation (transaction-local) ───────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    #[error("wrong network id: expected {expected}, got {got}")]
    WrongNetwork { expected: u32, got: u32 },

    #[error("invalid nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u64, have: u64 },

    #[error("unknown or spent utxo input {0}")]
    MissingUtxo(String),

    #[error("utxo input {0} is not owned by the sender")]
    ForeignUtxo(String),

    #[error("utxo inputs {inputs} do not cover outputs {outputs} plus fee {fee}")]
    UtxoUnderfunded { inputs: u64, outputs: u64, fee: u64 },

    #[error("transaction timestamp drifts {drift_ms} ms from now (max {max_ms})")]
    TimestampDrift { drift_ms: u64, max_ms: u64 },

    #[error("duplicate transaction {0}")]
    DuplicateTransaction(String),

    #[error("replacement fee {offered} does not exceed current fee {current}")]
    FeeNotHigher { offered: u64, current: u64 },

    #[error("mempool full ({capacity} entries) and fee-per-byte too low")]
    PoolFull { capacity: usize },

    #[error("transaction expired: valid until block {valid_until}, at height {height}")]
    Expired { valid_until: u64, height: u64 },

    #[error("transaction kind requires a recipient")]
    MissingRecipient,

    #[error("sender address does not match the attached public key")]
    AddressMismatch,

    #[error("amount plus fee overflows")]
    AmountOverflow,

    #[error("smart contracts are disabled on this network")]
    ContractsDisabled,

    // ── Consensus (block-local) ──────────────────────────────────────────────
    #[error("block does not chain to tip: expected prev {expected}, got {got}")]
    DoesNotChain { expected: String, got: String },

    #[error("bad block height: expected {expected}, got {got}")]
    BadHeight { expected: u64, got: u64 },

    #[error("block hash does not match its contents")]
    HashMismatch,

    #[error("block hash fails difficulty {difficulty}")]
    InvalidPow { difficulty: u32 },

    #[error("block difficulty {got} does not match consensus difficulty {expected}")]
    WrongDifficulty { expected: u32, got: u32 },

    #[error("unknown validator: {0}")]
    UnknownValidator(String),

    #[error("invalid validator signature from {0}")]
    InvalidValidatorSignature(String),

    #[error("bad coinbase: {0}")]
    BadCoinbase(String),

    #[error("state root mismatch: block declares {declared}, applying yields {computed}")]
    StateRootMismatch { declared: String, computed: String },

    #[error("block timestamp precedes its parent")]
    TimestampRegression,

    #[error("block exceeds size limit: {size} bytes (max {max})")]
    OversizedBlock { size: usize, max: usize },

    #[error("mining exhausted after {attempts} nonce attempts")]
    MiningExhausted { attempts: u64 },

    // ── Execution ────────────────────────────────────────────────────────────
    #[error("contract execution aborted: {0}")]
    Execution(#[from] VmError),

    // ── Io / serialization ───────────────────────────────────────────────────
    #[error("storage failure: {0}")]
    Io(String),

    #[error("codec failure: {0}")]
    Codec(String),

    // ── Fatal (terminate startup) ────────────────────────────────────────────
    #[error("storage key must be {expected} bytes, got {got}")]
    KeySize { expected: usize, got: usize },

    #[error("storage corrupt: {0}")]
    Corrupt(String),

    #[error("validator secret key missing or unusable")]
    MissingValidatorKey,
}

impl ChainError {
    /// True for the variants that must terminate the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChainError::KeySize { .. } | ChainError::Corrupt(_) | ChainError::MissingValidatorKey
        )
    }
}

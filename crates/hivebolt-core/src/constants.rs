//! ─── HiveBolt Protocol Constants ────────────────────────────────────────────
//!
//! Fixed protocol parameters shared by every node. Tunable per-network values
//! live in [`crate::config::ChainConfig`] instead.

// ── Identity ─────────────────────────────────────────────────────────────────

/// Human-readable address prefix.
pub const ADDRESS_PREFIX: &str = "hb";

/// Address payload length: first 20 bytes of SHA-256 of the compressed pubkey.
pub const ADDRESS_PAYLOAD_BYTES: usize = 20;

/// Compressed secp256k1 public key length.
pub const PUBKEY_BYTES: usize = 33;

/// Raw `R ∥ S` signature length.
pub const SIGNATURE_BYTES: usize = 64;

// ── Domain-separation tags for signing digests ───────────────────────────────

/// Prefixed to the canonical transaction body before hashing for signatures.
pub const TX_SIGNING_TAG: &[u8] = b"TX\0";

/// Prefixed to the canonical block header before hashing for PoA signatures.
pub const BLOCK_SIGNING_TAG: &[u8] = b"BLOCK\0";

/// Prefixed to handshake nonces before hashing for challenge signatures.
pub const HANDSHAKE_SIGNING_TAG: &[u8] = b"HELLO\0";

// ── Chain ────────────────────────────────────────────────────────────────────

/// Current transaction wire version.
pub const TX_VERSION: u32 = 1;

/// `prev_hash` of the genesis block.
pub const GENESIS_PREV_HASH: &str = "0";

/// Genesis timestamp: 2026-01-01 00:00:00 UTC, in milliseconds.
/// Fixed so every node derives the identical genesis hash.
pub const GENESIS_TIMESTAMP_MS: u64 = 1_767_225_600_000;

/// Confirmations required before deferred hardware actions commit.
pub const CONFIRMATION_DEPTH: u64 = 6;

// ── Mempool ──────────────────────────────────────────────────────────────────

/// Admission window around the local clock: 24 hours in milliseconds.
pub const MEMPOOL_MAX_TX_AGE_MS: u64 = 24 * 3600 * 1000;

// ── VM ───────────────────────────────────────────────────────────────────────

/// Operand stack capacity. A push onto a full stack is fatal to the contract.
pub const VM_STACK_CAPACITY: usize = 1024;

/// Minimum spacing between two invocations of the same `(contract, syscall)`
/// pair, measured against the block's declared timestamp.
pub const SYSCALL_RATE_WINDOW_MS: u64 = 1000;

// ── P2P wire ─────────────────────────────────────────────────────────────────

/// Protocol version advertised in HELLO.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hard cap on a single frame payload: 5 MiB.
pub const MAX_FRAME_PAYLOAD_BYTES: u32 = 5 * 1024 * 1024;

/// Handshake nonce length.
pub const HANDSHAKE_NONCE_BYTES: usize = 32;

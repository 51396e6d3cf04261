//! hivebolt-crypto
//!
//! secp256k1 signing primitives for the HiveBolt chain: raw 64-byte `R ∥ S`
//! signatures with low-S normalization, SHA-256 hashing, and `hb…` address
//! derivation from compressed public keys.

pub mod hash;
pub mod keypair;
pub mod pow;
pub mod signature;

pub use hash::{derive_address, handshake_digest, sha256};
pub use keypair::KeyPair;
pub use pow::{leading_hex_zeros, meets_difficulty};
pub use signature::{sign_digest, verify_digest, SignatureError};

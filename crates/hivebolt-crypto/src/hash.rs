use sha2::{Digest, Sha256};

use hivebolt_core::constants::{ADDRESS_PAYLOAD_BYTES, HANDSHAKE_SIGNING_TAG, PUBKEY_BYTES};
use hivebolt_core::types::Address;

use crate::signature::SignatureError;

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Derive an address from a compressed secp256k1 public key: the first 20
/// bytes of `SHA256(pubkey)`, rendered with the `hb` prefix.
pub fn derive_address(pubkey: &[u8]) -> Result<Address, SignatureError> {
    if pubkey.len() != PUBKEY_BYTES {
        return Err(SignatureError::InvalidPublicKey);
    }
    let digest = sha256(pubkey);
    let mut payload = [0u8; ADDRESS_PAYLOAD_BYTES];
    payload.copy_from_slice(&digest[..ADDRESS_PAYLOAD_BYTES]);
    Ok(Address::from_bytes(payload))
}

/// Digest signed during the P2P handshake: `SHA256("HELLO\0" ∥ nonce)`.
/// The tag keeps the node identity key from ever signing a raw
/// attacker-chosen 32-byte string.
pub fn handshake_digest(nonce: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(HANDSHAKE_SIGNING_TAG);
    hasher.update(nonce);
    hasher.finalize().into()
}

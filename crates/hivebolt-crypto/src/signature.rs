use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use thiserror::Error;

use hivebolt_core::constants::{PUBKEY_BYTES, SIGNATURE_BYTES};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("invalid signature length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("public key is not a valid secp256k1 point")]
    InvalidPublicKey,

    #[error("secret key is not a valid secp256k1 scalar")]
    InvalidSecretKey,

    #[error("signature S is not in the low half of the curve order")]
    NonCanonical,

    #[error("signature verification failed")]
    Verification,
}

/// Sign a 32-byte digest, returning raw `R ∥ S` with S normalized low.
pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_BYTES], SignatureError> {
    let sig: Signature = key
        .sign_prehash(digest)
        .map_err(|_| SignatureError::InvalidSecretKey)?;
    let sig = sig.normalize_s().unwrap_or(sig);
    Ok(sig.to_bytes().into())
}

/// Verify a raw `R ∥ S` signature over a 32-byte digest.
///
/// High-S encodings are rejected outright: accepting both halves would make
/// every signature malleable and every txid forgeable-by-mutation.
pub fn verify_digest(
    pubkey: &[u8],
    digest: &[u8; 32],
    signature: &[u8],
) -> Result<(), SignatureError> {
    if signature.len() != SIGNATURE_BYTES {
        return Err(SignatureError::InvalidLength {
            expected: SIGNATURE_BYTES,
            got: signature.len(),
        });
    }
    if pubkey.len() != PUBKEY_BYTES {
        return Err(SignatureError::InvalidPublicKey);
    }
    let verifying_key =
        VerifyingKey::from_sec1_bytes(pubkey).map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig = Signature::from_slice(signature).map_err(|_| SignatureError::Verification)?;
    if sig.normalize_s().is_some() {
        return Err(SignatureError::NonCanonical);
    }
    verifying_key
        .verify_prehash(digest, &sig)
        .map_err(|_| SignatureError::Verification)
}

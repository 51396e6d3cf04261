use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use zeroize::Zeroizing;

use hivebolt_core::constants::{PUBKEY_BYTES, SIGNATURE_BYTES};
use hivebolt_core::types::Address;

use crate::hash::derive_address;
use crate::signature::{sign_digest, SignatureError};

/// A HiveBolt identity: secp256k1 secret key with derived compressed public
/// key and `hb…` address. Used for transaction senders, PoA validators, and
/// the P2P node identity alike.
///
/// The raw secret bytes are held in a `Zeroizing` buffer and wiped on drop.
pub struct KeyPair {
    signing_key: SigningKey,
    secret_bytes: Zeroizing<[u8; 32]>,
    public_key: [u8; PUBKEY_BYTES],
    address: Address,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        loop {
            let mut secret = Zeroizing::new([0u8; 32]);
            rng.fill_bytes(secret.as_mut());
            // Zero or >= curve order is astronomically unlikely; retry.
            if let Ok(kp) = Self::from_secret_bytes(secret.as_ref()) {
                return kp;
            }
        }
    }

    /// Restore a keypair from 32 raw secret-scalar bytes.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, SignatureError> {
        let signing_key =
            SigningKey::from_slice(secret).map_err(|_| SignatureError::InvalidSecretKey)?;
        let mut secret_bytes = Zeroizing::new([0u8; 32]);
        secret_bytes.copy_from_slice(secret);

        let verifying_key: &VerifyingKey = signing_key.verifying_key();
        let encoded = verifying_key.to_encoded_point(true);
        let public_key: [u8; PUBKEY_BYTES] = encoded
            .as_bytes()
            .try_into()
            .map_err(|_| SignatureError::InvalidPublicKey)?;
        let address = derive_address(&public_key)?;

        Ok(Self {
            signing_key,
            secret_bytes,
            public_key,
            address,
        })
    }

    /// Restore a keypair from a hex-encoded secret key.
    pub fn from_secret_hex(hex_str: &str) -> Result<Self, SignatureError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| SignatureError::InvalidSecretKey)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Sign a 32-byte digest, producing raw low-S `R ∥ S`.
    pub fn sign(&self, digest: &[u8; 32]) -> [u8; SIGNATURE_BYTES] {
        sign_digest(&self.signing_key, digest).expect("signing with a validated key is infallible")
    }

    pub fn public_key(&self) -> [u8; PUBKEY_BYTES] {
        self.public_key
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Hex of the raw secret scalar; for `keygen` output only.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_bytes.as_ref())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {} }}", self.address)
    }
}

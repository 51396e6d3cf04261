use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use hivebolt_core::block::Block;
use hivebolt_core::constants::PUBKEY_BYTES;
use hivebolt_core::error::ChainError;
use hivebolt_crypto::{verify_digest, KeyPair};

/// One roster entry as it appears in node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub id: String,
    /// Hex-encoded compressed secp256k1 public key.
    pub pubkey: String,
}

/// The fixed Proof-of-Authority validator set, supplied at startup.
///
/// Any listed validator may author a block; there is no leader election at
/// this layer, and liveness is a deployment policy. Membership plus a valid
/// signature over the block's canonical payload is the entire authorship
/// rule.
#[derive(Clone, Debug, Default)]
pub struct ValidatorSet {
    validators: HashMap<String, [u8; PUBKEY_BYTES]>,
}

impl ValidatorSet {
    pub fn from_roster(roster: &[ValidatorInfo]) -> Result<Self, ChainError> {
        let mut validators = HashMap::with_capacity(roster.len());
        for entry in roster {
            let bytes = hex::decode(&entry.pubkey)
                .map_err(|e| ChainError::Corrupt(format!("validator {} pubkey: {e}", entry.id)))?;
            let pubkey: [u8; PUBKEY_BYTES] = bytes.try_into().map_err(|_| {
                ChainError::Corrupt(format!("validator {} pubkey length", entry.id))
            })?;
            validators.insert(entry.id.clone(), pubkey);
        }
        Ok(Self { validators })
    }

    pub fn is_validator(&self, id: &str) -> bool {
        self.validators.contains_key(id)
    }

    pub fn pubkey(&self, id: &str) -> Option<&[u8; PUBKEY_BYTES]> {
        self.validators.get(id)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sign `block` as `validator_id`. The key must belong to the roster
    /// entry it claims; blocks signed with a foreign key would only be
    /// rejected by every peer.
    pub fn sign_block(
        &self,
        block: &mut Block,
        validator_id: &str,
        keypair: &KeyPair,
    ) -> Result<(), ChainError> {
        let registered = self
            .pubkey(validator_id)
            .ok_or_else(|| ChainError::UnknownValidator(validator_id.to_string()))?;
        if *registered != keypair.public_key() {
            return Err(ChainError::MissingValidatorKey);
        }
        block.validator_id = validator_id.to_string();
        block.validator_signature = keypair.sign(&block.signing_digest()).to_vec();
        Ok(())
    }

    /// Check roster membership and the PoA signature over the canonical
    /// block payload.
    pub fn verify_block(&self, block: &Block) -> Result<(), ChainError> {
        let pubkey = self
            .pubkey(&block.validator_id)
            .ok_or_else(|| ChainError::UnknownValidator(block.validator_id.clone()))?;
        verify_digest(pubkey, &block.signing_digest(), &block.validator_signature).map_err(|e| {
            debug!(validator = %block.validator_id, error = %e, "block signature rejected");
            ChainError::InvalidValidatorSignature(block.validator_id.clone())
        })
    }
}

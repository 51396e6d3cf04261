use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::{Decoder, Encoder};
use crate::constants::BLOCK_SIGNING_TAG;
use crate::error::ChainError;
use crate::transaction::Transaction;

/// One block of the HiveBolt chain.
///
/// The canonical header covers every field except `hash`, `validator_id`,
/// and `validator_signature`: the hash commits to the contents, and the PoA
/// signature covers the tagged header digest so the authoring validator
/// cannot be swapped after sealing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp_ms: u64,
    pub prev_hash: String,
    pub nonce: u64,
    pub difficulty: u32,
    pub state_root: String,
    pub transactions: Vec<Transaction>,
    pub validator_id: String,
    pub validator_signature: Vec<u8>,
    /// Hex SHA-256 of the canonical header. Derived; never decoded from the
    /// wire.
    pub hash: String,
}

impl Block {
    /// Canonical header bytes: everything except `hash`, `validator_id`,
    /// `validator_signature`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(256);
        enc.put_u64(self.index);
        enc.put_u64(self.timestamp_ms);
        enc.put_str(&self.prev_hash);
        enc.put_u64(self.nonce);
        enc.put_u32(self.difficulty);
        enc.put_str(&self.state_root);
        enc.put_u32(self.transactions.len() as u32);
        for tx in &self.transactions {
            enc.put_raw(&tx.wire_bytes());
        }
        enc.into_bytes()
    }

    /// Hex SHA-256 of the canonical header.
    pub fn compute_hash(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }

    /// Digest the authoring validator signs:
    /// `SHA256("BLOCK\0" ∥ canonical header)`.
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(BLOCK_SIGNING_TAG);
        hasher.update(self.canonical_bytes());
        hasher.finalize().into()
    }

    /// Recompute and store `hash` after the header fields are final.
    pub fn seal(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Wire form: canonical header, then validator id and signature. `hash`
    /// is recomputed on decode rather than trusted from the peer.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(512);
        enc.put_raw(&self.canonical_bytes());
        enc.put_str(&self.validator_id);
        enc.put_bytes(&self.validator_signature);
        enc.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        let mut dec = Decoder::new(bytes);
        let index = dec.u64()?;
        let timestamp_ms = dec.u64()?;
        let prev_hash = dec.str()?;
        let nonce = dec.u64()?;
        let difficulty = dec.u32()?;
        let state_root = dec.str()?;
        let tx_count = dec.u32()?;
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(Transaction::decode_from(&mut dec)?);
        }
        let validator_id = dec.str()?;
        let validator_signature = dec.bytes()?;
        dec.finish()?;

        let mut block = Self {
            index,
            timestamp_ms,
            prev_hash,
            nonce,
            difficulty,
            state_root,
            transactions,
            validator_id,
            validator_signature,
            hash: String::new(),
        };
        block.seal();
        Ok(block)
    }
}

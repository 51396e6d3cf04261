use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use hivebolt_core::block::Block;
use hivebolt_core::error::ChainError;

use crate::state::WorldState;
use crate::utxo::UtxoSet;

const STORAGE_KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

/// A pruned-history checkpoint: the full post-state of one block height.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub height: u64,
    pub state: WorldState,
    pub utxo: UtxoSet,
}

/// Encrypted persistent store backed by sled.
///
/// Key space (flat, in the default tree):
///   block:<hex>       → bincode(Block)
///   height:<n>        → block hash (utf-8 hex)
///   chain:tip         → tip hash (utf-8 hex)
///   utxo:set          → bincode(UtxoSet)
///   state:account     → bincode(WorldState)
///   snapshot:<height> → bincode(Snapshot)
///   meta:<name>       → raw bytes
///
/// Every value is bincode-serialized then sealed with ChaCha20-Poly1305
/// under the configured storage key; a fresh 12-byte nonce prefixes each
/// record. Tampered or truncated records fail authentication and surface as
/// `ChainError::Io`, never as silently-wrong data.
pub struct ChainDb {
    db: sled::Db,
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for ChainDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainDb").finish_non_exhaustive()
    }
}

impl ChainDb {
    /// Open or create the store at `path`. The key must be exactly 32 bytes;
    /// anything else is a fatal configuration error.
    pub fn open<P: AsRef<Path>>(path: P, storage_key: &[u8]) -> Result<Self, ChainError> {
        if storage_key.len() != STORAGE_KEY_BYTES {
            return Err(ChainError::KeySize {
                expected: STORAGE_KEY_BYTES,
                got: storage_key.len(),
            });
        }
        let db = sled::open(path).map_err(|e| ChainError::Io(e.to_string()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(storage_key));
        Ok(Self { db, cipher })
    }

    // ── Sealed record primitives ─────────────────────────────────────────────

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChainError> {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ChainError::Io("record encryption failed".into()))?;
        let mut record = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        record.extend_from_slice(&nonce);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    fn open_record(&self, record: &[u8]) -> Result<Vec<u8>, ChainError> {
        if record.len() < NONCE_BYTES {
            return Err(ChainError::Io("record shorter than its nonce".into()));
        }
        let (nonce, ciphertext) = record.split_at(NONCE_BYTES);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ChainError::Io("record failed authentication".into()))
    }

    fn put_raw(&self, key: &str, value: &[u8]) -> Result<(), ChainError> {
        let record = self.seal(value)?;
        self.db
            .insert(key.as_bytes(), record)
            .map_err(|e| ChainError::Io(e.to_string()))?;
        Ok(())
    }

    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, ChainError> {
        match self
            .db
            .get(key.as_bytes())
            .map_err(|e| ChainError::Io(e.to_string()))?
        {
            Some(record) => Ok(Some(self.open_record(&record)?)),
            None => Ok(None),
        }
    }

    fn delete_raw(&self, key: &str) -> Result<(), ChainError> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| ChainError::Io(e.to_string()))?;
        Ok(())
    }

    fn put_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ChainError> {
        let bytes = bincode::serialize(value).map_err(|e| ChainError::Codec(e.to_string()))?;
        self.put_raw(key, &bytes)
    }

    fn get_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ChainError> {
        match self.get_raw(key)? {
            Some(bytes) => {
                let value =
                    bincode::deserialize(&bytes).map_err(|e| ChainError::Codec(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // ── Blocks ───────────────────────────────────────────────────────────────

    pub fn put_block(&self, block: &Block) -> Result<(), ChainError> {
        self.put_value(&format!("block:{}", block.hash), block)?;
        self.put_raw(&format!("height:{}", block.index), block.hash.as_bytes())
    }

    pub fn get_block(&self, hash: &str) -> Result<Option<Block>, ChainError> {
        self.get_value(&format!("block:{hash}"))
    }

    pub fn block_hash_at(&self, height: u64) -> Result<Option<String>, ChainError> {
        match self.get_raw(&format!("height:{height}"))? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|e| ChainError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn block_at(&self, height: u64) -> Result<Option<Block>, ChainError> {
        match self.block_hash_at(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Remove a block and its height index entry (pruning).
    pub fn delete_block(&self, height: u64, hash: &str) -> Result<(), ChainError> {
        self.delete_raw(&format!("block:{hash}"))?;
        self.delete_raw(&format!("height:{height}"))?;
        debug!(height, "pruned block from durable storage");
        Ok(())
    }

    // ── Tip ──────────────────────────────────────────────────────────────────

    pub fn put_tip_hash(&self, hash: &str) -> Result<(), ChainError> {
        self.put_raw("chain:tip", hash.as_bytes())
    }

    pub fn tip_hash(&self) -> Result<Option<String>, ChainError> {
        match self.get_raw("chain:tip")? {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes).map_err(|e| ChainError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    // ── State / UTXO blobs ───────────────────────────────────────────────────

    pub fn put_state(&self, state: &WorldState) -> Result<(), ChainError> {
        self.put_value("state:account", state)
    }

    pub fn get_state(&self) -> Result<Option<WorldState>, ChainError> {
        self.get_value("state:account")
    }

    pub fn put_utxo_set(&self, utxo: &UtxoSet) -> Result<(), ChainError> {
        self.put_value("utxo:set", utxo)
    }

    pub fn get_utxo_set(&self) -> Result<Option<UtxoSet>, ChainError> {
        self.get_value("utxo:set")
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn put_snapshot(&self, snapshot: &Snapshot) -> Result<(), ChainError> {
        self.put_value(&format!("snapshot:{}", snapshot.height), snapshot)
    }

    pub fn get_snapshot(&self, height: u64) -> Result<Option<Snapshot>, ChainError> {
        self.get_value(&format!("snapshot:{height}"))
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn put_meta(&self, name: &str, value: &[u8]) -> Result<(), ChainError> {
        self.put_raw(&format!("meta:{name}"), value)
    }

    pub fn get_meta(&self, name: &str) -> Result<Option<Vec<u8>>, ChainError> {
        self.get_raw(&format!("meta:{name}"))
    }

    pub fn put_meta_u64(&self, name: &str, value: u64) -> Result<(), ChainError> {
        self.put_meta(name, &value.to_be_bytes())
    }

    pub fn get_meta_u64(&self, name: &str) -> Result<Option<u64>, ChainError> {
        match self.get_meta(name)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| ChainError::Corrupt(format!("meta:{name} width")))?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    pub fn put_meta_u32(&self, name: &str, value: u32) -> Result<(), ChainError> {
        self.put_meta(name, &value.to_be_bytes())
    }

    pub fn get_meta_u32(&self, name: &str) -> Result<Option<u32>, ChainError> {
        match self.get_meta(name)? {
            Some(bytes) => {
                let arr: [u8; 4] = bytes
                    .try_into()
                    .map_err(|_| ChainError::Corrupt(format!("meta:{name} width")))?;
                Ok(Some(u32::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), ChainError> {
        self.db.flush().map_err(|e| ChainError::Io(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivebolt_core::types::Address;

    fn open_temp() -> (tempfile::TempDir, ChainDb) {
        let dir = tempfile::tempdir().unwrap();
        let db = ChainDb::open(dir.path(), &[7u8; 32]).unwrap();
        (dir, db)
    }

    fn sample_block(index: u64) -> Block {
        let mut block = Block {
            index,
            timestamp_ms: 1_700_000_000_000,
            prev_hash: "0".into(),
            nonce: 0,
            difficulty: 1,
            state_root: WorldState::new().state_root(),
            transactions: Vec::new(),
            validator_id: "v1".into(),
            validator_signature: vec![0; 64],
            hash: String::new(),
        };
        block.seal();
        block
    }

    #[test]
    fn wrong_key_size_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChainDb::open(dir.path(), &[0u8; 16]).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn block_round_trip_via_height_index() {
        let (_dir, db) = open_temp();
        let block = sample_block(3);
        db.put_block(&block).unwrap();

        assert_eq!(db.get_block(&block.hash).unwrap().unwrap(), block);
        assert_eq!(db.block_hash_at(3).unwrap().unwrap(), block.hash);
        assert_eq!(db.block_at(3).unwrap().unwrap(), block);
        assert!(db.block_at(4).unwrap().is_none());
    }

    #[test]
    fn missing_keys_are_none_not_errors() {
        let (_dir, db) = open_temp();
        assert!(db.tip_hash().unwrap().is_none());
        assert!(db.get_state().unwrap().is_none());
        assert!(db.get_snapshot(10).unwrap().is_none());
        assert!(db.get_meta("difficulty").unwrap().is_none());
    }

    #[test]
    fn state_and_utxo_blobs_round_trip() {
        let (_dir, db) = open_temp();
        let mut state = WorldState::new();
        state.credit(Address::from_bytes([1; 20]), 99);
        db.put_state(&state).unwrap();
        db.put_utxo_set(&UtxoSet::new()).unwrap();

        assert_eq!(db.get_state().unwrap().unwrap(), state);
        assert_eq!(db.get_utxo_set().unwrap().unwrap(), UtxoSet::new());
    }

    #[test]
    fn records_are_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let db = ChainDb::open(dir.path(), &[7u8; 32]).unwrap();
        db.put_meta("marker", b"plaintext-sentinel").unwrap();

        let raw = db.db.get(b"meta:marker").unwrap().unwrap();
        assert!(!raw
            .windows(b"plaintext-sentinel".len())
            .any(|w| w == b"plaintext-sentinel"));
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = ChainDb::open(dir.path(), &[7u8; 32]).unwrap();
            db.put_meta("marker", b"value").unwrap();
            db.flush().unwrap();
        }
        let other = ChainDb::open(dir.path(), &[8u8; 32]).unwrap();
        assert!(matches!(other.get_meta("marker"), Err(ChainError::Io(_))));
    }

    #[test]
    fn delete_block_removes_both_keys() {
        let (_dir, db) = open_temp();
        let block = sample_block(5);
        db.put_block(&block).unwrap();
        db.delete_block(5, &block.hash).unwrap();
        assert!(db.get_block(&block.hash).unwrap().is_none());
        assert!(db.block_hash_at(5).unwrap().is_none());
    }

    #[test]
    fn meta_u64_round_trip() {
        let (_dir, db) = open_temp();
        db.put_meta_u64("oldest", 42).unwrap();
        assert_eq!(db.get_meta_u64("oldest").unwrap(), Some(42));
        db.put_meta_u32("difficulty", 3).unwrap();
        assert_eq!(db.get_meta_u32("difficulty").unwrap(), Some(3));
    }
}

use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

use hivebolt_core::constants::MEMPOOL_MAX_TX_AGE_MS;
use hivebolt_core::error::ChainError;
use hivebolt_core::transaction::{Transaction, TxKind};
use hivebolt_core::types::{Address, TxId};

struct MempoolEntry {
    tx: Transaction,
    size_bytes: usize,
}

/// Compare fee-per-byte without floats: `a.fee/a.size ? b.fee/b.size`
/// cross-multiplied in u128 so the comparison is exact and overflow-free.
fn cmp_fee_per_byte(fee_a: u64, size_a: usize, fee_b: u64, size_b: usize) -> Ordering {
    (fee_a as u128 * size_b as u128).cmp(&(fee_b as u128 * size_a as u128))
}

/// Volatile priority pool of validated transactions awaiting inclusion.
///
/// Priority is fee per canonical byte. Admission enforces a 24-hour
/// timestamp window, txid uniqueness, replace-by-fee for Account-kind
/// `(from, nonce)` collisions, and strict fee-per-byte eviction once the
/// pool is at capacity. Deliberately not persisted: a restart drops pending
/// transactions and peers re-gossip what still matters.
pub struct Mempool {
    capacity: usize,
    entries: HashMap<TxId, MempoolEntry>,
    /// Account-kind index for replace-by-fee.
    by_sender: HashMap<(Address, u64), TxId>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            by_sender: HashMap::new(),
        }
    }

    /// Admit a transaction. `now_ms` is the local wall clock; admission is
    /// the one place the protocol consults it.
    pub fn add(&mut self, tx: Transaction, now_ms: u64) -> Result<(), ChainError> {
        let drift = now_ms.abs_diff(tx.timestamp_ms);
        if drift > MEMPOOL_MAX_TX_AGE_MS {
            return Err(ChainError::TimestampDrift {
                drift_ms: drift,
                max_ms: MEMPOOL_MAX_TX_AGE_MS,
            });
        }

        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return Err(ChainError::DuplicateTransaction(txid.to_hex()));
        }

        // Replace-by-fee: Account kind only, and only for a strictly higher
        // fee. A replacement frees its predecessor's slot, so it skips the
        // capacity gate.
        if tx.kind == TxKind::Account {
            if let Some(from) = tx.from {
                if let Some(existing_id) = self.by_sender.get(&(from, tx.nonce)).copied() {
                    let existing_fee = self
                        .entries
                        .get(&existing_id)
                        .map(|e| e.tx.fee)
                        .unwrap_or(0);
                    if tx.fee <= existing_fee {
                        return Err(ChainError::FeeNotHigher {
                            offered: tx.fee,
                            current: existing_fee,
                        });
                    }
                    debug!(txid = %txid, replaced = %existing_id, "replace-by-fee");
                    self.remove(&existing_id);
                    self.insert(txid, tx);
                    return Ok(());
                }
            }
        }

        if self.entries.len() >= self.capacity {
            let size = tx.size_bytes();
            let victim = self.lowest_priority();
            match victim {
                Some((victim_id, victim_fee, victim_size))
                    if cmp_fee_per_byte(tx.fee, size, victim_fee, victim_size)
                        == Ordering::Greater =>
                {
                    debug!(evicted = %victim_id, admitted = %txid, "capacity eviction");
                    self.remove(&victim_id);
                }
                _ => {
                    return Err(ChainError::PoolFull {
                        capacity: self.capacity,
                    })
                }
            }
        }

        self.insert(txid, tx);
        Ok(())
    }

    fn insert(&mut self, txid: TxId, tx: Transaction) {
        if tx.kind == TxKind::Account {
            if let Some(from) = tx.from {
                self.by_sender.insert((from, tx.nonce), txid);
            }
        }
        let size_bytes = tx.size_bytes();
        self.entries.insert(txid, MempoolEntry { tx, size_bytes });
    }

    /// The entry with the lowest fee-per-byte (txid breaks ties so the
    /// choice is deterministic).
    fn lowest_priority(&self) -> Option<(TxId, u64, usize)> {
        self.entries
            .iter()
            .min_by(|(id_a, a), (id_b, b)| {
                cmp_fee_per_byte(a.tx.fee, a.size_bytes, b.tx.fee, b.size_bytes)
                    .then_with(|| id_a.cmp(id_b))
            })
            .map(|(id, entry)| (*id, entry.tx.fee, entry.size_bytes))
    }

    /// Up to `n` transactions in descending fee-per-byte order.
    pub fn top(&self, n: usize) -> Vec<Transaction> {
        let mut ranked: Vec<&MempoolEntry> = self.entries.values().collect();
        ranked.sort_by(|a, b| {
            cmp_fee_per_byte(b.tx.fee, b.size_bytes, a.tx.fee, a.size_bytes)
                .then_with(|| a.tx.txid().cmp(&b.tx.txid()))
        });
        ranked.into_iter().take(n).map(|e| e.tx.clone()).collect()
    }

    /// Idempotent removal by txid.
    pub fn remove(&mut self, txid: &TxId) {
        if let Some(entry) = self.entries.remove(txid) {
            if entry.tx.kind == TxKind::Account {
                if let Some(from) = entry.tx.from {
                    self.by_sender.remove(&(from, entry.tx.nonce));
                }
            }
        }
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivebolt_core::constants::TX_VERSION;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn tx(from: u8, nonce: u64, fee: u64, now_ms: u64) -> Transaction {
        Transaction {
            version: TX_VERSION,
            kind: TxKind::Account,
            network_id: 1,
            nonce,
            timestamp_ms: now_ms,
            valid_until_block: 0,
            from: Some(addr(from)),
            to: Some(addr(99)),
            amount: 10,
            fee,
            data: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            pubkey: vec![2; 33],
            signature: vec![3; 64],
        }
    }

    const NOW: u64 = 1_700_000_000_000;

    #[test]
    fn add_then_top_orders_by_fee_per_byte() {
        let mut pool = Mempool::new(10);
        pool.add(tx(1, 1, 1, NOW), NOW).unwrap();
        pool.add(tx(2, 1, 5, NOW), NOW).unwrap();
        pool.add(tx(3, 1, 3, NOW), NOW).unwrap();

        let top = pool.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].fee, 5);
        assert_eq!(top[1].fee, 3);
    }

    #[test]
    fn stale_timestamp_rejected() {
        let mut pool = Mempool::new(10);
        let old = tx(1, 1, 1, NOW - MEMPOOL_MAX_TX_AGE_MS - 1);
        assert!(matches!(
            pool.add(old, NOW),
            Err(ChainError::TimestampDrift { .. })
        ));
        // Future drift counts too.
        let future = tx(1, 1, 1, NOW + MEMPOOL_MAX_TX_AGE_MS + 1);
        assert!(matches!(
            pool.add(future, NOW),
            Err(ChainError::TimestampDrift { .. })
        ));
    }

    #[test]
    fn duplicate_txid_rejected() {
        let mut pool = Mempool::new(10);
        let t = tx(1, 1, 1, NOW);
        pool.add(t.clone(), NOW).unwrap();
        assert!(matches!(
            pool.add(t, NOW),
            Err(ChainError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn replace_by_fee_keeps_only_the_higher_fee() {
        let mut pool = Mempool::new(10);
        pool.add(tx(1, 2, 1, NOW), NOW).unwrap();
        pool.add(tx(1, 2, 2, NOW), NOW).unwrap();

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.top(10)[0].fee, 2);

        // Same fee again: duplicate txid.
        assert!(matches!(
            pool.add(tx(1, 2, 2, NOW), NOW),
            Err(ChainError::DuplicateTransaction(_))
        ));
        // Lower fee: rejected as not strictly higher.
        assert!(matches!(
            pool.add(tx(1, 2, 1, NOW), NOW),
            Err(ChainError::FeeNotHigher { .. })
        ));
    }

    #[test]
    fn rbf_applies_to_account_kind_only() {
        let mut pool = Mempool::new(10);
        let mut a = tx(1, 5, 1, NOW);
        a.kind = TxKind::Utxo;
        let mut b = tx(1, 5, 9, NOW);
        b.kind = TxKind::Utxo;
        pool.add(a, NOW).unwrap();
        pool.add(b, NOW).unwrap();
        // Both live: UTXO kind has no (from, nonce) identity.
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn capacity_eviction_requires_strictly_higher_fee_per_byte() {
        let mut pool = Mempool::new(2);
        pool.add(tx(1, 1, 1, NOW), NOW).unwrap();
        pool.add(tx(2, 1, 2, NOW), NOW).unwrap();

        // Equal fee-per-byte to the worst entry: rejected.
        assert!(matches!(
            pool.add(tx(3, 1, 1, NOW), NOW),
            Err(ChainError::PoolFull { .. })
        ));

        // Strictly higher: evicts the fee-1 entry.
        pool.add(tx(4, 1, 7, NOW), NOW).unwrap();
        assert_eq!(pool.len(), 2);
        let fees: Vec<u64> = pool.top(10).iter().map(|t| t.fee).collect();
        assert_eq!(fees, vec![7, 2]);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut pool = Mempool::new(10);
        let t = tx(1, 1, 1, NOW);
        let id = t.txid();
        pool.add(t, NOW).unwrap();
        pool.remove(&id);
        pool.remove(&id);
        assert!(pool.is_empty());
        // The (from, nonce) slot is free again.
        pool.add(tx(1, 1, 1, NOW), NOW).unwrap();
    }

    #[test]
    fn eviction_clears_sender_index() {
        let mut pool = Mempool::new(1);
        pool.add(tx(1, 1, 1, NOW), NOW).unwrap();
        pool.add(tx(2, 1, 9, NOW), NOW).unwrap();
        assert_eq!(pool.len(), 1);
        // Evicted sender can submit again without hitting a stale RBF slot.
        pool.add(tx(1, 1, 10, NOW), NOW).unwrap();
    }
}

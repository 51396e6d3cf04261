use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use hivebolt_core::error::ChainError;
use hivebolt_core::transaction::TxOutput;
use hivebolt_core::types::OutPoint;

/// The unspent-output set: `(producing txid, output index) → output`.
///
/// Entries are created when a UTXO transaction's outputs apply and destroyed
/// when an input spends them. `BTreeMap` keeps persistence and replica
/// comparison deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoSet {
    entries: BTreeMap<OutPoint, TxOutput>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.entries.get(outpoint)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    /// Register a fresh output. Outpoint keys are unique by construction
    /// (txid collisions would be SHA-256 collisions), so an existing entry
    /// is simply replaced.
    pub fn insert(&mut self, outpoint: OutPoint, output: TxOutput) {
        self.entries.insert(outpoint, output);
    }

    /// Consume an unspent output, returning it.
    pub fn spend(&mut self, outpoint: &OutPoint) -> Result<TxOutput, ChainError> {
        self.entries
            .remove(outpoint)
            .ok_or_else(|| ChainError::MissingUtxo(outpoint.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &TxOutput)> {
        self.entries.iter()
    }
}

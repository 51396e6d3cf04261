use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use hivebolt_core::codec::Encoder;
use hivebolt_core::error::ChainError;
use hivebolt_core::types::{Address, Capability};

// ── AccountState ─────────────────────────────────────────────────────────────

/// Per-address ledger state: balance, replay-protection nonce, contract
/// storage, and the hardware capabilities granted to this address.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u64,
    pub nonce: u64,
    /// Contract key/value storage; keys iterate in ascending order.
    pub storage: BTreeMap<u64, u64>,
    pub capabilities: BTreeSet<Capability>,
}

// ── WorldState ───────────────────────────────────────────────────────────────

/// The full account map. `BTreeMap` keeps addresses in canonical order so the
/// state root falls out of a plain in-order walk.
///
/// Accounts come into existence implicitly on first credit, debit, nonce, or
/// storage operation. Balances can never go negative (debit fails first) and
/// nonces only move forward.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState {
    accounts: BTreeMap<Address, AccountState>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, addr: Address) -> &mut AccountState {
        self.accounts.entry(addr).or_default()
    }

    pub fn get(&self, addr: &Address) -> Option<&AccountState> {
        self.accounts.get(addr)
    }

    pub fn balance(&self, addr: &Address) -> u64 {
        self.accounts.get(addr).map(|a| a.balance).unwrap_or(0)
    }

    pub fn nonce(&self, addr: &Address) -> u64 {
        self.accounts.get(addr).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn credit(&mut self, addr: Address, amount: u64) {
        let account = self.entry(addr);
        account.balance = account.balance.saturating_add(amount);
    }

    pub fn debit(&mut self, addr: Address, amount: u64) -> Result<(), ChainError> {
        let account = self.entry(addr);
        if account.balance < amount {
            return Err(ChainError::InsufficientFunds {
                need: amount,
                have: account.balance,
            });
        }
        account.balance -= amount;
        Ok(())
    }

    pub fn increment_nonce(&mut self, addr: Address) {
        let account = self.entry(addr);
        account.nonce += 1;
    }

    pub fn set_nonce(&mut self, addr: Address, nonce: u64) {
        self.entry(addr).nonce = nonce;
    }

    pub fn storage_get(&self, addr: &Address, key: u64) -> u64 {
        self.accounts
            .get(addr)
            .and_then(|a| a.storage.get(&key))
            .copied()
            .unwrap_or(0)
    }

    pub fn storage_put(&mut self, addr: Address, key: u64, value: u64) {
        self.entry(addr).storage.insert(key, value);
    }

    pub fn grant_capability(&mut self, addr: Address, cap: Capability) {
        self.entry(addr).capabilities.insert(cap);
    }

    pub fn has_capability(&self, addr: &Address, cap: &Capability) -> bool {
        self.accounts
            .get(addr)
            .map(|a| a.capabilities.contains(cap))
            .unwrap_or(false)
    }

    pub fn capabilities(&self, addr: &Address) -> Option<&BTreeSet<Capability>> {
        self.accounts.get(addr).map(|a| &a.capabilities)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Canonical encoding of the whole account map: addresses in ascending
    /// order, fixed field order per account, storage and capabilities sorted.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(64 * self.accounts.len() + 8);
        enc.put_u32(self.accounts.len() as u32);
        for (addr, account) in &self.accounts {
            enc.put_str(&addr.to_string());
            enc.put_u64(account.balance);
            enc.put_u64(account.nonce);
            enc.put_u32(account.storage.len() as u32);
            for (key, value) in &account.storage {
                enc.put_u64(*key);
                enc.put_u64(*value);
            }
            enc.put_u32(account.capabilities.len() as u32);
            for cap in &account.capabilities {
                enc.put_u8(cap.tag());
                enc.put_u64(cap.device_id());
            }
        }
        enc.into_bytes()
    }

    /// Hex SHA-256 over the canonical account-map encoding. Fixed at block
    /// creation and re-derived by every replica after apply.
    pub fn state_root(&self) -> String {
        hex::encode(Sha256::digest(self.canonical_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn credit_creates_account_implicitly() {
        let mut state = WorldState::new();
        assert_eq!(state.balance(&addr(1)), 0);
        state.credit(addr(1), 100);
        assert_eq!(state.balance(&addr(1)), 100);
        assert_eq!(state.account_count(), 1);
    }

    #[test]
    fn debit_fails_without_funds_and_leaves_state_untouched() {
        let mut state = WorldState::new();
        state.credit(addr(1), 10);
        let err = state.debit(addr(1), 11).unwrap_err();
        assert!(matches!(
            err,
            ChainError::InsufficientFunds { need: 11, have: 10 }
        ));
        assert_eq!(state.balance(&addr(1)), 10);
    }

    #[test]
    fn nonces_are_monotonic() {
        let mut state = WorldState::new();
        state.increment_nonce(addr(2));
        state.increment_nonce(addr(2));
        assert_eq!(state.nonce(&addr(2)), 2);
    }

    #[test]
    fn storage_defaults_to_zero() {
        let mut state = WorldState::new();
        assert_eq!(state.storage_get(&addr(3), 42), 0);
        state.storage_put(addr(3), 42, 7);
        assert_eq!(state.storage_get(&addr(3), 42), 7);
    }

    #[test]
    fn state_root_is_order_independent() {
        let mut a = WorldState::new();
        a.credit(addr(1), 5);
        a.credit(addr(2), 9);

        let mut b = WorldState::new();
        b.credit(addr(2), 9);
        b.credit(addr(1), 5);

        assert_eq!(a.state_root(), b.state_root());
    }

    #[test]
    fn state_root_tracks_every_component() {
        let mut state = WorldState::new();
        state.credit(addr(1), 5);
        let balances_only = state.state_root();

        state.storage_put(addr(1), 0, 1);
        let with_storage = state.state_root();
        assert_ne!(balances_only, with_storage);

        state.grant_capability(addr(1), Capability::WriteActuator(9));
        assert_ne!(with_storage, state.state_root());
    }

    #[test]
    fn empty_state_root_is_stable() {
        assert_eq!(WorldState::new().state_root(), WorldState::new().state_root());
    }
}

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{debug, info, warn};

use hivebolt_consensus::{retarget, ValidatorSet};
use hivebolt_core::block::Block;
use hivebolt_core::config::ChainConfig;
use hivebolt_core::constants::{CONFIRMATION_DEPTH, GENESIS_PREV_HASH, GENESIS_TIMESTAMP_MS};
use hivebolt_core::error::ChainError;
use hivebolt_core::transaction::{Transaction, TxKind};
use hivebolt_core::types::{Address, Capability, OutPoint};
use hivebolt_crypto::{derive_address, meets_difficulty, KeyPair};
use hivebolt_state::{ChainDb, Snapshot, UtxoSet, WorldState};
use hivebolt_vm::{ExecutionContext, HardwareBridge, SyscallLimiter, Vm};

use crate::mempool::Mempool;

const META_DIFFICULTY: &str = "difficulty";
const META_LAST_SNAPSHOT: &str = "last_snapshot_height";
const META_OLDEST: &str = "oldest_height";

/// Wire-size allowance for the block header fields around the transactions.
const BLOCK_HEADER_ALLOWANCE: usize = 512;

/// The consensus-backed execution core: owns the tip, the account and UTXO
/// state, the hardware deferral queue, and every mutation of them.
///
/// All of `apply_block`, `create_block`, and persistence run on the single
/// logical chain writer; the shared mempool behind its mutex is the only
/// concurrently touched structure.
pub struct ChainManager {
    config: ChainConfig,
    db: Arc<ChainDb>,
    validators: ValidatorSet,
    mempool: Arc<Mutex<Mempool>>,
    /// In-memory block window starting at `base_height`. Holds everything
    /// applied or replayed this session; never empty after init.
    chain: Vec<Block>,
    base_height: u64,
    state: WorldState,
    utxos: UtxoSet,
    hardware: HardwareBridge,
    limiter: SyscallLimiter,
    difficulty: u32,
}

impl ChainManager {
    /// Initialize from storage: snapshot restore, tip-hash recovery, or a
    /// fresh genesis, in that priority order.
    pub fn open(
        config: ChainConfig,
        db: Arc<ChainDb>,
        validators: ValidatorSet,
        hardware: HardwareBridge,
        mempool: Arc<Mutex<Mempool>>,
    ) -> Result<Self, ChainError> {
        let difficulty = config.initial_difficulty;
        let mut manager = Self {
            config,
            db,
            validators,
            mempool,
            chain: Vec::new(),
            base_height: 0,
            state: WorldState::new(),
            utxos: UtxoSet::new(),
            hardware,
            limiter: SyscallLimiter::new(),
            difficulty,
        };

        if manager.try_restore_from_snapshot()? {
            info!(height = manager.height(), "restored from snapshot");
        } else if manager.try_restore_from_tip()? {
            info!(height = manager.height(), "recovered from persisted tip");
        } else {
            manager.create_genesis()?;
        }
        Ok(manager)
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn height(&self) -> u64 {
        self.base_height + self.chain.len() as u64 - 1
    }

    pub fn tip(&self) -> &Block {
        self.chain.last().expect("chain window is never empty")
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn state_root(&self) -> String {
        self.state.state_root()
    }

    pub fn balance(&self, addr: &Address) -> u64 {
        self.state.balance(addr)
    }

    pub fn account_nonce(&self, addr: &Address) -> u64 {
        self.state.nonce(addr)
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos.len()
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Option<hivebolt_core::transaction::TxOutput> {
        self.utxos.get(outpoint).copied()
    }

    pub fn hardware(&self) -> &HardwareBridge {
        &self.hardware
    }

    /// Hardware-facing mutations (sensor readings, emergency writes) happen
    /// through here, outside consensus.
    pub fn hardware_mut(&mut self) -> &mut HardwareBridge {
        &mut self.hardware
    }

    /// Fetch a block by height from the in-memory window or storage.
    pub fn block_at(&self, height: u64) -> Result<Option<Block>, ChainError> {
        if height >= self.base_height {
            let offset = (height - self.base_height) as usize;
            if offset < self.chain.len() {
                return Ok(Some(self.chain[offset].clone()));
            }
        }
        self.db.block_at(height)
    }

    fn stored_block_hash_at(&self, height: u64) -> Result<Option<String>, ChainError> {
        if height >= self.base_height {
            let offset = (height - self.base_height) as usize;
            if offset < self.chain.len() {
                return Ok(Some(self.chain[offset].hash.clone()));
            }
        }
        self.db.block_hash_at(height)
    }

    fn lock_mempool(&self) -> MutexGuard<'_, Mempool> {
        self.mempool.lock().expect("mempool mutex poisoned")
    }

    /// Device-provisioning hook: grant a contract account access to one
    /// piece of hardware. Must be performed identically on every replica,
    /// like the device registry itself.
    pub fn grant_capability(&mut self, addr: Address, cap: Capability) -> Result<(), ChainError> {
        self.state.grant_capability(addr, cap);
        self.db.put_state(&self.state)
    }

    // ── Initialization paths ─────────────────────────────────────────────────

    /// Init priority 1: restore the snapshot state, then replay the retained
    /// blocks up to the persisted tip. Returns false (leaving `self`
    /// untouched) when anything needed is missing, so init can fall through.
    fn try_restore_from_snapshot(&mut self) -> Result<bool, ChainError> {
        let Some(snap_height) = self.db.get_meta_u64(META_LAST_SNAPSHOT)? else {
            return Ok(false);
        };
        let Some(snapshot) = self.db.get_snapshot(snap_height)? else {
            return Ok(false);
        };
        let Some(tip_hash) = self.db.tip_hash()? else {
            return Ok(false);
        };
        let Some(tip) = self.db.get_block(&tip_hash)? else {
            return Ok(false);
        };
        if tip.index < snap_height {
            return Ok(false);
        }

        let mut state = snapshot.state;
        let mut utxos = snapshot.utxo;
        let mut hardware = self.hardware.clone();
        let mut limiter = SyscallLimiter::new();
        let mut window: Vec<Block> = Vec::new();

        if tip.index == snap_height {
            let Some(block) = self.db.block_at(snap_height)? else {
                // The snapshot-height tip block was pruned; fall through.
                return Ok(false);
            };
            window.push(block);
        } else {
            let window_base = snap_height + 1;
            for height in window_base..=tip.index {
                let Some(block) = self.db.block_at(height)? else {
                    warn!(height, "retained block missing; falling back to tip recovery");
                    return Ok(false);
                };
                for tx in &block.transactions {
                    Self::apply_transaction(
                        &self.config,
                        tx,
                        block.index,
                        block.timestamp_ms,
                        &block.hash,
                        &mut state,
                        &mut utxos,
                        &mut hardware,
                        &mut limiter,
                    )
                    .map_err(|e| {
                        ChainError::Corrupt(format!("replay of block {height} failed: {e}"))
                    })?;
                }
                if height >= CONFIRMATION_DEPTH {
                    let target = height - CONFIRMATION_DEPTH;
                    let target_hash = if target >= window_base {
                        window
                            .get((target - window_base) as usize)
                            .map(|b: &Block| b.hash.clone())
                    } else {
                        self.db.block_hash_at(target)?
                    };
                    if let Some(hash) = target_hash {
                        hardware.commit(&hash);
                    }
                }
                window.push(block);
            }
        }

        self.base_height = window[0].index;
        self.chain = window;
        self.state = state;
        self.utxos = utxos;
        self.hardware = hardware;
        self.limiter = limiter;
        self.difficulty = self
            .db
            .get_meta_u32(META_DIFFICULTY)?
            .unwrap_or(self.config.initial_difficulty);
        Ok(true)
    }

    /// Init priority 2: load the tip block plus the state and UTXO blobs
    /// persisted alongside it. Replays nothing.
    fn try_restore_from_tip(&mut self) -> Result<bool, ChainError> {
        let Some(tip_hash) = self.db.tip_hash()? else {
            return Ok(false);
        };
        let Some(tip) = self.db.get_block(&tip_hash)? else {
            return Ok(false);
        };
        let Some(state) = self.db.get_state()? else {
            return Ok(false);
        };
        let Some(utxos) = self.db.get_utxo_set()? else {
            return Ok(false);
        };

        self.base_height = tip.index;
        self.chain = vec![tip];
        self.state = state;
        self.utxos = utxos;
        self.limiter = SyscallLimiter::new();
        self.difficulty = self
            .db
            .get_meta_u32(META_DIFFICULTY)?
            .unwrap_or(self.config.initial_difficulty);
        Ok(true)
    }

    /// Init priority 3: fresh chain. The genesis block is fully fixed by
    /// configuration so every node derives the identical hash.
    fn create_genesis(&mut self) -> Result<(), ChainError> {
        let state = WorldState::new();
        let utxos = UtxoSet::new();
        let mut genesis = Block {
            index: 0,
            timestamp_ms: GENESIS_TIMESTAMP_MS,
            prev_hash: GENESIS_PREV_HASH.to_string(),
            nonce: 0,
            difficulty: self.config.initial_difficulty,
            state_root: state.state_root(),
            transactions: Vec::new(),
            validator_id: String::new(),
            validator_signature: Vec::new(),
            hash: String::new(),
        };
        genesis.seal();

        self.db.put_block(&genesis)?;
        self.db.put_tip_hash(&genesis.hash)?;
        self.db.put_state(&state)?;
        self.db.put_utxo_set(&utxos)?;
        self.db
            .put_meta_u32(META_DIFFICULTY, self.config.initial_difficulty)?;
        self.db.put_meta_u64(META_OLDEST, 0)?;
        self.db.flush()?;

        info!(hash = %genesis.hash, "genesis block created");
        self.base_height = 0;
        self.chain = vec![genesis];
        self.state = state;
        self.utxos = utxos;
        self.difficulty = self.config.initial_difficulty;
        Ok(())
    }

    // ── Transaction validation ───────────────────────────────────────────────

    /// Validate against the current tip state, as for mempool admission.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        self.validate_transaction_at(tx, &self.state, &self.utxos, self.height() + 1, false)
    }

    /// Full validation against an explicit state view. `candidate_height` is
    /// the height the transaction would be included at; `allow_coinbase`
    /// is true only inside block application/assembly.
    fn validate_transaction_at(
        &self,
        tx: &Transaction,
        state: &WorldState,
        utxos: &UtxoSet,
        candidate_height: u64,
        allow_coinbase: bool,
    ) -> Result<(), ChainError> {
        if tx.network_id != self.config.network_id {
            return Err(ChainError::WrongNetwork {
                expected: self.config.network_id,
                got: tx.network_id,
            });
        }
        if tx.valid_until_block != 0 && candidate_height > tx.valid_until_block {
            return Err(ChainError::Expired {
                valid_until: tx.valid_until_block,
                height: candidate_height,
            });
        }
        let total = tx
            .amount
            .checked_add(tx.fee)
            .ok_or(ChainError::AmountOverflow)?;

        match tx.from {
            None => {
                // Reward transaction: unsigned, only valid during block
                // assembly, and always account-kind.
                if !allow_coinbase {
                    return Err(ChainError::BadCoinbase(
                        "reward transaction outside block assembly".into(),
                    ));
                }
                if tx.kind != TxKind::Account {
                    return Err(ChainError::BadCoinbase(
                        "reward transaction must be account kind".into(),
                    ));
                }
            }
            Some(from) => {
                let derived = derive_address(&tx.pubkey)
                    .map_err(|_| ChainError::InvalidSignature)?;
                if derived != from {
                    return Err(ChainError::AddressMismatch);
                }
                hivebolt_crypto::verify_digest(&tx.pubkey, &tx.signing_digest(), &tx.signature)
                    .map_err(|_| ChainError::InvalidSignature)?;
            }
        }

        match tx.kind {
            TxKind::Account => {
                if tx.to.is_none() {
                    return Err(ChainError::MissingRecipient);
                }
                if let Some(from) = tx.from {
                    let expected = state.nonce(&from) + 1;
                    if tx.nonce != expected {
                        return Err(ChainError::BadNonce {
                            expected,
                            got: tx.nonce,
                        });
                    }
                    let have = state.balance(&from);
                    if have < total {
                        return Err(ChainError::InsufficientFunds { need: total, have });
                    }
                }
            }

            TxKind::Utxo => {
                let from = tx.from.ok_or(ChainError::InvalidSignature)?;
                let mut seen = HashSet::new();
                let mut input_sum: u64 = 0;
                for input in &tx.inputs {
                    let outpoint = OutPoint::new(input.prev_txid, input.index);
                    if !seen.insert(outpoint) {
                        return Err(ChainError::MissingUtxo(outpoint.to_string()));
                    }
                    let output = utxos
                        .get(&outpoint)
                        .ok_or_else(|| ChainError::MissingUtxo(outpoint.to_string()))?;
                    if output.address != from {
                        return Err(ChainError::ForeignUtxo(outpoint.to_string()));
                    }
                    input_sum = input_sum
                        .checked_add(output.amount)
                        .ok_or(ChainError::AmountOverflow)?;
                }
                let output_sum = tx
                    .outputs
                    .iter()
                    .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
                    .ok_or(ChainError::AmountOverflow)?;
                let required = output_sum
                    .checked_add(tx.fee)
                    .ok_or(ChainError::AmountOverflow)?;

                if tx.inputs.is_empty() {
                    // Account→UTXO conversion: funded from the sender's
                    // balance, replay-protected by the account nonce.
                    let expected = state.nonce(&from) + 1;
                    if tx.nonce != expected {
                        return Err(ChainError::BadNonce {
                            expected,
                            got: tx.nonce,
                        });
                    }
                    let have = state.balance(&from);
                    if have < required {
                        return Err(ChainError::InsufficientFunds {
                            need: required,
                            have,
                        });
                    }
                } else if input_sum < required {
                    return Err(ChainError::UtxoUnderfunded {
                        inputs: input_sum,
                        outputs: output_sum,
                        fee: tx.fee,
                    });
                }
            }

            TxKind::Contract => {
                if !self.config.enable_smart_contracts {
                    return Err(ChainError::ContractsDisabled);
                }
                if tx.to.is_none() {
                    return Err(ChainError::MissingRecipient);
                }
                let from = tx.from.ok_or(ChainError::InvalidSignature)?;
                let expected = state.nonce(&from) + 1;
                if tx.nonce != expected {
                    return Err(ChainError::BadNonce {
                        expected,
                        got: tx.nonce,
                    });
                }
                let have = state.balance(&from);
                if have < total {
                    return Err(ChainError::InsufficientFunds { need: total, have });
                }
            }
        }
        Ok(())
    }

    // ── Transaction application ──────────────────────────────────────────────

    /// Apply one validated transaction to the given state view. Shared by
    /// block application, block-assembly projection, and init replay.
    #[allow(clippy::too_many_arguments)]
    fn apply_transaction(
        config: &ChainConfig,
        tx: &Transaction,
        block_index: u64,
        block_timestamp_ms: u64,
        block_hash: &str,
        state: &mut WorldState,
        utxos: &mut UtxoSet,
        hardware: &mut HardwareBridge,
        limiter: &mut SyscallLimiter,
    ) -> Result<(), ChainError> {
        let total = tx
            .amount
            .checked_add(tx.fee)
            .ok_or(ChainError::AmountOverflow)?;

        match tx.kind {
            TxKind::Account => {
                if let Some(from) = tx.from {
                    state.debit(from, total)?;
                    state.increment_nonce(from);
                }
                if let Some(to) = tx.to {
                    state.credit(to, tx.amount);
                }
            }

            TxKind::Utxo => {
                let txid = tx.txid();
                if tx.inputs.is_empty() {
                    let from = tx.from.ok_or(ChainError::InvalidSignature)?;
                    let required = tx
                        .outputs
                        .iter()
                        .try_fold(tx.fee, |acc, o| acc.checked_add(o.amount))
                        .ok_or(ChainError::AmountOverflow)?;
                    state.debit(from, required)?;
                    state.increment_nonce(from);
                } else {
                    for input in &tx.inputs {
                        utxos.spend(&OutPoint::new(input.prev_txid, input.index))?;
                    }
                }
                for (index, output) in tx.outputs.iter().enumerate() {
                    utxos.insert(OutPoint::new(txid, index as u32), *output);
                }
            }

            TxKind::Contract => {
                let from = tx.from.ok_or(ChainError::InvalidSignature)?;
                let to = tx.to.ok_or(ChainError::MissingRecipient)?;
                state.debit(from, total)?;
                state.increment_nonce(from);
                state.credit(to, tx.amount);

                let ctx = ExecutionContext {
                    caller: from,
                    contract: to,
                    value: tx.amount,
                    block_index,
                    block_timestamp_ms,
                    block_hash: block_hash.to_string(),
                };
                let gas_limit = tx.fee.saturating_mul(config.gas_per_fee_unit);
                let outcome =
                    Vm::new(&tx.data, gas_limit, &ctx, state, hardware, limiter).run()?;
                debug!(
                    contract = %to,
                    gas_used = outcome.gas_used,
                    "contract executed"
                );
            }
        }
        Ok(())
    }

    // ── Block application ────────────────────────────────────────────────────

    /// Validate and apply a block on top of the current tip, atomically:
    /// either every per-transaction effect plus the append commit, or the
    /// in-memory view is left exactly as it was.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip();
        if block.prev_hash != tip.hash {
            return Err(ChainError::DoesNotChain {
                expected: tip.hash.clone(),
                got: block.prev_hash.clone(),
            });
        }
        if block.index != tip.index + 1 {
            return Err(ChainError::BadHeight {
                expected: tip.index + 1,
                got: block.index,
            });
        }
        if block.compute_hash() != block.hash {
            return Err(ChainError::HashMismatch);
        }
        if block.difficulty != self.difficulty {
            return Err(ChainError::WrongDifficulty {
                expected: self.difficulty,
                got: block.difficulty,
            });
        }
        if !meets_difficulty(&block.hash, block.difficulty) {
            return Err(ChainError::InvalidPow {
                difficulty: block.difficulty,
            });
        }
        if block.timestamp_ms < tip.timestamp_ms {
            return Err(ChainError::TimestampRegression);
        }
        let now_ms = Utc::now().timestamp_millis() as u64;
        if block.timestamp_ms > now_ms.saturating_add(self.config.max_timestamp_drift_ms) {
            return Err(ChainError::TimestampDrift {
                drift_ms: block.timestamp_ms - now_ms,
                max_ms: self.config.max_timestamp_drift_ms,
            });
        }
        let size = block.wire_bytes().len();
        if size > self.config.max_block_size {
            return Err(ChainError::OversizedBlock {
                size,
                max: self.config.max_block_size,
            });
        }

        self.validators.verify_block(block)?;

        // Exactly one reward transaction, in the last slot, with the fixed
        // amount and no fee.
        let rewards = block.transactions.iter().filter(|t| t.is_coinbase()).count();
        if rewards != 1 {
            return Err(ChainError::BadCoinbase(format!(
                "{rewards} reward transactions"
            )));
        }
        let last = block
            .transactions
            .last()
            .ok_or_else(|| ChainError::BadCoinbase("block has no transactions".into()))?;
        if !last.is_coinbase() {
            return Err(ChainError::BadCoinbase(
                "reward transaction must be last".into(),
            ));
        }
        if last.amount != self.config.miner_reward {
            return Err(ChainError::BadCoinbase(format!(
                "reward amount {} (expected {})",
                last.amount, self.config.miner_reward
            )));
        }
        if last.fee != 0 {
            return Err(ChainError::BadCoinbase("reward carries a fee".into()));
        }

        // Stage every mutation against clones; nothing in `self` changes
        // until the whole block has applied. Mempool validation is never
        // trusted here: everything is revalidated against the progressively
        // applied state.
        let mut state = self.state.clone();
        let mut utxos = self.utxos.clone();
        let mut hardware = self.hardware.clone();
        let mut limiter = self.limiter.clone();

        for tx in &block.transactions {
            self.validate_transaction_at(tx, &state, &utxos, block.index, true)?;
            Self::apply_transaction(
                &self.config,
                tx,
                block.index,
                block.timestamp_ms,
                &block.hash,
                &mut state,
                &mut utxos,
                &mut hardware,
                &mut limiter,
            )?;
        }

        let computed = state.state_root();
        if computed != block.state_root {
            return Err(ChainError::StateRootMismatch {
                declared: block.state_root.clone(),
                computed,
            });
        }

        // Finality: the block six confirmations down commits its deferred
        // hardware actions, exactly when the chain length reaches depth + 1.
        let new_len = block.index + 1;
        if new_len > CONFIRMATION_DEPTH {
            let target = block.index - CONFIRMATION_DEPTH;
            if let Some(hash) = self.stored_block_hash_at(target)? {
                let committed = hardware.commit(&hash);
                if committed > 0 {
                    info!(height = target, committed, "deferred actions committed");
                }
            }
        }

        // Commit.
        self.state = state;
        self.utxos = utxos;
        self.hardware = hardware;
        self.limiter = limiter;
        self.chain.push(block.clone());

        self.db.put_block(block)?;
        self.db.put_tip_hash(&block.hash)?;
        self.db.put_state(&self.state)?;
        self.db.put_utxo_set(&self.utxos)?;

        {
            let mut pool = self.lock_mempool();
            for tx in &block.transactions {
                pool.remove(&tx.txid());
            }
        }

        if self.config.snapshot_interval > 0
            && block.index > 0
            && block.index % self.config.snapshot_interval == 0
        {
            self.db.put_snapshot(&Snapshot {
                height: block.index,
                state: self.state.clone(),
                utxo: self.utxos.clone(),
            })?;
            self.db.put_meta_u64(META_LAST_SNAPSHOT, block.index)?;
            info!(height = block.index, "snapshot persisted");
        }

        self.prune()?;
        self.maybe_retarget(block)?;
        self.db.flush()?;

        info!(
            height = block.index,
            txs = block.transactions.len(),
            hash = %block.hash,
            "block applied"
        );
        Ok(())
    }

    // ── Block creation ───────────────────────────────────────────────────────

    /// Assemble, mine, and sign the next block from the mempool. The result
    /// is not applied here: it goes through [`ChainManager::apply_block`]
    /// like any block arriving from a peer.
    pub fn create_block(
        &self,
        miner: Address,
        validator_id: &str,
        keypair: &KeyPair,
    ) -> Result<Block, ChainError> {
        let tip = self.tip();
        let next_height = tip.index + 1;
        let now_ms = Utc::now().timestamp_millis() as u64;
        let timestamp_ms = now_ms.max(tip.timestamp_ms);

        let candidates = self
            .lock_mempool()
            .top(self.config.max_transactions_per_block as usize);

        // Project the post-state as if every selected transaction were
        // applied, so the declared root matches what replicas compute.
        // Hardware and limiter are scratch copies: the real deferred queue
        // fills in apply_block, keyed by the final block hash.
        let mut state = self.state.clone();
        let mut utxos = self.utxos.clone();
        let mut hardware = self.hardware.clone();
        let mut limiter = self.limiter.clone();

        let coinbase = Transaction::coinbase(
            self.config.network_id,
            miner,
            self.config.miner_reward,
            timestamp_ms,
        );
        let mut budget = self
            .config
            .max_block_size
            .saturating_sub(BLOCK_HEADER_ALLOWANCE)
            .saturating_sub(coinbase.size_bytes());

        let mut selected: Vec<Transaction> = Vec::new();
        for tx in candidates {
            let tx_size = tx.size_bytes();
            if tx_size > budget {
                continue;
            }
            if let Err(e) =
                self.validate_transaction_at(&tx, &state, &utxos, next_height, false)
            {
                debug!(txid = %tx.txid(), error = %e, "dropping invalid mempool transaction");
                continue;
            }
            // Contract execution can abort halfway through its storage
            // writes; checkpoint so a failing transaction is dropped clean.
            // (Account and UTXO application cannot fail after validation,
            // and contracts never touch the UTXO set.)
            let checkpoint = (state.clone(), hardware.clone(), limiter.clone());
            match Self::apply_transaction(
                &self.config,
                &tx,
                next_height,
                timestamp_ms,
                "",
                &mut state,
                &mut utxos,
                &mut hardware,
                &mut limiter,
            ) {
                Ok(()) => {
                    budget -= tx_size;
                    selected.push(tx);
                }
                Err(e) => {
                    debug!(txid = %tx.txid(), error = %e, "dropping failing transaction");
                    state = checkpoint.0;
                    hardware = checkpoint.1;
                    limiter = checkpoint.2;
                }
            }
        }

        Self::apply_transaction(
            &self.config,
            &coinbase,
            next_height,
            timestamp_ms,
            "",
            &mut state,
            &mut utxos,
            &mut hardware,
            &mut limiter,
        )?;
        selected.push(coinbase);
        let state_root = state.state_root();

        let mut block = Block {
            index: next_height,
            timestamp_ms,
            prev_hash: tip.hash.clone(),
            nonce: 0,
            difficulty: self.difficulty,
            state_root,
            transactions: selected,
            validator_id: String::new(),
            validator_signature: Vec::new(),
            hash: String::new(),
        };

        let mut mined = false;
        for nonce in 0..=self.config.max_nonce_attempts {
            block.nonce = nonce;
            let hash = block.compute_hash();
            if meets_difficulty(&hash, block.difficulty) {
                block.hash = hash;
                mined = true;
                break;
            }
        }
        if !mined {
            return Err(ChainError::MiningExhausted {
                attempts: self.config.max_nonce_attempts,
            });
        }

        self.validators.sign_block(&mut block, validator_id, keypair)?;
        info!(
            height = block.index,
            txs = block.transactions.len(),
            nonce = block.nonce,
            "block created"
        );
        Ok(block)
    }

    // ── Pruning and retargeting ──────────────────────────────────────────────

    /// Drop durable blocks that fell out of the retention window, but never
    /// at or above the last snapshot height: everything from the snapshot to
    /// the tip must stay replayable.
    fn prune(&mut self) -> Result<(), ChainError> {
        let Some(max_retained) = self.config.max_retained_blocks else {
            return Ok(());
        };
        let chain_len = self.height() + 1;
        if chain_len <= max_retained {
            return Ok(());
        }
        let keep_from = chain_len - max_retained;
        let snapshot_floor = self.db.get_meta_u64(META_LAST_SNAPSHOT)?.unwrap_or(0);
        let limit = keep_from.min(snapshot_floor);

        let mut oldest = self.db.get_meta_u64(META_OLDEST)?.unwrap_or(0);
        let start = oldest;
        while oldest < limit {
            if let Some(hash) = self.db.block_hash_at(oldest)? {
                self.db.delete_block(oldest, &hash)?;
            }
            oldest += 1;
        }
        if oldest != start {
            self.db.put_meta_u64(META_OLDEST, oldest)?;
            debug!(through = oldest - 1, "pruned durable blocks");
        }
        Ok(())
    }

    fn maybe_retarget(&mut self, block: &Block) -> Result<(), ChainError> {
        let interval = self.config.difficulty_adjustment_interval as u64;
        if interval == 0 || block.index == 0 || block.index % interval != 0 {
            return Ok(());
        }
        let Some(earlier) = self.block_at(block.index - interval)? else {
            debug!(height = block.index, "retarget skipped: window start pruned");
            return Ok(());
        };
        let actual = block.timestamp_ms.saturating_sub(earlier.timestamp_ms);
        let expected = interval.saturating_mul(self.config.target_block_time_ms);
        let adjusted = retarget(self.difficulty, actual, expected);
        if adjusted != self.difficulty {
            info!(
                old = self.difficulty,
                new = adjusted,
                "difficulty retargeted"
            );
            self.difficulty = adjusted;
        }
        self.db.put_meta_u32(META_DIFFICULTY, self.difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivebolt_consensus::ValidatorInfo;
    use hivebolt_core::constants::TX_VERSION;
    use hivebolt_core::error::VmError;
    use hivebolt_core::transaction::{TxInput, TxOutput};
    use hivebolt_vm::OpCode;

    const VALIDATOR: &str = "validator-1";

    fn test_config() -> ChainConfig {
        ChainConfig {
            network_id: 1,
            initial_difficulty: 1,
            difficulty_adjustment_interval: 1000,
            target_block_time_ms: 10_000,
            max_transactions_per_block: 100,
            max_block_size: 1024 * 1024,
            miner_reward: 100,
            mempool_limit: 100,
            enable_smart_contracts: true,
            max_nonce_attempts: 10_000_000,
            max_timestamp_drift_ms: 24 * 3600 * 1000,
            gas_per_fee_unit: 1000,
            max_retained_blocks: None,
            snapshot_interval: 1000,
        }
    }

    fn base_hardware() -> HardwareBridge {
        let mut hw = HardwareBridge::new();
        hw.register_actuator(100);
        hw.register_sensor(200, 55);
        hw
    }

    struct Node {
        _dir: tempfile::TempDir,
        mempool: Arc<Mutex<Mempool>>,
        manager: ChainManager,
    }

    fn node_with(config: ChainConfig, validator_kp: &KeyPair) -> Node {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(ChainDb::open(dir.path(), &[9u8; 32]).unwrap());
        let validators = ValidatorSet::from_roster(&[ValidatorInfo {
            id: VALIDATOR.into(),
            pubkey: hex::encode(validator_kp.public_key()),
        }])
        .unwrap();
        let mempool = Arc::new(Mutex::new(Mempool::new(config.mempool_limit as usize)));
        let manager = ChainManager::open(
            config,
            db,
            validators,
            base_hardware(),
            Arc::clone(&mempool),
        )
        .unwrap();
        Node {
            _dir: dir,
            mempool,
            manager,
        }
    }

    fn node(validator_kp: &KeyPair) -> Node {
        node_with(test_config(), validator_kp)
    }

    fn now_ms() -> u64 {
        Utc::now().timestamp_millis() as u64
    }

    fn sign(mut tx: Transaction, kp: &KeyPair) -> Transaction {
        tx.pubkey = kp.public_key().to_vec();
        tx.signature = kp.sign(&tx.signing_digest()).to_vec();
        tx
    }

    fn transfer(from: &KeyPair, to: Address, amount: u64, fee: u64, nonce: u64) -> Transaction {
        sign(
            Transaction {
                version: TX_VERSION,
                kind: TxKind::Account,
                network_id: 1,
                nonce,
                timestamp_ms: now_ms(),
                valid_until_block: 0,
                from: Some(from.address()),
                to: Some(to),
                amount,
                fee,
                data: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                pubkey: Vec::new(),
                signature: Vec::new(),
            },
            from,
        )
    }

    fn contract_call(
        from: &KeyPair,
        contract: Address,
        amount: u64,
        fee: u64,
        nonce: u64,
        data: Vec<u8>,
    ) -> Transaction {
        sign(
            Transaction {
                version: TX_VERSION,
                kind: TxKind::Contract,
                network_id: 1,
                nonce,
                timestamp_ms: now_ms(),
                valid_until_block: 0,
                from: Some(from.address()),
                to: Some(contract),
                amount,
                fee,
                data,
                inputs: Vec::new(),
                outputs: Vec::new(),
                pubkey: Vec::new(),
                signature: Vec::new(),
            },
            from,
        )
    }

    fn push(value: i64) -> Vec<u8> {
        let mut bytes = vec![OpCode::Push.byte()];
        bytes.extend_from_slice(&value.to_be_bytes());
        bytes
    }

    /// PUSH 1; PUSH 100; PUSH 2; SYSCALL — write value 1 to actuator 100.
    fn actuator_bytecode() -> Vec<u8> {
        let mut code = Vec::new();
        code.extend(push(1));
        code.extend(push(100));
        code.extend(push(2));
        code.push(OpCode::Syscall.byte());
        code
    }

    /// Mine + PoA-sign a hand-crafted block (for blocks create_block would
    /// refuse to build).
    fn seal_crafted(mut block: Block, node: &Node, kp: &KeyPair) -> Block {
        loop {
            let hash = block.compute_hash();
            if meets_difficulty(&hash, block.difficulty) {
                block.hash = hash;
                break;
            }
            block.nonce += 1;
        }
        // Re-sign over the final payload.
        let mut signed = block.clone();
        node.manager
            .validators
            .sign_block(&mut signed, VALIDATOR, kp)
            .unwrap();
        signed
    }

    fn mine_empty(node: &mut Node, miner: Address, kp: &KeyPair) -> Block {
        let block = node.manager.create_block(miner, VALIDATOR, kp).unwrap();
        node.manager.apply_block(&block).unwrap();
        block
    }

    // ── Scenario 1: genesis ──────────────────────────────────────────────────

    #[test]
    fn genesis_shape() {
        let kp = KeyPair::generate();
        let n = node(&kp);
        assert_eq!(n.manager.height(), 0);
        assert_eq!(n.manager.tip().index, 0);
        assert_eq!(n.manager.tip().prev_hash, "0");
        assert!(n.manager.tip().transactions.is_empty());
        assert_eq!(n.manager.state_root(), WorldState::new().state_root());
        assert_eq!(n.manager.tip().state_root, WorldState::new().state_root());
    }

    #[test]
    fn genesis_is_identical_across_nodes() {
        let kp = KeyPair::generate();
        let a = node(&kp);
        let b = node(&kp);
        assert_eq!(a.manager.tip().hash, b.manager.tip().hash);
    }

    // ── Scenario 2: simple transfer ──────────────────────────────────────────

    #[test]
    fn simple_transfer() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut n = node(&kp);

        // Fund Alice with a reward block (+100).
        mine_empty(&mut n, alice.address(), &kp);
        assert_eq!(n.manager.balance(&alice.address()), 100);

        let tx = transfer(&alice, bob.address(), 50, 1, 1);
        n.manager.validate_transaction(&tx).unwrap();
        n.mempool.lock().unwrap().add(tx, now_ms()).unwrap();

        mine_empty(&mut n, kp.address(), &kp);

        assert_eq!(n.manager.balance(&alice.address()), 49);
        assert_eq!(n.manager.balance(&bob.address()), 50);
        assert_eq!(n.manager.account_nonce(&alice.address()), 1);
        assert!(n.mempool.lock().unwrap().is_empty());
    }

    #[test]
    fn transfer_rejects_bad_nonce_and_missing_funds() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut n = node(&kp);
        mine_empty(&mut n, alice.address(), &kp);

        // Nonce must be exactly current + 1.
        let skipped = transfer(&alice, bob.address(), 1, 1, 5);
        assert!(matches!(
            n.manager.validate_transaction(&skipped),
            Err(ChainError::BadNonce {
                expected: 1,
                got: 5
            })
        ));

        // Balance must cover amount + fee.
        let rich = transfer(&alice, bob.address(), 100, 1, 1);
        assert!(matches!(
            n.manager.validate_transaction(&rich),
            Err(ChainError::InsufficientFunds { need: 101, .. })
        ));

        // A foreign signature never validates.
        let mut forged = transfer(&alice, bob.address(), 10, 1, 1);
        forged.amount = 90;
        assert!(matches!(
            n.manager.validate_transaction(&forged),
            Err(ChainError::InvalidSignature)
        ));
    }

    // ── Scenario 4: deferred actuator across replicas ────────────────────────

    #[test]
    fn deferred_actuator_commits_at_six_confirmations_on_both_replicas() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let contract = Address::from_bytes([0xC0; 20]);

        let mut a = node(&kp);
        let mut b = node(&kp);
        for n in [&mut a, &mut b] {
            n.manager
                .grant_capability(contract, Capability::WriteActuator(100))
                .unwrap();
        }

        // Fund Alice on A; replicate to B.
        let fund = a.manager.create_block(alice.address(), VALIDATOR, &kp).unwrap();
        a.manager.apply_block(&fund).unwrap();
        b.manager.apply_block(&fund).unwrap();

        // The contract transaction, mined on A, applied on both.
        let call = contract_call(&alice, contract, 5, 1, 1, actuator_bytecode());
        a.mempool.lock().unwrap().add(call, now_ms()).unwrap();
        let contract_block = a.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        assert_eq!(contract_block.transactions.len(), 2);
        a.manager.apply_block(&contract_block).unwrap();
        b.manager.apply_block(&contract_block).unwrap();

        // Queued, not actuated; replicas agree byte for byte.
        for n in [&a, &b] {
            assert_eq!(n.manager.hardware().actuator_state(100).unwrap(), 0);
            assert_eq!(n.manager.hardware().pending().len(), 1);
        }
        assert_eq!(a.manager.state_root(), b.manager.state_root());
        assert_eq!(
            a.manager.hardware().pending(),
            b.manager.hardware().pending()
        );

        // Five more confirmations: still deferred.
        for _ in 0..5 {
            let block = a.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
            a.manager.apply_block(&block).unwrap();
            b.manager.apply_block(&block).unwrap();
            assert_eq!(a.manager.state_root(), b.manager.state_root());
        }
        assert_eq!(a.manager.hardware().actuator_state(100).unwrap(), 0);

        // The sixth confirmation commits, on both replicas.
        let block = a.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        a.manager.apply_block(&block).unwrap();
        b.manager.apply_block(&block).unwrap();
        for n in [&a, &b] {
            assert_eq!(n.manager.hardware().actuator_state(100).unwrap(), 1);
            assert!(n.manager.hardware().pending().is_empty());
        }
        assert_eq!(a.manager.state_root(), b.manager.state_root());
    }

    // ── Scenario 5: unauthorized syscall ─────────────────────────────────────

    #[test]
    fn unauthorized_syscall_rejects_the_block_atomically() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let contract = Address::from_bytes([0xC0; 20]);
        let mut n = node(&kp);
        mine_empty(&mut n, alice.address(), &kp);

        let tip_before = n.manager.tip().hash.clone();
        let root_before = n.manager.state_root();

        // No capability granted: craft the block by hand, since create_block
        // would silently drop the failing call.
        let call = contract_call(&alice, contract, 5, 1, 1, actuator_bytecode());
        let coinbase =
            Transaction::coinbase(1, kp.address(), 100, n.manager.tip().timestamp_ms);
        let crafted = Block {
            index: n.manager.height() + 1,
            timestamp_ms: n.manager.tip().timestamp_ms,
            prev_hash: tip_before.clone(),
            nonce: 0,
            difficulty: n.manager.difficulty(),
            state_root: "00".repeat(32),
            transactions: vec![call, coinbase],
            validator_id: String::new(),
            validator_signature: Vec::new(),
            hash: String::new(),
        };
        let sealed = seal_crafted(crafted, &n, &kp);

        let err = n.manager.apply_block(&sealed).unwrap_err();
        assert!(matches!(
            err,
            ChainError::Execution(VmError::Unauthorized {
                syscall: 2,
                device_id: 100
            })
        ));

        // Atomic rollback: tip, state, nonce, actuator all untouched.
        assert_eq!(n.manager.tip().hash, tip_before);
        assert_eq!(n.manager.state_root(), root_before);
        assert_eq!(n.manager.account_nonce(&alice.address()), 0);
        assert_eq!(n.manager.hardware().actuator_state(100).unwrap(), 0);
        assert!(n.manager.hardware().pending().is_empty());
    }

    // ── Scenario 6: snapshot recovery ────────────────────────────────────────

    #[test]
    fn snapshot_recovery_after_kill() {
        let kp = KeyPair::generate();
        let mut config = test_config();
        config.snapshot_interval = 100;
        config.max_retained_blocks = Some(50);

        let dir = tempfile::tempdir().unwrap();
        let (tip_hash, root) = {
            let db = Arc::new(ChainDb::open(dir.path(), &[9u8; 32]).unwrap());
            let validators = ValidatorSet::from_roster(&[ValidatorInfo {
                id: VALIDATOR.into(),
                pubkey: hex::encode(kp.public_key()),
            }])
            .unwrap();
            let mempool = Arc::new(Mutex::new(Mempool::new(100)));
            let mut manager = ChainManager::open(
                config.clone(),
                db,
                validators.clone(),
                base_hardware(),
                mempool,
            )
            .unwrap();

            for _ in 0..150 {
                let block = manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
                manager.apply_block(&block).unwrap();
            }
            assert_eq!(manager.height(), 150);
            (manager.tip().hash.clone(), manager.state_root())
            // Dropped here: the "kill".
        };

        let db = Arc::new(ChainDb::open(dir.path(), &[9u8; 32]).unwrap());
        let validators = ValidatorSet::from_roster(&[ValidatorInfo {
            id: VALIDATOR.into(),
            pubkey: hex::encode(kp.public_key()),
        }])
        .unwrap();
        let mempool = Arc::new(Mutex::new(Mempool::new(100)));
        let manager =
            ChainManager::open(config, Arc::clone(&db), validators, base_hardware(), mempool)
                .unwrap();

        assert_eq!(manager.height(), 150);
        assert_eq!(manager.tip().hash, tip_hash);
        assert_eq!(manager.state_root(), root);

        // Old history is pruned but covered by the snapshot.
        assert!(db.block_at(10).unwrap().is_none());
        assert!(db.get_snapshot(100).unwrap().is_some());
        assert!(db.block_at(145).unwrap().is_some());
    }

    #[test]
    fn tip_recovery_without_snapshot() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let dir = tempfile::tempdir().unwrap();

        let (tip_hash, root) = {
            let db = Arc::new(ChainDb::open(dir.path(), &[9u8; 32]).unwrap());
            let validators = ValidatorSet::from_roster(&[ValidatorInfo {
                id: VALIDATOR.into(),
                pubkey: hex::encode(kp.public_key()),
            }])
            .unwrap();
            let mempool = Arc::new(Mutex::new(Mempool::new(100)));
            let mut manager = ChainManager::open(
                test_config(),
                db,
                validators,
                base_hardware(),
                mempool,
            )
            .unwrap();
            for _ in 0..5 {
                let block = manager.create_block(alice.address(), VALIDATOR, &kp).unwrap();
                manager.apply_block(&block).unwrap();
            }
            (manager.tip().hash.clone(), manager.state_root())
        };

        let db = Arc::new(ChainDb::open(dir.path(), &[9u8; 32]).unwrap());
        let validators = ValidatorSet::from_roster(&[ValidatorInfo {
            id: VALIDATOR.into(),
            pubkey: hex::encode(kp.public_key()),
        }])
        .unwrap();
        let mempool = Arc::new(Mutex::new(Mempool::new(100)));
        let manager =
            ChainManager::open(test_config(), db, validators, base_hardware(), mempool).unwrap();

        assert_eq!(manager.height(), 5);
        assert_eq!(manager.tip().hash, tip_hash);
        assert_eq!(manager.state_root(), root);
        assert_eq!(manager.balance(&alice.address()), 500);
    }

    // ── Consensus rejections ─────────────────────────────────────────────────

    #[test]
    fn block_must_chain_to_tip() {
        let kp = KeyPair::generate();
        let mut n = node(&kp);
        let block = mine_empty(&mut n, kp.address(), &kp);
        // Applying the same block again no longer chains.
        assert!(matches!(
            n.manager.apply_block(&block),
            Err(ChainError::DoesNotChain { .. })
        ));
    }

    #[test]
    fn foreign_validator_is_rejected() {
        let kp = KeyPair::generate();
        let rogue = KeyPair::generate();
        let n = node(&kp);

        let coinbase = Transaction::coinbase(1, kp.address(), 100, n.manager.tip().timestamp_ms);
        let mut crafted = Block {
            index: 1,
            timestamp_ms: n.manager.tip().timestamp_ms,
            prev_hash: n.manager.tip().hash.clone(),
            nonce: 0,
            difficulty: n.manager.difficulty(),
            state_root: "00".repeat(32),
            transactions: vec![coinbase],
            validator_id: "rogue".into(),
            validator_signature: vec![0; 64],
            hash: String::new(),
        };
        loop {
            let hash = crafted.compute_hash();
            if meets_difficulty(&hash, crafted.difficulty) {
                crafted.hash = hash;
                break;
            }
            crafted.nonce += 1;
        }
        crafted.validator_signature = rogue.sign(&crafted.signing_digest()).to_vec();

        let mut n = n;
        assert!(matches!(
            n.manager.apply_block(&crafted),
            Err(ChainError::UnknownValidator(_))
        ));
    }

    #[test]
    fn declared_state_root_must_match() {
        let kp = KeyPair::generate();
        let mut n = node(&kp);
        let mut block = n.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        block.state_root = "00".repeat(32);
        let resealed = seal_crafted(block, &n, &kp);
        assert!(matches!(
            n.manager.apply_block(&resealed),
            Err(ChainError::StateRootMismatch { .. })
        ));
    }

    #[test]
    fn tampered_reward_amount_is_rejected() {
        let kp = KeyPair::generate();
        let mut n = node(&kp);
        let mut block = n.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        block.transactions.last_mut().unwrap().amount = 1_000_000;
        let resealed = seal_crafted(block, &n, &kp);
        assert!(matches!(
            n.manager.apply_block(&resealed),
            Err(ChainError::BadCoinbase(_))
        ));
    }

    #[test]
    fn expired_transaction_is_rejected() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mut n = node(&kp);
        mine_empty(&mut n, alice.address(), &kp);

        let mut tx = Transaction {
            version: TX_VERSION,
            kind: TxKind::Account,
            network_id: 1,
            nonce: 1,
            timestamp_ms: now_ms(),
            valid_until_block: 1,
            from: Some(alice.address()),
            to: Some(bob.address()),
            amount: 1,
            fee: 1,
            data: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            pubkey: Vec::new(),
            signature: Vec::new(),
        };
        tx = sign(tx, &alice);
        // Next inclusion height is 2 > valid_until_block 1.
        assert!(matches!(
            n.manager.validate_transaction(&tx),
            Err(ChainError::Expired { valid_until: 1, height: 2 })
        ));
    }

    #[test]
    fn wrong_network_is_rejected() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let n = node(&kp);
        let mut tx = transfer(&alice, kp.address(), 1, 1, 1);
        tx.network_id = 9;
        tx = sign(tx, &alice);
        assert!(matches!(
            n.manager.validate_transaction(&tx),
            Err(ChainError::WrongNetwork { expected: 1, got: 9 })
        ));
    }

    // ── UTXO flow ────────────────────────────────────────────────────────────

    #[test]
    fn utxo_convert_spend_and_double_spend() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let carol = KeyPair::generate();
        let mut n = node(&kp);
        mine_empty(&mut n, alice.address(), &kp);

        // Account→UTXO conversion: Alice turns 30 of her balance into an
        // output payable to Bob (fee 1).
        let convert = sign(
            Transaction {
                version: TX_VERSION,
                kind: TxKind::Utxo,
                network_id: 1,
                nonce: 1,
                timestamp_ms: now_ms(),
                valid_until_block: 0,
                from: Some(alice.address()),
                to: None,
                amount: 0,
                fee: 1,
                data: Vec::new(),
                inputs: Vec::new(),
                outputs: vec![TxOutput {
                    address: bob.address(),
                    amount: 30,
                }],
                pubkey: Vec::new(),
                signature: Vec::new(),
            },
            &alice,
        );
        let convert_id = convert.txid();
        n.mempool.lock().unwrap().add(convert, now_ms()).unwrap();
        mine_empty(&mut n, kp.address(), &kp);

        assert_eq!(n.manager.balance(&alice.address()), 69);
        assert_eq!(n.manager.utxo_count(), 1);
        let outpoint = OutPoint::new(convert_id, 0);
        assert_eq!(n.manager.utxo(&outpoint).unwrap().amount, 30);

        // Bob spends it: 20 to Carol, 9 change, fee 1.
        let spend = sign(
            Transaction {
                version: TX_VERSION,
                kind: TxKind::Utxo,
                network_id: 1,
                nonce: 0,
                timestamp_ms: now_ms(),
                valid_until_block: 0,
                from: Some(bob.address()),
                to: None,
                amount: 0,
                fee: 1,
                data: Vec::new(),
                inputs: vec![TxInput {
                    prev_txid: convert_id,
                    index: 0,
                }],
                outputs: vec![
                    TxOutput {
                        address: carol.address(),
                        amount: 20,
                    },
                    TxOutput {
                        address: bob.address(),
                        amount: 9,
                    },
                ],
                pubkey: Vec::new(),
                signature: Vec::new(),
            },
            &bob,
        );
        n.manager.validate_transaction(&spend).unwrap();
        n.mempool.lock().unwrap().add(spend.clone(), now_ms()).unwrap();
        mine_empty(&mut n, kp.address(), &kp);

        assert!(n.manager.utxo(&outpoint).is_none());
        assert_eq!(n.manager.utxo_count(), 2);

        // The input is gone: re-validating the same spend fails.
        assert!(matches!(
            n.manager.validate_transaction(&spend),
            Err(ChainError::MissingUtxo(_))
        ));
    }

    #[test]
    fn foreign_utxo_cannot_be_spent() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let mallory = KeyPair::generate();
        let mut n = node(&kp);
        mine_empty(&mut n, alice.address(), &kp);

        let convert = sign(
            Transaction {
                version: TX_VERSION,
                kind: TxKind::Utxo,
                network_id: 1,
                nonce: 1,
                timestamp_ms: now_ms(),
                valid_until_block: 0,
                from: Some(alice.address()),
                to: None,
                amount: 0,
                fee: 1,
                data: Vec::new(),
                inputs: Vec::new(),
                outputs: vec![TxOutput {
                    address: bob.address(),
                    amount: 30,
                }],
                pubkey: Vec::new(),
                signature: Vec::new(),
            },
            &alice,
        );
        let convert_id = convert.txid();
        n.mempool.lock().unwrap().add(convert, now_ms()).unwrap();
        mine_empty(&mut n, kp.address(), &kp);

        let theft = sign(
            Transaction {
                version: TX_VERSION,
                kind: TxKind::Utxo,
                network_id: 1,
                nonce: 0,
                timestamp_ms: now_ms(),
                valid_until_block: 0,
                from: Some(mallory.address()),
                to: None,
                amount: 0,
                fee: 1,
                data: Vec::new(),
                inputs: vec![TxInput {
                    prev_txid: convert_id,
                    index: 0,
                }],
                outputs: vec![TxOutput {
                    address: mallory.address(),
                    amount: 29,
                }],
                pubkey: Vec::new(),
                signature: Vec::new(),
            },
            &mallory,
        );
        assert!(matches!(
            n.manager.validate_transaction(&theft),
            Err(ChainError::ForeignUtxo(_))
        ));
    }

    // ── Contract state agreement ─────────────────────────────────────────────

    #[test]
    fn contract_storage_flows_into_the_state_root() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let contract = Address::from_bytes([0xC1; 20]);
        let mut a = node(&kp);
        let mut b = node(&kp);

        let fund = a.manager.create_block(alice.address(), VALIDATOR, &kp).unwrap();
        a.manager.apply_block(&fund).unwrap();
        b.manager.apply_block(&fund).unwrap();

        // storage[3] = 41 + 1
        let mut code = Vec::new();
        code.extend(push(41));
        code.extend(push(1));
        code.push(OpCode::Add.byte());
        code.extend(push(3));
        code.push(OpCode::SStore.byte());

        let call = contract_call(&alice, contract, 0, 1, 1, code);
        a.mempool.lock().unwrap().add(call, now_ms()).unwrap();
        let block = a.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        a.manager.apply_block(&block).unwrap();
        b.manager.apply_block(&block).unwrap();

        assert_eq!(a.manager.state_root(), b.manager.state_root());
        assert_eq!(a.manager.state_root(), block.state_root);
    }

    #[test]
    fn create_block_drops_failing_contract_transactions() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let contract = Address::from_bytes([0xC2; 20]);
        let mut n = node(&kp);
        mine_empty(&mut n, alice.address(), &kp);

        // No capability: the call would abort, so assembly drops it.
        let call = contract_call(&alice, contract, 0, 1, 1, actuator_bytecode());
        n.mempool.lock().unwrap().add(call, now_ms()).unwrap();

        let block = n.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        assert_eq!(block.transactions.len(), 1); // coinbase only
        n.manager.apply_block(&block).unwrap();
        assert_eq!(n.manager.account_nonce(&alice.address()), 0);
    }

    #[test]
    fn contracts_can_be_disabled() {
        let kp = KeyPair::generate();
        let alice = KeyPair::generate();
        let mut config = test_config();
        config.enable_smart_contracts = false;
        let n = node_with(config, &kp);

        let call = contract_call(&alice, Address::from_bytes([0xC3; 20]), 0, 1, 1, vec![]);
        assert!(matches!(
            n.manager.validate_transaction(&call),
            Err(ChainError::ContractsDisabled)
        ));
    }

    // ── Difficulty ───────────────────────────────────────────────────────────

    #[test]
    fn fast_blocks_raise_difficulty_at_the_interval() {
        let kp = KeyPair::generate();
        let mut config = test_config();
        config.difficulty_adjustment_interval = 10;
        config.target_block_time_ms = 3_600_000; // blocks land far too fast
        let mut n = node_with(config, &kp);

        // First interval measures from the fixed genesis timestamp and reads
        // as slow (floor holds at 1); the second interval spans back-to-back
        // blocks and steps the difficulty up.
        for _ in 0..20 {
            mine_empty(&mut n, kp.address(), &kp);
        }
        assert_eq!(n.manager.difficulty(), 2);

        // A block still carrying the old difficulty no longer validates.
        let mut stale = n.manager.create_block(kp.address(), VALIDATOR, &kp).unwrap();
        stale.difficulty = 1;
        let resealed = seal_crafted(stale, &n, &kp);
        assert!(matches!(
            n.manager.apply_block(&resealed),
            Err(ChainError::WrongDifficulty {
                expected: 2,
                got: 1
            })
        ));
    }
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::{Decoder, Encoder};
use crate::constants::{TX_SIGNING_TAG, TX_VERSION};
use crate::error::ChainError;
use crate::types::{Address, TxId};

// ── TxKind ───────────────────────────────────────────────────────────────────

/// Which of the three ledger semantics a transaction follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    /// Balance/nonce transfer between two accounts.
    Account,
    /// Input-consuming, output-producing transfer against the UTXO set.
    Utxo,
    /// Account-style transfer followed by VM execution of `data`.
    Contract,
}

impl TxKind {
    pub fn tag(&self) -> u8 {
        match self {
            TxKind::Account => 0,
            TxKind::Utxo => 1,
            TxKind::Contract => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, ChainError> {
        match tag {
            0 => Ok(TxKind::Account),
            1 => Ok(TxKind::Utxo),
            2 => Ok(TxKind::Contract),
            other => Err(ChainError::Codec(format!("transaction kind {other}"))),
        }
    }
}

// ── Inputs / outputs ─────────────────────────────────────────────────────────

/// Reference to an unspent output being consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: TxId,
    pub index: u32,
}

/// A newly created output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: u64,
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// A fully-formed HiveBolt transaction. Immutable once built.
///
/// `pubkey` and `signature` are excluded from the canonical body: the txid is
/// SHA-256 of the body alone, and the signature covers the tagged body digest
/// from [`Transaction::signing_digest`]. Coinbase (reward) transactions carry
/// `from = None` and empty `pubkey`/`signature`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub kind: TxKind,
    pub network_id: u32,
    pub nonce: u64,
    pub timestamp_ms: u64,
    /// Last block height this transaction may be included at; 0 = no expiry.
    pub valid_until_block: u64,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub amount: u64,
    pub fee: u64,
    /// Contract bytecode for `TxKind::Contract`, empty otherwise.
    pub data: Vec<u8>,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub pubkey: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Block-reward transaction: unsigned, no sender, fixed slot at the end
    /// of each block.
    pub fn coinbase(network_id: u32, to: Address, amount: u64, timestamp_ms: u64) -> Self {
        Self {
            version: TX_VERSION,
            kind: TxKind::Account,
            network_id,
            nonce: 0,
            timestamp_ms,
            valid_until_block: 0,
            from: None,
            to: Some(to),
            amount,
            fee: 0,
            data: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            pubkey: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.from.is_none()
    }

    // ── Canonical encoding ───────────────────────────────────────────────────

    /// The signed/hashed body: every field except `pubkey` and `signature`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(128 + self.data.len());
        enc.put_u32(self.version);
        enc.put_u8(self.kind.tag());
        enc.put_u32(self.network_id);
        enc.put_u64(self.nonce);
        enc.put_u64(self.timestamp_ms);
        enc.put_u64(self.valid_until_block);
        enc.put_opt_str(self.from.map(|a| a.to_string()).as_deref());
        enc.put_opt_str(self.to.map(|a| a.to_string()).as_deref());
        enc.put_u64(self.amount);
        enc.put_u64(self.fee);
        enc.put_bytes(&self.data);
        enc.put_u32(self.inputs.len() as u32);
        for input in &self.inputs {
            enc.put_raw(input.prev_txid.as_bytes());
            enc.put_u32(input.index);
        }
        enc.put_u32(self.outputs.len() as u32);
        for output in &self.outputs {
            enc.put_str(&output.address.to_string());
            enc.put_u64(output.amount);
        }
        enc.into_bytes()
    }

    /// Wire/storage form: canonical body followed by pubkey and signature.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(128 + self.data.len());
        enc.put_raw(&self.canonical_bytes());
        enc.put_bytes(&self.pubkey);
        enc.put_bytes(&self.signature);
        enc.into_bytes()
    }

    /// Wire size in bytes; the denominator of fee-per-byte priority.
    pub fn size_bytes(&self) -> usize {
        self.wire_bytes().len()
    }

    pub fn txid(&self) -> TxId {
        let digest = Sha256::digest(self.canonical_bytes());
        TxId::from_bytes(digest.into())
    }

    /// Digest the sender signs: `SHA256("TX\0" ∥ canonical body)`.
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(TX_SIGNING_TAG);
        hasher.update(self.canonical_bytes());
        hasher.finalize().into()
    }

    /// Decode the wire form produced by [`Transaction::wire_bytes`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ChainError> {
        let mut dec = Decoder::new(bytes);
        let tx = Self::decode_from(&mut dec)?;
        dec.finish()?;
        Ok(tx)
    }

    /// Decode one wire transaction from an open cursor (used by block decode).
    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, ChainError> {
        let version = dec.u32()?;
        let kind = TxKind::from_tag(dec.u8()?)?;
        let network_id = dec.u32()?;
        let nonce = dec.u64()?;
        let timestamp_ms = dec.u64()?;
        let valid_until_block = dec.u64()?;
        let from = dec.opt_str()?.map(|s| s.parse()).transpose()?;
        let to = dec.opt_str()?.map(|s| s.parse()).transpose()?;
        let amount = dec.u64()?;
        let fee = dec.u64()?;
        let data = dec.bytes()?;

        let input_count = dec.u32()?;
        let mut inputs = Vec::with_capacity(input_count as usize);
        for _ in 0..input_count {
            let txid_raw: [u8; 32] = dec
                .raw(32)?
                .try_into()
                .expect("fixed 32-byte read");
            let index = dec.u32()?;
            inputs.push(TxInput {
                prev_txid: TxId::from_bytes(txid_raw),
                index,
            });
        }

        let output_count = dec.u32()?;
        let mut outputs = Vec::with_capacity(output_count as usize);
        for _ in 0..output_count {
            let address = dec.str()?.parse()?;
            let amount = dec.u64()?;
            outputs.push(TxOutput { address, amount });
        }

        let pubkey = dec.bytes()?;
        let signature = dec.bytes()?;

        Ok(Self {
            version,
            kind,
            network_id,
            nonce,
            timestamp_ms,
            valid_until_block,
            from,
            to,
            amount,
            fee,
            data,
            inputs,
            outputs,
            pubkey,
            signature,
        })
    }
}

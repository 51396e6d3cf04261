use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{ADDRESS_PAYLOAD_BYTES, ADDRESS_PREFIX};
use crate::error::ChainError;

// ── Address ──────────────────────────────────────────────────────────────────

/// Account address: the first 20 bytes of SHA-256 of a compressed secp256k1
/// public key. Rendered as `"hb"` followed by 40 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; ADDRESS_PAYLOAD_BYTES]);

impl Address {
    pub fn from_bytes(b: [u8; ADDRESS_PAYLOAD_BYTES]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_PAYLOAD_BYTES] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ADDRESS_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({}{}…)", ADDRESS_PREFIX, &hex::encode(self.0)[..8])
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| ChainError::Codec(format!("address missing {ADDRESS_PREFIX} prefix")))?;
        let bytes = hex::decode(payload)
            .map_err(|e| ChainError::Codec(format!("address hex: {e}")))?;
        let arr: [u8; ADDRESS_PAYLOAD_BYTES] = bytes
            .try_into()
            .map_err(|_| ChainError::Codec("address payload length".into()))?;
        Ok(Self(arr))
    }
}

// ── TxId ─────────────────────────────────────────────────────────────────────

/// 32-byte transaction identifier: SHA-256 of the canonical transaction body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ChainError> {
        let bytes = hex::decode(s).map_err(|e| ChainError::Codec(format!("txid hex: {e}")))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Codec("txid length".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}…)", &self.to_hex()[..16])
    }
}

// ── OutPoint ─────────────────────────────────────────────────────────────────

/// Reference to a single transaction output: `(producing txid, output index)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

// ── Capability ───────────────────────────────────────────────────────────────

/// Authorization granting a contract access to one hardware device.
///
/// Ordering is (variant tag, device id), matching the canonical encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub enum Capability {
    /// May read sensor `device_id` via `SYSCALL 1`.
    ReadSensor(u64),
    /// May queue writes to actuator `device_id` via `SYSCALL 2`.
    WriteActuator(u64),
}

impl Capability {
    /// Canonical serialization tag.
    pub fn tag(&self) -> u8 {
        match self {
            Capability::ReadSensor(_) => 0,
            Capability::WriteActuator(_) => 1,
        }
    }

    pub fn device_id(&self) -> u64 {
        match self {
            Capability::ReadSensor(id) | Capability::WriteActuator(id) => *id,
        }
    }

    pub fn from_tag(tag: u8, device_id: u64) -> Result<Self, ChainError> {
        match tag {
            0 => Ok(Capability::ReadSensor(device_id)),
            1 => Ok(Capability::WriteActuator(device_id)),
            other => Err(ChainError::Codec(format!("capability tag {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_round_trips_through_display() {
        let addr = Address::from_bytes([0xAB; 20]);
        let s = addr.to_string();
        assert_eq!(s.len(), 42);
        assert!(s.starts_with("hb"));
        assert_eq!(s.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn address_rejects_bad_prefix() {
        assert!("xx0000000000000000000000000000000000000000"
            .parse::<Address>()
            .is_err());
    }

    #[test]
    fn capability_ordering_is_tag_then_device() {
        let mut caps = vec![
            Capability::WriteActuator(1),
            Capability::ReadSensor(9),
            Capability::ReadSensor(2),
        ];
        caps.sort();
        assert_eq!(
            caps,
            vec![
                Capability::ReadSensor(2),
                Capability::ReadSensor(9),
                Capability::WriteActuator(1),
            ]
        );
    }
}

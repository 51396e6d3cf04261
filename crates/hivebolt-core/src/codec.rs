//! Canonical byte layout for everything that is hashed, signed, or sent on
//! the wire. Big-endian fixed-width integers, `u32`-length-prefixed byte
//! strings, maps in sorted-key order.
//!
//! Determinism here is consensus-critical: `txid` stability and cross-node
//! state-root agreement both reduce to byte-for-byte identical encodings.
//! No other module may hand-roll a byte layout; new fields append to the
//! existing layout together with a version bump.

use crate::error::ChainError;

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Append-only canonical byte writer.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// Length-prefixed byte string.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) {
        self.put_bytes(v.as_bytes());
    }

    /// Presence flag followed by the value when present.
    pub fn put_opt_str(&mut self, v: Option<&str>) {
        match v {
            Some(s) => {
                self.put_u8(1);
                self.put_str(s);
            }
            None => self.put_u8(0),
        }
    }

    /// Raw bytes without a length prefix. Only for fixed-width fields whose
    /// length is part of the layout (txids, nonces).
    pub fn put_raw(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

/// Cursor over a canonical byte string. Every read is bounds-checked and a
/// short buffer surfaces as [`ChainError::Codec`].
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ChainError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                ChainError::Codec(format!(
                    "short buffer: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, ChainError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, ChainError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().expect("4-byte slice")))
    }

    pub fn u64(&mut self) -> Result<u64, ChainError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().expect("8-byte slice")))
    }

    pub fn i64(&mut self) -> Result<i64, ChainError> {
        let b = self.take(8)?;
        Ok(i64::from_be_bytes(b.try_into().expect("8-byte slice")))
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, ChainError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn str(&mut self) -> Result<String, ChainError> {
        let raw = self.bytes()?;
        String::from_utf8(raw).map_err(|e| ChainError::Codec(format!("utf-8: {e}")))
    }

    pub fn opt_str(&mut self) -> Result<Option<String>, ChainError> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.str()?)),
            other => Err(ChainError::Codec(format!("presence flag {other}"))),
        }
    }

    /// Fixed-width raw field.
    pub fn raw(&mut self, n: usize) -> Result<&'a [u8], ChainError> {
        self.take(n)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Trailing garbage after a complete decode is a codec violation.
    pub fn finish(self) -> Result<(), ChainError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(ChainError::Codec(format!(
                "{} trailing bytes after decode",
                self.remaining()
            )))
        }
    }
}

use hivebolt_core::block::Block;
use hivebolt_core::codec::{Decoder, Encoder};
use hivebolt_core::constants::{HANDSHAKE_NONCE_BYTES, PUBKEY_BYTES, SIGNATURE_BYTES};
use hivebolt_core::transaction::Transaction;

use crate::frame::{Frame, P2pError};

pub const MSG_HELLO: u32 = 1;
pub const MSG_CHALLENGE: u32 = 2;
pub const MSG_HANDSHAKE_OK: u32 = 3;
pub const MSG_TRANSACTION: u32 = 4;
pub const MSG_BLOCK: u32 = 5;
pub const MSG_PEER_LIST: u32 = 6;

/// Messages exchanged between HiveBolt peers. Payloads use the canonical
/// codec, same as everything hashed or signed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetMessage {
    Hello {
        version: u32,
        network_id: u32,
        nonce: [u8; HANDSHAKE_NONCE_BYTES],
    },
    Challenge {
        pubkey: [u8; PUBKEY_BYTES],
        signature: [u8; SIGNATURE_BYTES],
    },
    HandshakeOk,
    Transaction(Transaction),
    Block(Block),
    PeerList(Vec<String>),
}

impl NetMessage {
    pub fn msg_type(&self) -> u32 {
        match self {
            NetMessage::Hello { .. } => MSG_HELLO,
            NetMessage::Challenge { .. } => MSG_CHALLENGE,
            NetMessage::HandshakeOk => MSG_HANDSHAKE_OK,
            NetMessage::Transaction(_) => MSG_TRANSACTION,
            NetMessage::Block(_) => MSG_BLOCK,
            NetMessage::PeerList(_) => MSG_PEER_LIST,
        }
    }

    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            NetMessage::Hello {
                version,
                network_id,
                nonce,
            } => {
                let mut enc = Encoder::with_capacity(40);
                enc.put_u32(*version);
                enc.put_u32(*network_id);
                enc.put_raw(nonce);
                enc.into_bytes()
            }
            NetMessage::Challenge { pubkey, signature } => {
                let mut enc = Encoder::with_capacity(PUBKEY_BYTES + SIGNATURE_BYTES);
                enc.put_raw(pubkey);
                enc.put_raw(signature);
                enc.into_bytes()
            }
            NetMessage::HandshakeOk => Vec::new(),
            NetMessage::Transaction(tx) => tx.wire_bytes(),
            NetMessage::Block(block) => block.wire_bytes(),
            NetMessage::PeerList(peers) => {
                let mut enc = Encoder::new();
                enc.put_u32(peers.len() as u32);
                for peer in peers {
                    enc.put_str(peer);
                }
                enc.into_bytes()
            }
        }
    }

    pub fn into_frame(self, seq: u64) -> Frame {
        Frame {
            msg_type: self.msg_type(),
            seq,
            payload: self.encode_payload(),
        }
    }

    pub fn decode(msg_type: u32, payload: &[u8]) -> Result<Self, P2pError> {
        match msg_type {
            MSG_HELLO => {
                let mut dec = Decoder::new(payload);
                let version = dec.u32()?;
                let network_id = dec.u32()?;
                let nonce: [u8; HANDSHAKE_NONCE_BYTES] = dec
                    .raw(HANDSHAKE_NONCE_BYTES)?
                    .try_into()
                    .expect("fixed-width read");
                dec.finish()?;
                Ok(NetMessage::Hello {
                    version,
                    network_id,
                    nonce,
                })
            }
            MSG_CHALLENGE => {
                let mut dec = Decoder::new(payload);
                let pubkey: [u8; PUBKEY_BYTES] =
                    dec.raw(PUBKEY_BYTES)?.try_into().expect("fixed-width read");
                let signature: [u8; SIGNATURE_BYTES] = dec
                    .raw(SIGNATURE_BYTES)?
                    .try_into()
                    .expect("fixed-width read");
                dec.finish()?;
                Ok(NetMessage::Challenge { pubkey, signature })
            }
            MSG_HANDSHAKE_OK => {
                if payload.is_empty() {
                    Ok(NetMessage::HandshakeOk)
                } else {
                    Err(P2pError::Decode("HANDSHAKE_OK carries a payload".into()))
                }
            }
            MSG_TRANSACTION => Ok(NetMessage::Transaction(Transaction::decode(payload)?)),
            MSG_BLOCK => Ok(NetMessage::Block(Block::decode(payload)?)),
            MSG_PEER_LIST => {
                let mut dec = Decoder::new(payload);
                let count = dec.u32()?;
                let mut peers = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    peers.push(dec.str()?);
                }
                dec.finish()?;
                Ok(NetMessage::PeerList(peers))
            }
            other => Err(P2pError::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hivebolt_core::types::Address;

    fn round_trip(msg: NetMessage) {
        let msg_type = msg.msg_type();
        let payload = msg.encode_payload();
        let decoded = NetMessage::decode(msg_type, &payload).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn hello_round_trip() {
        round_trip(NetMessage::Hello {
            version: 1,
            network_id: 7,
            nonce: [9; 32],
        });
    }

    #[test]
    fn challenge_round_trip() {
        round_trip(NetMessage::Challenge {
            pubkey: [2; 33],
            signature: [3; 64],
        });
    }

    #[test]
    fn handshake_ok_round_trip() {
        round_trip(NetMessage::HandshakeOk);
    }

    #[test]
    fn transaction_round_trip() {
        round_trip(NetMessage::Transaction(Transaction::coinbase(
            1,
            Address::from_bytes([4; 20]),
            50,
            123,
        )));
    }

    #[test]
    fn peer_list_round_trip() {
        round_trip(NetMessage::PeerList(vec![
            "10.0.0.1:7440".into(),
            "10.0.0.2:7440".into(),
        ]));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(matches!(
            NetMessage::decode(99, &[]),
            Err(P2pError::UnknownMessageType(99))
        ));
    }
}

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use hivebolt_core::constants::MAX_FRAME_PAYLOAD_BYTES;
use hivebolt_core::error::ChainError;

/// Everything that can go wrong on a P2P session. Any of these terminates
/// the session; the node itself keeps running.
#[derive(Debug, Error)]
pub enum P2pError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame payload of {len} bytes exceeds the {max} byte cap")]
    OversizedPayload { len: u32, max: u32 },

    #[error("unknown message type {0}")]
    UnknownMessageType(u32),

    #[error("payload decode failed: {0}")]
    Decode(String),

    #[error("sequence violation: got {got} after {last:?}")]
    BadSequence { last: Option<u64>, got: u64 },

    #[error("handshake version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },

    #[error("handshake network mismatch: ours {ours}, theirs {theirs}")]
    NetworkMismatch { ours: u32, theirs: u32 },

    #[error("handshake challenge signature invalid")]
    ChallengeFailed,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("session idle timeout")]
    IdleTimeout,

    #[error("peer closed the connection")]
    ConnectionClosed,
}

impl From<ChainError> for P2pError {
    fn from(e: ChainError) -> Self {
        P2pError::Decode(e.to_string())
    }
}

/// One wire frame: `msg_type:u32 ∥ seq:u64 ∥ payload_len:u32 ∥ payload`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: u32,
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Write one frame. The payload cap is enforced on send as well: a node
/// must never emit a frame its peers are required to kill the session over.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), P2pError> {
    let len = frame.payload.len() as u32;
    if len > MAX_FRAME_PAYLOAD_BYTES {
        return Err(P2pError::OversizedPayload {
            len,
            max: MAX_FRAME_PAYLOAD_BYTES,
        });
    }
    let mut header = [0u8; 16];
    header[..4].copy_from_slice(&frame.msg_type.to_be_bytes());
    header[4..12].copy_from_slice(&frame.seq.to_be_bytes());
    header[12..].copy_from_slice(&len.to_be_bytes());
    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, enforcing the payload cap before allocating.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame, P2pError> {
    let mut header = [0u8; 16];
    reader.read_exact(&mut header).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            P2pError::ConnectionClosed
        } else {
            P2pError::Io(e)
        }
    })?;
    let msg_type = u32::from_be_bytes(header[..4].try_into().expect("4-byte slice"));
    let seq = u64::from_be_bytes(header[4..12].try_into().expect("8-byte slice"));
    let len = u32::from_be_bytes(header[12..].try_into().expect("4-byte slice"));
    if len > MAX_FRAME_PAYLOAD_BYTES {
        return Err(P2pError::OversizedPayload {
            len,
            max: MAX_FRAME_PAYLOAD_BYTES,
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Frame {
        msg_type,
        seq,
        payload,
    })
}

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::frame::{read_frame, write_frame, P2pError};
use crate::message::NetMessage;
use crate::queue::{InboundQueue, PeerEvent};

/// Per-direction sequence discipline: numbers start at 0 after the
/// handshake and must strictly increase. Any violation terminates the
/// session.
#[derive(Debug, Default)]
pub struct SeqTracker {
    last: Option<u64>,
}

impl SeqTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check an incoming sequence number and record it.
    pub fn check(&mut self, seq: u64) -> Result<(), P2pError> {
        let valid = match self.last {
            None => seq == 0,
            Some(last) => seq > last,
        };
        if !valid {
            return Err(P2pError::BadSequence {
                last: self.last,
                got: seq,
            });
        }
        self.last = Some(seq);
        Ok(())
    }

    /// Allocate the next outgoing sequence number.
    pub fn next(&mut self) -> u64 {
        let next = match self.last {
            None => 0,
            Some(last) => last + 1,
        };
        self.last = Some(next);
        next
    }
}

/// Drive one established (post-handshake) session until it errors, the
/// peer disconnects, or the broadcast side closes.
///
/// Inbound frames are decoded here on the I/O task and handed to the chain
/// writer through the bounded queue; outbound messages fan in from the
/// node-wide broadcast channel.
pub async fn run_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    idle_timeout_ms: u64,
    inbound: Arc<InboundQueue>,
    mut outbound: broadcast::Receiver<NetMessage>,
) -> Result<(), P2pError> {
    let idle = Duration::from_millis(idle_timeout_ms);
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    // Reader and writer own their halves; whichever finishes first ends the
    // session and cancels the other.
    let reader = async move {
        let mut recv_seq = SeqTracker::new();
        loop {
            let frame = timeout(idle, read_frame(&mut read_half))
                .await
                .map_err(|_| P2pError::IdleTimeout)??;
            recv_seq.check(frame.seq)?;
            match NetMessage::decode(frame.msg_type, &frame.payload)? {
                NetMessage::Transaction(tx) => inbound.push(PeerEvent::Transaction(tx)),
                NetMessage::Block(block) => inbound.push(PeerEvent::Block(block)),
                NetMessage::PeerList(peers) => inbound.push(PeerEvent::PeerList(peers)),
                other => {
                    // Handshake messages after the handshake are a protocol
                    // violation.
                    return Err(P2pError::Decode(format!(
                        "unexpected message type {} mid-session",
                        other.msg_type()
                    )));
                }
            }
        }
    };

    let writer = async move {
        let mut send_seq = SeqTracker::new();
        loop {
            match outbound.recv().await {
                Ok(message) => {
                    let frame = message.into_frame(send_seq.next());
                    write_frame(&mut write_half, &frame).await?;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session lagged behind broadcast; continuing");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("broadcast channel closed; ending session");
                    return Ok(());
                }
            }
        }
    };

    tokio::select! {
        result = reader => result,
        result = writer => result,
    }
}

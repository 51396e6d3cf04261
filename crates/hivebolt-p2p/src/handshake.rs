use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Duration};
use tracing::debug;

use hivebolt_core::constants::{HANDSHAKE_NONCE_BYTES, PROTOCOL_VERSION};
use hivebolt_core::types::Address;
use hivebolt_crypto::{derive_address, handshake_digest, verify_digest, KeyPair};

use crate::config::P2pConfig;
use crate::frame::{read_frame, write_frame, P2pError};
use crate::message::NetMessage;

/// The authenticated identity of a peer after a completed handshake.
#[derive(Clone, Debug)]
pub struct PeerIdentity {
    pub pubkey: [u8; 33],
    pub address: Address,
}

/// Run the mutual handshake on a fresh connection, under the configured
/// deadline.
///
/// Both sides send `HELLO{version, network_id, nonce}`, answer the peer's
/// nonce with a signed `CHALLENGE`, verify, and confirm with
/// `HANDSHAKE_OK`. Either side failing any step kills the connection.
/// Handshake frames all carry seq 0; the per-direction counters start after
/// `HANDSHAKE_OK`.
pub async fn perform_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    config: &P2pConfig,
    keypair: &KeyPair,
) -> Result<PeerIdentity, P2pError> {
    let deadline = Duration::from_millis(config.handshake_timeout_ms);
    timeout(deadline, handshake_inner(stream, config, keypair))
        .await
        .map_err(|_| P2pError::HandshakeTimeout)?
}

async fn handshake_inner<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    config: &P2pConfig,
    keypair: &KeyPair,
) -> Result<PeerIdentity, P2pError> {
    let mut our_nonce = [0u8; HANDSHAKE_NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut our_nonce);

    let hello = NetMessage::Hello {
        version: PROTOCOL_VERSION,
        network_id: config.network_id,
        nonce: our_nonce,
    };
    write_frame(stream, &hello.into_frame(0)).await?;

    let frame = read_frame(stream).await?;
    let peer_nonce = match NetMessage::decode(frame.msg_type, &frame.payload)? {
        NetMessage::Hello {
            version,
            network_id,
            nonce,
        } => {
            if version != PROTOCOL_VERSION {
                return Err(P2pError::VersionMismatch {
                    ours: PROTOCOL_VERSION,
                    theirs: version,
                });
            }
            if network_id != config.network_id {
                return Err(P2pError::NetworkMismatch {
                    ours: config.network_id,
                    theirs: network_id,
                });
            }
            nonce
        }
        other => {
            return Err(P2pError::Decode(format!(
                "expected HELLO, got message type {}",
                other.msg_type()
            )))
        }
    };

    // Prove our identity over the peer's nonce.
    let challenge = NetMessage::Challenge {
        pubkey: keypair.public_key(),
        signature: keypair.sign(&handshake_digest(&peer_nonce)),
    };
    write_frame(stream, &challenge.into_frame(0)).await?;

    let frame = read_frame(stream).await?;
    let peer = match NetMessage::decode(frame.msg_type, &frame.payload)? {
        NetMessage::Challenge { pubkey, signature } => {
            verify_digest(&pubkey, &handshake_digest(&our_nonce), &signature)
                .map_err(|_| P2pError::ChallengeFailed)?;
            let address = derive_address(&pubkey).map_err(|_| P2pError::ChallengeFailed)?;
            PeerIdentity { pubkey, address }
        }
        other => {
            return Err(P2pError::Decode(format!(
                "expected CHALLENGE, got message type {}",
                other.msg_type()
            )))
        }
    };

    write_frame(stream, &NetMessage::HandshakeOk.into_frame(0)).await?;
    let frame = read_frame(stream).await?;
    match NetMessage::decode(frame.msg_type, &frame.payload)? {
        NetMessage::HandshakeOk => {}
        other => {
            return Err(P2pError::Decode(format!(
                "expected HANDSHAKE_OK, got message type {}",
                other.msg_type()
            )))
        }
    }

    debug!(peer = %peer.address, "handshake complete");
    Ok(peer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(network_id: u32) -> P2pConfig {
        P2pConfig {
            network_id,
            handshake_timeout_ms: 2_000,
            ..P2pConfig::default()
        }
    }

    #[tokio::test]
    async fn mutual_handshake_succeeds() {
        let kp_a = KeyPair::generate();
        let kp_b = KeyPair::generate();
        let addr_a = kp_a.address();
        let addr_b = kp_b.address();
        let (mut side_a, mut side_b) = tokio::io::duplex(4096);

        let task_a = tokio::spawn(async move {
            perform_handshake(&mut side_a, &config(1), &kp_a).await
        });
        let task_b = tokio::spawn(async move {
            perform_handshake(&mut side_b, &config(1), &kp_b).await
        });

        let peer_of_a = task_a.await.unwrap().unwrap();
        let peer_of_b = task_b.await.unwrap().unwrap();
        assert_eq!(peer_of_a.address, addr_b);
        assert_eq!(peer_of_b.address, addr_a);
    }

    #[tokio::test]
    async fn network_mismatch_aborts() {
        let kp_a = KeyPair::generate();
        let kp_b = KeyPair::generate();
        let (mut side_a, mut side_b) = tokio::io::duplex(4096);

        let task_a = tokio::spawn(async move {
            perform_handshake(&mut side_a, &config(1), &kp_a).await
        });
        let task_b = tokio::spawn(async move {
            perform_handshake(&mut side_b, &config(2), &kp_b).await
        });

        assert!(matches!(
            task_a.await.unwrap(),
            Err(P2pError::NetworkMismatch { .. })
        ));
        assert!(task_b.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn forged_challenge_fails() {
        let kp_honest = KeyPair::generate();
        let (mut honest_side, mut mallory_side) = tokio::io::duplex(4096);

        let honest = tokio::spawn(async move {
            perform_handshake(&mut honest_side, &config(1), &kp_honest).await
        });

        // Mallory speaks the protocol but signs garbage.
        let mallory = tokio::spawn(async move {
            let kp = KeyPair::generate();
            let hello = NetMessage::Hello {
                version: PROTOCOL_VERSION,
                network_id: 1,
                nonce: [7; 32],
            };
            write_frame(&mut mallory_side, &hello.into_frame(0))
                .await
                .unwrap();
            let _their_hello = read_frame(&mut mallory_side).await.unwrap();
            let forged = NetMessage::Challenge {
                pubkey: kp.public_key(),
                signature: [0; 64],
            };
            write_frame(&mut mallory_side, &forged.into_frame(0))
                .await
                .unwrap();
            let _their_challenge = read_frame(&mut mallory_side).await.unwrap();
        });

        assert!(matches!(
            honest.await.unwrap(),
            Err(P2pError::ChallengeFailed)
        ));
        let _ = mallory.await;
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let kp = KeyPair::generate();
        let (mut side_a, _side_b) = tokio::io::duplex(4096);
        let mut cfg = config(1);
        cfg.handshake_timeout_ms = 50;
        assert!(matches!(
            perform_handshake(&mut side_a, &cfg, &kp).await,
            Err(P2pError::HandshakeTimeout)
        ));
    }
}

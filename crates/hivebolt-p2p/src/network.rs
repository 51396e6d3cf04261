use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use hivebolt_crypto::KeyPair;

use crate::config::P2pConfig;
use crate::frame::P2pError;
use crate::handshake::perform_handshake;
use crate::message::NetMessage;
use crate::queue::InboundQueue;
use crate::session::run_session;

/// Application-facing handle to the P2P layer.
///
/// `outbound` fans a message out to every live session; `inbound` is the
/// bounded queue the chain writer consumes.
#[derive(Clone)]
pub struct P2pHandle {
    pub outbound: broadcast::Sender<NetMessage>,
    pub inbound: Arc<InboundQueue>,
}

impl P2pHandle {
    /// Broadcast to every connected peer. Returns how many sessions were
    /// subscribed; zero peers is not an error.
    pub fn broadcast(&self, message: NetMessage) -> usize {
        self.outbound.send(message).unwrap_or(0)
    }
}

/// Owns the TCP listener and spawns one task per connection. Pass to
/// `tokio::spawn(network.run())`.
pub struct P2pNetwork {
    listener: TcpListener,
    config: P2pConfig,
    keypair: Arc<KeyPair>,
    outbound: broadcast::Sender<NetMessage>,
    inbound: Arc<InboundQueue>,
}

impl P2pNetwork {
    /// Bind the listen address and build the network plus its handle.
    pub async fn bind(
        config: P2pConfig,
        keypair: Arc<KeyPair>,
    ) -> Result<(Self, P2pHandle), P2pError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        info!(addr = %listener.local_addr()?, "p2p listening");

        let (outbound, _) = broadcast::channel(256);
        let inbound = Arc::new(InboundQueue::new(config.inbound_queue_capacity));
        let handle = P2pHandle {
            outbound: outbound.clone(),
            inbound: Arc::clone(&inbound),
        };
        let network = Self {
            listener,
            config,
            keypair,
            outbound,
            inbound,
        };
        Ok((network, handle))
    }

    /// The actual bound address (useful when configured with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, P2pError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept inbound connections and dial the configured peers forever.
    pub async fn run(self) -> Result<(), P2pError> {
        for peer in self.config.peers.clone() {
            let config = self.config.clone();
            let keypair = Arc::clone(&self.keypair);
            let inbound = Arc::clone(&self.inbound);
            let outbound = self.outbound.subscribe();
            tokio::spawn(async move {
                match TcpStream::connect(&peer).await {
                    Ok(stream) => {
                        drive_connection(stream, config, keypair, inbound, outbound).await;
                    }
                    Err(e) => warn!(peer = %peer, error = %e, "dial failed"),
                }
            });
        }

        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!(peer = %addr, "inbound connection");
            let config = self.config.clone();
            let keypair = Arc::clone(&self.keypair);
            let inbound = Arc::clone(&self.inbound);
            let outbound = self.outbound.subscribe();
            tokio::spawn(async move {
                drive_connection(stream, config, keypair, inbound, outbound).await;
            });
        }
    }
}

/// Handshake, then run the session loop until it ends. All errors are
/// session-local: log and let the task die.
async fn drive_connection(
    mut stream: TcpStream,
    config: P2pConfig,
    keypair: Arc<KeyPair>,
    inbound: Arc<InboundQueue>,
    outbound: broadcast::Receiver<NetMessage>,
) {
    let peer = match perform_handshake(&mut stream, &config, &keypair).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!(error = %e, "handshake failed");
            return;
        }
    };
    info!(peer = %peer.address, "peer connected");
    if let Err(e) = run_session(stream, config.idle_timeout_ms, inbound, outbound).await {
        debug!(peer = %peer.address, error = %e, "session ended");
    }
}

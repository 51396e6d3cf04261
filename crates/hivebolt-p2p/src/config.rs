/// Configuration for the HiveBolt P2P layer.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local listen address (e.g. "0.0.0.0:7440").
    pub listen_addr: String,
    /// Peer addresses to dial at startup.
    pub peers: Vec<String>,
    /// Network id exchanged in HELLO; mismatches abort the handshake.
    pub network_id: u32,
    /// Deadline for the whole handshake.
    pub handshake_timeout_ms: u64,
    /// Per-session idle read timeout after the handshake.
    pub idle_timeout_ms: u64,
    /// Bounded inbound queue capacity between sessions and the chain writer.
    pub inbound_queue_capacity: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7440".into(),
            peers: Vec::new(),
            network_id: 1,
            handshake_timeout_ms: 10_000,
            idle_timeout_ms: 120_000,
            inbound_queue_capacity: 1024,
        }
    }
}

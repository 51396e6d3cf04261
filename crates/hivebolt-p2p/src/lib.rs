//! hivebolt-p2p
//!
//! Framed TCP transport for HiveBolt nodes: length-prefixed frames with an
//! authenticated mutual-challenge handshake, strict per-direction sequence
//! numbers, and task-per-connection session loops feeding the chain writer
//! through a bounded queue.

pub mod config;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod network;
pub mod queue;
pub mod session;

pub use config::P2pConfig;
pub use frame::{read_frame, write_frame, Frame, P2pError};
pub use handshake::{perform_handshake, PeerIdentity};
pub use message::NetMessage;
pub use network::{P2pHandle, P2pNetwork};
pub use queue::{InboundQueue, PeerEvent};
pub use session::SeqTracker;

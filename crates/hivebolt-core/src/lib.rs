pub mod block;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod transaction;
pub mod types;

pub use block::Block;
pub use codec::{Decoder, Encoder};
pub use config::ChainConfig;
pub use constants::*;
pub use error::{ChainError, VmError};
pub use transaction::{Transaction, TxInput, TxKind, TxOutput};
pub use types::{Address, Capability, OutPoint, TxId};

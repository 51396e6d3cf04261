//! hivebolt-vm
//!
//! The deterministic metered virtual machine for on-chain IoT contracts,
//! plus the hardware layer it talks to: a capability-checked device registry
//! and the deferral queue that holds actuator writes until their block is
//! final.
//!
//! Execution is a pure function of `(bytecode, context, pre-state)` modulo
//! the deferred queue: no host I/O, no wall clock, no randomness.

pub mod context;
pub mod hardware;
pub mod limiter;
pub mod opcode;
pub mod vm;

pub use context::{account_handle, ExecutionContext};
pub use hardware::{DeferredAction, DeviceKind, HardwareBridge, HardwareError};
pub use limiter::SyscallLimiter;
pub use opcode::OpCode;
pub use vm::{Vm, VmOutcome};

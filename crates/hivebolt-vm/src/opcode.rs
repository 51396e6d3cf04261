use hivebolt_core::error::VmError;

/// Single-byte instruction set of the IoT contract VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    // Stack
    Stop,
    /// Followed by an 8-byte big-endian i64 immediate.
    Push,
    Pop,
    Dup,
    Swap,
    // Arithmetic (wrapping i64)
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // Logic / control
    Jump,
    JumpI,
    Eq,
    Lt,
    Gt,
    // State
    SLoad,
    SStore,
    // Context
    Balance,
    Caller,
    Value,
    Timestamp,
    Number,
    // Hardware
    Syscall,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> Result<Self, VmError> {
        Ok(match byte {
            0x00 => OpCode::Stop,
            0x01 => OpCode::Push,
            0x02 => OpCode::Pop,
            0x03 => OpCode::Dup,
            0x04 => OpCode::Swap,
            0x10 => OpCode::Add,
            0x11 => OpCode::Sub,
            0x12 => OpCode::Mul,
            0x13 => OpCode::Div,
            0x14 => OpCode::Mod,
            0x20 => OpCode::Jump,
            0x21 => OpCode::JumpI,
            0x22 => OpCode::Eq,
            0x23 => OpCode::Lt,
            0x24 => OpCode::Gt,
            0x30 => OpCode::SLoad,
            0x31 => OpCode::SStore,
            0x40 => OpCode::Balance,
            0x41 => OpCode::Caller,
            0x42 => OpCode::Value,
            0x43 => OpCode::Timestamp,
            0x44 => OpCode::Number,
            0x50 => OpCode::Syscall,
            other => return Err(VmError::UnknownOpCode(other)),
        })
    }

    pub fn byte(&self) -> u8 {
        match self {
            OpCode::Stop => 0x00,
            OpCode::Push => 0x01,
            OpCode::Pop => 0x02,
            OpCode::Dup => 0x03,
            OpCode::Swap => 0x04,
            OpCode::Add => 0x10,
            OpCode::Sub => 0x11,
            OpCode::Mul => 0x12,
            OpCode::Div => 0x13,
            OpCode::Mod => 0x14,
            OpCode::Jump => 0x20,
            OpCode::JumpI => 0x21,
            OpCode::Eq => 0x22,
            OpCode::Lt => 0x23,
            OpCode::Gt => 0x24,
            OpCode::SLoad => 0x30,
            OpCode::SStore => 0x31,
            OpCode::Balance => 0x40,
            OpCode::Caller => 0x41,
            OpCode::Value => 0x42,
            OpCode::Timestamp => 0x43,
            OpCode::Number => 0x44,
            OpCode::Syscall => 0x50,
        }
    }

    /// Fixed gas cost, deducted before the op executes. Storage costs are
    /// asymmetric: loads are cheap, stores are expensive.
    pub fn gas(&self) -> u64 {
        match self {
            OpCode::Stop => 0,
            OpCode::Push => 3,
            OpCode::Pop => 2,
            OpCode::Dup => 3,
            OpCode::Swap => 3,
            OpCode::Add | OpCode::Sub => 3,
            OpCode::Mul | OpCode::Div | OpCode::Mod => 5,
            OpCode::Jump => 8,
            OpCode::JumpI => 10,
            OpCode::Eq | OpCode::Lt | OpCode::Gt => 3,
            OpCode::SLoad => 20,
            OpCode::SStore => 100,
            OpCode::Balance => 20,
            OpCode::Caller | OpCode::Value | OpCode::Timestamp | OpCode::Number => 2,
            OpCode::Syscall => 40,
        }
    }
}

/// Syscall ids understood by [`OpCode::Syscall`].
pub const SYSCALL_READ_SENSOR: i64 = 1;
pub const SYSCALL_WRITE_ACTUATOR: i64 = 2;

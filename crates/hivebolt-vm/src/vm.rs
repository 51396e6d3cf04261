use tracing::trace;

use hivebolt_core::constants::VM_STACK_CAPACITY;
use hivebolt_core::error::VmError;
use hivebolt_core::types::Capability;
use hivebolt_state::WorldState;

use crate::context::ExecutionContext;
use crate::hardware::HardwareBridge;
use crate::limiter::SyscallLimiter;
use crate::opcode::{OpCode, SYSCALL_READ_SENSOR, SYSCALL_WRITE_ACTUATOR};

/// Result of a completed (non-aborted) contract run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmOutcome {
    pub gas_used: u64,
    pub gas_remaining: u64,
}

/// One contract execution. Borrows the world state, hardware bridge, and
/// rate limiter for the duration of a single transaction; the chain manager
/// snapshots all three beforehand so an abort rolls back cleanly.
pub struct Vm<'a> {
    code: &'a [u8],
    ctx: &'a ExecutionContext,
    state: &'a mut WorldState,
    hardware: &'a mut HardwareBridge,
    limiter: &'a mut SyscallLimiter,
    stack: Vec<i64>,
    pc: usize,
    gas_limit: u64,
    gas: u64,
}

impl<'a> Vm<'a> {
    pub fn new(
        code: &'a [u8],
        gas_limit: u64,
        ctx: &'a ExecutionContext,
        state: &'a mut WorldState,
        hardware: &'a mut HardwareBridge,
        limiter: &'a mut SyscallLimiter,
    ) -> Self {
        Self {
            code,
            ctx,
            state,
            hardware,
            limiter,
            stack: Vec::with_capacity(64),
            pc: 0,
            gas_limit,
            gas: gas_limit,
        }
    }

    /// Run to STOP, the end of the bytecode, or an abort.
    pub fn run(mut self) -> Result<VmOutcome, VmError> {
        while self.pc < self.code.len() {
            let op_pc = self.pc;
            let op = OpCode::from_byte(self.code[op_pc])?;
            self.charge(op)?;
            self.pc += 1;

            trace!(pc = op_pc, op = ?op, gas = self.gas, depth = self.stack.len(), "step");

            match op {
                OpCode::Stop => break,

                OpCode::Push => {
                    let end = self.pc.checked_add(8).filter(|&e| e <= self.code.len());
                    let end = end.ok_or_else(|| {
                        VmError::MalformedBytecode(format!(
                            "truncated PUSH immediate at pc {op_pc}"
                        ))
                    })?;
                    let imm = i64::from_be_bytes(
                        self.code[self.pc..end].try_into().expect("8-byte slice"),
                    );
                    self.pc = end;
                    self.push(imm, op_pc)?;
                }

                OpCode::Pop => {
                    self.pop(op_pc)?;
                }

                OpCode::Dup => {
                    let top = *self
                        .stack
                        .last()
                        .ok_or(VmError::StackUnderflow { pc: op_pc })?;
                    self.push(top, op_pc)?;
                }

                OpCode::Swap => {
                    let len = self.stack.len();
                    if len < 2 {
                        return Err(VmError::StackUnderflow { pc: op_pc });
                    }
                    self.stack.swap(len - 1, len - 2);
                }

                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod => {
                    let b = self.pop(op_pc)?;
                    let a = self.pop(op_pc)?;
                    let result = match op {
                        OpCode::Add => a.wrapping_add(b),
                        OpCode::Sub => a.wrapping_sub(b),
                        OpCode::Mul => a.wrapping_mul(b),
                        OpCode::Div => {
                            if b == 0 {
                                return Err(VmError::DivByZero { pc: op_pc });
                            }
                            a.wrapping_div(b)
                        }
                        OpCode::Mod => {
                            if b == 0 {
                                return Err(VmError::DivByZero { pc: op_pc });
                            }
                            a.wrapping_rem(b)
                        }
                        _ => unreachable!("arithmetic arm"),
                    };
                    self.push(result, op_pc)?;
                }

                OpCode::Jump => {
                    let target = self.pop(op_pc)?;
                    self.jump_to(target, op_pc)?;
                }

                OpCode::JumpI => {
                    let target = self.pop(op_pc)?;
                    let condition = self.pop(op_pc)?;
                    if condition != 0 {
                        self.jump_to(target, op_pc)?;
                    }
                }

                OpCode::Eq | OpCode::Lt | OpCode::Gt => {
                    let b = self.pop(op_pc)?;
                    let a = self.pop(op_pc)?;
                    let result = match op {
                        OpCode::Eq => a == b,
                        OpCode::Lt => a < b,
                        OpCode::Gt => a > b,
                        _ => unreachable!("comparison arm"),
                    };
                    self.push(result as i64, op_pc)?;
                }

                OpCode::SLoad => {
                    let key = self.pop(op_pc)? as u64;
                    let value = self.state.storage_get(&self.ctx.contract, key);
                    self.push(value as i64, op_pc)?;
                }

                OpCode::SStore => {
                    let key = self.pop(op_pc)? as u64;
                    let value = self.pop(op_pc)? as u64;
                    self.state.storage_put(self.ctx.contract, key, value);
                }

                OpCode::Balance => {
                    let handle = self.pop(op_pc)?;
                    let balance = if handle == 0 || handle == self.ctx.contract_handle() {
                        self.state.balance(&self.ctx.contract)
                    } else if handle == self.ctx.caller_handle() {
                        self.state.balance(&self.ctx.caller)
                    } else {
                        0
                    };
                    self.push(balance as i64, op_pc)?;
                }

                OpCode::Caller => {
                    let handle = self.ctx.caller_handle();
                    self.push(handle, op_pc)?;
                }

                OpCode::Value => self.push(self.ctx.value as i64, op_pc)?,
                OpCode::Timestamp => self.push(self.ctx.block_timestamp_ms as i64, op_pc)?,
                OpCode::Number => self.push(self.ctx.block_index as i64, op_pc)?,

                OpCode::Syscall => {
                    let id = self.pop(op_pc)?;
                    self.syscall(id, op_pc)?;
                }
            }
        }

        Ok(VmOutcome {
            gas_used: self.gas_limit - self.gas,
            gas_remaining: self.gas,
        })
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn charge(&mut self, op: OpCode) -> Result<(), VmError> {
        let needed = op.gas();
        if self.gas < needed {
            return Err(VmError::OutOfGas {
                needed,
                remaining: self.gas,
            });
        }
        self.gas -= needed;
        Ok(())
    }

    fn push(&mut self, value: i64, pc: usize) -> Result<(), VmError> {
        if self.stack.len() >= VM_STACK_CAPACITY {
            return Err(VmError::StackOverflow { pc });
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self, pc: usize) -> Result<i64, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow { pc })
    }

    fn jump_to(&mut self, target: i64, pc: usize) -> Result<(), VmError> {
        let target = usize::try_from(target)
            .ok()
            .filter(|&t| t < self.code.len())
            .ok_or_else(|| {
                VmError::MalformedBytecode(format!("jump target {target} out of range at pc {pc}"))
            })?;
        self.pc = target;
        Ok(())
    }

    fn syscall(&mut self, id: i64, pc: usize) -> Result<(), VmError> {
        match id {
            SYSCALL_READ_SENSOR => {
                let sensor_id = self.pop(pc)? as u64;
                if !self
                    .state
                    .has_capability(&self.ctx.contract, &Capability::ReadSensor(sensor_id))
                {
                    return Err(VmError::Unauthorized {
                        syscall: id as u8,
                        device_id: sensor_id,
                    });
                }
                self.limiter.check_and_record(
                    self.ctx.contract,
                    id as u8,
                    self.ctx.block_timestamp_ms,
                )?;
                let reading = self
                    .hardware
                    .read_sensor(sensor_id)
                    .map_err(|_| VmError::InvalidSyscall(id))?;
                self.push(reading as i64, pc)
            }

            SYSCALL_WRITE_ACTUATOR => {
                let device_id = self.pop(pc)? as u64;
                let value = self.pop(pc)? as u64;
                if !self
                    .state
                    .has_capability(&self.ctx.contract, &Capability::WriteActuator(device_id))
                {
                    return Err(VmError::Unauthorized {
                        syscall: id as u8,
                        device_id,
                    });
                }
                self.limiter.check_and_record(
                    self.ctx.contract,
                    id as u8,
                    self.ctx.block_timestamp_ms,
                )?;
                self.hardware
                    .queue(
                        &self.ctx.block_hash,
                        device_id,
                        value,
                        self.ctx.block_timestamp_ms,
                    )
                    .map_err(|_| VmError::InvalidSyscall(id))
            }

            other => Err(VmError::InvalidSyscall(other)),
        }
    }
}

use std::collections::HashMap;

use hivebolt_core::constants::SYSCALL_RATE_WINDOW_MS;
use hivebolt_core::error::VmError;
use hivebolt_core::types::Address;

/// Per-`(contract, syscall)` invocation throttle.
///
/// Times are the *declared block timestamps*, never wall clock: every
/// replica sees the same sequence of timestamps and therefore makes the same
/// allow/deny decisions. Two invocations of the same pair within
/// [`SYSCALL_RATE_WINDOW_MS`] abort the contract.
#[derive(Clone, Debug, Default)]
pub struct SyscallLimiter {
    last_invocation: HashMap<(Address, u8), u64>,
}

impl SyscallLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the window for `(contract, syscall)` at block time `now_ms` and
    /// record the invocation if allowed.
    pub fn check_and_record(
        &mut self,
        contract: Address,
        syscall: u8,
        now_ms: u64,
    ) -> Result<(), VmError> {
        let key = (contract, syscall);
        if let Some(&last) = self.last_invocation.get(&key) {
            if now_ms.saturating_sub(last) < SYSCALL_RATE_WINDOW_MS {
                return Err(VmError::RateLimited {
                    syscall,
                    window_ms: SYSCALL_RATE_WINDOW_MS,
                });
            }
        }
        self.last_invocation.insert(key, now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn second_call_inside_window_is_limited() {
        let mut limiter = SyscallLimiter::new();
        limiter.check_and_record(addr(1), 2, 1000).unwrap();
        assert!(matches!(
            limiter.check_and_record(addr(1), 2, 1999),
            Err(VmError::RateLimited { .. })
        ));
    }

    #[test]
    fn call_at_window_edge_is_allowed() {
        let mut limiter = SyscallLimiter::new();
        limiter.check_and_record(addr(1), 2, 1000).unwrap();
        limiter.check_and_record(addr(1), 2, 2000).unwrap();
    }

    #[test]
    fn pairs_are_independent() {
        let mut limiter = SyscallLimiter::new();
        limiter.check_and_record(addr(1), 2, 1000).unwrap();
        limiter.check_and_record(addr(1), 1, 1000).unwrap();
        limiter.check_and_record(addr(2), 2, 1000).unwrap();
    }
}

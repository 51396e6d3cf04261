/// Single-step difficulty retarget.
///
/// Compares the actual time the last adjustment window took against the
/// expected `interval × target_block_time`: twice too fast steps up by one,
/// twice too slow steps down by one (floor 1), anything in between leaves
/// the difficulty alone. Inputs are block timestamps, so every replica
/// computes the identical result.
pub fn retarget(current: u32, actual_span_ms: u64, expected_span_ms: u64) -> u32 {
    if actual_span_ms < expected_span_ms / 2 {
        current.saturating_add(1)
    } else if actual_span_ms > expected_span_ms.saturating_mul(2) {
        current.saturating_sub(1).max(1)
    } else {
        current
    }
}

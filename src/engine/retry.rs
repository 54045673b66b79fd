//! Retry policy.
//!
//! Pure functions over the node's retry configuration: no clocks, no state.
//! The initial invocation of a step is attempt 0 and never counts against
//! the policy; retries are numbered from 1.

use std::time::Duration;

use crate::workflow::{BackoffType, RetryConfig};

/// Whether retry number `attempt` (1-based) is authorized.
pub fn should_retry(attempt: u32, max_attempts: u32) -> bool {
    attempt >= 1 && attempt <= max_attempts
}

/// Delay to wait before retry number `attempt` (1-based).
///
/// Fixed: base. Linear: base × attempt. Exponential: base × 2^(attempt−1).
/// The exponential shift saturates so pathological attempt counts cannot
/// overflow.
pub fn delay_for(attempt: u32, config: &RetryConfig) -> Duration {
    let base = config.base_delay_ms;
    let ms = match config.backoff {
        BackoffType::Fixed => base,
        BackoffType::Linear => base.saturating_mul(attempt as u64),
        BackoffType::Exponential => {
            let shift = attempt.saturating_sub(1).min(20);
            base.saturating_mul(1u64 << shift)
        }
    };
    Duration::from_millis(ms)
}

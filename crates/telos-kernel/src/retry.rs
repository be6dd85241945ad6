//! Retry policies.
//!
//! Delay arithmetic shared by the tool registry (`telos-foundation`) and
//! the queue's requeue backoff (`telos-runtime`). The async retry driver
//! lives next to the tool registry in `telos-foundation`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Base delay curve between attempts, before jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay every attempt.
    Fixed { delay_ms: u64 },
    /// Delay grows linearly: `base_ms * (attempt + 1)`.
    Linear { base_ms: u64 },
    /// Delay doubles per attempt, capped at `max_ms`.
    ExponentialBackoff { base_ms: u64, max_ms: u64 },
}

impl RetryPolicy {
    /// The undithered delay before the given retry attempt (0-indexed).
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let ms = match self {
            Self::Fixed { delay_ms } => *delay_ms,
            Self::Linear { base_ms } => base_ms.saturating_mul(attempt as u64 + 1),
            Self::ExponentialBackoff { base_ms, max_ms } => {
                // the doubling factor saturates long before the shift
                // could overflow
                let doublings = attempt.min(32) as u32;
                base_ms.saturating_mul(1u64 << doublings).min(*max_ms)
            }
        };
        Duration::from_millis(ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed { delay_ms: 1_000 }
    }
}

/// Attempt budget, delay curve, and jitter switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts (1 = no retry).
    pub max_attempts: usize,
    pub policy: RetryPolicy,
    /// Dither each sleep uniformly across the upper half of the base
    /// delay, so concurrent retries spread out instead of stampeding.
    /// The policy cap is never exceeded.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            policy: RetryPolicy::default(),
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter.
    pub fn exponential(max_attempts: usize, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts,
            policy: RetryPolicy::ExponentialBackoff { base_ms, max_ms },
            jitter: true,
        }
    }

    /// A single attempt, no retry. Applied to non-idempotent tools.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            policy: RetryPolicy::Fixed { delay_ms: 0 },
            jitter: false,
        }
    }

    /// The sleep before the given retry attempt, jitter applied.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.policy.base_delay(attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let base_ms = base.as_millis() as u64;
        let floor = base_ms / 2;
        let dithered = rand::thread_rng().gen_range(floor..=base_ms);
        Duration::from_millis(dithered)
    }
}

//! Retry and timeout policy for login attempts
//!
//! Backoff before retry `n` (0-based) is `base * factor^n`, scaled by a random
//! factor in `[1 - jitter, 1 + jitter]`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Longest accepted session timeout, one day
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Login retry/timeout policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginPolicy {
    /// Total driver attempts, including the first
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub backoff_factor: f64,
    /// Relative jitter, 0.2 means +/-20%
    pub jitter: f64,
    /// Hard limit across all attempts and backoff sleeps
    pub timeout_secs: u64,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 1000,
            backoff_factor: 2.0,
            jitter: 0.2,
            timeout_secs: 30,
        }
    }
}

impl LoginPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err("backoff_factor must be at least 1.0".to_string());
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err("jitter must be in [0, 1)".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be greater than 0".to_string());
        }
        if self.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(format!("timeout_secs must be at most {}", MAX_TIMEOUT_SECS));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Session deadline for a session starting at `start`
    ///
    /// Clamped to [`MAX_TIMEOUT_SECS`] so an unvalidated policy cannot
    /// overflow the clock.
    pub fn deadline_from(&self, start: Instant) -> Instant {
        let timeout = self.timeout().min(Duration::from_secs(MAX_TIMEOUT_SECS));
        start.checked_add(timeout).unwrap_or(start)
    }

    /// Un-jittered delay before retry `retry_index`
    pub fn nominal_backoff(&self, retry_index: u32) -> Duration {
        let exp = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let ms = self.base_backoff_ms as f64 * self.backoff_factor.powi(exp);
        // Capped at the total timeout; anything longer is cut off by the deadline anyway
        let cap = self.timeout().as_millis() as f64;
        Duration::from_millis(ms.min(cap) as u64)
    }

    /// Jittered delay before retry `retry_index`
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let nominal = self.nominal_backoff(retry_index);
        if self.jitter <= 0.0 {
            return nominal;
        }
        let scale = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        nominal.mul_f64(scale)
    }
}

//! Reconnect policy for session lifecycle management
//!
//! Decides whether another reconnect attempt is allowed and how long the
//! supervisor waits before issuing it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection policy configuration
///
/// Controls how reconnection attempts are made when a connect fails or an
/// open connection is closed by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Maximum number of reconnection attempts per `start` (default: 3)
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt in milliseconds (default: 2000ms)
    pub delay_ms: u64,
    /// Backoff multiplier applied per attempt (default: 1.0, fixed delay)
    pub backoff_multiplier: f64,
    /// Upper bound for the delay in milliseconds (default: 30000ms)
    pub max_delay_ms: u64,
    /// Reset the attempt counter after a successful reconnect (default: false)
    pub reset_on_connect: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
            backoff_multiplier: 1.0,
            max_delay_ms: 30000,
            reset_on_connect: false,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed-delay policy with the given bound
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Policy that never reconnects
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Create a policy with aggressive reconnection (for low-latency scenarios)
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 10,
            delay_ms: 100,
            backoff_multiplier: 1.5,
            max_delay_ms: 5000,
            reset_on_connect: true,
        }
    }

    /// Create a policy with conservative reconnection (for stable connections)
    pub fn conservative() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 2000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60000,
            reset_on_connect: false,
        }
    }

    /// Delay to wait before the next attempt, given how many attempts were
    /// already made since `start`.
    ///
    /// A multiplier of 1.0 (or below) keeps the delay fixed.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        if self.backoff_multiplier <= 1.0 {
            return Duration::from_millis(self.delay_ms);
        }

        let exponent = attempts_made.min(i32::MAX as u32) as i32;
        let delay_ms = (self.delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let delay_ms = delay_ms.min(self.max_delay_ms as f64);

        Duration::from_millis(delay_ms as u64)
    }

    /// Check if another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Validate policy parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnect backoff_multiplier must be a positive number, got {}",
                self.backoff_multiplier
            )));
        }

        if self.max_delay_ms < self.delay_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnect max_delay_ms ({}) must not be below delay_ms ({})",
                self.max_delay_ms, self.delay_ms
            )));
        }

        Ok(())
    }
}

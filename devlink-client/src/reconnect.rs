//! Reconnection policy
//!
//! When a connection attempt fails or an open connection drops, the manager
//! asks the [`ReconnectPolicy`] what to do next. The policy owns the attempt
//! counter and the auto-reconnect switch; a pluggable
//! [`ReconnectionStrategy`] only decides how long to wait before a given
//! attempt.
//!
//! # Built-in strategies
//!
//! - **ExponentialBackoff**: `min(base * 2^attempt, cap)`, optionally reduced
//!   by up to 25% jitter (the default)
//! - **FixedDelay**: the same delay before every attempt
//!
//! # Examples
//!
//! ```rust
//! use devlink_client::{ExponentialBackoff, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30));
//! assert_eq!(backoff.delay(0), Duration::from_secs(1));
//! assert_eq!(backoff.delay(3), Duration::from_secs(8));
//! assert_eq!(backoff.delay(10), Duration::from_secs(30));
//! ```

use rand::Rng;
use std::time::Duration;

/// Delay schedule between reconnection attempts
///
/// `attempt` counts previous scheduled reconnects since the last successful
/// open, starting at 0.
pub trait ReconnectionStrategy: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with optional subtractive jitter
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: false,
        }
    }

    /// Shave a random 0–25% off each delay so clients that lost the same
    /// server do not retry in lockstep
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Un-jittered delay for `attempt`
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30)).with_jitter()
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        if !self.jitter || nominal.is_zero() {
            return nominal;
        }
        let shave = rand::thread_rng().gen_range(0.0..=0.25);
        nominal.mul_f64(1.0 - shave).min(self.cap)
    }
}

/// Constant delay before every attempt
#[derive(Debug, Clone, PartialEq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// What to do after a connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then open again; `attempt` is 1-based
    Retry { attempt: u32, delay: Duration },
    /// The attempt ceiling was reached
    Exhausted { attempts: u32 },
    /// Auto-reconnect is off
    Disabled,
}

/// Attempt counter plus strategy
pub struct ReconnectPolicy {
    strategy: Box<dyn ReconnectionStrategy>,
    max_attempts: u32,
    attempts: u32,
    auto_reconnect: bool,
    next_delay: Option<Duration>,
}

impl ReconnectPolicy {
    pub fn new(strategy: Box<dyn ReconnectionStrategy>, max_attempts: u32) -> Self {
        Self {
            strategy,
            max_attempts,
            attempts: 0,
            auto_reconnect: true,
            next_delay: None,
        }
    }

    /// Consume one failure
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if !self.auto_reconnect {
            self.next_delay = None;
            return ReconnectDecision::Disabled;
        }
        if self.attempts >= self.max_attempts {
            self.next_delay = None;
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        let delay = self.strategy.delay(self.attempts);
        self.attempts += 1;
        self.next_delay = Some(delay);
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay,
        }
    }

    /// Back to zero after a successful open or a manual reconnect
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = None;
    }

    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
        if !enabled {
            self.next_delay = None;
        }
    }

    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl std::fmt::Debug for ReconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectPolicy")
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.max_attempts)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("next_delay", &self.next_delay)
            .finish()
    }
}

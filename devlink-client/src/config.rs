//! Client configuration
//!
//! [`ClientConfig`] is the serializable form of every tunable the connection
//! manager has. Durations are stored as integer milliseconds so the config
//! reads naturally from JSON files; the accessor methods hand out
//! [`Duration`]s. Every field has a default, so a partial document is valid:
//!
//! ```rust
//! use devlink_client::ClientConfig;
//!
//! let config = ClientConfig::from_json(r#"{
//!     "call_timeout_ms": 5000,
//!     "reconnect": { "max_attempts": 3 },
//!     "polling": { "mode": "always" }
//! }"#).unwrap();
//!
//! assert_eq!(config.call_timeout().as_secs(), 5);
//! assert_eq!(config.reconnect.max_attempts, 3);
//! assert_eq!(config.health.liveness_method, "ping");
//! ```

use crate::health::HealthScoring;
use crate::polling::PollingMode;
use crate::reconnect::{ExponentialBackoff, ReconnectionStrategy};
use devlink_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Default per-call timeout
    pub call_timeout_ms: u64,

    /// Upper bound on a single open attempt
    pub connect_timeout_ms: u64,

    pub auto_reconnect: bool,

    /// Method invoked by `authenticate`
    pub authenticate_method: String,

    pub reconnect: ReconnectConfig,

    pub health: HealthConfig,

    pub polling: PollingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            auto_reconnect: true,
            authenticate_method: "authenticate".to_string(),
            reconnect: ReconnectConfig::default(),
            health: HealthConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        nonzero("call_timeout_ms", self.call_timeout_ms)?;
        nonzero("connect_timeout_ms", self.connect_timeout_ms)?;
        if self.authenticate_method.is_empty() {
            return Err(Error::Config("authenticate_method must not be empty".into()));
        }
        self.reconnect.validate()?;
        self.health.validate()?;
        self.polling.validate()
    }
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Scheduled reconnects before giving up
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Exponential backoff built from these settings
    pub fn strategy(&self) -> Box<dyn ReconnectionStrategy> {
        let backoff = ExponentialBackoff::new(self.base_delay(), self.max_delay());
        if self.jitter {
            Box::new(backoff.with_jitter())
        } else {
            Box::new(backoff)
        }
    }

    fn validate(&self) -> Result<()> {
        nonzero("reconnect.base_delay_ms", self.base_delay_ms)?;
        if self.max_delay_ms < self.base_delay_ms {
            return Err(Error::Config(format!(
                "reconnect.max_delay_ms ({}) is below reconnect.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Liveness probing and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub liveness_method: String,
    /// Consecutive failed probes that count as a lost connection
    pub failure_threshold: u32,
    pub window: usize,
    pub failure_penalty: u8,
    pub excellent_rtt_ms: u64,
    pub unusable_rtt_ms: u64,
    pub staleness_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        let scoring = HealthScoring::default();
        Self {
            enabled: true,
            interval_ms: 15_000,
            liveness_method: "ping".to_string(),
            failure_threshold: 3,
            window: scoring.window,
            failure_penalty: scoring.failure_penalty,
            excellent_rtt_ms: millis(scoring.excellent_rtt),
            unusable_rtt_ms: millis(scoring.unusable_rtt),
            staleness_ms: millis(scoring.staleness),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn scoring(&self) -> HealthScoring {
        HealthScoring {
            window: self.window,
            failure_penalty: self.failure_penalty,
            excellent_rtt: Duration::from_millis(self.excellent_rtt_ms),
            unusable_rtt: Duration::from_millis(self.unusable_rtt_ms),
            staleness: Duration::from_millis(self.staleness_ms),
        }
    }

    fn validate(&self) -> Result<()> {
        nonzero("health.interval_ms", self.interval_ms)?;
        nonzero("health.staleness_ms", self.staleness_ms)?;
        if self.window == 0 {
            return Err(Error::Config("health.window must be at least 1".into()));
        }
        if self.failure_threshold == 0 {
            return Err(Error::Config("health.failure_threshold must be at least 1".into()));
        }
        if self.liveness_method.is_empty() {
            return Err(Error::Config("health.liveness_method must not be empty".into()));
        }
        if self.excellent_rtt_ms >= self.unusable_rtt_ms {
            return Err(Error::Config(
                "health.excellent_rtt_ms must be below health.unusable_rtt_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Fallback resync scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub mode: PollingMode,
    pub interval_ms: u64,
    /// Excellent quality must hold this long before adaptive polling stops
    pub sustain_ms: u64,
    /// Silence after which adaptive polling restarts
    pub notification_gap_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            mode: PollingMode::Adaptive,
            interval_ms: 5_000,
            sustain_ms: 30_000,
            notification_gap_ms: 60_000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn sustain(&self) -> Duration {
        Duration::from_millis(self.sustain_ms)
    }

    pub fn notification_gap(&self) -> Duration {
        Duration::from_millis(self.notification_gap_ms)
    }

    fn validate(&self) -> Result<()> {
        nonzero("polling.interval_ms", self.interval_ms)?;
        nonzero("polling.notification_gap_ms", self.notification_gap_ms)
    }
}

fn nonzero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::Config(format!("{} must be greater than zero", field)));
    }
    Ok(())
}

//! Connection health scoring
//!
//! The manager issues a liveness call every `health.interval` while
//! connected and feeds each outcome into a [`HealthMonitor`]. The monitor
//! keeps a bounded window of recent outcomes and derives a 0–100 score:
//!
//! ```text
//! latency   = 100 at or below excellent_rtt, linear to 0 at unusable_rtt
//!             (window average of successful round trips)
//! score     = clamp(latency - failure_penalty * failures_in_window, 0, 100)
//! if the last success is older than `staleness`:
//! score     = score * staleness / time_since_last_success
//! ```
//!
//! A server error response still proves the channel is alive and counts as a
//! success. With liveness probes turned off nothing feeds the monitor, so
//! staleness is not applied and an open channel keeps its full score.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One successful liveness round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSample {
    pub timestamp: Instant,
    pub round_trip: Duration,
}

/// Bucketed view of the health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Unstable,
    Poor,
    Good,
    Excellent,
}

impl ConnectionQuality {
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => ConnectionQuality::Excellent,
            70..=89 => ConnectionQuality::Good,
            30..=69 => ConnectionQuality::Poor,
            _ => ConnectionQuality::Unstable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Poor => "poor",
            ConnectionQuality::Unstable => "unstable",
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring parameters
#[derive(Debug, Clone, PartialEq)]
pub struct HealthScoring {
    pub window: usize,
    pub failure_penalty: u8,
    pub excellent_rtt: Duration,
    pub unusable_rtt: Duration,
    pub staleness: Duration,
}

impl Default for HealthScoring {
    fn default() -> Self {
        Self {
            window: 10,
            failure_penalty: 15,
            excellent_rtt: Duration::from_millis(100),
            unusable_rtt: Duration::from_millis(2000),
            staleness: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Success(HealthSample),
    Failure,
}

/// Rolling health state for the current connection
#[derive(Debug)]
pub struct HealthMonitor {
    scoring: HealthScoring,
    outcomes: VecDeque<Outcome>,
    consecutive_failures: u32,
    last_success: Instant,
    probing: bool,
}

impl HealthMonitor {
    pub fn new(scoring: HealthScoring) -> Self {
        let window = scoring.window.max(1);
        Self {
            scoring: HealthScoring { window, ..scoring },
            outcomes: VecDeque::with_capacity(window),
            consecutive_failures: 0,
            last_success: Instant::now(),
            probing: true,
        }
    }

    /// Whether liveness probes feed this monitor
    pub fn set_probing(&mut self, probing: bool) {
        self.probing = probing;
    }

    pub fn is_probing(&self) -> bool {
        self.probing
    }

    /// Forget all history; a fresh connection starts at full score
    pub fn reset(&mut self, now: Instant) {
        self.outcomes.clear();
        self.consecutive_failures = 0;
        self.last_success = now;
    }

    pub fn record_success(&mut self, round_trip: Duration, now: Instant) {
        self.push(Outcome::Success(HealthSample {
            timestamp: now,
            round_trip,
        }));
        self.consecutive_failures = 0;
        self.last_success = now;
    }

    /// Record a failed probe; returns the consecutive failure count
    pub fn record_failure(&mut self) -> u32 {
        self.push(Outcome::Failure);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Samples currently in the window, oldest first
    pub fn samples(&self) -> Vec<HealthSample> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                Outcome::Success(sample) => Some(*sample),
                Outcome::Failure => None,
            })
            .collect()
    }

    pub fn average_round_trip(&self) -> Option<Duration> {
        let samples = self.samples();
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().map(|s| s.round_trip).sum();
        Some(total / samples.len() as u32)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        self.probing && now.saturating_duration_since(self.last_success) > self.scoring.staleness
    }

    pub fn score(&self, now: Instant) -> u8 {
        let latency = match self.average_round_trip() {
            Some(rtt) => latency_component(rtt, &self.scoring),
            None => 100.0,
        };
        let failures = self
            .outcomes
            .iter()
            .filter(|o| matches!(o, Outcome::Failure))
            .count() as f64;

        let mut score =
            (latency - f64::from(self.scoring.failure_penalty) * failures).clamp(0.0, 100.0);

        if self.is_stale(now) {
            let idle = now.saturating_duration_since(self.last_success);
            score *= self.scoring.staleness.as_secs_f64() / idle.as_secs_f64();
        }

        score.round().clamp(0.0, 100.0) as u8
    }

    pub fn quality(&self, now: Instant) -> ConnectionQuality {
        ConnectionQuality::from_score(self.score(now))
    }

    fn push(&mut self, outcome: Outcome) {
        if self.outcomes.len() == self.scoring.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }
}

fn latency_component(rtt: Duration, scoring: &HealthScoring) -> f64 {
    if rtt <= scoring.excellent_rtt {
        return 100.0;
    }
    if rtt >= scoring.unusable_rtt {
        return 0.0;
    }
    let span = (scoring.unusable_rtt - scoring.excellent_rtt).as_secs_f64();
    let over = (rtt - scoring.excellent_rtt).as_secs_f64();
    100.0 * (1.0 - over / span)
}

//! Polling fallback
//!
//! Push notifications are the primary way the client learns about remote
//! changes. When they cannot be trusted (quality below excellent, or a
//! suspicious silence) the manager additionally runs a resync callback every
//! `polling.interval`. [`PollingFallback`] decides, tick by tick, whether
//! that callback should run.
//!
//! `Adaptive` mode uses hysteresis: it starts active on every new
//! connection, goes quiet only after quality has stayed excellent for the
//! whole `sustain` window, and wakes up again immediately on a quality drop
//! or a notification gap. Waking up restarts the sustain window.

use crate::health::ConnectionQuality;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    /// Never resync on a timer
    Disabled,
    /// Resync while push delivery looks unreliable
    #[default]
    Adaptive,
    /// Resync on every tick
    Always,
}

/// Adaptive on/off state
#[derive(Debug)]
pub struct PollingFallback {
    mode: PollingMode,
    sustain: Duration,
    notification_gap: Duration,
    active: bool,
    excellent_since: Option<Instant>,
    last_notification: Instant,
}

impl PollingFallback {
    pub fn new(mode: PollingMode, sustain: Duration, notification_gap: Duration) -> Self {
        Self {
            mode,
            sustain,
            notification_gap,
            active: mode != PollingMode::Disabled,
            excellent_since: None,
            last_notification: Instant::now(),
        }
    }

    pub fn mode(&self) -> PollingMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PollingMode, now: Instant) {
        self.mode = mode;
        self.reset(now);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start over for a new connection
    pub fn reset(&mut self, now: Instant) {
        self.active = self.mode != PollingMode::Disabled;
        self.excellent_since = None;
        self.last_notification = now;
    }

    pub fn note_notification(&mut self, now: Instant) {
        self.last_notification = now;
    }

    /// Re-evaluate at a tick; returns whether the resync should run
    pub fn evaluate(&mut self, now: Instant, quality: ConnectionQuality) -> bool {
        match self.mode {
            PollingMode::Disabled => {
                self.active = false;
                false
            }
            PollingMode::Always => {
                self.active = true;
                true
            }
            PollingMode::Adaptive => {
                let silent = now.saturating_duration_since(self.last_notification)
                    >= self.notification_gap;

                if quality != ConnectionQuality::Excellent || silent {
                    self.active = true;
                    self.excellent_since = None;
                    return true;
                }

                let since = *self.excellent_since.get_or_insert(now);
                if self.active && now.saturating_duration_since(since) >= self.sustain {
                    self.active = false;
                }
                self.active
            }
        }
    }
}

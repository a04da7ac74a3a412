//! Connection lifecycle state
//!
//! # States
//!
//! - **Disconnected**: initial state, and after an explicit disconnect
//! - **Connecting**: an open attempt is in flight (bounded by the connect
//!   timeout)
//! - **Connected**: the channel is open and accepts calls
//! - **Reconnecting**: waiting out the backoff before the next attempt
//! - **Error**: the reconnect budget ran out, or a failure happened with
//!   auto-reconnect off; terminal until `connect` or `force_reconnect`
//!
//! # Transitions
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──opened──▶ Connected
//!                              │  ▲                    │
//!                      failure │  │ backoff elapsed    │ close / error /
//!                              ▼  │                    │ health failure
//!                          Reconnecting ◀──────────────┘
//!                              │
//!                   max attempts reached
//!                              ▼
//!                            Error
//! ```
//!
//! Only the connection manager's driver writes the state. Observers read it
//! through `watch` ([`crate::ConnectionManager::watch_status`]) or the
//! [`ConnectionEvent`] broadcast stream.

use crate::health::ConnectionQuality;
use serde::Serialize;

/// Current lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt number `attempt` (1-based)
    Reconnecting { attempt: u32 },
    Error { cause: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether the manager is working towards a connection on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error { .. })
    }

    /// Numeric code reported on the connection-state gauge
    pub fn metric_code(&self) -> u64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting { .. } => 3,
            ConnectionState::Error { .. } => 4,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ConnectionState::Error { cause } => write!(f, "error: {}", cause),
        }
    }
}

/// Point-in-time view for UI indicators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionState,
    pub health_score: u8,
    pub quality: ConnectionQuality,
    pub reconnect_attempts: u32,
}

/// Notable things that happened to the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Automatic reconnection gave up
    ReconnectExhausted { attempts: u32 },
    /// An inbound frame could not be interpreted; the session continues
    ProtocolError { reason: String },
    HealthCheckFailed { consecutive_failures: u32 },
    /// The polling fallback switched on or off
    PollingChanged { active: bool },
}

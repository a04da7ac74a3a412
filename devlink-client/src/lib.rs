//! Real-time JSON-RPC 2.0 connection manager for device control
//!
//! This crate keeps one persistent channel to a device-control service and
//! offers request/response calls and server-pushed notifications over it,
//! while the channel itself comes and goes.
//!
//! # Core Features
//!
//! - **Calls**: typed request/response with per-call timeouts and cancellation
//! - **Notifications**: per-method subscriptions, delivered in arrival order
//! - **Auto-Reconnection**: exponential backoff with jitter and an attempt cap
//! - **Health Monitoring**: periodic liveness probes and a 0–100 quality score
//! - **Polling Fallback**: timed resync while push delivery looks unreliable
//! - **Observability**: tracing plus OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use devlink_client::ClientBuilder;
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ClientBuilder::new()
//!         .connect("ws://192.168.1.20:8080/rpc")
//!         .await?;
//!
//!     let status = manager.subscribe("status_update", |params| {
//!         println!("status: {}", params);
//!     });
//!
//!     let devices: Value = manager.call("get_device_list", ()).await?;
//!     println!("devices: {}", devices);
//!
//!     manager
//!         .call_value("set_parameter", json!({"camera": 1, "iso": 800}))
//!         .await?;
//!
//!     status.unsubscribe();
//!     manager.disconnect();
//!     Ok(())
//! }
//! ```

mod client_builder;
mod config;
mod connection_state;
mod health;
mod manager;
mod metrics;
mod notification;
mod polling;
mod reconnect;
mod request;
mod transport;
mod websocket;

pub use client_builder::ClientBuilder;
pub use config::{ClientConfig, HealthConfig, PollingConfig, ReconnectConfig};
pub use connection_state::{ConnectionEvent, ConnectionSnapshot, ConnectionState};
pub use health::{ConnectionQuality, HealthMonitor, HealthSample, HealthScoring};
pub use manager::ConnectionManager;
pub use metrics::ClientMetrics;
pub use notification::{NotificationDispatcher, Subscription, SubscriptionId};
pub use polling::{PollingFallback, PollingMode};
pub use reconnect::{
    ExponentialBackoff, FixedDelay, ReconnectDecision, ReconnectPolicy, ReconnectionStrategy,
};
pub use request::CallHandle;
pub use transport::{Epoch, Transport, TransportEvent, TransportEvents};
pub use websocket::WebSocketTransport;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, ignoring poisoning
///
/// Guarded sections never await and leave their data consistent, so a
/// panicking holder does not invalidate it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

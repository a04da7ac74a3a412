//! Client metrics
//!
//! OpenTelemetry instruments recorded by the connection manager when
//! observability is enabled through
//! [`crate::ClientBuilder::with_observability`]. They go to the global meter
//! provider, so they are exported wherever `init_observability` pointed it.
//!
//! | Instrument                               | Kind      | Attributes         |
//! |------------------------------------------|-----------|--------------------|
//! | `devlink.client.connection.state`        | gauge     |                    |
//! | `devlink.client.calls.total`             | counter   | `method`, `outcome`|
//! | `devlink.client.call.duration`           | histogram | `method`, `outcome`|
//! | `devlink.client.errors.total`            | counter   | `kind`             |
//! | `devlink.client.reconnection.attempts`   | counter   |                    |
//! | `devlink.client.reconnection.success`    | counter   |                    |
//! | `devlink.client.notifications.received`  | counter   | `method`           |
//! | `devlink.client.health.score`            | gauge     |                    |
//! | `devlink.client.resync.total`            | counter   | `outcome`          |

use crate::connection_state::ConnectionState;
use devlink_core::Error;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};
use std::time::Duration;

pub struct ClientMetrics {
    /// 0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=error
    pub connection_state: Gauge<u64>,
    pub calls_total: Counter<u64>,
    /// Seconds from send to settlement
    pub call_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub notifications_received: Counter<u64>,
    pub health_score: Gauge<u64>,
    pub resync_total: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into())
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        Self::new_with_meter(&global::meter_with_scope(scope))
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .u64_gauge("devlink.client.connection.state")
                .with_description(
                    "Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting, 4=error)",
                )
                .build(),
            calls_total: meter
                .u64_counter("devlink.client.calls.total")
                .with_description("Calls issued, by method and outcome")
                .build(),
            call_duration: meter
                .f64_histogram("devlink.client.call.duration")
                .with_description("Time from send to settlement")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("devlink.client.errors.total")
                .with_description("Errors observed, by kind")
                .build(),
            reconnection_attempts: meter
                .u64_counter("devlink.client.reconnection.attempts")
                .with_description("Scheduled reconnect attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("devlink.client.reconnection.success")
                .with_description("Reconnects that reached the connected state")
                .build(),
            notifications_received: meter
                .u64_counter("devlink.client.notifications.received")
                .with_description("Notifications received, by method")
                .build(),
            health_score: meter
                .u64_gauge("devlink.client.health.score")
                .with_description("Connection health score (0-100)")
                .build(),
            resync_total: meter
                .u64_counter("devlink.client.resync.total")
                .with_description("Polling fallback resync runs")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: &ConnectionState) {
        self.connection_state.record(state.metric_code(), &[]);
    }

    pub fn record_call(&self, method: &str, outcome: &Result<serde_json::Value, Error>, elapsed: Duration) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("outcome", outcome_label(outcome)),
        ];
        self.calls_total.add(1, attributes);
        self.call_duration.record(elapsed.as_secs_f64(), attributes);
        if let Err(error) = outcome {
            self.record_error(error_kind(error));
        }
    }

    pub fn record_error(&self, kind: &'static str) {
        self.errors_total.add(1, &[KeyValue::new("kind", kind)]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_health_score(&self, score: u8) {
        self.health_score.record(u64::from(score), &[]);
    }

    pub fn record_resync(&self, ok: bool) {
        let outcome = if ok { "ok" } else { "failed" };
        self.resync_total.add(1, &[KeyValue::new("outcome", outcome)]);
    }
}

fn outcome_label(outcome: &Result<serde_json::Value, Error>) -> &'static str {
    match outcome {
        Ok(_) => "ok",
        Err(error) => error_kind(error),
    }
}

/// Stable label for an error variant
pub(crate) fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::TransportUnavailable(_) => "transport_unavailable",
        Error::CallTimeout { .. } => "timeout",
        Error::ConnectionLost => "connection_lost",
        Error::Protocol(_) => "protocol",
        Error::Remote(_) => "remote",
        Error::ReconnectExhausted { .. } => "reconnect_exhausted",
        Error::Serialization(_) => "serialization",
        Error::Config(_) => "config",
    }
}

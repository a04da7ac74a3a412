//! Builder for configuring a connection manager
//!
//! `ClientBuilder` starts from [`ClientConfig::default`] (or a loaded config)
//! and lets you override reconnection, timeouts, health checks, polling, the
//! transport and observability before building.
//!
//! # Examples
//!
//! ```rust,no_run
//! use devlink_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> devlink_core::Result<()> {
//! // Connect and wait for the first session
//! let manager = ClientBuilder::new()
//!     .with_reconnect(Box::new(ExponentialBackoff::default().with_jitter()))
//!     .call_timeout(Duration::from_secs(5))
//!     .connect("ws://192.168.1.20:8080/rpc")
//!     .await?;
//!
//! // With observability and a resync callback for the polling fallback
//! let manager2 = ClientBuilder::new()
//!     .with_default_observability()
//!     .service_name("camera-console")
//!     .on_resync(|manager| async move {
//!         manager.call_value("get_device_list", serde_json::Value::Null).await?;
//!         Ok(())
//!     })
//!     .build()?;
//! manager2.connect("ws://192.168.1.21:8080/rpc")?;
//! # Ok(())
//! # }
//! ```

use crate::config::{millis, ClientConfig};
use crate::manager::{ConnectionManager, ResyncFn};
use crate::metrics::ClientMetrics;
use crate::polling::PollingMode;
use crate::reconnect::ReconnectionStrategy;
use crate::transport::Transport;
use crate::websocket::WebSocketTransport;
use devlink_core::{Error, ObservabilityConfig, Result};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Builder for configuring and creating a [`ConnectionManager`]
pub struct ClientBuilder {
    config: ClientConfig,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    transport: Option<Arc<dyn Transport>>,
    resync: Option<ResyncFn>,
    observability_config: Option<ObservabilityConfig>,
    metrics: Option<Arc<ClientMetrics>>,
    service_name: Option<String>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Start from a loaded configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            reconnect_strategy: None,
            transport: None,
            resync: None,
            observability_config: None,
            metrics: None,
            service_name: None,
        }
    }

    /// Reconnect automatically using `strategy` for the delays
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self.config.auto_reconnect = true;
        self
    }

    /// Reconnect automatically with exponential backoff from the config
    pub fn with_default_reconnect(mut self) -> Self {
        self.reconnect_strategy = None;
        self.config.auto_reconnect = true;
        self
    }

    /// Never reconnect on its own
    pub fn without_reconnect(mut self) -> Self {
        self.config.auto_reconnect = false;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    /// Default timeout for calls that do not pass their own
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = millis(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.config.health.enabled = true;
        self.config.health.interval_ms = millis(interval);
        self
    }

    pub fn without_health_checks(mut self) -> Self {
        self.config.health.enabled = false;
        self
    }

    pub fn polling_mode(mut self, mode: PollingMode) -> Self {
        self.config.polling.mode = mode;
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.config.polling.interval_ms = millis(interval);
        self
    }

    /// Use a custom transport instead of WebSocket
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Callback the polling fallback runs to re-read remote state
    ///
    /// Without one the polling fallback never runs.
    pub fn on_resync<F, Fut>(mut self, resync: F) -> Self
    where
        F: Fn(ConnectionManager) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback: ResyncFn = Arc::new(move |manager: ConnectionManager| resync(manager).boxed());
        self.resync = Some(callback);
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Record metrics into an existing instrument set without initializing
    /// any exporter
    pub fn with_metrics(mut self, metrics: Arc<ClientMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Create the manager without connecting
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<ConnectionManager> {
        self.config.validate()?;

        let metrics = match self.observability_config {
            Some(mut config) => {
                if let Some(name) = self.service_name {
                    config.service_name = name;
                }
                devlink_core::init_observability(config.clone()).map_err(|e| {
                    Error::Config(format!("failed to initialize observability: {}", e))
                })?;
                Some(Arc::new(ClientMetrics::new(config.service_name)))
            }
            None => self.metrics,
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| self.config.reconnect.strategy());
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::new()),
        };

        ConnectionManager::start(self.config, transport, strategy, self.resync, metrics)
    }

    /// Build, connect to `address`, and wait for the first session
    ///
    /// With auto-reconnect on this keeps trying until the attempt budget runs
    /// out.
    pub async fn connect(self, address: impl Into<String>) -> Result<ConnectionManager> {
        let manager = self.build()?;
        manager.connect(address)?;
        if let Err(e) = manager.wait_until_connected().await {
            manager.dispose();
            return Err(e);
        }
        Ok(manager)
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::FixedDelay;

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::new();

        assert_eq!(builder.config, ClientConfig::default());
        assert!(builder.reconnect_strategy.is_none());
        assert!(builder.transport.is_none());
        assert!(builder.resync.is_none());
        assert!(builder.observability_config.is_none());
        assert!(builder.service_name.is_none());
    }

    #[test]
    fn test_builder_with_reconnect() {
        let strategy = Box::new(FixedDelay::new(Duration::from_secs(1)));
        let builder = ClientBuilder::new()
            .without_reconnect()
            .with_reconnect(strategy);
        assert!(builder.config.auto_reconnect);
        assert!(builder.reconnect_strategy.is_some());
    }

    #[test]
    fn test_builder_without_reconnect() {
        let builder = ClientBuilder::new()
            .with_default_reconnect()
            .without_reconnect();
        assert!(!builder.config.auto_reconnect);
    }

    #[test]
    fn test_builder_overrides_config() {
        let builder = ClientBuilder::new()
            .max_reconnect_attempts(5)
            .call_timeout(Duration::from_millis(250))
            .connect_timeout(Duration::from_secs(2))
            .health_interval(Duration::from_secs(3))
            .polling_mode(PollingMode::Always)
            .polling_interval(Duration::from_secs(1));

        let config = builder.config();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.call_timeout(), Duration::from_millis(250));
        assert_eq!(config.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.health.interval(), Duration::from_secs(3));
        assert_eq!(config.polling.mode, PollingMode::Always);
        assert_eq!(config.polling.interval(), Duration::from_secs(1));

        let builder = builder.without_health_checks();
        assert!(!builder.config().health.enabled);
    }

    #[test]
    fn test_oversized_durations_saturate() {
        let config = ClientBuilder::new()
            .call_timeout(Duration::MAX)
            .polling_interval(Duration::MAX)
            .config()
            .clone();
        assert_eq!(config.call_timeout_ms, u64::MAX);
        assert_eq!(config.polling.interval_ms, u64::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_observability_config() {
        let config = ObservabilityConfig::new("test-client")
            .with_endpoint("http://localhost:4317")
            .with_log_level("debug");

        let builder = ClientBuilder::new().with_observability(config);

        let obs_config = builder.observability_config.unwrap();
        assert_eq!(obs_config.service_name, "test-client");
        assert_eq!(obs_config.log_level, "debug");
    }

    #[test]
    fn test_builder_default_observability() {
        let builder = ClientBuilder::new()
            .with_default_observability()
            .service_name("camera-console");

        assert_eq!(builder.observability_config.unwrap().service_name, "devlink");
        assert_eq!(builder.service_name, Some("camera-console".to_string()));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = ClientBuilder::new()
            .call_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_build_starts_disconnected() {
        let manager = ClientBuilder::new()
            .on_resync(|_| async { Ok(()) })
            .build()
            .unwrap();
        assert_eq!(manager.status(), crate::ConnectionState::Disconnected);
        assert_eq!(manager.polling_mode(), PollingMode::Adaptive);
    }
}

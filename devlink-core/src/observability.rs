//! OpenTelemetry wiring for devlink applications
//!
//! The connection manager emits `tracing` events and spans for every state
//! transition, call, and health probe, and records client metrics through the
//! global meter provider. This module installs the pipeline that ships those
//! to an OTLP collector:
//!
//! - a batch span exporter feeding a `tracing-opentelemetry` layer
//! - a periodic metric reader registered as the global meter provider
//! - a `tracing-subscriber` fmt layer for local output, filtered by `RUST_LOG`
//!
//! Call [`init_observability`] once at startup, before building a client.
//!
//! ```rust,no_run
//! use devlink_core::ObservabilityConfig;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ObservabilityConfig::new("device-console")
//!         .with_endpoint("http://localhost:4317")
//!         .with_log_level("devlink_client=debug,info");
//!
//!     devlink_core::init_observability(config).expect("observability");
//!
//!     // ... connect, call, subscribe ...
//!
//!     devlink_core::shutdown_observability();
//! }
//! ```
//!
//! `OTEL_EXPORTER_OTLP_ENDPOINT` and `RUST_LOG` override the defaults.

use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

// Handles kept for shutdown; the global registry only hands out trait objects.
static TRACER_PROVIDER: Mutex<Option<SdkTracerProvider>> = Mutex::new(None);
static METER_PROVIDER: Mutex<Option<SdkMeterProvider>> = Mutex::new(None);

/// What to export, and where
///
/// Defaults: service name `"devlink"`, the crate version, endpoint from
/// `OTEL_EXPORTER_OTLP_ENDPOINT` (or `http://localhost:4317`), traces and
/// metrics on, JSON log lines, level from `RUST_LOG` (or `info`).
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// `service.name` resource attribute
    pub service_name: String,

    /// `service.version` resource attribute
    pub service_version: String,

    /// OTLP/gRPC collector endpoint
    pub otlp_endpoint: String,

    pub enable_traces: bool,

    pub enable_metrics: bool,

    /// Emit local log lines through the fmt layer
    pub enable_logs: bool,

    /// Structured JSON log lines instead of the human-readable format
    pub json_logs: bool,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "devlink".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            enable_traces: true,
            enable_metrics: true,
            enable_logs: true,
            json_logs: true,
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

impl ObservabilityConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = endpoint.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = version.into();
        self
    }

    pub fn with_traces(mut self, enable: bool) -> Self {
        self.enable_traces = enable;
        self
    }

    pub fn with_metrics(mut self, enable: bool) -> Self {
        self.enable_metrics = enable;
        self
    }

    pub fn with_logs(mut self, enable: bool) -> Self {
        self.enable_logs = enable;
        self
    }

    /// Human-readable log lines, for interactive tools
    pub fn with_pretty_logs(mut self) -> Self {
        self.json_logs = false;
        self
    }

    fn resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes(vec![
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                    self.service_name.clone(),
                ),
                KeyValue::new(
                    opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                    self.service_version.clone(),
                ),
            ])
            .build()
    }
}

/// Install the tracer provider, meter provider, and tracing subscriber
///
/// Fails if an exporter cannot be built, the log filter does not parse, or a
/// global subscriber is already installed.
pub fn init_observability(config: ObservabilityConfig) -> Result<(), BoxError> {
    let tracer = if config.enable_traces {
        Some(init_tracer(&config)?)
    } else {
        None
    };

    if config.enable_metrics {
        init_metrics(&config)?;
    }

    init_tracing_subscriber(&config, tracer)?;

    tracing::info!(
        service_name = %config.service_name,
        otlp_endpoint = %config.otlp_endpoint,
        traces = config.enable_traces,
        metrics = config.enable_metrics,
        logs = config.enable_logs,
        "observability initialized"
    );

    Ok(())
}

fn init_tracer(config: &ObservabilityConfig) -> Result<opentelemetry_sdk::trace::Tracer, BoxError> {
    use opentelemetry::trace::TracerProvider as _;

    let provider = tracer_provider(config)?;
    // The subscriber layer needs the tracer before the provider goes global.
    let tracer = provider.tracer(config.service_name.clone());
    global::set_tracer_provider(provider.clone());
    replace_provider(&TRACER_PROVIDER, provider);

    Ok(tracer)
}

fn tracer_provider(config: &ObservabilityConfig) -> Result<SdkTracerProvider, BoxError> {
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.as_str())
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(config.resource())
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .build())
}

fn init_metrics(config: &ObservabilityConfig) -> Result<(), BoxError> {
    let provider = meter_provider(config)?;
    global::set_meter_provider(provider.clone());
    replace_provider(&METER_PROVIDER, provider);
    Ok(())
}

fn meter_provider(config: &ObservabilityConfig) -> Result<SdkMeterProvider, BoxError> {
    use opentelemetry_sdk::metrics::PeriodicReader;

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.otlp_endpoint.as_str())
        .build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(METRIC_EXPORT_INTERVAL)
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(config.resource())
        .build())
}

fn replace_provider<P>(slot: &Mutex<Option<P>>, provider: P) {
    *slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(provider);
}

fn take_provider<P>(slot: &Mutex<Option<P>>) -> Option<P> {
    slot.lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .take()
}

fn init_tracing_subscriber(
    config: &ObservabilityConfig,
    tracer: Option<opentelemetry_sdk::trace::Tracer>,
) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = if !config.enable_logs {
        None
    } else if config.json_logs {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .json()
                .boxed(),
        )
    } else {
        Some(tracing_subscriber::fmt::layer().with_target(true).boxed())
    };

    let telemetry_layer = tracer.map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Flush and stop telemetry export
///
/// Shuts down the tracer and meter providers installed by
/// [`init_observability`], exporting whatever is still batched. Later calls
/// do nothing.
pub fn shutdown_observability() {
    tracing::info!("observability shutting down");

    if let Some(provider) = take_provider(&TRACER_PROVIDER) {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "tracer provider shutdown failed");
        }
    }
    if let Some(provider) = take_provider(&METER_PROVIDER) {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "meter provider shutdown failed");
        }
    }
}

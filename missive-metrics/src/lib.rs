//! OpenTelemetry metrics for missive
//!
//! Counters and histograms are pushed over OTLP/HTTP to an OpenTelemetry
//! Collector, which can expose them for Prometheus to scrape.
//!
//! ```text
//! missive → OTLP/HTTP → OpenTelemetry Collector → Prometheus (scrape) → Grafana
//! ```
//!
//! Recording sites call [`try_metrics`] and skip the work when metrics are
//! disabled, so nothing here is required for the delivery subsystem to run.

mod config;
mod error;
mod exporter;
mod queue;
mod tracking;

pub use config::MetricsConfig;
pub use error::MetricsError;
use once_cell::sync::OnceCell;
pub use queue::QueueMetrics;
pub use tracking::TrackingMetrics;

static METRICS_INSTANCE: OnceCell<Metrics> = OnceCell::new();

/// Root metrics container
#[derive(Debug)]
pub struct Metrics {
    pub queue: QueueMetrics,
    pub tracking: TrackingMetrics,
}

/// Initialize the metrics system
///
/// Must be called once at startup before any metrics are recorded. A no-op
/// when metrics are disabled in the config.
///
/// # Errors
///
/// Returns an error if the exporter cannot be built or if called twice.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Metrics collection is disabled");
        return Ok(());
    }

    tracing::info!(
        endpoint = %config.endpoint,
        "Initializing OpenTelemetry metrics with OTLP exporter"
    );

    let provider = exporter::init_otlp_exporter(config.endpoint.clone())?;
    opentelemetry::global::set_meter_provider(provider);

    let metrics = Metrics {
        queue: QueueMetrics::new(),
        tracking: TrackingMetrics::new(),
    };

    METRICS_INSTANCE
        .set(metrics)
        .map_err(|_| MetricsError::AlreadyInitialized)?;

    tracing::info!("Metrics collection initialized successfully");

    Ok(())
}

/// The global metrics instance, if [`init_metrics`] installed one.
#[must_use]
pub fn try_metrics() -> Option<&'static Metrics> {
    METRICS_INSTANCE.get()
}

#[must_use]
pub fn is_enabled() -> bool {
    METRICS_INSTANCE.get().is_some()
}

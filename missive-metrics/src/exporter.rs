//! OTLP metrics exporter

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

use crate::MetricsError;

/// Build a meter provider that periodically pushes to `endpoint`.
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be initialized.
pub fn init_otlp_exporter(endpoint: String) -> Result<SdkMeterProvider, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| MetricsError::OpenTelemetry(e.to_string()))?;

    let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter).build();

    Ok(SdkMeterProvider::builder().with_reader(reader).build())
}

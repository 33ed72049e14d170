use serde::Deserialize;

/// Configuration for metrics collection and export
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// When disabled, every recording site is skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP/HTTP endpoint of the OpenTelemetry Collector
    ///
    /// Common values:
    /// - `http://localhost:4318/v1/metrics` (local development)
    /// - `http://otel-collector:4318/v1/metrics` (Docker Compose service name)
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

const fn default_enabled() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
        }
    }
}

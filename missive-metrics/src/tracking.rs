//! Open and click tracking metrics

use opentelemetry::{KeyValue, metrics::Counter};

#[derive(Debug)]
pub struct TrackingMetrics {
    events_total: Counter<u64>,
}

impl TrackingMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("missive.tracking");

        Self {
            events_total: meter
                .u64_counter("missive.tracking.events.total")
                .with_description("Tracking hits by kind and whether they were first, repeat or unknown")
                .build(),
        }
    }

    /// `kind` is `open` or `click`; `outcome` is `first`, `repeat` or `unknown`.
    pub fn record(&self, kind: &'static str, outcome: &'static str) {
        self.events_total.add(
            1,
            &[KeyValue::new("kind", kind), KeyValue::new("outcome", outcome)],
        );
    }
}

impl Default for TrackingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

//! Queue and dispatch metrics
//!
//! - Jobs enqueued by template
//! - Send outcomes (sent, retried, dead-lettered, cancelled)
//! - Dispatch tick durations
//! - Queue size by status, fed from periodic health snapshots

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

const STATUSES: [&str; 5] = ["pending", "processing", "failed", "stuck", "dead_letter"];

#[derive(Debug)]
pub struct QueueMetrics {
    enqueued_total: Counter<u64>,
    sent_total: Counter<u64>,
    retried_total: Counter<u64>,
    dead_lettered_total: Counter<u64>,
    cancelled_total: Counter<u64>,
    tick_duration_seconds: Histogram<f64>,
    tick_sent: Histogram<u64>,

    // Shared with the observable gauge callback, indexed like `STATUSES`
    queue_sizes: Arc<[AtomicU64; 5]>,
}

impl QueueMetrics {
    #[must_use]
    pub fn new() -> Self {
        let meter = meter();

        let queue_sizes: Arc<[AtomicU64; 5]> = Arc::new(Default::default());
        let observed = queue_sizes.clone();

        meter
            .u64_observable_gauge("missive.queue.size")
            .with_description("Current queue size by status")
            .with_callback(move |observer| {
                for (status, size) in STATUSES.iter().zip(observed.iter()) {
                    observer.observe(
                        size.load(Ordering::Relaxed),
                        &[KeyValue::new("status", *status)],
                    );
                }
            })
            .build();

        Self {
            enqueued_total: meter
                .u64_counter("missive.queue.enqueued.total")
                .with_description("Total number of jobs enqueued by template")
                .build(),
            sent_total: meter
                .u64_counter("missive.delivery.sent.total")
                .with_description("Total number of messages accepted by the transport")
                .build(),
            retried_total: meter
                .u64_counter("missive.delivery.retried.total")
                .with_description("Total number of failed attempts rescheduled")
                .build(),
            dead_lettered_total: meter
                .u64_counter("missive.delivery.dead_lettered.total")
                .with_description("Total number of jobs moved to the dead-letter table")
                .build(),
            cancelled_total: meter
                .u64_counter("missive.delivery.cancelled.total")
                .with_description("Total number of jobs cancelled by reason")
                .build(),
            tick_duration_seconds: meter
                .f64_histogram("missive.dispatch.tick.duration.seconds")
                .with_description("Distribution of dispatch tick durations")
                .build(),
            tick_sent: meter
                .u64_histogram("missive.dispatch.tick.sent")
                .with_description("Messages sent per dispatch tick")
                .build(),
            queue_sizes,
        }
    }

    pub fn record_enqueued(&self, template: &str) {
        self.enqueued_total
            .add(1, &[KeyValue::new("template", template.to_string())]);
    }

    pub fn record_sent(&self, template: &str) {
        self.sent_total
            .add(1, &[KeyValue::new("template", template.to_string())]);
    }

    pub fn record_retry(&self, attempts: u32) {
        self.retried_total
            .add(1, &[KeyValue::new("attempt", i64::from(attempts))]);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered_total.add(1, &[]);
    }

    pub fn record_cancelled(&self, reason: &str) {
        self.cancelled_total
            .add(1, &[KeyValue::new("reason", reason.to_string())]);
    }

    pub fn record_tick(&self, duration_secs: f64, sent: u64) {
        self.tick_duration_seconds.record(duration_secs, &[]);
        self.tick_sent.record(sent, &[]);
    }

    /// Set the absolute size for one of `pending`, `processing`, `failed`,
    /// `stuck` or `dead_letter`. Unknown statuses are ignored.
    pub fn set_queue_size(&self, status: &str, size: u64) {
        if let Some(index) = STATUSES.iter().position(|s| *s == status) {
            self.queue_sizes[index].store(size, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn queue_size(&self, status: &str) -> u64 {
        STATUSES
            .iter()
            .position(|s| *s == status)
            .map_or(0, |index| self.queue_sizes[index].load(Ordering::Relaxed))
    }
}

impl Default for QueueMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn meter() -> Meter {
    opentelemetry::global::meter("missive.queue")
}

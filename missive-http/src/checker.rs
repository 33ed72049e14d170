//! Readiness bookkeeping

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Component readiness shared between the daemon and the probe handlers.
#[derive(Debug)]
pub struct HealthChecker {
    /// The backing store loaded its snapshot
    store_ready: AtomicBool,

    /// The dispatch processor loop is running
    processor_ready: AtomicBool,

    /// Live queue items, refreshed by the daemon
    queue_size: AtomicU64,

    max_queue_size: u64,
}

impl HealthChecker {
    #[must_use]
    pub const fn new(max_queue_size: u64) -> Self {
        Self {
            store_ready: AtomicBool::new(false),
            processor_ready: AtomicBool::new(false),
            queue_size: AtomicU64::new(0),
            max_queue_size,
        }
    }

    pub fn set_store_ready(&self, ready: bool) {
        self.store_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Store readiness updated");
    }

    pub fn set_processor_ready(&self, ready: bool) {
        self.processor_ready.store(ready, Ordering::Relaxed);
        tracing::debug!(ready, "Processor readiness updated");
    }

    pub fn set_queue_size(&self, size: u64) {
        self.queue_size.store(size, Ordering::Relaxed);
    }

    /// Answering at all is proof of life
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        let status = self.status();
        status.ready
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let store_ready = self.store_ready.load(Ordering::Relaxed);
        let processor_ready = self.processor_ready.load(Ordering::Relaxed);
        let queue_size = self.queue_size.load(Ordering::Relaxed);

        HealthStatus {
            alive: self.is_alive(),
            ready: store_ready && processor_ready && queue_size < self.max_queue_size,
            store_ready,
            processor_ready,
            queue_size,
            max_queue_size: self.max_queue_size,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub alive: bool,
    pub ready: bool,
    pub store_ready: bool,
    pub processor_ready: bool,
    pub queue_size: u64,
    pub max_queue_size: u64,
}

//! Durable delayed continuations.
//!
//! Campaign and digest batches reschedule themselves by writing a
//! [`ScheduledTick`] row. The processor polls due rows and hands each one
//! back to its orchestrator, so pending work survives a restart.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use missive_common::{Clock, clock::saturating_add};
use missive_store::{BackingStore, ScheduledTick, TickId, TickPayload};

use crate::DeliveryError;

#[derive(Debug, Clone)]
pub struct TickScheduler {
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
}

impl TickScheduler {
    pub fn new(store: Arc<dyn BackingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn schedule_in(
        &self,
        delay: Duration,
        payload: TickPayload,
    ) -> Result<TickId, DeliveryError> {
        self.schedule_at(saturating_add(self.clock.now(), delay), payload).await
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn schedule_at(
        &self,
        due_at: DateTime<Utc>,
        payload: TickPayload,
    ) -> Result<TickId, DeliveryError> {
        Ok(self.store.schedule_tick(due_at, payload).await?)
    }

    /// Drop every pending tick carrying exactly `payload`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn cancel(&self, payload: &TickPayload) -> Result<usize, DeliveryError> {
        Ok(self.store.cancel_ticks(payload).await?)
    }

    /// Remove and return up to `limit` due ticks, earliest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn take_due(&self, limit: usize) -> Result<Vec<ScheduledTick>, DeliveryError> {
        Ok(self.store.take_due_ticks(self.clock.now(), limit).await?)
    }

    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn pending(&self) -> Result<Vec<ScheduledTick>, DeliveryError> {
        Ok(self.store.list_ticks().await?)
    }
}

//! Bounce bookkeeping.
//!
//! Every bounce is stored; once a recipient collects `max_bounces` hard
//! bounces the directory is told to mark them `bounced`, which stops all
//! further mail to them through the eligibility check.

use std::sync::Arc;

use missive_common::{Clock, RecipientId, RecipientStatus, internal};
use missive_store::{BackingStore, BounceKind, BounceRecord};
use serde::Deserialize;

use crate::{DeliveryError, recipient::RecipientDirectory};

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BounceConfig {
    /// Hard bounces before a recipient is marked bounced.
    ///
    /// Default: 3
    #[serde(default = "default_max_bounces")]
    pub max_bounces: usize,
}

impl Default for BounceConfig {
    fn default() -> Self {
        Self {
            max_bounces: default_max_bounces(),
        }
    }
}

const fn default_max_bounces() -> usize {
    3
}

#[derive(Debug, Clone)]
pub struct BounceHandler {
    store: Arc<dyn BackingStore>,
    directory: Arc<dyn RecipientDirectory>,
    clock: Arc<dyn Clock>,
    config: BounceConfig,
}

impl BounceHandler {
    pub fn new(
        store: Arc<dyn BackingStore>,
        directory: Arc<dyn RecipientDirectory>,
        clock: Arc<dyn Clock>,
        config: BounceConfig,
    ) -> Self {
        Self {
            store,
            directory,
            clock,
            config,
        }
    }

    /// Store a bounce. Returns `true` when this bounce flipped the recipient
    /// to `bounced`.
    ///
    /// # Errors
    ///
    /// Propagates store and directory failures.
    pub async fn record(
        &self,
        recipient_id: RecipientId,
        kind: BounceKind,
        reason: &str,
    ) -> Result<bool, DeliveryError> {
        let record = BounceRecord {
            recipient_id,
            kind,
            reason: reason.to_string(),
            recorded_at: self.clock.now(),
        };

        let hard = self.store.record_bounce(&record).await?;
        internal!(
            level = INFO,
            "Recorded {kind:?} bounce for recipient {recipient_id} ({hard} hard)"
        );

        if kind != BounceKind::Hard || hard != self.config.max_bounces {
            return Ok(false);
        }

        self.directory
            .set_status(recipient_id, RecipientStatus::Bounced)
            .await?;
        internal!(
            level = WARN,
            "Recipient {recipient_id} marked bounced after {hard} hard bounces"
        );

        Ok(true)
    }
}

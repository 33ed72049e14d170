//! Open and click tracking.
//!
//! Sent bodies are instrumented with a signed open pixel and signed click
//! redirects. Each identifier maps to one stored [`TrackingEvent`] row which
//! fires at most once; repeat hits are accepted but change nothing.

pub mod instrument;
pub mod signer;

use std::sync::Arc;

use missive_common::{Clock, internal};
use missive_store::{BackingStore, FireOutcome, QueueItem, TrackingEvent, TrackingKind};
use serde::Deserialize;

pub use signer::{TrackingSigner, is_well_formed};

use crate::DeliveryError;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Instrument outgoing bodies with tracking links.
    ///
    /// Default: true
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// HMAC key for tracking identifiers. Required when tracking is enabled.
    #[serde(default)]
    pub secret: String,

    /// Public URL of the tracking endpoint, without a trailing slash
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Where unknown or malformed click identifiers are sent
    #[serde(default = "defaults::home_url")]
    pub home_url: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            secret: String::new(),
            base_url: defaults::base_url(),
            home_url: defaults::home_url(),
        }
    }
}

mod defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub fn base_url() -> String {
        "https://letters.example".to_string()
    }

    pub fn home_url() -> String {
        "https://letters.example/".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// First open for this identifier.
    Recorded,
    /// Already recorded earlier.
    Repeat,
    /// No open row carries this identifier.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// First click, redirect to the stored URL.
    First(String),
    /// Already recorded earlier, still redirect to the stored URL.
    Repeat(String),
    /// Unknown identifier, redirect to the home URL.
    Home(String),
}

impl ClickOutcome {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::First(url) | Self::Repeat(url) | Self::Home(url) => url,
        }
    }
}

#[derive(Debug)]
pub struct Tracker {
    config: TrackingConfig,
    signer: Option<TrackingSigner>,
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    /// # Errors
    ///
    /// Fails when tracking is enabled without a secret.
    pub fn new(
        config: TrackingConfig,
        store: Arc<dyn BackingStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DeliveryError> {
        let signer = if config.enabled {
            Some(TrackingSigner::new(config.secret.as_bytes())?)
        } else {
            None
        };

        Ok(Self {
            config,
            signer,
            store,
            clock,
        })
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.signer.is_some()
    }

    #[must_use]
    pub fn home_url(&self) -> &str {
        &self.config.home_url
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    #[must_use]
    pub fn open_url(&self, id: &str) -> String {
        format!("{}/?track=open&id={id}", self.base())
    }

    #[must_use]
    pub fn click_url(&self, id: &str) -> String {
        format!("{}/?track=click&id={id}", self.base())
    }

    /// Add the open pixel and click redirects to `body`, persisting one
    /// tracking row per identifier. Returns `body` unchanged when tracking
    /// is disabled.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn instrument(&self, body: &str, item: &QueueItem) -> Result<String, DeliveryError> {
        let Some(signer) = &self.signer else {
            return Ok(body.to_string());
        };

        let now = self.clock.now();
        let prefix = format!("{}/", self.base());
        let mut rows = Vec::new();

        let rewritten = instrument::rewrite_links(body, |url| {
            if !instrument::is_trackable(url, &prefix) {
                return None;
            }

            let id = signer.sign(TrackingKind::Click, &item.id, item.recipient_id, Some(url));
            let tracked = self.click_url(&id);
            rows.push(TrackingEvent {
                id,
                kind: TrackingKind::Click,
                item_id: item.id,
                recipient_id: item.recipient_id,
                url: Some(url.to_string()),
                fired: false,
                fired_at: None,
                created_at: now,
            });
            Some(tracked)
        });

        let open_id = signer.sign(TrackingKind::Open, &item.id, item.recipient_id, None);
        let pixel = format!(
            "<img src=\"{}\" width=\"1\" height=\"1\" alt=\"\" style=\"display:none\" />",
            self.open_url(&open_id)
        );
        rows.push(TrackingEvent {
            id: open_id,
            kind: TrackingKind::Open,
            item_id: item.id,
            recipient_id: item.recipient_id,
            url: None,
            fired: false,
            fired_at: None,
            created_at: now,
        });

        for row in &rows {
            self.store.insert_tracking(row).await?;
        }

        internal!(
            level = DEBUG,
            "Instrumented item {} with {} tracking rows",
            item.id,
            rows.len()
        );

        Ok(instrument::insert_pixel(&rewritten, &pixel))
    }

    /// # Errors
    ///
    /// Propagates store failures.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn record_open(&self, id: &str) -> Result<OpenOutcome, DeliveryError> {
        if !is_well_formed(id) || !self.has_kind(id, TrackingKind::Open).await? {
            record_metric("open", "unknown");
            return Ok(OpenOutcome::Unknown);
        }

        let outcome = match self.store.fire_tracking(id, self.clock.now()).await? {
            FireOutcome::Unknown => OpenOutcome::Unknown,
            FireOutcome::First(_) => OpenOutcome::Recorded,
            FireOutcome::Repeat(_) => OpenOutcome::Repeat,
        };

        record_metric("open", open_label(outcome));
        Ok(outcome)
    }

    /// Resolve a click identifier to its redirect target.
    ///
    /// Only stored URLs are ever returned; anything else goes home.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve_click(&self, id: &str) -> Result<ClickOutcome, DeliveryError> {
        let home = || ClickOutcome::Home(self.config.home_url.clone());

        if !is_well_formed(id) || !self.has_kind(id, TrackingKind::Click).await? {
            record_metric("click", "unknown");
            return Ok(home());
        }

        let outcome = match self.store.fire_tracking(id, self.clock.now()).await? {
            FireOutcome::Unknown => home(),
            FireOutcome::First(event) => event.url.map_or_else(home, ClickOutcome::First),
            FireOutcome::Repeat(event) => event.url.map_or_else(home, ClickOutcome::Repeat),
        };

        record_metric(
            "click",
            match outcome {
                ClickOutcome::First(_) => "first",
                ClickOutcome::Repeat(_) => "repeat",
                ClickOutcome::Home(_) => "unknown",
            },
        );
        Ok(outcome)
    }

    async fn has_kind(&self, id: &str, kind: TrackingKind) -> Result<bool, DeliveryError> {
        Ok(self
            .store
            .get_tracking(id)
            .await?
            .is_some_and(|event| event.kind == kind))
    }
}

const fn open_label(outcome: OpenOutcome) -> &'static str {
    match outcome {
        OpenOutcome::Recorded => "first",
        OpenOutcome::Repeat => "repeat",
        OpenOutcome::Unknown => "unknown",
    }
}

fn record_metric(kind: &'static str, outcome: &'static str) {
    if let Some(metrics) = missive_metrics::try_metrics() {
        metrics.tracking.record(kind, outcome);
    }
}

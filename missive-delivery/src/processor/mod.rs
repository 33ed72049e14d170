//! Dispatch processor orchestration

pub mod scheduled;
pub mod tick;

use std::{sync::Arc, time::Duration};

use missive_common::{Clock, Signal, internal};
use missive_store::BackingStore;
use serde::Deserialize;

pub use tick::TickReport;

use crate::{
    bounce::{BounceConfig, BounceHandler},
    campaign::{CampaignConfig, CampaignOrchestrator, DigestOrchestrator},
    content::ContentSource,
    error::{DeliveryError, SystemError},
    flags::{ControlFlags, SendingConfig},
    pipeline::SendPipeline,
    policy::RetryPolicy,
    queue::{EmailQueue, RetentionPolicy},
    recipient::RecipientDirectory,
    scheduler::TickScheduler,
    template::{SiteConfig, TemplateRegistry},
    tracking::{Tracker, TrackingConfig},
    transport::MailTransport,
};

const fn default_tick_interval() -> u64 {
    60
}

const fn default_scheduled_interval() -> u64 {
    10
}

const fn default_cleanup_interval() -> u64 {
    3600
}

const fn default_batch_limit() -> usize {
    50
}

const fn default_time_budget() -> u64 {
    45
}

const fn default_stuck_timeout() -> u64 {
    600
}

const fn default_scheduled_tick_limit() -> usize {
    20
}

/// Zero would make `tokio::time::interval` panic; treat it as one second.
fn every(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}

/// External collaborators handed to [`DispatchProcessor::init`].
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub store: Arc<dyn BackingStore>,
    pub recipients: Arc<dyn RecipientDirectory>,
    pub content: Arc<dyn ContentSource>,
    pub transport: Arc<dyn MailTransport>,
    pub clock: Arc<dyn Clock>,
}

/// Wired components, built by `init`.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub(crate) queue: EmailQueue,
    pub(crate) pipeline: SendPipeline,
    pub(crate) tracker: Arc<Tracker>,
    pub(crate) scheduler: TickScheduler,
    pub(crate) digests: DigestOrchestrator,
    pub(crate) campaigns: CampaignOrchestrator,
}

/// Drives the queue: dispatch ticks, scheduled continuations and retention
/// sweeps.
///
/// Deserialised from the `processor` section of the configuration, then
/// wired to its collaborators with [`DispatchProcessor::init`].
#[derive(Debug, Deserialize)]
pub struct DispatchProcessor {
    /// How often to run a dispatch tick (in seconds)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// How often to poll for due campaign and digest continuations (in seconds)
    #[serde(default = "default_scheduled_interval")]
    pub scheduled_interval_secs: u64,

    /// How often to run the retention sweep (in seconds)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Maximum items fetched per dispatch tick
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Wall-clock budget for one dispatch tick (in seconds).
    ///
    /// No new item is claimed once the budget is spent; the rest wait for
    /// the next tick.
    #[serde(default = "default_time_budget")]
    pub time_budget_secs: u64,

    /// Processing items untouched for this long are returned to pending
    /// (in seconds)
    #[serde(default = "default_stuck_timeout")]
    pub stuck_timeout_secs: u64,

    /// Maximum scheduled continuations run per poll
    #[serde(default = "default_scheduled_tick_limit")]
    pub scheduled_tick_limit: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub sending: SendingConfig,

    #[serde(default)]
    pub campaign: CampaignConfig,

    #[serde(default)]
    pub bounces: BounceConfig,

    #[serde(default)]
    pub site: SiteConfig,

    #[serde(skip)]
    pub(crate) flags: Arc<ControlFlags>,

    #[serde(skip)]
    pub(crate) runtime: Option<Runtime>,
}

impl Default for DispatchProcessor {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            scheduled_interval_secs: default_scheduled_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            batch_limit: default_batch_limit(),
            time_budget_secs: default_time_budget(),
            stuck_timeout_secs: default_stuck_timeout(),
            scheduled_tick_limit: default_scheduled_tick_limit(),
            retry: RetryPolicy::default(),
            retention: RetentionPolicy::default(),
            tracking: TrackingConfig::default(),
            sending: SendingConfig::default(),
            campaign: CampaignConfig::default(),
            bounces: BounceConfig::default(),
            site: SiteConfig::default(),
            flags: Arc::default(),
            runtime: None,
        }
    }
}

impl DispatchProcessor {
    /// Wire the processor with the built-in templates.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is unusable, such as tracking
    /// enabled without a secret.
    pub fn init(&mut self, collaborators: Collaborators) -> Result<(), DeliveryError> {
        let templates = TemplateRegistry::new(self.site.clone());
        self.init_with_templates(collaborators, templates)
    }

    /// Wire the processor with a caller-supplied template registry.
    ///
    /// # Errors
    ///
    /// See [`DispatchProcessor::init`].
    pub fn init_with_templates(
        &mut self,
        collaborators: Collaborators,
        templates: TemplateRegistry,
    ) -> Result<(), DeliveryError> {
        internal!("Initialising Dispatch Processor ...");

        let Collaborators {
            store,
            recipients,
            content,
            transport,
            clock,
        } = collaborators;

        self.flags = Arc::new(ControlFlags::new(&self.sending));
        let templates = Arc::new(templates);

        let queue = EmailQueue::new(
            store.clone(),
            clock.clone(),
            self.retry.clone(),
            self.flags.clone(),
        );
        let tracker = Arc::new(Tracker::new(
            self.tracking.clone(),
            store.clone(),
            clock.clone(),
        )?);
        let bounces = BounceHandler::new(store.clone(), recipients.clone(), clock.clone(), self.bounces);
        let pipeline = SendPipeline::new(
            queue.clone(),
            recipients.clone(),
            transport,
            tracker.clone(),
            bounces,
            self.sending.from_address.clone(),
        );
        let scheduler = TickScheduler::new(store, clock);
        let digests = DigestOrchestrator::new(
            queue.clone(),
            recipients.clone(),
            content,
            templates.clone(),
            scheduler.clone(),
            self.campaign,
        );
        let campaigns = CampaignOrchestrator::new(
            queue.clone(),
            recipients,
            templates,
            scheduler.clone(),
            self.campaign,
        );

        internal!(
            "Dispatch processor ready: tick={}s, batch={}, budget={}s, stuck={}s, tracking={}",
            self.tick_interval_secs,
            self.batch_limit,
            self.time_budget_secs,
            self.stuck_timeout_secs,
            tracker.is_enabled()
        );

        self.runtime = Some(Runtime {
            queue,
            pipeline,
            tracker,
            scheduler,
            digests,
            campaigns,
        });

        Ok(())
    }

    pub(crate) fn runtime(&self) -> Result<&Runtime, DeliveryError> {
        self.runtime.as_ref().ok_or_else(|| {
            SystemError::NotInitialized(
                "Dispatch processor not initialized. Call init() first.".to_string(),
            )
            .into()
        })
    }

    /// # Errors
    ///
    /// Fails before [`DispatchProcessor::init`].
    pub fn queue(&self) -> Result<&EmailQueue, DeliveryError> {
        Ok(&self.runtime()?.queue)
    }

    /// # Errors
    ///
    /// Fails before [`DispatchProcessor::init`].
    pub fn tracker(&self) -> Result<Arc<Tracker>, DeliveryError> {
        Ok(self.runtime()?.tracker.clone())
    }

    /// # Errors
    ///
    /// Fails before [`DispatchProcessor::init`].
    pub fn pipeline(&self) -> Result<&SendPipeline, DeliveryError> {
        Ok(&self.runtime()?.pipeline)
    }

    /// # Errors
    ///
    /// Fails before [`DispatchProcessor::init`].
    pub fn campaigns(&self) -> Result<&CampaignOrchestrator, DeliveryError> {
        Ok(&self.runtime()?.campaigns)
    }

    /// # Errors
    ///
    /// Fails before [`DispatchProcessor::init`].
    pub fn digests(&self) -> Result<&DigestOrchestrator, DeliveryError> {
        Ok(&self.runtime()?.digests)
    }

    #[must_use]
    pub const fn flags(&self) -> &Arc<ControlFlags> {
        &self.flags
    }

    pub(crate) fn stuck_timeout(&self) -> chrono::Duration {
        i64::try_from(self.stuck_timeout_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Run the dispatch loop
    ///
    /// Runs dispatch ticks, scheduled continuations and retention sweeps on
    /// their own intervals until a shutdown signal arrives. Each stage runs to
    /// completion before the next select, so shutdown never interrupts an
    /// in-flight send; the store is flushed on the way out.
    ///
    /// # Errors
    ///
    /// Returns an error if the processor was not initialised.
    #[tracing::instrument(level = "trace", skip_all)]
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), DeliveryError> {
        internal!("Dispatch processor starting");

        let runtime = self.runtime()?;

        if let Err(e) = runtime.digests.ensure_schedule().await {
            tracing::error!("Unable to arm digest cadences: {e}");
        }

        let mut tick_timer = tokio::time::interval(every(self.tick_interval_secs));
        let mut scheduled_timer = tokio::time::interval(every(self.scheduled_interval_secs));
        let mut cleanup_timer = tokio::time::interval(every(self.cleanup_interval_secs));

        // Skip the first tick to avoid immediate execution
        tick_timer.tick().await;
        scheduled_timer.tick().await;
        cleanup_timer.tick().await;

        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    match self.tick().await {
                        Ok(report) if report.claimed > 0 => {
                            tracing::info!("Dispatch tick: {report:?}");
                        }
                        Ok(_) => {
                            tracing::debug!("Dispatch tick, nothing due");
                        }
                        Err(e) => {
                            tracing::error!("Error running dispatch tick: {e}");
                        }
                    }
                }
                _ = scheduled_timer.tick() => {
                    match self.run_scheduled().await {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Ran {count} scheduled continuations");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!("Error running scheduled continuations: {e}");
                        }
                    }
                }
                _ = cleanup_timer.tick() => {
                    if let Err(e) = runtime.queue.cleanup(&self.retention).await {
                        tracing::error!("Error running retention sweep: {e}");
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Dispatch processor received shutdown signal");
                        }
                        Err(e) => {
                            tracing::error!("Dispatch processor shutdown channel error: {e}");
                        }
                    }
                    break;
                }
            }
        }

        if let Err(e) = runtime.queue.store().flush().await {
            tracing::error!("Failed to flush store on shutdown: {e}");
        }

        internal!("Dispatch processor shutdown complete");
        Ok(())
    }
}

use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use missive_common::{Signal, SystemClock, audit, internal, logging};
use missive_control::{ControlConfig, ControlServer};
use missive_delivery::{Collaborators, DispatchProcessor, QueueAdmin, transport::LogTransport};
use missive_http::{HealthChecker, HttpConfig, HttpServer};
use missive_metrics::MetricsConfig;
use missive_store::StoreConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::{control_handler::MissiveControlHandler, seed::SeedConfig};

/// Top level configuration, and the daemon it describes.
///
/// ```ron
/// Missive (
///     store: (type: "Snapshot", path: "/var/lib/missive/store.bin"),
///     processor: (
///         tick_interval_secs: 60,
///         tracking: (enabled: true, secret: "change-me"),
///     ),
///     control: (socket_path: "/tmp/missive.sock"),
///     http: (listen_address: "[::]:8080"),
/// )
/// ```
#[derive(Default, Deserialize)]
pub struct Missive {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub processor: DispatchProcessor,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audit: audit::AuditConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- Enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    Ok(())
}

/// Keep the readiness probe's queue depth current.
async fn refresh_queue_size(
    admin: Arc<dyn QueueAdmin>,
    checker: Arc<HealthChecker>,
    every: Duration,
    mut shutdown: broadcast::Receiver<Signal>,
) {
    let mut timer = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = timer.tick() => {
                match admin.queue_health().await {
                    Ok(health) => {
                        let depth = health.pending + health.processing;
                        checker.set_queue_size(u64::try_from(depth).unwrap_or(u64::MAX));
                    }
                    Err(e) => tracing::warn!("Unable to refresh queue size: {e}"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

impl Missive {
    /// Run the delivery processor and its control surfaces until shutdown.
    ///
    /// # Errors
    ///
    /// Fails if the store, seed data, metrics exporter or any listener cannot
    /// be set up, or if a service stops with an error.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            store,
            mut processor,
            control,
            http,
            metrics,
            audit,
            seed,
        } = self;

        logging::init();
        audit::init(audit);
        missive_metrics::init_metrics(&metrics)?;

        internal!("Controller running");

        let store = store.open().await?;
        let seeded = seed.load()?;

        processor.init(Collaborators {
            store,
            recipients: seeded.directory,
            content: seeded.content,
            transport: Arc::new(LogTransport),
            clock: Arc::new(SystemClock),
        })?;

        let tracker = processor.tracker()?;
        let tracking_enabled = tracker.is_enabled();
        let refresh_every = Duration::from_secs(processor.tick_interval_secs.max(1));
        let processor = Arc::new(processor);
        let admin: Arc<dyn QueueAdmin> = processor.clone();

        let checker = Arc::new(HealthChecker::new(http.max_queue_size));
        checker.set_store_ready(true);
        checker.set_processor_ready(true);

        let control_server = if control.enabled {
            let handler = Arc::new(MissiveControlHandler::new(admin.clone(), tracking_enabled));
            Some(ControlServer::new(control.socket_path.clone(), handler).with_auth(control.auth))
        } else {
            internal!(level = INFO, "Control socket disabled");
            None
        };

        let http_server = if http.enabled {
            let tracker = tracking_enabled.then_some(tracker);
            Some(HttpServer::new(http, checker.clone(), tracker).await?)
        } else {
            internal!(level = INFO, "HTTP listener disabled");
            None
        };

        let processor_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let control_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let http_shutdown = SHUTDOWN_BROADCAST.subscribe();
        let refresh_shutdown = SHUTDOWN_BROADCAST.subscribe();

        let services = async {
            let (dispatch, control, http, ()) = tokio::join!(
                processor.serve(processor_shutdown),
                async {
                    match &control_server {
                        Some(server) => server.serve(control_shutdown).await,
                        None => Ok(()),
                    }
                },
                async {
                    match http_server {
                        Some(server) => server.serve(http_shutdown).await,
                        None => Ok(()),
                    }
                },
                refresh_queue_size(admin, checker, refresh_every, refresh_shutdown),
            );

            dispatch?;
            control?;
            http?;
            anyhow::Ok(())
        };

        let ret = tokio::select! {
            r = services => r,
            r = shutdown() => r,
        };

        internal!("Shutting down...");

        ret
    }
}

//! HTTP server for probes and tracking

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use missive_common::Signal;
use missive_delivery::Tracker;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::{HealthChecker, HttpConfig, HttpError, tracking};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) checker: Arc<HealthChecker>,
    /// Absent when tracking is switched off; opens still get a pixel
    pub(crate) tracker: Option<Arc<Tracker>>,
}

/// All routes, without a listener.
pub fn router(
    checker: Arc<HealthChecker>,
    tracker: Option<Arc<Tracker>>,
    request_timeout: Duration,
) -> Router {
    Router::new()
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/", get(tracking::query_handler))
        .route("/t/open/{id}", get(tracking::open_handler))
        .route("/t/click/{id}", get(tracking::click_handler))
        .with_state(AppState { checker, tracker })
        .layer(TimeoutLayer::new(request_timeout))
}

pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(
        config: HttpConfig,
        checker: Arc<HealthChecker>,
        tracker: Option<Arc<Tracker>>,
    ) -> Result<Self, HttpError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| HttpError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            tracking = tracker.is_some(),
            "HTTP server bound"
        );

        let router = router(
            checker,
            tracker,
            Duration::from_millis(config.request_timeout_ms),
        );

        Ok(Self { listener, router })
    }

    /// # Errors
    ///
    /// Returns an error if the local address cannot be read.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, HttpError> {
        self.listener
            .local_addr()
            .map_err(|e| HttpError::ServerError(e.to_string()))
    }

    /// Serve until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HttpError> {
        tracing::info!("HTTP server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .map_err(|e| HttpError::ServerError(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn liveness_handler(State(state): State<AppState>) -> Response {
    if state.checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

async fn readiness_handler(State(state): State<AppState>) -> Response {
    let status = state.checker.status();
    if status.ready {
        (StatusCode::OK, "OK").into_response()
    } else {
        tracing::warn!(
            store_ready = status.store_ready,
            processor_ready = status.processor_ready,
            queue_size = status.queue_size,
            max_queue_size = status.max_queue_size,
            "Readiness probe failed"
        );
        (StatusCode::SERVICE_UNAVAILABLE, Json(status)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(checker: HealthChecker) -> State<AppState> {
        State(AppState {
            checker: Arc::new(checker),
            tracker: None,
        })
    }

    #[tokio::test]
    async fn test_liveness_probe_always_passes() {
        let response = liveness_handler(state(HealthChecker::new(100))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_probe_fails_until_ready() {
        let response = readiness_handler(state(HealthChecker::new(100))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let checker = HealthChecker::new(100);
        checker.set_store_ready(true);
        checker.set_processor_ready(true);
        checker.set_queue_size(5);
        let response = readiness_handler(state(checker)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_probe_fails_when_queue_too_large() {
        let checker = HealthChecker::new(100);
        checker.set_store_ready(true);
        checker.set_processor_ready(true);
        checker.set_queue_size(200);

        let response = readiness_handler(state(checker)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

//! HTTP surface for missive
//!
//! # Endpoints
//!
//! - **`/health/live`** - Liveness probe, 200 while the process can answer
//! - **`/health/ready`** - Readiness probe, 200 once the store and processor
//!   are up and the queue is below its threshold
//! - **`/?track=open&id=…`** and **`/t/open/{id}`** - Records an open and
//!   returns a 1x1 transparent GIF
//! - **`/?track=click&id=…`** and **`/t/click/{id}`** - Records a click and
//!   redirects to the stored target, or home for anything unknown
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use missive_http::{HealthChecker, HttpConfig, HttpServer};
//!
//! # async fn example(tracker: Arc<missive_delivery::Tracker>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpConfig::default();
//! let checker = Arc::new(HealthChecker::new(config.max_queue_size));
//! let server = HttpServer::new(config, checker, Some(tracker)).await?;
//! // server.serve(shutdown_receiver).await?;
//! # Ok(())
//! # }
//! ```

mod checker;
mod config;
mod error;
mod server;
mod tracking;

pub use checker::{HealthChecker, HealthStatus};
pub use config::HttpConfig;
pub use error::HttpError;
pub use server::{HttpServer, router};
pub use tracking::TRANSPARENT_GIF;

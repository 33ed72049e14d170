//! Control protocol for managing a running missive instance
//!
//! A Unix domain socket carries length-prefixed bincode frames:
//! - Queue administration (pause, resume, retries, cancellation, health)
//! - Campaign lifecycle (create, start, schedule, stop, cancel)
//! - Digest runs
//! - Liveness and status

pub mod auth;
pub mod client;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod server;

pub use auth::ControlAuthConfig;
pub use client::ControlClient;
pub use error::{ControlError, Result};
pub use protocol::{
    CampaignCommand, DigestCommand, PROTOCOL_VERSION, QueueCommand, Request, RequestCommand,
    Response, ResponseData, ResponsePayload, SystemCommand,
};
pub use server::{CommandHandler, ControlConfig, ControlServer};

/// Default path for the control socket
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/missive.sock";

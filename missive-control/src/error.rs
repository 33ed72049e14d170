//! Error types for control operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    /// I/O error communicating with the control socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    ProtocolDeserialization(#[from] bincode::error::DecodeError),

    #[error("Protocol error: {0}")]
    ProtocolSerialization(#[from] bincode::error::EncodeError),

    /// A frame was malformed, oversized or carried the wrong version
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server returned an error
    #[error("Server error: {0}")]
    ServerError(String),

    /// The request carried a missing or invalid token
    #[error("Unauthorised: {0}")]
    Unauthorised(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid socket path: {0}")]
    InvalidSocketPath(String),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;

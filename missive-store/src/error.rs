//! Error types for the missive-store crate.

use std::io;

use missive_common::QueueItemId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O failed while reading or writing a snapshot.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Queue item not found: {0}")]
    NotFound(QueueItemId),

    #[error("Queue item already exists: {0}")]
    AlreadyExists(QueueItemId),

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Snapshot was written by an incompatible format version.
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for StoreError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(SerializationError::Encode(e))
    }
}

impl From<bincode::error::DecodeError> for StoreError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(SerializationError::Decode(e))
    }
}

//! Typed error handling for the delivery subsystem.
//!
//! - Validation errors reject a job before it ever enters the queue
//! - Eligibility and transport errors are recorded against a job and retried
//! - Store and system errors are internal problems

use missive_common::ParseError;
use missive_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Recipient may not receive this template right now.
    #[error("Recipient not eligible: {0}")]
    Eligibility(String),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Reasons an enqueue request is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unknown template kind: {0}")]
    UnknownTemplate(String),

    #[error("Invalid recipient id: {0}")]
    InvalidRecipient(u64),

    #[error("Priority {0} is outside 1..=10")]
    PriorityOutOfRange(u8),

    #[error("Subject must not be empty")]
    EmptySubject,

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl From<ParseError> for ValidationError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::TemplateKind(kind) => Self::UnknownTemplate(kind),
            other => Self::InvalidIdentifier(other.to_string()),
        }
    }
}

/// Failure reported by the mail transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Timeouts, greylisting, rate limits. Worth retrying.
    #[error("Temporary transport failure: {0}")]
    Temporary(String),

    /// The receiving side rejected the address or message outright.
    #[error("Permanent transport failure: {0}")]
    Permanent(String),
}

impl TransportError {
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Delivery processor not initialized: {0}")]
    NotInitialized(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Errors worth another attempt later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Eligibility(_) | Self::Transport(TransportError::Temporary(_)) | Self::Store(_)
        )
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

use thiserror::Error;

/// Failure to parse one of the shared vocabulary types from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unknown template kind: {0}")]
    TemplateKind(String),

    #[error("Unknown queue status: {0}")]
    QueueStatus(String),

    #[error("Unknown recipient status: {0}")]
    RecipientStatus(String),

    #[error("Unknown cadence: {0}")]
    Cadence(String),

    #[error("Invalid identifier '{value}': {reason}")]
    Identifier { value: String, reason: String },
}

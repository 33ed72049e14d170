//! Audit logging for queue item lifecycle events
//!
//! Structured events for compliance and operator forensics. Recipient
//! addresses can be redacted through [`AuditConfig`].
//!
//! ## Audit Events
//!
//! - `EmailEnqueued`: a job entered the queue
//! - `SendAttempt`: the send pipeline is handing a job to the transport
//! - `SendSuccess`: the transport accepted the message
//! - `SendFailure`: an attempt failed and the job was rescheduled
//! - `DeadLettered`: attempts were exhausted and the job left the queue

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging for queue lifecycle events
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Redact recipient email addresses from audit logs
    #[serde(default)]
    pub redact_recipients: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redact_recipients: false,
        }
    }
}

const fn default_true() -> bool {
    true
}

static AUDIT_CONFIG: std::sync::OnceLock<Arc<AuditConfig>> = std::sync::OnceLock::new();

/// Initialize audit logging with configuration
pub fn init(config: AuditConfig) {
    AUDIT_CONFIG.get_or_init(|| Arc::new(config));
}

#[must_use]
pub fn config() -> Arc<AuditConfig> {
    AUDIT_CONFIG
        .get()
        .cloned()
        .unwrap_or_else(|| Arc::new(AuditConfig::default()))
}

/// Redact email address if redaction is enabled
#[must_use]
pub fn redact_email(email: &str, redact: bool) -> String {
    if redact {
        // Keep domain but redact local part
        if let Some((_, domain)) = email.split_once('@') {
            format!("[REDACTED]@{domain}")
        } else {
            "[REDACTED]".to_string()
        }
    } else {
        email.to_string()
    }
}

pub fn log_enqueued(item_id: &str, recipient_id: u64, template: &str, priority: u8) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "EmailEnqueued",
        item_id = %item_id,
        recipient_id = recipient_id,
        template = %template,
        priority = priority,
        "Audit: Email enqueued"
    );
}

/// Logged once the pipeline has resolved an address and is calling the transport.
pub fn log_send_attempt(item_id: &str, address: &str, attempt: u32) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "SendAttempt",
        item_id = %item_id,
        address = %redact_email(address, config.redact_recipients),
        send_attempt = attempt,
        "Audit: Send attempt"
    );
}

pub fn log_send_success(item_id: &str, address: &str, duration_ms: u128) {
    let config = config();
    if !config.enabled {
        return;
    }

    tracing::event!(
        tracing::Level::INFO,
        event = "SendSuccess",
        item_id = %item_id,
        address = %redact_email(address, config.redact_recipients),
        duration_ms = duration_ms,
        "Audit: Send successful"
    );
}

pub fn log_send_failure(item_id: &str, error: &str, attempts: u32, retry_at: &str) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "SendFailure",
        item_id = %item_id,
        error = %error,
        attempts = attempts,
        retry_at = %retry_at,
        "Audit: Send failed, rescheduled"
    );
}

pub fn log_dead_lettered(item_id: &str, recipient_id: u64, error: &str, attempts: u32) {
    if !config().enabled {
        return;
    }

    tracing::event!(
        tracing::Level::WARN,
        event = "DeadLettered",
        item_id = %item_id,
        recipient_id = recipient_id,
        error = %error,
        attempts = attempts,
        "Audit: Email dead-lettered"
    );
}

//! Mail transport seam.
//!
//! SMTP configuration is deployment-specific; the core only needs something
//! that accepts a rendered message or says why it would not.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use missive_common::{QueueItemId, outgoing};
use parking_lot::Mutex;

use crate::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub item_id: QueueItemId,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

#[async_trait]
pub trait MailTransport: Send + Sync + std::fmt::Debug {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// Accepts everything and logs it. For local runs without a relay.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        outgoing!(
            level = INFO,
            "Delivered {} to {} ({} bytes): {}",
            message.item_id,
            message.to,
            message.html_body.len(),
            message.subject
        );
        Ok(())
    }
}

/// Records every message and replays scripted failures.
///
/// Failures can be scripted per address (returned on every send to it) or
/// queued globally (consumed one per send, in order).
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<OutgoingMessage>>,
    per_address: Mutex<HashMap<String, TransportError>>,
    queued: Mutex<VecDeque<TransportError>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `address` fails with `error`.
    pub fn fail_address(&self, address: impl Into<String>, error: TransportError) {
        self.per_address.lock().insert(address.into(), error);
    }

    /// The next send, whatever its address, fails with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.queued.lock().push_back(error);
    }

    #[must_use]
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        if let Some(error) = self.queued.lock().pop_front() {
            return Err(error);
        }

        if let Some(error) = self.per_address.lock().get(&message.to) {
            return Err(error.clone());
        }

        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: &str) -> OutgoingMessage {
        OutgoingMessage {
            item_id: QueueItemId::generate(),
            from: "letters@example.com".to_string(),
            to: to.to_string(),
            subject: "Hello".to_string(),
            html_body: "<p>Hello</p>".to_string(),
        }
    }

    #[tokio::test]
    async fn memory_transport_replays_failures() {
        let transport = MemoryTransport::new();
        transport.fail_address("gone@example.com", TransportError::Permanent("550".into()));
        transport.fail_next(TransportError::Temporary("421".into()));

        assert_eq!(
            transport.send(&message("ok@example.com")).await,
            Err(TransportError::Temporary("421".into()))
        );
        assert!(transport.send(&message("ok@example.com")).await.is_ok());
        assert!(transport.send(&message("gone@example.com")).await.is_err());

        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.sent()[0].to, "ok@example.com");
    }

    #[tokio::test]
    async fn log_transport_accepts() {
        assert!(LogTransport.send(&message("a@example.com")).await.is_ok());
    }
}

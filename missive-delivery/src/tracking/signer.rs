//! Deterministic tracking identifiers.
//!
//! An identifier is the first 32 hex characters of
//! `HMAC-SHA256(secret, "kind|item_id|recipient_id[|url]")`. The same inputs
//! always produce the same identifier, so re-instrumenting a body never
//! creates duplicate rows.

use std::fmt;

use hmac::{Hmac, Mac};
use missive_common::{QueueItemId, RecipientId};
use missive_store::TrackingKind;
use sha2::Sha256;

use crate::SystemError;

type HmacSha256 = Hmac<Sha256>;

/// Hex characters kept from the full digest
pub const IDENTIFIER_LEN: usize = 32;

#[derive(Clone)]
pub struct TrackingSigner {
    mac: HmacSha256,
}

impl fmt::Debug for TrackingSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrackingSigner([REDACTED])")
    }
}

impl TrackingSigner {
    /// # Errors
    ///
    /// Returns a configuration error when the secret is empty.
    pub fn new(secret: &[u8]) -> Result<Self, SystemError> {
        if secret.is_empty() {
            return Err(SystemError::Configuration(
                "tracking secret must not be empty".to_string(),
            ));
        }

        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| SystemError::Configuration(format!("tracking secret: {e}")))?;

        Ok(Self { mac })
    }

    #[must_use]
    pub fn sign(
        &self,
        kind: TrackingKind,
        item_id: &QueueItemId,
        recipient_id: RecipientId,
        url: Option<&str>,
    ) -> String {
        let mut message = format!("{kind}|{item_id}|{recipient_id}");
        if let Some(url) = url {
            message.push('|');
            message.push_str(url);
        }

        let mut mac = self.mac.clone();
        mac.update(message.as_bytes());
        let mut encoded = hex::encode(mac.finalize().into_bytes());
        encoded.truncate(IDENTIFIER_LEN);
        encoded
    }
}

/// Shape check for identifiers arriving over HTTP before any store lookup.
#[must_use]
pub fn is_well_formed(id: &str) -> bool {
    id.len() == IDENTIFIER_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let signer = TrackingSigner::new(b"secret").unwrap();
        let item = QueueItemId::generate();

        let a = signer.sign(TrackingKind::Open, &item, RecipientId(4), None);
        let b = signer.sign(TrackingKind::Open, &item, RecipientId(4), None);

        assert_eq!(a, b);
        assert_eq!(a.len(), IDENTIFIER_LEN);
        assert!(is_well_formed(&a));
    }

    #[test]
    fn test_inputs_change_identifier() {
        let signer = TrackingSigner::new(b"secret").unwrap();
        let item = QueueItemId::generate();

        let open = signer.sign(TrackingKind::Open, &item, RecipientId(4), None);
        let click = signer.sign(
            TrackingKind::Click,
            &item,
            RecipientId(4),
            Some("https://letters.example/a"),
        );
        let other_url = signer.sign(
            TrackingKind::Click,
            &item,
            RecipientId(4),
            Some("https://letters.example/b"),
        );
        let other_recipient = signer.sign(TrackingKind::Open, &item, RecipientId(5), None);

        assert_ne!(open, click);
        assert_ne!(click, other_url);
        assert_ne!(open, other_recipient);
    }

    #[test]
    fn test_secret_matters() {
        let item = QueueItemId::generate();
        let a = TrackingSigner::new(b"one")
            .unwrap()
            .sign(TrackingKind::Open, &item, RecipientId(1), None);
        let b = TrackingSigner::new(b"two")
            .unwrap()
            .sign(TrackingKind::Open, &item, RecipientId(1), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(TrackingSigner::new(b"").is_err());
    }

    #[test]
    fn test_well_formed() {
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"z".repeat(IDENTIFIER_LEN)));
        assert!(is_well_formed(&"a1".repeat(IDENTIFIER_LEN / 2)));
    }
}

//! Subscribers as seen by the delivery subsystem.
//!
//! Subscriber storage is external and reached through [`RecipientDirectory`].
//! The only write the core ever makes is flipping a recipient to `bounced`.

use ahash::AHashMap;
use async_trait::async_trait;
use mailparse::MailAddr;
use missive_common::{Cadence, RecipientId, RecipientStatus, TemplateKind};
use serde::{Deserialize, Serialize};

use crate::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub secondary_email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    pub status: RecipientStatus,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub frequency: Option<Cadence>,
    #[serde(default)]
    pub digest_opt_in: bool,
    #[serde(default)]
    pub newsletter_opt_in: bool,
    #[serde(default)]
    pub consent_confirmed: bool,
}

impl Recipient {
    fn active_and_verified(&self) -> bool {
        self.status == RecipientStatus::Active && self.verified
    }
}

/// Audience selectors understood by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientFilter {
    /// Opted into digests at this cadence, active and verified, and
    /// consent-confirmed when `require_consent` is set.
    Digest {
        cadence: Cadence,
        require_consent: bool,
    },
    /// Opted into newsletters, active and verified.
    Newsletter,
}

impl RecipientFilter {
    #[must_use]
    pub fn matches(&self, recipient: &Recipient) -> bool {
        match *self {
            Self::Digest {
                cadence,
                require_consent,
            } => {
                recipient.active_and_verified()
                    && recipient.digest_opt_in
                    && recipient.frequency == Some(cadence)
                    && (!require_consent || recipient.consent_confirmed)
            }
            Self::Newsletter => recipient.active_and_verified() && recipient.newsletter_opt_in,
        }
    }
}

#[async_trait]
pub trait RecipientDirectory: Send + Sync + std::fmt::Debug {
    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>, DeliveryError>;

    /// A stable page of recipients matching `filter`, ordered by id.
    async fn page(
        &self,
        filter: RecipientFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recipient>, DeliveryError>;

    async fn count(&self, filter: RecipientFilter) -> Result<usize, DeliveryError>;

    async fn set_status(
        &self,
        id: RecipientId,
        status: RecipientStatus,
    ) -> Result<(), DeliveryError>;
}

/// Recipient lookups memoised for the duration of one dispatch tick.
#[derive(Debug, Default)]
pub struct RecipientCache {
    entries: AHashMap<RecipientId, Option<Recipient>>,
}

impl RecipientCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look `id` up once per tick; later calls reuse the first answer,
    /// including a miss.
    pub async fn get(
        &mut self,
        directory: &dyn RecipientDirectory,
        id: RecipientId,
    ) -> Result<Option<Recipient>, DeliveryError> {
        if let Some(cached) = self.entries.get(&id) {
            return Ok(cached.clone());
        }

        let fetched = directory.get(id).await?;
        self.entries.insert(id, fetched.clone());
        Ok(fetched)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether `recipient` may receive `kind` right now.
///
/// Verification mail only needs an active or pending-verification account;
/// everything else needs an active, verified one.
pub fn check_eligibility(kind: TemplateKind, recipient: &Recipient) -> Result<(), String> {
    if !kind.requires_verified_recipient() {
        return match recipient.status {
            RecipientStatus::Active | RecipientStatus::PendingVerification => Ok(()),
            other => Err(format!(
                "recipient {} is {other}, verification requires active or pending_verification",
                recipient.id
            )),
        };
    }

    if recipient.status != RecipientStatus::Active {
        return Err(format!(
            "recipient {} is {}, not active",
            recipient.id, recipient.status
        ));
    }

    if !recipient.verified {
        return Err(format!("recipient {} is not verified", recipient.id));
    }

    Ok(())
}

/// `true` for a single syntactically valid mailbox (`local@domain.tld`).
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return false;
    }

    let Ok(parsed) = mailparse::addrparse(trimmed) else {
        return false;
    };

    match parsed.iter().collect::<Vec<_>>().as_slice() {
        [MailAddr::Single(single)] => single
            .addr
            .rsplit_once('@')
            .is_some_and(|(local, domain)| {
                !local.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
            }),
        _ => false,
    }
}

/// The address to send to: the canonical one when valid, else a valid
/// secondary address.
#[must_use]
pub fn deliverable_address(recipient: &Recipient) -> Option<String> {
    [&recipient.email, &recipient.secondary_email]
        .into_iter()
        .flatten()
        .find(|address| is_valid_address(address))
        .map(|address| address.trim().to_string())
}

//! In-process recipient directory and content source.
//!
//! Used for local runs seeded from files and as the collaborator fakes in
//! tests. Production deployments implement the traits against their own
//! subscriber and content stores.

use std::collections::BTreeMap;

use async_trait::async_trait;
use missive_common::{ContentId, RecipientId, RecipientStatus};
use parking_lot::RwLock;

use crate::{
    DeliveryError,
    content::{ContentItem, ContentSource},
    recipient::{Recipient, RecipientDirectory, RecipientFilter},
};

#[derive(Debug, Default)]
pub struct MemoryRecipientDirectory {
    recipients: RwLock<BTreeMap<RecipientId, Recipient>>,
}

impl MemoryRecipientDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_recipients(recipients: impl IntoIterator<Item = Recipient>) -> Self {
        let directory = Self::new();
        for recipient in recipients {
            directory.upsert(recipient);
        }
        directory
    }

    pub fn upsert(&self, recipient: Recipient) {
        self.recipients.write().insert(recipient.id, recipient);
    }

    #[must_use]
    pub fn snapshot(&self, id: RecipientId) -> Option<Recipient> {
        self.recipients.read().get(&id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipients.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipients.read().is_empty()
    }
}

#[async_trait]
impl RecipientDirectory for MemoryRecipientDirectory {
    async fn get(&self, id: RecipientId) -> Result<Option<Recipient>, DeliveryError> {
        Ok(self.snapshot(id))
    }

    async fn page(
        &self,
        filter: RecipientFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recipient>, DeliveryError> {
        Ok(self
            .recipients
            .read()
            .values()
            .filter(|recipient| filter.matches(recipient))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: RecipientFilter) -> Result<usize, DeliveryError> {
        Ok(self
            .recipients
            .read()
            .values()
            .filter(|recipient| filter.matches(recipient))
            .count())
    }

    async fn set_status(
        &self,
        id: RecipientId,
        status: RecipientStatus,
    ) -> Result<(), DeliveryError> {
        match self.recipients.write().get_mut(&id) {
            Some(recipient) => {
                recipient.status = status;
                Ok(())
            }
            None => Err(DeliveryError::NotFound(format!("recipient {id}"))),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryContentSource {
    items: RwLock<Vec<ContentItem>>,
}

impl MemoryContentSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let source = Self::new();
        for item in items {
            source.publish(item);
        }
        source
    }

    /// Add or replace a letter, keeping newest-first order.
    pub fn publish(&self, item: ContentItem) {
        let mut items = self.items.write();
        items.retain(|existing| existing.id != item.id);
        items.push(item);
        items.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.id.cmp(&a.id))
        });
    }
}

#[async_trait]
impl ContentSource for MemoryContentSource {
    async fn published(&self, limit: usize) -> Result<Vec<ContentItem>, DeliveryError> {
        Ok(self.items.read().iter().take(limit).cloned().collect())
    }

    async fn get(&self, id: ContentId) -> Result<Option<ContentItem>, DeliveryError> {
        Ok(self.items.read().iter().find(|item| item.id == id).cloned())
    }
}

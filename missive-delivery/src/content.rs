//! Published letters, consumed from the content collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use missive_common::ContentId;
use serde::{Deserialize, Serialize};

use crate::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ContentId,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait ContentSource: Send + Sync + std::fmt::Debug {
    /// Up to `limit` published letters, newest first.
    async fn published(&self, limit: usize) -> Result<Vec<ContentItem>, DeliveryError>;

    async fn get(&self, id: ContentId) -> Result<Option<ContentItem>, DeliveryError>;
}

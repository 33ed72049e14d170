use missive_common::{QueueItemId, RecipientId, TemplateKind};

/// Notification fired by the send pipeline after every outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    Sent {
        item_id: QueueItemId,
        recipient_id: RecipientId,
        template_kind: TemplateKind,
    },
    Failed {
        item_id: QueueItemId,
        recipient_id: RecipientId,
        error: String,
        dead_lettered: bool,
    },
    Cancelled {
        item_id: QueueItemId,
        reason: String,
    },
}

impl DeliveryEvent {
    #[must_use]
    pub const fn item_id(&self) -> QueueItemId {
        match self {
            Self::Sent { item_id, .. }
            | Self::Failed { item_id, .. }
            | Self::Cancelled { item_id, .. } => *item_id,
        }
    }
}

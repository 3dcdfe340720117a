use crate::conversation::conversation_models::Conversation;
use crate::ids::{ConversationId, UserId};
use crate::message::message_models::Message;
use crate::receipt::receipt_models::ReadReceipt;
use crate::unread::unread_models::UnreadCounter;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change published by the backend store after it commits a write.
/// Carries the affected row so consumers can apply it without refetching.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A conversation row was inserted, updated, or deleted.
    Conversation {
        kind: ChangeKind,
        conversation: Conversation,
    },
    /// A message addressed to `recipient` was inserted.
    Message { message: Message, recipient: UserId },
    /// A read receipt was written. Routed to both participants so the
    /// author's open channel can flip its read flags.
    Receipt {
        receipt: ReadReceipt,
        buyer_id: UserId,
        seller_id: UserId,
    },
    /// An unread counter changed. The count is absolute, not a delta.
    Counter { counter: UnreadCounter },
    /// The feed skipped an unknown number of events. Cached state can no
    /// longer be patched forward and must be re-seeded from the store.
    Lagged,
}

impl FeedEvent {
    /// Routing predicate: does this event belong on `user_id`'s feed?
    pub fn concerns(&self, user_id: UserId) -> bool {
        match self {
            FeedEvent::Conversation { conversation, .. } => conversation.is_participant(user_id),
            FeedEvent::Message { recipient, .. } => *recipient == user_id,
            FeedEvent::Receipt {
                buyer_id,
                seller_id,
                ..
            } => *buyer_id == user_id || *seller_id == user_id,
            FeedEvent::Counter { counter } => counter.user_id == user_id,
            // A gap may have swallowed anything, so everyone resyncs.
            FeedEvent::Lagged => true,
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            FeedEvent::Conversation { conversation, .. } => Some(conversation.id),
            FeedEvent::Message { message, .. } => Some(message.conversation_id),
            FeedEvent::Receipt { receipt, .. } => Some(receipt.conversation_id),
            FeedEvent::Counter { counter } => Some(counter.conversation_id),
            FeedEvent::Lagged => None,
        }
    }
}

use crate::ids::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Preview text a conversation shows for its newest message when that
/// message is an image.
pub const IMAGE_PREVIEW: &str = "[Image]";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String, // Text, offer text, or an image reference when is_image
    pub is_image: bool,
    pub is_offer: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// What the conversation list shows as the thread preview.
    pub fn preview(&self) -> &str {
        if self.is_image {
            IMAGE_PREVIEW
        } else {
            &self.content
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    #[validate(length(min = 1))]
    pub content: String,
    pub is_image: bool,
    pub is_offer: bool,
}

impl NewMessage {
    pub fn text(conversation_id: ConversationId, sender_id: UserId, content: String) -> Self {
        Self {
            conversation_id,
            sender_id,
            content,
            is_image: false,
            is_offer: false,
        }
    }

    pub fn offer(conversation_id: ConversationId, sender_id: UserId, content: String) -> Self {
        Self {
            conversation_id,
            sender_id,
            content,
            is_image: false,
            is_offer: true,
        }
    }

    pub fn image(conversation_id: ConversationId, sender_id: UserId, image_ref: String) -> Self {
        Self {
            conversation_id,
            sender_id,
            content: image_ref,
            is_image: true,
            is_offer: false,
        }
    }
}

/// Unsent input belonging to one open conversation. Owned by that
/// conversation's channel, never shared across threads.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageDraft {
    pub text: String,
    pub image: Option<String>, // Staged image reference awaiting send
}

/// A message paired with whether the participant opposite its author has
/// read it.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub message: Message,
    pub read: bool,
}

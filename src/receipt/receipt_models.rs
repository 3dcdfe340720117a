use crate::ids::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How far one participant has read into a conversation. One row per
/// (conversation, user), refreshed in place on every read.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReadReceipt {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
    pub last_read_message_id: Option<MessageId>,
}

impl ReadReceipt {
    /// Whether this receipt covers a message created at `at`. Boundary is
    /// inclusive: a receipt written at the same instant counts as read.
    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.read_at >= at
    }
}

use crate::ids::{ConversationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-conversation unread tally for one participant. Incremented by the
/// store when a message lands, reset to zero when the participant opens
/// the thread.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UnreadCounter {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Badge totals for the conversation list tabs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadTotals {
    pub all: i64,
    pub buying: i64,
    pub selling: i64,
}

impl UnreadTotals {
    pub fn is_zero(&self) -> bool {
        self.all == 0
    }
}

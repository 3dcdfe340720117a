use crate::ids::{ConversationId, MessageId};
use crate::unread::unread_models::UnreadTotals;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A transient, user-visible notification. The embedding app decides how
/// to render it (toast, banner, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Why an open conversation view must be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    /// The viewer deleted the thread, possibly from another view.
    DeletedByMe,
    /// The thread was removed from the store entirely.
    Removed,
}

/// What the engine tells the embedding app. Rendering state is pulled via
/// snapshots; these events only say that something changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The conversation list changed; re-pull it.
    ConversationsChanged,
    /// Unread badge totals changed.
    UnreadChanged(UnreadTotals),
    /// A message was appended to an open conversation.
    MessageAppended {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    /// Read flags in an open conversation may have flipped.
    ReceiptsChanged { conversation_id: ConversationId },
    /// The open conversation view is no longer valid.
    NavigateAway {
        conversation_id: ConversationId,
        reason: LeaveReason,
    },
    /// Show the user a transient notification.
    Notice(Notice),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = SessionEvent::Notice(Notice::error("Message failed to send"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "notice");
        assert_eq!(json["level"], "error");

        let event = SessionEvent::ConversationsChanged;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversations_changed");
    }
}

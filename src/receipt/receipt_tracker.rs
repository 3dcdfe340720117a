use crate::ids::{ConversationId, UserId};
use crate::message::message_models::Message;
use crate::receipt::receipt_models::ReadReceipt;

/// Both participants' receipts for one open conversation. Read flags are
/// derived, never stored: a message counts as read once the participant
/// opposite its author has a receipt at or past its creation time.
pub struct ReceiptTracker {
    conversation_id: ConversationId,
    viewer_id: UserId,
    counterpart_id: UserId,
    viewer_receipt: Option<ReadReceipt>,
    counterpart_receipt: Option<ReadReceipt>,
}

impl ReceiptTracker {
    pub fn new(conversation_id: ConversationId, viewer_id: UserId, counterpart_id: UserId) -> Self {
        Self {
            conversation_id,
            viewer_id,
            counterpart_id,
            viewer_receipt: None,
            counterpart_receipt: None,
        }
    }

    /// Load the initial receipt rows. Rows for other conversations or
    /// other users are ignored.
    pub fn seed(&mut self, receipts: Vec<ReadReceipt>) {
        for receipt in receipts {
            self.apply(receipt);
        }
    }

    /// Apply one receipt write. Returns true when the counterpart's
    /// receipt changed, which is when derived read flags can flip.
    pub fn apply(&mut self, receipt: ReadReceipt) -> bool {
        if receipt.conversation_id != self.conversation_id {
            return false;
        }
        if receipt.user_id == self.counterpart_id {
            let changed = self
                .counterpart_receipt
                .as_ref()
                .map(|current| current.read_at != receipt.read_at)
                .unwrap_or(true);
            self.counterpart_receipt = Some(receipt);
            changed
        } else if receipt.user_id == self.viewer_id {
            self.viewer_receipt = Some(receipt);
            false
        } else {
            false
        }
    }

    /// Derived read flag for a message in this conversation.
    pub fn is_read(&self, message: &Message) -> bool {
        let opposite = if message.sender_id == self.viewer_id {
            self.counterpart_receipt.as_ref()
        } else {
            self.viewer_receipt.as_ref()
        };
        opposite
            .map(|receipt| receipt.covers(message.created_at))
            .unwrap_or(false)
    }

    pub fn viewer_receipt(&self) -> Option<&ReadReceipt> {
        self.viewer_receipt.as_ref()
    }

    pub fn counterpart_receipt(&self) -> Option<&ReadReceipt> {
        self.counterpart_receipt.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn message_at(
        conversation_id: ConversationId,
        sender_id: UserId,
        at: chrono::DateTime<Utc>,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: "hello".to_string(),
            is_image: false,
            is_offer: false,
            created_at: at,
        }
    }

    #[test]
    fn own_message_is_unread_until_the_counterpart_receipt_covers_it() {
        let conversation_id = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let counterpart = Uuid::new_v4();
        let mut tracker = ReceiptTracker::new(conversation_id, viewer, counterpart);

        let sent_at = Utc::now();
        let message = message_at(conversation_id, viewer, sent_at);
        assert!(!tracker.is_read(&message));

        // A receipt from before the message does not cover it.
        tracker.apply(ReadReceipt {
            conversation_id,
            user_id: counterpart,
            read_at: sent_at - Duration::seconds(30),
            last_read_message_id: None,
        });
        assert!(!tracker.is_read(&message));

        // A receipt at exactly the creation instant does.
        let changed = tracker.apply(ReadReceipt {
            conversation_id,
            user_id: counterpart,
            read_at: sent_at,
            last_read_message_id: Some(message.id),
        });
        assert!(changed);
        assert!(tracker.is_read(&message));
    }

    #[test]
    fn inbound_messages_use_the_viewer_receipt() {
        let conversation_id = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let counterpart = Uuid::new_v4();
        let mut tracker = ReceiptTracker::new(conversation_id, viewer, counterpart);

        let sent_at = Utc::now();
        let inbound = message_at(conversation_id, counterpart, sent_at);
        assert!(!tracker.is_read(&inbound));

        tracker.apply(ReadReceipt {
            conversation_id,
            user_id: viewer,
            read_at: sent_at + Duration::seconds(1),
            last_read_message_id: Some(inbound.id),
        });
        assert!(tracker.is_read(&inbound));
    }

    #[test]
    fn receipts_for_other_conversations_are_ignored() {
        let conversation_id = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let counterpart = Uuid::new_v4();
        let mut tracker = ReceiptTracker::new(conversation_id, viewer, counterpart);

        let changed = tracker.apply(ReadReceipt {
            conversation_id: Uuid::new_v4(),
            user_id: counterpart,
            read_at: Utc::now(),
            last_read_message_id: None,
        });
        assert!(!changed);
        assert!(tracker.counterpart_receipt().is_none());
    }

    #[test]
    fn reapplying_the_same_receipt_reports_no_change() {
        let conversation_id = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let counterpart = Uuid::new_v4();
        let mut tracker = ReceiptTracker::new(conversation_id, viewer, counterpart);

        let receipt = ReadReceipt {
            conversation_id,
            user_id: counterpart,
            read_at: Utc::now(),
            last_read_message_id: None,
        };
        assert!(tracker.apply(receipt.clone()));
        assert!(!tracker.apply(receipt));
    }
}

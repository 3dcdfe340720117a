use crate::ids::{ConversationId, ListingId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One buyer/seller thread about a listing. There is at most one row per
/// (listing, buyer, seller) triple.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: ConversationId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub last_message: Option<String>, // Denormalized preview of the newest message
    pub last_message_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>, // Soft delete, hides the thread for one side only
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }

    /// A thread stays visible to a participant until they soft-delete it.
    /// The counterpart keeps seeing it regardless.
    pub fn visible_to(&self, user_id: UserId) -> bool {
        self.is_participant(user_id) && self.deleted_by != Some(user_id)
    }

    pub fn counterpart(&self, user_id: UserId) -> Option<UserId> {
        if self.buyer_id == user_id {
            Some(self.seller_id)
        } else if self.seller_id == user_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }

    pub fn role_of(&self, user_id: UserId) -> Option<ParticipantRole> {
        if self.buyer_id == user_id {
            Some(ParticipantRole::Buyer)
        } else if self.seller_id == user_id {
            Some(ParticipantRole::Seller)
        } else {
            None
        }
    }

    /// Sort key for conversation lists: last activity, falling back to
    /// creation time for threads that have no messages yet.
    pub fn ordering_key(&self) -> DateTime<Utc> {
        self.last_message_at.unwrap_or(self.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Buyer,
    Seller,
}

/// Tab filter for the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationFilter {
    #[default]
    All,
    Buying,
    Selling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
}

/// The slice of a listing the chat surfaces need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ListingSummary {
    pub id: ListingId,
    pub title: String,
    pub price: i64, // Minor currency units
    pub owner_id: UserId,
}

/// The slice of a user profile the chat surfaces need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PartySummary {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// A conversation joined with its listing and both participant profiles.
/// The joins are nullable: the listing or either account may have been
/// deleted out from under the thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub listing: Option<ListingSummary>,
    pub buyer: Option<PartySummary>,
    pub seller: Option<PartySummary>,
}

impl ConversationSummary {
    /// Whether every joined record is still present. Incomplete summaries
    /// are orphans and are kept out of the conversation list.
    pub fn is_complete(&self) -> bool {
        self.listing.is_some() && self.buyer.is_some() && self.seller.is_some()
    }

    pub fn counterpart_profile(&self, user_id: UserId) -> Option<&PartySummary> {
        let other = self.conversation.counterpart(user_id)?;
        if self.conversation.buyer_id == other {
            self.buyer.as_ref()
        } else {
            self.seller.as_ref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn conversation(buyer_id: UserId, seller_id: UserId) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id,
            seller_id,
            last_message: None,
            last_message_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn visibility_is_per_participant() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let mut conv = conversation(buyer, seller);

        assert!(conv.visible_to(buyer));
        assert!(conv.visible_to(seller));

        conv.deleted_by = Some(buyer);
        assert!(!conv.visible_to(buyer));
        assert!(conv.visible_to(seller));
    }

    #[test]
    fn non_participant_never_sees_the_thread() {
        let conv = conversation(Uuid::new_v4(), Uuid::new_v4());
        assert!(!conv.visible_to(Uuid::new_v4()));
    }

    #[test]
    fn counterpart_and_role() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let conv = conversation(buyer, seller);

        assert_eq!(conv.counterpart(buyer), Some(seller));
        assert_eq!(conv.counterpart(seller), Some(buyer));
        assert_eq!(conv.counterpart(Uuid::new_v4()), None);
        assert_eq!(conv.role_of(buyer), Some(ParticipantRole::Buyer));
        assert_eq!(conv.role_of(seller), Some(ParticipantRole::Seller));
    }

    #[test]
    fn ordering_key_falls_back_to_created_at() {
        let mut conv = conversation(Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(conv.ordering_key(), conv.created_at);

        let later = conv.created_at + chrono::Duration::minutes(5);
        conv.last_message_at = Some(later);
        assert_eq!(conv.ordering_key(), later);
    }

    #[test]
    fn summary_completeness_requires_all_joins() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let conv = conversation(buyer, seller);
        let mut summary = ConversationSummary {
            conversation: conv.clone(),
            listing: Some(ListingSummary {
                id: conv.listing_id,
                title: "Road bike".to_string(),
                price: 25_000,
                owner_id: seller,
            }),
            buyer: Some(PartySummary {
                id: buyer,
                username: "ana".to_string(),
                avatar_url: None,
            }),
            seller: Some(PartySummary {
                id: seller,
                username: "ben".to_string(),
                avatar_url: None,
            }),
        };

        assert!(summary.is_complete());
        summary.listing = None;
        assert!(!summary.is_complete());
    }

    #[test]
    fn counterpart_profile_picks_the_other_party() {
        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        let summary = ConversationSummary {
            conversation: conversation(buyer, seller),
            listing: None,
            buyer: Some(PartySummary {
                id: buyer,
                username: "ana".to_string(),
                avatar_url: None,
            }),
            seller: Some(PartySummary {
                id: seller,
                username: "ben".to_string(),
                avatar_url: None,
            }),
        };

        assert_eq!(
            summary
                .counterpart_profile(buyer)
                .map(|profile| profile.username.as_str()),
            Some("ben")
        );
        assert_eq!(
            summary
                .counterpart_profile(seller)
                .map(|profile| profile.username.as_str()),
            Some("ana")
        );
        assert!(summary.counterpart_profile(Uuid::new_v4()).is_none());
    }
}

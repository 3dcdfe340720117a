use crate::conversation::conversation_models::ParticipantRole;
use crate::conversation::conversation_store::ConversationStore;
use crate::ids::{ConversationId, UserId};
use crate::unread::unread_models::{UnreadCounter, UnreadTotals};
use std::collections::HashMap;

/// One user's unread counts, mirrored from the store's counter rows.
/// Feed updates carry absolute counts, so applying one is an overwrite.
pub struct UnreadAggregator {
    user_id: UserId,
    counts: HashMap<ConversationId, i64>,
}

impl UnreadAggregator {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            counts: HashMap::new(),
        }
    }

    pub fn replace_all(&mut self, counters: Vec<UnreadCounter>) {
        self.counts.clear();
        for counter in counters {
            self.apply(&counter);
        }
    }

    /// Overwrite one conversation's count. Returns whether anything
    /// changed. Counts never go negative.
    pub fn apply(&mut self, counter: &UnreadCounter) -> bool {
        if counter.user_id != self.user_id {
            return false;
        }
        let count = counter.count.max(0);
        let previous = self.counts.insert(counter.conversation_id, count);
        previous != Some(count)
    }

    pub fn count_for(&self, conversation_id: ConversationId) -> i64 {
        self.counts.get(&conversation_id).copied().unwrap_or(0)
    }

    /// Badge totals over the visible conversation list. Counts for hidden
    /// or unknown threads stay out of every bucket, which keeps
    /// `all == buying + selling`.
    pub fn totals(&self, store: &ConversationStore) -> UnreadTotals {
        let mut totals = UnreadTotals::default();
        for (conversation_id, count) in &self.counts {
            if *count <= 0 {
                continue;
            }
            match store.role_of(*conversation_id) {
                Some(ParticipantRole::Buyer) => {
                    totals.buying += count;
                    totals.all += count;
                }
                Some(ParticipantRole::Seller) => {
                    totals.selling += count;
                    totals.all += count;
                }
                None => {}
            }
        }
        totals
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::conversation_models::{
        Conversation, ConversationSummary, ListingSummary, PartySummary,
    };
    use chrono::Utc;
    use uuid::Uuid;

    fn summary_for(user_id: UserId, role: ParticipantRole) -> ConversationSummary {
        let other = Uuid::new_v4();
        let (buyer_id, seller_id) = match role {
            ParticipantRole::Buyer => (user_id, other),
            ParticipantRole::Seller => (other, user_id),
        };
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id,
            seller_id,
            last_message: None,
            last_message_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        };
        ConversationSummary {
            listing: Some(ListingSummary {
                id: conversation.listing_id,
                title: "Table".to_string(),
                price: 9_000,
                owner_id: seller_id,
            }),
            buyer: Some(PartySummary {
                id: buyer_id,
                username: "buyer".to_string(),
                avatar_url: None,
            }),
            seller: Some(PartySummary {
                id: seller_id,
                username: "seller".to_string(),
                avatar_url: None,
            }),
            conversation,
        }
    }

    fn counter(conversation_id: ConversationId, user_id: UserId, count: i64) -> UnreadCounter {
        UnreadCounter {
            conversation_id,
            user_id,
            count,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn totals_split_by_role_and_sum_to_all() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let buying = summary_for(user, ParticipantRole::Buyer);
        let selling = summary_for(user, ParticipantRole::Seller);
        store.replace_all(vec![buying.clone(), selling.clone()]);

        let mut unread = UnreadAggregator::new(user);
        unread.replace_all(vec![
            counter(buying.conversation.id, user, 2),
            counter(selling.conversation.id, user, 3),
        ]);

        let totals = unread.totals(&store);
        assert_eq!(totals.buying, 2);
        assert_eq!(totals.selling, 3);
        assert_eq!(totals.all, totals.buying + totals.selling);
    }

    #[test]
    fn hidden_threads_count_toward_nothing() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let visible = summary_for(user, ParticipantRole::Buyer);
        let mut hidden = summary_for(user, ParticipantRole::Seller);
        hidden.conversation.deleted_by = Some(user);
        store.replace_all(vec![visible.clone(), hidden.clone()]);

        let mut unread = UnreadAggregator::new(user);
        unread.replace_all(vec![
            counter(visible.conversation.id, user, 1),
            counter(hidden.conversation.id, user, 5),
        ]);

        let totals = unread.totals(&store);
        assert_eq!(totals.all, 1);
        assert_eq!(totals.all, totals.buying + totals.selling);
    }

    #[test]
    fn apply_overwrites_rather_than_accumulates() {
        let user = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let mut unread = UnreadAggregator::new(user);

        assert!(unread.apply(&counter(conversation_id, user, 4)));
        assert!(unread.apply(&counter(conversation_id, user, 1)));
        assert_eq!(unread.count_for(conversation_id), 1);

        // Same value again is a no-op.
        assert!(!unread.apply(&counter(conversation_id, user, 1)));
    }

    #[test]
    fn counters_for_other_users_are_ignored() {
        let user = Uuid::new_v4();
        let mut unread = UnreadAggregator::new(user);
        assert!(!unread.apply(&counter(Uuid::new_v4(), Uuid::new_v4(), 7)));
        assert_eq!(unread.count_for(Uuid::new_v4()), 0);
    }

    #[test]
    fn negative_counts_clamp_to_zero() {
        let user = Uuid::new_v4();
        let conversation_id = Uuid::new_v4();
        let mut unread = UnreadAggregator::new(user);
        unread.apply(&counter(conversation_id, user, -3));
        assert_eq!(unread.count_for(conversation_id), 0);
    }
}

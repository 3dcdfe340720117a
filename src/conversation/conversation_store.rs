use crate::conversation::conversation_models::{
    Conversation, ConversationFilter, ConversationSummary, ParticipantRole,
};
use crate::ids::{ConversationId, UserId};
use std::collections::HashMap;

/// What applying a conversation update did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The cached entry was patched in place.
    Patched,
    /// The row is no longer visible to this user and was dropped.
    Removed,
    /// The row is not cached; the caller decides whether to fetch it.
    Missing,
}

/// One user's cached, ordered conversation list. Kept current by applying
/// feed deltas; a full refetch only happens on explicit refresh.
pub struct ConversationStore {
    user_id: UserId,
    summaries: HashMap<ConversationId, ConversationSummary>,
    order: Vec<ConversationId>,
}

impl ConversationStore {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            summaries: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Rebuild the cache from a full fetch. Hidden threads and orphaned
    /// summaries are discarded here, so every cached entry is renderable.
    pub fn replace_all(&mut self, fetched: Vec<ConversationSummary>) {
        let total = fetched.len();
        self.summaries.clear();
        for summary in fetched {
            if !summary.conversation.visible_to(self.user_id) {
                continue;
            }
            if !summary.is_complete() {
                tracing::debug!(
                    "discarding orphaned conversation {} from list",
                    summary.conversation.id
                );
                continue;
            }
            self.summaries.insert(summary.conversation.id, summary);
        }
        if self.summaries.len() < total {
            tracing::debug!(
                "conversation list kept {} of {} fetched threads",
                self.summaries.len(),
                total
            );
        }
        self.rebuild_order();
    }

    /// Add one thread, enforcing the same visibility and completeness cut
    /// as a full refresh. Returns whether the entry is now cached.
    pub fn apply_insert(&mut self, summary: ConversationSummary) -> bool {
        if !summary.conversation.visible_to(self.user_id) || !summary.is_complete() {
            return false;
        }
        self.summaries.insert(summary.conversation.id, summary);
        self.rebuild_order();
        true
    }

    /// Patch a cached thread with an updated conversation row.
    pub fn apply_update(&mut self, conversation: Conversation) -> UpdateOutcome {
        if !self.summaries.contains_key(&conversation.id) {
            return UpdateOutcome::Missing;
        }
        if !conversation.visible_to(self.user_id) {
            self.remove(conversation.id);
            return UpdateOutcome::Removed;
        }
        if let Some(entry) = self.summaries.get_mut(&conversation.id) {
            entry.conversation = conversation;
        }
        self.rebuild_order();
        UpdateOutcome::Patched
    }

    pub fn apply_delete(&mut self, id: ConversationId) -> bool {
        self.remove(id)
    }

    fn remove(&mut self, id: ConversationId) -> bool {
        let removed = self.summaries.remove(&id).is_some();
        if removed {
            self.order.retain(|entry| *entry != id);
        }
        removed
    }

    /// Snapshot of the list for one tab, newest activity first.
    pub fn list(&self, filter: ConversationFilter) -> Vec<ConversationSummary> {
        self.order
            .iter()
            .filter_map(|id| self.summaries.get(id))
            .filter(|summary| match filter {
                ConversationFilter::All => true,
                ConversationFilter::Buying => {
                    summary.conversation.role_of(self.user_id) == Some(ParticipantRole::Buyer)
                }
                ConversationFilter::Selling => {
                    summary.conversation.role_of(self.user_id) == Some(ParticipantRole::Seller)
                }
            })
            .cloned()
            .collect()
    }

    pub fn get(&self, id: ConversationId) -> Option<&ConversationSummary> {
        self.summaries.get(&id)
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.summaries.contains_key(&id)
    }

    pub fn role_of(&self, id: ConversationId) -> Option<ParticipantRole> {
        self.summaries
            .get(&id)
            .and_then(|summary| summary.conversation.role_of(self.user_id))
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn clear(&mut self) {
        self.summaries.clear();
        self.order.clear();
    }

    fn rebuild_order(&mut self) {
        let mut order: Vec<ConversationId> = self.summaries.keys().copied().collect();
        order.sort_by(|a, b| {
            let a_key = self.summaries[a].conversation.ordering_key();
            let b_key = self.summaries[b].conversation.ordering_key();
            b_key.cmp(&a_key).then_with(|| a.cmp(b))
        });
        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::conversation_models::{ListingSummary, PartySummary};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn summary_for(
        user_id: UserId,
        role: ParticipantRole,
        minutes_ago: i64,
    ) -> ConversationSummary {
        let other = Uuid::new_v4();
        let (buyer_id, seller_id) = match role {
            ParticipantRole::Buyer => (user_id, other),
            ParticipantRole::Seller => (other, user_id),
        };
        let at = Utc::now() - Duration::minutes(minutes_ago);
        let conversation = Conversation {
            id: Uuid::new_v4(),
            listing_id: Uuid::new_v4(),
            buyer_id,
            seller_id,
            last_message: Some("hello".to_string()),
            last_message_at: Some(at),
            deleted_by: None,
            created_at: at - Duration::hours(1),
            updated_at: at,
        };
        ConversationSummary {
            listing: Some(ListingSummary {
                id: conversation.listing_id,
                title: "Sofa".to_string(),
                price: 40_000,
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

    #[test]
    fn list_is_ordered_by_latest_activity() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let old = summary_for(user, ParticipantRole::Buyer, 60);
        let recent = summary_for(user, ParticipantRole::Seller, 5);
        store.replace_all(vec![old.clone(), recent.clone()]);

        let listed = store.list(ConversationFilter::All);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].conversation.id, recent.conversation.id);
        assert_eq!(listed[1].conversation.id, old.conversation.id);
    }

    #[test]
    fn threads_without_messages_sort_by_creation_time() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let mut fresh = summary_for(user, ParticipantRole::Buyer, 0);
        fresh.conversation.last_message = None;
        fresh.conversation.last_message_at = None;
        fresh.conversation.created_at = Utc::now();
        let older = summary_for(user, ParticipantRole::Buyer, 30);
        store.replace_all(vec![older.clone(), fresh.clone()]);

        let listed = store.list(ConversationFilter::All);
        assert_eq!(listed[0].conversation.id, fresh.conversation.id);
    }

    #[test]
    fn replace_all_drops_hidden_and_orphaned_threads() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);

        let mut hidden = summary_for(user, ParticipantRole::Buyer, 10);
        hidden.conversation.deleted_by = Some(user);
        let mut orphaned = summary_for(user, ParticipantRole::Buyer, 20);
        orphaned.listing = None;
        let kept = summary_for(user, ParticipantRole::Seller, 30);

        store.replace_all(vec![hidden, orphaned, kept.clone()]);
        let listed = store.list(ConversationFilter::All);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].conversation.id, kept.conversation.id);
    }

    #[test]
    fn buying_and_selling_filters_split_by_role() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let buying = summary_for(user, ParticipantRole::Buyer, 5);
        let selling = summary_for(user, ParticipantRole::Seller, 10);
        store.replace_all(vec![buying.clone(), selling.clone()]);

        let bought = store.list(ConversationFilter::Buying);
        assert_eq!(bought.len(), 1);
        assert_eq!(bought[0].conversation.id, buying.conversation.id);

        let sold = store.list(ConversationFilter::Selling);
        assert_eq!(sold.len(), 1);
        assert_eq!(sold[0].conversation.id, selling.conversation.id);
    }

    #[test]
    fn update_patches_and_reorders_without_refetch() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let first = summary_for(user, ParticipantRole::Buyer, 5);
        let second = summary_for(user, ParticipantRole::Buyer, 60);
        store.replace_all(vec![first.clone(), second.clone()]);

        // The stale thread gets a newer message and moves to the top.
        let mut updated = second.conversation.clone();
        updated.last_message = Some("new offer".to_string());
        updated.last_message_at = Some(Utc::now());
        assert_eq!(store.apply_update(updated), UpdateOutcome::Patched);

        let listed = store.list(ConversationFilter::All);
        assert_eq!(listed[0].conversation.id, second.conversation.id);
        assert_eq!(
            listed[0].conversation.last_message.as_deref(),
            Some("new offer")
        );
    }

    #[test]
    fn update_that_hides_the_thread_removes_it() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let summary = summary_for(user, ParticipantRole::Buyer, 5);
        store.replace_all(vec![summary.clone()]);

        let mut deleted = summary.conversation.clone();
        deleted.deleted_by = Some(user);
        assert_eq!(store.apply_update(deleted), UpdateOutcome::Removed);
        assert!(store.is_empty());
    }

    #[test]
    fn update_for_an_unknown_thread_reports_missing() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);
        let summary = summary_for(user, ParticipantRole::Buyer, 5);
        assert_eq!(
            store.apply_update(summary.conversation),
            UpdateOutcome::Missing
        );
    }

    #[test]
    fn insert_refuses_hidden_or_incomplete_summaries() {
        let user = Uuid::new_v4();
        let mut store = ConversationStore::new(user);

        let mut hidden = summary_for(user, ParticipantRole::Buyer, 5);
        hidden.conversation.deleted_by = Some(user);
        assert!(!store.apply_insert(hidden));

        let mut orphaned = summary_for(user, ParticipantRole::Buyer, 5);
        orphaned.buyer = None;
        assert!(!store.apply_insert(orphaned));
        assert!(store.is_empty());
    }
}

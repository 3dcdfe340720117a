use crate::backend::contracts::{
    ChangeFeed, ConversationRepository, CounterRepository, ListingAdmin, ListingProvider,
    MessageRepository, ReceiptRepository,
};
use crate::config::ChatConfig;
use crate::conversation::conversation_models::{
    Conversation, ConversationSummary, ListingSummary, NewConversation, PartySummary,
};
use crate::error::{ChatError, Result};
use crate::feed::feed_events::{ChangeKind, FeedEvent};
use crate::feed::feed_hub::FeedHub;
use crate::ids::{ConversationId, ListingId, MessageId, UserId};
use crate::message::message_models::{Message, NewMessage};
use crate::receipt::receipt_models::ReadReceipt;
use crate::unread::unread_models::UnreadCounter;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::broadcast;
use uuid::Uuid;
use validator::Validate;

/// Store operations that [`MemoryBackend::fail_once`] can arm to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    FetchSummaries,
    FetchMessages,
    FindOrCreate,
    InsertMessage,
    SetLastMessage,
    MarkDeleted,
    UpsertReceipt,
    ResetCounter,
    DeleteReceipts,
    DeleteCounters,
    DeleteMessages,
    DeleteConversations,
    DeleteListing,
}

/// In-memory marketplace store. Backs the test suites and the QA runner;
/// mirrors the Postgres backend's observable behavior, including the
/// change feed.
pub struct MemoryBackend {
    users: DashMap<UserId, PartySummary>,
    listings: DashMap<ListingId, ListingSummary>,
    conversations: DashMap<ConversationId, Conversation>,
    messages: DashMap<ConversationId, Vec<Message>>,
    receipts: DashMap<(ConversationId, UserId), ReadReceipt>,
    counters: DashMap<(ConversationId, UserId), UnreadCounter>,
    feed: FeedHub,
    armed_faults: Mutex<HashSet<FaultPoint>>,
}

impl MemoryBackend {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            users: DashMap::new(),
            listings: DashMap::new(),
            conversations: DashMap::new(),
            messages: DashMap::new(),
            receipts: DashMap::new(),
            counters: DashMap::new(),
            feed: FeedHub::new(config.feed_capacity),
            armed_faults: Mutex::new(HashSet::new()),
        }
    }

    /// Arm the next call through `point` to fail with a store error.
    pub fn fail_once(&self, point: FaultPoint) {
        self.armed_faults.lock().insert(point);
    }

    fn trip(&self, point: FaultPoint) -> Result<()> {
        if self.armed_faults.lock().remove(&point) {
            return Err(ChatError::store(format!(
                "simulated failure at {:?}",
                point
            )));
        }
        Ok(())
    }

    // ── Marketplace fixtures ─────────────────────────────────────────────

    pub fn seed_user(&self, username: &str) -> UserId {
        let id = Uuid::new_v4();
        self.users.insert(
            id,
            PartySummary {
                id,
                username: username.to_string(),
                avatar_url: None,
            },
        );
        id
    }

    pub fn seed_listing(&self, title: &str, price: i64, owner_id: UserId) -> ListingId {
        let id = Uuid::new_v4();
        self.listings.insert(
            id,
            ListingSummary {
                id,
                title: title.to_string(),
                price,
                owner_id,
            },
        );
        id
    }

    /// Drop a profile row, leaving any conversations referencing it
    /// incomplete. Models account deletion in the wider marketplace.
    pub fn remove_user(&self, user_id: UserId) {
        self.users.remove(&user_id);
    }

    pub fn remove_listing(&self, listing_id: ListingId) {
        self.listings.remove(&listing_id);
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.len()
    }

    fn summarize(&self, conversation: Conversation) -> ConversationSummary {
        let listing = self
            .listings
            .get(&conversation.listing_id)
            .map(|entry| entry.clone());
        let buyer = self
            .users
            .get(&conversation.buyer_id)
            .map(|entry| entry.clone());
        let seller = self
            .users
            .get(&conversation.seller_id)
            .map(|entry| entry.clone());
        ConversationSummary {
            conversation,
            listing,
            buyer,
            seller,
        }
    }

    fn bump_counter(&self, conversation_id: ConversationId, user_id: UserId) {
        let now = Utc::now();
        let counter = {
            let mut entry = self
                .counters
                .entry((conversation_id, user_id))
                .or_insert_with(|| UnreadCounter {
                    conversation_id,
                    user_id,
                    count: 0,
                    updated_at: now,
                });
            entry.count += 1;
            entry.updated_at = now;
            entry.clone()
        };
        self.feed.publish(FeedEvent::Counter { counter });
    }

    fn conversation_ids_for_listing(&self, listing_id: ListingId) -> Vec<ConversationId> {
        self.conversations
            .iter()
            .filter(|entry| entry.listing_id == listing_id)
            .map(|entry| entry.id)
            .collect()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(&ChatConfig::default())
    }
}

#[async_trait]
impl ConversationRepository for MemoryBackend {
    async fn conversation_by_id(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(&id).map(|entry| entry.clone()))
    }

    async fn summary_by_id(&self, id: ConversationId) -> Result<Option<ConversationSummary>> {
        Ok(self
            .conversations
            .get(&id)
            .map(|entry| entry.clone())
            .map(|conversation| self.summarize(conversation)))
    }

    async fn summaries_for_user(&self, user_id: UserId) -> Result<Vec<ConversationSummary>> {
        self.trip(FaultPoint::FetchSummaries)?;

        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| entry.is_participant(user_id))
            .map(|entry| entry.clone())
            .collect();
        conversations.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));

        Ok(conversations
            .into_iter()
            .map(|conversation| self.summarize(conversation))
            .collect())
    }

    async fn find_or_create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<(Conversation, bool)> {
        self.trip(FaultPoint::FindOrCreate)?;

        let existing = self.conversations.iter().find_map(|entry| {
            (entry.listing_id == new.listing_id
                && entry.buyer_id == new.buyer_id
                && entry.seller_id == new.seller_id)
                .then(|| entry.clone())
        });
        if let Some(conversation) = existing {
            return Ok((conversation, false));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            listing_id: new.listing_id,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            last_message: None,
            last_message_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        };
        self.conversations
            .insert(conversation.id, conversation.clone());
        self.feed.publish(FeedEvent::Conversation {
            kind: ChangeKind::Insert,
            conversation: conversation.clone(),
        });

        Ok((conversation, true))
    }

    async fn set_last_message(
        &self,
        id: ConversationId,
        preview: &str,
        at: chrono::DateTime<Utc>,
    ) -> Result<Conversation> {
        self.trip(FaultPoint::SetLastMessage)?;

        let conversation = {
            let mut entry = self
                .conversations
                .get_mut(&id)
                .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;
            entry.last_message = Some(preview.to_string());
            entry.last_message_at = Some(at);
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.feed.publish(FeedEvent::Conversation {
            kind: ChangeKind::Update,
            conversation: conversation.clone(),
        });

        Ok(conversation)
    }

    async fn mark_deleted(&self, id: ConversationId, user_id: UserId) -> Result<Conversation> {
        self.trip(FaultPoint::MarkDeleted)?;

        let conversation = {
            let mut entry = self
                .conversations
                .get_mut(&id)
                .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;
            if !entry.is_participant(user_id) {
                return Err(ChatError::Denied(
                    "You are not a participant in this conversation".to_string(),
                ));
            }
            entry.deleted_by = Some(user_id);
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.feed.publish(FeedEvent::Conversation {
            kind: ChangeKind::Update,
            conversation: conversation.clone(),
        });

        Ok(conversation)
    }
}

#[async_trait]
impl MessageRepository for MemoryBackend {
    async fn messages_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>> {
        self.trip(FaultPoint::FetchMessages)?;

        let mut messages = self
            .messages
            .get(&conversation_id)
            .map(|entry| entry.clone())
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        self.trip(FaultPoint::InsertMessage)?;
        new.validate()?;

        let conversation = self
            .conversations
            .get(&new.conversation_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;
        let recipient = conversation.counterpart(new.sender_id).ok_or_else(|| {
            ChatError::Denied("You are not a participant in this conversation".to_string())
        })?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            is_image: new.is_image,
            is_offer: new.is_offer,
            created_at: Utc::now(),
        };
        self.messages
            .entry(new.conversation_id)
            .or_default()
            .push(message.clone());

        // The store owns the unread increment so it cannot be skipped by
        // a client that dies mid-send.
        self.bump_counter(new.conversation_id, recipient);
        self.feed.publish(FeedEvent::Message {
            message: message.clone(),
            recipient,
        });

        Ok(message)
    }
}

#[async_trait]
impl ReceiptRepository for MemoryBackend {
    async fn upsert_receipt(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        last_read_message_id: Option<MessageId>,
    ) -> Result<ReadReceipt> {
        self.trip(FaultPoint::UpsertReceipt)?;

        let conversation = self
            .conversations
            .get(&conversation_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;

        let receipt = ReadReceipt {
            conversation_id,
            user_id,
            read_at: Utc::now(),
            last_read_message_id,
        };
        self.receipts
            .insert((conversation_id, user_id), receipt.clone());
        self.feed.publish(FeedEvent::Receipt {
            receipt: receipt.clone(),
            buyer_id: conversation.buyer_id,
            seller_id: conversation.seller_id,
        });

        Ok(receipt)
    }

    async fn receipts_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ReadReceipt>> {
        Ok(self
            .receipts
            .iter()
            .filter(|entry| entry.key().0 == conversation_id)
            .map(|entry| entry.clone())
            .collect())
    }
}

#[async_trait]
impl CounterRepository for MemoryBackend {
    async fn counters_for_user(&self, user_id: UserId) -> Result<Vec<UnreadCounter>> {
        Ok(self
            .counters
            .iter()
            .filter(|entry| entry.key().1 == user_id)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn reset_counter(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()> {
        self.trip(FaultPoint::ResetCounter)?;

        let now = Utc::now();
        let counter = {
            let mut entry = self
                .counters
                .entry((conversation_id, user_id))
                .or_insert_with(|| UnreadCounter {
                    conversation_id,
                    user_id,
                    count: 0,
                    updated_at: now,
                });
            entry.count = 0;
            entry.updated_at = now;
            entry.clone()
        };
        self.feed.publish(FeedEvent::Counter { counter });

        Ok(())
    }
}

#[async_trait]
impl ListingProvider for MemoryBackend {
    async fn listing_summary(&self, listing_id: ListingId) -> Result<Option<ListingSummary>> {
        Ok(self.listings.get(&listing_id).map(|entry| entry.clone()))
    }
}

impl ChangeFeed for MemoryBackend {
    fn subscribe_feed(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl ListingAdmin for MemoryBackend {
    async fn delete_receipts_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        self.trip(FaultPoint::DeleteReceipts)?;

        let mut removed = 0;
        for conversation_id in self.conversation_ids_for_listing(listing_id) {
            let keys: Vec<(ConversationId, UserId)> = self
                .receipts
                .iter()
                .filter(|entry| entry.key().0 == conversation_id)
                .map(|entry| *entry.key())
                .collect();
            for key in keys {
                if self.receipts.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_counters_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        self.trip(FaultPoint::DeleteCounters)?;

        let mut removed = 0;
        for conversation_id in self.conversation_ids_for_listing(listing_id) {
            let keys: Vec<(ConversationId, UserId)> = self
                .counters
                .iter()
                .filter(|entry| entry.key().0 == conversation_id)
                .map(|entry| *entry.key())
                .collect();
            for key in keys {
                if self.counters.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_messages_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        self.trip(FaultPoint::DeleteMessages)?;

        let mut removed = 0;
        for conversation_id in self.conversation_ids_for_listing(listing_id) {
            if let Some((_, messages)) = self.messages.remove(&conversation_id) {
                removed += messages.len() as u64;
            }
        }
        Ok(removed)
    }

    async fn delete_conversations_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        self.trip(FaultPoint::DeleteConversations)?;

        let mut removed = 0;
        for conversation_id in self.conversation_ids_for_listing(listing_id) {
            if let Some((_, conversation)) = self.conversations.remove(&conversation_id) {
                removed += 1;
                self.feed.publish(FeedEvent::Conversation {
                    kind: ChangeKind::Delete,
                    conversation,
                });
            }
        }
        Ok(removed)
    }

    async fn delete_listing(&self, listing_id: ListingId) -> Result<u64> {
        self.trip(FaultPoint::DeleteListing)?;

        Ok(u64::from(self.listings.remove(&listing_id).is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> MemoryBackend {
        MemoryBackend::default()
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent_per_triple() {
        let backend = backend();
        let seller = backend.seed_user("seller");
        let buyer = backend.seed_user("buyer");
        let listing = backend.seed_listing("Desk lamp", 1_500, seller);

        let new = NewConversation {
            listing_id: listing,
            buyer_id: buyer,
            seller_id: seller,
        };
        let (first, created) = backend
            .find_or_create_conversation(new.clone())
            .await
            .unwrap();
        assert!(created);

        let (second, created) = backend.find_or_create_conversation(new).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(backend.conversation_count(), 1);
    }

    #[tokio::test]
    async fn insert_message_bumps_the_recipient_counter_only() {
        let backend = backend();
        let seller = backend.seed_user("seller");
        let buyer = backend.seed_user("buyer");
        let listing = backend.seed_listing("Desk lamp", 1_500, seller);
        let (conversation, _) = backend
            .find_or_create_conversation(NewConversation {
                listing_id: listing,
                buyer_id: buyer,
                seller_id: seller,
            })
            .await
            .unwrap();

        backend
            .insert_message(NewMessage::text(
                conversation.id,
                buyer,
                "Still available?".to_string(),
            ))
            .await
            .unwrap();

        let seller_counters = backend.counters_for_user(seller).await.unwrap();
        assert_eq!(seller_counters.len(), 1);
        assert_eq!(seller_counters[0].count, 1);
        assert!(backend.counters_for_user(buyer).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fail_once_trips_exactly_one_call() {
        let backend = backend();
        let user = backend.seed_user("any");

        backend.fail_once(FaultPoint::FetchSummaries);
        assert!(backend.summaries_for_user(user).await.is_err());
        assert!(backend.summaries_for_user(user).await.is_ok());
    }

    #[tokio::test]
    async fn messages_from_non_participants_are_denied() {
        let backend = backend();
        let seller = backend.seed_user("seller");
        let buyer = backend.seed_user("buyer");
        let listing = backend.seed_listing("Desk lamp", 1_500, seller);
        let (conversation, _) = backend
            .find_or_create_conversation(NewConversation {
                listing_id: listing,
                buyer_id: buyer,
                seller_id: seller,
            })
            .await
            .unwrap();

        let outsider = backend.seed_user("outsider");
        let result = backend
            .insert_message(NewMessage::text(
                conversation.id,
                outsider,
                "let me in".to_string(),
            ))
            .await;
        assert!(matches!(result, Err(ChatError::Denied(_))));
    }
}

use crate::conversation::conversation_models::{
    Conversation, ConversationSummary, ListingSummary, NewConversation,
};
use crate::error::Result;
use crate::feed::feed_events::FeedEvent;
use crate::ids::{ConversationId, ListingId, MessageId, UserId};
use crate::message::message_models::{Message, NewMessage};
use crate::receipt::receipt_models::ReadReceipt;
use crate::unread::unread_models::UnreadCounter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Conversation rows and their joined summaries.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn conversation_by_id(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// One conversation joined with its listing and both profiles. The
    /// joins are left joins, so the summary may come back incomplete.
    async fn summary_by_id(&self, id: ConversationId) -> Result<Option<ConversationSummary>>;

    /// Every conversation the user participates in, newest activity first.
    /// Soft-deleted threads are included; visibility is the caller's cut.
    async fn summaries_for_user(&self, user_id: UserId) -> Result<Vec<ConversationSummary>>;

    /// Find the conversation for the (listing, buyer, seller) triple or
    /// insert it. Returns `true` when a new row was inserted.
    async fn find_or_create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<(Conversation, bool)>;

    /// Overwrite the denormalized preview after a message lands.
    async fn set_last_message(
        &self,
        id: ConversationId,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<Conversation>;

    /// Soft-delete the thread for one participant.
    async fn mark_deleted(&self, id: ConversationId, user_id: UserId) -> Result<Conversation>;
}

/// Message rows. Inserting also bumps the recipient's unread counter and
/// publishes the change on the feed.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// All messages in the thread, ascending by creation time.
    async fn messages_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>>;

    async fn insert_message(&self, new: NewMessage) -> Result<Message>;
}

#[async_trait]
pub trait ReceiptRepository: Send + Sync {
    /// Write-or-refresh the caller's receipt with `read_at = now`.
    async fn upsert_receipt(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        last_read_message_id: Option<MessageId>,
    ) -> Result<ReadReceipt>;

    async fn receipts_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ReadReceipt>>;
}

#[async_trait]
pub trait CounterRepository: Send + Sync {
    async fn counters_for_user(&self, user_id: UserId) -> Result<Vec<UnreadCounter>>;

    /// Zero the counter when the participant opens the thread.
    async fn reset_counter(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()>;
}

/// Read access to the marketplace's listing records.
#[async_trait]
pub trait ListingProvider: Send + Sync {
    async fn listing_summary(&self, listing_id: ListingId) -> Result<Option<ListingSummary>>;
}

/// The store's raw change feed. Every committed write shows up here;
/// per-user routing happens downstream.
pub trait ChangeFeed: Send + Sync {
    fn subscribe_feed(&self) -> broadcast::Receiver<FeedEvent>;
}

/// Everything the chat engine needs from a marketplace store.
pub trait MarketBackend:
    ConversationRepository
    + MessageRepository
    + ReceiptRepository
    + CounterRepository
    + ListingProvider
    + ChangeFeed
{
}

impl<T> MarketBackend for T where
    T: ConversationRepository
        + MessageRepository
        + ReceiptRepository
        + CounterRepository
        + ListingProvider
        + ChangeFeed
{
}

/// Destructive per-listing cleanup. Kept off `MarketBackend` so client
/// sessions never hold the delete capability.
#[async_trait]
pub trait ListingAdmin: Send + Sync {
    async fn delete_receipts_for_listing(&self, listing_id: ListingId) -> Result<u64>;
    async fn delete_counters_for_listing(&self, listing_id: ListingId) -> Result<u64>;
    async fn delete_messages_for_listing(&self, listing_id: ListingId) -> Result<u64>;

    /// Deletes the conversation rows and publishes a delete event for each
    /// so live sessions drop them.
    async fn delete_conversations_for_listing(&self, listing_id: ListingId) -> Result<u64>;

    async fn delete_listing(&self, listing_id: ListingId) -> Result<u64>;
}

/// Who is signed in, as far as the embedding marketplace app knows.
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

/// Resolves stored image references to displayable URLs.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn image_url(&self, image_ref: &str) -> Result<String>;
}

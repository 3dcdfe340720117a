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
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tokio::sync::broadcast;
use uuid::Uuid;
use validator::Validate;

/// Postgres-backed marketplace store. Publishes each change on the feed
/// after the corresponding write commits.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
    feed: FeedHub,
}

/// Conversation row flattened with its left-joined listing and profiles.
#[derive(FromRow)]
struct SummaryRow {
    id: Uuid,
    listing_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    last_message: Option<String>,
    last_message_at: Option<DateTime<Utc>>,
    deleted_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    listing_title: Option<String>,
    listing_price: Option<i64>,
    listing_owner_id: Option<Uuid>,
    buyer_username: Option<String>,
    buyer_avatar_url: Option<String>,
    seller_username: Option<String>,
    seller_avatar_url: Option<String>,
}

impl SummaryRow {
    fn into_summary(self) -> ConversationSummary {
        let listing = match (self.listing_title, self.listing_price, self.listing_owner_id) {
            (Some(title), Some(price), Some(owner_id)) => Some(ListingSummary {
                id: self.listing_id,
                title,
                price,
                owner_id,
            }),
            _ => None,
        };
        // username is NOT NULL, so its presence marks the joined row.
        let buyer = self.buyer_username.map(|username| PartySummary {
            id: self.buyer_id,
            username,
            avatar_url: self.buyer_avatar_url,
        });
        let seller = self.seller_username.map(|username| PartySummary {
            id: self.seller_id,
            username,
            avatar_url: self.seller_avatar_url,
        });

        ConversationSummary {
            conversation: Conversation {
                id: self.id,
                listing_id: self.listing_id,
                buyer_id: self.buyer_id,
                seller_id: self.seller_id,
                last_message: self.last_message,
                last_message_at: self.last_message_at,
                deleted_by: self.deleted_by,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            listing,
            buyer,
            seller,
        }
    }
}

const SUMMARY_SELECT: &str = "SELECT c.id, c.listing_id, c.buyer_id, c.seller_id,
        c.last_message, c.last_message_at, c.deleted_by, c.created_at, c.updated_at,
        l.title AS listing_title, l.price AS listing_price, l.owner_id AS listing_owner_id,
        b.username AS buyer_username, b.avatar_url AS buyer_avatar_url,
        s.username AS seller_username, s.avatar_url AS seller_avatar_url
     FROM conversations c
     LEFT JOIN listings l ON l.id = c.listing_id
     LEFT JOIN users b ON b.id = c.buyer_id
     LEFT JOIN users s ON s.id = c.seller_id";

impl PgBackend {
    pub async fn connect(database_url: &str, config: &ChatConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| ChatError::store(format!("migration failed: {}", e)))?;

        Ok(Self {
            pool,
            feed: FeedHub::new(config.feed_capacity),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn conversation_or_not_found(&self, id: ConversationId) -> Result<Conversation> {
        self.conversation_by_id(id)
            .await?
            .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))
    }

    // ── Marketplace fixtures (QA and smoke tests only) ───────────────────

    pub async fn seed_user(&self, username: &str) -> Result<UserId> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO users (username)
             VALUES ($1)
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn seed_listing(&self, title: &str, price: i64, owner_id: UserId) -> Result<ListingId> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO listings (title, price, owner_id)
             VALUES ($1, $2, $3)
             RETURNING id",
        )
        .bind(title)
        .bind(price)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

#[async_trait]
impl ConversationRepository for PgBackend {
    async fn conversation_by_id(&self, id: ConversationId) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn summary_by_id(&self, id: ConversationId) -> Result<Option<ConversationSummary>> {
        let row = sqlx::query_as::<_, SummaryRow>(&format!("{} WHERE c.id = $1", SUMMARY_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(SummaryRow::into_summary))
    }

    async fn summaries_for_user(&self, user_id: UserId) -> Result<Vec<ConversationSummary>> {
        let rows = sqlx::query_as::<_, SummaryRow>(&format!(
            "{} WHERE c.buyer_id = $1 OR c.seller_id = $1
             ORDER BY COALESCE(c.last_message_at, c.created_at) DESC",
            SUMMARY_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SummaryRow::into_summary).collect())
    }

    async fn find_or_create_conversation(
        &self,
        new: NewConversation,
    ) -> Result<(Conversation, bool)> {
        let existing = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations
             WHERE listing_id = $1 AND buyer_id = $2 AND seller_id = $3",
        )
        .bind(new.listing_id)
        .bind(new.buyer_id)
        .bind(new.seller_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(conversation) = existing {
            return Ok((conversation, false));
        }

        let inserted = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (listing_id, buyer_id, seller_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (listing_id, buyer_id, seller_id) DO NOTHING
             RETURNING *",
        )
        .bind(new.listing_id)
        .bind(new.buyer_id)
        .bind(new.seller_id)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(conversation) => {
                self.feed.publish(FeedEvent::Conversation {
                    kind: ChangeKind::Insert,
                    conversation: conversation.clone(),
                });
                Ok((conversation, true))
            }
            // Lost the insert race; the winner's row is the conversation.
            None => {
                let conversation = sqlx::query_as::<_, Conversation>(
                    "SELECT * FROM conversations
                     WHERE listing_id = $1 AND buyer_id = $2 AND seller_id = $3",
                )
                .bind(new.listing_id)
                .bind(new.buyer_id)
                .bind(new.seller_id)
                .fetch_one(&self.pool)
                .await?;
                Ok((conversation, false))
            }
        }
    }

    async fn set_last_message(
        &self,
        id: ConversationId,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<Conversation> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "UPDATE conversations
             SET last_message = $2, last_message_at = $3, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(preview)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ChatError::NotFound("Conversation not found".to_string()))?;

        self.feed.publish(FeedEvent::Conversation {
            kind: ChangeKind::Update,
            conversation: conversation.clone(),
        });

        Ok(conversation)
    }

    async fn mark_deleted(&self, id: ConversationId, user_id: UserId) -> Result<Conversation> {
        let current = self.conversation_or_not_found(id).await?;
        if !current.is_participant(user_id) {
            return Err(ChatError::Denied(
                "You are not a participant in this conversation".to_string(),
            ));
        }

        let conversation = sqlx::query_as::<_, Conversation>(
            "UPDATE conversations
             SET deleted_by = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        self.feed.publish(FeedEvent::Conversation {
            kind: ChangeKind::Update,
            conversation: conversation.clone(),
        });

        Ok(conversation)
    }
}

#[async_trait]
impl MessageRepository for PgBackend {
    async fn messages_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        new.validate()?;

        let conversation = self.conversation_or_not_found(new.conversation_id).await?;
        let recipient = conversation.counterpart(new.sender_id).ok_or_else(|| {
            ChatError::Denied("You are not a participant in this conversation".to_string())
        })?;

        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (conversation_id, sender_id, content, is_image, is_offer)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(&new.content)
        .bind(new.is_image)
        .bind(new.is_offer)
        .fetch_one(&self.pool)
        .await?;

        let counter = sqlx::query_as::<_, UnreadCounter>(
            "INSERT INTO unread_counters (conversation_id, user_id, count, updated_at)
             VALUES ($1, $2, 1, NOW())
             ON CONFLICT (conversation_id, user_id)
             DO UPDATE SET count = unread_counters.count + 1, updated_at = NOW()
             RETURNING *",
        )
        .bind(new.conversation_id)
        .bind(recipient)
        .fetch_one(&self.pool)
        .await?;

        self.feed.publish(FeedEvent::Counter { counter });
        self.feed.publish(FeedEvent::Message {
            message: message.clone(),
            recipient,
        });

        Ok(message)
    }
}

#[async_trait]
impl ReceiptRepository for PgBackend {
    async fn upsert_receipt(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        last_read_message_id: Option<MessageId>,
    ) -> Result<ReadReceipt> {
        let conversation = self.conversation_or_not_found(conversation_id).await?;

        let receipt = sqlx::query_as::<_, ReadReceipt>(
            "INSERT INTO read_receipts (conversation_id, user_id, read_at, last_read_message_id)
             VALUES ($1, $2, NOW(), $3)
             ON CONFLICT (conversation_id, user_id)
             DO UPDATE SET read_at = NOW(), last_read_message_id = EXCLUDED.last_read_message_id
             RETURNING *",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(last_read_message_id)
        .fetch_one(&self.pool)
        .await?;

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
        let receipts = sqlx::query_as::<_, ReadReceipt>(
            "SELECT * FROM read_receipts WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(receipts)
    }
}

#[async_trait]
impl CounterRepository for PgBackend {
    async fn counters_for_user(&self, user_id: UserId) -> Result<Vec<UnreadCounter>> {
        let counters = sqlx::query_as::<_, UnreadCounter>(
            "SELECT * FROM unread_counters WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(counters)
    }

    async fn reset_counter(&self, conversation_id: ConversationId, user_id: UserId) -> Result<()> {
        let counter = sqlx::query_as::<_, UnreadCounter>(
            "INSERT INTO unread_counters (conversation_id, user_id, count, updated_at)
             VALUES ($1, $2, 0, NOW())
             ON CONFLICT (conversation_id, user_id)
             DO UPDATE SET count = 0, updated_at = NOW()
             RETURNING *",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        self.feed.publish(FeedEvent::Counter { counter });

        Ok(())
    }
}

#[async_trait]
impl ListingProvider for PgBackend {
    async fn listing_summary(&self, listing_id: ListingId) -> Result<Option<ListingSummary>> {
        let listing = sqlx::query_as::<_, ListingSummary>(
            "SELECT id, title, price, owner_id FROM listings WHERE id = $1",
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(listing)
    }
}

impl ChangeFeed for PgBackend {
    fn subscribe_feed(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl ListingAdmin for PgBackend {
    async fn delete_receipts_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM read_receipts
             WHERE conversation_id IN (SELECT id FROM conversations WHERE listing_id = $1)",
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_counters_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM unread_counters
             WHERE conversation_id IN (SELECT id FROM conversations WHERE listing_id = $1)",
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_messages_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM messages
             WHERE conversation_id IN (SELECT id FROM conversations WHERE listing_id = $1)",
        )
        .bind(listing_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_conversations_for_listing(&self, listing_id: ListingId) -> Result<u64> {
        let deleted = sqlx::query_as::<_, Conversation>(
            "DELETE FROM conversations WHERE listing_id = $1 RETURNING *",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        let count = deleted.len() as u64;
        for conversation in deleted {
            self.feed.publish(FeedEvent::Conversation {
                kind: ChangeKind::Delete,
                conversation,
            });
        }

        Ok(count)
    }

    async fn delete_listing(&self, listing_id: ListingId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(listing_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

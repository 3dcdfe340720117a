use crate::backend::contracts::{ImageStore, MarketBackend};
use crate::client::session_events::{LeaveReason, Notice, SessionEvent};
use crate::conversation::conversation_models::ConversationSummary;
use crate::error::{ChatError, Result};
use crate::feed::feed_events::{ChangeKind, FeedEvent};
use crate::feed::subscription_manager::{FeedGuard, SubscriptionManager};
use crate::ids::{ConversationId, MessageId, UserId};
use crate::message::message_models::{Message, MessageDraft, MessageView, NewMessage};
use crate::receipt::receipt_tracker::ReceiptTracker;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

struct ChannelState {
    summary: ConversationSummary,
    messages: Vec<Message>,
    receipts: ReceiptTracker,
    draft: MessageDraft,
}

/// One open conversation: its message history, live inbound messages,
/// read receipts, and the unsent draft. Dropping the channel (or calling
/// [`close`](Self::close)) tears down its feed listener.
pub struct ConversationChannel {
    conversation_id: ConversationId,
    user_id: UserId,
    counterpart_id: UserId,
    backend: Arc<dyn MarketBackend>,
    images: Arc<dyn ImageStore>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<RwLock<ChannelState>>,
    cancel: CancellationToken,
    _feed_guard: FeedGuard,
}

impl ConversationChannel {
    pub(crate) async fn open(
        summary: ConversationSummary,
        user_id: UserId,
        backend: Arc<dyn MarketBackend>,
        images: Arc<dyn ImageStore>,
        subscriptions: &SubscriptionManager,
        events: mpsc::UnboundedSender<SessionEvent>,
        parent_cancel: &CancellationToken,
    ) -> Result<Self> {
        let conversation_id = summary.conversation.id;
        let counterpart_id = summary.conversation.counterpart(user_id).ok_or_else(|| {
            ChatError::Denied("You are not a participant in this conversation".to_string())
        })?;

        // Subscribe before the history fetch so messages landing during
        // the fetch are buffered rather than lost.
        let (feed_rx, feed_guard) = subscriptions.register(user_id).into_parts();

        let messages = backend.messages_for_conversation(conversation_id).await?;
        let receipt_rows = backend.receipts_for_conversation(conversation_id).await?;

        let mut receipts = ReceiptTracker::new(conversation_id, user_id, counterpart_id);
        receipts.seed(receipt_rows);
        let last_read = messages.last().map(|message| message.id);

        let state = Arc::new(RwLock::new(ChannelState {
            summary,
            messages,
            receipts,
            draft: MessageDraft::default(),
        }));
        let cancel = parent_cancel.child_token();

        tokio::spawn(run_channel_feed(
            conversation_id,
            user_id,
            backend.clone(),
            Arc::clone(&state),
            events.clone(),
            cancel.clone(),
            feed_rx,
        ));

        let channel = Self {
            conversation_id,
            user_id,
            counterpart_id,
            backend,
            images,
            events,
            state,
            cancel,
            _feed_guard: feed_guard,
        };

        // Opening the thread counts as reading everything in it.
        record_receipt(&channel.backend, conversation_id, user_id, last_read).await;
        clear_unread(&channel.backend, conversation_id, user_id).await;

        Ok(channel)
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn viewer_id(&self) -> UserId {
        self.user_id
    }

    pub fn counterpart_id(&self) -> UserId {
        self.counterpart_id
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the live feed. Idempotent; dropping the channel does the same.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub async fn summary(&self) -> ConversationSummary {
        self.state.read().await.summary.clone()
    }

    /// Message history plus derived read flags, oldest first.
    pub async fn messages(&self) -> Vec<MessageView> {
        let guard = self.state.read().await;
        guard
            .messages
            .iter()
            .map(|message| MessageView {
                read: guard.receipts.is_read(message),
                message: message.clone(),
            })
            .collect()
    }

    pub async fn draft(&self) -> MessageDraft {
        self.state.read().await.draft.clone()
    }

    pub async fn set_draft_text(&self, text: &str) {
        self.state.write().await.draft.text = text.to_string();
    }

    /// Stage an uploaded image reference for the next [`send_image`](Self::send_image).
    pub async fn stage_image(&self, image_ref: &str) {
        self.state.write().await.draft.image = Some(image_ref.to_string());
    }

    /// Send the drafted text. Whitespace-only drafts are ignored. On
    /// failure the draft is kept so the user can retry; the error surfaces
    /// as a [`SessionEvent::Notice`].
    pub async fn send(&self) {
        let text = {
            let guard = self.state.read().await;
            guard.draft.text.trim().to_string()
        };
        if text.is_empty() {
            return;
        }
        self.send_new(
            NewMessage::text(self.conversation_id, self.user_id, text),
            true,
        )
        .await;
    }

    /// Send an offer message. The text comes from the offer dialog, not
    /// the draft, so the draft is left alone either way.
    pub async fn send_offer(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.send_new(
            NewMessage::offer(self.conversation_id, self.user_id, text.to_string()),
            false,
        )
        .await;
    }

    /// Send the staged image. The staged reference is consumed up front,
    /// so a failed send drops the attachment rather than re-offering it.
    pub async fn send_image(&self) {
        let image_ref = { self.state.write().await.draft.image.take() };
        let Some(image_ref) = image_ref else {
            return;
        };
        self.send_new(
            NewMessage::image(self.conversation_id, self.user_id, image_ref),
            false,
        )
        .await;
    }

    async fn send_new(&self, new: NewMessage, clear_draft_text: bool) {
        if self.cancel.is_cancelled() {
            return;
        }
        match self.backend.insert_message(new).await {
            Ok(message) => self.after_send(message, clear_draft_text).await,
            Err(e) => {
                tracing::error!(
                    "failed to send message in conversation {}: {}",
                    self.conversation_id,
                    e
                );
                let _ = self
                    .events
                    .send(SessionEvent::Notice(Notice::error("Message failed to send")));
            }
        }
    }

    async fn after_send(&self, message: Message, clear_draft_text: bool) {
        // The view may have torn down while the insert was in flight.
        if self.cancel.is_cancelled() {
            return;
        }

        let message_id = message.id;
        let preview = message.preview().to_string();
        let at = message.created_at;
        {
            let mut guard = self.state.write().await;
            // A concurrent resync may have fetched this message already.
            if !guard.messages.iter().any(|seen| seen.id == message_id) {
                guard.messages.push(message);
            }
            if clear_draft_text {
                guard.draft.text.clear();
            }
        }
        let _ = self.events.send(SessionEvent::MessageAppended {
            conversation_id: self.conversation_id,
            message_id,
        });

        record_receipt(
            &self.backend,
            self.conversation_id,
            self.user_id,
            Some(message_id),
        )
        .await;

        // The message itself is already stored; a preview failure only
        // leaves the list stale.
        if let Err(e) = self
            .backend
            .set_last_message(self.conversation_id, &preview, at)
            .await
        {
            tracing::warn!(
                "failed to update preview for conversation {}: {}",
                self.conversation_id,
                e
            );
            let _ = self.events.send(SessionEvent::Notice(Notice::error(
                "Conversation list may be out of date",
            )));
        }
    }

    /// Resolve a stored image reference for display.
    pub async fn image_url(&self, message: &Message) -> Option<String> {
        if !message.is_image {
            return None;
        }
        match self.images.image_url(&message.content).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!("failed to resolve image {}: {}", message.content, e);
                None
            }
        }
    }
}

impl Drop for ConversationChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn record_receipt(
    backend: &Arc<dyn MarketBackend>,
    conversation_id: ConversationId,
    user_id: UserId,
    last_read: Option<MessageId>,
) {
    if let Err(e) = backend
        .upsert_receipt(conversation_id, user_id, last_read)
        .await
    {
        tracing::warn!(
            "failed to record read receipt for conversation {}: {}",
            conversation_id,
            e
        );
    }
}

async fn clear_unread(
    backend: &Arc<dyn MarketBackend>,
    conversation_id: ConversationId,
    user_id: UserId,
) {
    if let Err(e) = backend.reset_counter(conversation_id, user_id).await {
        tracing::warn!(
            "failed to reset unread counter for conversation {}: {}",
            conversation_id,
            e
        );
    }
}

async fn run_channel_feed(
    conversation_id: ConversationId,
    user_id: UserId,
    backend: Arc<dyn MarketBackend>,
    state: Arc<RwLock<ChannelState>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
    feed_rx: broadcast::Receiver<FeedEvent>,
) {
    let mut stream = BroadcastStream::new(feed_rx);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(event)) => {
                    // Lag markers carry no conversation id and must get
                    // through the filter.
                    let other_thread = event
                        .conversation_id()
                        .is_some_and(|id| id != conversation_id);
                    if other_thread || cancel.is_cancelled() {
                        continue;
                    }
                    match event {
                        FeedEvent::Message { message, recipient } if recipient == user_id => {
                            let message_id = message.id;
                            let appended = {
                                let mut guard = state.write().await;
                                // A resync may already hold this message;
                                // drop the echo.
                                let known =
                                    guard.messages.iter().any(|seen| seen.id == message_id);
                                if !known {
                                    // Live messages arrive in creation order;
                                    // append without re-sorting.
                                    guard.messages.push(message);
                                }
                                !known
                            };
                            if appended {
                                let _ = events.send(SessionEvent::MessageAppended {
                                    conversation_id,
                                    message_id,
                                });
                                // The thread is on screen, so the new message
                                // is read the moment it lands.
                                record_receipt(
                                    &backend,
                                    conversation_id,
                                    user_id,
                                    Some(message_id),
                                )
                                .await;
                                clear_unread(&backend, conversation_id, user_id).await;
                            }
                        }
                        FeedEvent::Message { .. } => {}
                        FeedEvent::Receipt { receipt, .. } => {
                            let changed = { state.write().await.receipts.apply(receipt) };
                            if changed {
                                let _ = events.send(SessionEvent::ReceiptsChanged {
                                    conversation_id,
                                });
                            }
                        }
                        FeedEvent::Conversation {
                            kind: ChangeKind::Delete,
                            ..
                        } => {
                            let _ = events.send(SessionEvent::NavigateAway {
                                conversation_id,
                                reason: LeaveReason::Removed,
                            });
                            cancel.cancel();
                            break;
                        }
                        FeedEvent::Conversation { conversation, .. } => {
                            if conversation.deleted_by == Some(user_id) {
                                let _ = events.send(SessionEvent::NavigateAway {
                                    conversation_id,
                                    reason: LeaveReason::DeletedByMe,
                                });
                                cancel.cancel();
                                break;
                            }
                            state.write().await.summary.conversation = conversation;
                        }
                        // Counter changes drive the session-level badge,
                        // not the open thread.
                        FeedEvent::Counter { .. } => {}
                        FeedEvent::Lagged => {
                            if !resync_channel(
                                conversation_id,
                                user_id,
                                &backend,
                                &state,
                                &events,
                                &cancel,
                            )
                            .await
                            {
                                cancel.cancel();
                                break;
                            }
                        }
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        "conversation {} feed lagged, skipped {} events",
                        conversation_id,
                        skipped
                    );
                    if !resync_channel(
                        conversation_id,
                        user_id,
                        &backend,
                        &state,
                        &events,
                        &cancel,
                    )
                    .await
                    {
                        cancel.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }
    tracing::debug!("feed task for conversation {} stopped", conversation_id);
}

/// Rebuild the thread from the store after the feed dropped events.
/// Returns `false` when the conversation turns out to be gone or hidden
/// and the view should close.
async fn resync_channel(
    conversation_id: ConversationId,
    user_id: UserId,
    backend: &Arc<dyn MarketBackend>,
    state: &Arc<RwLock<ChannelState>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cancel: &CancellationToken,
) -> bool {
    let summary = match backend.summary_by_id(conversation_id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            let _ = events.send(SessionEvent::NavigateAway {
                conversation_id,
                reason: LeaveReason::Removed,
            });
            return false;
        }
        Err(e) => {
            tracing::warn!("resync failed for conversation {}: {}", conversation_id, e);
            return true;
        }
    };
    if summary.conversation.deleted_by == Some(user_id) {
        let _ = events.send(SessionEvent::NavigateAway {
            conversation_id,
            reason: LeaveReason::DeletedByMe,
        });
        return false;
    }
    let Some(counterpart_id) = summary.conversation.counterpart(user_id) else {
        let _ = events.send(SessionEvent::NavigateAway {
            conversation_id,
            reason: LeaveReason::Removed,
        });
        return false;
    };

    let messages = match backend.messages_for_conversation(conversation_id).await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!("resync failed for conversation {}: {}", conversation_id, e);
            return true;
        }
    };
    let receipt_rows = match backend.receipts_for_conversation(conversation_id).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!("resync failed for conversation {}: {}", conversation_id, e);
            return true;
        }
    };

    // The view may have torn down while the fetches were in flight.
    if cancel.is_cancelled() {
        return true;
    }

    let mut receipts = ReceiptTracker::new(conversation_id, user_id, counterpart_id);
    receipts.seed(receipt_rows);
    let newest = messages.last().map(|message| message.id);

    // Messages are append-only, so a longer list means the gap hid new
    // ones. The draft is the user's typing and survives untouched.
    let grew = {
        let mut guard = state.write().await;
        let grew = messages.len() > guard.messages.len();
        guard.summary = summary;
        guard.messages = messages;
        guard.receipts = receipts;
        grew
    };

    if grew {
        if let Some(message_id) = newest {
            let _ = events.send(SessionEvent::MessageAppended {
                conversation_id,
                message_id,
            });
        }
        // The thread is on screen, so everything refetched is read.
        record_receipt(backend, conversation_id, user_id, newest).await;
        clear_unread(backend, conversation_id, user_id).await;
    }
    let _ = events.send(SessionEvent::ReceiptsChanged { conversation_id });
    true
}

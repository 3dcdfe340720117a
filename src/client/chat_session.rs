use crate::backend::contracts::{ImageStore, MarketBackend, SessionProvider};
use crate::client::session_events::{Notice, SessionEvent};
use crate::conversation::conversation_lifecycle::{
    ConversationResolver, PendingListing, ResolveOutcome,
};
use crate::conversation::conversation_models::{ConversationFilter, ConversationSummary};
use crate::conversation::conversation_store::{ConversationStore, UpdateOutcome};
use crate::feed::feed_events::{ChangeKind, FeedEvent};
use crate::feed::subscription_manager::{FeedGuard, SubscriptionManager};
use crate::ids::{ConversationId, UserId};
use crate::unread::unread_aggregator::UnreadAggregator;
use crate::unread::unread_models::UnreadTotals;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

struct SessionState {
    store: ConversationStore,
    unread: UnreadAggregator,
}

/// One signed-in user's live chat state: the cached conversation list,
/// unread totals, and the lifecycle entry point for opening threads.
/// Holds the user's feed registration for as long as it lives.
pub struct ChatSession {
    user_id: UserId,
    backend: Arc<dyn MarketBackend>,
    images: Arc<dyn ImageStore>,
    session: Arc<dyn SessionProvider>,
    subscriptions: SubscriptionManager,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
    _feed_guard: FeedGuard,
}

impl ChatSession {
    pub(crate) async fn start(
        user_id: UserId,
        backend: Arc<dyn MarketBackend>,
        images: Arc<dyn ImageStore>,
        session: Arc<dyn SessionProvider>,
        subscriptions: SubscriptionManager,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (feed_rx, feed_guard) = subscriptions.register(user_id).into_parts();
        let state = Arc::new(RwLock::new(SessionState {
            store: ConversationStore::new(user_id),
            unread: UnreadAggregator::new(user_id),
        }));

        tokio::spawn(run_session_feed(
            user_id,
            backend.clone(),
            Arc::clone(&state),
            events_tx.clone(),
            cancel.clone(),
            feed_rx,
        ));

        let chat_session = Self {
            user_id,
            backend,
            images,
            session,
            subscriptions,
            events_tx,
            events_rx: Some(events_rx),
            state,
            cancel,
            _feed_guard: feed_guard,
        };
        chat_session.refresh().await;
        chat_session
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Take the event receiver. The embedding app drains it to learn when
    /// to re-pull snapshots. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Full refetch of the conversation list and unread counters. On
    /// failure the previous snapshot stays and a notice is emitted; with
    /// nobody signed in the list is simply empty.
    pub async fn refresh(&self) {
        match self.session.current_user() {
            Some(user) if user == self.user_id => {}
            _ => {
                {
                    let mut guard = self.state.write().await;
                    guard.store.clear();
                    guard.unread.clear();
                }
                let _ = self.events_tx.send(SessionEvent::ConversationsChanged);
                let _ = self
                    .events_tx
                    .send(SessionEvent::UnreadChanged(UnreadTotals::default()));
                return;
            }
        }

        reseed(
            self.user_id,
            &self.backend,
            &self.state,
            &self.events_tx,
            &self.cancel,
        )
        .await;
    }

    /// Snapshot of the cached conversation list for one tab.
    pub async fn conversations(&self, filter: ConversationFilter) -> Vec<ConversationSummary> {
        self.state.read().await.store.list(filter)
    }

    pub async fn unread(&self) -> UnreadTotals {
        let guard = self.state.read().await;
        guard.unread.totals(&guard.store)
    }

    /// Resolve and open a conversation view. `conversation_id` comes from
    /// tapping a thread in the list; `pending` from a "message seller"
    /// action on a listing.
    pub async fn open_conversation(
        &self,
        conversation_id: Option<ConversationId>,
        pending: Option<PendingListing>,
    ) -> ResolveOutcome {
        ConversationResolver {
            backend: &self.backend,
            images: &self.images,
            subscriptions: &self.subscriptions,
            events: &self.events_tx,
            cancel: &self.cancel,
            current_user: self.session.current_user(),
        }
        .resolve(conversation_id, pending)
        .await
    }

    /// Soft-delete a thread for this user. The cached list updates via
    /// the resulting feed event; on failure it stays as it was and a
    /// notice is emitted.
    pub async fn delete_conversation(&self, conversation_id: ConversationId) {
        if let Err(e) = self
            .backend
            .mark_deleted(conversation_id, self.user_id)
            .await
        {
            tracing::error!("failed to delete conversation {}: {}", conversation_id, e);
            let _ = self.events_tx.send(SessionEvent::Notice(Notice::error(
                "Could not delete the conversation",
            )));
        }
    }

    /// Stop the session's live feed. Channels opened from it stop too.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_session_feed(
    user_id: UserId,
    backend: Arc<dyn MarketBackend>,
    state: Arc<RwLock<SessionState>>,
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
                    if cancel.is_cancelled() {
                        break;
                    }
                    apply_feed_event(user_id, &backend, &state, &events, &cancel, event).await;
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!("session feed for {} lagged, skipped {} events", user_id, skipped);
                    // Deltas are gone for good; patch nothing, refetch everything.
                    reseed(user_id, &backend, &state, &events, &cancel).await;
                }
                None => break,
            },
        }
    }
    tracing::debug!("session feed task for user {} stopped", user_id);
}

async fn apply_feed_event(
    user_id: UserId,
    backend: &Arc<dyn MarketBackend>,
    state: &Arc<RwLock<SessionState>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cancel: &CancellationToken,
    event: FeedEvent,
) {
    match event {
        FeedEvent::Conversation {
            kind: ChangeKind::Insert,
            conversation,
        } => {
            if conversation.visible_to(user_id) {
                fetch_and_insert(backend, state, events, cancel, conversation.id).await;
            }
        }
        FeedEvent::Conversation {
            kind: ChangeKind::Update,
            conversation,
        } => {
            let visible = conversation.visible_to(user_id);
            let conversation_id = conversation.id;
            let outcome = { state.write().await.store.apply_update(conversation) };
            match outcome {
                UpdateOutcome::Patched => {
                    let _ = events.send(SessionEvent::ConversationsChanged);
                }
                UpdateOutcome::Removed => notify_list_and_unread(state, events).await,
                // The update raced ahead of the insert; fetch just the
                // one thread instead of refreshing the whole list.
                UpdateOutcome::Missing if visible => {
                    fetch_and_insert(backend, state, events, cancel, conversation_id).await;
                }
                UpdateOutcome::Missing => {}
            }
        }
        FeedEvent::Conversation {
            kind: ChangeKind::Delete,
            conversation,
        } => {
            let removed = { state.write().await.store.apply_delete(conversation.id) };
            if removed {
                notify_list_and_unread(state, events).await;
            }
        }
        FeedEvent::Counter { counter } => {
            let (changed, totals) = {
                let mut guard = state.write().await;
                let session_state = &mut *guard;
                let changed = session_state.unread.apply(&counter);
                (changed, session_state.unread.totals(&session_state.store))
            };
            if changed {
                let _ = events.send(SessionEvent::UnreadChanged(totals));
            }
        }
        FeedEvent::Message { message, .. } => {
            // Previews keep listed threads fresh; a message for an unknown
            // thread means its insert was missed, so recover it.
            let known = { state.read().await.store.contains(message.conversation_id) };
            if !known {
                fetch_and_insert(backend, state, events, cancel, message.conversation_id).await;
            }
        }
        // Receipts only matter to open conversation channels.
        FeedEvent::Receipt { .. } => {}
        FeedEvent::Lagged => {
            reseed(user_id, backend, state, events, cancel).await;
        }
    }
}

/// Replace the cached list and counters with a fresh snapshot from the
/// store. Shared by the initial fetch and by lag recovery, where the
/// missed deltas cannot be reconstructed.
async fn reseed(
    user_id: UserId,
    backend: &Arc<dyn MarketBackend>,
    state: &Arc<RwLock<SessionState>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cancel: &CancellationToken,
) {
    let summaries = match backend.summaries_for_user(user_id).await {
        Ok(summaries) => summaries,
        Err(e) => {
            tracing::error!("conversation refresh failed for {}: {}", user_id, e);
            let _ = events.send(SessionEvent::Notice(Notice::error(
                "Could not refresh conversations",
            )));
            return;
        }
    };
    let counters = match backend.counters_for_user(user_id).await {
        Ok(counters) => Some(counters),
        Err(e) => {
            tracing::warn!("unread counter refresh failed for {}: {}", user_id, e);
            None
        }
    };

    // The session may have closed while the fetches were in flight.
    if cancel.is_cancelled() {
        return;
    }

    let totals = {
        let mut guard = state.write().await;
        let session_state = &mut *guard;
        session_state.store.replace_all(summaries);
        if let Some(counters) = counters {
            session_state.unread.replace_all(counters);
        }
        session_state.unread.totals(&session_state.store)
    };
    let _ = events.send(SessionEvent::ConversationsChanged);
    let _ = events.send(SessionEvent::UnreadChanged(totals));
}

async fn fetch_and_insert(
    backend: &Arc<dyn MarketBackend>,
    state: &Arc<RwLock<SessionState>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    cancel: &CancellationToken,
    conversation_id: ConversationId,
) {
    match backend.summary_by_id(conversation_id).await {
        Ok(Some(summary)) => {
            // Teardown may have raced the fetch; don't apply stale state.
            if cancel.is_cancelled() {
                return;
            }
            let inserted = { state.write().await.store.apply_insert(summary) };
            if inserted {
                notify_list_and_unread(state, events).await;
            }
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("failed to fetch conversation {}: {}", conversation_id, e);
        }
    }
}

async fn notify_list_and_unread(
    state: &Arc<RwLock<SessionState>>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let totals = {
        let guard = state.read().await;
        guard.unread.totals(&guard.store)
    };
    let _ = events.send(SessionEvent::ConversationsChanged);
    let _ = events.send(SessionEvent::UnreadChanged(totals));
}

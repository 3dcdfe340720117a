use crate::backend::contracts::MarketBackend;
use crate::feed::feed_events::FeedEvent;
use crate::ids::UserId;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

/// One shared per-user feed, fanned out to however many views are
/// listening. The upstream pump task exists once per user no matter how
/// many registrations are live.
struct UserFeed {
    tx: broadcast::Sender<FeedEvent>,
    listeners: usize,
    cancel: CancellationToken,
}

struct Inner {
    backend: Arc<dyn MarketBackend>,
    feeds: DashMap<UserId, UserFeed>,
    capacity: usize,
}

/// Hands out per-user feed registrations, multiplexing all of a user's
/// listeners over a single upstream subscription. The upstream pump is
/// started on the first registration and cancelled when the last one is
/// dropped.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(backend: Arc<dyn MarketBackend>, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                feeds: DashMap::new(),
                capacity,
            }),
        }
    }

    /// Attach a listener to `user_id`'s feed. Must be called from within a
    /// Tokio runtime.
    pub fn register(&self, user_id: UserId) -> FeedRegistration {
        let (receiver, listeners) = {
            let mut feed = self.inner.feeds.entry(user_id).or_insert_with(|| {
                spawn_user_feed(&self.inner.backend, user_id, self.inner.capacity)
            });
            feed.listeners += 1;
            (feed.tx.subscribe(), feed.listeners)
        };
        tracing::debug!("user {} feed now has {} listeners", user_id, listeners);

        FeedRegistration {
            receiver,
            guard: FeedGuard {
                user_id,
                inner: Arc::clone(&self.inner),
            },
        }
    }

    pub fn listener_count(&self, user_id: UserId) -> usize {
        self.inner
            .feeds
            .get(&user_id)
            .map(|feed| feed.listeners)
            .unwrap_or(0)
    }

    /// Number of users with a live upstream subscription.
    pub fn active_feeds(&self) -> usize {
        self.inner.feeds.len()
    }
}

fn spawn_user_feed(backend: &Arc<dyn MarketBackend>, user_id: UserId, capacity: usize) -> UserFeed {
    let (tx, _) = broadcast::channel(capacity);
    let cancel = CancellationToken::new();

    let mut stream = BroadcastStream::new(backend.subscribe_feed());
    let task_tx = tx.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        if event.concerns(user_id) {
                            // No listeners is fine, they may be mid-teardown.
                            let _ = task_tx.send(event);
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!(
                            "feed for user {} lagged, skipped {} events",
                            user_id,
                            skipped
                        );
                        // The skipped events are gone; tell the listeners
                        // their caches need re-seeding.
                        let _ = task_tx.send(FeedEvent::Lagged);
                    }
                    // The store dropped its feed; nothing more will come.
                    None => break,
                },
            }
        }
        tracing::debug!("feed pump for user {} stopped", user_id);
    });

    UserFeed {
        tx,
        listeners: 0,
        cancel,
    }
}

fn release(inner: &Inner, user_id: UserId) {
    if let Some(mut feed) = inner.feeds.get_mut(&user_id) {
        feed.listeners = feed.listeners.saturating_sub(1);
        drop(feed);
        // Cancel and drop the entry only if no listener re-registered in
        // the meantime; the closure runs under the map's shard lock.
        inner.feeds.remove_if(&user_id, |_, feed| {
            if feed.listeners == 0 {
                feed.cancel.cancel();
                true
            } else {
                false
            }
        });
    }
}

/// A live attachment to one user's feed. Dropping the guard releases the
/// refcount; the upstream pump dies with the last guard.
pub struct FeedRegistration {
    receiver: broadcast::Receiver<FeedEvent>,
    guard: FeedGuard,
}

impl FeedRegistration {
    pub fn into_parts(self) -> (broadcast::Receiver<FeedEvent>, FeedGuard) {
        (self.receiver, self.guard)
    }
}

pub struct FeedGuard {
    user_id: UserId,
    inner: Arc<Inner>,
}

impl Drop for FeedGuard {
    fn drop(&mut self) {
        release(&self.inner, self.user_id);
    }
}

use crate::feed::feed_events::FeedEvent;
use tokio::sync::broadcast;

/// The raw change feed a backend store publishes into. One hub per store,
/// fanned out per user by the subscription manager.
#[derive(Debug, Clone)]
pub struct FeedHub {
    tx: broadcast::Sender<FeedEvent>,
}

impl FeedHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a committed change. Having no subscribers is normal.
    pub fn publish(&self, event: FeedEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }
}

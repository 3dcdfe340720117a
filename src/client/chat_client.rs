use crate::backend::contracts::{ImageStore, MarketBackend, SessionProvider};
use crate::backend::images::CdnImageStore;
use crate::client::chat_session::ChatSession;
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::feed::subscription_manager::SubscriptionManager;
use std::sync::Arc;

/// Long-lived entry point the embedding app constructs once. Sessions are
/// opened from it whenever a user signs in.
#[derive(Clone)]
pub struct ChatClient {
    backend: Arc<dyn MarketBackend>,
    images: Arc<dyn ImageStore>,
    session: Arc<dyn SessionProvider>,
    subscriptions: SubscriptionManager,
}

impl ChatClient {
    pub fn new(
        backend: Arc<dyn MarketBackend>,
        session: Arc<dyn SessionProvider>,
        config: &ChatConfig,
    ) -> Self {
        let subscriptions = SubscriptionManager::new(backend.clone(), config.feed_capacity);
        let images: Arc<dyn ImageStore> =
            Arc::new(CdnImageStore::new(config.image_base_url.clone()));
        Self {
            backend,
            images,
            session,
            subscriptions,
        }
    }

    /// Swap in a different image resolver, e.g. a local file store in tests.
    pub fn with_image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = images;
        self
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Open a live session for the signed-in user. Fails only when nobody
    /// is signed in; the initial list snapshot is fetched before returning.
    pub async fn open_session(&self) -> Result<ChatSession> {
        let user_id = self.session.current_user().ok_or(ChatError::AuthRequired)?;
        tracing::info!("opening chat session for user {}", user_id);
        Ok(ChatSession::start(
            user_id,
            self.backend.clone(),
            self.images.clone(),
            self.session.clone(),
            self.subscriptions.clone(),
        )
        .await)
    }
}

use crate::backend::contracts::SessionProvider;
use crate::ids::UserId;
use parking_lot::RwLock;
use std::sync::Arc;

/// A sign-in state that tests and the QA runner can flip at will. Real
/// deployments wire the marketplace app's own auth session in instead.
#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    user: Arc<RwLock<Option<UserId>>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: UserId) -> Self {
        let session = Self::new();
        session.sign_in(user_id);
        session
    }

    pub fn sign_in(&self, user_id: UserId) {
        *self.user.write() = Some(user_id);
    }

    pub fn sign_out(&self) {
        *self.user.write() = None;
    }
}

impl SessionProvider for SharedSession {
    fn current_user(&self) -> Option<UserId> {
        *self.user.read()
    }
}

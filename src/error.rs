use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by the conversation engine and its backend stores.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("sign-in required")]
    AuthRequired,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Denied(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),
}

impl ChatError {
    pub fn store(message: impl Into<String>) -> Self {
        ChatError::Store(message.into())
    }
}

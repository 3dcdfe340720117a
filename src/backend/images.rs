use crate::backend::contracts::ImageStore;
use crate::error::{ChatError, Result};
use async_trait::async_trait;

/// Resolves image references against a CDN base URL.
#[derive(Debug, Clone)]
pub struct CdnImageStore {
    base_url: String,
}

impl CdnImageStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ImageStore for CdnImageStore {
    async fn image_url(&self, image_ref: &str) -> Result<String> {
        if image_ref.is_empty() {
            return Err(ChatError::BadRequest("empty image reference".to_string()));
        }
        Ok(format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            image_ref.trim_start_matches('/')
        ))
    }
}

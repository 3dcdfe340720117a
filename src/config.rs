/// Tunables for a chat engine instance.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Capacity of each broadcast feed channel. Slow consumers past this
    /// lag and skip ahead rather than block the publisher.
    pub feed_capacity: usize,
    /// Base URL that image references resolve against.
    pub image_base_url: String,
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self {
            feed_capacity: std::env::var("CHAT_FEED_CAPACITY")
                .unwrap_or_else(|_| "256".to_string())
                .parse()
                .expect("CHAT_FEED_CAPACITY must be a number"),
            image_base_url: std::env::var("CHAT_IMAGE_BASE_URL")
                .unwrap_or_else(|_| "https://img.tradepost.app".to_string()),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            feed_capacity: 256,
            image_base_url: "https://img.tradepost.app".to_string(),
        }
    }
}

pub mod feed_events;
pub mod feed_hub;
pub mod subscription_manager;

pub use feed_events::{ChangeKind, FeedEvent};
pub use feed_hub::FeedHub;
pub use subscription_manager::{FeedGuard, FeedRegistration, SubscriptionManager};

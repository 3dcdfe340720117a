// Declare submodules
pub mod unread_aggregator;
pub mod unread_models;

// Re-export public items
pub use unread_aggregator::UnreadAggregator;
pub use unread_models::{UnreadCounter, UnreadTotals};

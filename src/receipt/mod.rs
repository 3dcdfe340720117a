// Declare submodules
pub mod receipt_models;
pub mod receipt_tracker;

// Re-export public items
pub use receipt_models::ReadReceipt;
pub use receipt_tracker::ReceiptTracker;

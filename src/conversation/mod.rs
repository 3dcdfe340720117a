// Declare submodules
pub mod conversation_lifecycle;
pub mod conversation_models;
pub mod conversation_store;

// Re-export public items
pub use conversation_lifecycle::{PendingListing, ResolveOutcome};
pub use conversation_models::{
    Conversation, ConversationFilter, ConversationSummary, ListingSummary, NewConversation,
    ParticipantRole, PartySummary,
};
pub use conversation_store::{ConversationStore, UpdateOutcome};

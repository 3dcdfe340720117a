// Declare submodules
pub mod message_channel;
pub mod message_models;

// Re-export public items
pub use message_channel::ConversationChannel;
pub use message_models::{Message, MessageDraft, MessageView, NewMessage, IMAGE_PREVIEW};

// Declare submodules
pub mod chat_client;
pub mod chat_session;
pub mod session_events;

// Re-export public items
pub use chat_client::ChatClient;
pub use chat_session::ChatSession;
pub use session_events::{LeaveReason, Notice, NoticeLevel, SessionEvent};

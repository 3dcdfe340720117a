// Declare submodules
pub mod contracts;
pub mod images;
pub mod memory;
pub mod postgres;
pub mod session;

// Re-export public items
pub use contracts::{
    ChangeFeed, ConversationRepository, CounterRepository, ImageStore, ListingAdmin,
    ListingProvider, MarketBackend, MessageRepository, ReceiptRepository, SessionProvider,
};
pub use images::CdnImageStore;
pub use memory::{FaultPoint, MemoryBackend};
pub use postgres::PgBackend;
pub use session::SharedSession;

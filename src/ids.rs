use uuid::Uuid;

pub type UserId = Uuid;
pub type ConversationId = Uuid;
pub type MessageId = Uuid;
pub type ListingId = Uuid;

use crate::backend::contracts::{ImageStore, MarketBackend};
use crate::client::session_events::{Notice, SessionEvent};
use crate::conversation::conversation_models::NewConversation;
use crate::error::ChatError;
use crate::feed::subscription_manager::SubscriptionManager;
use crate::ids::{ConversationId, ListingId, UserId};
use crate::message::message_channel::ConversationChannel;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Intent to contact a seller about one listing, created by an explicit
/// "message seller" action. Passed by value into resolution and consumed
/// there, so a stale intent can never leak into a later chat open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingListing(pub ListingId);

/// Terminal result of resolving which conversation a chat view shows.
pub enum ResolveOutcome {
    /// An existing conversation was found and opened.
    Found(ConversationChannel),
    /// A conversation was created for a pending listing contact and opened.
    Created(ConversationChannel),
    /// Nothing to open. A notice has already been emitted.
    NotFound,
    /// The user is not a participant in the requested conversation.
    Denied,
    /// Nobody is signed in; the app should route to sign-in.
    AuthRequired,
}

impl ResolveOutcome {
    /// The opened channel, if resolution produced one.
    pub fn into_channel(self) -> Option<ConversationChannel> {
        match self {
            ResolveOutcome::Found(channel) | ResolveOutcome::Created(channel) => Some(channel),
            _ => None,
        }
    }
}

impl fmt::Debug for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveOutcome::Found(_) => write!(f, "Found(..)"),
            ResolveOutcome::Created(_) => write!(f, "Created(..)"),
            ResolveOutcome::NotFound => write!(f, "NotFound"),
            ResolveOutcome::Denied => write!(f, "Denied"),
            ResolveOutcome::AuthRequired => write!(f, "AuthRequired"),
        }
    }
}

/// Resolution ladder for opening a chat view: direct lookup by id first,
/// then conversation creation from a pending listing contact, and
/// explicit terminal outcomes for everything else.
pub(crate) struct ConversationResolver<'a> {
    pub backend: &'a Arc<dyn MarketBackend>,
    pub images: &'a Arc<dyn ImageStore>,
    pub subscriptions: &'a SubscriptionManager,
    pub events: &'a mpsc::UnboundedSender<SessionEvent>,
    pub cancel: &'a CancellationToken,
    pub current_user: Option<UserId>,
}

impl ConversationResolver<'_> {
    pub(crate) async fn resolve(
        self,
        conversation_id: Option<ConversationId>,
        pending: Option<PendingListing>,
    ) -> ResolveOutcome {
        let Some(user_id) = self.current_user else {
            return ResolveOutcome::AuthRequired;
        };

        if let Some(id) = conversation_id {
            match self.backend.conversation_by_id(id).await {
                Ok(Some(conversation)) => {
                    if !conversation.is_participant(user_id) {
                        tracing::warn!("user {} denied access to conversation {}", user_id, id);
                        self.notice("You do not have access to this conversation");
                        return ResolveOutcome::Denied;
                    }
                    return self.open_existing(id, user_id).await;
                }
                // Unknown id; fall through to the pending contact, if any.
                Ok(None) => {}
                Err(e) => return self.store_failure(e),
            }
        }

        if let Some(PendingListing(listing_id)) = pending {
            return self.create_for_listing(listing_id, user_id).await;
        }

        self.notice("Conversation not found");
        ResolveOutcome::NotFound
    }

    async fn open_existing(&self, id: ConversationId, user_id: UserId) -> ResolveOutcome {
        match self.backend.summary_by_id(id).await {
            Ok(Some(summary)) if summary.is_complete() => {
                match ConversationChannel::open(
                    summary,
                    user_id,
                    self.backend.clone(),
                    self.images.clone(),
                    self.subscriptions,
                    self.events.clone(),
                    self.cancel,
                )
                .await
                {
                    Ok(channel) => ResolveOutcome::Found(channel),
                    Err(e) => self.store_failure(e),
                }
            }
            // The row exists but its listing or a profile is gone, or it
            // vanished between the two lookups.
            Ok(_) => {
                tracing::warn!("conversation {} is orphaned or gone", id);
                self.notice("Conversation not found");
                ResolveOutcome::NotFound
            }
            Err(e) => self.store_failure(e),
        }
    }

    async fn create_for_listing(&self, listing_id: ListingId, user_id: UserId) -> ResolveOutcome {
        let listing = match self.backend.listing_summary(listing_id).await {
            Ok(Some(listing)) => listing,
            Ok(None) => {
                self.notice("This listing is no longer available");
                return ResolveOutcome::NotFound;
            }
            Err(e) => return self.store_failure(e),
        };

        let new = NewConversation {
            listing_id,
            buyer_id: user_id,
            seller_id: listing.owner_id,
        };
        match self.backend.find_or_create_conversation(new).await {
            Ok((conversation, created)) => {
                match self.open_existing(conversation.id, user_id).await {
                    ResolveOutcome::Found(channel) if created => ResolveOutcome::Created(channel),
                    other => other,
                }
            }
            Err(e) => self.store_failure(e),
        }
    }

    fn store_failure(&self, e: ChatError) -> ResolveOutcome {
        tracing::error!("conversation resolution failed: {}", e);
        self.notice("Could not open the conversation. Please try again.");
        ResolveOutcome::NotFound
    }

    fn notice(&self, text: &str) {
        let _ = self
            .events
            .send(SessionEvent::Notice(Notice::error(text)));
    }
}

// Tests for the admin purge cascade and for what partially deleted data
// looks like from the client side: orphans never reach a list or open.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tradepost_chat::admin::{purge_listing, StepOutcome};
use tradepost_chat::backend::memory::{FaultPoint, MemoryBackend};
use tradepost_chat::backend::session::SharedSession;
use tradepost_chat::client::{ChatClient, ChatSession, LeaveReason, SessionEvent};
use tradepost_chat::config::ChatConfig;
use tradepost_chat::conversation::{ConversationFilter, PendingListing, ResolveOutcome};
use tradepost_chat::ids::{ListingId, UserId};
use tradepost_chat::message::ConversationChannel;

#[tokio::test]
async fn test_purge_empties_lists_and_closes_open_threads() {
    let backend = Arc::new(MemoryBackend::default());
    let nadia = backend.seed_user("nadia");
    let tomas = backend.seed_user("tomas");
    let armchair = backend.seed_listing("Vintage armchair", 12000, nadia);

    let buyer_client = client_for(&backend, tomas);
    let mut buyer_session = buyer_client.open_session().await.expect("buyer session");
    let mut buyer_events = buyer_session.take_events().expect("first take");
    let buyer_channel = open_for_listing(&buyer_session, armchair).await;
    buyer_channel.set_draft_text("hello").await;
    buyer_channel.send().await;
    settle().await;

    let seller_client = client_for(&backend, nadia);
    let seller_session = seller_client.open_session().await.expect("seller session");
    let seller_channel = seller_session
        .open_conversation(Some(buyer_channel.conversation_id()), None)
        .await
        .into_channel()
        .expect("seller opens the thread");
    settle().await;

    let report = purge_listing(backend.as_ref(), armchair).await;
    settle().await;

    assert!(report.is_clean());
    assert_eq!(backend.conversation_count(), 0);
    assert!(buyer_channel.is_closed(), "the buyer's open thread closes");
    assert!(seller_channel.is_closed(), "the seller's open thread closes");
    let seen = drain(&mut buyer_events);
    assert!(
        seen.iter().any(|event| matches!(
            event,
            SessionEvent::NavigateAway {
                reason: LeaveReason::Removed,
                ..
            }
        )),
        "the buyer UI is told to leave the vanished thread"
    );
    assert!(buyer_session
        .conversations(ConversationFilter::All)
        .await
        .is_empty());
    assert!(seller_session
        .conversations(ConversationFilter::All)
        .await
        .is_empty());
}

#[tokio::test]
async fn test_purge_reports_deleted_row_counts() {
    let backend = Arc::new(MemoryBackend::default());
    let nadia = backend.seed_user("nadia");
    let tomas = backend.seed_user("tomas");
    let carla = backend.seed_user("carla");
    let armchair = backend.seed_listing("Vintage armchair", 12000, nadia);

    for buyer in [tomas, carla] {
        let client = client_for(&backend, buyer);
        let session = client.open_session().await.expect("buyer session");
        let channel = open_for_listing(&session, armchair).await;
        channel.set_draft_text("first").await;
        channel.send().await;
        channel.set_draft_text("second").await;
        channel.send().await;
        settle().await;
    }

    let report = purge_listing(backend.as_ref(), armchair).await;
    assert!(report.is_clean());
    assert_eq!(step_outcome(&report, "conversations"), StepOutcome::Deleted(2));
    assert_eq!(step_outcome(&report, "messages"), StepOutcome::Deleted(4));
    assert_eq!(step_outcome(&report, "listing"), StepOutcome::Deleted(1));
}

#[tokio::test]
async fn test_partial_purge_orphans_stay_invisible() {
    let backend = Arc::new(MemoryBackend::default());
    let nadia = backend.seed_user("nadia");
    let tomas = backend.seed_user("tomas");
    let armchair = backend.seed_listing("Vintage armchair", 12000, nadia);

    let buyer_client = client_for(&backend, tomas);
    let buyer_session = buyer_client.open_session().await.expect("buyer session");
    let channel = open_for_listing(&buyer_session, armchair).await;
    channel.set_draft_text("hello").await;
    channel.send().await;
    settle().await;
    let orphan_id = channel.conversation_id();
    drop(channel);

    // The conversation row survives the purge, its listing does not.
    backend.fail_once(FaultPoint::DeleteConversations);
    let report = purge_listing(backend.as_ref(), armchair).await;
    assert!(!report.is_clean());
    assert_eq!(backend.conversation_count(), 1, "the orphan row remains");

    let seller_client = client_for(&backend, nadia);
    let seller_session = seller_client.open_session().await.expect("seller session");
    assert!(
        seller_session
            .conversations(ConversationFilter::All)
            .await
            .is_empty(),
        "orphaned threads never reach the list"
    );

    let outcome = seller_session
        .open_conversation(Some(orphan_id), None)
        .await;
    assert!(
        matches!(outcome, ResolveOutcome::NotFound),
        "orphaned threads cannot be opened either"
    );
}

#[tokio::test]
async fn test_removed_account_hides_its_threads() {
    let backend = Arc::new(MemoryBackend::default());
    let nadia = backend.seed_user("nadia");
    let tomas = backend.seed_user("tomas");
    let armchair = backend.seed_listing("Vintage armchair", 12000, nadia);

    let buyer_client = client_for(&backend, tomas);
    let buyer_session = buyer_client.open_session().await.expect("buyer session");
    let channel = open_for_listing(&buyer_session, armchair).await;
    channel.set_draft_text("hello").await;
    channel.send().await;
    settle().await;
    let thread = channel.conversation_id();
    drop(channel);
    drop(buyer_session);

    backend.remove_user(tomas);

    let seller_client = client_for(&backend, nadia);
    let seller_session = seller_client.open_session().await.expect("seller session");
    assert!(
        seller_session
            .conversations(ConversationFilter::All)
            .await
            .is_empty(),
        "threads with a deleted account are filtered out"
    );
    let outcome = seller_session.open_conversation(Some(thread), None).await;
    assert!(matches!(outcome, ResolveOutcome::NotFound));
}

// ── helpers ──

fn client_for(backend: &Arc<MemoryBackend>, user: UserId) -> ChatClient {
    let auth = Arc::new(SharedSession::new());
    auth.sign_in(user);
    ChatClient::new(backend.clone(), auth, &ChatConfig::default())
}

async fn open_for_listing(session: &ChatSession, listing: ListingId) -> ConversationChannel {
    match session
        .open_conversation(None, Some(PendingListing(listing)))
        .await
        .into_channel()
    {
        Some(channel) => channel,
        None => panic!("conversation did not open for listing {}", listing),
    }
}

fn step_outcome(report: &tradepost_chat::admin::CascadeReport, entity: &str) -> StepOutcome {
    report
        .steps
        .iter()
        .find(|step| step.entity == entity)
        .map(|step| step.outcome.clone())
        .unwrap_or_else(|| panic!("no cascade step for {}", entity))
}

fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}

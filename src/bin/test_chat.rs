use anyhow::ensure;
use std::sync::Arc;
use std::time::Duration;
use tradepost_chat::backend::memory::MemoryBackend;
use tradepost_chat::backend::postgres::PgBackend;
use tradepost_chat::backend::session::SharedSession;
use tradepost_chat::client::ChatClient;
use tradepost_chat::config::ChatConfig;
use tradepost_chat::conversation::{ConversationFilter, PendingListing};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Walks the whole buyer/seller flow against the in-memory backend and,
/// when DATABASE_URL is set, repeats a short pass against Postgres.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tradepost_chat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("Running the in-memory walkthrough...");
    memory_walkthrough().await?;
    println!("✔ In-memory walkthrough passed");

    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            println!("Running the Postgres smoke pass...");
            postgres_smoke(&url).await?;
            println!("✔ Postgres smoke pass passed");
        }
        Err(_) => println!("DATABASE_URL not set, skipping the Postgres smoke pass"),
    }

    Ok(())
}

async fn memory_walkthrough() -> anyhow::Result<()> {
    let config = ChatConfig::default();
    let backend = Arc::new(MemoryBackend::new(&config));
    let buyer = backend.seed_user("tomas");
    let seller = backend.seed_user("nadia");
    let listing = backend.seed_listing("Vintage armchair", 12000, seller);

    // Buyer signs in and messages the seller from the listing page.
    let buyer_auth = Arc::new(SharedSession::new());
    buyer_auth.sign_in(buyer);
    let buyer_client = ChatClient::new(backend.clone(), buyer_auth, &config);
    let mut buyer_session = buyer_client.open_session().await?;
    let mut buyer_events = buyer_session.take_events().unwrap();

    let outcome = buyer_session
        .open_conversation(None, Some(PendingListing(listing)))
        .await;
    let channel = match outcome.into_channel() {
        Some(channel) => channel,
        None => anyhow::bail!("buyer could not open a conversation for the listing"),
    };

    channel.set_draft_text("Hi! Is the armchair still available?").await;
    channel.send().await;
    channel.send_offer("100.00").await;

    // Give the feed pumps a beat to propagate.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let messages = channel.messages().await;
    ensure!(messages.len() == 2, "expected 2 messages, got {}", messages.len());
    ensure!(!messages[0].read, "nothing should be read before the seller looks");

    // Seller signs in on their own device and finds one unread thread.
    let seller_auth = Arc::new(SharedSession::new());
    seller_auth.sign_in(seller);
    let seller_client = ChatClient::new(backend.clone(), seller_auth, &config);
    let seller_session = seller_client.open_session().await?;

    let selling = seller_session.conversations(ConversationFilter::Selling).await;
    ensure!(selling.len() == 1, "seller should see exactly one selling thread");
    // The list line is labeled with the other party, the buyer here.
    let counterpart = selling[0]
        .counterpart_profile(seller)
        .map(|profile| profile.username.as_str());
    ensure!(
        counterpart == Some("tomas"),
        "the thread should be labeled with the buyer's name"
    );
    let totals = seller_session.unread().await;
    ensure!(totals.selling == 2, "expected 2 unread, got {}", totals.selling);
    ensure!(totals.all == totals.selling, "everything unread is on the selling tab");

    // Opening the thread reads it: the badge clears and the buyer sees it.
    let conversation_id = selling[0].conversation.id;
    let seller_channel = match seller_session
        .open_conversation(Some(conversation_id), None)
        .await
        .into_channel()
    {
        Some(channel) => channel,
        None => anyhow::bail!("seller could not open the thread"),
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let totals = seller_session.unread().await;
    ensure!(totals.is_zero(), "badge should clear once the thread is open");
    let messages = channel.messages().await;
    ensure!(
        messages.iter().all(|view| view.read),
        "buyer should now see both messages as read"
    );

    println!("Events the buyer UI reacted to:");
    while let Ok(event) = buyer_events.try_recv() {
        println!("  {}", serde_json::to_string(&event)?);
    }

    seller_channel.close();
    channel.close();
    Ok(())
}

async fn postgres_smoke(database_url: &str) -> anyhow::Result<()> {
    let config = ChatConfig::default();
    let backend = Arc::new(PgBackend::connect(database_url, &config).await?);

    // Random usernames so repeated runs do not collide.
    let run = uuid::Uuid::new_v4().simple().to_string();
    let buyer = backend.seed_user(&format!("smoke_buyer_{}", run)).await?;
    let seller = backend.seed_user(&format!("smoke_seller_{}", run)).await?;
    let listing = backend.seed_listing("Smoke test listing", 500, seller).await?;

    let auth = Arc::new(SharedSession::new());
    auth.sign_in(buyer);
    let client = ChatClient::new(backend.clone(), auth, &config);
    let session = client.open_session().await?;

    let channel = match session
        .open_conversation(None, Some(PendingListing(listing)))
        .await
        .into_channel()
    {
        Some(channel) => channel,
        None => anyhow::bail!("could not open a conversation against Postgres"),
    };

    channel.set_draft_text("smoke test message").await;
    channel.send().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = channel.messages().await;
    ensure!(messages.len() == 1, "expected 1 message, got {}", messages.len());

    let buying = session.conversations(ConversationFilter::Buying).await;
    ensure!(buying.len() == 1, "expected the thread on the buying tab");

    channel.close();
    Ok(())
}

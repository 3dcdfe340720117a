//! Realtime conversation engine for the Tradepost classifieds marketplace.
//!
//! The crate is headless: it keeps a signed-in user's conversation list,
//! open message threads, read receipts and unread badge in sync with a
//! shared change feed, and tells the embedding UI what changed through
//! [`client::SessionEvent`]s. Storage sits behind the
//! [`backend::MarketBackend`] trait with an in-memory implementation for
//! tests and a Postgres one for production.

pub mod admin;
pub mod backend;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod feed;
pub mod ids;
pub mod message;
pub mod receipt;
pub mod unread;

pub use client::{ChatClient, ChatSession, SessionEvent};
pub use config::ChatConfig;
pub use error::{ChatError, Result};

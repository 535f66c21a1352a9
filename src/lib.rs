//! Client-side real-time sync for a two-party messenger.
//!
//! A [`SyncSession`](client::services::SyncSession) owns one STOMP connection,
//! an in-process dispatcher and the reconciler that merges REST snapshots with
//! pushed events (messages, typing, read receipts, presence).

pub mod client;
pub mod common;
pub mod utils;

//! Persistence for Ava sessions.
//!
//! Durable sessions, append-only transcripts, and per-session preferences
//! in a local SQLite database, plus the idle-expiry policy that decides
//! when sessions are finalized and purged.

mod db;
pub mod lifecycle;
pub mod store;

pub use lifecycle::{ExpiryReason, LifecycleManager};
pub use store::{new_session_id, SessionStore};

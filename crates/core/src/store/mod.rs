//! SQLite-backed store for cache tiers and queued mutations.
//!
//! This module provides the persistent state shared by every open page and the
//! background cache agent, using SQLite with async access via tokio-rusqlite:
//!
//! - Named, versioned cache tiers with insertion-ordered entries
//! - Durable FIFO mutation queue addressed by auto-assigned ids
//! - A single-row drain lease for cross-context mutual exclusion
//! - Automatic schema migrations and WAL mode for concurrent access

pub mod connection;
pub mod hash;
pub mod lease;
pub mod migrations;
pub mod mutations;
pub mod tiers;

pub use crate::Error;

pub use connection::StoreDb;
pub use mutations::{MutationPayload, QueuedMutation};
pub use tiers::{StoredResponse, TierSet};

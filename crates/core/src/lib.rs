//! Core types and shared functionality for markgo-shell.
//!
//! This crate provides:
//! - SQLite-backed store for the versioned cache tiers and the offline mutation queue
//! - Unified error types and the best-effort result type
//! - Configuration structures

pub mod config;
pub mod error;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use error::{BestEffort, Error};
pub use store::{MutationPayload, QueuedMutation, StoreDb, StoredResponse, TierSet};

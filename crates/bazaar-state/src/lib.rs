//! Bazaar State - The marketplace as an atomic, journaled whole
//!
//! This crate puts the components behind one execution boundary:
//! - `MarketState`: every component plus the operations that span them
//! - `Marketplace`: async facade that runs one call at a time under a lock
//! - `Command`: the serializable command surface
//! - `Journal`: hash-chained record of committed events
//! - `MarketSnapshot`: versioned persistence with ordered migrations
//!
//! # Architecture
//!
//! ```text
//! Command ──→ Marketplace ──lock──→ MarketState ──→ EventBuffer
//!                  │                                    │ (on success)
//!                  │                                    ↓
//!                  └──────── broadcast ←──────────── Journal
//! ```
//!
//! # Invariants
//!
//! 1. A call either commits all of its effects and events or none of them
//! 2. Subscribers only see events of committed calls, after the lock is released
//! 3. Journal records form an unbroken SHA-256 chain across restarts

pub mod command;
pub mod config;
pub mod error;
pub mod journal;
pub mod market;
pub mod snapshot;
pub mod state;

pub use command::{Command, CommandOutcome};
pub use config::MarketConfig;
pub use error::{StateError, StateResult};
pub use journal::{verify_chain, EventRecord, Journal, JournalHead, GENESIS_HASH};
pub use market::Marketplace;
pub use snapshot::{
    migrate, FileSnapshotStore, MarketSnapshot, MemorySnapshotStore, SnapshotStore, SCHEMA_VERSION,
};
pub use state::MarketState;

//! Bazaar Types - Canonical domain types for the agent marketplace ledger
//!
//! This crate contains the foundational types shared by every Bazaar
//! component, with zero dependencies on other bazaar crates:
//!
//! - Identity types (Address, ProposalId, TaskId)
//! - Denominations and integer amounts (Token, Amount)
//! - The error taxonomy every operation fails with
//! - Ledger events consumed by the indexer
//! - The access-control table (principal -> roles)
//!
//! # Invariants
//!
//! 1. Amounts are unsigned integers in the token's smallest unit
//! 2. Ids are allocated from sequences starting at 1 and are never reused
//! 3. Every failure is explicit and aborts the whole call

#[macro_use]
mod macros;

pub mod access;
pub mod address;
pub mod amount;
pub mod error;
pub mod event;
pub mod ids;

pub use access::*;
pub use address::*;
pub use amount::*;
pub use error::*;
pub use event::*;
pub use ids::*;

/// Version of the Bazaar types schema
pub const TYPES_VERSION: &str = "0.1.0";

/// Highest rating a requester can give on task completion
pub const MAX_RATING: u8 = 5;

/// Buffer that collects the events of one call until it commits
pub type EventBuffer = Vec<MarketEvent>;

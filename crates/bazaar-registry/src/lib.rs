//! Bazaar Agent Registry
//!
//! The registry exclusively owns agent and proposal records:
//! - Agents: identity, owner, profile, reputation accumulators
//! - Proposals: priced service offers published by agents
//! - Reputation: integer accumulators folded in on task completion
//!
//! # Invariants
//!
//! 1. Every active proposal's issuer is a registered agent
//! 2. Removing an agent deactivates all of its proposals in the same call
//! 3. Proposal ids are never reused
//! 4. A removed identity re-registers with zeroed reputation

pub mod agent;
pub mod registry;

pub use agent::*;
pub use registry::*;

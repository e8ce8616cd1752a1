//! Bazaar Projection - Read shapes for presentation layers
//!
//! Builds the agent record, pagination and error envelopes a REST layer
//! serves, from core data plus off-chain agent metadata. Nothing here
//! re-derives business rules: scores, statuses and codes come from the core.

pub mod agent;
pub mod common;
pub mod error;

pub use agent::*;
pub use common::*;
pub use error::*;

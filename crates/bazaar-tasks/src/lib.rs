//! Bazaar Task Ledger - Escrow-backed task lifecycle
//!
//! A task moves requester funds through its own escrow account:
//! - Creating a task locks the price in escrow
//! - Assigning routes the task to a registered agent
//! - Completing pays the escrow to the agent and rates it
//! - Cancelling refunds the escrow to the requester
//!
//! ```text
//! Created -> Assigned -> Completed
//!    \          \
//!     \----------+-> Cancelled
//! ```
//!
//! # Invariants
//!
//! 1. Escrow equals the price while Created or Assigned, zero once terminal
//! 2. No transition leaves a terminal state
//! 3. Funds are paid out at most once per task
//! 4. A failed payout leaves the task exactly as it was

pub mod lifecycle;
pub mod task;

pub use lifecycle::*;
pub use task::*;

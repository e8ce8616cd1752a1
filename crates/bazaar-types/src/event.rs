//! Ledger events
//!
//! Components only hold current state. Every change they make is described
//! by one of these events so the indexer can rebuild history.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Address, Amount, ProposalId, Role, TaskId, Token};

/// Task lifecycle status
///
/// ```text
/// Created ──assign──► Assigned ──complete──► Completed
///    │                   │
///    └──────cancel───────┴──────────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Created,
    Assigned,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses hold no escrow and never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Assigned => "Assigned",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Events emitted by ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarketEvent {
    /// A service name entered the catalog
    ServiceRegistered { name: String, category: String },

    AgentRegistered { agent: Address },

    AgentUpdated { agent: Address },

    /// Agent removed; carries the owner captured before the record was reset
    AgentUnregistered { agent: Address, owner: Address },

    ProposalAdded { agent: Address, proposal_id: ProposalId },

    ProposalRemoved { agent: Address, proposal_id: ProposalId },

    /// Reputation changed; score in hundredths (0..=500)
    ReputationUpdated { agent: Address, new_reputation: u32 },

    TaskCreated { task_id: TaskId, owner: Address },

    TaskAssigned { task_id: TaskId, agent: Address },

    TaskStatusChanged { task_id: TaskId, status: TaskStatus },

    /// Task owner granted or revoked a user's right to assign the task
    PermissionUpdated {
        task_id: TaskId,
        user: Address,
        allowed: bool,
    },

    /// Assignee agreed that the owner may cancel an assigned task
    CancellationConsented { task_id: TaskId, agent: Address },

    CreditsMinted { to: Address, amount: Amount },

    CreditsBurned { from: Address, amount: Amount },

    RoleGranted {
        role: Role,
        account: Address,
        sender: Address,
    },

    RoleRevoked {
        role: Role,
        account: Address,
        sender: Address,
    },

    /// Funds entered a holder account from the environment
    FundsDeposited {
        holder: Address,
        token: Token,
        amount: Amount,
    },

    /// Funds left a holder account to the environment
    FundsWithdrawn {
        holder: Address,
        token: Token,
        amount: Amount,
    },

    TokenHalted { token: Token },

    TokenResumed { token: Token },
}

impl MarketEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServiceRegistered { .. } => "ServiceRegistered",
            Self::AgentRegistered { .. } => "AgentRegistered",
            Self::AgentUpdated { .. } => "AgentUpdated",
            Self::AgentUnregistered { .. } => "AgentUnregistered",
            Self::ProposalAdded { .. } => "ProposalAdded",
            Self::ProposalRemoved { .. } => "ProposalRemoved",
            Self::ReputationUpdated { .. } => "ReputationUpdated",
            Self::TaskCreated { .. } => "TaskCreated",
            Self::TaskAssigned { .. } => "TaskAssigned",
            Self::TaskStatusChanged { .. } => "TaskStatusChanged",
            Self::PermissionUpdated { .. } => "PermissionUpdated",
            Self::CancellationConsented { .. } => "CancellationConsented",
            Self::CreditsMinted { .. } => "CreditsMinted",
            Self::CreditsBurned { .. } => "CreditsBurned",
            Self::RoleGranted { .. } => "RoleGranted",
            Self::RoleRevoked { .. } => "RoleRevoked",
            Self::FundsDeposited { .. } => "FundsDeposited",
            Self::FundsWithdrawn { .. } => "FundsWithdrawn",
            Self::TokenHalted { .. } => "TokenHalted",
            Self::TokenResumed { .. } => "TokenResumed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Created.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = MarketEvent::TaskStatusChanged {
            task_id: TaskId(3),
            status: TaskStatus::Assigned,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "TaskStatusChanged");
        assert_eq!(json["task_id"], 3);
        assert_eq!(json["status"], "Assigned");
        assert_eq!(event.name(), "TaskStatusChanged");
    }
}

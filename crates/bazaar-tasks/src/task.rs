//! Task records

use std::collections::BTreeSet;

use bazaar_types::{Address, Amount, ProposalId, TaskId, TaskStatus, Token};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a requester asks for when opening a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub prompt: String,
    pub price: Amount,
    #[serde(default)]
    pub token: Token,
}

impl TaskRequest {
    pub fn new(prompt: impl Into<String>, price: Amount, token: Token) -> Self {
        Self {
            prompt: prompt.into(),
            price,
            token,
        }
    }
}

/// A requester-funded unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    /// Requester who funded the escrow
    pub owner: Address,
    /// Agent the task is routed to, once assigned
    pub assignee: Option<Address>,
    /// Registration epoch of the assignee when the task was assigned
    #[serde(default)]
    pub assignee_registration: Option<u64>,
    pub prompt: String,
    pub price: Amount,
    pub token: Token,
    pub status: TaskStatus,
    /// Proposal this task was hired from, if any
    pub proposal_id: Option<ProposalId>,
    /// Rating given on completion
    pub rating: Option<u8>,
    /// Set when the assignee side agreed to cancel
    #[serde(default)]
    pub cancel_consent: bool,
    /// Users the owner allowed to assign this task
    #[serde(default)]
    pub permitted: BTreeSet<Address>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub(crate) fn new(task_id: TaskId, owner: Address, request: TaskRequest) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            owner,
            assignee: None,
            assignee_registration: None,
            prompt: request.prompt,
            price: request.price,
            token: request.token,
            status: TaskStatus::Created,
            proposal_id: None,
            rating: None,
            cancel_consent: false,
            permitted: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether `user` may assign this task
    pub fn can_assign(&self, user: &Address) -> bool {
        &self.owner == user || self.permitted.contains(user)
    }

    /// Amount that should sit in escrow for this task right now
    pub fn expected_escrow(&self) -> Amount {
        if self.is_terminal() {
            Amount::zero()
        } else {
            self.price
        }
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Funds moved out of escrow when a task settles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub task_id: TaskId,
    /// Final status of the task
    pub status: TaskStatus,
    /// Who received the escrow
    pub payee: Address,
    pub token: Token,
    pub amount: Amount,
    /// Agent reputation after the rating, in hundredths. Set on completion.
    pub reputation: Option<u32>,
}

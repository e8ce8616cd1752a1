//! Command surface
//!
//! Every mutating operation as a serializable value. Clients build
//! commands, the facade executes them atomically on behalf of a caller.

use bazaar_registry::AgentUpdate;
use bazaar_tasks::{Settlement, TaskRequest};
use bazaar_types::*;
use serde::{Deserialize, Serialize};

use crate::state::MarketState;

/// A mutating marketplace operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    RegisterService {
        name: String,
        category: String,
        #[serde(default)]
        description: String,
    },
    RegisterAgent {
        identity: Address,
        name: String,
        #[serde(default)]
        profile_uri: String,
    },
    SetAgentData {
        identity: Address,
        #[serde(flatten)]
        update: AgentUpdate,
    },
    RemoveAgent {
        identity: Address,
    },
    AddProposal {
        identity: Address,
        service_name: String,
        price: Amount,
        #[serde(default)]
        token: Token,
    },
    RemoveProposal {
        proposal_id: ProposalId,
    },
    CreateTask {
        #[serde(flatten)]
        request: TaskRequest,
    },
    HireProposal {
        proposal_id: ProposalId,
        prompt: String,
    },
    AssignTask {
        task_id: TaskId,
        agent: Address,
    },
    SetTaskPermission {
        task_id: TaskId,
        user: Address,
        allowed: bool,
    },
    ConsentCancellation {
        task_id: TaskId,
    },
    CompleteTask {
        task_id: TaskId,
        rating: u8,
    },
    CancelTask {
        task_id: TaskId,
    },
    Mint {
        to: Address,
        amount: Amount,
    },
    Burn {
        from: Address,
        amount: Amount,
    },
    TransferCredits {
        to: Address,
        amount: Amount,
    },
    GrantMinter {
        account: Address,
    },
    RevokeMinter {
        account: Address,
    },
    /// Environment: funds arrive for a holder. Needs the Operator role.
    Deposit {
        holder: Address,
        #[serde(default)]
        token: Token,
        amount: Amount,
    },
    /// Environment: the caller takes funds out
    Withdraw {
        #[serde(default)]
        token: Token,
        amount: Amount,
    },
    HaltToken {
        token: Token,
    },
    ResumeToken {
        token: Token,
    },
}

impl Command {
    /// Operation name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterService { .. } => "register_service",
            Self::RegisterAgent { .. } => "register_agent",
            Self::SetAgentData { .. } => "set_agent_data",
            Self::RemoveAgent { .. } => "remove_agent",
            Self::AddProposal { .. } => "add_proposal",
            Self::RemoveProposal { .. } => "remove_proposal",
            Self::CreateTask { .. } => "create_task",
            Self::HireProposal { .. } => "hire_proposal",
            Self::AssignTask { .. } => "assign_task",
            Self::SetTaskPermission { .. } => "set_task_permission",
            Self::ConsentCancellation { .. } => "consent_cancellation",
            Self::CompleteTask { .. } => "complete_task",
            Self::CancelTask { .. } => "cancel_task",
            Self::Mint { .. } => "mint",
            Self::Burn { .. } => "burn",
            Self::TransferCredits { .. } => "transfer_credits",
            Self::GrantMinter { .. } => "grant_minter",
            Self::RevokeMinter { .. } => "revoke_minter",
            Self::Deposit { .. } => "deposit",
            Self::Withdraw { .. } => "withdraw",
            Self::HaltToken { .. } => "halt_token",
            Self::ResumeToken { .. } => "resume_token",
        }
    }
}

/// What a successful command produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Done,
    ProposalCreated { proposal_id: ProposalId },
    TaskCreated { task_id: TaskId },
    Settled { settlement: Settlement },
    Balance { balance: Amount },
    /// Whether an idempotent toggle changed anything
    Changed { changed: bool },
}

impl MarketState {
    /// Apply one command on behalf of `caller`
    pub fn execute(
        &mut self,
        caller: &Address,
        command: Command,
        events: &mut EventBuffer,
    ) -> Result<CommandOutcome> {
        use CommandOutcome::*;

        let outcome = match command {
            Command::RegisterService {
                name,
                category,
                description,
            } => {
                self.register_service(caller, &name, &category, &description, events)?;
                Done
            }
            Command::RegisterAgent {
                identity,
                name,
                profile_uri,
            } => {
                self.register_agent(caller, &identity, &name, &profile_uri, events)?;
                Done
            }
            Command::SetAgentData { identity, update } => {
                self.set_agent_data(caller, &identity, update, events)?;
                Done
            }
            Command::RemoveAgent { identity } => {
                self.remove_agent(caller, &identity, events)?;
                Done
            }
            Command::AddProposal {
                identity,
                service_name,
                price,
                token,
            } => ProposalCreated {
                proposal_id: self.add_proposal(caller, &identity, &service_name, price, token, events)?,
            },
            Command::RemoveProposal { proposal_id } => {
                self.remove_proposal(caller, proposal_id, events)?;
                Done
            }
            Command::CreateTask { request } => TaskCreated {
                task_id: self.create_task(caller, request, events)?,
            },
            Command::HireProposal {
                proposal_id,
                prompt,
            } => TaskCreated {
                task_id: self.hire_proposal(caller, proposal_id, &prompt, events)?,
            },
            Command::AssignTask { task_id, agent } => {
                self.assign_task(caller, task_id, &agent, events)?;
                Done
            }
            Command::SetTaskPermission {
                task_id,
                user,
                allowed,
            } => {
                self.set_task_permission(caller, task_id, &user, allowed, events)?;
                Done
            }
            Command::ConsentCancellation { task_id } => {
                self.consent_cancellation(caller, task_id, events)?;
                Done
            }
            Command::CompleteTask { task_id, rating } => Settled {
                settlement: self.complete_task(caller, task_id, rating, events)?,
            },
            Command::CancelTask { task_id } => Settled {
                settlement: self.cancel_task(caller, task_id, events)?,
            },
            Command::Mint { to, amount } => Balance {
                balance: self.mint_credits(caller, &to, amount, events)?,
            },
            Command::Burn { from, amount } => Balance {
                balance: self.burn_credits(caller, &from, amount, events)?,
            },
            Command::TransferCredits { to, amount } => {
                self.transfer_credits(caller, &to, amount)?;
                Done
            }
            Command::GrantMinter { account } => Changed {
                changed: self.grant_minter(caller, &account, events)?,
            },
            Command::RevokeMinter { account } => Changed {
                changed: self.revoke_minter(caller, &account, events)?,
            },
            Command::Deposit {
                holder,
                token,
                amount,
            } => Balance {
                balance: self.deposit(caller, &holder, token, amount, events)?,
            },
            Command::Withdraw { token, amount } => Balance {
                balance: self.withdraw(caller, token, amount, events)?,
            },
            Command::HaltToken { token } => Changed {
                changed: self.halt_token(caller, token, events)?,
            },
            Command::ResumeToken { token } => Changed {
                changed: self.resume_token(caller, token, events)?,
            },
        };
        Ok(outcome)
    }
}

//! Task ledger state machine

use std::collections::BTreeMap;

use bazaar_ledger::{Account, EntryReason, Ledger};
use bazaar_registry::AgentDirectory;
use bazaar_types::*;
use serde::{Deserialize, Serialize};

use crate::{Settlement, Task, TaskRequest};

/// Owner of every task and of the task escrow accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLedger {
    tasks: BTreeMap<TaskId, Task>,
    next_task_id: TaskId,
}

impl Default for TaskLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskLedger {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_task_id: TaskId::FIRST,
        }
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Open a task and lock its price in escrow
    ///
    /// The deposit is taken before the record is stored, so a failed
    /// deposit leaves no task behind and consumes no id.
    pub fn create_task(
        &mut self,
        bank: &mut Ledger,
        caller: &Address,
        request: TaskRequest,
        events: &mut EventBuffer,
    ) -> Result<TaskId> {
        let task = self.open(bank, caller, request)?;
        let task_id = task.task_id;

        events.push(MarketEvent::TaskCreated {
            task_id,
            owner: *caller,
        });
        tracing::debug!(task = %task_id, owner = %caller, price = %task.price, "task created");

        self.store(task);
        Ok(task_id)
    }

    /// Open a task already assigned to the issuer of a hired proposal
    pub fn create_hired_task(
        &mut self,
        bank: &mut Ledger,
        caller: &Address,
        request: TaskRequest,
        proposal_id: ProposalId,
        agent: &Address,
        directory: &dyn AgentDirectory,
        events: &mut EventBuffer,
    ) -> Result<TaskId> {
        let registration = directory
            .registration_of(agent)
            .ok_or_else(|| MarketError::not_found("agent", agent))?;

        let mut task = self.open(bank, caller, request)?;
        let task_id = task.task_id;
        task.proposal_id = Some(proposal_id);
        task.assignee = Some(*agent);
        task.assignee_registration = Some(registration);
        task.status = TaskStatus::Assigned;

        events.push(MarketEvent::TaskCreated {
            task_id,
            owner: *caller,
        });
        events.push(MarketEvent::TaskAssigned {
            task_id,
            agent: *agent,
        });
        events.push(MarketEvent::TaskStatusChanged {
            task_id,
            status: TaskStatus::Assigned,
        });
        tracing::debug!(task = %task_id, proposal = %proposal_id, agent = %agent, "proposal hired");

        self.store(task);
        Ok(task_id)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Route a created task to a registered agent
    pub fn assign_task(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        agent: &Address,
        directory: &dyn AgentDirectory,
        events: &mut EventBuffer,
    ) -> Result<&Task> {
        let task = self.get_task(task_id)?;
        if !task.can_assign(caller) {
            return Err(MarketError::access_denied(format!(
                "{} may not assign task {}",
                caller, task_id
            )));
        }
        if task.status != TaskStatus::Created {
            return Err(MarketError::invalid_state(
                "task",
                task_id,
                format!("cannot assign a task in status {}", task.status),
            ));
        }
        let registration = directory
            .registration_of(agent)
            .ok_or_else(|| MarketError::not_found("agent", agent))?;

        let task = self.task_mut(task_id)?;
        task.assignee = Some(*agent);
        task.assignee_registration = Some(registration);
        task.set_status(TaskStatus::Assigned);

        events.push(MarketEvent::TaskAssigned {
            task_id,
            agent: *agent,
        });
        events.push(MarketEvent::TaskStatusChanged {
            task_id,
            status: TaskStatus::Assigned,
        });
        Ok(&*task)
    }

    /// Grant or revoke a user's right to assign the task
    pub fn set_permission(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        user: &Address,
        allowed: bool,
        events: &mut EventBuffer,
    ) -> Result<()> {
        let task = self.get_task(task_id)?;
        require_task_owner(task, caller)?;
        if task.is_terminal() {
            return Err(MarketError::invalid_state(
                "task",
                task_id,
                format!("task is already {}", task.status),
            ));
        }

        let task = self.task_mut(task_id)?;
        if allowed {
            task.permitted.insert(*user);
        } else {
            task.permitted.remove(user);
        }

        events.push(MarketEvent::PermissionUpdated {
            task_id,
            user: *user,
            allowed,
        });
        Ok(())
    }

    /// Record that the assignee side agrees to cancel an assigned task
    pub fn consent_cancellation(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        directory: &dyn AgentDirectory,
        events: &mut EventBuffer,
    ) -> Result<()> {
        let task = self.get_task(task_id)?;
        let (agent, agent_owner) = live_assignee(task, directory)?;
        let agent_owner = agent_owner.ok_or_else(|| MarketError::not_found("agent", agent))?;
        if caller != &agent_owner && caller != &agent {
            return Err(MarketError::access_denied(format!(
                "{} does not act for agent {}",
                caller, agent
            )));
        }
        if task.cancel_consent {
            return Err(MarketError::invalid_state(
                "task",
                task_id,
                "cancellation already consented",
            ));
        }

        self.task_mut(task_id)?.cancel_consent = true;
        events.push(MarketEvent::CancellationConsented { task_id, agent });
        Ok(())
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    /// Pay the escrow to the assignee and rate it
    ///
    /// Every step is validated before anything changes. The status moves to
    /// Completed before the payout and is restored if the payout fails.
    pub fn complete_task(
        &mut self,
        bank: &mut Ledger,
        caller: &Address,
        task_id: TaskId,
        rating: u8,
        directory: &mut dyn AgentDirectory,
        rater: &Address,
        events: &mut EventBuffer,
    ) -> Result<Settlement> {
        let task = self.get_task(task_id)?;
        require_task_owner(task, caller)?;
        if task.status != TaskStatus::Assigned {
            return Err(MarketError::invalid_state(
                "task",
                task_id,
                format!("cannot complete a task in status {}", task.status),
            ));
        }
        if rating > MAX_RATING {
            return Err(MarketError::invalid_input(
                "rating",
                format!("rating must be between 0 and {}", MAX_RATING),
            ));
        }
        let (agent, agent_owner) = live_assignee(task, directory)?;
        if agent_owner.is_none() {
            return Err(MarketError::not_found("agent", agent));
        }
        directory.check_reputation_update(rater, &agent, rating)?;

        let escrow = Account::Escrow(task_id);
        let payee = Account::Holder(agent);
        let (token, price) = (task.token, task.price);
        bank.check_transfer(&escrow, &payee, &token, price)?;

        let task = self.task_mut(task_id)?;
        task.set_status(TaskStatus::Completed);
        task.rating = Some(rating);

        if let Err(err) = bank.transfer(
            &escrow,
            &payee,
            &token,
            price,
            EntryReason::EscrowRelease { task_id },
        ) {
            self.restore(task_id, TaskStatus::Assigned);
            return Err(err);
        }

        let mark = events.len();
        events.push(MarketEvent::TaskStatusChanged {
            task_id,
            status: TaskStatus::Completed,
        });
        let reputation = match directory.update_reputation(rater, &agent, rating, events) {
            Ok(reputation) => Some(reputation),
            Err(err) => {
                events.truncate(mark);
                // The payee was just credited `price` of an unhalted token
                // and the escrow was just emptied, so the reversal is valid.
                match bank.transfer(
                    &payee,
                    &escrow,
                    &token,
                    price,
                    EntryReason::EscrowLock { task_id },
                ) {
                    Ok(_) => {
                        self.restore(task_id, TaskStatus::Assigned);
                        return Err(err);
                    }
                    Err(reversal) => {
                        // Escrow is already paid out, so the completion
                        // stands without a rating.
                        tracing::error!(
                            task = %task_id,
                            error = %err,
                            reversal = %reversal,
                            "payout could not be reversed, completing unrated"
                        );
                        if let Some(task) = self.tasks.get_mut(&task_id) {
                            task.rating = None;
                        }
                        events.push(MarketEvent::TaskStatusChanged {
                            task_id,
                            status: TaskStatus::Completed,
                        });
                        None
                    }
                }
            }
        };

        tracing::info!(
            task = %task_id,
            agent = %agent,
            amount = %price,
            token = %token,
            rating,
            "task completed"
        );
        Ok(Settlement {
            task_id,
            status: TaskStatus::Completed,
            payee: agent,
            token,
            amount: price,
            reputation,
        })
    }

    /// Cancel a task and refund its escrow to the owner
    ///
    /// A Created task is cancelled by its owner. An Assigned task needs the
    /// assignee side: its owner may cancel directly, and the task owner may
    /// cancel once that side consented or once the agent is gone.
    pub fn cancel_task(
        &mut self,
        bank: &mut Ledger,
        caller: &Address,
        task_id: TaskId,
        directory: &dyn AgentDirectory,
        events: &mut EventBuffer,
    ) -> Result<Settlement> {
        let task = self.get_task(task_id)?;
        if task.is_terminal() {
            return Err(MarketError::invalid_state(
                "task",
                task_id,
                format!("cannot cancel a task in status {}", task.status),
            ));
        }
        check_cancel_rights(task, caller, directory)?;

        let previous = task.status;
        let owner = task.owner;
        let escrow = Account::Escrow(task_id);
        let refund = Account::Holder(owner);
        let (token, price) = (task.token, task.price);
        bank.check_transfer(&escrow, &refund, &token, price)?;

        self.task_mut(task_id)?.set_status(TaskStatus::Cancelled);
        if let Err(err) = bank.transfer(
            &escrow,
            &refund,
            &token,
            price,
            EntryReason::EscrowRefund { task_id },
        ) {
            self.restore(task_id, previous);
            return Err(err);
        }

        events.push(MarketEvent::TaskStatusChanged {
            task_id,
            status: TaskStatus::Cancelled,
        });
        tracing::info!(task = %task_id, owner = %owner, amount = %price, token = %token, "task cancelled");
        Ok(Settlement {
            task_id,
            status: TaskStatus::Cancelled,
            payee: owner,
            token,
            amount: price,
            reputation: None,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn get_task(&self, task_id: TaskId) -> Result<&Task> {
        self.tasks
            .get(&task_id)
            .ok_or_else(|| MarketError::not_found("task", task_id))
    }

    /// Escrow currently held for a task
    pub fn escrow_balance(&self, bank: &Ledger, task_id: TaskId) -> Result<Amount> {
        let task = self.get_task(task_id)?;
        Ok(bank.escrow_balance(task_id, &task.token))
    }

    /// All tasks ordered by id
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn tasks_owned_by<'a>(&'a self, owner: &'a Address) -> impl Iterator<Item = &'a Task> + 'a {
        self.tasks.values().filter(move |t| &t.owner == owner)
    }

    pub fn next_task_id(&self) -> TaskId {
        self.next_task_id
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Validate a request and move its price into the next task's escrow
    fn open(&self, bank: &mut Ledger, caller: &Address, request: TaskRequest) -> Result<Task> {
        if request.price.is_zero() {
            return Err(MarketError::invalid_input(
                "price",
                "price must be greater than zero",
            ));
        }

        let task_id = self.next_task_id;
        bank.transfer(
            &Account::Holder(*caller),
            &Account::Escrow(task_id),
            &request.token,
            request.price,
            EntryReason::EscrowLock { task_id },
        )?;
        Ok(Task::new(task_id, *caller, request))
    }

    fn store(&mut self, task: Task) {
        self.next_task_id = task.task_id.next();
        self.tasks.insert(task.task_id, task);
    }

    fn task_mut(&mut self, task_id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(&task_id)
            .ok_or_else(|| MarketError::not_found("task", task_id))
    }

    fn restore(&mut self, task_id: TaskId, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.set_status(status);
            if status != TaskStatus::Completed {
                task.rating = None;
            }
        }
    }
}

fn require_task_owner(task: &Task, caller: &Address) -> Result<()> {
    if &task.owner != caller {
        return Err(MarketError::access_denied(format!(
            "{} is not the owner of task {}",
            caller, task.task_id
        )));
    }
    Ok(())
}

fn assigned_agent(task: &Task) -> Result<Address> {
    match (task.status, task.assignee) {
        (TaskStatus::Assigned, Some(agent)) => Ok(agent),
        _ => Err(MarketError::invalid_state(
            "task",
            task.task_id,
            format!("task is {}, not assigned", task.status),
        )),
    }
}

/// The assigned agent and, while the registration the task was assigned to
/// still stands, its owner
///
/// A removed agent whose address was registered again counts as gone.
fn live_assignee(task: &Task, directory: &dyn AgentDirectory) -> Result<(Address, Option<Address>)> {
    let agent = assigned_agent(task)?;
    let live = match task.assignee_registration {
        Some(registration) => directory.registration_of(&agent) == Some(registration),
        None => directory.is_registered(&agent),
    };
    let owner = if live { directory.owner_of(&agent) } else { None };
    Ok((agent, owner))
}

fn check_cancel_rights(task: &Task, caller: &Address, directory: &dyn AgentDirectory) -> Result<()> {
    if task.status == TaskStatus::Created {
        return require_task_owner(task, caller);
    }

    let (agent, agent_owner) = live_assignee(task, directory)?;
    if agent_owner.as_ref() == Some(caller) || (caller == &agent && agent_owner.is_some()) {
        return Ok(());
    }
    require_task_owner(task, caller)?;
    if task.cancel_consent || agent_owner.is_none() {
        Ok(())
    } else {
        Err(MarketError::access_denied(format!(
            "agent {} has not consented to cancelling task {}",
            agent, task.task_id
        )))
    }
}

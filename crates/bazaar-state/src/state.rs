//! The marketplace as one value
//!
//! `MarketState` wires the components together and implements the
//! operations that cross component boundaries. Every method takes the
//! calling principal and an event buffer, and leaves the state untouched
//! when it returns an error.

use bazaar_catalog::{Service, ServiceCatalog};
use bazaar_credits::CreditsLedger;
use bazaar_ledger::{Account, EntryReason, Ledger};
use bazaar_registry::{AgentData, AgentRegistry, AgentUpdate};
use bazaar_tasks::{Settlement, Task, TaskLedger, TaskRequest};
use bazaar_types::*;
use serde::{Deserialize, Serialize};

use crate::config::MarketConfig;

/// All marketplace components plus the ledger principal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    catalog: ServiceCatalog,
    registry: AgentRegistry,
    tasks: TaskLedger,
    credits: CreditsLedger,
    bank: Ledger,
    /// Identity the task ledger uses to rate agents and mint rewards
    principal: Address,
    #[serde(default)]
    credits_reward: Amount,
    /// Principals allowed to act as the environment
    #[serde(default)]
    operators: AccessControl,
}

impl MarketState {
    /// Genesis state for a configuration
    pub fn new(config: &MarketConfig) -> Self {
        let principal = config.ledger_principal;

        let catalog = match config.catalog_admin {
            Some(admin) => ServiceCatalog::with_admins([admin]),
            None => ServiceCatalog::new(),
        };

        let mut registry = AgentRegistry::new();
        registry.grant_role(principal, Role::ReputationUpdater);

        let minters = std::iter::once(principal).chain(config.initial_minters.iter().copied());
        let credits = CreditsLedger::with_minters(minters);

        let mut operators = AccessControl::new();
        operators.grant(principal, Role::Operator);
        for operator in &config.initial_operators {
            operators.grant(*operator, Role::Operator);
        }

        Self {
            catalog,
            registry,
            tasks: TaskLedger::new(),
            credits,
            bank: Ledger::new(),
            principal,
            credits_reward: config.credits_reward_per_task,
            operators,
        }
    }

    // ========================================================================
    // Catalog and registry
    // ========================================================================

    pub fn register_service(
        &mut self,
        caller: &Address,
        name: &str,
        category: &str,
        description: &str,
        events: &mut EventBuffer,
    ) -> Result<Service> {
        self.catalog
            .register_service(caller, name, category, description, events)
            .cloned()
    }

    pub fn register_agent(
        &mut self,
        caller: &Address,
        identity: &Address,
        name: &str,
        profile_uri: &str,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.registry
            .register_agent(caller, identity, name, profile_uri, events)
            .map(|_| ())
    }

    pub fn set_agent_data(
        &mut self,
        caller: &Address,
        identity: &Address,
        update: AgentUpdate,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.registry
            .set_agent_data(caller, identity, update, events)
            .map(|_| ())
    }

    /// Remove an agent along with all of its active proposals
    ///
    /// Tasks already assigned to the agent keep their escrow. Their owners
    /// can cancel them without consent once the agent is gone.
    pub fn remove_agent(
        &mut self,
        caller: &Address,
        identity: &Address,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.registry.remove_agent(caller, identity, events)?;

        let stranded = self
            .tasks
            .tasks()
            .filter(|t| t.assignee.as_ref() == Some(identity) && !t.is_terminal())
            .count();
        if stranded > 0 {
            tracing::info!(agent = %identity, tasks = stranded, "removed agent still holds assigned tasks");
        }
        Ok(())
    }

    pub fn add_proposal(
        &mut self,
        caller: &Address,
        identity: &Address,
        service_name: &str,
        price: Amount,
        token: Token,
        events: &mut EventBuffer,
    ) -> Result<ProposalId> {
        self.registry
            .add_proposal(caller, identity, service_name, price, token, &self.catalog, events)
    }

    pub fn remove_proposal(
        &mut self,
        caller: &Address,
        proposal_id: ProposalId,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.registry.remove_proposal(caller, proposal_id, events)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub fn create_task(
        &mut self,
        caller: &Address,
        request: TaskRequest,
        events: &mut EventBuffer,
    ) -> Result<TaskId> {
        self.tasks.create_task(&mut self.bank, caller, request, events)
    }

    /// Fund a task at a proposal's terms, assign it to the issuer and
    /// consume the proposal
    pub fn hire_proposal(
        &mut self,
        caller: &Address,
        proposal_id: ProposalId,
        prompt: &str,
        events: &mut EventBuffer,
    ) -> Result<TaskId> {
        let proposal = self.registry.hireable_proposal(proposal_id)?.clone();
        let request = TaskRequest::new(prompt, proposal.price, proposal.token);

        let task_id = self.tasks.create_hired_task(
            &mut self.bank,
            caller,
            request,
            proposal_id,
            &proposal.issuer,
            &self.registry,
            events,
        )?;
        self.registry.consume_proposal(proposal_id, events)?;
        Ok(task_id)
    }

    pub fn assign_task(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        agent: &Address,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.tasks
            .assign_task(caller, task_id, agent, &self.registry, events)
            .map(|_| ())
    }

    pub fn set_task_permission(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        user: &Address,
        allowed: bool,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.tasks.set_permission(caller, task_id, user, allowed, events)
    }

    pub fn consent_cancellation(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.tasks
            .consent_cancellation(caller, task_id, &self.registry, events)
    }

    /// Settle a task to its assignee, rate it and mint the credits reward
    ///
    /// The reward is validated before anything else. When it cannot be
    /// minted the task still completes, without a reward.
    pub fn complete_task(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        rating: u8,
        events: &mut EventBuffer,
    ) -> Result<Settlement> {
        let reward = self.completion_reward(task_id)?;

        let settlement = self.tasks.complete_task(
            &mut self.bank,
            caller,
            task_id,
            rating,
            &mut self.registry,
            &self.principal,
            events,
        )?;

        match reward {
            Some((amount, Ok(()))) => {
                self.credits
                    .mint(&self.principal, &settlement.payee, amount, events)?;
            }
            Some((_, Err(err))) => {
                tracing::warn!(
                    task = %task_id,
                    agent = %settlement.payee,
                    code = err.error_code(),
                    error = %err,
                    "credits reward skipped"
                );
            }
            None => {}
        }
        Ok(settlement)
    }

    /// Credits reward owed for completing `task_id` and whether it can be
    /// minted
    fn completion_reward(&self, task_id: TaskId) -> Result<Option<(Amount, Result<()>)>> {
        let reward = self.credits_reward;
        let Some(assignee) = self.tasks.get_task(task_id)?.assignee else {
            return Ok(None);
        };
        if reward.is_zero() {
            return Ok(None);
        }
        let mintable = self.credits.check_mint(&self.principal, &assignee, reward);
        Ok(Some((reward, mintable)))
    }

    pub fn cancel_task(
        &mut self,
        caller: &Address,
        task_id: TaskId,
        events: &mut EventBuffer,
    ) -> Result<Settlement> {
        self.tasks
            .cancel_task(&mut self.bank, caller, task_id, &self.registry, events)
    }

    // ========================================================================
    // Credits
    // ========================================================================

    pub fn mint_credits(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
        events: &mut EventBuffer,
    ) -> Result<Amount> {
        self.credits.mint(caller, to, amount, events)
    }

    pub fn burn_credits(
        &mut self,
        caller: &Address,
        from: &Address,
        amount: Amount,
        events: &mut EventBuffer,
    ) -> Result<Amount> {
        self.credits.burn(caller, from, amount, events)
    }

    pub fn transfer_credits(&mut self, caller: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.credits.transfer(caller, to, amount)
    }

    pub fn grant_minter(
        &mut self,
        caller: &Address,
        account: &Address,
        events: &mut EventBuffer,
    ) -> Result<bool> {
        self.credits.grant_minter(caller, account, events)
    }

    pub fn revoke_minter(
        &mut self,
        caller: &Address,
        account: &Address,
        events: &mut EventBuffer,
    ) -> Result<bool> {
        self.credits.revoke_minter(caller, account, events)
    }

    // ========================================================================
    // Environment
    // ========================================================================

    /// Bring funds into a holder account. Operators only.
    pub fn deposit(
        &mut self,
        caller: &Address,
        holder: &Address,
        token: Token,
        amount: Amount,
        events: &mut EventBuffer,
    ) -> Result<Amount> {
        self.operators.require(caller, Role::Operator)?;
        let balance = self
            .bank
            .credit(&Account::Holder(*holder), &token, amount, EntryReason::Deposit)?;
        events.push(MarketEvent::FundsDeposited {
            holder: *holder,
            token,
            amount,
        });
        Ok(balance)
    }

    /// Take funds out of the caller's own holder account
    pub fn withdraw(
        &mut self,
        caller: &Address,
        token: Token,
        amount: Amount,
        events: &mut EventBuffer,
    ) -> Result<Amount> {
        let balance = self
            .bank
            .debit(&Account::Holder(*caller), &token, amount, EntryReason::Withdrawal)?;
        events.push(MarketEvent::FundsWithdrawn {
            holder: *caller,
            token,
            amount,
        });
        Ok(balance)
    }

    /// Freeze every movement of a fungible token. Operators only.
    pub fn halt_token(&mut self, caller: &Address, token: Token, events: &mut EventBuffer) -> Result<bool> {
        self.operators.require(caller, Role::Operator)?;
        let changed = self.bank.halt_token(&token)?;
        if changed {
            events.push(MarketEvent::TokenHalted { token });
        }
        Ok(changed)
    }

    pub fn resume_token(&mut self, caller: &Address, token: Token, events: &mut EventBuffer) -> Result<bool> {
        self.operators.require(caller, Role::Operator)?;
        let changed = self.bank.resume_token(&token)?;
        if changed {
            events.push(MarketEvent::TokenResumed { token });
        }
        Ok(changed)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn tasks(&self) -> &TaskLedger {
        &self.tasks
    }

    pub fn credits(&self) -> &CreditsLedger {
        &self.credits
    }

    pub fn bank(&self) -> &Ledger {
        &self.bank
    }

    pub fn principal(&self) -> Address {
        self.principal
    }

    pub fn credits_reward(&self) -> Amount {
        self.credits_reward
    }

    pub fn is_operator(&self, principal: &Address) -> bool {
        self.operators.has_role(principal, Role::Operator)
    }

    pub fn get_agent_data(&self, identity: &Address) -> Result<AgentData> {
        self.registry.get_agent_data(identity)
    }

    pub fn get_task(&self, task_id: TaskId) -> Result<&Task> {
        self.tasks.get_task(task_id)
    }

    pub fn escrow_balance(&self, task_id: TaskId) -> Result<Amount> {
        self.tasks.escrow_balance(&self.bank, task_id)
    }

    pub fn holder_balance(&self, holder: &Address, token: &Token) -> Amount {
        self.bank.holder_balance(holder, token)
    }

    /// Used by snapshot migrations
    pub(crate) fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    /// Used by snapshot migrations
    pub(crate) fn grant_operator(&mut self, principal: Address) -> bool {
        self.operators.grant(principal, Role::Operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(reward: u128) -> (MarketState, Address, Address, Address) {
        let config = MarketConfig::default().with_credits_reward(Amount::new(reward));
        let mut state = MarketState::new(&config);
        let requester = Address::from_low_u64(0x100);
        let owner = Address::from_low_u64(0x200);
        let agent = Address::from_low_u64(0x201);
        let mut events = EventBuffer::new();

        state
            .register_service(&owner, "translate", "language", "", &mut events)
            .unwrap();
        state
            .register_agent(&owner, &agent, "translator", "ipfs://t", &mut events)
            .unwrap();
        let principal = state.principal();
        state
            .deposit(&principal, &requester, Token::Native, Amount::new(1_000), &mut events)
            .unwrap();
        (state, requester, owner, agent)
    }

    #[test]
    fn test_genesis_roles() {
        let state = MarketState::new(&MarketConfig::default());
        let principal = state.principal();
        assert!(state.registry().has_role(&principal, Role::ReputationUpdater));
        assert!(state.credits().is_minter(&principal));
        assert!(state.is_operator(&principal));
        assert!(!state.catalog().is_gated());
    }

    #[test]
    fn test_completion_mints_reward() {
        let (mut state, requester, _, agent) = setup(25);
        let mut events = EventBuffer::new();
        let task_id = state
            .create_task(
                &requester,
                TaskRequest::new("hola", Amount::new(300), Token::Native),
                &mut events,
            )
            .unwrap();
        state.assign_task(&requester, task_id, &agent, &mut events).unwrap();

        state.complete_task(&requester, task_id, 5, &mut events).unwrap();

        assert_eq!(state.credits().balance_of(&agent), Amount::new(25));
        assert_eq!(state.holder_balance(&agent, &Token::Native), Amount::new(300));
        assert_eq!(
            events.last(),
            Some(&MarketEvent::CreditsMinted {
                to: agent,
                amount: Amount::new(25)
            })
        );
    }

    #[test]
    fn test_zero_reward_mints_nothing() {
        let (mut state, requester, _, agent) = setup(0);
        let mut events = EventBuffer::new();
        let task_id = state
            .create_task(
                &requester,
                TaskRequest::new("hola", Amount::new(300), Token::Native),
                &mut events,
            )
            .unwrap();
        state.assign_task(&requester, task_id, &agent, &mut events).unwrap();
        state.complete_task(&requester, task_id, 3, &mut events).unwrap();

        assert_eq!(state.credits().total_supply(), Amount::zero());
    }

    #[test]
    fn test_hire_proposal() {
        let (mut state, requester, owner, agent) = setup(0);
        let mut events = EventBuffer::new();
        let proposal_id = state
            .add_proposal(&owner, &agent, "translate", Amount::new(400), Token::Native, &mut events)
            .unwrap();
        events.clear();

        let task_id = state
            .hire_proposal(&requester, proposal_id, "translate my novel", &mut events)
            .unwrap();

        let task = state.get_task(task_id).unwrap();
        assert_eq!(task.assignee, Some(agent));
        assert_eq!(task.price, Amount::new(400));
        assert_eq!(state.escrow_balance(task_id).unwrap(), Amount::new(400));
        assert!(!state.registry().get_proposal(proposal_id).unwrap().is_active);
        assert_eq!(
            events.iter().map(MarketEvent::name).collect::<Vec<_>>(),
            vec!["TaskCreated", "TaskAssigned", "TaskStatusChanged", "ProposalRemoved"]
        );

        // Consumed proposals cannot be hired twice
        assert!(matches!(
            state.hire_proposal(&requester, proposal_id, "again", &mut events),
            Err(MarketError::NotFound { .. })
        ));
    }

    #[test]
    fn test_hire_without_funds_keeps_proposal() {
        let (mut state, _, owner, agent) = setup(0);
        let mut events = EventBuffer::new();
        let proposal_id = state
            .add_proposal(&owner, &agent, "translate", Amount::new(400), Token::Native, &mut events)
            .unwrap();

        let broke = Address::from_low_u64(0x999);
        let result = state.hire_proposal(&broke, proposal_id, "x", &mut events);

        assert!(matches!(result, Err(MarketError::InsufficientFunds { .. })));
        assert!(state.registry().get_proposal(proposal_id).unwrap().is_active);
        assert!(state.tasks().is_empty());
    }

    #[test]
    fn test_withdraw_own_funds_only() {
        let (mut state, requester, owner, _) = setup(0);
        let mut events = EventBuffer::new();

        assert!(matches!(
            state.withdraw(&owner, Token::Native, Amount::new(1), &mut events),
            Err(MarketError::InsufficientFunds { .. })
        ));
        let left = state
            .withdraw(&requester, Token::Native, Amount::new(400), &mut events)
            .unwrap();
        assert_eq!(left, Amount::new(600));
    }

    #[test]
    fn test_halt_emits_once() {
        let (mut state, ..) = setup(0);
        let mut events = EventBuffer::new();
        let token = Token::Fungible(Address::from_low_u64(0xc0));
        let principal = state.principal();

        assert!(state.halt_token(&principal, token, &mut events).unwrap());
        assert!(!state.halt_token(&principal, token, &mut events).unwrap());
        assert_eq!(events, vec![MarketEvent::TokenHalted { token }]);
        assert!(matches!(
            state.halt_token(&principal, Token::Native, &mut events),
            Err(MarketError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_environment_operations_need_operator() {
        let (mut state, requester, ..) = setup(0);
        let mut events = EventBuffer::new();
        let token = Token::Fungible(Address::from_low_u64(0xc0));

        assert!(matches!(
            state.deposit(&requester, &requester, Token::Native, Amount::new(500), &mut events),
            Err(MarketError::AccessDenied { .. })
        ));
        assert!(matches!(
            state.halt_token(&requester, token, &mut events),
            Err(MarketError::AccessDenied { .. })
        ));
        assert!(matches!(
            state.resume_token(&requester, token, &mut events),
            Err(MarketError::AccessDenied { .. })
        ));
        assert_eq!(state.holder_balance(&requester, &Token::Native), Amount::new(1_000));
        assert!(!state.bank().is_halted(&token));
        assert!(events.is_empty());

        let config = MarketConfig::default().with_operator(requester);
        let mut state = MarketState::new(&config);
        state
            .deposit(&requester, &requester, Token::Native, Amount::new(5), &mut events)
            .unwrap();
    }

    #[test]
    fn test_completion_survives_revoked_principal() {
        let minter = Address::from_low_u64(0x77);
        let config = MarketConfig::default()
            .with_credits_reward(Amount::new(10))
            .with_minter(minter);
        let mut state = MarketState::new(&config);
        let principal = state.principal();
        let requester = Address::from_low_u64(0x100);
        let owner = Address::from_low_u64(0x200);
        let agent = Address::from_low_u64(0x201);
        let mut events = EventBuffer::new();

        state
            .register_agent(&owner, &agent, "translator", "", &mut events)
            .unwrap();
        state
            .deposit(&principal, &requester, Token::Native, Amount::new(300), &mut events)
            .unwrap();
        let task_id = state
            .create_task(
                &requester,
                TaskRequest::new("hola", Amount::new(300), Token::Native),
                &mut events,
            )
            .unwrap();
        state.assign_task(&requester, task_id, &agent, &mut events).unwrap();
        assert!(state.revoke_minter(&minter, &principal, &mut events).unwrap());
        events.clear();

        let settlement = state.complete_task(&requester, task_id, 4, &mut events).unwrap();

        assert_eq!(settlement.status, TaskStatus::Completed);
        assert_eq!(state.holder_balance(&agent, &Token::Native), Amount::new(300));
        assert_eq!(state.credits().balance_of(&agent), Amount::zero());
        assert!(!events
            .iter()
            .any(|e| matches!(e, MarketEvent::CreditsMinted { .. })));
    }
}

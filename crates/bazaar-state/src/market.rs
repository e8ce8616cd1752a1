//! Async marketplace facade
//!
//! One mutating call at a time runs to completion under a single lock.
//! Events of a call are committed to the journal only when it succeeds and
//! are broadcast after the lock is released.

use bazaar_catalog::Service;
use bazaar_registry::{AgentData, AgentUpdate};
use bazaar_tasks::{Settlement, Task, TaskRequest};
use bazaar_types::*;
use tokio::sync::{broadcast, Mutex};
use tracing::Instrument;

use crate::command::{Command, CommandOutcome};
use crate::config::MarketConfig;
use crate::error::StateResult;
use crate::journal::{EventRecord, Journal, JournalHead};
use crate::snapshot::{MarketSnapshot, SnapshotStore};
use crate::state::MarketState;

struct Inner {
    state: MarketState,
    journal: Journal,
}

/// The marketplace shared by every client
pub struct Marketplace {
    inner: Mutex<Inner>,
    events: broadcast::Sender<EventRecord>,
    config: MarketConfig,
}

impl Marketplace {
    /// Start from genesis
    pub fn new(config: MarketConfig) -> Self {
        let state = MarketState::new(&config);
        Self::assemble(config, state, JournalHead::default())
    }

    /// Resume from a snapshot, migrating it first
    pub fn from_snapshot(config: MarketConfig, mut snapshot: MarketSnapshot) -> StateResult<Self> {
        crate::snapshot::migrate(&mut snapshot)?;
        Ok(Self::assemble(config, snapshot.state, snapshot.journal))
    }

    /// Resume from a store, or start from genesis when it is empty
    pub async fn open(config: MarketConfig, store: &dyn SnapshotStore) -> StateResult<Self> {
        match store.load().await? {
            Some(snapshot) => {
                tracing::info!(
                    sequence = snapshot.journal.sequence,
                    taken_at = %snapshot.taken_at,
                    "resuming marketplace from snapshot"
                );
                Self::from_snapshot(config, snapshot)
            }
            None => {
                tracing::info!("starting marketplace from genesis");
                Ok(Self::new(config))
            }
        }
    }

    fn assemble(config: MarketConfig, state: MarketState, head: JournalHead) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Mutex::new(Inner {
                state,
                journal: Journal::resume(head, config.journal_capacity),
            }),
            events,
            config,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Subscribe to committed events
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    // ========================================================================
    // Execution
    // ========================================================================

    /// Run one operation atomically
    ///
    /// On success the buffered events are journaled and then broadcast; on
    /// failure they are dropped.
    async fn call<T, F>(&self, op: &'static str, caller: &Address, f: F) -> Result<T>
    where
        F: FnOnce(&mut MarketState, &mut EventBuffer) -> Result<T>,
    {
        let span = tracing::info_span!("market_call", op, caller = %caller);
        async move {
            let mut buffer = EventBuffer::new();
            let (result, records) = {
                let mut inner = self.inner.lock().await;
                match f(&mut inner.state, &mut buffer) {
                    Ok(value) => {
                        let records: Vec<_> =
                            buffer.drain(..).map(|e| inner.journal.append(e)).collect();
                        (Ok(value), records)
                    }
                    Err(err) => (Err(err), Vec::new()),
                }
            };

            match &result {
                Ok(_) => tracing::debug!(events = records.len(), "call committed"),
                Err(err) => tracing::warn!(code = err.error_code(), error = %err, "call rejected"),
            }
            for record in records {
                // No subscribers is fine
                let _ = self.events.send(record);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Execute a command on behalf of `caller`
    pub async fn execute(&self, caller: Address, command: Command) -> Result<CommandOutcome> {
        self.call(command.name(), &caller, move |state, events| {
            state.execute(&caller, command, events)
        })
        .await
    }

    // ========================================================================
    // Catalog and registry
    // ========================================================================

    pub async fn register_service(
        &self,
        caller: Address,
        name: &str,
        category: &str,
        description: &str,
    ) -> Result<Service> {
        self.call("register_service", &caller, |state, events| {
            state.register_service(&caller, name, category, description, events)
        })
        .await
    }

    pub async fn register_agent(
        &self,
        caller: Address,
        identity: Address,
        name: &str,
        profile_uri: &str,
    ) -> Result<()> {
        self.call("register_agent", &caller, |state, events| {
            state.register_agent(&caller, &identity, name, profile_uri, events)
        })
        .await
    }

    pub async fn set_agent_data(
        &self,
        caller: Address,
        identity: Address,
        update: AgentUpdate,
    ) -> Result<()> {
        self.call("set_agent_data", &caller, |state, events| {
            state.set_agent_data(&caller, &identity, update, events)
        })
        .await
    }

    pub async fn remove_agent(&self, caller: Address, identity: Address) -> Result<()> {
        self.call("remove_agent", &caller, |state, events| {
            state.remove_agent(&caller, &identity, events)
        })
        .await
    }

    pub async fn add_proposal(
        &self,
        caller: Address,
        identity: Address,
        service_name: &str,
        price: Amount,
        token: Token,
    ) -> Result<ProposalId> {
        self.call("add_proposal", &caller, |state, events| {
            state.add_proposal(&caller, &identity, service_name, price, token, events)
        })
        .await
    }

    pub async fn remove_proposal(&self, caller: Address, proposal_id: ProposalId) -> Result<()> {
        self.call("remove_proposal", &caller, |state, events| {
            state.remove_proposal(&caller, proposal_id, events)
        })
        .await
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    pub async fn create_task(&self, caller: Address, request: TaskRequest) -> Result<TaskId> {
        self.call("create_task", &caller, |state, events| {
            state.create_task(&caller, request, events)
        })
        .await
    }

    pub async fn hire_proposal(
        &self,
        caller: Address,
        proposal_id: ProposalId,
        prompt: &str,
    ) -> Result<TaskId> {
        self.call("hire_proposal", &caller, |state, events| {
            state.hire_proposal(&caller, proposal_id, prompt, events)
        })
        .await
    }

    pub async fn assign_task(&self, caller: Address, task_id: TaskId, agent: Address) -> Result<()> {
        self.call("assign_task", &caller, |state, events| {
            state.assign_task(&caller, task_id, &agent, events)
        })
        .await
    }

    pub async fn set_task_permission(
        &self,
        caller: Address,
        task_id: TaskId,
        user: Address,
        allowed: bool,
    ) -> Result<()> {
        self.call("set_task_permission", &caller, |state, events| {
            state.set_task_permission(&caller, task_id, &user, allowed, events)
        })
        .await
    }

    pub async fn consent_cancellation(&self, caller: Address, task_id: TaskId) -> Result<()> {
        self.call("consent_cancellation", &caller, |state, events| {
            state.consent_cancellation(&caller, task_id, events)
        })
        .await
    }

    pub async fn complete_task(
        &self,
        caller: Address,
        task_id: TaskId,
        rating: u8,
    ) -> Result<Settlement> {
        self.call("complete_task", &caller, |state, events| {
            state.complete_task(&caller, task_id, rating, events)
        })
        .await
    }

    pub async fn cancel_task(&self, caller: Address, task_id: TaskId) -> Result<Settlement> {
        self.call("cancel_task", &caller, |state, events| {
            state.cancel_task(&caller, task_id, events)
        })
        .await
    }

    // ========================================================================
    // Credits
    // ========================================================================

    pub async fn mint_credits(&self, caller: Address, to: Address, amount: Amount) -> Result<Amount> {
        self.call("mint", &caller, |state, events| {
            state.mint_credits(&caller, &to, amount, events)
        })
        .await
    }

    pub async fn burn_credits(&self, caller: Address, from: Address, amount: Amount) -> Result<Amount> {
        self.call("burn", &caller, |state, events| {
            state.burn_credits(&caller, &from, amount, events)
        })
        .await
    }

    pub async fn transfer_credits(&self, caller: Address, to: Address, amount: Amount) -> Result<()> {
        self.call("transfer_credits", &caller, |state, _| {
            state.transfer_credits(&caller, &to, amount)
        })
        .await
    }

    pub async fn grant_minter(&self, caller: Address, account: Address) -> Result<bool> {
        self.call("grant_minter", &caller, |state, events| {
            state.grant_minter(&caller, &account, events)
        })
        .await
    }

    pub async fn revoke_minter(&self, caller: Address, account: Address) -> Result<bool> {
        self.call("revoke_minter", &caller, |state, events| {
            state.revoke_minter(&caller, &account, events)
        })
        .await
    }

    // ========================================================================
    // Environment
    // ========================================================================

    pub async fn deposit(
        &self,
        caller: Address,
        holder: Address,
        token: Token,
        amount: Amount,
    ) -> Result<Amount> {
        self.call("deposit", &caller, |state, events| {
            state.deposit(&caller, &holder, token, amount, events)
        })
        .await
    }

    pub async fn withdraw(&self, caller: Address, token: Token, amount: Amount) -> Result<Amount> {
        self.call("withdraw", &caller, |state, events| {
            state.withdraw(&caller, token, amount, events)
        })
        .await
    }

    pub async fn halt_token(&self, caller: Address, token: Token) -> Result<bool> {
        self.call("halt_token", &caller, |state, events| {
            state.halt_token(&caller, token, events)
        })
        .await
    }

    pub async fn resume_token(&self, caller: Address, token: Token) -> Result<bool> {
        self.call("resume_token", &caller, |state, events| {
            state.resume_token(&caller, token, events)
        })
        .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Run a read against settled state
    pub async fn read<T>(&self, f: impl FnOnce(&MarketState) -> T) -> T {
        let inner = self.inner.lock().await;
        f(&inner.state)
    }

    pub async fn get_agent_data(&self, identity: Address) -> Result<AgentData> {
        self.read(|state| state.get_agent_data(&identity)).await
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task> {
        self.read(|state| state.get_task(task_id).cloned()).await
    }

    pub async fn escrow_balance(&self, task_id: TaskId) -> Result<Amount> {
        self.read(|state| state.escrow_balance(task_id)).await
    }

    pub async fn holder_balance(&self, holder: Address, token: Token) -> Amount {
        self.read(|state| state.holder_balance(&holder, &token)).await
    }

    pub async fn credits_balance(&self, holder: Address) -> Amount {
        self.read(|state| state.credits().balance_of(&holder)).await
    }

    /// Most recent committed events, oldest first
    pub async fn recent_events(&self, limit: usize) -> Vec<EventRecord> {
        self.inner.lock().await.journal.recent(limit)
    }

    pub async fn journal_head(&self) -> JournalHead {
        self.inner.lock().await.journal.head().clone()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    pub async fn snapshot(&self) -> MarketSnapshot {
        let inner = self.inner.lock().await;
        MarketSnapshot::new(inner.state.clone(), inner.journal.head().clone())
    }

    pub async fn save(&self, store: &dyn SnapshotStore) -> StateResult<()> {
        let snapshot = self.snapshot().await;
        store.save(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::verify_chain;
    use crate::snapshot::MemorySnapshotStore;

    #[tokio::test]
    async fn test_failed_call_commits_nothing() {
        let market = Marketplace::new(MarketConfig::default());
        let owner = Address::from_low_u64(1);
        let agent = Address::from_low_u64(2);
        market.register_agent(owner, agent, "a", "").await.unwrap();

        let result = market.register_agent(owner, agent, "a", "").await;

        assert!(matches!(result, Err(MarketError::AlreadyExists { .. })));
        assert_eq!(market.journal_head().await.sequence, 1);
    }

    #[tokio::test]
    async fn test_subscribers_receive_committed_events() {
        let market = Marketplace::new(MarketConfig::default());
        let mut rx = market.subscribe();
        let owner = Address::from_low_u64(1);

        market
            .register_service(owner, "translate", "language", "")
            .await
            .unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.sequence, 1);
        assert_eq!(record.event.name(), "ServiceRegistered");
        assert!(record.verify());
    }

    #[tokio::test]
    async fn test_execute_command() {
        let market = Marketplace::new(MarketConfig::default());
        let holder = Address::from_low_u64(9);
        let operator = MarketConfig::default().ledger_principal;

        let denied = market
            .execute(
                holder,
                Command::Deposit {
                    holder,
                    token: Token::Native,
                    amount: Amount::new(70),
                },
            )
            .await;
        assert!(matches!(denied, Err(MarketError::AccessDenied { .. })));
        assert_eq!(market.journal_head().await.sequence, 0);

        let outcome = market
            .execute(
                operator,
                Command::Deposit {
                    holder,
                    token: Token::Native,
                    amount: Amount::new(70),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommandOutcome::Balance {
                balance: Amount::new(70)
            }
        );
        assert_eq!(market.holder_balance(holder, Token::Native).await, Amount::new(70));
    }

    #[tokio::test]
    async fn test_save_and_reopen_continues_chain() {
        let store = MemorySnapshotStore::new();
        let market = Marketplace::new(MarketConfig::default());
        let owner = Address::from_low_u64(1);
        market.register_agent(owner, Address::from_low_u64(2), "a", "").await.unwrap();
        market.save(&store).await.unwrap();
        let head = market.journal_head().await;

        let reopened = Marketplace::open(MarketConfig::default(), &store).await.unwrap();
        reopened
            .register_agent(owner, Address::from_low_u64(3), "b", "")
            .await
            .unwrap();

        let records = reopened.recent_events(10).await;
        assert_eq!(records.len(), 1);
        assert!(verify_chain(&head, &records).is_ok());
        assert!(reopened.get_agent_data(Address::from_low_u64(2)).await.is_ok());
    }
}

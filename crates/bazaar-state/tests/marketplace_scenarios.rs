//! End-to-end marketplace scenarios run through the async facade

use bazaar_registry::AgentUpdate;
use bazaar_state::*;
use bazaar_tasks::TaskRequest;
use bazaar_types::*;

const OWNER: u64 = 0x0a;
const AGENT: u64 = 0xa1;
const REQUESTER: u64 = 0x0b;

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn native(n: u128) -> Amount {
    Amount::new(n)
}

fn operator() -> Address {
    MarketConfig::default().ledger_principal
}

/// A marketplace with a "translate" service, agent A owned by O, and R
/// holding 1000 native units
async fn market_with(config: MarketConfig) -> Marketplace {
    let operator = config.ledger_principal;
    let market = Marketplace::new(config);
    market
        .register_service(addr(OWNER), "translate", "language", "Text translation")
        .await
        .unwrap();
    market
        .register_agent(addr(OWNER), addr(AGENT), "Agent A", "ipfs://agent-a")
        .await
        .unwrap();
    market
        .deposit(operator, addr(REQUESTER), Token::Native, native(1_000))
        .await
        .unwrap();
    market
}

async fn market() -> Marketplace {
    market_with(MarketConfig::default()).await
}

async fn assert_escrow_matches_status(market: &Marketplace) {
    market
        .read(|state| {
            for task in state.tasks().tasks() {
                let escrow = state.escrow_balance(task.task_id).unwrap();
                assert_eq!(escrow, task.expected_escrow(), "task {}", task.task_id);
            }
        })
        .await;
}

// ============================================================================
// Registry scenarios
// ============================================================================

#[tokio::test]
async fn test_remove_agent_deactivates_its_proposal() {
    let market = market().await;

    let proposal_id = market
        .add_proposal(addr(OWNER), addr(AGENT), "translate", native(100), Token::Native)
        .await
        .unwrap();
    assert_eq!(proposal_id, ProposalId(1));
    let proposal = market
        .read(|s| s.registry().get_proposal(proposal_id).cloned())
        .await
        .unwrap();
    assert!(proposal.is_active);

    market.remove_agent(addr(OWNER), addr(AGENT)).await.unwrap();

    let proposal = market
        .read(|s| s.registry().get_proposal(proposal_id).cloned())
        .await
        .unwrap();
    assert!(!proposal.is_active);
    assert!(matches!(
        market.get_agent_data(addr(AGENT)).await,
        Err(MarketError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_removal_leaves_no_active_proposal_for_agent() {
    let market = market().await;
    market
        .register_service(addr(OWNER), "summarize", "language", "")
        .await
        .unwrap();
    let other = addr(0xa2);
    market
        .register_agent(addr(OWNER), other, "Agent B", "")
        .await
        .unwrap();

    for service in ["translate", "summarize", "translate"] {
        market
            .add_proposal(addr(OWNER), addr(AGENT), service, native(10), Token::Native)
            .await
            .unwrap();
    }
    let kept = market
        .add_proposal(addr(OWNER), other, "summarize", native(10), Token::Native)
        .await
        .unwrap();

    market.remove_agent(addr(OWNER), addr(AGENT)).await.unwrap();

    let active: Vec<_> = market
        .read(|s| s.registry().active_proposals().cloned().collect())
        .await;
    assert!(active.iter().all(|p| p.issuer != addr(AGENT)));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].proposal_id, kept);
}

#[tokio::test]
async fn test_reregistration_is_fresh() {
    let market = market().await;
    market
        .add_proposal(addr(OWNER), addr(AGENT), "translate", native(100), Token::Native)
        .await
        .unwrap();
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("hi", native(100), Token::Native))
        .await
        .unwrap();
    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();
    market
        .complete_task(addr(REQUESTER), task_id, 5)
        .await
        .unwrap();

    market.remove_agent(addr(OWNER), addr(AGENT)).await.unwrap();
    market
        .register_agent(addr(OWNER), addr(AGENT), "Agent A", "")
        .await
        .unwrap();

    let data = market.get_agent_data(addr(AGENT)).await.unwrap();
    assert_eq!(data.agent.reputation_accumulated, 0);
    assert_eq!(data.agent.rating_count, 0);
    assert!(data.proposals.is_empty());
}

#[tokio::test]
async fn test_reregistration_does_not_inherit_assigned_task() {
    let market = market().await;
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("hi", native(100), Token::Native))
        .await
        .unwrap();
    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();

    market.remove_agent(addr(OWNER), addr(AGENT)).await.unwrap();
    market
        .register_agent(addr(OWNER), addr(AGENT), "Agent A", "")
        .await
        .unwrap();

    let consent = market.consent_cancellation(addr(OWNER), task_id).await;
    assert!(matches!(consent, Err(MarketError::NotFound { .. })));
    let cancel = market.cancel_task(addr(OWNER), task_id).await;
    assert!(matches!(cancel, Err(MarketError::AccessDenied { .. })));
    let complete = market.complete_task(addr(REQUESTER), task_id, 5).await;
    assert!(matches!(complete, Err(MarketError::NotFound { .. })));

    assert_eq!(market.escrow_balance(task_id).await.unwrap(), native(100));
    assert_eq!(market.holder_balance(addr(AGENT), Token::Native).await, Amount::zero());
    let agent = market.get_agent_data(addr(AGENT)).await.unwrap().agent;
    assert_eq!(agent.rating_count, 0);

    market.cancel_task(addr(REQUESTER), task_id).await.unwrap();
    assert_eq!(market.holder_balance(addr(REQUESTER), Token::Native).await, native(1_000));
    assert_escrow_matches_status(&market).await;
}

#[tokio::test]
async fn test_remove_proposal_twice_emits_once() {
    let market = market().await;
    let proposal_id = market
        .add_proposal(addr(OWNER), addr(AGENT), "translate", native(100), Token::Native)
        .await
        .unwrap();
    let mut rx = market.subscribe();

    market
        .remove_proposal(addr(OWNER), proposal_id)
        .await
        .unwrap();
    let second = market.remove_proposal(addr(OWNER), proposal_id).await;

    assert!(matches!(second, Err(MarketError::NotFound { .. })));
    let record = rx.recv().await.unwrap();
    assert_eq!(record.event.name(), "ProposalRemoved");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_non_owner_cannot_touch_agent() {
    let market = market().await;
    let intruder = addr(0xbad);
    let before = market.get_agent_data(addr(AGENT)).await.unwrap();
    let head = market.journal_head().await;

    let update = market
        .set_agent_data(
            intruder,
            addr(AGENT),
            AgentUpdate {
                name: Some("mine now".to_string()),
                profile_uri: None,
            },
        )
        .await;
    let removal = market.remove_agent(intruder, addr(AGENT)).await;

    assert!(matches!(update, Err(MarketError::AccessDenied { .. })));
    assert!(matches!(removal, Err(MarketError::AccessDenied { .. })));
    assert_eq!(market.get_agent_data(addr(AGENT)).await.unwrap(), before);
    assert_eq!(market.journal_head().await, head);
}

// ============================================================================
// Task scenarios
// ============================================================================

#[tokio::test]
async fn test_create_assign_complete_then_cancel_fails() {
    let market = market().await;

    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("translate", native(100), Token::Native))
        .await
        .unwrap();
    assert_eq!(market.get_task(task_id).await.unwrap().status, TaskStatus::Created);
    assert_eq!(market.escrow_balance(task_id).await.unwrap(), native(100));

    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();
    assert_eq!(market.get_task(task_id).await.unwrap().status, TaskStatus::Assigned);
    assert_escrow_matches_status(&market).await;

    market
        .complete_task(addr(REQUESTER), task_id, 4)
        .await
        .unwrap();

    assert_eq!(market.escrow_balance(task_id).await.unwrap(), Amount::zero());
    assert_eq!(market.holder_balance(addr(AGENT), Token::Native).await, native(100));
    let agent = market.get_agent_data(addr(AGENT)).await.unwrap().agent;
    assert_eq!(agent.reputation_accumulated, 4);
    assert_eq!(agent.rating_count, 1);
    assert_eq!(market.get_task(task_id).await.unwrap().status, TaskStatus::Completed);

    let cancel = market.cancel_task(addr(REQUESTER), task_id).await;
    assert!(matches!(cancel, Err(MarketError::InvalidState { .. })));
    assert_escrow_matches_status(&market).await;
}

#[tokio::test]
async fn test_create_cancel_then_assign_fails() {
    let market = market().await;

    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("translate", native(100), Token::Native))
        .await
        .unwrap();
    assert_eq!(market.holder_balance(addr(REQUESTER), Token::Native).await, native(900));

    market.cancel_task(addr(REQUESTER), task_id).await.unwrap();

    assert_eq!(market.holder_balance(addr(REQUESTER), Token::Native).await, native(1_000));
    assert_eq!(market.get_task(task_id).await.unwrap().status, TaskStatus::Cancelled);
    let assign = market.assign_task(addr(REQUESTER), task_id, addr(AGENT)).await;
    assert!(matches!(assign, Err(MarketError::InvalidState { .. })));
    assert_escrow_matches_status(&market).await;
}

#[tokio::test]
async fn test_failed_deposit_consumes_no_id() {
    let market = market().await;
    let broke = addr(0xdead);

    let result = market
        .create_task(broke, TaskRequest::new("x", native(100), Token::Native))
        .await;
    assert!(matches!(result, Err(MarketError::InsufficientFunds { .. })));
    assert!(market.read(|s| s.tasks().is_empty()).await);

    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();
    assert_eq!(task_id, TaskId(1));
}

#[tokio::test]
async fn test_halted_payout_keeps_task_assigned() {
    let market = market().await;
    let usdc = Token::Fungible(addr(0xc0ffee));
    market
        .deposit(operator(), addr(REQUESTER), usdc, native(500))
        .await
        .unwrap();

    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(500), usdc))
        .await
        .unwrap();
    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();
    market.halt_token(operator(), usdc).await.unwrap();
    let head = market.journal_head().await;

    let result = market.complete_task(addr(REQUESTER), task_id, 5).await;

    assert!(matches!(result, Err(MarketError::TransferFailed { .. })));
    assert_eq!(market.get_task(task_id).await.unwrap().status, TaskStatus::Assigned);
    assert_eq!(market.escrow_balance(task_id).await.unwrap(), native(500));
    assert_eq!(market.credits_balance(addr(AGENT)).await, Amount::zero());
    assert_eq!(market.journal_head().await, head);

    market.resume_token(operator(), usdc).await.unwrap();
    market
        .complete_task(addr(REQUESTER), task_id, 5)
        .await
        .unwrap();
    assert_eq!(market.holder_balance(addr(AGENT), usdc).await, native(500));
}

#[tokio::test]
async fn test_hire_proposal_end_to_end() {
    let market = market().await;
    let proposal_id = market
        .add_proposal(addr(OWNER), addr(AGENT), "translate", native(250), Token::Native)
        .await
        .unwrap();

    let task_id = market
        .hire_proposal(addr(REQUESTER), proposal_id, "translate my novel")
        .await
        .unwrap();

    let task = market.get_task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Assigned);
    assert_eq!(task.assignee, Some(addr(AGENT)));
    assert_eq!(task.proposal_id, Some(proposal_id));
    assert!(market.get_agent_data(addr(AGENT)).await.unwrap().proposals.is_empty());

    let settlement = market
        .complete_task(addr(REQUESTER), task_id, 5)
        .await
        .unwrap();
    assert_eq!(settlement.amount, native(250));
    assert_eq!(settlement.reputation, Some(500));
}

#[tokio::test]
async fn test_delegated_assignment() {
    let market = market().await;
    let delegate = addr(0xde1e);
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();

    assert!(matches!(
        market.assign_task(delegate, task_id, addr(AGENT)).await,
        Err(MarketError::AccessDenied { .. })
    ));
    market
        .set_task_permission(addr(REQUESTER), task_id, delegate, true)
        .await
        .unwrap();
    market.assign_task(delegate, task_id, addr(AGENT)).await.unwrap();

    assert_eq!(market.get_task(task_id).await.unwrap().assignee, Some(addr(AGENT)));
}

#[tokio::test]
async fn test_assigned_cancellation_needs_consent() {
    let market = market().await;
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();
    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();

    assert!(matches!(
        market.cancel_task(addr(REQUESTER), task_id).await,
        Err(MarketError::AccessDenied { .. })
    ));
    market
        .consent_cancellation(addr(OWNER), task_id)
        .await
        .unwrap();
    market.cancel_task(addr(REQUESTER), task_id).await.unwrap();

    assert_eq!(market.holder_balance(addr(REQUESTER), Token::Native).await, native(1_000));
    assert_escrow_matches_status(&market).await;
}

#[tokio::test]
async fn test_reputation_stays_bounded() {
    let market = market().await;
    for rating in [5u8, 0, 5, 5, 2, 0] {
        let task_id = market
            .create_task(addr(REQUESTER), TaskRequest::new("x", native(10), Token::Native))
            .await
            .unwrap();
        market
            .assign_task(addr(REQUESTER), task_id, addr(AGENT))
            .await
            .unwrap();
        market
            .complete_task(addr(REQUESTER), task_id, rating)
            .await
            .unwrap();

        let score = market
            .get_agent_data(addr(AGENT))
            .await
            .unwrap()
            .agent
            .reputation_score();
        assert!((0.0..=5.0).contains(&score));
    }
    assert_escrow_matches_status(&market).await;
}

// ============================================================================
// Credits
// ============================================================================

#[tokio::test]
async fn test_completion_rewards_credits() {
    let market = market_with(MarketConfig::default().with_credits_reward(native(7))).await;
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();
    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();
    market
        .complete_task(addr(REQUESTER), task_id, 4)
        .await
        .unwrap();

    assert_eq!(market.credits_balance(addr(AGENT)).await, native(7));
    assert!(matches!(
        market.transfer_credits(addr(AGENT), addr(REQUESTER), native(1)).await,
        Err(MarketError::Unsupported { .. })
    ));
    assert!(matches!(
        market.mint_credits(addr(AGENT), addr(AGENT), native(1)).await,
        Err(MarketError::AccessDenied { .. })
    ));
}

#[tokio::test]
async fn test_completion_without_minter_role_skips_reward() {
    let minter = addr(0x77);
    let config = MarketConfig::default()
        .with_credits_reward(native(7))
        .with_minter(minter);
    let market = market_with(config).await;
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();
    market
        .assign_task(addr(REQUESTER), task_id, addr(AGENT))
        .await
        .unwrap();
    assert!(market.revoke_minter(minter, operator()).await.unwrap());

    let settlement = market
        .complete_task(addr(REQUESTER), task_id, 4)
        .await
        .unwrap();

    assert_eq!(settlement.status, TaskStatus::Completed);
    assert_eq!(market.get_task(task_id).await.unwrap().status, TaskStatus::Completed);
    assert_eq!(market.holder_balance(addr(AGENT), Token::Native).await, native(100));
    assert_eq!(market.credits_balance(addr(AGENT)).await, Amount::zero());
    let agent = market.get_agent_data(addr(AGENT)).await.unwrap().agent;
    assert_eq!(agent.rating_count, 1);
    assert_escrow_matches_status(&market).await;
}

// ============================================================================
// Environment
// ============================================================================

#[tokio::test]
async fn test_environment_commands_need_operator() {
    let market = market().await;
    let usdc = Token::Fungible(addr(0xc0ffee));
    let head = market.journal_head().await;

    for command in [
        Command::Deposit {
            holder: addr(REQUESTER),
            token: Token::Native,
            amount: native(1_000_000),
        },
        Command::HaltToken { token: usdc },
        Command::ResumeToken { token: usdc },
    ] {
        let name = command.name();
        let result = market.execute(addr(REQUESTER), command).await;
        assert!(
            matches!(result, Err(MarketError::AccessDenied { .. })),
            "{} was not denied",
            name
        );
    }

    assert_eq!(market.journal_head().await, head);
    assert_eq!(market.holder_balance(addr(REQUESTER), Token::Native).await, native(1_000));

    let outcome = market
        .execute(operator(), Command::HaltToken { token: usdc })
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Changed { changed: true });
}

// ============================================================================
// Journal and persistence
// ============================================================================

#[tokio::test]
async fn test_journal_chain_verifies() {
    let market = market().await;
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();
    market.cancel_task(addr(REQUESTER), task_id).await.unwrap();

    let records = market.recent_events(100).await;
    let head = verify_chain(&JournalHead::default(), &records).unwrap();
    assert_eq!(head, market.journal_head().await);
    assert_eq!(
        records.iter().map(|r| r.event.name()).collect::<Vec<_>>(),
        vec![
            "ServiceRegistered",
            "AgentRegistered",
            "FundsDeposited",
            "TaskCreated",
            "TaskStatusChanged",
        ]
    );
}

#[tokio::test]
async fn test_snapshot_round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSnapshotStore::new(dir.path().join("market.json"));
    let market = market().await;
    let task_id = market
        .create_task(addr(REQUESTER), TaskRequest::new("x", native(100), Token::Native))
        .await
        .unwrap();
    market.save(&store).await.unwrap();

    let reopened = Marketplace::open(MarketConfig::default(), &store).await.unwrap();

    assert_eq!(reopened.escrow_balance(task_id).await.unwrap(), native(100));
    assert_eq!(reopened.journal_head().await, market.journal_head().await);
    let next = reopened
        .create_task(addr(REQUESTER), TaskRequest::new("y", native(100), Token::Native))
        .await
        .unwrap();
    assert_eq!(next, TaskId(2));
}

#[tokio::test]
async fn test_commands_from_json() {
    let market = market().await;
    let commands: Vec<Command> = serde_json::from_str(
        r#"[
            {"command": "add_proposal", "identity": "0x00000000000000000000000000000000000000a1",
             "service_name": "translate", "price": "120"},
            {"command": "hire_proposal", "proposal_id": 1, "prompt": "hola"}
        ]"#,
    )
    .unwrap();

    let callers = [addr(OWNER), addr(REQUESTER)];
    let mut outcomes = Vec::new();
    for (caller, command) in callers.into_iter().zip(commands) {
        outcomes.push(market.execute(caller, command).await.unwrap());
    }

    assert_eq!(
        outcomes,
        vec![
            CommandOutcome::ProposalCreated {
                proposal_id: ProposalId(1)
            },
            CommandOutcome::TaskCreated { task_id: TaskId(1) },
        ]
    );
    assert_eq!(market.escrow_balance(TaskId(1)).await.unwrap(), native(120));
}

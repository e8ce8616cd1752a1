//! Bazaar Ledger - Custody of holder funds and task escrow
//!
//! The ledger is:
//! - Token-scoped (native currency or any fungible token)
//! - Account-keyed by holder address or by task escrow
//! - Append-only (every movement records an entry with a reason)
//! - Partitioned (each task's escrow is its own account, never pooled)
//!
//! # Invariants
//!
//! 1. No negative balances
//! 2. Every entry has a reason
//! 3. Transfers are atomic: validated in full before either side changes
//! 4. A halted fungible token cannot move at all

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bazaar_types::{Address, Amount, MarketError, Result, TaskId, Token};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A ledger account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Account {
    /// Funds owned by an address
    Holder(Address),
    /// Funds custodied for a single task
    Escrow(TaskId),
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holder(address) => write!(f, "holder:{}", address),
            Self::Escrow(task_id) => write!(f, "escrow:{}", task_id),
        }
    }
}

/// Error returned when parsing an [`Account`]
#[derive(Debug, Error)]
#[error("Invalid account: {0}")]
pub struct AccountParseError(String);

impl FromStr for Account {
    type Err = AccountParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(address) = s.strip_prefix("holder:") {
            return address
                .parse()
                .map(Self::Holder)
                .map_err(|_| AccountParseError(s.to_string()));
        }
        if let Some(task_id) = s.strip_prefix("escrow:") {
            return task_id
                .parse()
                .map(Self::Escrow)
                .map_err(|_| AccountParseError(s.to_string()));
        }
        Err(AccountParseError(s.to_string()))
    }
}

bazaar_types::serde_via_string!(Account, "holder:<address> or escrow:<task id>");

/// Unique identifier for a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Credit (increase) to an account
    Credit,
    /// Debit (decrease) from an account
    Debit,
}

/// Reason for a ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// Funds entering from the environment
    Deposit,
    /// Funds leaving to the environment
    Withdrawal,
    /// Requester funds locked into a task's escrow
    EscrowLock { task_id: TaskId },
    /// Escrow paid out to the assignee
    EscrowRelease { task_id: TaskId },
    /// Escrow returned to the requester
    EscrowRefund { task_id: TaskId },
}

/// A single ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account: Account,
    pub token: Token,
    pub entry_type: EntryType,
    pub amount: Amount,
    pub balance_after: Amount,
    pub reason: EntryReason,
    pub created_at: DateTime<Utc>,
}

/// Account state in the ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    pub balances: BTreeMap<Token, Amount>,
    pub entry_count: u64,
}

impl AccountState {
    pub fn balance(&self, token: &Token) -> Amount {
        self.balances.get(token).copied().unwrap_or(Amount::zero())
    }
}

/// The Bazaar custody ledger
///
/// Holds every holder balance and every task escrow. Entries are a
/// process-local audit trail and are not part of persisted state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    accounts: BTreeMap<Account, AccountState>,
    halted: BTreeSet<Address>,
    next_entry_id: u64,
    #[serde(skip)]
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the balance of an account for a specific token
    pub fn balance(&self, account: &Account, token: &Token) -> Amount {
        self.accounts
            .get(account)
            .map(|a| a.balance(token))
            .unwrap_or(Amount::zero())
    }

    /// Balance of a holder address
    pub fn holder_balance(&self, holder: &Address, token: &Token) -> Amount {
        self.balance(&Account::Holder(*holder), token)
    }

    /// Escrow currently custodied for a task
    pub fn escrow_balance(&self, task_id: TaskId, token: &Token) -> Amount {
        self.balance(&Account::Escrow(task_id), token)
    }

    /// Sum of all escrow accounts for a token
    pub fn total_escrowed(&self, token: &Token) -> Amount {
        self.accounts
            .iter()
            .filter(|(account, _)| matches!(account, Account::Escrow(_)))
            .fold(Amount::zero(), |acc, (_, state)| {
                acc.checked_add(state.balance(token)).unwrap_or(acc)
            })
    }

    pub fn is_halted(&self, token: &Token) -> bool {
        match token {
            Token::Native => false,
            Token::Fungible(contract) => self.halted.contains(contract),
        }
    }

    /// Halt all movement of a fungible token. Returns false if already halted.
    pub fn halt_token(&mut self, token: &Token) -> Result<bool> {
        match token {
            Token::Native => Err(MarketError::unsupported("halting the native currency")),
            Token::Fungible(contract) => {
                tracing::warn!(token = %token, "token halted");
                Ok(self.halted.insert(*contract))
            }
        }
    }

    /// Resume a halted token. Returns false if it was not halted.
    pub fn resume_token(&mut self, token: &Token) -> Result<bool> {
        match token {
            Token::Native => Err(MarketError::unsupported("halting the native currency")),
            Token::Fungible(contract) => Ok(self.halted.remove(contract)),
        }
    }

    /// Credit an account (increase balance)
    ///
    /// Returns the new balance.
    pub fn credit(
        &mut self,
        account: &Account,
        token: &Token,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<Amount> {
        self.check_credit(account, token, amount)?;
        Ok(self.apply(account, token, amount, EntryType::Credit, reason))
    }

    /// Debit an account (decrease balance)
    ///
    /// Fails if balance would go negative (invariant: no negative balances).
    pub fn debit(
        &mut self,
        account: &Account,
        token: &Token,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<Amount> {
        self.check_debit(account, token, amount)?;
        Ok(self.apply(account, token, amount, EntryType::Debit, reason))
    }

    /// Validate a transfer without changing anything
    pub fn check_transfer(
        &self,
        from: &Account,
        to: &Account,
        token: &Token,
        amount: Amount,
    ) -> Result<()> {
        self.check_debit(from, token, amount)?;
        self.check_credit(to, token, amount)?;
        if from == to {
            return Err(MarketError::invalid_input(
                "to",
                "transfer source and destination are the same account",
            ));
        }
        Ok(())
    }

    /// Execute a transfer between two accounts
    ///
    /// Atomic: everything is validated before either side changes.
    pub fn transfer(
        &mut self,
        from: &Account,
        to: &Account,
        token: &Token,
        amount: Amount,
        reason: EntryReason,
    ) -> Result<(EntryId, EntryId)> {
        self.check_transfer(from, to, token, amount)?;

        self.apply(from, token, amount, EntryType::Debit, reason.clone());
        let debit_entry = EntryId(self.next_entry_id - 1);
        self.apply(to, token, amount, EntryType::Credit, reason);
        let credit_entry = EntryId(self.next_entry_id - 1);

        tracing::debug!(from = %from, to = %to, token = %token, amount = %amount, "ledger transfer");
        Ok((debit_entry, credit_entry))
    }

    /// Get all entries for an account
    pub fn account_entries(&self, account: &Account) -> Vec<LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| &e.account == account)
            .cloned()
            .collect()
    }

    /// Get the total number of entries recorded by this process
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Get recent entries (newest first)
    pub fn recent_entries(&self, limit: usize) -> Vec<LedgerEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    /// Get account state
    pub fn account_state(&self, account: &Account) -> Option<&AccountState> {
        self.accounts.get(account)
    }

    fn check_movable(&self, token: &Token, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(MarketError::invalid_input(
                "amount",
                "Amount must be greater than zero",
            ));
        }
        if self.is_halted(token) {
            return Err(MarketError::transfer_failed(format!(
                "token {} is halted",
                token
            )));
        }
        Ok(())
    }

    fn check_credit(&self, account: &Account, token: &Token, amount: Amount) -> Result<()> {
        self.check_movable(token, amount)?;
        self.balance(account, token)
            .checked_add(amount)
            .map(|_| ())
            .ok_or_else(|| MarketError::invalid_input("amount", "Balance overflow"))
    }

    fn check_debit(&self, account: &Account, token: &Token, amount: Amount) -> Result<()> {
        self.check_movable(token, amount)?;
        let available = self.balance(account, token);
        if available < amount {
            return Err(MarketError::InsufficientFunds {
                account: account.to_string(),
                requested: amount.value(),
                available: available.value(),
            });
        }
        Ok(())
    }

    /// Apply a pre-validated movement and record its entry
    fn apply(
        &mut self,
        account: &Account,
        token: &Token,
        amount: Amount,
        entry_type: EntryType,
        reason: EntryReason,
    ) -> Amount {
        let state = self.accounts.entry(*account).or_default();
        let current = state.balance(token);
        let new_balance = match entry_type {
            EntryType::Credit => current.checked_add(amount),
            EntryType::Debit => current.checked_sub(amount),
        }
        .unwrap_or(current);

        if new_balance.is_zero() {
            state.balances.remove(token);
        } else {
            state.balances.insert(*token, new_balance);
        }
        state.entry_count += 1;

        let entry_id = EntryId(self.next_entry_id);
        self.next_entry_id += 1;
        self.entries.push(LedgerEntry {
            entry_id,
            account: *account,
            token: *token,
            entry_type,
            amount,
            balance_after: new_balance,
            reason,
            created_at: Utc::now(),
        });

        new_balance
    }
}

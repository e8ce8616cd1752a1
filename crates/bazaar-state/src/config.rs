//! Marketplace configuration

use bazaar_types::{Address, Amount};
use serde::{Deserialize, Serialize};

/// Genesis and runtime settings for a marketplace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Address the task ledger acts as when it rates agents and mints
    /// credits
    #[serde(default = "default_ledger_principal")]
    pub ledger_principal: Address,

    /// Credits minted to the assignee of every completed task. Zero
    /// disables rewards.
    #[serde(default = "default_credits_reward")]
    pub credits_reward_per_task: Amount,

    /// Additional credit minters at genesis
    #[serde(default)]
    pub initial_minters: Vec<Address>,

    /// Additional environment operators at genesis. The ledger principal
    /// is always one.
    #[serde(default)]
    pub initial_operators: Vec<Address>,

    /// When set, only this address may register catalog services
    #[serde(default)]
    pub catalog_admin: Option<Address>,

    /// Committed events kept in memory for reads
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    /// Broadcast channel buffer for event subscribers
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_ledger_principal() -> Address {
    Address::from_low_u64(0xba2aa2)
}

fn default_credits_reward() -> Amount {
    Amount::new(10)
}

fn default_journal_capacity() -> usize {
    1024
}

fn default_event_channel_capacity() -> usize {
    1000
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            ledger_principal: default_ledger_principal(),
            credits_reward_per_task: default_credits_reward(),
            initial_minters: Vec::new(),
            initial_operators: Vec::new(),
            catalog_admin: None,
            journal_capacity: default_journal_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl MarketConfig {
    pub fn with_credits_reward(mut self, reward: Amount) -> Self {
        self.credits_reward_per_task = reward;
        self
    }

    pub fn with_operator(mut self, operator: Address) -> Self {
        self.initial_operators.push(operator);
        self
    }

    pub fn with_minter(mut self, minter: Address) -> Self {
        self.initial_minters.push(minter);
        self
    }

    pub fn with_catalog_admin(mut self, admin: Address) -> Self {
        self.catalog_admin = Some(admin);
        self
    }
}

//! Agent and proposal records

use bazaar_types::{Address, Amount, ProposalId, Token, MAX_RATING};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered service-providing identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Identity key
    pub address: Address,
    /// Principal allowed to mutate this agent
    pub owner: Address,
    pub name: String,
    pub profile_uri: String,
    /// Sum of all ratings received
    pub reputation_accumulated: u64,
    /// Number of ratings received
    pub rating_count: u64,
    pub is_registered: bool,
    /// Registration epoch. A re-registered address gets a new one.
    #[serde(default)]
    pub registration: u64,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Last time the agent was rated on a completed task
    pub last_active_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(address: Address, owner: Address, name: String, profile_uri: String) -> Self {
        let now = Utc::now();
        Self {
            address,
            owner,
            name,
            profile_uri,
            reputation_accumulated: 0,
            rating_count: 0,
            is_registered: true,
            registration: 0,
            registered_at: now,
            updated_at: now,
            last_active_at: now,
        }
    }

    /// Average rating in hundredths, clamped to `0..=500`. Zero when unrated.
    pub fn reputation_hundredths(&self) -> u32 {
        if self.rating_count == 0 {
            return 0;
        }
        let max = MAX_RATING as u128 * 100;
        let scaled = self.reputation_accumulated as u128 * 100 / self.rating_count as u128;
        scaled.min(max) as u32
    }

    /// Average rating for display, clamped to `[0, 5]`
    pub fn reputation_score(&self) -> f64 {
        if self.rating_count == 0 {
            return 0.0;
        }
        let score = self.reputation_accumulated as f64 / self.rating_count as f64;
        score.clamp(0.0, MAX_RATING as f64)
    }
}

/// A priced service offer published by an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub proposal_id: ProposalId,
    /// Agent address that published the offer
    pub issuer: Address,
    pub service_name: String,
    pub price: Amount,
    pub token: Token,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Partial update of an agent's profile fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_uri: Option<String>,
}

impl AgentUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.profile_uri.is_none()
    }
}

/// An agent together with its currently active proposals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentData {
    pub agent: Agent,
    pub proposals: Vec<Proposal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_with(accumulated: u64, count: u64) -> Agent {
        let mut agent = Agent::new(
            Address::from_low_u64(1),
            Address::from_low_u64(2),
            "a".to_string(),
            String::new(),
        );
        agent.reputation_accumulated = accumulated;
        agent.rating_count = count;
        agent
    }

    #[test]
    fn test_unrated_score_is_zero() {
        let agent = agent_with(0, 0);
        assert_eq!(agent.reputation_score(), 0.0);
        assert_eq!(agent.reputation_hundredths(), 0);
    }

    #[test]
    fn test_score_is_average() {
        let agent = agent_with(9, 2);
        assert_eq!(agent.reputation_score(), 4.5);
        assert_eq!(agent.reputation_hundredths(), 450);

        let agent = agent_with(10, 3);
        assert_eq!(agent.reputation_hundredths(), 333);
    }

    #[test]
    fn test_score_clamped() {
        // Accumulators restored from a damaged snapshot still read in range
        let agent = agent_with(100, 2);
        assert_eq!(agent.reputation_score(), 5.0);
        assert_eq!(agent.reputation_hundredths(), 500);
    }
}

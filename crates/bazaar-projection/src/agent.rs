//! Agent read model

use bazaar_registry::{Agent, AgentData};
use bazaar_types::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::FilterInfo;

/// Whether an agent is currently serving
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
}

/// Transport an agent is reached through
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommunicationType {
    #[default]
    Xmtp,
    Websocket,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socials {
    #[serde(default)]
    pub twitter: String,
    #[serde(default)]
    pub telegram: String,
    #[serde(default)]
    pub dexscreener: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// Off-chain profile document referenced by an agent's profile URI
///
/// Fetched and parsed outside the core. Every field is optional in the
/// document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentMetadata {
    pub description: String,
    pub agent_category: String,
    pub attributes: Vec<String>,
    pub instructions: Vec<String>,
    pub prompts: Vec<String>,
    #[serde(rename = "imageURI")]
    pub image_uri: String,
    pub socials: Socials,
    pub communication_type: CommunicationType,
    #[serde(rename = "communicationURL", skip_serializing_if = "Option::is_none")]
    pub communication_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communication_params: Option<serde_json::Value>,
}

/// Agent record as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: Address,
    pub agent: Address,
    pub status: AgentStatus,
    pub reputation_score: f64,
    pub total_ratings_count: u64,
    pub agent_category: String,
    pub attributes: Vec<String>,
    pub instructions: Vec<String>,
    pub prompts: Vec<String>,
    #[serde(rename = "imageURI")]
    pub image_uri: String,
    #[serde(rename = "metadataURI")]
    pub metadata_uri: String,
    pub socials: Socials,
    pub communication_type: CommunicationType,
    #[serde(rename = "communicationURL", skip_serializing_if = "Option::is_none")]
    pub communication_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub communication_params: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl AgentView {
    /// Project a core agent record, enriched with its metadata document
    pub fn new(agent: &Agent, metadata: AgentMetadata) -> Self {
        let status = if agent.is_registered {
            AgentStatus::Active
        } else {
            AgentStatus::Inactive
        };

        Self {
            id: agent.address.to_string(),
            name: agent.name.clone(),
            description: metadata.description,
            owner: agent.owner,
            agent: agent.address,
            status,
            reputation_score: agent.reputation_hundredths() as f64 / 100.0,
            total_ratings_count: agent.rating_count,
            agent_category: metadata.agent_category,
            attributes: metadata.attributes,
            instructions: metadata.instructions,
            prompts: metadata.prompts,
            image_uri: metadata.image_uri,
            metadata_uri: agent.profile_uri.clone(),
            socials: metadata.socials,
            communication_type: metadata.communication_type,
            communication_url: metadata.communication_url,
            communication_params: metadata.communication_params,
            created_at: agent.registered_at,
            updated_at: agent.updated_at,
            last_active_at: agent.last_active_at,
        }
    }

    /// Project agent data when no metadata document is available
    pub fn from_data(data: &AgentData) -> Self {
        Self::new(&data.agent, AgentMetadata::default())
    }
}

/// Filters a client can apply to an agent listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentQuery {
    pub status: Option<AgentStatus>,
    pub category: Option<String>,
    pub min_reputation: Option<f64>,
    /// Case-insensitive match against name and description
    pub search: Option<String>,
}

impl AgentQuery {
    pub const AVAILABLE: [&'static str; 4] = ["status", "category", "minReputation", "search"];

    pub fn matches(&self, view: &AgentView) -> bool {
        if self.status.is_some_and(|s| s != view.status) {
            return false;
        }
        if let Some(category) = &self.category {
            if !view.agent_category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if self.min_reputation.is_some_and(|min| view.reputation_score < min) {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let hit = view.name.to_lowercase().contains(&needle)
                || view.description.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, views: Vec<AgentView>) -> Vec<AgentView> {
        views.into_iter().filter(|v| self.matches(v)).collect()
    }

    /// Describe which filters are in effect
    pub fn filter_info(&self) -> FilterInfo {
        let mut info = FilterInfo::new(Self::AVAILABLE);
        if let Some(status) = self.status {
            let value = match status {
                AgentStatus::Active => "active",
                AgentStatus::Inactive => "inactive",
            };
            info.apply("status", value);
        }
        if let Some(category) = &self.category {
            info.apply("category", category);
        }
        if let Some(min) = self.min_reputation {
            info.apply("minReputation", min.to_string());
        }
        if let Some(search) = &self.search {
            info.apply("search", search);
        }
        info
    }
}

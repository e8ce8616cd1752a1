//! Agent registry state machine

use std::collections::{BTreeMap, BTreeSet};

use bazaar_catalog::ServiceCatalog;
use bazaar_types::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{Agent, AgentData, AgentUpdate, Proposal};

// ============================================================================
// Directory seam
// ============================================================================

/// What the task ledger needs to know about agents
///
/// The task ledger refers to agents by address only and asks the directory
/// every time, so it never works from a stale copy.
pub trait AgentDirectory {
    /// Whether `agent` is currently registered
    fn is_registered(&self, agent: &Address) -> bool;

    /// Owner of a registered agent
    fn owner_of(&self, agent: &Address) -> Option<Address>;

    /// Registration epoch of a registered agent
    fn registration_of(&self, agent: &Address) -> Option<u64>;

    /// Validate a rating without applying it
    fn check_reputation_update(&self, caller: &Address, agent: &Address, rating: u8) -> Result<()>;

    /// Fold a rating into the agent's reputation. Returns the new score in
    /// hundredths.
    fn update_reputation(
        &mut self,
        caller: &Address,
        agent: &Address,
        rating: u8,
        events: &mut EventBuffer,
    ) -> Result<u32>;
}

// ============================================================================
// Agent Registry
// ============================================================================

/// Registry of agents and their proposals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistry {
    /// Registered agents. An absent key is the unregistered default.
    agents: BTreeMap<Address, Agent>,
    /// Every proposal ever published, active or not
    proposals: BTreeMap<ProposalId, Proposal>,
    /// Active proposal ids per issuer. Derived from `proposals`.
    #[serde(default)]
    active_by_agent: BTreeMap<Address, BTreeSet<ProposalId>>,
    next_proposal_id: ProposalId,
    /// Last registration epoch handed out
    #[serde(default)]
    registrations: u64,
    #[serde(default)]
    roles: AccessControl,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: BTreeMap::new(),
            proposals: BTreeMap::new(),
            active_by_agent: BTreeMap::new(),
            next_proposal_id: ProposalId::FIRST,
            registrations: 0,
            roles: AccessControl::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------------

    /// Grant a registry role. Genesis-time configuration only.
    pub fn grant_role(&mut self, principal: Address, role: Role) -> bool {
        self.roles.grant(principal, role)
    }

    pub fn revoke_role(&mut self, principal: &Address, role: Role) -> bool {
        self.roles.revoke(principal, role)
    }

    pub fn has_role(&self, principal: &Address, role: Role) -> bool {
        self.roles.has_role(principal, role)
    }

    // ------------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------------

    /// Register `identity` with the caller as owner
    pub fn register_agent(
        &mut self,
        caller: &Address,
        identity: &Address,
        name: &str,
        profile_uri: &str,
        events: &mut EventBuffer,
    ) -> Result<&Agent> {
        if identity.is_zero() {
            return Err(MarketError::invalid_input("identity", "zero address"));
        }
        let name = agent_name(name)?;
        if self.agents.contains_key(identity) {
            return Err(MarketError::already_exists("agent", identity));
        }

        self.registrations += 1;
        let mut agent = Agent::new(*identity, *caller, name, profile_uri.to_string());
        agent.registration = self.registrations;
        events.push(MarketEvent::AgentRegistered { agent: *identity });
        tracing::debug!(agent = %identity, owner = %caller, "agent registered");

        Ok(self.agents.entry(*identity).or_insert(agent))
    }

    /// Partially update an agent's profile. Never touches reputation or
    /// proposals.
    pub fn set_agent_data(
        &mut self,
        caller: &Address,
        identity: &Address,
        update: AgentUpdate,
        events: &mut EventBuffer,
    ) -> Result<&Agent> {
        self.require_owner(caller, identity)?;
        let name = update.name.as_deref().map(agent_name).transpose()?;

        let agent = self
            .agents
            .get_mut(identity)
            .ok_or_else(|| MarketError::not_found("agent", identity))?;
        if let Some(name) = name {
            agent.name = name;
        }
        if let Some(profile_uri) = update.profile_uri {
            agent.profile_uri = profile_uri;
        }
        agent.updated_at = Utc::now();

        events.push(MarketEvent::AgentUpdated { agent: *identity });
        Ok(agent)
    }

    /// Remove an agent and deactivate every proposal it still has
    ///
    /// Cost is proportional to the agent's own active proposals, not to
    /// the number of proposals ever published.
    pub fn remove_agent(
        &mut self,
        caller: &Address,
        identity: &Address,
        events: &mut EventBuffer,
    ) -> Result<()> {
        let owner = self.require_owner(caller, identity)?;

        let active = self.active_by_agent.remove(identity).unwrap_or_default();
        for proposal_id in &active {
            if let Some(proposal) = self.proposals.get_mut(proposal_id) {
                proposal.is_active = false;
                events.push(MarketEvent::ProposalRemoved {
                    agent: *identity,
                    proposal_id: *proposal_id,
                });
            }
        }

        self.agents.remove(identity);
        events.push(MarketEvent::AgentUnregistered {
            agent: *identity,
            owner,
        });
        tracing::info!(
            agent = %identity,
            owner = %owner,
            proposals_removed = active.len(),
            "agent unregistered"
        );
        Ok(())
    }

    /// Alias of [`AgentRegistry::remove_agent`]
    pub fn unregister_agent(
        &mut self,
        caller: &Address,
        identity: &Address,
        events: &mut EventBuffer,
    ) -> Result<()> {
        self.remove_agent(caller, identity, events)
    }

    /// Current agent record plus its active proposals
    pub fn get_agent_data(&self, identity: &Address) -> Result<AgentData> {
        let agent = self.get_agent(identity)?;
        Ok(AgentData {
            agent: agent.clone(),
            proposals: self.active_proposals_of(identity),
        })
    }

    pub fn get_agent(&self, identity: &Address) -> Result<&Agent> {
        self.agents
            .get(identity)
            .ok_or_else(|| MarketError::not_found("agent", identity))
    }

    /// All registered agents ordered by address
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    // ------------------------------------------------------------------------
    // Proposals
    // ------------------------------------------------------------------------

    /// Publish a proposal for a catalog service
    pub fn add_proposal(
        &mut self,
        caller: &Address,
        identity: &Address,
        service_name: &str,
        price: Amount,
        token: Token,
        catalog: &ServiceCatalog,
        events: &mut EventBuffer,
    ) -> Result<ProposalId> {
        self.require_owner(caller, identity)?;
        catalog.get_service(service_name)?;
        if price.is_zero() {
            return Err(MarketError::invalid_input("price", "price must be greater than zero"));
        }

        let proposal_id = self.next_proposal_id;
        self.next_proposal_id = proposal_id.next();
        self.proposals.insert(
            proposal_id,
            Proposal {
                proposal_id,
                issuer: *identity,
                service_name: service_name.to_string(),
                price,
                token,
                is_active: true,
                created_at: Utc::now(),
            },
        );
        self.active_by_agent
            .entry(*identity)
            .or_default()
            .insert(proposal_id);

        events.push(MarketEvent::ProposalAdded {
            agent: *identity,
            proposal_id,
        });
        tracing::debug!(agent = %identity, proposal = %proposal_id, service = service_name, "proposal added");
        Ok(proposal_id)
    }

    /// Deactivate a proposal. Restricted to the owner of its issuer.
    pub fn remove_proposal(
        &mut self,
        caller: &Address,
        proposal_id: ProposalId,
        events: &mut EventBuffer,
    ) -> Result<()> {
        let issuer = self.active_proposal(proposal_id)?.issuer;
        self.require_owner(caller, &issuer)?;

        self.deactivate(proposal_id, &issuer);
        events.push(MarketEvent::ProposalRemoved {
            agent: issuer,
            proposal_id,
        });
        Ok(())
    }

    /// An active proposal whose issuer is registered, ready to be hired
    pub fn hireable_proposal(&self, proposal_id: ProposalId) -> Result<&Proposal> {
        let proposal = self.active_proposal(proposal_id)?;
        if !self.agents.contains_key(&proposal.issuer) {
            return Err(MarketError::not_found("agent", proposal.issuer));
        }
        Ok(proposal)
    }

    /// Deactivate a proposal because a requester hired it
    pub fn consume_proposal(
        &mut self,
        proposal_id: ProposalId,
        events: &mut EventBuffer,
    ) -> Result<Proposal> {
        let proposal = self.hireable_proposal(proposal_id)?.clone();
        self.deactivate(proposal_id, &proposal.issuer);
        events.push(MarketEvent::ProposalRemoved {
            agent: proposal.issuer,
            proposal_id,
        });
        Ok(proposal)
    }

    /// Any proposal ever published, active or not
    pub fn get_proposal(&self, proposal_id: ProposalId) -> Result<&Proposal> {
        self.proposals
            .get(&proposal_id)
            .ok_or_else(|| MarketError::not_found("proposal", proposal_id))
    }

    /// Active proposals of one agent, ascending by id
    pub fn active_proposals_of(&self, identity: &Address) -> Vec<Proposal> {
        self.active_by_agent
            .get(identity)
            .into_iter()
            .flatten()
            .filter_map(|id| self.proposals.get(id))
            .cloned()
            .collect()
    }

    /// Every active proposal, ascending by id
    pub fn active_proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values().filter(|p| p.is_active)
    }

    /// The id the next proposal will receive
    pub fn next_proposal_id(&self) -> ProposalId {
        self.next_proposal_id
    }

    /// Rebuild the per-agent index from proposal records
    pub fn rebuild_index(&mut self) -> usize {
        self.active_by_agent.clear();
        for proposal in self.proposals.values().filter(|p| p.is_active) {
            self.active_by_agent
                .entry(proposal.issuer)
                .or_default()
                .insert(proposal.proposal_id);
        }
        self.active_by_agent.values().map(BTreeSet::len).sum()
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Returns the owner when `caller` owns the registered `identity`
    fn require_owner(&self, caller: &Address, identity: &Address) -> Result<Address> {
        let agent = self.get_agent(identity)?;
        if &agent.owner != caller {
            return Err(MarketError::access_denied(format!(
                "{} is not the owner of agent {}",
                caller, identity
            )));
        }
        Ok(agent.owner)
    }

    fn active_proposal(&self, proposal_id: ProposalId) -> Result<&Proposal> {
        self.proposals
            .get(&proposal_id)
            .filter(|p| p.is_active)
            .ok_or_else(|| MarketError::not_found("proposal", proposal_id))
    }

    fn deactivate(&mut self, proposal_id: ProposalId, issuer: &Address) {
        if let Some(proposal) = self.proposals.get_mut(&proposal_id) {
            proposal.is_active = false;
        }
        if let Some(ids) = self.active_by_agent.get_mut(issuer) {
            ids.remove(&proposal_id);
            if ids.is_empty() {
                self.active_by_agent.remove(issuer);
            }
        }
    }
}

/// Trimmed agent name, rejecting blank ones
fn agent_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MarketError::invalid_input("name", "agent name must not be empty"));
    }
    Ok(name.to_string())
}

impl AgentDirectory for AgentRegistry {
    fn is_registered(&self, agent: &Address) -> bool {
        self.agents.contains_key(agent)
    }

    fn owner_of(&self, agent: &Address) -> Option<Address> {
        self.agents.get(agent).map(|a| a.owner)
    }

    fn registration_of(&self, agent: &Address) -> Option<u64> {
        self.agents.get(agent).map(|a| a.registration)
    }

    fn check_reputation_update(&self, caller: &Address, agent: &Address, rating: u8) -> Result<()> {
        self.roles.require(caller, Role::ReputationUpdater)?;
        let record = self.get_agent(agent)?;
        if caller == agent || caller == &record.owner {
            return Err(MarketError::access_denied(
                "an agent cannot rate itself",
            ));
        }
        if rating > MAX_RATING {
            return Err(MarketError::invalid_input(
                "rating",
                format!("rating must be between 0 and {}", MAX_RATING),
            ));
        }
        let overflow = record
            .reputation_accumulated
            .checked_add(rating as u64)
            .zip(record.rating_count.checked_add(1))
            .is_none();
        if overflow {
            return Err(MarketError::invalid_input("rating", "reputation overflow"));
        }
        Ok(())
    }

    fn update_reputation(
        &mut self,
        caller: &Address,
        agent: &Address,
        rating: u8,
        events: &mut EventBuffer,
    ) -> Result<u32> {
        self.check_reputation_update(caller, agent, rating)?;

        let record = self
            .agents
            .get_mut(agent)
            .ok_or_else(|| MarketError::not_found("agent", agent))?;
        record.reputation_accumulated += rating as u64;
        record.rating_count += 1;
        record.last_active_at = Utc::now();

        let new_reputation = record.reputation_hundredths();
        events.push(MarketEvent::ReputationUpdated {
            agent: *agent,
            new_reputation,
        });
        Ok(new_reputation)
    }
}

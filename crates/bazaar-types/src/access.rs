//! Capability checks against an explicit access-control table
//!
//! Authority is never inherited from a type. A principal can perform a
//! role-gated operation only if the table lists that role for it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, MarketError, Result};

/// Roles a principal can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May mint credits and manage the minter set
    Minter,
    /// May fold task ratings into agent reputation
    ReputationUpdater,
    /// May register catalog services when the catalog is gated
    CatalogAdmin,
    /// May bring funds in from the environment and halt tokens
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Minter => "Minter",
            Self::ReputationUpdater => "ReputationUpdater",
            Self::CatalogAdmin => "CatalogAdmin",
            Self::Operator => "Operator",
        };
        f.write_str(name)
    }
}

/// Mapping of principal to granted roles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    grants: BTreeMap<Address, BTreeSet<Role>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_role(&self, principal: &Address, role: Role) -> bool {
        self.grants
            .get(principal)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    /// Fail with `AccessDenied` unless `principal` holds `role`
    pub fn require(&self, principal: &Address, role: Role) -> Result<()> {
        if self.has_role(principal, role) {
            Ok(())
        } else {
            Err(MarketError::access_denied(format!(
                "{} does not hold role {}",
                principal, role
            )))
        }
    }

    /// Grant a role. Returns false if it was already held.
    pub fn grant(&mut self, principal: Address, role: Role) -> bool {
        self.grants.entry(principal).or_default().insert(role)
    }

    /// Revoke a role. Returns false if it was not held.
    pub fn revoke(&mut self, principal: &Address, role: Role) -> bool {
        let Some(roles) = self.grants.get_mut(principal) else {
            return false;
        };
        let removed = roles.remove(&role);
        if roles.is_empty() {
            self.grants.remove(principal);
        }
        removed
    }

    /// All principals holding `role`
    pub fn holders(&self, role: Role) -> Vec<Address> {
        self.grants
            .iter()
            .filter(|(_, roles)| roles.contains(&role))
            .map(|(principal, _)| *principal)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_and_revoke() {
        let mut acl = AccessControl::new();
        let alice = Address::from_low_u64(1);

        assert!(acl.require(&alice, Role::Minter).is_err());
        assert!(acl.grant(alice, Role::Minter));
        assert!(!acl.grant(alice, Role::Minter));
        assert!(acl.require(&alice, Role::Minter).is_ok());
        assert!(!acl.has_role(&alice, Role::ReputationUpdater));

        assert!(acl.revoke(&alice, Role::Minter));
        assert!(!acl.revoke(&alice, Role::Minter));
        assert!(acl.holders(Role::Minter).is_empty());
    }

    #[test]
    fn test_require_reports_access_denied() {
        let acl = AccessControl::new();
        let err = acl
            .require(&Address::from_low_u64(9), Role::CatalogAdmin)
            .unwrap_err();
        assert_eq!(err.error_code(), "ACCESS_DENIED");
    }
}

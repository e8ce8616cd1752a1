//! Bazaar Service Catalog
//!
//! Registers the service names agents may publish proposals for. A name is
//! unique across the catalog. Records are immutable once registered; update
//! and removal are administrative concerns outside the ledger.

use std::collections::BTreeMap;

use bazaar_types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub category: String,
    pub description: String,
    pub registered_at: DateTime<Utc>,
}

/// The service catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceCatalog {
    services: BTreeMap<String, Service>,
    /// When set, only holders of `Role::CatalogAdmin` may register
    #[serde(default)]
    gated: bool,
    #[serde(default)]
    roles: AccessControl,
}

impl ServiceCatalog {
    /// Create an open catalog anyone can register into
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog gated to the given administrators
    pub fn with_admins(admins: impl IntoIterator<Item = Address>) -> Self {
        let mut roles = AccessControl::new();
        for admin in admins {
            roles.grant(admin, Role::CatalogAdmin);
        }
        Self {
            services: BTreeMap::new(),
            gated: true,
            roles,
        }
    }

    pub fn is_gated(&self) -> bool {
        self.gated
    }

    /// Register a service name
    pub fn register_service(
        &mut self,
        caller: &Address,
        name: &str,
        category: &str,
        description: &str,
        events: &mut EventBuffer,
    ) -> Result<&Service> {
        if self.gated {
            self.roles.require(caller, Role::CatalogAdmin)?;
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(MarketError::invalid_input("name", "service name must not be empty"));
        }
        if self.services.contains_key(name) {
            return Err(MarketError::already_exists("service", name));
        }

        let service = Service {
            name: name.to_string(),
            category: category.trim().to_string(),
            description: description.to_string(),
            registered_at: Utc::now(),
        };
        events.push(MarketEvent::ServiceRegistered {
            name: service.name.clone(),
            category: service.category.clone(),
        });
        tracing::debug!(service = %service.name, category = %service.category, "service registered");

        Ok(self.services.entry(service.name.clone()).or_insert(service))
    }

    /// Look up a service by name
    pub fn get_service(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| MarketError::not_found("service", name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// All services, ordered by name
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

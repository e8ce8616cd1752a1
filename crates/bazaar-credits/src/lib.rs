//! Bazaar Credits - Non-transferable reward balance
//!
//! Credits are minted to agents when tasks complete. They are a record of
//! work done, not a currency:
//!
//! 1. Only minters mint, and only to an explicit recipient
//! 2. Balances never go negative and supply always equals their sum
//! 3. Credits never move between holders
//! 4. The minter set manages itself

use std::collections::BTreeMap;

use bazaar_types::*;
use serde::{Deserialize, Serialize};

/// Reward credit balances and the minter set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditsLedger {
    balances: BTreeMap<Address, Amount>,
    total_supply: Amount,
    roles: AccessControl,
}

impl CreditsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with an initial minter set
    pub fn with_minters(minters: impl IntoIterator<Item = Address>) -> Self {
        let mut ledger = Self::new();
        for minter in minters {
            ledger.roles.grant(minter, Role::Minter);
        }
        ledger
    }

    // ========================================================================
    // Supply
    // ========================================================================

    /// Validate a mint without applying it
    pub fn check_mint(&self, caller: &Address, to: &Address, amount: Amount) -> Result<()> {
        self.roles.require(caller, Role::Minter)?;
        if to.is_zero() {
            return Err(MarketError::invalid_input("to", "cannot mint to the zero address"));
        }
        if amount.is_zero() {
            return Err(MarketError::invalid_input("amount", "amount must be greater than zero"));
        }
        self.total_supply
            .checked_add(amount)
            .ok_or_else(|| MarketError::invalid_input("amount", "credit supply overflow"))?;
        Ok(())
    }

    /// Mint credits to `to`
    pub fn mint(
        &mut self,
        caller: &Address,
        to: &Address,
        amount: Amount,
        events: &mut EventBuffer,
    ) -> Result<Amount> {
        self.check_mint(caller, to, amount)?;

        let balance = self.balance_of(to).checked_add(amount).unwrap_or(amount);
        self.balances.insert(*to, balance);
        self.total_supply = self.total_supply.checked_add(amount).unwrap_or(self.total_supply);

        events.push(MarketEvent::CreditsMinted { to: *to, amount });
        tracing::debug!(to = %to, amount = %amount, "credits minted");
        Ok(balance)
    }

    /// Burn credits held by `from`. The holder or any minter may burn.
    pub fn burn(
        &mut self,
        caller: &Address,
        from: &Address,
        amount: Amount,
        events: &mut EventBuffer,
    ) -> Result<Amount> {
        if caller != from && !self.is_minter(caller) {
            return Err(MarketError::access_denied(format!(
                "{} may not burn credits of {}",
                caller, from
            )));
        }
        if amount.is_zero() {
            return Err(MarketError::invalid_input("amount", "amount must be greater than zero"));
        }
        let available = self.balance_of(from);
        let remaining = available
            .checked_sub(amount)
            .ok_or_else(|| MarketError::InsufficientFunds {
                account: format!("credits:{}", from),
                requested: amount.value(),
                available: available.value(),
            })?;

        if remaining.is_zero() {
            self.balances.remove(from);
        } else {
            self.balances.insert(*from, remaining);
        }
        self.total_supply = self.total_supply.checked_sub(amount).unwrap_or_default();

        events.push(MarketEvent::CreditsBurned { from: *from, amount });
        Ok(remaining)
    }

    /// Credits are bound to the holder that earned them
    pub fn transfer(&mut self, _caller: &Address, _to: &Address, _amount: Amount) -> Result<()> {
        Err(MarketError::unsupported("credits are non-transferable"))
    }

    // ========================================================================
    // Minter set
    // ========================================================================

    pub fn grant_minter(
        &mut self,
        caller: &Address,
        account: &Address,
        events: &mut EventBuffer,
    ) -> Result<bool> {
        self.roles.require(caller, Role::Minter)?;
        let granted = self.roles.grant(*account, Role::Minter);
        if granted {
            events.push(MarketEvent::RoleGranted {
                role: Role::Minter,
                account: *account,
                sender: *caller,
            });
        }
        Ok(granted)
    }

    pub fn revoke_minter(
        &mut self,
        caller: &Address,
        account: &Address,
        events: &mut EventBuffer,
    ) -> Result<bool> {
        self.roles.require(caller, Role::Minter)?;
        let revoked = self.roles.revoke(account, Role::Minter);
        if revoked {
            events.push(MarketEvent::RoleRevoked {
                role: Role::Minter,
                account: *account,
                sender: *caller,
            });
        }
        Ok(revoked)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn balance_of(&self, holder: &Address) -> Amount {
        self.balances.get(holder).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn is_minter(&self, account: &Address) -> bool {
        self.roles.has_role(account, Role::Minter)
    }

    pub fn minters(&self) -> Vec<Address> {
        self.roles.holders(Role::Minter)
    }

    /// Holders with a non-zero balance, ordered by address
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.balances.iter()
    }
}

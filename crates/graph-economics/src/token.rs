//! Token balances and the mint collaborator
//!
//! The accounting core never mints beyond a computed entitlement and never
//! to the zero address. [`TokenLedger`] is the balance book used as the mint
//! target for claims and reclaims and as the supply source for L1 drips.

use graph_core::math::{checked_add, checked_sub};
use graph_core::{Address, GraphError, Result, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token-mint collaborator
pub trait TokenMinter {
    /// Create `amount` new tokens for `to`
    fn mint(&mut self, to: &Address, amount: U256) -> Result<()>;

    /// Destroy `amount` tokens held by `from`
    fn burn(&mut self, from: &Address, amount: U256) -> Result<()>;
}

/// Balance ledger with a tracked total supply
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLedger {
    balances: BTreeMap<Address, U256>,
    total_supply: U256,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or_default()
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }

    /// Move tokens between accounts
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: U256) -> Result<()> {
        if to.is_zero() {
            return Err(GraphError::ZeroAddress("transfer recipient"));
        }
        self.debit(from, amount)?;
        self.credit(to, amount)
    }

    fn debit(&mut self, account: &Address, amount: U256) -> Result<()> {
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(GraphError::InsufficientBalance {
                requested: amount,
                balance,
            });
        }
        let remaining = balance - amount;
        if remaining.is_zero() {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, remaining);
        }
        Ok(())
    }

    fn credit(&mut self, account: &Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let balance = checked_add(self.balance_of(account), amount)?;
        self.balances.insert(*account, balance);
        Ok(())
    }
}

impl TokenMinter for TokenLedger {
    fn mint(&mut self, to: &Address, amount: U256) -> Result<()> {
        if to.is_zero() {
            return Err(GraphError::ZeroAddress("mint recipient"));
        }
        self.total_supply = checked_add(self.total_supply, amount)?;
        self.credit(to, amount)?;
        tracing::trace!(%to, %amount, "minted");
        Ok(())
    }

    fn burn(&mut self, from: &Address, amount: U256) -> Result<()> {
        self.debit(from, amount)?;
        self.total_supply = checked_sub(self.total_supply, amount)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_core::tokens;

    #[test]
    fn test_mint_and_transfer() {
        let mut ledger = TokenLedger::new();
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);

        ledger.mint(&alice, tokens(100)).unwrap();
        ledger.transfer(&alice, &bob, tokens(40)).unwrap();

        assert_eq!(ledger.balance_of(&alice), tokens(60));
        assert_eq!(ledger.balance_of(&bob), tokens(40));
        assert_eq!(ledger.total_supply(), tokens(100));
    }

    #[test]
    fn test_mint_to_zero_rejected() {
        let mut ledger = TokenLedger::new();
        assert!(matches!(
            ledger.mint(&Address::ZERO, tokens(1)),
            Err(GraphError::ZeroAddress(_))
        ));
        assert_eq!(ledger.total_supply(), U256::ZERO);
    }

    #[test]
    fn test_burn_reduces_supply() {
        let mut ledger = TokenLedger::new();
        let alice = Address::repeat_byte(1);
        ledger.mint(&alice, tokens(10)).unwrap();
        ledger.burn(&alice, tokens(4)).unwrap();
        assert_eq!(ledger.total_supply(), tokens(6));

        let err = ledger.burn(&alice, tokens(7)).unwrap_err();
        assert!(matches!(err, GraphError::InsufficientBalance { .. }));
    }
}

//! Delegation pools
//!
//! Delegators buy shares of an indexer's pool. The pool earns the
//! delegators' cut of indexing rewards and query-fee rebates; undelegated
//! tokens thaw for a number of epochs before they can be withdrawn.

use graph_core::math::{checked_add, checked_mul, checked_sub, is_valid_ppm, min, mul_div, percent_of};
use graph_core::{Address, Epoch, GraphError, Ppm, Result, U256, MAX_PPM};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A delegator's position in one pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub shares: U256,
    pub tokens_locked: U256,
    /// Epoch at which locked tokens thaw (0 = no lock)
    pub tokens_locked_until: Epoch,
}

/// Per-indexer delegation pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationPool {
    /// Share of indexing rewards kept by the indexer
    pub indexing_reward_cut: Ppm,
    /// Share of query-fee rebates kept by the indexer
    pub query_fee_cut: Ppm,
    pub tokens: U256,
    pub shares: U256,
    pub delegators: BTreeMap<Address, Delegation>,
}

impl Default for DelegationPool {
    fn default() -> Self {
        Self {
            indexing_reward_cut: MAX_PPM,
            query_fee_cut: MAX_PPM,
            tokens: U256::ZERO,
            shares: U256::ZERO,
            delegators: BTreeMap::new(),
        }
    }
}

impl DelegationPool {
    pub fn delegation(&self, delegator: &Address) -> Option<&Delegation> {
        self.delegators.get(delegator)
    }

    /// Buy shares for `tokens`, 1:1 for an empty pool
    pub fn delegate(&mut self, delegator: &Address, tokens: U256) -> Result<U256> {
        if tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let shares = if self.tokens.is_zero() {
            tokens
        } else {
            mul_div(tokens, self.shares, self.tokens)?
        };
        if shares.is_zero() {
            return Err(GraphError::InvalidParameter("delegation too small for one share".into()));
        }
        self.tokens = checked_add(self.tokens, tokens)?;
        self.shares = checked_add(self.shares, shares)?;
        let delegation = self.delegators.entry(*delegator).or_default();
        delegation.shares = checked_add(delegation.shares, shares)?;
        Ok(shares)
    }

    /// Burn `shares` into locked tokens thawing until `epoch + unbonding_period`.
    /// Returns the locked tokens and any previously thawed tokens withdrawn.
    pub fn undelegate(
        &mut self,
        delegator: &Address,
        shares: U256,
        epoch: Epoch,
        unbonding_period: u64,
    ) -> Result<(U256, U256)> {
        if shares.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let owned = self.delegators.get(delegator).map(|d| d.shares).unwrap_or_default();
        if owned < shares {
            return Err(GraphError::InsufficientShares {
                requested: shares,
                owned,
            });
        }
        let tokens = mul_div(shares, self.tokens, self.shares)?;
        let withdrawn = self.withdraw_delegated(delegator, epoch).unwrap_or_default();

        self.tokens = checked_sub(self.tokens, tokens)?;
        self.shares = checked_sub(self.shares, shares)?;
        let delegation = self.delegators.entry(*delegator).or_default();
        delegation.shares -= shares;
        delegation.tokens_locked = checked_add(delegation.tokens_locked, tokens)?;
        delegation.tokens_locked_until = epoch
            .checked_add(unbonding_period)
            .ok_or(GraphError::ArithmeticOverflow)?;
        Ok((tokens, withdrawn))
    }

    /// Release thawed tokens
    pub fn withdraw_delegated(&mut self, delegator: &Address, epoch: Epoch) -> Result<U256> {
        let delegation = self
            .delegators
            .get_mut(delegator)
            .ok_or(GraphError::NothingToWithdraw)?;
        if delegation.tokens_locked.is_zero()
            || delegation.tokens_locked_until == 0
            || epoch < delegation.tokens_locked_until
        {
            return Err(GraphError::NothingToWithdraw);
        }
        let tokens = delegation.tokens_locked;
        delegation.tokens_locked = U256::ZERO;
        delegation.tokens_locked_until = 0;
        if delegation.shares.is_zero() {
            self.delegators.remove(delegator);
        }
        Ok(tokens)
    }

    /// Split indexing rewards into (indexer, delegators) by the reward cut.
    /// An empty pool leaves everything to the indexer.
    pub fn split_indexing_rewards(&self, rewards: U256) -> Result<(U256, U256)> {
        self.split(rewards, self.indexing_reward_cut)
    }

    /// Split query-fee rebates into (indexer, delegators) by the fee cut
    pub fn split_query_fees(&self, fees: U256) -> Result<(U256, U256)> {
        self.split(fees, self.query_fee_cut)
    }

    fn split(&self, amount: U256, cut: Ppm) -> Result<(U256, U256)> {
        if self.tokens.is_zero() {
            return Ok((amount, U256::ZERO));
        }
        let indexer = percent_of(cut, amount)?;
        Ok((indexer, amount - indexer))
    }

    /// Credit the delegators' share of rewards or fees to the pool
    pub fn add_rewards(&mut self, tokens: U256) -> Result<()> {
        self.tokens = checked_add(self.tokens, tokens)?;
        Ok(())
    }

    /// Token value of a delegator's shares
    pub fn tokens_of(&self, delegator: &Address) -> Result<U256> {
        match self.delegators.get(delegator) {
            Some(d) if !self.shares.is_zero() => mul_div(d.shares, self.tokens, self.shares),
            _ => Ok(U256::ZERO),
        }
    }
}

/// All delegation pools and the protocol-wide delegation parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationBook {
    pools: BTreeMap<Address, DelegationPool>,

    /// Multiple of own stake an indexer may use from delegation
    pub delegation_ratio: u32,

    /// Epochs undelegated tokens thaw for
    pub unbonding_period: u64,
}

impl Default for DelegationBook {
    fn default() -> Self {
        Self::new(16, 28)
    }
}

impl DelegationBook {
    pub fn new(delegation_ratio: u32, unbonding_period: u64) -> Self {
        Self {
            pools: BTreeMap::new(),
            delegation_ratio,
            unbonding_period,
        }
    }

    pub fn pool(&self, indexer: &Address) -> Option<&DelegationPool> {
        self.pools.get(indexer)
    }

    pub fn pool_mut(&mut self, indexer: &Address) -> &mut DelegationPool {
        self.pools.entry(*indexer).or_default()
    }

    /// Delegated tokens usable by an indexer with `tokens_staked` own stake
    pub fn capacity(&self, indexer: &Address, tokens_staked: U256) -> Result<U256> {
        let pool_tokens = self.pools.get(indexer).map(|p| p.tokens).unwrap_or_default();
        let cap = checked_mul(tokens_staked, U256::from(self.delegation_ratio))?;
        Ok(min(pool_tokens, cap))
    }

    pub fn set_delegation_parameters(
        &mut self,
        indexer: &Address,
        indexing_reward_cut: Ppm,
        query_fee_cut: Ppm,
    ) -> Result<()> {
        if !is_valid_ppm(indexing_reward_cut) || !is_valid_ppm(query_fee_cut) {
            return Err(GraphError::InvalidParameter("delegation cut above 100%".into()));
        }
        let pool = self.pool_mut(indexer);
        pool.indexing_reward_cut = indexing_reward_cut;
        pool.query_fee_cut = query_fee_cut;
        Ok(())
    }

    pub fn delegate(&mut self, indexer: &Address, delegator: &Address, tokens: U256) -> Result<U256> {
        if delegator.is_zero() {
            return Err(GraphError::ZeroAddress("delegator"));
        }
        self.pool_mut(indexer).delegate(delegator, tokens)
    }

    pub fn undelegate(
        &mut self,
        indexer: &Address,
        delegator: &Address,
        shares: U256,
        epoch: Epoch,
    ) -> Result<(U256, U256)> {
        let period = self.unbonding_period;
        self.pools
            .get_mut(indexer)
            .ok_or(GraphError::InsufficientShares {
                requested: shares,
                owned: U256::ZERO,
            })?
            .undelegate(delegator, shares, epoch, period)
    }

    pub fn withdraw_delegated(&mut self, indexer: &Address, delegator: &Address, epoch: Epoch) -> Result<U256> {
        self.pools
            .get_mut(indexer)
            .ok_or(GraphError::NothingToWithdraw)?
            .withdraw_delegated(delegator, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_shares_pro_rata() {
        let mut pool = DelegationPool::default();
        let a = Address::repeat_byte(1);
        let b = Address::repeat_byte(2);

        assert_eq!(pool.delegate(&a, u(100)).unwrap(), u(100));
        pool.add_rewards(u(100)).unwrap();
        // 200 tokens back 100 shares
        assert_eq!(pool.delegate(&b, u(100)).unwrap(), u(50));
        assert_eq!(pool.tokens_of(&a).unwrap(), u(200));
        assert_eq!(pool.tokens_of(&b).unwrap(), u(100));
    }

    #[test]
    fn test_undelegate_and_withdraw() {
        let mut pool = DelegationPool::default();
        let a = Address::repeat_byte(1);
        pool.delegate(&a, u(100)).unwrap();

        let (locked, withdrawn) = pool.undelegate(&a, u(40), 5, 3).unwrap();
        assert_eq!(locked, u(40));
        assert_eq!(withdrawn, U256::ZERO);
        assert_eq!(pool.tokens, u(60));

        assert!(matches!(pool.withdraw_delegated(&a, 7), Err(GraphError::NothingToWithdraw)));

        // a second undelegation after thawing withdraws the first lock
        let (_, withdrawn) = pool.undelegate(&a, u(10), 8, 3).unwrap();
        assert_eq!(withdrawn, u(40));
        assert_eq!(pool.delegation(&a).unwrap().tokens_locked_until, 11);
        assert_eq!(pool.withdraw_delegated(&a, 11).unwrap(), u(10));

        let err = pool.undelegate(&a, u(51), 12, 3).unwrap_err();
        assert!(matches!(err, GraphError::InsufficientShares { .. }));
    }

    #[test]
    fn test_reward_split() {
        let mut pool = DelegationPool::default();
        assert_eq!(pool.split_indexing_rewards(u(1_000)).unwrap(), (u(1_000), U256::ZERO));

        pool.indexing_reward_cut = 250_000;
        pool.delegate(&Address::repeat_byte(1), u(10)).unwrap();
        assert_eq!(pool.split_indexing_rewards(u(1_000)).unwrap(), (u(250), u(750)));
    }

    #[test]
    fn test_capacity_capped_by_ratio() {
        let mut book = DelegationBook::new(2, 1);
        let indexer = Address::repeat_byte(9);
        book.delegate(&indexer, &Address::repeat_byte(1), u(500)).unwrap();

        assert_eq!(book.capacity(&indexer, u(100)).unwrap(), u(200));
        assert_eq!(book.capacity(&indexer, u(1_000)).unwrap(), u(500));
        assert!(book.set_delegation_parameters(&indexer, MAX_PPM + 1, 0).is_err());
    }
}

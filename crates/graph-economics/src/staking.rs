//! # Staking
//!
//! Per-indexer stake bookkeeping and the thawing state machine.
//!
//! ## Token buckets
//!
//! | Bucket | Meaning |
//! |--------|---------|
//! | staked | Tokens deposited by the indexer |
//! | allocated | Tokens committed to open allocations |
//! | locked | Tokens thawing until `tokens_locked_until` (a block number) |
//! | available | `staked − allocated − locked`, clamped at 0 |
//!
//! The low-level [`IndexerStake`] mutators do not validate availability;
//! [`StakeManager`] performs those checks for the public operations.

use graph_core::math::{checked_add, checked_sub, diff_or_zero, min, to_u64, weighted_average};
use graph_core::{tokens, Address, BlockNumber, GraphError, Result, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stake held by a single indexer
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexerStake {
    /// Tokens deposited
    pub tokens_staked: U256,

    /// Tokens committed to allocations
    pub tokens_allocated: U256,

    /// Tokens thawing
    pub tokens_locked: U256,

    /// Block at which locked tokens become withdrawable (0 = no lock)
    pub tokens_locked_until: BlockNumber,
}

impl IndexerStake {
    pub fn deposit(&mut self, tokens: U256) -> Result<()> {
        self.tokens_staked = checked_add(self.tokens_staked, tokens)?;
        Ok(())
    }

    pub fn release(&mut self, tokens: U256) -> Result<()> {
        if tokens > self.tokens_staked {
            return Err(GraphError::InsufficientStake {
                requested: tokens,
                staked: self.tokens_staked,
            });
        }
        self.tokens_staked -= tokens;
        Ok(())
    }

    pub fn allocate(&mut self, tokens: U256) -> Result<()> {
        self.tokens_allocated = checked_add(self.tokens_allocated, tokens)?;
        Ok(())
    }

    pub fn unallocate(&mut self, tokens: U256) -> Result<()> {
        self.tokens_allocated = checked_sub(self.tokens_allocated, tokens)?;
        Ok(())
    }

    /// Lock `tokens` for `period` blocks. With a lock already active the
    /// unlock block becomes the token-weighted average of the remaining time
    /// and the new period, so a small top-up cannot reset the whole lock.
    pub fn lock_tokens(&mut self, tokens: U256, period: u64, now: BlockNumber) -> Result<()> {
        let mut lock_period = period;
        if !self.tokens_locked.is_zero() {
            let remaining = self.tokens_locked_until.saturating_sub(now);
            lock_period = to_u64(weighted_average(
                U256::from(remaining),
                self.tokens_locked,
                U256::from(period),
                tokens,
            )?)?;
        }
        self.tokens_locked = checked_add(self.tokens_locked, tokens)?;
        self.tokens_locked_until = now
            .checked_add(lock_period)
            .ok_or(GraphError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn unlock_tokens(&mut self, tokens: U256) -> Result<()> {
        if tokens > self.tokens_locked {
            return Err(GraphError::InsufficientLockedTokens {
                requested: tokens,
                locked: self.tokens_locked,
            });
        }
        self.tokens_locked -= tokens;
        if self.tokens_locked.is_zero() {
            self.tokens_locked_until = 0;
        }
        Ok(())
    }

    /// Tokens that finished thawing. Capped by the staked amount in case a
    /// slash took stake below what is locked.
    pub fn tokens_withdrawable(&self, now: BlockNumber) -> U256 {
        if self.tokens_locked_until == 0 || now < self.tokens_locked_until {
            return U256::ZERO;
        }
        min(self.tokens_locked, self.tokens_staked)
    }

    /// Unlock and release every thawed token, returning the amount
    pub fn withdraw_tokens(&mut self, now: BlockNumber) -> Result<U256> {
        let withdrawable = self.tokens_withdrawable(now);
        if !withdrawable.is_zero() {
            self.unlock_tokens(withdrawable)?;
            self.release(withdrawable)?;
        }
        Ok(withdrawable)
    }

    /// Allocated plus locked
    pub fn tokens_used(&self) -> U256 {
        self.tokens_allocated.saturating_add(self.tokens_locked)
    }

    /// Free stake, 0 when over-allocated
    pub fn tokens_available(&self) -> U256 {
        diff_or_zero(self.tokens_staked, self.tokens_used())
    }

    /// Staked tokens that are not thawing
    pub fn tokens_secure_stake(&self) -> U256 {
        diff_or_zero(self.tokens_staked, self.tokens_locked)
    }

    /// Free capacity counting `delegated_capacity` on top of own stake
    pub fn tokens_available_with_delegation(&self, delegated_capacity: U256) -> U256 {
        diff_or_zero(self.tokens_staked.saturating_add(delegated_capacity), self.tokens_used())
    }

    /// Whether commitments exceed own stake plus delegated capacity
    pub fn is_over_allocated(&self, delegated_capacity: U256) -> bool {
        self.tokens_used() > self.tokens_staked.saturating_add(delegated_capacity)
    }

    pub fn has_stake(&self) -> bool {
        !self.tokens_staked.is_zero()
    }
}

/// Result of an unstake request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnstakeOutcome {
    /// Previously thawed tokens withdrawn before locking
    pub withdrawn: U256,
    /// Block at which the new lock thaws
    pub locked_until: BlockNumber,
}

/// Registry of indexer stakes and the staking parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeManager {
    stakes: BTreeMap<Address, IndexerStake>,

    /// Minimum secure stake for an indexer
    pub minimum_indexer_stake: U256,

    /// Blocks an unstaked amount thaws for
    pub thawing_period: u64,
}

impl Default for StakeManager {
    fn default() -> Self {
        Self {
            stakes: BTreeMap::new(),
            minimum_indexer_stake: tokens(100_000),
            thawing_period: 28_800,
        }
    }
}

impl StakeManager {
    pub fn new(minimum_indexer_stake: U256, thawing_period: u64) -> Self {
        Self {
            stakes: BTreeMap::new(),
            minimum_indexer_stake,
            thawing_period,
        }
    }

    pub fn get(&self, indexer: &Address) -> Option<&IndexerStake> {
        self.stakes.get(indexer)
    }

    /// Stake of `indexer`, zeroed if none was ever deposited
    pub fn stake_of(&self, indexer: &Address) -> IndexerStake {
        self.stakes.get(indexer).cloned().unwrap_or_default()
    }

    pub fn get_mut(&mut self, indexer: &Address) -> Result<&mut IndexerStake> {
        self.stakes.get_mut(indexer).ok_or(GraphError::IndexerNotStaked)
    }

    pub fn indexers(&self) -> impl Iterator<Item = (&Address, &IndexerStake)> {
        self.stakes.iter()
    }

    pub fn total_staked(&self) -> U256 {
        self.stakes
            .values()
            .fold(U256::ZERO, |acc, s| acc.saturating_add(s.tokens_staked))
    }

    /// Deposit stake; the first deposit must reach the minimum
    pub fn stake(&mut self, indexer: &Address, tokens: U256) -> Result<()> {
        if indexer.is_zero() {
            return Err(GraphError::ZeroAddress("indexer"));
        }
        if tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let stake = self.stakes.entry(*indexer).or_default();
        let secure = checked_add(stake.tokens_secure_stake(), tokens)?;
        if secure < self.minimum_indexer_stake {
            return Err(GraphError::BelowMinimumStake {
                minimum: self.minimum_indexer_stake,
            });
        }
        stake.deposit(tokens)?;
        tracing::debug!(%indexer, %tokens, "stake deposited");
        Ok(())
    }

    /// Start thawing `tokens`. Already thawed tokens are withdrawn first so
    /// their lock does not average into the new one.
    pub fn unstake(&mut self, indexer: &Address, tokens: U256, now: BlockNumber) -> Result<UnstakeOutcome> {
        if tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let minimum = self.minimum_indexer_stake;
        let thawing_period = self.thawing_period;
        let stake = self.get_mut(indexer)?;

        let available = stake.tokens_available();
        if available < tokens {
            return Err(GraphError::InsufficientAvailableTokens {
                requested: tokens,
                available,
            });
        }
        let new_stake = checked_sub(stake.tokens_secure_stake(), tokens)?;
        if !new_stake.is_zero() && new_stake < minimum {
            return Err(GraphError::BelowMinimumStake { minimum });
        }

        let withdrawn = stake.withdraw_tokens(now)?;
        stake.lock_tokens(tokens, thawing_period, now)?;
        let locked_until = stake.tokens_locked_until;
        tracing::debug!(%indexer, %tokens, locked_until, "stake locked");
        Ok(UnstakeOutcome { withdrawn, locked_until })
    }

    /// Withdraw thawed tokens
    pub fn withdraw(&mut self, indexer: &Address, now: BlockNumber) -> Result<U256> {
        let withdrawn = self.get_mut(indexer)?.withdraw_tokens(now)?;
        if withdrawn.is_zero() {
            return Err(GraphError::NothingToWithdraw);
        }
        Ok(withdrawn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_lock_weighted_average() {
        let mut stake = IndexerStake {
            tokens_staked: u(1_000),
            ..Default::default()
        };
        stake.lock_tokens(u(100), 10, 0).unwrap();
        assert_eq!(stake.tokens_locked_until, 10);

        stake.lock_tokens(u(50), 20, 5).unwrap();
        let expected = 5 + to_u64(weighted_average(u(5), u(100), u(20), u(50)).unwrap()).unwrap();
        assert_eq!(stake.tokens_locked_until, expected);
        assert_eq!(stake.tokens_locked_until, 15);
        assert_eq!(stake.tokens_locked, u(150));
    }

    #[test]
    fn test_unlock_resets_deadline() {
        let mut stake = IndexerStake::default();
        stake.lock_tokens(u(10), 5, 100).unwrap();
        stake.unlock_tokens(u(4)).unwrap();
        assert_eq!(stake.tokens_locked_until, 105);
        stake.unlock_tokens(u(6)).unwrap();
        assert_eq!(stake.tokens_locked_until, 0);
        assert!(stake.unlock_tokens(u(1)).is_err());
    }

    #[test]
    fn test_withdraw_capped_by_stake() {
        let mut stake = IndexerStake {
            tokens_staked: u(100),
            ..Default::default()
        };
        stake.lock_tokens(u(80), 10, 0).unwrap();
        assert_eq!(stake.withdraw_tokens(9).unwrap(), U256::ZERO);

        // slash below the locked amount
        stake.release(u(50)).unwrap();
        assert_eq!(stake.withdraw_tokens(10).unwrap(), u(50));
        assert_eq!(stake.tokens_staked, U256::ZERO);
        assert_eq!(stake.tokens_locked, u(30));
    }

    #[test]
    fn test_available_clamped_when_over_allocated() {
        let stake = IndexerStake {
            tokens_staked: u(100),
            tokens_allocated: u(80),
            tokens_locked: u(40),
            tokens_locked_until: 10,
        };
        assert_eq!(stake.tokens_available(), U256::ZERO);
        assert!(stake.is_over_allocated(U256::ZERO));
        assert!(!stake.is_over_allocated(u(20)));
        assert_eq!(stake.tokens_available_with_delegation(u(30)), u(10));
    }

    #[test]
    fn test_stake_manager_minimum() {
        let mut manager = StakeManager::new(u(100), 10);
        let indexer = Address::repeat_byte(1);

        assert!(matches!(
            manager.stake(&indexer, u(50)),
            Err(GraphError::BelowMinimumStake { .. })
        ));
        manager.stake(&indexer, u(100)).unwrap();
        manager.stake(&indexer, u(1)).unwrap();
        assert_eq!(manager.total_staked(), u(101));
    }

    #[test]
    fn test_unstake_rules() {
        let mut manager = StakeManager::new(u(100), 10);
        let indexer = Address::repeat_byte(1);
        manager.stake(&indexer, u(300)).unwrap();

        // would leave 50 secure stake
        assert!(matches!(
            manager.unstake(&indexer, u(250), 0),
            Err(GraphError::BelowMinimumStake { .. })
        ));

        let outcome = manager.unstake(&indexer, u(100), 0).unwrap();
        assert_eq!(outcome.locked_until, 10);
        assert!(matches!(manager.withdraw(&indexer, 5), Err(GraphError::NothingToWithdraw)));

        // thawed tokens are withdrawn before the next lock
        let outcome = manager.unstake(&indexer, u(200), 12).unwrap();
        assert_eq!(outcome.withdrawn, u(100));
        assert_eq!(outcome.locked_until, 22);
        assert_eq!(manager.withdraw(&indexer, 22).unwrap(), u(200));
    }

    proptest! {
        #[test]
        fn prop_available_never_negative(
            staked in 0u64..1_000_000,
            allocated in 0u64..1_000_000,
            locked in 0u64..1_000_000,
        ) {
            let stake = IndexerStake {
                tokens_staked: u(staked),
                tokens_allocated: u(allocated),
                tokens_locked: u(locked),
                tokens_locked_until: 1,
            };
            let expected = staked.saturating_sub(allocated.saturating_add(locked));
            prop_assert_eq!(stake.tokens_available(), u(expected));
        }

        #[test]
        fn prop_lock_unlock_round_trip(
            locked in 0u64..1_000_000,
            tokens in 1u64..1_000_000,
            period in 0u64..100_000,
            now in 0u64..100_000,
        ) {
            let mut stake = IndexerStake::default();
            if locked > 0 {
                stake.lock_tokens(u(locked), period, 0).unwrap();
            }
            let before = stake.tokens_locked;
            stake.lock_tokens(u(tokens), period, now).unwrap();
            stake.unlock_tokens(u(tokens)).unwrap();
            prop_assert_eq!(stake.tokens_locked, before);
        }
    }
}

//! # Slashing
//!
//! Stake penalties resolved from disputes.
//!
//! ## Dispute kinds
//!
//! | Kind | Default penalty | Beneficiary reward |
//! |------|-----------------|--------------------|
//! | Query | 2.5% of stake | 50% of slashed |
//! | Indexing | 2.5% of stake | 50% of slashed |
//!
//! Slashed tokens that are not paid to the beneficiary are burned.

use crate::staking::IndexerStake;
use graph_core::math::{is_valid_ppm, min, percent_of};
use graph_core::{Address, Epoch, GraphError, Ppm, Result, U256};
use serde::{Deserialize, Serialize};

/// Kind of dispute that produced a slash
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeKind {
    /// Conflicting or wrong query response attestation
    Query,
    /// Invalid proof of indexing
    Indexing,
}

impl DisputeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Indexing => "Indexing",
        }
    }
}

/// Penalty percentages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingParameters {
    pub query_slashing_percentage: Ppm,
    pub indexing_slashing_percentage: Ppm,
    /// Share of the slashed amount paid to the beneficiary
    pub fisherman_reward_percentage: Ppm,
}

impl Default for SlashingParameters {
    fn default() -> Self {
        Self {
            query_slashing_percentage: 25_000,
            indexing_slashing_percentage: 25_000,
            fisherman_reward_percentage: 500_000,
        }
    }
}

impl SlashingParameters {
    pub fn validate(&self) -> Result<()> {
        for ppm in [
            self.query_slashing_percentage,
            self.indexing_slashing_percentage,
            self.fisherman_reward_percentage,
        ] {
            if !is_valid_ppm(ppm) {
                return Err(GraphError::InvalidParameter(format!("slashing percentage {ppm} above 100%")));
            }
        }
        Ok(())
    }

    /// (tokens to slash, beneficiary reward) for a dispute against `tokens_staked`
    pub fn penalty(&self, kind: DisputeKind, tokens_staked: U256) -> Result<(U256, U256)> {
        let percentage = match kind {
            DisputeKind::Query => self.query_slashing_percentage,
            DisputeKind::Indexing => self.indexing_slashing_percentage,
        };
        let tokens = percent_of(percentage, tokens_staked)?;
        let reward = percent_of(self.fisherman_reward_percentage, tokens)?;
        Ok((tokens, reward))
    }
}

/// Executed slash
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashRecord {
    pub indexer: Address,
    pub beneficiary: Address,
    pub tokens: U256,
    pub reward: U256,
    /// Locked tokens unlocked so the indexer cannot withdraw them
    pub unlocked: U256,
    pub epoch: Epoch,
}

impl SlashRecord {
    /// Slashed tokens destroyed rather than paid out
    pub fn burned(&self) -> U256 {
        self.tokens - self.reward
    }
}

/// Slash executor with history
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashingEngine {
    pub params: SlashingParameters,
    executed: Vec<SlashRecord>,
}

impl SlashingEngine {
    pub fn new(params: SlashingParameters) -> Self {
        Self {
            params,
            executed: Vec::new(),
        }
    }

    /// Take `tokens` from an indexer's stake, `reward` of it earmarked for
    /// `beneficiary`. The caller moves the tokens.
    pub fn slash(
        &mut self,
        indexer: &Address,
        stake: &mut IndexerStake,
        tokens: U256,
        reward: U256,
        beneficiary: &Address,
        epoch: Epoch,
    ) -> Result<SlashRecord> {
        if !stake.has_stake() {
            return Err(GraphError::IndexerNotStaked);
        }
        if tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        if beneficiary.is_zero() {
            return Err(GraphError::ZeroAddress("slash beneficiary"));
        }
        if reward > tokens {
            return Err(GraphError::InvalidParameter("slash reward exceeds slashed tokens".into()));
        }
        if tokens > stake.tokens_staked {
            return Err(GraphError::InsufficientStake {
                requested: tokens,
                staked: stake.tokens_staked,
            });
        }

        let available = stake.tokens_available();
        let mut unlocked = U256::ZERO;
        if tokens > available && !stake.tokens_locked.is_zero() {
            unlocked = min(tokens - available, stake.tokens_locked);
            stake.unlock_tokens(unlocked)?;
        }
        stake.release(tokens)?;

        let record = SlashRecord {
            indexer: *indexer,
            beneficiary: *beneficiary,
            tokens,
            reward,
            unlocked,
            epoch,
        };
        tracing::info!(%indexer, %tokens, %reward, "indexer slashed");
        self.executed.push(record.clone());
        Ok(record)
    }

    pub fn history(&self) -> &[SlashRecord] {
        &self.executed
    }

    pub fn total_slashed(&self, indexer: &Address) -> U256 {
        self.executed
            .iter()
            .filter(|r| r.indexer == *indexer)
            .fold(U256::ZERO, |acc, r| acc.saturating_add(r.tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(v: u64) -> U256 {
        U256::from(v)
    }

    #[test]
    fn test_dispute_penalties() {
        let params = SlashingParameters::default();
        assert_eq!(params.penalty(DisputeKind::Query, u(1_000_000)).unwrap(), (u(25_000), u(12_500)));
        assert!(params.validate().is_ok());

        let bad = SlashingParameters {
            fisherman_reward_percentage: 1_000_001,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_slash_unlocks_over_allocated() {
        let mut engine = SlashingEngine::default();
        let indexer = Address::repeat_byte(1);
        let fisherman = Address::repeat_byte(2);
        let mut stake = IndexerStake {
            tokens_staked: u(100),
            tokens_allocated: u(60),
            ..Default::default()
        };
        stake.lock_tokens(u(30), 10, 0).unwrap();

        // 10 available, slash 25 -> unlock 15
        let record = engine.slash(&indexer, &mut stake, u(25), u(5), &fisherman, 1).unwrap();
        assert_eq!(record.unlocked, u(15));
        assert_eq!(record.burned(), u(20));
        assert_eq!(stake.tokens_locked, u(15));
        assert_eq!(stake.tokens_staked, u(75));
        assert_eq!(engine.total_slashed(&indexer), u(25));
    }

    #[test]
    fn test_slash_bounds() {
        let mut engine = SlashingEngine::default();
        let indexer = Address::repeat_byte(1);
        let fisherman = Address::repeat_byte(2);
        let mut stake = IndexerStake {
            tokens_staked: u(100),
            ..Default::default()
        };

        assert!(engine.slash(&indexer, &mut stake, u(10), u(11), &fisherman, 1).is_err());
        assert!(engine.slash(&indexer, &mut stake, u(101), u(1), &fisherman, 1).is_err());
        assert!(engine.slash(&indexer, &mut stake, u(10), u(1), &Address::ZERO, 1).is_err());
        assert!(engine.history().is_empty());
    }
}

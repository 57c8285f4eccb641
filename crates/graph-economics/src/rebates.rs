//! # Query-fee rebates
//!
//! One pool per epoch collects the fees and effective allocated stake of
//! every allocation closed in that epoch. Indexers later redeem a share
//! computed by the pool's production function.
//!
//! ## Production functions
//!
//! | Formula | Selected when | Reward |
//! |---------|---------------|--------|
//! | Cobb-Douglas | `lambda_numerator == 0` | `F · (s/S)^α · (f/F)^(1−α)` for α ∈ {0, ½, 1} |
//! | Exponential | `lambda_numerator != 0` | `f · (1 − α · e^(−λ·s/f))` with α ≤ 1 |
//!
//! `F`/`S` are pool fees and stake, `f`/`s` the indexer's. Every redemption
//! is clamped to the fees still unclaimed in the pool.

use graph_core::math::{checked_add, checked_mul, exp_neg, min, mul_div, sqrt};
use graph_core::{Epoch, GraphError, Result, FIXED_POINT_SCALING_FACTOR, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Production-function parameters fixed at pool creation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebateParameters {
    pub alpha_numerator: u32,
    pub alpha_denominator: u32,
    pub lambda_numerator: u32,
    pub lambda_denominator: u32,
}

impl Default for RebateParameters {
    fn default() -> Self {
        Self {
            alpha_numerator: 100,
            alpha_denominator: 100,
            lambda_numerator: 60,
            lambda_denominator: 100,
        }
    }
}

impl RebateParameters {
    /// The legacy Cobb-Douglas curve with α = ½
    pub fn cobb_douglas() -> Self {
        Self {
            alpha_numerator: 1,
            alpha_denominator: 2,
            lambda_numerator: 0,
            lambda_denominator: 1,
        }
    }

    pub fn is_exponential(&self) -> bool {
        self.lambda_numerator != 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.alpha_denominator == 0 || self.lambda_denominator == 0 {
            return Err(GraphError::InvalidParameter("rebate denominators must be positive".into()));
        }
        if self.alpha_numerator > self.alpha_denominator {
            return Err(GraphError::InvalidParameter("rebate alpha above 1".into()));
        }
        if !self.is_exponential() {
            let (n, d) = (self.alpha_numerator, self.alpha_denominator);
            if !(n == 0 || n == d || 2 * u64::from(n) == u64::from(d)) {
                return Err(GraphError::InvalidParameter(
                    "Cobb-Douglas alpha must be 0, 1/2 or 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// Raw reward before the pool clamp
    pub fn compute(&self, pool_fees: U256, pool_stake: U256, indexer_fees: U256, indexer_stake: U256) -> Result<U256> {
        if pool_fees.is_zero() || pool_stake.is_zero() {
            return Ok(U256::ZERO);
        }
        if self.is_exponential() {
            self.exponential(indexer_fees, indexer_stake)
        } else {
            self.cobb_douglas_reward(pool_fees, pool_stake, indexer_fees, indexer_stake)
        }
    }

    fn cobb_douglas_reward(
        &self,
        pool_fees: U256,
        pool_stake: U256,
        indexer_fees: U256,
        indexer_stake: U256,
    ) -> Result<U256> {
        let wad = FIXED_POINT_SCALING_FACTOR;
        let (n, d) = (self.alpha_numerator, self.alpha_denominator);
        if n == 0 {
            // (f/F)^1
            return mul_div(pool_fees, indexer_fees, pool_fees);
        }
        if n == d {
            // (s/S)^1
            return mul_div(pool_fees, indexer_stake, pool_stake);
        }
        let stake_ratio = mul_div(indexer_stake, wad, pool_stake)?;
        let fee_ratio = mul_div(indexer_fees, wad, pool_fees)?;
        let root = sqrt(checked_mul(stake_ratio, fee_ratio)?);
        mul_div(pool_fees, root, wad)
    }

    fn exponential(&self, fees: U256, stake: U256) -> Result<U256> {
        if fees.is_zero() {
            return Ok(U256::ZERO);
        }
        let wad = FIXED_POINT_SCALING_FACTOR;
        let exponent = mul_div(
            checked_mul(stake, U256::from(self.lambda_numerator))?,
            wad,
            checked_mul(fees, U256::from(self.lambda_denominator))?,
        )?;
        let decay = exp_neg(exponent)?;
        let withheld = mul_div(
            fees,
            checked_mul(U256::from(self.alpha_numerator), decay)?,
            checked_mul(U256::from(self.alpha_denominator), wad)?,
        )?;
        Ok(fees.saturating_sub(withheld))
    }
}

/// Result of a redemption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redemption {
    /// Tokens paid to the redeeming allocation
    pub tokens: U256,
    /// Fees left in the pool after its last redemption, to be burned
    pub residual: U256,
}

/// Rebate pool for one epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebatePool {
    pub epoch: Epoch,
    pub fees: U256,
    pub effective_allocated_stake: U256,
    pub claimed_rewards: U256,
    pub unclaimed_allocations_count: u64,
    pub params: RebateParameters,
    /// Set once the last contributing allocation redeemed
    pub settled: bool,
}

impl RebatePool {
    pub fn new(epoch: Epoch, params: RebateParameters) -> Self {
        Self {
            epoch,
            fees: U256::ZERO,
            effective_allocated_stake: U256::ZERO,
            claimed_rewards: U256::ZERO,
            unclaimed_allocations_count: 0,
            params,
            settled: false,
        }
    }

    pub fn unclaimed_fees(&self) -> U256 {
        self.fees.saturating_sub(self.claimed_rewards)
    }

    pub fn add_to_pool(&mut self, fees: U256, effective_allocated_stake: U256) -> Result<()> {
        if self.settled {
            return Err(GraphError::RebatePoolSettled(self.epoch));
        }
        self.fees = checked_add(self.fees, fees)?;
        self.effective_allocated_stake = checked_add(self.effective_allocated_stake, effective_allocated_stake)?;
        self.unclaimed_allocations_count += 1;
        Ok(())
    }

    /// Late fees for an allocation that already contributed its stake
    pub fn add_fees(&mut self, fees: U256) -> Result<()> {
        if self.settled {
            return Err(GraphError::RebatePoolSettled(self.epoch));
        }
        self.fees = checked_add(self.fees, fees)?;
        Ok(())
    }

    /// Redeem one allocation's share. The pool keeps no per-allocation
    /// ledger; callers must not redeem the same allocation twice.
    pub fn redeem(&mut self, indexer_fees: U256, indexer_effective_allocated_stake: U256) -> Result<Redemption> {
        if self.unclaimed_allocations_count == 0 {
            return Err(GraphError::NoUnclaimedAllocations(self.epoch));
        }
        let raw = self.params.compute(
            self.fees,
            self.effective_allocated_stake,
            indexer_fees,
            indexer_effective_allocated_stake,
        )?;
        let tokens = min(raw, self.unclaimed_fees());

        self.claimed_rewards = checked_add(self.claimed_rewards, tokens)?;
        self.unclaimed_allocations_count -= 1;

        let mut residual = U256::ZERO;
        if self.unclaimed_allocations_count == 0 {
            residual = self.unclaimed_fees();
            self.settled = true;
        }
        Ok(Redemption { tokens, residual })
    }
}

/// Rebate pools by epoch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebatePools {
    pools: BTreeMap<Epoch, RebatePool>,
}

impl RebatePools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, epoch: Epoch) -> Option<&RebatePool> {
        self.pools.get(&epoch)
    }

    pub fn pools(&self) -> impl Iterator<Item = &RebatePool> {
        self.pools.values()
    }

    /// Contribute to the pool of `epoch`, creating it with `params` first
    pub fn add_to_pool(
        &mut self,
        epoch: Epoch,
        params: RebateParameters,
        fees: U256,
        effective_allocated_stake: U256,
    ) -> Result<()> {
        self.pools
            .entry(epoch)
            .or_insert_with(|| RebatePool::new(epoch, params))
            .add_to_pool(fees, effective_allocated_stake)
    }

    pub fn add_fees(&mut self, epoch: Epoch, fees: U256) -> Result<()> {
        self.pools
            .get_mut(&epoch)
            .ok_or(GraphError::RebatePoolNotFound(epoch))?
            .add_fees(fees)
    }

    pub fn redeem(&mut self, epoch: Epoch, indexer_fees: U256, indexer_effective_allocated_stake: U256) -> Result<Redemption> {
        self.pools
            .get_mut(&epoch)
            .ok_or(GraphError::RebatePoolNotFound(epoch))?
            .redeem(indexer_fees, indexer_effective_allocated_stake)
    }
}

//! # Issuance
//!
//! New rewards per block range come from one of two sources:
//!
//! | Source | New rewards over `n` blocks |
//! |--------|-----------------------------|
//! | Compounding rate (legacy) | `base · (rate^n − 1)` with `rate` in 1e18 fixed point |
//! | Issuance allocator (V2) | `per_block · n` for the rewards target |
//!
//! A rate of exactly 1e18 means zero growth over any exponent.

use graph_core::math::{checked_add, checked_mul, checked_sub, mul_div, pow};
use graph_core::{Address, BlockNumber, GraphError, Result, FIXED_POINT_SCALING_FACTOR, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage layout version of the issuance state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaVersion {
    /// Rate-only issuance without layer-reward tracking
    #[default]
    V1,
    /// Adds accumulated layer rewards and allocator-driven issuance
    V2,
}

impl SchemaVersion {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Multi-target issuance collaborator
pub trait IssuanceAllocator: Send + Sync {
    /// Tokens per block issued to `target`, `None` if the target is unknown
    fn issuance_per_block(&self, target: &Address) -> Option<U256>;
}

/// Allocator with a fixed per-block amount per target
#[derive(Clone, Debug, Default)]
pub struct FixedAllocator {
    per_block: BTreeMap<Address, U256>,
}

impl FixedAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: Address, per_block: U256) -> Self {
        self.per_block.insert(target, per_block);
        self
    }
}

impl IssuanceAllocator for FixedAllocator {
    fn issuance_per_block(&self, target: &Address) -> Option<U256> {
        self.per_block.get(target).copied()
    }
}

/// Issuance parameters of one chain side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceState {
    #[serde(default)]
    pub version: SchemaVersion,

    /// Supply snapshot the rate compounds on
    pub issuance_base: U256,

    /// Per-block growth factor, at least 1e18
    pub issuance_rate: U256,

    pub last_rewards_update_block: BlockNumber,

    /// Rewards issued since the V2 migration
    #[serde(default)]
    pub accumulated_layer_rewards: U256,
}

impl Default for IssuanceState {
    fn default() -> Self {
        Self {
            version: SchemaVersion::V2,
            issuance_base: U256::ZERO,
            issuance_rate: FIXED_POINT_SCALING_FACTOR,
            last_rewards_update_block: 0,
            accumulated_layer_rewards: U256::ZERO,
        }
    }
}

impl IssuanceState {
    pub fn new(issuance_base: U256, issuance_rate: U256, block: BlockNumber) -> Result<Self> {
        validate_rate(issuance_rate)?;
        Ok(Self {
            issuance_base,
            issuance_rate,
            last_rewards_update_block: block,
            ..Default::default()
        })
    }

    /// A legacy layout, as restored from an old snapshot
    pub fn legacy(issuance_base: U256, issuance_rate: U256, block: BlockNumber) -> Result<Self> {
        Ok(Self {
            version: SchemaVersion::V1,
            ..Self::new(issuance_base, issuance_rate, block)?
        })
    }

    /// New rewards accrued between the last update and `block`
    pub fn new_rewards(
        &self,
        block: BlockNumber,
        allocator: Option<(&dyn IssuanceAllocator, &Address)>,
    ) -> Result<U256> {
        let blocks = block.saturating_sub(self.last_rewards_update_block);
        if blocks == 0 {
            return Ok(U256::ZERO);
        }
        if self.version >= SchemaVersion::V2 {
            if let Some(per_block) = allocator.and_then(|(a, target)| a.issuance_per_block(target)) {
                return checked_mul(per_block, U256::from(blocks));
            }
        }
        if self.issuance_base.is_zero() {
            return Ok(U256::ZERO);
        }
        let wad = FIXED_POINT_SCALING_FACTOR;
        let growth = checked_sub(pow(self.issuance_rate, blocks, wad)?, wad)?;
        mul_div(self.issuance_base, growth, wad)
    }

    /// Establish a new baseline at `block` after `rewards` were distributed
    pub fn record_update(&mut self, block: BlockNumber, rewards: U256) -> Result<()> {
        self.last_rewards_update_block = self.last_rewards_update_block.max(block);
        if self.version >= SchemaVersion::V2 {
            self.accumulated_layer_rewards = checked_add(self.accumulated_layer_rewards, rewards)?;
        }
        Ok(())
    }

    pub fn set_issuance_rate(&mut self, rate: U256) -> Result<()> {
        validate_rate(rate)?;
        self.issuance_rate = rate;
        Ok(())
    }

    /// One-time transform from the legacy layout
    pub fn migrate_to_v2(&mut self) -> Result<()> {
        if self.version != SchemaVersion::V1 {
            return Err(GraphError::SchemaMismatch {
                required: SchemaVersion::V1.as_u32(),
                found: self.version.as_u32(),
            });
        }
        self.version = SchemaVersion::V2;
        self.accumulated_layer_rewards = U256::ZERO;
        tracing::info!("issuance state migrated to V2");
        Ok(())
    }

    pub fn require_v2(&self) -> Result<()> {
        if self.version < SchemaVersion::V2 {
            return Err(GraphError::SchemaMismatch {
                required: SchemaVersion::V2.as_u32(),
                found: self.version.as_u32(),
            });
        }
        Ok(())
    }
}

fn validate_rate(rate: U256) -> Result<()> {
    if rate < FIXED_POINT_SCALING_FACTOR {
        return Err(GraphError::InvalidParameter("issuance rate below 1.0".into()));
    }
    Ok(())
}

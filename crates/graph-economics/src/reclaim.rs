//! Reclaim routing
//!
//! Tokens that cannot be distributed are minted to a governance-configured
//! address: the per-condition override first, then the default. With
//! neither configured the tokens are dropped without a record, which is how
//! unconfigured deployments have always behaved.

use crate::conditions::RewardCondition;
use crate::events::{EventSink, ProtocolEvent};
use crate::token::TokenMinter;
use graph_core::{Address, AllocationId, Result, SubgraphDeploymentId, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reclaim address configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimRouter {
    reclaim_addresses: BTreeMap<RewardCondition, Address>,
    default_reclaim_address: Option<Address>,
}

/// Who a reclaimed amount belonged to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReclaimContext {
    pub indexer: Address,
    pub allocation_id: AllocationId,
    pub subgraph: SubgraphDeploymentId,
}

impl ReclaimContext {
    /// Protocol-wide reclaim not tied to an allocation
    pub const GLOBAL: Self = Self {
        indexer: Address::ZERO,
        allocation_id: AllocationId::ZERO,
        subgraph: SubgraphDeploymentId::ZERO,
    };

    pub fn subgraph(subgraph: SubgraphDeploymentId) -> Self {
        Self {
            subgraph,
            ..Self::GLOBAL
        }
    }
}

impl ReclaimRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-condition address, else the default, else `None` (drop)
    pub fn resolve(&self, condition: RewardCondition) -> Option<Address> {
        self.reclaim_addresses
            .get(&condition)
            .copied()
            .or(self.default_reclaim_address)
    }

    /// Configure a per-condition address; the zero address clears it
    pub fn set_reclaim_address(&mut self, condition: RewardCondition, address: Address) {
        if address.is_zero() {
            self.reclaim_addresses.remove(&condition);
        } else {
            self.reclaim_addresses.insert(condition, address);
        }
    }

    /// Configure the catch-all address; the zero address clears it
    pub fn set_default_reclaim_address(&mut self, address: Address) {
        self.default_reclaim_address = (!address.is_zero()).then_some(address);
    }

    pub fn default_reclaim_address(&self) -> Option<Address> {
        self.default_reclaim_address
    }

    /// Mint `amount` to the resolved address and record it. Returns the
    /// recipient, or `None` when the amount was dropped.
    pub fn route(
        &self,
        minter: &mut dyn TokenMinter,
        events: &mut dyn EventSink,
        condition: RewardCondition,
        amount: U256,
        context: ReclaimContext,
    ) -> Result<Option<Address>> {
        if amount.is_zero() {
            return Ok(None);
        }
        let Some(reclaim_address) = self.resolve(condition) else {
            tracing::warn!(%condition, %amount, subgraph = %context.subgraph, "no reclaim address, rewards dropped");
            return Ok(None);
        };
        minter.mint(&reclaim_address, amount)?;
        events.emit(ProtocolEvent::RewardsReclaimed {
            condition,
            amount,
            indexer: context.indexer,
            allocation_id: context.allocation_id,
            subgraph: context.subgraph,
            reclaim_address,
        });
        tracing::debug!(%condition, %amount, %reclaim_address, "rewards reclaimed");
        Ok(Some(reclaim_address))
    }
}

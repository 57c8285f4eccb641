//! Allocations
//!
//! An allocation commits indexer stake to one subgraph deployment. It is
//! never removed once created so historical rebates stay claimable.
//!
//! ```text
//! Null -> Active -> Closed -> Finalized -> Claimed
//! ```
//!
//! `Closed` turns into `Finalized` once the channel dispute window has
//! passed; `Claimed` is recorded when the rebate is paid out.

use graph_core::math::{checked_add, checked_mul, checked_sub};
use graph_core::{
    Address, AllocationId, Epoch, GraphError, Poi, Result, SubgraphDeploymentId, Timestamp, U256,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of an allocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationState {
    Null,
    Active,
    Closed,
    Finalized,
    Claimed,
}

impl AllocationState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Active => "Active",
            Self::Closed => "Closed",
            Self::Finalized => "Finalized",
            Self::Claimed => "Claimed",
        }
    }
}

impl fmt::Display for AllocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stake committed to a deployment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub indexer: Address,
    pub subgraph: SubgraphDeploymentId,
    pub tokens: U256,
    pub created_at_epoch: Epoch,
    /// Set exactly once, on close
    pub closed_at_epoch: Option<Epoch>,
    /// Subgraph per-token accumulator at the last claim, reclaim or resize
    pub acc_rewards_per_allocated_token: U256,
    /// Rewards carried across resizes until the next claimable presentation
    pub acc_rewards_pending: U256,
    pub collected_fees: U256,
    pub distributed_rebates: U256,
    pub effective_allocation: U256,
    pub last_poi_presented_at: Timestamp,
    pub poi: Option<Poi>,
    pub claimed: bool,
}

impl Allocation {
    pub fn new(
        id: AllocationId,
        indexer: Address,
        subgraph: SubgraphDeploymentId,
        tokens: U256,
        created_at_epoch: Epoch,
        acc_rewards_per_allocated_token: U256,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            indexer,
            subgraph,
            tokens,
            created_at_epoch,
            closed_at_epoch: None,
            acc_rewards_per_allocated_token,
            acc_rewards_pending: U256::ZERO,
            collected_fees: U256::ZERO,
            distributed_rebates: U256::ZERO,
            effective_allocation: U256::ZERO,
            last_poi_presented_at: now,
            poi: None,
            claimed: false,
        }
    }

    pub fn state(&self, current_epoch: Epoch, channel_dispute_epochs: u64) -> AllocationState {
        if self.claimed {
            return AllocationState::Claimed;
        }
        match self.closed_at_epoch {
            None => AllocationState::Active,
            Some(closed) if current_epoch.saturating_sub(closed) >= channel_dispute_epochs => {
                AllocationState::Finalized
            }
            Some(_) => AllocationState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at_epoch.is_none()
    }

    /// Close at `epoch`, recording the effective allocation
    /// `tokens × min(epochs open, max_allocation_epochs)` with at least one
    /// epoch counted. A zero cap disables capping.
    pub fn close(&mut self, epoch: Epoch, max_allocation_epochs: u64) -> Result<U256> {
        if self.closed_at_epoch.is_some() {
            return Err(GraphError::InvalidAllocationState {
                id: self.id,
                expected: AllocationState::Active.name(),
                actual: AllocationState::Closed.name(),
            });
        }
        let mut epochs = epoch.saturating_sub(self.created_at_epoch).max(1);
        if max_allocation_epochs > 0 {
            epochs = epochs.min(max_allocation_epochs);
        }
        self.effective_allocation = checked_mul(self.tokens, U256::from(epochs))?;
        self.closed_at_epoch = Some(epoch);
        Ok(self.effective_allocation)
    }
}

/// Allocated-token totals consumed by the rewards accumulator
pub trait AllocatedTokensView {
    fn allocated_tokens(&self, subgraph: &SubgraphDeploymentId) -> U256;
}

/// Tokens allocated to each deployment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphAllocations(BTreeMap<SubgraphDeploymentId, U256>);

impl SubgraphAllocations {
    pub fn add(&mut self, subgraph: &SubgraphDeploymentId, tokens: U256) -> Result<()> {
        let total = self.0.entry(*subgraph).or_default();
        *total = checked_add(*total, tokens)?;
        Ok(())
    }

    pub fn sub(&mut self, subgraph: &SubgraphDeploymentId, tokens: U256) -> Result<()> {
        let total = self.0.entry(*subgraph).or_default();
        *total = checked_sub(*total, tokens)?;
        Ok(())
    }
}

impl AllocatedTokensView for SubgraphAllocations {
    fn allocated_tokens(&self, subgraph: &SubgraphDeploymentId) -> U256 {
        self.0.get(subgraph).copied().unwrap_or_default()
    }
}

/// Every allocation ever created plus per-deployment totals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationBook {
    pub allocations: BTreeMap<AllocationId, Allocation>,
    pub subgraph_totals: SubgraphAllocations,
}

impl AllocationBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &AllocationId) -> Result<&Allocation> {
        self.allocations.get(id).ok_or(GraphError::AllocationNotFound(*id))
    }

    pub fn get_mut(&mut self, id: &AllocationId) -> Result<&mut Allocation> {
        self.allocations.get_mut(id).ok_or(GraphError::AllocationNotFound(*id))
    }

    pub fn state(&self, id: &AllocationId, current_epoch: Epoch, channel_dispute_epochs: u64) -> AllocationState {
        self.allocations
            .get(id)
            .map(|a| a.state(current_epoch, channel_dispute_epochs))
            .unwrap_or(AllocationState::Null)
    }

    /// Fail unless the allocation is in one of `allowed`
    pub fn require_state(
        &self,
        id: &AllocationId,
        current_epoch: Epoch,
        channel_dispute_epochs: u64,
        allowed: &[AllocationState],
    ) -> Result<&Allocation> {
        let state = self.state(id, current_epoch, channel_dispute_epochs);
        if !allowed.contains(&state) {
            return Err(GraphError::InvalidAllocationState {
                id: *id,
                expected: allowed.first().map(|s| s.name()).unwrap_or("none"),
                actual: state.name(),
            });
        }
        self.get(id)
    }

    /// Record a new allocation and add its tokens to the deployment total
    pub fn insert(&mut self, allocation: Allocation) -> Result<()> {
        if self.allocations.contains_key(&allocation.id) {
            return Err(GraphError::AllocationAlreadyExists(allocation.id));
        }
        self.subgraph_totals.add(&allocation.subgraph, allocation.tokens)?;
        self.allocations.insert(allocation.id, allocation);
        Ok(())
    }

    /// Open allocations of an indexer
    pub fn open_for(&self, indexer: &Address) -> impl Iterator<Item = &Allocation> + '_ {
        let indexer = *indexer;
        self.allocations
            .values()
            .filter(move |a| a.indexer == indexer && a.is_open())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation(tokens: u64, created: Epoch) -> Allocation {
        let indexer = Address::repeat_byte(1);
        let subgraph = SubgraphDeploymentId::from_content(b"Qm");
        Allocation::new(
            AllocationId::derive(&indexer, &subgraph, 0),
            indexer,
            subgraph,
            U256::from(tokens),
            created,
            U256::ZERO,
            0,
        )
    }

    #[test]
    fn test_state_machine() {
        let mut alloc = allocation(100, 3);
        assert_eq!(alloc.state(3, 2), AllocationState::Active);

        alloc.close(5, 0).unwrap();
        assert_eq!(alloc.state(6, 2), AllocationState::Closed);
        assert_eq!(alloc.state(7, 2), AllocationState::Finalized);

        alloc.claimed = true;
        assert_eq!(alloc.state(7, 2), AllocationState::Claimed);
    }

    #[test]
    fn test_close_once() {
        let mut alloc = allocation(100, 3);
        alloc.close(5, 0).unwrap();
        assert!(matches!(
            alloc.close(6, 0),
            Err(GraphError::InvalidAllocationState { .. })
        ));
        assert_eq!(alloc.closed_at_epoch, Some(5));
    }

    #[test]
    fn test_effective_allocation() {
        let mut alloc = allocation(100, 3);
        assert_eq!(alloc.close(3, 0).unwrap(), U256::from(100));

        let mut alloc = allocation(100, 3);
        assert_eq!(alloc.close(10, 4).unwrap(), U256::from(400));

        let mut alloc = allocation(100, 3);
        assert_eq!(alloc.close(5, 4).unwrap(), U256::from(200));
    }

    #[test]
    fn test_book_rejects_duplicates() {
        let mut book = AllocationBook::new();
        let alloc = allocation(100, 1);
        let id = alloc.id;
        book.insert(alloc.clone()).unwrap();

        assert_eq!(book.insert(alloc), Err(GraphError::AllocationAlreadyExists(id)));
        assert_eq!(book.subgraph_totals.allocated_tokens(&book.get(&id).unwrap().subgraph), U256::from(100));
        assert_eq!(book.state(&AllocationId::ZERO, 1, 1), AllocationState::Null);
        assert_eq!(book.open_for(&Address::repeat_byte(1)).count(), 1);
    }
}

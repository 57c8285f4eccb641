//! # Rewards accumulator
//!
//! Indexing rewards are tracked by three cumulative per-token values, each
//! advanced lazily on the next touch:
//!
//! | Level | Accumulator | Advanced by |
//! |-------|-------------|-------------|
//! | Global | `acc_rewards_per_signal` | new issuance / total signal |
//! | Subgraph | `acc_rewards_for_subgraph`, `acc_rewards_per_allocated_token` | subgraph signal × per-signal delta |
//! | Allocation | snapshot of the per-token value + `acc_rewards_pending` | claim, reclaim, resize |
//!
//! A subgraph whose condition is not `NONE` is frozen: its accumulators do
//! not grow and the delta it would have earned is reclaimed. Snapshots
//! always advance, so a frozen period is never counted later.
//!
//! Per-signal division truncates; the remainder is neither accumulated nor
//! reclaimed.

use crate::allocation::{AllocatedTokensView, Allocation};
use crate::conditions::{
    classify_claim, classify_poi_presentation, classify_subgraph, is_stale, Disposition, EligibilityOracle,
    PoiConditionInputs, RewardCondition, SubgraphConditionInputs,
};
use crate::curation::SignalView;
use crate::events::{EventSink, ProtocolEvent};
use crate::issuance::{IssuanceAllocator, IssuanceState};
use crate::reclaim::{ReclaimContext, ReclaimRouter};
use crate::token::TokenMinter;
use graph_core::math::{checked_add, diff_or_zero, mul_div};
use graph_core::{
    Address, BlockClock, BlockNumber, GraphError, Poi, Result, SubgraphDeploymentId, FIXED_POINT_SCALING_FACTOR,
    U256,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Per-subgraph accumulators
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubgraphRewards {
    /// Rewards ever attributed while claimable
    pub acc_rewards_for_subgraph: U256,
    /// Rewards per allocated token, 1e18 fixed point
    pub acc_rewards_per_allocated_token: U256,
    /// Global per-signal value at the last update
    pub acc_rewards_per_signal_snapshot: U256,
    pub snapshot_block: BlockNumber,
}

/// Serializable accumulator state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardsState {
    pub issuance: IssuanceState,
    pub acc_rewards_per_signal: U256,
    pub subgraphs: BTreeMap<SubgraphDeploymentId, SubgraphRewards>,
    pub denylist: BTreeSet<SubgraphDeploymentId>,
    pub reclaim: ReclaimRouter,
    pub minimum_subgraph_signal: U256,
    /// Seconds an allocation may go without presenting a POI
    pub max_poi_staleness: u64,
    /// Receives claimed rewards on behalf of indexers
    pub rewards_issuer: Address,
    /// Target identity asked of the issuance allocator
    pub issuance_target: Address,
}

impl RewardsState {
    pub fn new(issuance: IssuanceState, rewards_issuer: Address, issuance_target: Address) -> Self {
        Self {
            issuance,
            acc_rewards_per_signal: U256::ZERO,
            subgraphs: BTreeMap::new(),
            denylist: BTreeSet::new(),
            reclaim: ReclaimRouter::new(),
            minimum_subgraph_signal: U256::ZERO,
            max_poi_staleness: 28 * 24 * 3600,
            rewards_issuer,
            issuance_target,
        }
    }
}

/// Read-only collaborators for accumulator views
#[derive(Clone, Copy)]
pub struct RewardsView<'a> {
    pub clock: &'a BlockClock,
    pub signal: &'a dyn SignalView,
    pub allocated: &'a dyn AllocatedTokensView,
}

/// Collaborators for accumulator updates
pub struct RewardsEnv<'a> {
    pub clock: &'a BlockClock,
    pub signal: &'a dyn SignalView,
    pub allocated: &'a dyn AllocatedTokensView,
    pub minter: &'a mut dyn TokenMinter,
    pub events: &'a mut dyn EventSink,
}

impl RewardsEnv<'_> {
    pub fn view(&self) -> RewardsView<'_> {
        RewardsView {
            clock: self.clock,
            signal: self.signal,
            allocated: self.allocated,
        }
    }
}

/// Disposition of a reward-distribution attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RewardsOutcome {
    /// Minted to the rewards issuer
    Claimed { amount: U256 },
    /// Routed to the reclaim address (`to` is `None` when dropped)
    Reclaimed {
        condition: RewardCondition,
        amount: U256,
        to: Option<Address>,
    },
    /// Withheld with the claim position preserved
    Deferred { condition: RewardCondition },
    /// Carried in the allocation's pending rewards
    Accrued { amount: U256 },
}

impl RewardsOutcome {
    /// Tokens minted for the indexer
    pub fn claimed(&self) -> U256 {
        match self {
            Self::Claimed { amount } => *amount,
            _ => U256::ZERO,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }

    pub fn condition(&self) -> RewardCondition {
        match self {
            Self::Claimed { .. } | Self::Accrued { .. } => RewardCondition::None,
            Self::Reclaimed { condition, .. } | Self::Deferred { condition } => *condition,
        }
    }
}

/// Projected subgraph update, not yet committed
struct SubgraphProjection {
    rewards: SubgraphRewards,
    condition: RewardCondition,
    delta: U256,
}

/// Reward accumulator with its injected collaborators. Collaborators are
/// not persisted; reattach them after deserializing.
#[derive(Clone, Serialize, Deserialize)]
pub struct RewardsManager {
    pub state: RewardsState,
    #[serde(skip)]
    eligibility_oracle: Option<Arc<dyn EligibilityOracle>>,
    #[serde(skip)]
    issuance_allocator: Option<Arc<dyn IssuanceAllocator>>,
}

impl fmt::Debug for RewardsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewardsManager")
            .field("state", &self.state)
            .field("eligibility_oracle", &self.eligibility_oracle.is_some())
            .field("issuance_allocator", &self.issuance_allocator.is_some())
            .finish()
    }
}

impl RewardsManager {
    pub fn new(state: RewardsState) -> Self {
        Self {
            state,
            eligibility_oracle: None,
            issuance_allocator: None,
        }
    }

    fn allocator(&self) -> Option<(&dyn IssuanceAllocator, &Address)> {
        self.issuance_allocator
            .as_deref()
            .map(|a| (a, &self.state.issuance_target))
    }

    pub fn is_denied(&self, subgraph: &SubgraphDeploymentId) -> bool {
        self.state.denylist.contains(subgraph)
    }

    // === Views ===

    /// Per-signal accumulator as of the current block, without committing
    pub fn get_acc_rewards_per_signal(&self, view: RewardsView<'_>) -> Result<U256> {
        let total = view.signal.total_signal();
        if total.is_zero() {
            return Ok(self.state.acc_rewards_per_signal);
        }
        let new_rewards = self
            .state
            .issuance
            .new_rewards(view.clock.block_number(), self.allocator())?;
        checked_add(
            self.state.acc_rewards_per_signal,
            mul_div(new_rewards, FIXED_POINT_SCALING_FACTOR, total)?,
        )
    }

    pub fn subgraph_condition(&self, view: RewardsView<'_>, subgraph: &SubgraphDeploymentId) -> RewardCondition {
        classify_subgraph(&SubgraphConditionInputs {
            total_signal: view.signal.total_signal(),
            subgraph_signal: view.signal.subgraph_signal(subgraph),
            denied: self.is_denied(subgraph),
            allocated_tokens: view.allocated.allocated_tokens(subgraph),
            minimum_signal: self.state.minimum_subgraph_signal,
        })
    }

    fn project_subgraph(
        &self,
        view: RewardsView<'_>,
        subgraph: &SubgraphDeploymentId,
        acc_rewards_per_signal: U256,
    ) -> Result<SubgraphProjection> {
        let mut rewards = self.state.subgraphs.get(subgraph).cloned().unwrap_or_default();
        let condition = self.subgraph_condition(view, subgraph);
        let delta = mul_div(
            view.signal.subgraph_signal(subgraph),
            diff_or_zero(acc_rewards_per_signal, rewards.acc_rewards_per_signal_snapshot),
            FIXED_POINT_SCALING_FACTOR,
        )?;

        rewards.acc_rewards_per_signal_snapshot = acc_rewards_per_signal;
        rewards.snapshot_block = view.clock.block_number();
        if condition.is_claimable() && !delta.is_zero() {
            rewards.acc_rewards_for_subgraph = checked_add(rewards.acc_rewards_for_subgraph, delta)?;
            let allocated = view.allocated.allocated_tokens(subgraph);
            if !allocated.is_zero() {
                rewards.acc_rewards_per_allocated_token = checked_add(
                    rewards.acc_rewards_per_allocated_token,
                    mul_div(delta, FIXED_POINT_SCALING_FACTOR, allocated)?,
                )?;
            }
        }
        Ok(SubgraphProjection {
            rewards,
            condition,
            delta,
        })
    }

    /// Subgraph accumulators as of the current block, without committing
    pub fn get_subgraph_rewards(&self, view: RewardsView<'_>, subgraph: &SubgraphDeploymentId) -> Result<SubgraphRewards> {
        let acc = self.get_acc_rewards_per_signal(view)?;
        Ok(self.project_subgraph(view, subgraph, acc)?.rewards)
    }

    /// `tokens × (end − start)` in 1e18 fixed point
    pub fn calc_rewards(&self, tokens: U256, start: U256, end: U256) -> Result<U256> {
        mul_div(tokens, diff_or_zero(end, start), FIXED_POINT_SCALING_FACTOR)
    }

    fn pending_rewards(&self, allocation: &Allocation, acc_per_allocated_token: U256) -> Result<U256> {
        checked_add(
            self.calc_rewards(
                allocation.tokens,
                allocation.acc_rewards_per_allocated_token,
                acc_per_allocated_token,
            )?,
            allocation.acc_rewards_pending,
        )
    }

    /// Rewards an open allocation would collect now, before conditions
    pub fn get_rewards(&self, view: RewardsView<'_>, allocation: &Allocation) -> Result<U256> {
        if !allocation.is_open() {
            return Ok(U256::ZERO);
        }
        let subgraph = self.get_subgraph_rewards(view, &allocation.subgraph)?;
        self.pending_rewards(allocation, subgraph.acc_rewards_per_allocated_token)
    }

    // === Accumulator updates ===

    /// Accrue issuance since the last update into the per-signal
    /// accumulator. With no signal anywhere the new rewards are reclaimed
    /// as `NO_SIGNAL` and the accumulator stays put.
    pub fn update_acc_rewards_per_signal(&mut self, env: &mut RewardsEnv<'_>) -> Result<U256> {
        let block = env.clock.block_number();
        let new_rewards = self.state.issuance.new_rewards(block, self.allocator())?;
        if !new_rewards.is_zero() {
            let total = env.signal.total_signal();
            if total.is_zero() {
                self.state.reclaim.route(
                    &mut *env.minter,
                    &mut *env.events,
                    RewardCondition::NoSignal,
                    new_rewards,
                    ReclaimContext::GLOBAL,
                )?;
            } else {
                self.state.acc_rewards_per_signal = checked_add(
                    self.state.acc_rewards_per_signal,
                    mul_div(new_rewards, FIXED_POINT_SCALING_FACTOR, total)?,
                )?;
            }
        }
        self.state.issuance.record_update(block, new_rewards)?;
        Ok(self.state.acc_rewards_per_signal)
    }

    fn update_subgraph(&mut self, env: &mut RewardsEnv<'_>, subgraph: &SubgraphDeploymentId) -> Result<SubgraphRewards> {
        let acc = self.update_acc_rewards_per_signal(env)?;
        let projection = self.project_subgraph(env.view(), subgraph, acc)?;
        if !projection.condition.is_claimable() {
            self.state.reclaim.route(
                &mut *env.minter,
                &mut *env.events,
                projection.condition,
                projection.delta,
                ReclaimContext::subgraph(*subgraph),
            )?;
        }
        self.state.subgraphs.insert(*subgraph, projection.rewards.clone());
        Ok(projection.rewards)
    }

    /// Must run before the subgraph's signal changes. Returns the
    /// subgraph's cumulative rewards.
    pub fn on_subgraph_signal_update(&mut self, env: &mut RewardsEnv<'_>, subgraph: &SubgraphDeploymentId) -> Result<U256> {
        Ok(self.update_subgraph(env, subgraph)?.acc_rewards_for_subgraph)
    }

    /// Must run before the subgraph's allocated tokens change. Returns the
    /// per-allocated-token accumulator.
    pub fn on_subgraph_allocation_update(
        &mut self,
        env: &mut RewardsEnv<'_>,
        subgraph: &SubgraphDeploymentId,
    ) -> Result<U256> {
        Ok(self.update_subgraph(env, subgraph)?.acc_rewards_per_allocated_token)
    }

    // === Allocation-level distribution ===

    fn reclaim_pending(
        &self,
        env: &mut RewardsEnv<'_>,
        allocation: &mut Allocation,
        condition: RewardCondition,
        acc: U256,
    ) -> Result<RewardsOutcome> {
        let amount = self.pending_rewards(allocation, acc)?;
        allocation.acc_rewards_per_allocated_token = acc;
        allocation.acc_rewards_pending = U256::ZERO;
        let to = self.state.reclaim.route(
            &mut *env.minter,
            &mut *env.events,
            condition,
            amount,
            ReclaimContext {
                indexer: allocation.indexer,
                allocation_id: allocation.id,
                subgraph: allocation.subgraph,
            },
        )?;
        Ok(RewardsOutcome::Reclaimed { condition, amount, to })
    }

    fn defer(&self, env: &mut RewardsEnv<'_>, allocation: &Allocation, condition: RewardCondition) -> RewardsOutcome {
        env.events.emit(ProtocolEvent::RewardsDeferred {
            condition,
            indexer: allocation.indexer,
            allocation_id: allocation.id,
            subgraph: allocation.subgraph,
        });
        tracing::debug!(allocation = %allocation.id, %condition, "rewards deferred");
        RewardsOutcome::Deferred { condition }
    }

    fn claim_pending(&self, env: &mut RewardsEnv<'_>, allocation: &mut Allocation, acc: U256) -> Result<RewardsOutcome> {
        let condition = classify_claim(
            self.is_denied(&allocation.subgraph),
            self.eligibility_oracle.as_deref(),
            &allocation.indexer,
        );
        match condition {
            RewardCondition::None => {}
            RewardCondition::SubgraphDenied => return Ok(self.defer(env, allocation, condition)),
            _ => return self.reclaim_pending(env, allocation, condition, acc),
        }

        let amount = self.pending_rewards(allocation, acc)?;
        allocation.acc_rewards_per_allocated_token = acc;
        allocation.acc_rewards_pending = U256::ZERO;
        if !amount.is_zero() {
            env.minter.mint(&self.state.rewards_issuer, amount)?;
            env.events.emit(ProtocolEvent::RewardsClaimed {
                indexer: allocation.indexer,
                allocation_id: allocation.id,
                subgraph: allocation.subgraph,
                amount,
            });
        }
        Ok(RewardsOutcome::Claimed { amount })
    }

    /// Claim an allocation's rewards, subject to the claim-time checks
    pub fn take_rewards(&mut self, env: &mut RewardsEnv<'_>, allocation: &mut Allocation) -> Result<RewardsOutcome> {
        let acc = self.on_subgraph_allocation_update(env, &allocation.subgraph)?;
        self.claim_pending(env, allocation, acc)
    }

    /// Present a proof of indexing. The presentation time is recorded
    /// before any check so the staleness clock always resets.
    pub fn present_poi(
        &mut self,
        env: &mut RewardsEnv<'_>,
        allocation: &mut Allocation,
        poi: Poi,
    ) -> Result<RewardsOutcome> {
        let acc = self.on_subgraph_allocation_update(env, &allocation.subgraph)?;

        let now = env.clock.timestamp();
        let previous = allocation.last_poi_presented_at;
        allocation.last_poi_presented_at = now;
        allocation.poi = Some(poi);

        let condition = classify_poi_presentation(&PoiConditionInputs {
            poi,
            created_at_epoch: allocation.created_at_epoch,
            current_epoch: env.clock.current_epoch(),
            subgraph_denied: self.is_denied(&allocation.subgraph),
            max_poi_staleness: self.state.max_poi_staleness,
            last_poi_presented_at: previous,
            now,
        });
        match condition.disposition() {
            Disposition::Claim => self.claim_pending(env, allocation, acc),
            Disposition::Reclaim => self.reclaim_pending(env, allocation, condition, acc),
            Disposition::Defer => Ok(self.defer(env, allocation, condition)),
        }
    }

    /// Sweep an allocation's uncollected rewards under `condition`
    pub fn reclaim_rewards(
        &mut self,
        env: &mut RewardsEnv<'_>,
        condition: RewardCondition,
        allocation: &mut Allocation,
    ) -> Result<RewardsOutcome> {
        let acc = self.on_subgraph_allocation_update(env, &allocation.subgraph)?;
        self.reclaim_pending(env, allocation, condition, acc)
    }

    /// Advance an allocation's snapshot ahead of a token change. A stale
    /// allocation forfeits the period and its pending rewards as
    /// `STALE_POI`; otherwise the period is added to pending.
    pub fn snapshot_for_resize(&mut self, env: &mut RewardsEnv<'_>, allocation: &mut Allocation) -> Result<RewardsOutcome> {
        let acc = self.on_subgraph_allocation_update(env, &allocation.subgraph)?;
        if is_stale(
            allocation.last_poi_presented_at,
            env.clock.timestamp(),
            self.state.max_poi_staleness,
        ) {
            return self.reclaim_pending(env, allocation, RewardCondition::StalePoi, acc);
        }
        let delta = self.calc_rewards(allocation.tokens, allocation.acc_rewards_per_allocated_token, acc)?;
        allocation.acc_rewards_pending = checked_add(allocation.acc_rewards_pending, delta)?;
        allocation.acc_rewards_per_allocated_token = acc;
        Ok(RewardsOutcome::Accrued { amount: delta })
    }

    // === Governance ===

    /// Add or remove a subgraph from the denylist. The subgraph is brought
    /// up to date under its previous condition first.
    pub fn set_denied(&mut self, env: &mut RewardsEnv<'_>, subgraph: &SubgraphDeploymentId, denied: bool) -> Result<()> {
        self.on_subgraph_allocation_update(env, subgraph)?;
        let changed = if denied {
            self.state.denylist.insert(*subgraph)
        } else {
            self.state.denylist.remove(subgraph)
        };
        if changed {
            env.events.emit(ProtocolEvent::SubgraphDenialChanged {
                subgraph: *subgraph,
                denied,
            });
        }
        Ok(())
    }

    /// Install a new rate after accruing everything owed at the old one
    pub fn set_issuance_rate(&mut self, env: &mut RewardsEnv<'_>, rate: U256) -> Result<()> {
        let base = self.state.issuance.issuance_base;
        self.apply_issuance_update(env, base, rate)
    }

    /// Replace base and rate, accruing at the old parameters first
    pub fn apply_issuance_update(&mut self, env: &mut RewardsEnv<'_>, base: U256, rate: U256) -> Result<()> {
        if rate < FIXED_POINT_SCALING_FACTOR {
            return Err(GraphError::InvalidParameter("issuance rate below 1.0".into()));
        }
        self.update_acc_rewards_per_signal(env)?;

        let issuance = &mut self.state.issuance;
        if issuance.issuance_rate != rate {
            env.events.emit(ProtocolEvent::IssuanceRateChanged {
                old_rate: issuance.issuance_rate,
                new_rate: rate,
            });
            issuance.set_issuance_rate(rate)?;
        }
        if issuance.issuance_base != base {
            env.events.emit(ProtocolEvent::IssuanceBaseChanged {
                old_base: issuance.issuance_base,
                new_base: base,
            });
            issuance.issuance_base = base;
        }
        Ok(())
    }

    /// Switch to (or away from) allocator-driven issuance; V2 layouts only
    pub fn set_issuance_allocator(
        &mut self,
        env: &mut RewardsEnv<'_>,
        allocator: Option<Arc<dyn IssuanceAllocator>>,
    ) -> Result<()> {
        self.state.issuance.require_v2()?;
        self.update_acc_rewards_per_signal(env)?;
        self.issuance_allocator = allocator;
        Ok(())
    }

    /// Restore the allocator after loading a snapshot, without accruing
    pub fn attach_issuance_allocator(&mut self, allocator: Option<Arc<dyn IssuanceAllocator>>) {
        self.issuance_allocator = allocator;
    }

    pub fn set_eligibility_oracle(&mut self, oracle: Option<Arc<dyn EligibilityOracle>>) {
        self.eligibility_oracle = oracle;
    }

    pub fn eligibility_oracle(&self) -> Option<Arc<dyn EligibilityOracle>> {
        self.eligibility_oracle.clone()
    }

    pub fn issuance_allocator(&self) -> Option<Arc<dyn IssuanceAllocator>> {
        self.issuance_allocator.clone()
    }

    /// Change the signal threshold. Every tracked subgraph is settled under
    /// the old threshold first, so a frozen period stays reclaimed and a
    /// claimable one stays credited.
    pub fn set_minimum_subgraph_signal(&mut self, env: &mut RewardsEnv<'_>, minimum: U256) -> Result<()> {
        if self.state.minimum_subgraph_signal == minimum {
            return Ok(());
        }
        self.update_acc_rewards_per_signal(env)?;
        let subgraphs: Vec<_> = self.state.subgraphs.keys().copied().collect();
        for subgraph in &subgraphs {
            self.update_subgraph(env, subgraph)?;
        }
        tracing::debug!(
            old = %self.state.minimum_subgraph_signal,
            new = %minimum,
            subgraphs = subgraphs.len(),
            "minimum subgraph signal changed"
        );
        self.state.minimum_subgraph_signal = minimum;
        Ok(())
    }

    pub fn set_max_poi_staleness(&mut self, seconds: u64) {
        self.state.max_poi_staleness = seconds;
    }

    pub fn set_reclaim_address(&mut self, events: &mut dyn EventSink, condition: RewardCondition, address: Address) {
        self.state.reclaim.set_reclaim_address(condition, address);
        events.emit(ProtocolEvent::ReclaimAddressSet { condition, address });
    }

    pub fn set_default_reclaim_address(&mut self, address: Address) {
        self.state.reclaim.set_default_reclaim_address(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::SubgraphAllocations;
    use crate::curation::SignalLedger;
    use crate::events::EventLog;
    use crate::issuance::FixedAllocator;
    use crate::token::TokenLedger;
    use graph_core::{tokens, AllocationId};

    const ISSUER: Address = Address::new([0x5a; 20]);
    const TARGET: Address = Address::new([0x7e; 20]);
    const RECLAIM: Address = Address::new([0xee; 20]);

    /// Accumulator with its collaborators and a fixed 100 tokens per block
    struct Harness {
        clock: BlockClock,
        signal: SignalLedger,
        allocated: SubgraphAllocations,
        token: TokenLedger,
        events: EventLog,
        rewards: RewardsManager,
    }

    impl Harness {
        fn new() -> Self {
            let issuance = IssuanceState::new(U256::ZERO, FIXED_POINT_SCALING_FACTOR, 0).unwrap();
            let mut rewards = RewardsManager::new(RewardsState::new(issuance, ISSUER, TARGET));
            rewards.attach_issuance_allocator(Some(Arc::new(
                FixedAllocator::new().with_target(TARGET, tokens(100)),
            )));
            rewards.set_default_reclaim_address(RECLAIM);
            Self {
                clock: BlockClock::new(0, 0, 10).unwrap(),
                signal: SignalLedger::new(),
                allocated: SubgraphAllocations::default(),
                token: TokenLedger::new(),
                events: EventLog::new(),
                rewards,
            }
        }

        fn with_env<T>(&mut self, f: impl FnOnce(&mut RewardsManager, &mut RewardsEnv<'_>) -> T) -> T {
            let mut env = RewardsEnv {
                clock: &self.clock,
                signal: &self.signal,
                allocated: &self.allocated,
                minter: &mut self.token,
                events: &mut self.events,
            };
            f(&mut self.rewards, &mut env)
        }

        fn advance(&mut self, blocks: u64) {
            self.clock.advance(blocks, blocks * 12).unwrap();
        }

        fn signal(&mut self, subgraph: &SubgraphDeploymentId, amount: U256) {
            self.with_env(|r, env| r.on_subgraph_signal_update(env, subgraph)).unwrap();
            self.signal.signal(&Address::repeat_byte(0xc), subgraph, amount).unwrap();
        }

        fn allocate(&mut self, subgraph: &SubgraphDeploymentId, amount: U256) -> Allocation {
            let acc = self
                .with_env(|r, env| r.on_subgraph_allocation_update(env, subgraph))
                .unwrap();
            self.allocated.add(subgraph, amount).unwrap();
            let indexer = Address::repeat_byte(0x1);
            Allocation::new(
                AllocationId::derive(&indexer, subgraph, 0),
                indexer,
                *subgraph,
                amount,
                self.clock.current_epoch(),
                acc,
                self.clock.timestamp(),
            )
        }
    }

    fn subgraph() -> SubgraphDeploymentId {
        SubgraphDeploymentId::from_content(b"QmRewards")
    }

    #[test]
    fn test_no_signal_reclaims_issuance() {
        let mut h = Harness::new();
        h.advance(10);

        let acc = h.with_env(|r, env| r.update_acc_rewards_per_signal(env)).unwrap();
        assert_eq!(acc, U256::ZERO);
        assert_eq!(h.token.balance_of(&RECLAIM), tokens(1_000));
        assert!(matches!(
            h.events.events()[0],
            ProtocolEvent::RewardsReclaimed { condition: RewardCondition::NoSignal, .. }
        ));
    }

    #[test]
    fn test_signal_update_idempotent_within_block() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        h.allocate(&sg, tokens(10));
        h.advance(5);

        let first = h.with_env(|r, env| r.on_subgraph_signal_update(env, &sg)).unwrap();
        let state = h.rewards.state.clone();
        let second = h.with_env(|r, env| r.on_subgraph_signal_update(env, &sg)).unwrap();
        assert_eq!(first, second);
        assert_eq!(state, h.rewards.state);
    }

    #[test]
    fn test_claim_after_epoch() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        let mut alloc = h.allocate(&sg, tokens(10));
        h.advance(10);

        let view_pending = h
            .rewards
            .get_rewards(
                RewardsView {
                    clock: &h.clock,
                    signal: &h.signal,
                    allocated: &h.allocated,
                },
                &alloc,
            )
            .unwrap();
        assert_eq!(view_pending, tokens(1_000));

        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();
        assert_eq!(outcome, RewardsOutcome::Claimed { amount: tokens(1_000) });
        assert_eq!(h.token.balance_of(&ISSUER), tokens(1_000));
        assert_eq!(alloc.last_poi_presented_at, h.clock.timestamp());
    }

    #[test]
    fn test_too_young_defers_without_touching_snapshot() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        let mut alloc = h.allocate(&sg, tokens(10));
        h.advance(3);

        let before = (alloc.acc_rewards_per_allocated_token, alloc.acc_rewards_pending);
        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();

        assert_eq!(
            outcome,
            RewardsOutcome::Deferred { condition: RewardCondition::AllocationTooYoung }
        );
        assert_eq!(before, (alloc.acc_rewards_per_allocated_token, alloc.acc_rewards_pending));
        assert_eq!(h.token.total_supply(), U256::ZERO);

        // the preserved position pays out once the epoch turns
        h.advance(7);
        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();
        assert_eq!(outcome.claimed(), tokens(1_000));
    }

    #[test]
    fn test_zero_poi_reclaims() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        let mut alloc = h.allocate(&sg, tokens(10));
        h.advance(10);

        let outcome = h.with_env(|r, env| r.present_poi(env, &mut alloc, Poi::ZERO)).unwrap();
        assert_eq!(
            outcome,
            RewardsOutcome::Reclaimed {
                condition: RewardCondition::ZeroPoi,
                amount: tokens(1_000),
                to: Some(RECLAIM),
            }
        );
        assert_eq!(h.rewards.get_rewards(
            RewardsView { clock: &h.clock, signal: &h.signal, allocated: &h.allocated },
            &alloc,
        ).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_stale_resize_forfeits_pending() {
        let mut h = Harness::new();
        h.rewards.set_max_poi_staleness(100);
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        let mut alloc = h.allocate(&sg, tokens(10));

        // 5 blocks, 60 seconds: fresh
        h.advance(5);
        let outcome = h.with_env(|r, env| r.snapshot_for_resize(env, &mut alloc)).unwrap();
        assert_eq!(outcome, RewardsOutcome::Accrued { amount: tokens(500) });
        assert_eq!(alloc.acc_rewards_pending, tokens(500));

        // 10 more blocks, 180 seconds since the last POI: stale
        h.advance(10);
        let outcome = h.with_env(|r, env| r.snapshot_for_resize(env, &mut alloc)).unwrap();
        assert_eq!(
            outcome,
            RewardsOutcome::Reclaimed {
                condition: RewardCondition::StalePoi,
                amount: tokens(1_500),
                to: Some(RECLAIM),
            }
        );
        assert_eq!(alloc.acc_rewards_pending, U256::ZERO);
    }

    #[test]
    fn test_ineligible_indexer_reclaims() {
        struct Never;
        impl EligibilityOracle for Never {
            fn is_eligible(&self, _indexer: &Address) -> bool {
                false
            }
        }

        let mut h = Harness::new();
        h.rewards.set_eligibility_oracle(Some(Arc::new(Never)));
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        let mut alloc = h.allocate(&sg, tokens(10));
        h.advance(10);

        let outcome = h.with_env(|r, env| r.take_rewards(env, &mut alloc)).unwrap();
        assert_eq!(outcome.condition(), RewardCondition::IndexerIneligible);
        assert_eq!(h.token.balance_of(&RECLAIM), tokens(1_000));
        assert_eq!(h.token.balance_of(&ISSUER), U256::ZERO);
    }

    fn reclaimed_under(events: &EventLog, condition: RewardCondition) -> U256 {
        events
            .events()
            .iter()
            .filter_map(|event| match event {
                ProtocolEvent::RewardsReclaimed { condition: c, amount, .. } if *c == condition => Some(*amount),
                _ => None,
            })
            .fold(U256::ZERO, |acc, amount| acc + amount)
    }

    #[test]
    fn test_lowering_minimum_does_not_revive_frozen_period() {
        let mut h = Harness::new();
        h.rewards.state.minimum_subgraph_signal = tokens(5_000);
        let sg = subgraph();
        h.signal(&sg, tokens(1_000));
        let mut alloc = h.allocate(&sg, tokens(10));
        h.advance(10);

        h.with_env(|r, env| r.set_minimum_subgraph_signal(env, U256::ZERO)).unwrap();
        let frozen = h.rewards.state.subgraphs[&sg].clone();
        assert_eq!(frozen.acc_rewards_for_subgraph, U256::ZERO);
        assert_eq!(frozen.acc_rewards_per_allocated_token, U256::ZERO);
        assert_eq!(reclaimed_under(&h.events, RewardCondition::BelowMinimumSignal), tokens(1_000));

        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();
        assert_eq!(outcome, RewardsOutcome::Claimed { amount: U256::ZERO });
        assert_eq!(h.token.balance_of(&ISSUER), U256::ZERO);

        // claimable from here on
        h.advance(10);
        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();
        assert_eq!(outcome.claimed(), tokens(1_000));
        assert_eq!(h.token.balance_of(&RECLAIM), tokens(1_000));
    }

    #[test]
    fn test_raising_minimum_keeps_credited_period() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(1_000));
        let mut alloc = h.allocate(&sg, tokens(10));
        h.advance(10);

        h.with_env(|r, env| r.set_minimum_subgraph_signal(env, tokens(5_000))).unwrap();
        let credited = h.rewards.state.subgraphs[&sg].clone();
        assert_eq!(credited.acc_rewards_for_subgraph, tokens(1_000));
        assert_eq!(h.token.balance_of(&RECLAIM), U256::ZERO);

        // frozen now: the next 10 blocks are reclaimed, accumulators stay put
        h.advance(10);
        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();
        assert_eq!(outcome, RewardsOutcome::Claimed { amount: tokens(1_000) });
        assert_eq!(
            h.rewards.state.subgraphs[&sg].acc_rewards_for_subgraph,
            credited.acc_rewards_for_subgraph
        );
        assert_eq!(
            h.rewards.state.subgraphs[&sg].acc_rewards_per_allocated_token,
            credited.acc_rewards_per_allocated_token
        );
        assert_eq!(reclaimed_under(&h.events, RewardCondition::BelowMinimumSignal), tokens(1_000));
    }

    #[test]
    fn test_unchanged_minimum_is_noop() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(1_000));
        h.allocate(&sg, tokens(10));
        h.advance(10);

        let state = h.rewards.state.clone();
        h.with_env(|r, env| r.set_minimum_subgraph_signal(env, U256::ZERO)).unwrap();
        assert_eq!(state, h.rewards.state);
    }

    #[test]
    fn test_unallocated_subgraph_freezes() {
        let mut h = Harness::new();
        let sg = subgraph();
        h.signal(&sg, tokens(1_000));
        h.advance(10);

        // signal but nothing allocated: the period is reclaimed, not credited
        let acc = h.with_env(|r, env| r.on_subgraph_signal_update(env, &sg)).unwrap();
        assert_eq!(acc, U256::ZERO);
        assert_eq!(h.rewards.state.subgraphs[&sg].acc_rewards_per_allocated_token, U256::ZERO);
        assert_eq!(reclaimed_under(&h.events, RewardCondition::NoAllocatedTokens), tokens(1_000));

        let mut alloc = h.allocate(&sg, tokens(10));
        assert_eq!(h.rewards.state.subgraphs[&sg].acc_rewards_for_subgraph, U256::ZERO);
        h.advance(10);
        let outcome = h
            .with_env(|r, env| r.present_poi(env, &mut alloc, Poi::from_content(b"poi")))
            .unwrap();
        assert_eq!(outcome.claimed(), tokens(1_000));
        assert_eq!(h.rewards.state.subgraphs[&sg].acc_rewards_for_subgraph, tokens(1_000));
        assert_eq!(h.token.balance_of(&RECLAIM), tokens(1_000));
    }

    #[test]
    fn test_allocator_requires_v2() {
        let mut h = Harness::new();
        h.rewards.state.issuance = IssuanceState::legacy(U256::ZERO, FIXED_POINT_SCALING_FACTOR, 0).unwrap();
        let err = h.with_env(|r, env| r.set_issuance_allocator(env, None)).unwrap_err();
        assert_eq!(err, GraphError::SchemaMismatch { required: 2, found: 1 });
    }

    #[test]
    fn test_rate_change_accrues_at_old_rate() {
        let mut h = Harness::new();
        h.rewards.attach_issuance_allocator(None);
        let sg = subgraph();
        h.signal(&sg, tokens(100));
        // base 1000, zero growth
        h.with_env(|r, env| r.apply_issuance_update(env, tokens(1_000), FIXED_POINT_SCALING_FACTOR))
            .unwrap();
        h.advance(2);

        let rate = FIXED_POINT_SCALING_FACTOR + FIXED_POINT_SCALING_FACTOR / U256::from(10u8);
        h.with_env(|r, env| r.set_issuance_rate(env, rate)).unwrap();
        assert_eq!(h.rewards.state.acc_rewards_per_signal, U256::ZERO);
        assert_eq!(h.rewards.state.issuance.last_rewards_update_block, 2);

        h.advance(1);
        let acc = h.with_env(|r, env| r.update_acc_rewards_per_signal(env)).unwrap();
        // 100 new tokens over 100 signal
        assert_eq!(acc, FIXED_POINT_SCALING_FACTOR);
    }
}

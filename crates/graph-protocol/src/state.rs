//! Protocol state and its operations
//!
//! `ProtocolState` composes every ledger of the economic layer and runs
//! the multi-ledger operations (allocate, present, close, collect, claim,
//! bridge landings) against it. Operations are not atomic on their own:
//! a failure part-way leaves partial changes behind. `Protocol` runs them
//! on a draft copy and only commits on success.
//!
//! Tokens the protocol holds live in two custody accounts:
//!
//! | Account | Holds |
//! |---------|-------|
//! | `STAKING_CUSTODY` | indexer stake, delegation pools, collected query fees, claimed rewards |
//! | `CURATION_CUSTODY` | curator signal and curation fees |

use crate::config::ProtocolConfig;
use graph_bridge::{
    CallhookData, DripMessage, InboundTransfer, InboundTransferTarget, IssuanceTarget, L2Gateway, L2Payload,
    L2Reservoir, OutboundMessage,
};
use graph_core::math::{checked_add, checked_sub, percent_of};
use graph_core::{
    tokens, Address, AllocationId, BlockClock, GraphError, Poi, Ppm, Result, SubgraphDeploymentId, U256,
};
use graph_economics::{
    Allocation, AllocationBook, AllocationState, DelegationBook, DisputeKind, IssuanceState,
    ProtocolEvent, RebateParameters, RebatePools, RewardCondition, RewardsEnv, RewardsManager, RewardsOutcome,
    RewardsState, RewardsView, SignalLedger, SlashRecord, SlashingEngine, StakeManager, TokenLedger, TokenMinter,
};
use serde::{Deserialize, Serialize};

/// Holds staked, delegated and fee tokens; also the rewards issuer
pub const STAKING_CUSTODY: Address = Address::new([0x5a; 20]);

/// Holds curation signal
pub const CURATION_CUSTODY: Address = Address::new([0xc0; 20]);

/// Allocation and fee parameters read at call time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Share of query fees burned, PPM
    pub protocol_percentage: Ppm,
    /// Share of query fees added to curation signal, PPM
    pub curation_percentage: Ppm,
    pub channel_dispute_epochs: u64,
    pub max_allocation_epochs: u64,
    /// Production function for pools created from now on
    pub rebate: RebateParameters,
}

/// Every ledger of an L2 protocol instance
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolState {
    pub clock: BlockClock,
    pub token: TokenLedger,
    pub curation: SignalLedger,
    pub stakes: StakeManager,
    pub delegation: DelegationBook,
    pub allocations: AllocationBook,
    pub rebates: RebatePools,
    pub rewards: RewardsManager,
    pub slashing: SlashingEngine,
    pub params: ProtocolParams,
    /// Receive side of the issuance drip
    pub drip: L2Reservoir,
    pub gateway: L2Gateway,
    pub paused: bool,
    /// Events of the running operation, drained on commit
    #[serde(skip)]
    pub(crate) journal: Vec<ProtocolEvent>,
}

impl ProtocolState {
    pub fn from_config(config: &ProtocolConfig) -> Result<Self> {
        config.validate()?;
        let epochs = &config.epochs;
        let clock = BlockClock::new(epochs.genesis_block, epochs.genesis_timestamp, epochs.epoch_length)?;

        let rewards_config = &config.rewards;
        let base = rewards_config.issuance_base()?;
        let rate = rewards_config.issuance_rate()?;
        let issuance = if rewards_config.legacy_issuance {
            IssuanceState::legacy(base, rate, epochs.genesis_block)?
        } else {
            IssuanceState::new(base, rate, epochs.genesis_block)?
        };
        let mut rewards_state = RewardsState::new(issuance, STAKING_CUSTODY, rewards_config.issuance_target()?);
        rewards_state.minimum_subgraph_signal = tokens(rewards_config.minimum_subgraph_signal);
        rewards_state.max_poi_staleness = rewards_config.max_poi_staleness;
        if let Some(address) = rewards_config.default_reclaim_address()? {
            rewards_state.reclaim.set_default_reclaim_address(address);
        }

        let staking = &config.staking;
        Ok(Self {
            clock,
            token: TokenLedger::new(),
            curation: SignalLedger::new(),
            stakes: StakeManager::new(staking.minimum_indexer_stake(), staking.thawing_period),
            delegation: DelegationBook::new(config.delegation.delegation_ratio, config.delegation.unbonding_period),
            allocations: AllocationBook::new(),
            rebates: RebatePools::new(),
            rewards: RewardsManager::new(rewards_state),
            slashing: SlashingEngine::new(staking.slashing()),
            params: ProtocolParams {
                protocol_percentage: staking.protocol_percentage,
                curation_percentage: staking.curation_percentage,
                channel_dispute_epochs: staking.channel_dispute_epochs,
                max_allocation_epochs: staking.max_allocation_epochs,
                rebate: config.rebates.parameters(),
            },
            drip: L2Reservoir::new(config.bridge.l1_reservoir()?),
            gateway: L2Gateway::new(config.bridge.l1_gateway()?),
            paused: false,
            journal: Vec::new(),
        })
    }

    /// Take the events recorded since the last drain
    pub(crate) fn take_journal(&mut self) -> Vec<ProtocolEvent> {
        std::mem::take(&mut self.journal)
    }

    pub(crate) fn emit(&mut self, event: ProtocolEvent) {
        self.journal.push(event);
    }

    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.paused {
            return Err(GraphError::Paused);
        }
        Ok(())
    }

    /// Split borrow of the accumulator and the collaborators it runs with
    pub(crate) fn rewards_env(&mut self) -> (&mut RewardsManager, RewardsEnv<'_>) {
        (
            &mut self.rewards,
            RewardsEnv {
                clock: &self.clock,
                signal: &self.curation,
                allocated: &self.allocations.subgraph_totals,
                minter: &mut self.token,
                events: &mut self.journal,
            },
        )
    }

    pub fn rewards_view(&self) -> RewardsView<'_> {
        RewardsView {
            clock: &self.clock,
            signal: &self.curation,
            allocated: &self.allocations.subgraph_totals,
        }
    }

    // === Views ===

    pub fn allocation_state(&self, id: &AllocationId) -> AllocationState {
        self.allocations
            .state(id, self.clock.current_epoch(), self.params.channel_dispute_epochs)
    }

    /// Rewards an allocation would claim now, ignoring claim-time conditions
    pub fn pending_rewards(&self, id: &AllocationId) -> Result<U256> {
        let allocation = self.allocations.get(id)?;
        self.rewards.get_rewards(self.rewards_view(), allocation)
    }

    pub fn acc_rewards_per_signal(&self) -> Result<U256> {
        self.rewards.get_acc_rewards_per_signal(self.rewards_view())
    }

    /// Own stake plus usable delegation not yet allocated or locked
    pub fn tokens_available(&self, indexer: &Address) -> Result<U256> {
        let stake = self.stakes.stake_of(indexer);
        let capacity = self.delegation.capacity(indexer, stake.tokens_staked)?;
        Ok(stake.tokens_available_with_delegation(capacity))
    }

    fn is_over_allocated(&self, indexer: &Address) -> Result<bool> {
        let stake = self.stakes.stake_of(indexer);
        let capacity = self.delegation.capacity(indexer, stake.tokens_staked)?;
        Ok(stake.is_over_allocated(capacity))
    }

    fn require_allocation(&self, id: &AllocationId, allowed: &[AllocationState]) -> Result<Allocation> {
        self.allocations
            .require_state(id, self.clock.current_epoch(), self.params.channel_dispute_epochs, allowed)
            .cloned()
    }

    // === Clock ===

    /// Move the chain forward. Not gated by pause: time passes regardless.
    pub fn advance(&mut self, blocks: u64, seconds: u64) -> Result<()> {
        self.clock.advance(blocks, seconds)
    }

    // === Curation ===

    pub fn signal(&mut self, curator: &Address, subgraph: &SubgraphDeploymentId, amount: U256) -> Result<U256> {
        self.ensure_active()?;
        let (rewards, mut env) = self.rewards_env();
        rewards.on_subgraph_signal_update(&mut env, subgraph)?;

        let signal = self.curation.signal(curator, subgraph, amount)?;
        self.token.transfer(curator, &CURATION_CUSTODY, amount)?;
        self.emit(ProtocolEvent::SignalChanged {
            curator: *curator,
            subgraph: *subgraph,
            signal,
        });
        Ok(signal)
    }

    pub fn unsignal(&mut self, curator: &Address, subgraph: &SubgraphDeploymentId, amount: U256) -> Result<U256> {
        self.ensure_active()?;
        let (rewards, mut env) = self.rewards_env();
        rewards.on_subgraph_signal_update(&mut env, subgraph)?;

        let signal = self.curation.unsignal(curator, subgraph, amount)?;
        self.token.transfer(&CURATION_CUSTODY, curator, amount)?;
        self.emit(ProtocolEvent::SignalChanged {
            curator: *curator,
            subgraph: *subgraph,
            signal,
        });
        Ok(signal)
    }

    // === Staking ===

    pub fn stake(&mut self, indexer: &Address, amount: U256) -> Result<()> {
        self.stake_from(indexer, indexer, amount)
    }

    /// Stake `amount` paid by `payer` on behalf of `indexer`
    pub fn stake_from(&mut self, payer: &Address, indexer: &Address, amount: U256) -> Result<()> {
        self.ensure_active()?;
        self.stakes.stake(indexer, amount)?;
        self.token.transfer(payer, &STAKING_CUSTODY, amount)?;
        self.emit(ProtocolEvent::StakeDeposited {
            indexer: *indexer,
            tokens: amount,
        });
        Ok(())
    }

    /// Start thawing stake; tokens that already thawed are paid out first
    pub fn unstake(&mut self, indexer: &Address, amount: U256) -> Result<u64> {
        self.ensure_active()?;
        let outcome = self.stakes.unstake(indexer, amount, self.clock.block_number())?;
        if !outcome.withdrawn.is_zero() {
            self.pay_out_stake(indexer, outcome.withdrawn)?;
        }
        self.emit(ProtocolEvent::StakeLocked {
            indexer: *indexer,
            tokens: amount,
            until: outcome.locked_until,
        });
        Ok(outcome.locked_until)
    }

    pub fn withdraw(&mut self, indexer: &Address) -> Result<U256> {
        self.ensure_active()?;
        let withdrawn = self.stakes.withdraw(indexer, self.clock.block_number())?;
        self.pay_out_stake(indexer, withdrawn)?;
        Ok(withdrawn)
    }

    fn pay_out_stake(&mut self, indexer: &Address, amount: U256) -> Result<()> {
        self.token.transfer(&STAKING_CUSTODY, indexer, amount)?;
        self.emit(ProtocolEvent::StakeWithdrawn {
            indexer: *indexer,
            tokens: amount,
        });
        Ok(())
    }

    // === Delegation ===

    pub fn set_delegation_parameters(
        &mut self,
        indexer: &Address,
        indexing_reward_cut: Ppm,
        query_fee_cut: Ppm,
    ) -> Result<()> {
        self.ensure_active()?;
        self.delegation
            .set_delegation_parameters(indexer, indexing_reward_cut, query_fee_cut)
    }

    pub fn delegate(&mut self, delegator: &Address, indexer: &Address, amount: U256) -> Result<U256> {
        self.delegate_from(delegator, delegator, indexer, amount)
    }

    /// Delegate `amount` paid by `payer`, crediting the shares to `delegator`
    pub fn delegate_from(
        &mut self,
        payer: &Address,
        delegator: &Address,
        indexer: &Address,
        amount: U256,
    ) -> Result<U256> {
        self.ensure_active()?;
        if indexer.is_zero() {
            return Err(GraphError::ZeroAddress("indexer"));
        }
        let shares = self.delegation.delegate(indexer, delegator, amount)?;
        self.token.transfer(payer, &STAKING_CUSTODY, amount)?;
        self.emit(ProtocolEvent::StakeDelegated {
            indexer: *indexer,
            delegator: *delegator,
            tokens: amount,
            shares,
        });
        Ok(shares)
    }

    /// Burn shares into tokens thawing for the unbonding period. Returns
    /// the locked tokens.
    pub fn undelegate(&mut self, delegator: &Address, indexer: &Address, shares: U256) -> Result<U256> {
        self.ensure_active()?;
        let epoch = self.clock.current_epoch();
        let (locked, withdrawn) = self.delegation.undelegate(indexer, delegator, shares, epoch)?;
        if !withdrawn.is_zero() {
            self.pay_out_delegation(indexer, delegator, withdrawn)?;
        }
        let until = self
            .delegation
            .pool(indexer)
            .and_then(|pool| pool.delegation(delegator))
            .map(|d| d.tokens_locked_until)
            .unwrap_or_default();
        self.emit(ProtocolEvent::StakeDelegatedLocked {
            indexer: *indexer,
            delegator: *delegator,
            tokens: locked,
            shares,
            until,
        });
        Ok(locked)
    }

    pub fn withdraw_delegated(&mut self, delegator: &Address, indexer: &Address) -> Result<U256> {
        self.ensure_active()?;
        let epoch = self.clock.current_epoch();
        let withdrawn = self.delegation.withdraw_delegated(indexer, delegator, epoch)?;
        self.pay_out_delegation(indexer, delegator, withdrawn)?;
        Ok(withdrawn)
    }

    fn pay_out_delegation(&mut self, indexer: &Address, delegator: &Address, amount: U256) -> Result<()> {
        self.token.transfer(&STAKING_CUSTODY, delegator, amount)?;
        self.emit(ProtocolEvent::StakeDelegatedWithdrawn {
            indexer: *indexer,
            delegator: *delegator,
            tokens: amount,
        });
        Ok(())
    }

    // === Slashing ===

    /// Slash `amount` of an indexer's stake, paying `reward` of it to
    /// `beneficiary` and burning the rest
    pub fn slash(&mut self, indexer: &Address, amount: U256, reward: U256, beneficiary: &Address) -> Result<SlashRecord> {
        self.ensure_active()?;
        let epoch = self.clock.current_epoch();
        let stake = self.stakes.get_mut(indexer)?;
        let record = self.slashing.slash(indexer, stake, amount, reward, beneficiary, epoch)?;

        if !record.reward.is_zero() {
            self.token.transfer(&STAKING_CUSTODY, beneficiary, record.reward)?;
        }
        let burned = record.burned();
        if !burned.is_zero() {
            self.token.burn(&STAKING_CUSTODY, burned)?;
        }
        self.emit(ProtocolEvent::StakeSlashed {
            indexer: *indexer,
            tokens: record.tokens,
            reward: record.reward,
            beneficiary: *beneficiary,
        });
        Ok(record)
    }

    /// Slash by the configured percentage for a resolved dispute
    pub fn slash_for_dispute(&mut self, indexer: &Address, kind: DisputeKind, beneficiary: &Address) -> Result<SlashRecord> {
        let staked = self.stakes.stake_of(indexer).tokens_staked;
        let (amount, reward) = self.slashing.params.penalty(kind, staked)?;
        tracing::debug!(%indexer, dispute = kind.name(), %amount, "dispute penalty");
        self.slash(indexer, amount, reward, beneficiary)
    }

    // === Allocations ===

    /// Commit `amount` of an indexer's available tokens to a deployment
    pub fn allocate(
        &mut self,
        indexer: &Address,
        subgraph: &SubgraphDeploymentId,
        amount: U256,
        nonce: u64,
    ) -> Result<AllocationId> {
        self.ensure_active()?;
        if amount.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        if !self.stakes.stake_of(indexer).has_stake() {
            return Err(GraphError::IndexerNotStaked);
        }
        let available = self.tokens_available(indexer)?;
        if available < amount {
            return Err(GraphError::InsufficientAvailableTokens {
                requested: amount,
                available,
            });
        }
        let id = AllocationId::derive(indexer, subgraph, nonce);
        if self.allocations.allocations.contains_key(&id) {
            return Err(GraphError::AllocationAlreadyExists(id));
        }

        let (rewards, mut env) = self.rewards_env();
        let acc = rewards.on_subgraph_allocation_update(&mut env, subgraph)?;

        let epoch = self.clock.current_epoch();
        let allocation = Allocation::new(id, *indexer, *subgraph, amount, epoch, acc, self.clock.timestamp());
        self.allocations.insert(allocation)?;
        self.stakes.get_mut(indexer)?.allocate(amount)?;
        self.emit(ProtocolEvent::AllocationCreated {
            indexer: *indexer,
            subgraph: *subgraph,
            allocation_id: id,
            tokens: amount,
            epoch,
        });
        tracing::debug!(allocation = %id, %amount, epoch, "allocation created");
        Ok(id)
    }

    /// Change an active allocation's tokens. Rewards up to now are carried
    /// in pending, or reclaimed if the allocation is stale.
    pub fn resize_allocation(&mut self, id: &AllocationId, new_tokens: U256) -> Result<RewardsOutcome> {
        self.ensure_active()?;
        if new_tokens.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let mut allocation = self.require_allocation(id, &[AllocationState::Active])?;
        let old_tokens = allocation.tokens;
        if new_tokens > old_tokens {
            let available = self.tokens_available(&allocation.indexer)?;
            let requested = new_tokens - old_tokens;
            if available < requested {
                return Err(GraphError::InsufficientAvailableTokens { requested, available });
            }
        }

        let (rewards, mut env) = self.rewards_env();
        let outcome = rewards.snapshot_for_resize(&mut env, &mut allocation)?;

        let stake = self.stakes.get_mut(&allocation.indexer)?;
        if new_tokens > old_tokens {
            let delta = new_tokens - old_tokens;
            self.allocations.subgraph_totals.add(&allocation.subgraph, delta)?;
            stake.allocate(delta)?;
        } else {
            let delta = old_tokens - new_tokens;
            self.allocations.subgraph_totals.sub(&allocation.subgraph, delta)?;
            stake.unallocate(delta)?;
        }
        allocation.tokens = new_tokens;
        self.allocations.allocations.insert(*id, allocation);
        self.emit(ProtocolEvent::AllocationResized {
            allocation_id: *id,
            old_tokens,
            new_tokens,
        });
        Ok(outcome)
    }

    /// Present a POI for an active allocation. On any non-deferred outcome
    /// an over-allocated indexer's allocation is force-closed.
    pub fn present_poi(&mut self, id: &AllocationId, poi: Poi) -> Result<RewardsOutcome> {
        self.ensure_active()?;
        let outcome = self.present(id, poi)?;
        if !outcome.is_deferred() {
            let indexer = self.allocations.get(id)?.indexer;
            if self.is_over_allocated(&indexer)? {
                tracing::info!(allocation = %id, %indexer, "force-closing over-allocated allocation");
                self.close(id, true)?;
            }
        }
        Ok(outcome)
    }

    fn present(&mut self, id: &AllocationId, poi: Poi) -> Result<RewardsOutcome> {
        let mut allocation = self.require_allocation(id, &[AllocationState::Active])?;
        let (rewards, mut env) = self.rewards_env();
        let outcome = rewards.present_poi(&mut env, &mut allocation, poi)?;
        self.distribute_rewards(&allocation, outcome.claimed())?;
        self.allocations.allocations.insert(*id, allocation);
        Ok(outcome)
    }

    /// Split claimed rewards: the indexer's cut is restaked, the rest goes
    /// to the delegation pool. Both stay in staking custody.
    fn distribute_rewards(&mut self, allocation: &Allocation, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let indexer = allocation.indexer;
        let (indexer_rewards, delegation_rewards) = match self.delegation.pool(&indexer) {
            Some(pool) => pool.split_indexing_rewards(amount)?,
            None => (amount, U256::ZERO),
        };
        if !delegation_rewards.is_zero() {
            self.delegation.pool_mut(&indexer).add_rewards(delegation_rewards)?;
        }
        if !indexer_rewards.is_zero() {
            self.stakes.get_mut(&indexer)?.deposit(indexer_rewards)?;
        }
        self.emit(ProtocolEvent::RewardsDistributed {
            indexer,
            allocation_id: allocation.id,
            indexer_rewards,
            delegation_rewards,
        });
        Ok(())
    }

    /// Close an active allocation, presenting `poi` first when given
    pub fn close_allocation(&mut self, id: &AllocationId, poi: Option<Poi>) -> Result<()> {
        self.ensure_active()?;
        self.require_allocation(id, &[AllocationState::Active])?;
        if let Some(poi) = poi {
            self.present(id, poi)?;
        }
        self.close(id, false)
    }

    fn close(&mut self, id: &AllocationId, forced: bool) -> Result<()> {
        let mut allocation = self.require_allocation(id, &[AllocationState::Active])?;
        let (rewards, mut env) = self.rewards_env();
        rewards.reclaim_rewards(&mut env, RewardCondition::CloseAllocation, &mut allocation)?;

        let epoch = self.clock.current_epoch();
        let effective_allocation = allocation.close(epoch, self.params.max_allocation_epochs)?;
        self.allocations
            .subgraph_totals
            .sub(&allocation.subgraph, allocation.tokens)?;
        self.stakes.get_mut(&allocation.indexer)?.unallocate(allocation.tokens)?;
        self.rebates
            .add_to_pool(epoch, self.params.rebate, allocation.collected_fees, effective_allocation)?;

        self.emit(ProtocolEvent::AllocationClosed {
            indexer: allocation.indexer,
            allocation_id: *id,
            epoch,
            effective_allocation,
            forced,
        });
        tracing::debug!(allocation = %id, epoch, %effective_allocation, forced, "allocation closed");
        self.allocations.allocations.insert(*id, allocation);
        Ok(())
    }

    /// Collect query fees paid by `payer` into an active or closed
    /// allocation
    pub fn collect(&mut self, payer: &Address, id: &AllocationId, fees: U256) -> Result<()> {
        self.ensure_active()?;
        if fees.is_zero() {
            return Err(GraphError::ZeroAmount);
        }
        let allocation = self.require_allocation(id, &[AllocationState::Active, AllocationState::Closed])?;
        self.token.transfer(payer, &STAKING_CUSTODY, fees)?;

        let protocol_tax = percent_of(self.params.protocol_percentage, fees)?;
        if !protocol_tax.is_zero() {
            self.token.burn(&STAKING_CUSTODY, protocol_tax)?;
        }

        let mut curation_fees = U256::ZERO;
        if self.curation.is_curated(&allocation.subgraph) {
            curation_fees = percent_of(self.params.curation_percentage, fees)?;
            if !curation_fees.is_zero() {
                let (rewards, mut env) = self.rewards_env();
                rewards.on_subgraph_signal_update(&mut env, &allocation.subgraph)?;
                self.token.transfer(&STAKING_CUSTODY, &CURATION_CUSTODY, curation_fees)?;
                self.curation.collect(&allocation.subgraph, curation_fees)?;
            }
        }

        let rebate_fees = checked_sub(checked_sub(fees, protocol_tax)?, curation_fees)?;
        let stored = self.allocations.get_mut(id)?;
        stored.collected_fees = checked_add(stored.collected_fees, rebate_fees)?;
        if let Some(epoch) = allocation.closed_at_epoch {
            self.rebates.add_fees(epoch, rebate_fees)?;
        }

        self.emit(ProtocolEvent::AllocationCollected {
            allocation_id: *id,
            fees,
            protocol_tax,
            curation_fees,
        });
        Ok(())
    }

    /// Claim a finalized allocation's rebate. The indexer's share is
    /// restaked or paid out; the delegators' query-fee share joins the pool.
    pub fn claim(&mut self, id: &AllocationId, restake: bool) -> Result<U256> {
        self.ensure_active()?;
        let mut allocation = self.require_allocation(id, &[AllocationState::Finalized])?;
        let epoch = allocation.closed_at_epoch.ok_or(GraphError::InvalidAllocationState {
            id: *id,
            expected: AllocationState::Finalized.name(),
            actual: AllocationState::Active.name(),
        })?;
        let redemption = self
            .rebates
            .redeem(epoch, allocation.collected_fees, allocation.effective_allocation)?;

        let indexer = allocation.indexer;
        let (indexer_fees, delegation_fees) = match self.delegation.pool(&indexer) {
            Some(pool) => pool.split_query_fees(redemption.tokens)?,
            None => (redemption.tokens, U256::ZERO),
        };
        if !delegation_fees.is_zero() {
            self.delegation.pool_mut(&indexer).add_rewards(delegation_fees)?;
        }
        if !indexer_fees.is_zero() {
            if restake {
                self.stakes.get_mut(&indexer)?.deposit(indexer_fees)?;
            } else {
                self.token.transfer(&STAKING_CUSTODY, &indexer, indexer_fees)?;
            }
        }
        if !redemption.residual.is_zero() {
            self.token.burn(&STAKING_CUSTODY, redemption.residual)?;
        }

        allocation.distributed_rebates = redemption.tokens;
        allocation.claimed = true;
        self.allocations.allocations.insert(*id, allocation);
        self.emit(ProtocolEvent::RebateClaimed {
            indexer,
            allocation_id: *id,
            epoch,
            tokens: redemption.tokens,
            delegation_fees,
        });
        Ok(redemption.tokens)
    }

    // === Bridge landings ===

    /// Apply a drip delivered by the messenger
    pub fn receive_drip(&mut self, sender: &Address, message: &DripMessage) -> Result<()> {
        self.ensure_active()?;
        let mut reservoir = self.drip.clone();
        let mut received = Vec::new();
        reservoir.receive_drip(sender, message, &mut Landing(self), &mut received)?;
        self.drip = reservoir;
        self.journal.extend(received);
        Ok(())
    }

    /// Credit a bridged transfer and run its callhook
    pub fn finalize_inbound_transfer(&mut self, sender: &Address, transfer: &InboundTransfer) -> Result<()> {
        self.ensure_active()?;
        let gateway = self.gateway.clone();
        let mut finalized = Vec::new();
        gateway.finalize_inbound_transfer(sender, transfer, &mut Landing(self), &mut finalized)?;
        self.journal.extend(finalized);
        Ok(())
    }

    /// Route a messenger delivery to its landing
    pub fn deliver(&mut self, message: &OutboundMessage) -> Result<()> {
        match &message.payload {
            L2Payload::Drip(drip) => self.receive_drip(&message.sender, drip),
            L2Payload::Transfer(transfer) => self.finalize_inbound_transfer(&message.sender, transfer),
        }
    }
}

/// Where bridge messages land in the L2 state
struct Landing<'a>(&'a mut ProtocolState);

impl IssuanceTarget for Landing<'_> {
    fn apply_issuance(&mut self, issuance_base: U256, issuance_rate: U256) -> Result<()> {
        let (rewards, mut env) = self.0.rewards_env();
        rewards.apply_issuance_update(&mut env, issuance_base, issuance_rate)
    }

    fn pay_keeper(&mut self, keeper: &Address, amount: U256) -> Result<()> {
        self.0.token.mint(keeper, amount)
    }
}

impl InboundTransferTarget for Landing<'_> {
    /// Bridged tokens are minted on L2; the L1 side escrows them
    fn credit(&mut self, to: &Address, amount: U256) -> Result<()> {
        self.0.token.mint(to, amount)
    }

    fn callhook(&mut self, transfer: &InboundTransfer, data: &CallhookData) -> Result<()> {
        match data {
            CallhookData::Stake { indexer } => self.0.stake_from(&transfer.to, indexer, transfer.amount),
            CallhookData::Delegate { indexer, delegator } => self
                .0
                .delegate_from(&transfer.to, delegator, indexer, transfer.amount)
                .map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_core::FIXED_POINT_SCALING_FACTOR;
    use graph_economics::SignalView;

    const INDEXER: Address = Address::new([0x1d; 20]);
    const CURATOR: Address = Address::new([0xcc; 20]);
    const DELEGATOR: Address = Address::new([0xde; 20]);

    fn state() -> ProtocolState {
        let mut config = ProtocolConfig::default();
        config.epochs.epoch_length = 10;
        config.staking.minimum_indexer_stake = 100;
        config.staking.thawing_period = 20;
        config.staking.channel_dispute_epochs = 1;
        config.staking.protocol_percentage = 0;
        config.staking.curation_percentage = 0;
        let mut state = ProtocolState::from_config(&config).unwrap();
        for account in [INDEXER, CURATOR, DELEGATOR] {
            state.token.mint(&account, tokens(10_000)).unwrap();
        }
        state
    }

    fn subgraph() -> SubgraphDeploymentId {
        SubgraphDeploymentId::from_content(b"subgraph")
    }

    #[test]
    fn test_stake_moves_tokens_to_custody() {
        let mut state = state();
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        assert_eq!(state.token.balance_of(&STAKING_CUSTODY), tokens(1_000));
        assert_eq!(state.token.balance_of(&INDEXER), tokens(9_000));

        assert!(matches!(
            state.stake(&DELEGATOR, tokens(10)),
            Err(GraphError::BelowMinimumStake { .. })
        ));
    }

    #[test]
    fn test_unstake_then_withdraw() {
        let mut state = state();
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        let until = state.unstake(&INDEXER, tokens(400)).unwrap();
        assert_eq!(until, 20);
        assert_eq!(state.withdraw(&INDEXER), Err(GraphError::NothingToWithdraw));

        state.advance(20, 240).unwrap();
        assert_eq!(state.withdraw(&INDEXER).unwrap(), tokens(400));
        assert_eq!(state.token.balance_of(&INDEXER), tokens(9_400));
    }

    #[test]
    fn test_allocate_respects_availability() {
        let mut state = state();
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        let err = state.allocate(&INDEXER, &subgraph(), tokens(1_001), 0).unwrap_err();
        assert!(matches!(err, GraphError::InsufficientAvailableTokens { .. }));

        state.delegate(&DELEGATOR, &INDEXER, tokens(500)).unwrap();
        let id = state.allocate(&INDEXER, &subgraph(), tokens(1_500), 0).unwrap();
        assert_eq!(state.allocation_state(&id), AllocationState::Active);
        assert_eq!(
            state.allocate(&INDEXER, &subgraph(), tokens(1), 0),
            Err(GraphError::AllocationAlreadyExists(id))
        );
    }

    #[test]
    fn test_allocation_lifecycle_with_fees() {
        let mut state = state();
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        let id = state.allocate(&INDEXER, &subgraph(), tokens(1_000), 0).unwrap();
        state.collect(&CURATOR, &id, tokens(100)).unwrap();

        state.advance(10, 120).unwrap();
        state.close_allocation(&id, None).unwrap();
        assert_eq!(state.allocation_state(&id), AllocationState::Closed);
        assert!(state.stakes.stake_of(&INDEXER).tokens_allocated.is_zero());

        // late fees still count towards the closing epoch's pool
        state.collect(&CURATOR, &id, tokens(50)).unwrap();
        assert_eq!(state.rebates.get(2).unwrap().fees, tokens(150));
        assert!(matches!(state.claim(&id, false), Err(GraphError::InvalidAllocationState { .. })));

        state.advance(10, 120).unwrap();
        let rebate = state.claim(&id, false).unwrap();
        assert!(rebate <= tokens(150));
        assert_eq!(state.allocation_state(&id), AllocationState::Claimed);
        assert_eq!(state.token.balance_of(&INDEXER), tokens(9_000) + rebate);
        assert!(state.token.balance_of(&STAKING_CUSTODY) >= tokens(1_000));
    }

    #[test]
    fn test_collect_burns_tax_and_funds_curation() {
        let mut state = state();
        state.params.protocol_percentage = 10_000;
        state.params.curation_percentage = 100_000;
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        state.signal(&CURATOR, &subgraph(), tokens(100)).unwrap();
        let id = state.allocate(&INDEXER, &subgraph(), tokens(500), 0).unwrap();

        let supply = state.token.total_supply();
        state.collect(&CURATOR, &id, tokens(1_000)).unwrap();
        assert_eq!(state.token.total_supply(), supply - tokens(10));
        assert_eq!(state.curation.subgraph_signal(&subgraph()), tokens(200));
        assert_eq!(state.allocations.get(&id).unwrap().collected_fees, tokens(890));
    }

    #[test]
    fn test_undelegate_and_withdraw() {
        let mut state = state();
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        let shares = state.delegate(&DELEGATOR, &INDEXER, tokens(300)).unwrap();
        let locked = state.undelegate(&DELEGATOR, &INDEXER, shares).unwrap();
        assert_eq!(locked, tokens(300));
        assert_eq!(state.withdraw_delegated(&DELEGATOR, &INDEXER), Err(GraphError::NothingToWithdraw));

        let unbonding = state.delegation.unbonding_period;
        state.advance(unbonding * 10, 0).unwrap();
        assert_eq!(state.withdraw_delegated(&DELEGATOR, &INDEXER).unwrap(), tokens(300));
        assert_eq!(state.token.balance_of(&DELEGATOR), tokens(10_000));
    }

    #[test]
    fn test_slash_pays_beneficiary_and_burns_rest() {
        let mut state = state();
        state.stake(&INDEXER, tokens(1_000)).unwrap();
        let supply = state.token.total_supply();
        let record = state.slash(&INDEXER, tokens(100), tokens(40), &CURATOR).unwrap();
        assert_eq!(record.burned(), tokens(60));
        assert_eq!(state.token.balance_of(&CURATOR), tokens(10_040));
        assert_eq!(state.token.total_supply(), supply - tokens(60));
        assert_eq!(state.stakes.stake_of(&INDEXER).tokens_staked, tokens(900));

        let record = state.slash_for_dispute(&INDEXER, DisputeKind::Query, &CURATOR).unwrap();
        assert_eq!(record.tokens, percent_of(25_000, tokens(900)).unwrap());
    }

    #[test]
    fn test_pause_blocks_operations() {
        let mut state = state();
        state.paused = true;
        assert_eq!(state.stake(&INDEXER, tokens(1_000)), Err(GraphError::Paused));
        state.advance(1, 12).unwrap();
    }

    #[test]
    fn test_inbound_transfer_stakes_on_arrival() {
        let mut state = state();
        let l1_gateway = state.gateway.l1_counterpart;
        let transfer = InboundTransfer {
            from: INDEXER,
            to: DELEGATOR,
            amount: tokens(500),
            data: Some(CallhookData::Stake { indexer: DELEGATOR }),
        };
        state.finalize_inbound_transfer(&l1_gateway, &transfer).unwrap();
        assert_eq!(state.stakes.stake_of(&DELEGATOR).tokens_staked, tokens(500));
        assert_eq!(state.token.balance_of(&DELEGATOR), tokens(10_000));

        let names: Vec<_> = state.take_journal().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["stake_deposited", "inbound_transfer_finalized"]);
    }

    #[test]
    fn test_drip_installs_issuance() {
        let mut state = state();
        let l1 = state.drip.l1_counterpart;
        let message = DripMessage {
            issuance_base: tokens(1_000_000),
            issuance_rate: FIXED_POINT_SCALING_FACTOR + U256::from(1_000u64),
            nonce: 0,
            keeper_reward: tokens(1),
            keeper: CURATOR,
        };
        state.receive_drip(&l1, &message).unwrap();
        assert_eq!(state.rewards.state.issuance.issuance_base, tokens(1_000_000));
        assert_eq!(state.token.balance_of(&CURATOR), tokens(10_001));
        assert_eq!(state.drip.next_nonce(), 1);

        assert!(matches!(
            state.receive_drip(&l1, &message),
            Err(GraphError::InvalidNonce { expected: 1, received: 0 })
        ));
    }
}

//! Transactional protocol handle
//!
//! Every operation runs on a draft copy of the state under one lock and is
//! committed only if it succeeds, events included. A collaborator that
//! calls back into the protocol from inside an operation (an eligibility
//! oracle, a callhook) gets `ReentrantCall` instead of a deadlock; other
//! threads wait for the lock.

use crate::config::ProtocolConfig;
use crate::governance::GovernanceAction;
use crate::persistence;
use crate::state::ProtocolState;
use graph_bridge::{DripMessage, InboundTransfer, OutboundMessage};
use graph_core::{
    Address, AllocationId, BlockNumber, Epoch, Poi, Ppm, ReentrancyGuard, Result, SubgraphDeploymentId, U256,
};
use graph_economics::{
    Allocation, AllocationState, DisputeKind, EligibilityOracle, EventLog, EventSink, IndexerStake,
    IssuanceAllocator, ProtocolEvent, RewardsOutcome, SlashRecord,
};
use graph_storage::SnapshotStore;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::sync::Arc;

struct Inner {
    state: ProtocolState,
    events: EventLog,
}

/// One L2 instance of the economic layer
pub struct Protocol {
    inner: ReentrantMutex<RefCell<Inner>>,
    guard: ReentrancyGuard,
}

impl Protocol {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        Ok(Self::from_state(ProtocolState::from_config(config)?))
    }

    pub fn from_state(state: ProtocolState) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                state,
                events: EventLog::new(),
            })),
            guard: ReentrancyGuard::new(),
        }
    }

    /// Run `f` on a draft and commit it with its events if it succeeds
    fn transact<T>(&self, operation: &'static str, f: impl FnOnce(&mut ProtocolState) -> Result<T>) -> Result<T> {
        let lock = self.inner.lock();
        let _entered = self.guard.enter().map_err(|e| {
            tracing::warn!(operation, "reentrant call rejected");
            e
        })?;

        let mut draft = lock.borrow().state.clone();
        match f(&mut draft) {
            Ok(value) => {
                let events = draft.take_journal();
                let mut inner = lock.borrow_mut();
                inner.state = draft;
                for event in events {
                    tracing::info!(operation, event = event.name(), "protocol event");
                    inner.events.emit(event);
                }
                Ok(value)
            }
            Err(e) => {
                tracing::warn!(operation, error = %e, code = e.code(), "operation reverted");
                Err(e)
            }
        }
    }

    /// Read committed state. Allowed from inside an operation; sees the
    /// state as of before it.
    pub fn read<T>(&self, f: impl FnOnce(&ProtocolState) -> T) -> T {
        let lock = self.inner.lock();
        let inner = lock.borrow();
        f(&inner.state)
    }

    // === Views ===

    /// Copy of the committed state
    pub fn state(&self) -> ProtocolState {
        self.read(|s| s.clone())
    }

    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events_since(0)
    }

    /// Events committed at or after `offset`
    pub fn events_since(&self, offset: usize) -> Vec<ProtocolEvent> {
        let lock = self.inner.lock();
        let inner = lock.borrow();
        inner.events.since(offset).to_vec()
    }

    pub fn event_count(&self) -> usize {
        let lock = self.inner.lock();
        let count = lock.borrow().events.len();
        count
    }

    pub fn block_number(&self) -> BlockNumber {
        self.read(|s| s.clock.block_number())
    }

    pub fn current_epoch(&self) -> Epoch {
        self.read(|s| s.clock.current_epoch())
    }

    pub fn is_paused(&self) -> bool {
        self.read(|s| s.paused)
    }

    pub fn balance_of(&self, account: &Address) -> U256 {
        self.read(|s| s.token.balance_of(account))
    }

    pub fn total_supply(&self) -> U256 {
        self.read(|s| s.token.total_supply())
    }

    pub fn stake_of(&self, indexer: &Address) -> IndexerStake {
        self.read(|s| s.stakes.stake_of(indexer))
    }

    pub fn allocation(&self, id: &AllocationId) -> Result<Allocation> {
        self.read(|s| s.allocations.get(id).cloned())
    }

    pub fn allocation_state(&self, id: &AllocationId) -> AllocationState {
        self.read(|s| s.allocation_state(id))
    }

    pub fn pending_rewards(&self, id: &AllocationId) -> Result<U256> {
        self.read(|s| s.pending_rewards(id))
    }

    pub fn acc_rewards_per_signal(&self) -> Result<U256> {
        self.read(|s| s.acc_rewards_per_signal())
    }

    // === Operations ===

    pub fn advance(&self, blocks: u64, seconds: u64) -> Result<()> {
        self.transact("advance", |s| s.advance(blocks, seconds))
    }

    /// Test and bootstrap helper: mint tokens to `to`
    pub fn mint(&self, to: &Address, amount: U256) -> Result<()> {
        use graph_economics::TokenMinter;
        self.transact("mint", |s| {
            s.ensure_active()?;
            s.token.mint(to, amount)
        })
    }

    pub fn transfer(&self, from: &Address, to: &Address, amount: U256) -> Result<()> {
        self.transact("transfer", |s| {
            s.ensure_active()?;
            s.token.transfer(from, to, amount)
        })
    }

    pub fn signal(&self, curator: &Address, subgraph: &SubgraphDeploymentId, amount: U256) -> Result<U256> {
        self.transact("signal", |s| s.signal(curator, subgraph, amount))
    }

    pub fn unsignal(&self, curator: &Address, subgraph: &SubgraphDeploymentId, amount: U256) -> Result<U256> {
        self.transact("unsignal", |s| s.unsignal(curator, subgraph, amount))
    }

    pub fn stake(&self, indexer: &Address, amount: U256) -> Result<()> {
        self.transact("stake", |s| s.stake(indexer, amount))
    }

    /// Returns the block the locked tokens thaw at
    pub fn unstake(&self, indexer: &Address, amount: U256) -> Result<BlockNumber> {
        self.transact("unstake", |s| s.unstake(indexer, amount))
    }

    pub fn withdraw(&self, indexer: &Address) -> Result<U256> {
        self.transact("withdraw", |s| s.withdraw(indexer))
    }

    pub fn set_delegation_parameters(&self, indexer: &Address, indexing_reward_cut: Ppm, query_fee_cut: Ppm) -> Result<()> {
        self.transact("set_delegation_parameters", |s| {
            s.set_delegation_parameters(indexer, indexing_reward_cut, query_fee_cut)
        })
    }

    pub fn delegate(&self, delegator: &Address, indexer: &Address, amount: U256) -> Result<U256> {
        self.transact("delegate", |s| s.delegate(delegator, indexer, amount))
    }

    pub fn undelegate(&self, delegator: &Address, indexer: &Address, shares: U256) -> Result<U256> {
        self.transact("undelegate", |s| s.undelegate(delegator, indexer, shares))
    }

    pub fn withdraw_delegated(&self, delegator: &Address, indexer: &Address) -> Result<U256> {
        self.transact("withdraw_delegated", |s| s.withdraw_delegated(delegator, indexer))
    }

    pub fn slash(&self, indexer: &Address, amount: U256, reward: U256, beneficiary: &Address) -> Result<SlashRecord> {
        self.transact("slash", |s| s.slash(indexer, amount, reward, beneficiary))
    }

    pub fn slash_for_dispute(&self, indexer: &Address, kind: DisputeKind, beneficiary: &Address) -> Result<SlashRecord> {
        self.transact("slash_for_dispute", |s| s.slash_for_dispute(indexer, kind, beneficiary))
    }

    pub fn allocate(
        &self,
        indexer: &Address,
        subgraph: &SubgraphDeploymentId,
        amount: U256,
        nonce: u64,
    ) -> Result<AllocationId> {
        self.transact("allocate", |s| s.allocate(indexer, subgraph, amount, nonce))
    }

    pub fn resize_allocation(&self, id: &AllocationId, new_tokens: U256) -> Result<RewardsOutcome> {
        self.transact("resize_allocation", |s| s.resize_allocation(id, new_tokens))
    }

    pub fn present_poi(&self, id: &AllocationId, poi: Poi) -> Result<RewardsOutcome> {
        self.transact("present_poi", |s| s.present_poi(id, poi))
    }

    pub fn close_allocation(&self, id: &AllocationId, poi: Option<Poi>) -> Result<()> {
        self.transact("close_allocation", |s| s.close_allocation(id, poi))
    }

    pub fn collect(&self, payer: &Address, id: &AllocationId, fees: U256) -> Result<()> {
        self.transact("collect", |s| s.collect(payer, id, fees))
    }

    pub fn claim(&self, id: &AllocationId, restake: bool) -> Result<U256> {
        self.transact("claim", |s| s.claim(id, restake))
    }

    pub fn receive_drip(&self, sender: &Address, message: &DripMessage) -> Result<()> {
        self.transact("receive_drip", |s| s.receive_drip(sender, message))
    }

    pub fn finalize_inbound_transfer(&self, sender: &Address, transfer: &InboundTransfer) -> Result<()> {
        self.transact("finalize_inbound_transfer", |s| s.finalize_inbound_transfer(sender, transfer))
    }

    /// Messenger delivery callback
    pub fn deliver(&self, message: &OutboundMessage) -> Result<()> {
        self.transact("deliver", |s| s.deliver(message))
    }

    // === Governance ===

    pub fn govern(&self, action: GovernanceAction) -> Result<()> {
        self.transact(action.name(), |s| s.govern(action))
    }

    /// `None` treats every indexer as eligible
    pub fn set_eligibility_oracle(&self, oracle: Option<Arc<dyn EligibilityOracle>>) -> Result<()> {
        self.transact("set_eligibility_oracle", |s| {
            s.rewards.set_eligibility_oracle(oracle);
            Ok(())
        })
    }

    /// Switch issuance to (or back from) an allocator. Accrues under the
    /// current source first; requires the V2 issuance layout.
    pub fn set_issuance_allocator(&self, allocator: Option<Arc<dyn IssuanceAllocator>>) -> Result<()> {
        self.transact("set_issuance_allocator", |s| {
            let (rewards, mut env) = s.rewards_env();
            rewards.set_issuance_allocator(&mut env, allocator)
        })
    }

    // === Snapshots ===

    pub fn snapshot(&self) -> Result<Vec<u8>> {
        self.read(persistence::encode)
    }

    /// Replace the state with a snapshot, keeping the installed
    /// collaborators and the event log
    pub fn restore(&self, bytes: &[u8]) -> Result<()> {
        let mut restored = persistence::decode(bytes)?;
        self.transact("restore", move |state| {
            restored.rewards.set_eligibility_oracle(state.rewards.eligibility_oracle());
            restored.rewards.attach_issuance_allocator(state.rewards.issuance_allocator());
            *state = restored;
            Ok(())
        })
    }

    pub fn save_snapshot(&self, store: &dyn SnapshotStore, name: &str) -> Result<()> {
        store.save(name, &self.snapshot()?)
    }

    /// Restore the named snapshot; `false` if the store has none
    pub fn load_snapshot(&self, store: &dyn SnapshotStore, name: &str) -> Result<bool> {
        match store.load(name)? {
            Some(bytes) => {
                self.restore(&bytes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_core::{tokens, GraphError};

    const INDEXER: Address = Address::new([0x1d; 20]);

    fn protocol() -> Protocol {
        let mut config = ProtocolConfig::default();
        config.staking.minimum_indexer_stake = 100;
        let protocol = Protocol::new(&config).unwrap();
        protocol.mint(&INDEXER, tokens(1_000)).unwrap();
        protocol
    }

    #[test]
    fn test_failed_operation_leaves_no_trace() {
        let protocol = protocol();
        let events = protocol.event_count();
        let before = protocol.balance_of(&INDEXER);

        // below the minimum: nothing is moved and nothing is recorded
        let err = protocol.stake(&INDEXER, tokens(10)).unwrap_err();
        assert!(matches!(err, GraphError::BelowMinimumStake { .. }));
        assert_eq!(protocol.balance_of(&INDEXER), before);
        assert_eq!(protocol.event_count(), events);

        protocol.stake(&INDEXER, tokens(500)).unwrap();
        assert_eq!(protocol.events_since(events).len(), 1);
    }

    #[test]
    fn test_pause_gates_operations_not_governance() {
        let protocol = protocol();
        protocol.govern(GovernanceAction::SetPaused { paused: true }).unwrap();
        assert_eq!(protocol.stake(&INDEXER, tokens(500)), Err(GraphError::Paused));
        protocol.govern(GovernanceAction::SetThawingPeriod { blocks: 5 }).unwrap();
        protocol.advance(1, 12).unwrap();

        protocol.govern(GovernanceAction::SetPaused { paused: false }).unwrap();
        protocol.stake(&INDEXER, tokens(500)).unwrap();
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let protocol = Arc::new(protocol());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let protocol = Arc::clone(&protocol);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        protocol.advance(1, 12).unwrap();
                        protocol.block_number();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(protocol.block_number(), 40);
    }
}

//! Structured audit records
//!
//! Every claim, reclaim, defer and rate/nonce change produces a
//! [`ProtocolEvent`] carrying enough context for off-chain reconciliation.

use crate::conditions::RewardCondition;
use graph_core::{Address, AllocationId, Epoch, SubgraphDeploymentId, U256};
use serde::{Deserialize, Serialize};

/// Audit record emitted by a state transition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    /// Rewards minted to the rewards issuer on behalf of an indexer
    RewardsClaimed {
        indexer: Address,
        allocation_id: AllocationId,
        subgraph: SubgraphDeploymentId,
        amount: U256,
    },
    /// Rewards minted to a reclaim address
    RewardsReclaimed {
        condition: RewardCondition,
        amount: U256,
        indexer: Address,
        allocation_id: AllocationId,
        subgraph: SubgraphDeploymentId,
        reclaim_address: Address,
    },
    /// Rewards withheld, claim position preserved
    RewardsDeferred {
        condition: RewardCondition,
        indexer: Address,
        allocation_id: AllocationId,
        subgraph: SubgraphDeploymentId,
    },
    /// Claimed rewards split between indexer and delegators
    RewardsDistributed {
        indexer: Address,
        allocation_id: AllocationId,
        indexer_rewards: U256,
        delegation_rewards: U256,
    },
    IssuanceRateChanged {
        old_rate: U256,
        new_rate: U256,
    },
    IssuanceBaseChanged {
        old_base: U256,
        new_base: U256,
    },
    DripReceived {
        nonce: u64,
        issuance_base: U256,
        issuance_rate: U256,
    },
    DripSent {
        nonce: u64,
        ticket_id: u64,
        issuance_base: U256,
        issuance_rate: U256,
    },
    SubgraphDenialChanged {
        subgraph: SubgraphDeploymentId,
        denied: bool,
    },
    ReclaimAddressSet {
        condition: RewardCondition,
        address: Address,
    },
    StakeDeposited {
        indexer: Address,
        tokens: U256,
    },
    StakeLocked {
        indexer: Address,
        tokens: U256,
        until: u64,
    },
    StakeWithdrawn {
        indexer: Address,
        tokens: U256,
    },
    StakeSlashed {
        indexer: Address,
        tokens: U256,
        reward: U256,
        beneficiary: Address,
    },
    StakeDelegated {
        indexer: Address,
        delegator: Address,
        tokens: U256,
        shares: U256,
    },
    StakeDelegatedLocked {
        indexer: Address,
        delegator: Address,
        tokens: U256,
        shares: U256,
        until: Epoch,
    },
    StakeDelegatedWithdrawn {
        indexer: Address,
        delegator: Address,
        tokens: U256,
    },
    AllocationCreated {
        indexer: Address,
        subgraph: SubgraphDeploymentId,
        allocation_id: AllocationId,
        tokens: U256,
        epoch: Epoch,
    },
    AllocationResized {
        allocation_id: AllocationId,
        old_tokens: U256,
        new_tokens: U256,
    },
    AllocationCollected {
        allocation_id: AllocationId,
        fees: U256,
        protocol_tax: U256,
        curation_fees: U256,
    },
    AllocationClosed {
        indexer: Address,
        allocation_id: AllocationId,
        epoch: Epoch,
        effective_allocation: U256,
        forced: bool,
    },
    RebateClaimed {
        indexer: Address,
        allocation_id: AllocationId,
        epoch: Epoch,
        tokens: U256,
        delegation_fees: U256,
    },
    SignalChanged {
        curator: Address,
        subgraph: SubgraphDeploymentId,
        signal: U256,
    },
    InboundTransferFinalized {
        from: Address,
        to: Address,
        amount: U256,
    },
}

impl ProtocolEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::RewardsClaimed { .. } => "rewards_claimed",
            Self::RewardsReclaimed { .. } => "rewards_reclaimed",
            Self::RewardsDeferred { .. } => "rewards_deferred",
            Self::RewardsDistributed { .. } => "rewards_distributed",
            Self::IssuanceRateChanged { .. } => "issuance_rate_changed",
            Self::IssuanceBaseChanged { .. } => "issuance_base_changed",
            Self::DripReceived { .. } => "drip_received",
            Self::DripSent { .. } => "drip_sent",
            Self::SubgraphDenialChanged { .. } => "subgraph_denial_changed",
            Self::ReclaimAddressSet { .. } => "reclaim_address_set",
            Self::StakeDeposited { .. } => "stake_deposited",
            Self::StakeLocked { .. } => "stake_locked",
            Self::StakeWithdrawn { .. } => "stake_withdrawn",
            Self::StakeSlashed { .. } => "stake_slashed",
            Self::StakeDelegated { .. } => "stake_delegated",
            Self::StakeDelegatedLocked { .. } => "stake_delegated_locked",
            Self::StakeDelegatedWithdrawn { .. } => "stake_delegated_withdrawn",
            Self::AllocationCreated { .. } => "allocation_created",
            Self::AllocationResized { .. } => "allocation_resized",
            Self::AllocationCollected { .. } => "allocation_collected",
            Self::AllocationClosed { .. } => "allocation_closed",
            Self::RebateClaimed { .. } => "rebate_claimed",
            Self::SignalChanged { .. } => "signal_changed",
            Self::InboundTransferFinalized { .. } => "inbound_transfer_finalized",
        }
    }
}

/// Destination for audit records
pub trait EventSink {
    fn emit(&mut self, event: ProtocolEvent);
}

/// Append-only in-memory event log
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<ProtocolEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    /// Events appended at or after `offset`
    pub fn since(&self, offset: usize) -> &[ProtocolEvent] {
        self.events.get(offset..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }
}

impl EventSink for Vec<ProtocolEvent> {
    fn emit(&mut self, event: ProtocolEvent) {
        self.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_log_since() {
        let mut log = EventLog::new();
        log.emit(ProtocolEvent::IssuanceRateChanged {
            old_rate: U256::from(1u8),
            new_rate: U256::from(2u8),
        });
        log.emit(ProtocolEvent::DripReceived {
            nonce: 0,
            issuance_base: U256::ZERO,
            issuance_rate: U256::from(2u8),
        });

        assert_eq!(log.len(), 2);
        assert_eq!(log.since(1).len(), 1);
        assert_eq!(log.since(1)[0].name(), "drip_received");
        assert!(log.since(5).is_empty());
    }

    #[test]
    fn test_event_serializes_tagged() {
        let event = ProtocolEvent::RewardsDeferred {
            condition: RewardCondition::AllocationTooYoung,
            indexer: Address::ZERO,
            allocation_id: AllocationId::ZERO,
            subgraph: SubgraphDeploymentId::ZERO,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "rewards_deferred");
        assert_eq!(json["condition"], "ALLOCATION_TOO_YOUNG");
    }
}

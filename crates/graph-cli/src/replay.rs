//! Operation scripts
//!
//! A script is a JSON array of operations applied in order to a fresh
//! protocol. Amounts are whole tokens. Subgraphs and POIs are named by
//! content and hashed into their identifiers; an allocation is referred to
//! by the `(indexer, subgraph, nonce)` it was created with.
//!
//! ```json
//! [
//!   { "op": "mint", "to": "0x1d1d...", "amount": 200000 },
//!   { "op": "stake", "indexer": "0x1d1d...", "amount": 100000 },
//!   { "op": "advance", "blocks": 6646 }
//! ]
//! ```

use anyhow::{Context, Result};
use graph_bridge::{InMemoryMessenger, InboundTransfer, L1Gateway, L1Reservoir};
use graph_core::{tokens, Address, AllocationId, Poi, SubgraphDeploymentId};
use graph_economics::{DisputeKind, EventLog, ProtocolEvent};
use graph_protocol::{GovernanceAction, Protocol, ProtocolConfig};
use serde::Deserialize;
use std::path::Path;

/// Seconds per block when an `advance` does not say
const DEFAULT_BLOCK_TIME: u64 = 12;

/// An allocation by its creation parameters
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AllocationRef {
    pub indexer: Address,
    pub subgraph: String,
    #[serde(default)]
    pub nonce: u64,
}

impl AllocationRef {
    pub fn id(&self) -> AllocationId {
        AllocationId::derive(&self.indexer, &subgraph(&self.subgraph), self.nonce)
    }
}

/// One step of a script
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Mint {
        to: Address,
        amount: u64,
    },
    Advance {
        blocks: u64,
        seconds: Option<u64>,
    },
    Signal {
        curator: Address,
        subgraph: String,
        amount: u64,
    },
    Unsignal {
        curator: Address,
        subgraph: String,
        amount: u64,
    },
    Stake {
        indexer: Address,
        amount: u64,
    },
    Unstake {
        indexer: Address,
        amount: u64,
    },
    Withdraw {
        indexer: Address,
    },
    SetDelegationParameters {
        indexer: Address,
        indexing_reward_cut: u32,
        query_fee_cut: u32,
    },
    Delegate {
        delegator: Address,
        indexer: Address,
        amount: u64,
    },
    Undelegate {
        delegator: Address,
        indexer: Address,
        shares: u64,
    },
    WithdrawDelegated {
        delegator: Address,
        indexer: Address,
    },
    Allocate {
        indexer: Address,
        subgraph: String,
        amount: u64,
        #[serde(default)]
        nonce: u64,
    },
    ResizeAllocation {
        allocation: AllocationRef,
        amount: u64,
    },
    /// A missing POI presents the zero POI
    PresentPoi {
        allocation: AllocationRef,
        poi: Option<String>,
    },
    CloseAllocation {
        allocation: AllocationRef,
        poi: Option<String>,
    },
    Collect {
        payer: Address,
        allocation: AllocationRef,
        fees: u64,
    },
    Claim {
        allocation: AllocationRef,
        #[serde(default)]
        restake: bool,
    },
    Slash {
        indexer: Address,
        dispute: DisputeKind,
        beneficiary: Address,
    },
    Govern {
        action: GovernanceAction,
    },
    /// Drip from the L1 reservoir, delivered through the messenger
    Drip {
        keeper: Address,
        l1_total_supply: u64,
    },
    /// Tokens bridged through the gateway
    Bridge {
        transfer: InboundTransfer,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mint { .. } => "mint",
            Self::Advance { .. } => "advance",
            Self::Signal { .. } => "signal",
            Self::Unsignal { .. } => "unsignal",
            Self::Stake { .. } => "stake",
            Self::Unstake { .. } => "unstake",
            Self::Withdraw { .. } => "withdraw",
            Self::SetDelegationParameters { .. } => "set_delegation_parameters",
            Self::Delegate { .. } => "delegate",
            Self::Undelegate { .. } => "undelegate",
            Self::WithdrawDelegated { .. } => "withdraw_delegated",
            Self::Allocate { .. } => "allocate",
            Self::ResizeAllocation { .. } => "resize_allocation",
            Self::PresentPoi { .. } => "present_poi",
            Self::CloseAllocation { .. } => "close_allocation",
            Self::Collect { .. } => "collect",
            Self::Claim { .. } => "claim",
            Self::Slash { .. } => "slash",
            Self::Govern { .. } => "govern",
            Self::Drip { .. } => "drip",
            Self::Bridge { .. } => "bridge",
        }
    }
}

fn subgraph(name: &str) -> SubgraphDeploymentId {
    SubgraphDeploymentId::from_content(name.as_bytes())
}

fn poi(content: &str) -> Poi {
    Poi::from_content(content.as_bytes())
}

pub fn load_script(path: &Path) -> Result<Vec<Operation>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_script(&content)
}

pub fn parse_script(content: &str) -> Result<Vec<Operation>> {
    serde_json::from_str(content).context("parsing operation script")
}

/// A protocol together with the L1 side it receives from
pub struct Replay {
    protocol: Protocol,
    reservoir: L1Reservoir,
    gateway: L1Gateway,
    messenger: InMemoryMessenger,
    l1_events: EventLog,
}

impl Replay {
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        let bridge = &config.bridge;
        let mut reservoir = L1Reservoir::new(
            bridge.l1_reservoir()?,
            config.rewards.issuance_rate()?,
            bridge.l2_rewards_fraction()?,
            bridge.min_drip_interval,
        )?;
        reservoir.drip_reward_per_block = bridge.drip_reward_per_block()?;

        Ok(Self {
            protocol: Protocol::new(config)?,
            reservoir,
            gateway: L1Gateway::new(bridge.l1_gateway()?),
            messenger: InMemoryMessenger::new(),
            l1_events: EventLog::new(),
        })
    }

    pub fn protocol(&self) -> &Protocol {
        &self.protocol
    }

    /// Apply every operation, stopping at the first failure
    pub async fn run(&mut self, operations: &[Operation]) -> Result<()> {
        for (index, operation) in operations.iter().enumerate() {
            self.apply(operation)
                .await
                .with_context(|| format!("operation {index} ({})", operation.name()))?;
        }
        Ok(())
    }

    pub async fn apply(&mut self, operation: &Operation) -> Result<()> {
        let protocol = &self.protocol;
        tracing::debug!(op = operation.name(), block = protocol.block_number(), "applying");
        match operation {
            Operation::Mint { to, amount } => protocol.mint(to, tokens(*amount))?,
            Operation::Advance { blocks, seconds } => {
                protocol.advance(*blocks, seconds.unwrap_or(blocks * DEFAULT_BLOCK_TIME))?
            }
            Operation::Signal {
                curator,
                subgraph: name,
                amount,
            } => {
                protocol.signal(curator, &subgraph(name), tokens(*amount))?;
            }
            Operation::Unsignal {
                curator,
                subgraph: name,
                amount,
            } => {
                protocol.unsignal(curator, &subgraph(name), tokens(*amount))?;
            }
            Operation::Stake { indexer, amount } => protocol.stake(indexer, tokens(*amount))?,
            Operation::Unstake { indexer, amount } => {
                protocol.unstake(indexer, tokens(*amount))?;
            }
            Operation::Withdraw { indexer } => {
                protocol.withdraw(indexer)?;
            }
            Operation::SetDelegationParameters {
                indexer,
                indexing_reward_cut,
                query_fee_cut,
            } => protocol.set_delegation_parameters(indexer, *indexing_reward_cut, *query_fee_cut)?,
            Operation::Delegate {
                delegator,
                indexer,
                amount,
            } => {
                protocol.delegate(delegator, indexer, tokens(*amount))?;
            }
            Operation::Undelegate {
                delegator,
                indexer,
                shares,
            } => {
                protocol.undelegate(delegator, indexer, tokens(*shares))?;
            }
            Operation::WithdrawDelegated { delegator, indexer } => {
                protocol.withdraw_delegated(delegator, indexer)?;
            }
            Operation::Allocate {
                indexer,
                subgraph: name,
                amount,
                nonce,
            } => {
                let id = protocol.allocate(indexer, &subgraph(name), tokens(*amount), *nonce)?;
                tracing::info!(allocation = %id, subgraph = %name, "allocated");
            }
            Operation::ResizeAllocation { allocation, amount } => {
                protocol.resize_allocation(&allocation.id(), tokens(*amount))?;
            }
            Operation::PresentPoi { allocation, poi: content } => {
                let presented = content.as_deref().map_or(Poi::ZERO, poi);
                let outcome = protocol.present_poi(&allocation.id(), presented)?;
                tracing::info!(allocation = %allocation.id(), condition = %outcome.condition(), "poi presented");
            }
            Operation::CloseAllocation { allocation, poi: content } => {
                protocol.close_allocation(&allocation.id(), content.as_deref().map(poi))?;
            }
            Operation::Collect {
                payer,
                allocation,
                fees,
            } => protocol.collect(payer, &allocation.id(), tokens(*fees))?,
            Operation::Claim { allocation, restake } => {
                protocol.claim(&allocation.id(), *restake)?;
            }
            Operation::Slash {
                indexer,
                dispute,
                beneficiary,
            } => {
                protocol.slash_for_dispute(indexer, *dispute, beneficiary)?;
            }
            Operation::Govern { action } => protocol.govern(action.clone())?,
            Operation::Drip { keeper, l1_total_supply } => {
                let receipt = self
                    .reservoir
                    .drip(
                        protocol.block_number(),
                        tokens(*l1_total_supply),
                        *keeper,
                        &self.messenger,
                        &mut self.l1_events,
                    )
                    .await?;
                self.messenger
                    .redeem(receipt.ticket_id, |message| protocol.deliver(message))?;
            }
            Operation::Bridge { transfer } => {
                let ticket = self
                    .gateway
                    .outbound_transfer(&self.messenger, transfer.clone())
                    .await?;
                self.messenger.redeem(ticket, |message| protocol.deliver(message))?;
            }
        }
        Ok(())
    }

    /// L2 audit events followed by the L1 send records
    pub fn events(&self) -> Vec<ProtocolEvent> {
        let mut events = self.protocol.events();
        events.extend(self.l1_events.events().iter().cloned());
        events
    }
}

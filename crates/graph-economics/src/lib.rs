//! # Graph Economics
//!
//! The reward and rebate accounting core of the protocol.
//!
//! ## Flow
//!
//! ```text
//!  issuance ──► RewardsManager ──► classify ──► claim   ──► rewards issuer
//!                  ▲    ▲                   ├─► reclaim ──► ReclaimRouter
//!                  │    │                   └─► defer
//!        SignalLedger  AllocationBook
//!                           │
//!                           ▼
//!   StakeManager ◄──── close ────► RebatePools ──► redeem ──► DelegationBook
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | `conditions` | Pure reward-condition classifier |
//! | `rewards` | Global, subgraph and allocation accumulators |
//! | `reclaim` | Condition → reclaim address routing |
//! | `issuance` | Compounding-rate and allocator issuance sources |
//! | `rebates` | Per-epoch query-fee rebate pools |
//! | `staking` | Indexer stake and thawing locks |
//! | `delegation` | Delegation pools and reward cuts |
//! | `slashing` | Dispute penalties |
//! | `allocation` | Allocation records and lifecycle |
//! | `curation` | Signal ledger |
//! | `token` | Balances and the mint collaborator |
//! | `events` | Audit records |

pub mod allocation;
pub mod conditions;
pub mod curation;
pub mod delegation;
pub mod events;
pub mod issuance;
pub mod rebates;
pub mod reclaim;
pub mod rewards;
pub mod slashing;
pub mod staking;
pub mod token;

// Re-exports
pub use allocation::{AllocatedTokensView, Allocation, AllocationBook, AllocationState, SubgraphAllocations};
pub use conditions::{Disposition, EligibilityOracle, RewardCondition};
pub use curation::{SignalLedger, SignalView};
pub use delegation::{Delegation, DelegationBook, DelegationPool};
pub use events::{EventLog, EventSink, ProtocolEvent};
pub use issuance::{FixedAllocator, IssuanceAllocator, IssuanceState, SchemaVersion};
pub use rebates::{RebateParameters, RebatePool, RebatePools, Redemption};
pub use reclaim::{ReclaimContext, ReclaimRouter};
pub use rewards::{RewardsEnv, RewardsManager, RewardsOutcome, RewardsState, RewardsView, SubgraphRewards};
pub use slashing::{DisputeKind, SlashRecord, SlashingEngine, SlashingParameters};
pub use staking::{IndexerStake, StakeManager, UnstakeOutcome};
pub use token::{TokenLedger, TokenMinter};

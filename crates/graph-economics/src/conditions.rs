//! # Reward Conditions
//!
//! Pure classification of every reward-distribution attempt. The classifier
//! commits no state; callers map the returned condition to a disposition.
//!
//! ## Precedence
//!
//! | Layer | Order |
//! |-------|-------|
//! | Subgraph | NO_SIGNAL → SUBGRAPH_DENIED → BELOW_MINIMUM_SIGNAL → NO_ALLOCATED_TOKENS |
//! | POI presentation | STALE_POI → ZERO_POI → ALLOCATION_TOO_YOUNG → SUBGRAPH_DENIED |
//! | Claim | SUBGRAPH_DENIED → INDEXER_INELIGIBLE |
//!
//! `CLOSE_ALLOCATION` is never detected, only assigned by the close path.

use graph_core::{Address, Epoch, Poi, Timestamp, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome class of a reward-distribution attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RewardCondition {
    /// Rewards are claimable
    None,
    /// No signal anywhere in the protocol
    NoSignal,
    /// Subgraph is on the denylist
    SubgraphDenied,
    /// Subgraph signal below the minimum threshold
    BelowMinimumSignal,
    /// Subgraph has signal but nothing allocated to it
    NoAllocatedTokens,
    /// Eligibility oracle rejected the indexer
    IndexerIneligible,
    /// Too long since the allocation last presented a POI
    StalePoi,
    /// Presented POI is zero
    ZeroPoi,
    /// Allocation created in the current epoch
    AllocationTooYoung,
    /// Allocation is being closed
    CloseAllocation,
}

/// What happens to the tokens behind a condition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Minted to the rewards issuer for the indexer
    Claim,
    /// Minted to the reclaim address (or dropped if none)
    Reclaim,
    /// Withheld with the allocation's claim position preserved
    Defer,
}

impl RewardCondition {
    pub const ALL: [RewardCondition; 10] = [
        Self::None,
        Self::NoSignal,
        Self::SubgraphDenied,
        Self::BelowMinimumSignal,
        Self::NoAllocatedTokens,
        Self::IndexerIneligible,
        Self::StalePoi,
        Self::ZeroPoi,
        Self::AllocationTooYoung,
        Self::CloseAllocation,
    ];

    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Disposition of an allocation-level condition at POI presentation
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::None => Disposition::Claim,
            Self::AllocationTooYoung | Self::SubgraphDenied => Disposition::Defer,
            _ => Disposition::Reclaim,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::NoSignal => "NO_SIGNAL",
            Self::SubgraphDenied => "SUBGRAPH_DENIED",
            Self::BelowMinimumSignal => "BELOW_MINIMUM_SIGNAL",
            Self::NoAllocatedTokens => "NO_ALLOCATED_TOKENS",
            Self::IndexerIneligible => "INDEXER_INELIGIBLE",
            Self::StalePoi => "STALE_POI",
            Self::ZeroPoi => "ZERO_POI",
            Self::AllocationTooYoung => "ALLOCATION_TOO_YOUNG",
            Self::CloseAllocation => "CLOSE_ALLOCATION",
        }
    }
}

impl fmt::Display for RewardCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Eligibility oracle collaborator
pub trait EligibilityOracle: Send + Sync {
    fn is_eligible(&self, indexer: &Address) -> bool;
}

/// Inputs to the subgraph-level check
#[derive(Clone, Debug)]
pub struct SubgraphConditionInputs {
    pub total_signal: U256,
    pub subgraph_signal: U256,
    pub denied: bool,
    pub allocated_tokens: U256,
    pub minimum_signal: U256,
}

/// Inputs to the POI-presentation check
#[derive(Clone, Debug)]
pub struct PoiConditionInputs {
    pub poi: Poi,
    pub created_at_epoch: Epoch,
    pub current_epoch: Epoch,
    pub subgraph_denied: bool,
    pub max_poi_staleness: u64,
    pub last_poi_presented_at: Timestamp,
    pub now: Timestamp,
}

/// Subgraph-level condition gating accumulator growth
pub fn classify_subgraph(inputs: &SubgraphConditionInputs) -> RewardCondition {
    if inputs.total_signal.is_zero() {
        RewardCondition::NoSignal
    } else if inputs.denied {
        RewardCondition::SubgraphDenied
    } else if inputs.subgraph_signal < inputs.minimum_signal {
        RewardCondition::BelowMinimumSignal
    } else if !inputs.subgraph_signal.is_zero() && inputs.allocated_tokens.is_zero() {
        RewardCondition::NoAllocatedTokens
    } else {
        RewardCondition::None
    }
}

/// Whether an allocation has gone longer than `max_poi_staleness` without a POI
pub fn is_stale(last_poi_presented_at: Timestamp, now: Timestamp, max_poi_staleness: u64) -> bool {
    now.saturating_sub(last_poi_presented_at) > max_poi_staleness
}

/// Allocation-level condition at POI presentation
pub fn classify_poi_presentation(inputs: &PoiConditionInputs) -> RewardCondition {
    if is_stale(inputs.last_poi_presented_at, inputs.now, inputs.max_poi_staleness) {
        RewardCondition::StalePoi
    } else if inputs.poi.is_zero() {
        RewardCondition::ZeroPoi
    } else if inputs.current_epoch <= inputs.created_at_epoch {
        RewardCondition::AllocationTooYoung
    } else if inputs.subgraph_denied {
        RewardCondition::SubgraphDenied
    } else {
        RewardCondition::None
    }
}

/// Indexer-level condition at final claim time. The oracle is not consulted
/// for a denied subgraph; no oracle means always eligible.
pub fn classify_claim(
    subgraph_denied: bool,
    oracle: Option<&dyn EligibilityOracle>,
    indexer: &Address,
) -> RewardCondition {
    if subgraph_denied {
        return RewardCondition::SubgraphDenied;
    }
    match oracle {
        Some(oracle) if !oracle.is_eligible(indexer) => RewardCondition::IndexerIneligible,
        _ => RewardCondition::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn subgraph_inputs() -> SubgraphConditionInputs {
        SubgraphConditionInputs {
            total_signal: U256::from(1_000u64),
            subgraph_signal: U256::from(100u64),
            denied: false,
            allocated_tokens: U256::from(50u64),
            minimum_signal: U256::from(10u64),
        }
    }

    fn poi_inputs() -> PoiConditionInputs {
        PoiConditionInputs {
            poi: Poi::from_content(b"poi"),
            created_at_epoch: 10,
            current_epoch: 12,
            subgraph_denied: false,
            max_poi_staleness: 100,
            last_poi_presented_at: 1_000,
            now: 1_050,
        }
    }

    #[test]
    fn test_subgraph_precedence() {
        assert_eq!(classify_subgraph(&subgraph_inputs()), RewardCondition::None);

        let mut inputs = subgraph_inputs();
        inputs.allocated_tokens = U256::ZERO;
        assert_eq!(classify_subgraph(&inputs), RewardCondition::NoAllocatedTokens);

        inputs.subgraph_signal = U256::from(5u64);
        assert_eq!(classify_subgraph(&inputs), RewardCondition::BelowMinimumSignal);

        inputs.denied = true;
        assert_eq!(classify_subgraph(&inputs), RewardCondition::SubgraphDenied);

        inputs.total_signal = U256::ZERO;
        assert_eq!(classify_subgraph(&inputs), RewardCondition::NoSignal);
    }

    #[test]
    fn test_poi_precedence() {
        assert_eq!(classify_poi_presentation(&poi_inputs()), RewardCondition::None);

        let mut inputs = poi_inputs();
        inputs.subgraph_denied = true;
        assert_eq!(classify_poi_presentation(&inputs), RewardCondition::SubgraphDenied);

        inputs.current_epoch = 10;
        assert_eq!(classify_poi_presentation(&inputs), RewardCondition::AllocationTooYoung);

        inputs.poi = Poi::ZERO;
        assert_eq!(classify_poi_presentation(&inputs), RewardCondition::ZeroPoi);

        inputs.now = 1_101;
        assert_eq!(classify_poi_presentation(&inputs), RewardCondition::StalePoi);
    }

    #[test]
    fn test_staleness_boundary() {
        assert!(!is_stale(1_000, 1_100, 100));
        assert!(is_stale(1_000, 1_101, 100));
    }

    struct CountingOracle {
        eligible: bool,
        calls: AtomicU32,
    }

    impl EligibilityOracle for CountingOracle {
        fn is_eligible(&self, _indexer: &Address) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.eligible
        }
    }

    #[test]
    fn test_claim_denied_takes_precedence() {
        let oracle = CountingOracle { eligible: false, calls: AtomicU32::new(0) };
        let indexer = Address::repeat_byte(1);

        assert_eq!(
            classify_claim(true, Some(&oracle), &indexer),
            RewardCondition::SubgraphDenied
        );
        assert_eq!(oracle.calls.load(Ordering::Relaxed), 0);

        assert_eq!(
            classify_claim(false, Some(&oracle), &indexer),
            RewardCondition::IndexerIneligible
        );
        assert_eq!(classify_claim(false, None, &indexer), RewardCondition::None);
    }

    #[test]
    fn test_dispositions() {
        assert_eq!(RewardCondition::None.disposition(), Disposition::Claim);
        assert_eq!(RewardCondition::StalePoi.disposition(), Disposition::Reclaim);
        assert_eq!(RewardCondition::ZeroPoi.disposition(), Disposition::Reclaim);
        assert_eq!(RewardCondition::CloseAllocation.disposition(), Disposition::Reclaim);
        assert_eq!(RewardCondition::AllocationTooYoung.disposition(), Disposition::Defer);
        assert_eq!(RewardCondition::SubgraphDenied.disposition(), Disposition::Defer);
    }

    #[test]
    fn test_condition_names_serialize() {
        let json = serde_json::to_string(&RewardCondition::StalePoi).unwrap();
        assert_eq!(json, "\"STALE_POI\"");
        assert_eq!(RewardCondition::StalePoi.to_string(), "STALE_POI");
    }
}

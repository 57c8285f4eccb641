//! Governance setters
//!
//! Configuration is read at call time, so a setter takes effect on the
//! next operation. Setters that move the reward accumulators bring them up
//! to date under the old value first. Governance is not gated by pause.
//!
//! Collaborators (eligibility oracle, issuance allocator) are not
//! serializable and are installed through `Protocol` directly.

use crate::state::ProtocolState;
use graph_core::math::is_valid_ppm;
use graph_core::{Address, GraphError, Ppm, Result, SubgraphDeploymentId, MAX_PPM, U256};
use graph_economics::{RebateParameters, RewardCondition, SlashingParameters};
use serde::{Deserialize, Serialize};

/// A governance change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GovernanceAction {
    SetPaused { paused: bool },
    SetSubgraphDenied { subgraph: SubgraphDeploymentId, denied: bool },
    SetIssuanceRate { rate: U256 },
    SetMinimumSubgraphSignal { minimum: U256 },
    SetMaxPoiStaleness { seconds: u64 },
    SetReclaimAddress { condition: RewardCondition, address: Address },
    SetDefaultReclaimAddress { address: Address },
    /// Applies to rebate pools created after the change
    SetRebateParameters { params: RebateParameters },
    SetProtocolPercentage { ppm: Ppm },
    SetCurationPercentage { ppm: Ppm },
    SetChannelDisputeEpochs { epochs: u64 },
    SetMaxAllocationEpochs { epochs: u64 },
    SetThawingPeriod { blocks: u64 },
    SetMinimumIndexerStake { tokens: U256 },
    SetDelegationRatio { ratio: u32 },
    SetDelegationUnbondingPeriod { epochs: u64 },
    SetSlashingParameters { params: SlashingParameters },
    SetEpochLength { blocks: u64 },
    /// Skip a drip that will never arrive
    SetNextDripNonce { nonce: u64 },
    MigrateIssuanceToV2,
}

impl GovernanceAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetPaused { .. } => "set_paused",
            Self::SetSubgraphDenied { .. } => "set_subgraph_denied",
            Self::SetIssuanceRate { .. } => "set_issuance_rate",
            Self::SetMinimumSubgraphSignal { .. } => "set_minimum_subgraph_signal",
            Self::SetMaxPoiStaleness { .. } => "set_max_poi_staleness",
            Self::SetReclaimAddress { .. } => "set_reclaim_address",
            Self::SetDefaultReclaimAddress { .. } => "set_default_reclaim_address",
            Self::SetRebateParameters { .. } => "set_rebate_parameters",
            Self::SetProtocolPercentage { .. } => "set_protocol_percentage",
            Self::SetCurationPercentage { .. } => "set_curation_percentage",
            Self::SetChannelDisputeEpochs { .. } => "set_channel_dispute_epochs",
            Self::SetMaxAllocationEpochs { .. } => "set_max_allocation_epochs",
            Self::SetThawingPeriod { .. } => "set_thawing_period",
            Self::SetMinimumIndexerStake { .. } => "set_minimum_indexer_stake",
            Self::SetDelegationRatio { .. } => "set_delegation_ratio",
            Self::SetDelegationUnbondingPeriod { .. } => "set_delegation_unbonding_period",
            Self::SetSlashingParameters { .. } => "set_slashing_parameters",
            Self::SetEpochLength { .. } => "set_epoch_length",
            Self::SetNextDripNonce { .. } => "set_next_drip_nonce",
            Self::MigrateIssuanceToV2 => "migrate_issuance_to_v2",
        }
    }
}

impl ProtocolState {
    pub fn govern(&mut self, action: GovernanceAction) -> Result<()> {
        tracing::debug!(action = action.name(), "governance");
        match action {
            GovernanceAction::SetPaused { paused } => self.paused = paused,
            GovernanceAction::SetSubgraphDenied { subgraph, denied } => {
                let (rewards, mut env) = self.rewards_env();
                rewards.set_denied(&mut env, &subgraph, denied)?;
            }
            GovernanceAction::SetIssuanceRate { rate } => {
                let (rewards, mut env) = self.rewards_env();
                rewards.set_issuance_rate(&mut env, rate)?;
            }
            GovernanceAction::SetMinimumSubgraphSignal { minimum } => {
                let (rewards, mut env) = self.rewards_env();
                rewards.set_minimum_subgraph_signal(&mut env, minimum)?;
            }
            GovernanceAction::SetMaxPoiStaleness { seconds } => {
                self.rewards.set_max_poi_staleness(seconds);
            }
            GovernanceAction::SetReclaimAddress { condition, address } => {
                self.rewards.set_reclaim_address(&mut self.journal, condition, address);
            }
            GovernanceAction::SetDefaultReclaimAddress { address } => {
                self.rewards.set_default_reclaim_address(address);
            }
            GovernanceAction::SetRebateParameters { params } => {
                params.validate()?;
                self.params.rebate = params;
            }
            GovernanceAction::SetProtocolPercentage { ppm } => {
                check_fee_percentages(ppm, self.params.curation_percentage)?;
                self.params.protocol_percentage = ppm;
            }
            GovernanceAction::SetCurationPercentage { ppm } => {
                check_fee_percentages(self.params.protocol_percentage, ppm)?;
                self.params.curation_percentage = ppm;
            }
            GovernanceAction::SetChannelDisputeEpochs { epochs } => {
                if epochs == 0 {
                    return Err(GraphError::InvalidParameter("channel dispute epochs must be positive".into()));
                }
                self.params.channel_dispute_epochs = epochs;
            }
            GovernanceAction::SetMaxAllocationEpochs { epochs } => self.params.max_allocation_epochs = epochs,
            GovernanceAction::SetThawingPeriod { blocks } => self.stakes.thawing_period = blocks,
            GovernanceAction::SetMinimumIndexerStake { tokens } => self.stakes.minimum_indexer_stake = tokens,
            GovernanceAction::SetDelegationRatio { ratio } => self.delegation.delegation_ratio = ratio,
            GovernanceAction::SetDelegationUnbondingPeriod { epochs } => self.delegation.unbonding_period = epochs,
            GovernanceAction::SetSlashingParameters { params } => {
                params.validate()?;
                self.slashing.params = params;
            }
            GovernanceAction::SetEpochLength { blocks } => self.clock.set_epoch_length(blocks)?,
            GovernanceAction::SetNextDripNonce { nonce } => self.drip.set_next_nonce(nonce),
            GovernanceAction::MigrateIssuanceToV2 => {
                // accrue under the V1 rules before switching
                let (rewards, mut env) = self.rewards_env();
                rewards.update_acc_rewards_per_signal(&mut env)?;
                self.rewards.state.issuance.migrate_to_v2()?;
            }
        }
        Ok(())
    }
}

fn check_fee_percentages(protocol: Ppm, curation: Ppm) -> Result<()> {
    if !is_valid_ppm(protocol) || !is_valid_ppm(curation) || protocol + curation > MAX_PPM {
        return Err(GraphError::InvalidParameter(format!(
            "fee percentages {protocol} + {curation} exceed {MAX_PPM}"
        )));
    }
    Ok(())
}

//! Protocol configuration types
//!
//! Amounts that fit comfortably in whole tokens are configured as whole
//! tokens; 1e18-scaled rates and raw base-unit amounts are decimal
//! strings so they survive TOML's 64-bit integers. Addresses are hex.

use graph_core::math::is_valid_ppm;
use graph_core::{tokens, Address, GraphError, Ppm, Result, FIXED_POINT_SCALING_FACTOR, MAX_PPM, U256};
use graph_economics::{RebateParameters, SlashingParameters};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment overrides, e.g. `GRAPH__STAKING__THAWING_PERIOD`
pub const ENV_PREFIX: &str = "GRAPH";

/// Complete protocol configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Block clock and epoch length
    #[serde(default)]
    pub epochs: EpochConfig,

    /// Indexer staking, allocation and slashing parameters
    #[serde(default)]
    pub staking: StakingConfig,

    #[serde(default)]
    pub delegation: DelegationConfig,

    /// Rebate production function
    #[serde(default)]
    pub rebates: RebateConfig,

    /// Issuance and reward routing
    #[serde(default)]
    pub rewards: RewardsConfig,

    /// L1 counterparts and drip parameters
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProtocolConfig {
    /// Load from an optional TOML file, then apply `GRAPH__SECTION__KEY`
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| GraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GraphError::Config(e.to_string()))
    }

    /// Reject values no protocol instance could run with
    pub fn validate(&self) -> Result<()> {
        if self.epochs.epoch_length == 0 {
            return Err(GraphError::Config("epochs.epoch_length must be positive".into()));
        }

        let staking = &self.staking;
        if staking.channel_dispute_epochs == 0 {
            return Err(GraphError::Config("staking.channel_dispute_epochs must be positive".into()));
        }
        for (name, ppm) in [
            ("staking.protocol_percentage", staking.protocol_percentage),
            ("staking.curation_percentage", staking.curation_percentage),
        ] {
            if !is_valid_ppm(ppm) {
                return Err(GraphError::Config(format!("{name} above {MAX_PPM}")));
            }
        }
        if staking.protocol_percentage + staking.curation_percentage > MAX_PPM {
            return Err(GraphError::Config("protocol and curation percentages exceed 100%".into()));
        }
        staking.slashing().validate().map_err(config_error)?;
        self.rebates.parameters().validate().map_err(config_error)?;

        if self.rewards.issuance_rate()? < FIXED_POINT_SCALING_FACTOR {
            return Err(GraphError::Config("rewards.issuance_rate below 1.0".into()));
        }
        self.rewards.issuance_base()?;
        self.rewards.issuance_target()?;
        self.rewards.default_reclaim_address()?;

        self.bridge.l1_reservoir()?;
        self.bridge.l1_gateway()?;
        self.bridge.drip_reward_per_block()?;
        if self.bridge.l2_rewards_fraction()? > FIXED_POINT_SCALING_FACTOR {
            return Err(GraphError::Config("bridge.l2_rewards_fraction above 1.0".into()));
        }
        Ok(())
    }
}

fn config_error(e: GraphError) -> GraphError {
    GraphError::Config(e.to_string())
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .parse::<Address>()
        .map_err(|e| GraphError::Config(format!("{field}: {e}")))
}

fn parse_amount(field: &str, value: &str) -> Result<U256> {
    value
        .parse::<U256>()
        .map_err(|e| GraphError::Config(format!("{field}: {e}")))
}

/// Clock settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpochConfig {
    /// Blocks per epoch
    #[serde(default = "default_epoch_length")]
    pub epoch_length: u64,

    #[serde(default)]
    pub genesis_block: u64,

    /// Unix timestamp of the genesis block
    #[serde(default)]
    pub genesis_timestamp: u64,
}

fn default_epoch_length() -> u64 {
    6_646
}

impl Default for EpochConfig {
    fn default() -> Self {
        Self {
            epoch_length: default_epoch_length(),
            genesis_block: 0,
            genesis_timestamp: 0,
        }
    }
}

/// Indexer staking settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Minimum stake of an indexer, in whole tokens
    #[serde(default = "default_minimum_indexer_stake")]
    pub minimum_indexer_stake: u64,

    /// Blocks unstaked tokens stay locked
    #[serde(default = "default_thawing_period")]
    pub thawing_period: u64,

    /// Epochs after close before rebates can be claimed
    #[serde(default = "default_channel_dispute_epochs")]
    pub channel_dispute_epochs: u64,

    /// Cap on epochs counted in the effective allocation (0 disables)
    #[serde(default = "default_max_allocation_epochs")]
    pub max_allocation_epochs: u64,

    /// Share of query fees burned, PPM
    #[serde(default = "default_protocol_percentage")]
    pub protocol_percentage: Ppm,

    /// Share of query fees added to curation signal, PPM
    #[serde(default = "default_curation_percentage")]
    pub curation_percentage: Ppm,

    #[serde(default = "default_slashing_percentage")]
    pub query_slashing_percentage: Ppm,

    #[serde(default = "default_slashing_percentage")]
    pub indexing_slashing_percentage: Ppm,

    /// Share of a slash paid to the fisherman, PPM
    #[serde(default = "default_fisherman_reward_percentage")]
    pub fisherman_reward_percentage: Ppm,
}

fn default_minimum_indexer_stake() -> u64 {
    100_000
}

fn default_thawing_period() -> u64 {
    28_800
}

fn default_channel_dispute_epochs() -> u64 {
    7
}

fn default_max_allocation_epochs() -> u64 {
    28
}

fn default_protocol_percentage() -> Ppm {
    10_000
}

fn default_curation_percentage() -> Ppm {
    100_000
}

fn default_slashing_percentage() -> Ppm {
    25_000
}

fn default_fisherman_reward_percentage() -> Ppm {
    500_000
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            minimum_indexer_stake: default_minimum_indexer_stake(),
            thawing_period: default_thawing_period(),
            channel_dispute_epochs: default_channel_dispute_epochs(),
            max_allocation_epochs: default_max_allocation_epochs(),
            protocol_percentage: default_protocol_percentage(),
            curation_percentage: default_curation_percentage(),
            query_slashing_percentage: default_slashing_percentage(),
            indexing_slashing_percentage: default_slashing_percentage(),
            fisherman_reward_percentage: default_fisherman_reward_percentage(),
        }
    }
}

impl StakingConfig {
    pub fn minimum_indexer_stake(&self) -> U256 {
        tokens(self.minimum_indexer_stake)
    }

    pub fn slashing(&self) -> SlashingParameters {
        SlashingParameters {
            query_slashing_percentage: self.query_slashing_percentage,
            indexing_slashing_percentage: self.indexing_slashing_percentage,
            fisherman_reward_percentage: self.fisherman_reward_percentage,
        }
    }
}

/// Delegation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Delegated capacity as a multiple of own stake
    #[serde(default = "default_delegation_ratio")]
    pub delegation_ratio: u32,

    /// Epochs undelegated tokens stay locked
    #[serde(default = "default_unbonding_period")]
    pub unbonding_period: u64,
}

fn default_delegation_ratio() -> u32 {
    16
}

fn default_unbonding_period() -> u64 {
    28
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            delegation_ratio: default_delegation_ratio(),
            unbonding_period: default_unbonding_period(),
        }
    }
}

/// Rebate production function; a zero lambda selects Cobb-Douglas
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RebateConfig {
    #[serde(default = "default_alpha")]
    pub alpha_numerator: u32,

    #[serde(default = "default_alpha")]
    pub alpha_denominator: u32,

    #[serde(default = "default_lambda_numerator")]
    pub lambda_numerator: u32,

    #[serde(default = "default_lambda_denominator")]
    pub lambda_denominator: u32,
}

fn default_alpha() -> u32 {
    100
}

fn default_lambda_numerator() -> u32 {
    60
}

fn default_lambda_denominator() -> u32 {
    100
}

impl Default for RebateConfig {
    fn default() -> Self {
        Self {
            alpha_numerator: default_alpha(),
            alpha_denominator: default_alpha(),
            lambda_numerator: default_lambda_numerator(),
            lambda_denominator: default_lambda_denominator(),
        }
    }
}

impl RebateConfig {
    pub fn parameters(&self) -> RebateParameters {
        RebateParameters {
            alpha_numerator: self.alpha_numerator,
            alpha_denominator: self.alpha_denominator,
            lambda_numerator: self.lambda_numerator,
            lambda_denominator: self.lambda_denominator,
        }
    }
}

/// Issuance and reward routing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Per-block growth factor, 1e18 scale
    #[serde(default = "default_issuance_rate")]
    pub issuance_rate: String,

    /// Supply the rate compounds on, in base units
    #[serde(default = "default_zero")]
    pub issuance_base: String,

    /// Signal a subgraph needs before it earns rewards, in whole tokens
    #[serde(default)]
    pub minimum_subgraph_signal: u64,

    /// Seconds an allocation may go without a POI before it is stale
    #[serde(default = "default_max_poi_staleness")]
    pub max_poi_staleness: u64,

    /// Identity the issuance allocator is queried for
    #[serde(default = "default_issuance_target")]
    pub issuance_target: String,

    /// Fallback reclaim address; unset drops reclaims
    #[serde(default)]
    pub default_reclaim_address: Option<String>,

    /// Start on the V1 layout, without allocator support
    #[serde(default)]
    pub legacy_issuance: bool,
}

fn default_issuance_rate() -> String {
    FIXED_POINT_SCALING_FACTOR.to_string()
}

fn default_zero() -> String {
    "0".to_string()
}

fn default_max_poi_staleness() -> u64 {
    28 * 24 * 3600
}

fn default_issuance_target() -> String {
    Address::new([0x7e; 20]).to_string()
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            issuance_rate: default_issuance_rate(),
            issuance_base: default_zero(),
            minimum_subgraph_signal: 0,
            max_poi_staleness: default_max_poi_staleness(),
            issuance_target: default_issuance_target(),
            default_reclaim_address: None,
            legacy_issuance: false,
        }
    }
}

impl RewardsConfig {
    pub fn issuance_rate(&self) -> Result<U256> {
        parse_amount("rewards.issuance_rate", &self.issuance_rate)
    }

    pub fn issuance_base(&self) -> Result<U256> {
        parse_amount("rewards.issuance_base", &self.issuance_base)
    }

    pub fn issuance_target(&self) -> Result<Address> {
        parse_address("rewards.issuance_target", &self.issuance_target)
    }

    pub fn default_reclaim_address(&self) -> Result<Option<Address>> {
        self.default_reclaim_address
            .as_deref()
            .map(|a| parse_address("rewards.default_reclaim_address", a))
            .transpose()
    }
}

/// Cross-chain settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// L1 reservoir allowed to deliver drips
    #[serde(default = "default_l1_reservoir")]
    pub l1_reservoir: String,

    /// L1 gateway allowed to deliver transfers
    #[serde(default = "default_l1_gateway")]
    pub l1_gateway: String,

    /// Blocks between drips on L1
    #[serde(default = "default_min_drip_interval")]
    pub min_drip_interval: u64,

    /// Share of issuance sent to L2, 1e18 scale
    #[serde(default = "default_l2_rewards_fraction")]
    pub l2_rewards_fraction: String,

    /// Keeper reward per block since the last drip, in base units
    #[serde(default = "default_zero")]
    pub drip_reward_per_block: String,
}

fn default_l1_reservoir() -> String {
    Address::new([0x11; 20]).to_string()
}

fn default_l1_gateway() -> String {
    Address::new([0x22; 20]).to_string()
}

fn default_min_drip_interval() -> u64 {
    100
}

fn default_l2_rewards_fraction() -> String {
    FIXED_POINT_SCALING_FACTOR.to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            l1_reservoir: default_l1_reservoir(),
            l1_gateway: default_l1_gateway(),
            min_drip_interval: default_min_drip_interval(),
            l2_rewards_fraction: default_l2_rewards_fraction(),
            drip_reward_per_block: default_zero(),
        }
    }
}

impl BridgeConfig {
    pub fn l1_reservoir(&self) -> Result<Address> {
        parse_address("bridge.l1_reservoir", &self.l1_reservoir)
    }

    pub fn l1_gateway(&self) -> Result<Address> {
        parse_address("bridge.l1_gateway", &self.l1_gateway)
    }

    pub fn l2_rewards_fraction(&self) -> Result<U256> {
        parse_amount("bridge.l2_rewards_fraction", &self.l2_rewards_fraction)
    }

    pub fn drip_reward_per_block(&self) -> Result<U256> {
        parse_amount("bridge.drip_reward_per_block", &self.drip_reward_per_block)
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

//! Error types for Graph protocol economic operations

use crate::types::{AllocationId, U256};
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors that can occur in protocol economic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    // === Numeric Guards ===
    /// Checked addition or multiplication overflowed
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,

    /// Checked subtraction underflowed
    #[error("Arithmetic underflow")]
    ArithmeticUnderflow,

    /// Division with a zero divisor
    #[error("Division by zero")]
    DivisionByZero,

    // === Preconditions ===
    /// Zero address where a real account is required
    #[error("Zero address not allowed for {0}")]
    ZeroAddress(&'static str),

    /// Amount must be greater than zero
    #[error("Amount must be greater than zero")]
    ZeroAmount,

    /// Parameter outside its valid range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Protocol is paused
    #[error("Protocol is paused")]
    Paused,

    // === Staking ===
    /// Release exceeds staked tokens
    #[error("Insufficient stake: requested {requested}, staked {staked}")]
    InsufficientStake { requested: U256, staked: U256 },

    /// Requested tokens exceed free (unallocated, unlocked) stake
    #[error("Insufficient available tokens: requested {requested}, available {available}")]
    InsufficientAvailableTokens { requested: U256, available: U256 },

    /// Unlock exceeds locked tokens
    #[error("Insufficient locked tokens: requested {requested}, locked {locked}")]
    InsufficientLockedTokens { requested: U256, locked: U256 },

    /// Stake would fall below the configured minimum
    #[error("Stake below minimum of {minimum}")]
    BelowMinimumStake { minimum: U256 },

    /// Indexer has no stake
    #[error("Indexer not staked")]
    IndexerNotStaked,

    /// Nothing has finished thawing
    #[error("No tokens available to withdraw")]
    NothingToWithdraw,

    // === Delegation ===
    /// Delegator does not own enough shares
    #[error("Insufficient shares: requested {requested}, owned {owned}")]
    InsufficientShares { requested: U256, owned: U256 },

    // === Curation ===
    /// Curator does not have enough signal
    #[error("Insufficient signal: requested {requested}, owned {owned}")]
    InsufficientSignal { requested: U256, owned: U256 },

    // === Token ===
    /// Account balance too low
    #[error("Insufficient balance: requested {requested}, balance {balance}")]
    InsufficientBalance { requested: U256, balance: U256 },

    // === Allocations ===
    /// Allocation id unknown
    #[error("Allocation not found: {0}")]
    AllocationNotFound(AllocationId),

    /// Allocation id already used
    #[error("Allocation already exists: {0}")]
    AllocationAlreadyExists(AllocationId),

    /// Allocation is not in the state the operation requires
    #[error("Allocation {id} is {actual}, expected {expected}")]
    InvalidAllocationState {
        id: AllocationId,
        expected: &'static str,
        actual: &'static str,
    },

    // === Rebates ===
    /// Pool has no allocations left to redeem
    #[error("Rebate pool for epoch {0} has no unclaimed allocations")]
    NoUnclaimedAllocations(u64),

    /// Pool was fully redeemed and cannot accept contributions
    #[error("Rebate pool for epoch {0} is settled")]
    RebatePoolSettled(u64),

    /// Rebate pool missing
    #[error("Rebate pool not found for epoch {0}")]
    RebatePoolNotFound(u64),

    // === Cross-chain ===
    /// Drip nonce out of order
    #[error("Invalid nonce: expected {expected}, received {received}")]
    InvalidNonce { expected: u64, received: u64 },

    /// Drip called before the minimum interval elapsed
    #[error("Drip too soon: next drip allowed at block {next_block}")]
    DripTooSoon { next_block: u64 },

    /// Recipient callhook rejected an inbound transfer
    #[error("Callhook failed: {0}")]
    CallhookFailed(String),

    /// Retryable ticket unknown or already redeemed
    #[error("Ticket {0} not redeemable")]
    TicketNotRedeemable(u64),

    // === Execution ===
    /// Entry point re-entered while already executing
    #[error("Reentrant call")]
    ReentrantCall,

    /// Block number or timestamp moved backwards
    #[error("Clock regression: {current} -> {requested}")]
    ClockRegression { current: u64, requested: u64 },

    /// Operation requires a newer storage layout
    #[error("Schema mismatch: requires {required}, found {found}")]
    SchemaMismatch { required: u32, found: u32 },

    // === Storage ===
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GraphError {
    /// Stable numeric code per error family
    pub fn code(&self) -> u32 {
        match self {
            Self::ArithmeticOverflow | Self::ArithmeticUnderflow | Self::DivisionByZero => 1001,
            Self::ZeroAddress(_) | Self::ZeroAmount | Self::InvalidParameter(_) => 1002,
            Self::Unauthorized(_) => 1003,
            Self::Paused => 1004,
            Self::InsufficientStake { .. }
            | Self::InsufficientAvailableTokens { .. }
            | Self::InsufficientLockedTokens { .. }
            | Self::BelowMinimumStake { .. }
            | Self::IndexerNotStaked
            | Self::NothingToWithdraw => 2001,
            Self::InsufficientShares { .. } => 2002,
            Self::InsufficientSignal { .. } => 2003,
            Self::InsufficientBalance { .. } => 2004,
            Self::AllocationNotFound(_)
            | Self::AllocationAlreadyExists(_)
            | Self::InvalidAllocationState { .. } => 3001,
            Self::NoUnclaimedAllocations(_)
            | Self::RebatePoolSettled(_)
            | Self::RebatePoolNotFound(_) => 3002,
            Self::InvalidNonce { .. } | Self::DripTooSoon { .. } => 4001,
            Self::CallhookFailed(_) | Self::TicketNotRedeemable(_) => 4002,
            Self::ReentrantCall => 5001,
            Self::ClockRegression { .. } => 5002,
            Self::SchemaMismatch { .. } => 5003,
            _ => 9999,
        }
    }

    /// Check if a retry can clear the error without a state change by the caller
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidNonce { .. }
                | Self::DripTooSoon { .. }
                | Self::Paused
                | Self::ReentrantCall
                | Self::CallhookFailed(_)
        )
    }
}

//! Core type definitions for the protocol economic layer
//!
//! Amounts are `U256`, accounts are 20-byte `Address`es and deployments,
//! proofs of indexing and other content hashes are 32-byte values.

pub use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 1e18: the fixed-point scale of rates and per-token accumulators
pub const FIXED_POINT_SCALING_FACTOR: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// 100% expressed in parts per million
pub const MAX_PPM: u32 = 1_000_000;

/// Percentage in parts per million
pub type Ppm = u32;

/// Epoch number
pub type Epoch = u64;

/// Block number
pub type BlockNumber = u64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Shorthand for building token amounts in tests and defaults
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * FIXED_POINT_SCALING_FACTOR
}

/// SubgraphDeploymentId - content hash identifying an indexed deployment
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubgraphDeploymentId(B256);

impl SubgraphDeploymentId {
    /// Zero/null deployment, used for protocol-wide reclaims
    pub const ZERO: Self = Self(B256::ZERO);

    /// Wrap a raw 32-byte id
    pub fn new(id: B256) -> Self {
        Self(id)
    }

    /// Derive a deployment id from manifest content using BLAKE3
    pub fn from_content(content: &[u8]) -> Self {
        Self(B256::from(*blake3::hash(content).as_bytes()))
    }

    pub fn as_b256(&self) -> &B256 {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }
}

impl fmt::Debug for SubgraphDeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubgraphDeploymentId(0x{})", &self.to_hex()[..16])
    }
}

impl fmt::Display for SubgraphDeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// AllocationId - address derived from (indexer, deployment, nonce)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(Address);

impl AllocationId {
    /// Zero/null allocation, used for reclaims not tied to an allocation
    pub const ZERO: Self = Self(Address::ZERO);

    pub fn new(address: Address) -> Self {
        Self(address)
    }

    /// Deterministically derive an allocation address.
    ///
    /// AllocationId = last 20 bytes of BLAKE3(indexer || deployment || nonce_le)
    pub fn derive(indexer: &Address, subgraph: &SubgraphDeploymentId, nonce: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(indexer.as_slice());
        hasher.update(subgraph.as_b256().as_slice());
        hasher.update(&nonce.to_le_bytes());
        let hash = hasher.finalize();
        Self(Address::from_slice(&hash.as_bytes()[12..]))
    }

    pub fn as_address(&self) -> &Address {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Address::ZERO
    }
}

impl fmt::Debug for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AllocationId(0x{})", &hex::encode(self.0)[..12])
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Proof of indexing submitted by an indexer when presenting work
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Poi(B256);

impl Poi {
    /// The zero POI; presenting it never earns rewards
    pub const ZERO: Self = Self(B256::ZERO);

    pub fn new(value: B256) -> Self {
        Self(value)
    }

    pub fn from_content(content: &[u8]) -> Self {
        Self(B256::from(*blake3::hash(content).as_bytes()))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == B256::ZERO
    }
}

impl fmt::Debug for Poi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Poi(0x{})", &hex::encode(self.0)[..16])
    }
}

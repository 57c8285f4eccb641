//! # Graph Economics Core
//!
//! Shared building blocks for the protocol's economic layer:
//! - Identifiers: `Address`, `SubgraphDeploymentId`, `AllocationId`, `Poi`
//! - `GraphError` - the error taxonomy every crate in the workspace returns
//! - `math` - PPM percentages, weighted averages and 1e18 fixed-point helpers
//! - `BlockClock` - block number, timestamp and epoch bookkeeping
//! - `ReentrancyGuard` - non-reentrant entry flag
//!
//! ## Numeric model
//!
//! All token amounts are `U256` in the token's smallest unit. Rates and
//! per-token accumulators are 1e18 fixed point:
//!
//! ```text
//!   issuance rate   1.000000012e18  ->  +0.0000012% per block
//!   acc per signal  tokens * 1e18 / signal
//!   percentages     PPM, 1_000_000 = 100%
//! ```

pub mod clock;
pub mod error;
pub mod guard;
pub mod math;
pub mod types;

pub use clock::*;
pub use error::*;
pub use guard::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::BlockClock;
    pub use crate::error::{GraphError, Result};
    pub use crate::math;
    pub use crate::types::*;
}

//! # Graph Protocol
//!
//! The L2 instance of the economic layer, assembled from the ledgers in
//! `graph-economics` and the receive side of `graph-bridge`.
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | `config` | TOML + environment configuration |
//! | `logging` | Tracing subscriber setup |
//! | `state` | Composed ledgers and multi-ledger operations |
//! | `governance` | Parameter setters and migrations |
//! | `protocol` | Locked, transactional handle over the state |
//! | `persistence` | Versioned snapshot envelope |
//!
//! ## Example
//!
//! ```no_run
//! use graph_core::{tokens, Address};
//! use graph_protocol::{Protocol, ProtocolConfig};
//!
//! let protocol = Protocol::new(&ProtocolConfig::default())?;
//! let indexer = Address::repeat_byte(0x1d);
//! protocol.mint(&indexer, tokens(200_000))?;
//! protocol.stake(&indexer, tokens(100_000))?;
//! # Ok::<(), graph_core::GraphError>(())
//! ```

pub mod config;
pub mod governance;
pub mod logging;
pub mod persistence;
pub mod protocol;
pub mod state;

pub use config::{
    BridgeConfig, DelegationConfig, EpochConfig, LogFormat, LoggingConfig, ProtocolConfig, RebateConfig,
    RewardsConfig, StakingConfig,
};
pub use governance::GovernanceAction;
pub use logging::init_logging;
pub use persistence::SNAPSHOT_VERSION;
pub use protocol::Protocol;
pub use state::{ProtocolParams, ProtocolState, CURATION_CUSTODY, STAKING_CUSTODY};

//! Block clock with epoch bookkeeping
//!
//! The protocol has no background timers: accrual is computed lazily from
//! the clock on the next touch. The clock is monotonic, block numbers and
//! timestamps never move backwards.

use crate::error::{GraphError, Result};
use crate::types::{BlockNumber, Epoch, Timestamp};
use serde::{Deserialize, Serialize};

/// Monotonic block/timestamp clock with fixed-length epochs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockClock {
    /// Current block number
    block_number: BlockNumber,

    /// Current block timestamp
    timestamp: Timestamp,

    /// Epoch at the last epoch-length change (1 at genesis)
    anchor_epoch: Epoch,

    /// First block of `anchor_epoch`
    anchor_block: BlockNumber,

    /// Blocks per epoch
    epoch_length: u64,
}

impl BlockClock {
    /// Create a clock positioned at its genesis block
    pub fn new(genesis_block: BlockNumber, timestamp: Timestamp, epoch_length: u64) -> Result<Self> {
        if epoch_length == 0 {
            return Err(GraphError::InvalidParameter("epoch length must be positive".into()));
        }
        Ok(Self {
            block_number: genesis_block,
            timestamp,
            anchor_epoch: 1,
            anchor_block: genesis_block,
            epoch_length,
        })
    }

    pub fn block_number(&self) -> BlockNumber {
        self.block_number
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn epoch_length(&self) -> u64 {
        self.epoch_length
    }

    /// Current epoch, starting at 1 on the genesis block
    pub fn current_epoch(&self) -> Epoch {
        self.anchor_epoch + (self.block_number - self.anchor_block) / self.epoch_length
    }

    /// First block of the current epoch
    pub fn current_epoch_block(&self) -> BlockNumber {
        self.anchor_block + (self.current_epoch() - self.anchor_epoch) * self.epoch_length
    }

    /// Epochs elapsed since `epoch`, zero if `epoch` is in the future
    pub fn epochs_since(&self, epoch: Epoch) -> u64 {
        self.current_epoch().saturating_sub(epoch)
    }

    /// Move forward by `blocks`, with the timestamp advancing `seconds`
    pub fn advance(&mut self, blocks: u64, seconds: u64) -> Result<()> {
        let block = self
            .block_number
            .checked_add(blocks)
            .ok_or(GraphError::ArithmeticOverflow)?;
        let timestamp = self
            .timestamp
            .checked_add(seconds)
            .ok_or(GraphError::ArithmeticOverflow)?;
        self.set(block, timestamp)
    }

    /// Jump to an absolute block and timestamp
    pub fn set(&mut self, block_number: BlockNumber, timestamp: Timestamp) -> Result<()> {
        if block_number < self.block_number {
            return Err(GraphError::ClockRegression {
                current: self.block_number,
                requested: block_number,
            });
        }
        if timestamp < self.timestamp {
            return Err(GraphError::ClockRegression {
                current: self.timestamp,
                requested: timestamp,
            });
        }
        self.block_number = block_number;
        self.timestamp = timestamp;
        Ok(())
    }

    /// Change the epoch length, keeping the current epoch number stable
    pub fn set_epoch_length(&mut self, epoch_length: u64) -> Result<()> {
        if epoch_length == 0 {
            return Err(GraphError::InvalidParameter("epoch length must be positive".into()));
        }
        let (epoch, epoch_block) = (self.current_epoch(), self.current_epoch_block());
        self.anchor_epoch = epoch;
        self.anchor_block = epoch_block;
        self.epoch_length = epoch_length;
        tracing::debug!(epoch = self.anchor_epoch, epoch_length, "epoch length updated");
        Ok(())
    }
}

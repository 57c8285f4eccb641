//! Token gateway
//!
//! Tokens deposited on L1 are credited on L2 when the messenger delivers
//! the transfer. A transfer may carry callhook data that stakes or
//! delegates the tokens on arrival; if the callhook fails the whole
//! delivery fails and the ticket can be retried.

use crate::messenger::{L2Messenger, L2Payload, OutboundMessage, TicketId};
use graph_core::{Address, GraphError, Result, U256};
use graph_economics::{EventSink, ProtocolEvent};
use serde::{Deserialize, Serialize};

/// What to do with bridged tokens once credited
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallhookData {
    /// Stake the tokens for `indexer`
    Stake { indexer: Address },
    /// Delegate the tokens to `indexer` on behalf of `delegator`
    Delegate { indexer: Address, delegator: Address },
}

/// A token transfer crossing from L1
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    #[serde(default)]
    pub data: Option<CallhookData>,
}

/// L2 state an inbound transfer lands in
pub trait InboundTransferTarget {
    fn credit(&mut self, to: &Address, amount: U256) -> Result<()>;

    fn callhook(&mut self, transfer: &InboundTransfer, data: &CallhookData) -> Result<()>;
}

/// L1 side: escrows nothing itself, only forwards transfers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Gateway {
    pub address: Address,
}

impl L1Gateway {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub async fn outbound_transfer(&self, messenger: &dyn L2Messenger, transfer: InboundTransfer) -> Result<TicketId> {
        validate(&transfer)?;
        let ticket = messenger
            .send_to_l2(OutboundMessage {
                sender: self.address,
                payload: L2Payload::Transfer(transfer),
            })
            .await?;
        tracing::debug!(ticket, "outbound transfer queued");
        Ok(ticket)
    }
}

/// L2 side
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Gateway {
    pub l1_counterpart: Address,
}

impl L2Gateway {
    pub fn new(l1_counterpart: Address) -> Self {
        Self { l1_counterpart }
    }

    /// Credit a delivered transfer and run its callhook. The caller holds
    /// the reentrancy guard for the duration.
    pub fn finalize_inbound_transfer(
        &self,
        sender: &Address,
        transfer: &InboundTransfer,
        target: &mut dyn InboundTransferTarget,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        if *sender != self.l1_counterpart {
            return Err(GraphError::Unauthorized(format!("transfer from {sender}")));
        }
        validate(transfer)?;

        target.credit(&transfer.to, transfer.amount)?;
        if let Some(data) = &transfer.data {
            target.callhook(transfer, data).map_err(|e| match e {
                GraphError::ReentrantCall => e,
                other => GraphError::CallhookFailed(other.to_string()),
            })?;
        }

        events.emit(ProtocolEvent::InboundTransferFinalized {
            from: transfer.from,
            to: transfer.to,
            amount: transfer.amount,
        });
        tracing::info!(to = %transfer.to, amount = %transfer.amount, "inbound transfer finalized");
        Ok(())
    }
}

fn validate(transfer: &InboundTransfer) -> Result<()> {
    if transfer.to.is_zero() {
        return Err(GraphError::ZeroAddress("transfer recipient"));
    }
    if transfer.amount.is_zero() {
        return Err(GraphError::ZeroAmount);
    }
    Ok(())
}

//! Cross-chain messenger
//!
//! Outbound messages are fire-and-forget: the sender gets a ticket id and
//! never waits for delivery. A ticket stays pending until someone redeems
//! it; a failed redemption leaves it pending for a later retry.

use crate::drip::DripMessage;
use crate::gateway::InboundTransfer;
use async_trait::async_trait;
use graph_core::{Address, GraphError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;

/// Correlation id of a submitted message
pub type TicketId = u64;

/// Payload carried to L2
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum L2Payload {
    /// Issuance parameters from the L1 reservoir
    Drip(DripMessage),
    /// Tokens bridged through the gateway
    Transfer(InboundTransfer),
}

/// Message submitted to the messenger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// L1 contract that sent the message
    pub sender: Address,
    pub payload: L2Payload,
}

/// Cross-chain messenger collaborator
#[async_trait]
pub trait L2Messenger: Send + Sync {
    /// Submit a message, returning its ticket id
    async fn send_to_l2(&self, message: OutboundMessage) -> Result<TicketId>;
}

/// Delivery status of a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Pending,
    Redeemed,
}

/// Retryable ticket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryableTicket {
    pub id: TicketId,
    pub message: OutboundMessage,
    pub status: TicketStatus,
    /// Failed redemption attempts
    pub attempts: u32,
}

/// In-process messenger holding retryable tickets
pub struct InMemoryMessenger {
    tickets: Mutex<BTreeMap<TicketId, RetryableTicket>>,
    next_ticket: AtomicU64,
    notify: broadcast::Sender<TicketId>,
}

impl Default for InMemoryMessenger {
    fn default() -> Self {
        let (notify, _) = broadcast::channel(256);
        Self {
            tickets: Mutex::new(BTreeMap::new()),
            next_ticket: AtomicU64::new(1),
            notify,
        }
    }
}

impl InMemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticket ids as they are submitted
    pub fn subscribe(&self) -> broadcast::Receiver<TicketId> {
        self.notify.subscribe()
    }

    pub fn ticket(&self, id: TicketId) -> Option<RetryableTicket> {
        self.tickets.lock().get(&id).cloned()
    }

    /// Tickets not yet redeemed, oldest first
    pub fn pending(&self) -> Vec<RetryableTicket> {
        self.tickets
            .lock()
            .values()
            .filter(|t| t.status == TicketStatus::Pending)
            .cloned()
            .collect()
    }

    /// Deliver a pending ticket. Anyone may redeem; if `deliver` fails the
    /// ticket stays pending and the error is returned.
    pub fn redeem<F>(&self, id: TicketId, deliver: F) -> Result<()>
    where
        F: FnOnce(&OutboundMessage) -> Result<()>,
    {
        let message = match self.tickets.lock().get(&id) {
            Some(ticket) if ticket.status == TicketStatus::Pending => ticket.message.clone(),
            _ => return Err(GraphError::TicketNotRedeemable(id)),
        };

        let result = deliver(&message);

        let mut tickets = self.tickets.lock();
        let ticket = tickets.get_mut(&id).ok_or(GraphError::TicketNotRedeemable(id))?;
        match result {
            Ok(()) => {
                ticket.status = TicketStatus::Redeemed;
                tracing::debug!(ticket = id, "ticket redeemed");
                Ok(())
            }
            Err(e) => {
                ticket.attempts += 1;
                tracing::warn!(ticket = id, attempts = ticket.attempts, error = %e, "ticket redemption failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl L2Messenger for InMemoryMessenger {
    async fn send_to_l2(&self, message: OutboundMessage) -> Result<TicketId> {
        let id = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.tickets.lock().insert(
            id,
            RetryableTicket {
                id,
                message,
                status: TicketStatus::Pending,
                attempts: 0,
            },
        );
        // no subscribers is fine
        let _ = self.notify.send(id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_core::U256;

    fn message() -> OutboundMessage {
        OutboundMessage {
            sender: Address::repeat_byte(1),
            payload: L2Payload::Drip(DripMessage {
                issuance_base: U256::from(1u8),
                issuance_rate: U256::from(1u8),
                nonce: 0,
                keeper_reward: U256::ZERO,
                keeper: Address::ZERO,
            }),
        }
    }

    #[tokio::test]
    async fn test_failed_redemption_stays_pending() {
        let messenger = InMemoryMessenger::new();
        let mut feed = messenger.subscribe();
        let id = messenger.send_to_l2(message()).await.unwrap();
        assert_eq!(feed.recv().await.unwrap(), id);

        let err = messenger
            .redeem(id, |_| Err(GraphError::InvalidNonce { expected: 1, received: 0 }))
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(messenger.pending().len(), 1);
        assert_eq!(messenger.ticket(id).unwrap().attempts, 1);

        messenger.redeem(id, |_| Ok(())).unwrap();
        assert!(messenger.pending().is_empty());
        assert_eq!(messenger.redeem(id, |_| Ok(())), Err(GraphError::TicketNotRedeemable(id)));
    }

    #[tokio::test]
    async fn test_ticket_ids_increase() {
        let messenger = InMemoryMessenger::new();
        let a = messenger.send_to_l2(message()).await.unwrap();
        let b = messenger.send_to_l2(message()).await.unwrap();
        assert!(b > a);
        assert_eq!(messenger.redeem(99, |_| Ok(())), Err(GraphError::TicketNotRedeemable(99)));
    }
}

//! # L1/L2 Bridge
//!
//! Connects the L1 and L2 instances of the economic layer:
//! - Issuance drips from the L1 reservoir to the L2 rewards accumulator
//! - Token transfers through the gateway, optionally staking on arrival
//!
//! ## Delivery model
//!
//! Sending is fire-and-forget through an `L2Messenger`, which hands back a
//! ticket id. Tickets are retryable: a failed delivery leaves the ticket
//! pending and anyone may redeem it again later. The receive side never
//! reorders; drips are gated by nonce and fail closed when out of order.

pub mod drip;
pub mod gateway;
pub mod messenger;

pub use drip::{DripMessage, DripReceipt, IssuanceTarget, L1Reservoir, L2Reservoir};
pub use gateway::{CallhookData, InboundTransfer, InboundTransferTarget, L1Gateway, L2Gateway};
pub use messenger::{InMemoryMessenger, L2Messenger, L2Payload, OutboundMessage, RetryableTicket, TicketId, TicketStatus};

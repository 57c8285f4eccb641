//! # Issuance drip
//!
//! The L1 reservoir periodically sends the L2 share of issuance across the
//! bridge; the L2 reservoir applies the drips strictly in nonce order.
//!
//! ```text
//!  L1Reservoir::drip ──► L2Messenger ──► ticket ──► redeem ──► L2Reservoir::receive_drip
//!   (rate limited)        (fire and forget)          (anyone)     (nonce gated)
//! ```

use crate::messenger::{L2Messenger, L2Payload, OutboundMessage, TicketId};
use graph_core::math::{checked_add, checked_mul, mul_div};
use graph_core::{Address, BlockNumber, GraphError, Result, FIXED_POINT_SCALING_FACTOR, U256};
use graph_economics::{EventSink, ProtocolEvent};
use serde::{Deserialize, Serialize};

/// Issuance parameters carried by one drip
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DripMessage {
    /// L2 share of the issuance base
    pub issuance_base: U256,
    pub issuance_rate: U256,
    pub nonce: u64,
    /// Paid on L2 to whoever triggered the drip
    pub keeper_reward: U256,
    pub keeper: Address,
}

/// Result of a successful send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DripReceipt {
    pub ticket_id: TicketId,
    pub message: DripMessage,
}

/// Send side of the drip, living on L1
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Reservoir {
    /// Identity the L2 side accepts drips from
    pub address: Address,
    pub issuance_rate: U256,
    /// Share of issuance that goes to L2, 1e18 fixed point
    pub l2_rewards_fraction: U256,
    pub min_drip_interval: u64,
    pub drip_reward_per_block: U256,
    issuance_base: U256,
    last_drip_block: Option<BlockNumber>,
    next_nonce: u64,
}

impl L1Reservoir {
    pub fn new(address: Address, issuance_rate: U256, l2_rewards_fraction: U256, min_drip_interval: u64) -> Result<Self> {
        if address.is_zero() {
            return Err(GraphError::ZeroAddress("l1 reservoir"));
        }
        let mut reservoir = Self {
            address,
            issuance_rate: FIXED_POINT_SCALING_FACTOR,
            l2_rewards_fraction: U256::ZERO,
            min_drip_interval,
            drip_reward_per_block: U256::ZERO,
            issuance_base: U256::ZERO,
            last_drip_block: None,
            next_nonce: 0,
        };
        reservoir.set_issuance_rate(issuance_rate)?;
        reservoir.set_l2_rewards_fraction(l2_rewards_fraction)?;
        Ok(reservoir)
    }

    pub fn set_issuance_rate(&mut self, rate: U256) -> Result<()> {
        if rate < FIXED_POINT_SCALING_FACTOR {
            return Err(GraphError::InvalidParameter("issuance rate below 1.0".into()));
        }
        self.issuance_rate = rate;
        Ok(())
    }

    pub fn set_l2_rewards_fraction(&mut self, fraction: U256) -> Result<()> {
        if fraction > FIXED_POINT_SCALING_FACTOR {
            return Err(GraphError::InvalidParameter("l2 rewards fraction above 1.0".into()));
        }
        self.l2_rewards_fraction = fraction;
        Ok(())
    }

    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    /// Supply snapshot taken at the last drip
    pub fn issuance_base(&self) -> U256 {
        self.issuance_base
    }

    pub fn last_drip_block(&self) -> Option<BlockNumber> {
        self.last_drip_block
    }

    /// First block at which another drip is accepted
    pub fn next_drip_block(&self) -> BlockNumber {
        self.last_drip_block
            .map_or(0, |last| last.saturating_add(self.min_drip_interval))
    }

    fn keeper_reward(&self, block: BlockNumber) -> Result<U256> {
        let Some(last) = self.last_drip_block else {
            return Ok(U256::ZERO);
        };
        checked_mul(self.drip_reward_per_block, U256::from(block.saturating_sub(last)))
    }

    /// Refresh the issuance base from `total_supply` and send the L2 share.
    /// Local state only moves once the messenger accepted the message.
    pub async fn drip(
        &mut self,
        block: BlockNumber,
        total_supply: U256,
        keeper: Address,
        messenger: &dyn L2Messenger,
        events: &mut (dyn EventSink + Send),
    ) -> Result<DripReceipt> {
        let next_block = self.next_drip_block();
        if block < next_block {
            return Err(GraphError::DripTooSoon { next_block });
        }
        let keeper_reward = self.keeper_reward(block)?;
        if !keeper_reward.is_zero() && keeper.is_zero() {
            return Err(GraphError::ZeroAddress("keeper"));
        }

        let message = DripMessage {
            issuance_base: mul_div(total_supply, self.l2_rewards_fraction, FIXED_POINT_SCALING_FACTOR)?,
            issuance_rate: self.issuance_rate,
            nonce: self.next_nonce,
            keeper_reward,
            keeper,
        };
        let ticket_id = messenger
            .send_to_l2(OutboundMessage {
                sender: self.address,
                payload: L2Payload::Drip(message.clone()),
            })
            .await?;

        self.issuance_base = total_supply;
        self.last_drip_block = Some(block);
        self.next_nonce += 1;
        events.emit(ProtocolEvent::DripSent {
            nonce: message.nonce,
            ticket_id,
            issuance_base: message.issuance_base,
            issuance_rate: message.issuance_rate,
        });
        tracing::info!(nonce = message.nonce, ticket = ticket_id, block, "drip sent");
        Ok(DripReceipt { ticket_id, message })
    }
}

/// L2 state a drip lands in
pub trait IssuanceTarget {
    /// Install new issuance parameters, accruing at the old ones first
    fn apply_issuance(&mut self, issuance_base: U256, issuance_rate: U256) -> Result<()>;

    fn pay_keeper(&mut self, keeper: &Address, amount: U256) -> Result<()>;
}

/// Receive side of the drip, living on L2
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Reservoir {
    pub l1_counterpart: Address,
    next_nonce: u64,
    /// Keeper rewards paid so far
    keeper_rewards_paid: U256,
}

impl L2Reservoir {
    pub fn new(l1_counterpart: Address) -> Self {
        Self {
            l1_counterpart,
            next_nonce: 0,
            keeper_rewards_paid: U256::ZERO,
        }
    }

    pub fn next_nonce(&self) -> u64 {
        self.next_nonce
    }

    pub fn keeper_rewards_paid(&self) -> U256 {
        self.keeper_rewards_paid
    }

    /// Governance escape hatch for a lost or abandoned drip
    pub fn set_next_nonce(&mut self, nonce: u64) {
        tracing::warn!(old = self.next_nonce, new = nonce, "drip nonce overridden");
        self.next_nonce = nonce;
    }

    /// Apply a delivered drip. Out-of-order or replayed messages fail and
    /// leave everything untouched.
    pub fn receive_drip(
        &mut self,
        sender: &Address,
        message: &DripMessage,
        target: &mut dyn IssuanceTarget,
        events: &mut dyn EventSink,
    ) -> Result<()> {
        if *sender != self.l1_counterpart {
            return Err(GraphError::Unauthorized(format!("drip from {sender}")));
        }
        if message.nonce != self.next_nonce {
            return Err(GraphError::InvalidNonce {
                expected: self.next_nonce,
                received: message.nonce,
            });
        }

        target.apply_issuance(message.issuance_base, message.issuance_rate)?;
        if !message.keeper_reward.is_zero() {
            target.pay_keeper(&message.keeper, message.keeper_reward)?;
            self.keeper_rewards_paid = checked_add(self.keeper_rewards_paid, message.keeper_reward)?;
        }

        self.next_nonce += 1;
        events.emit(ProtocolEvent::DripReceived {
            nonce: message.nonce,
            issuance_base: message.issuance_base,
            issuance_rate: message.issuance_rate,
        });
        tracing::info!(nonce = message.nonce, "drip received");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::InMemoryMessenger;
    use graph_core::tokens;
    use graph_economics::EventLog;

    const L1: Address = Address::new([0x11; 20]);
    const KEEPER: Address = Address::new([0x4b; 20]);

    #[derive(Default)]
    struct Recorder {
        applied: Vec<(U256, U256)>,
        paid: U256,
    }

    impl IssuanceTarget for Recorder {
        fn apply_issuance(&mut self, issuance_base: U256, issuance_rate: U256) -> Result<()> {
            self.applied.push((issuance_base, issuance_rate));
            Ok(())
        }

        fn pay_keeper(&mut self, _keeper: &Address, amount: U256) -> Result<()> {
            self.paid += amount;
            Ok(())
        }
    }

    fn reservoir() -> L1Reservoir {
        let half = FIXED_POINT_SCALING_FACTOR / U256::from(2u8);
        let mut reservoir = L1Reservoir::new(L1, FIXED_POINT_SCALING_FACTOR, half, 100).unwrap();
        reservoir.drip_reward_per_block = tokens(1);
        reservoir
    }

    #[tokio::test]
    async fn test_drip_rate_limited() {
        let messenger = InMemoryMessenger::new();
        let mut events = EventLog::new();
        let mut l1 = reservoir();

        let receipt = l1.drip(10, tokens(1_000), KEEPER, &messenger, &mut events).await.unwrap();
        assert_eq!(receipt.message.nonce, 0);
        assert_eq!(receipt.message.issuance_base, tokens(500));
        assert_eq!(receipt.message.keeper_reward, U256::ZERO);

        let err = l1.drip(50, tokens(1_000), KEEPER, &messenger, &mut events).await.unwrap_err();
        assert_eq!(err, GraphError::DripTooSoon { next_block: 110 });
        assert_eq!(l1.next_nonce(), 1);

        let receipt = l1.drip(110, tokens(2_000), KEEPER, &messenger, &mut events).await.unwrap();
        assert_eq!(receipt.message.nonce, 1);
        assert_eq!(receipt.message.keeper_reward, tokens(100));
        assert_eq!(messenger.pending().len(), 2);
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_fails_closed() {
        let messenger = InMemoryMessenger::new();
        let mut events = EventLog::new();
        let mut l1 = reservoir();
        let first = l1.drip(0, tokens(1_000), KEEPER, &messenger, &mut events).await.unwrap();
        let second = l1.drip(100, tokens(1_000), KEEPER, &messenger, &mut events).await.unwrap();

        let mut l2 = L2Reservoir::new(L1);
        let mut target = Recorder::default();

        let result = messenger.redeem(second.ticket_id, |m| {
            l2.receive_drip(&m.sender, &drip_of_message(m), &mut target, &mut events)
        });
        assert_eq!(result, Err(GraphError::InvalidNonce { expected: 0, received: 1 }));
        assert!(target.applied.is_empty());

        for id in [first.ticket_id, second.ticket_id] {
            messenger
                .redeem(id, |m| l2.receive_drip(&m.sender, &drip_of_message(m), &mut target, &mut events))
                .unwrap();
        }
        assert_eq!(l2.next_nonce(), 2);
        assert_eq!(target.applied.len(), 2);
        assert_eq!(target.paid, tokens(100));
        assert!(messenger.pending().is_empty());
        assert_eq!(drip_of_message(&messenger.ticket(second.ticket_id).unwrap().message).nonce, 1);
    }

    fn drip_of_message(message: &OutboundMessage) -> DripMessage {
        match &message.payload {
            L2Payload::Drip(drip) => drip.clone(),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_foreign_sender_rejected() {
        let mut l2 = L2Reservoir::new(L1);
        let mut target = Recorder::default();
        let mut events = EventLog::new();
        let message = DripMessage {
            issuance_base: tokens(1),
            issuance_rate: FIXED_POINT_SCALING_FACTOR,
            nonce: 0,
            keeper_reward: U256::ZERO,
            keeper: Address::ZERO,
        };
        let err = l2
            .receive_drip(&Address::repeat_byte(0x99), &message, &mut target, &mut events)
            .unwrap_err();
        assert!(matches!(err, GraphError::Unauthorized(_)));
        assert_eq!(l2.next_nonce(), 0);
    }

    #[test]
    fn test_fraction_above_one_rejected() {
        let too_much = FIXED_POINT_SCALING_FACTOR + U256::from(1u8);
        assert!(L1Reservoir::new(L1, FIXED_POINT_SCALING_FACTOR, too_much, 1).is_err());
        assert!(L1Reservoir::new(Address::ZERO, FIXED_POINT_SCALING_FACTOR, U256::ZERO, 1).is_err());
    }
}

//! Broadcast Events
//!
//! State-change events fanned out to auction subscribers. Every variant is a
//! flat record of plain scalars; decimal values serialize as fixed-point
//! strings so they round-trip losslessly through any JSON envelope.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bid::BidEnvelope;

/// Event emitted by the auction core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuctionEvent {
    #[serde(rename_all = "camelCase")]
    NewBid {
        auction_id: Uuid,
        bid_id: Uuid,
        bidder_id: Uuid,
        #[serde(with = "rust_decimal::serde::str")]
        amount: Decimal,
        ts: DateTime<Utc>,
        #[serde(with = "rust_decimal::serde::str")]
        minimum_next_bid: Decimal,
    },

    #[serde(rename_all = "camelCase")]
    AuctionStarted {
        auction_id: Uuid,
        end_time: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    AuctionEnded {
        auction_id: Uuid,
        winner_id: Uuid,
        #[serde(with = "rust_decimal::serde::str")]
        winning_bid: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        guarantee_amount: Decimal,
        payment_due_by: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    AuctionEndedNoBids { auction_id: Uuid },

    #[serde(rename_all = "camelCase")]
    PaymentFallback {
        auction_id: Uuid,
        previous_bidder: Uuid,
        new_winner_id: Uuid,
        #[serde(with = "rust_decimal::serde::str")]
        new_winning_bid: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        guarantee_amount: Decimal,
        payment_due_by: DateTime<Utc>,
    },

    #[serde(rename_all = "camelCase")]
    PaymentCompleted {
        auction_id: Uuid,
        payment_id: Uuid,
        bidder_id: Uuid,
        #[serde(with = "rust_decimal::serde::str")]
        amount: Decimal,
    },

    #[serde(rename_all = "camelCase")]
    AuctionNoWinner { auction_id: Uuid },
}

impl AuctionEvent {
    pub fn new_bid(auction_id: Uuid, envelope: &BidEnvelope, minimum_next_bid: Decimal) -> Self {
        Self::NewBid {
            auction_id,
            bid_id: envelope.bid_id,
            bidder_id: envelope.bidder_id,
            amount: envelope.amount,
            ts: envelope.ts,
            minimum_next_bid,
        }
    }

    /// Lifecycle events go to the global topic as well as the auction topic
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::NewBid { .. })
    }

    pub fn auction_id(&self) -> Uuid {
        match self {
            Self::NewBid { auction_id, .. }
            | Self::AuctionStarted { auction_id, .. }
            | Self::AuctionEnded { auction_id, .. }
            | Self::AuctionEndedNoBids { auction_id }
            | Self::PaymentFallback { auction_id, .. }
            | Self::PaymentCompleted { auction_id, .. }
            | Self::AuctionNoWinner { auction_id } => *auction_id,
        }
    }
}

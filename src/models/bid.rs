//! Bid Models
//!
//! The durable bid record and the wire envelope stored in the live bid set
//! and carried inside broadcast events.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accepted bid, append-only in the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Bid {
    pub fn new(auction_id: Uuid, bidder_id: Uuid, amount: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            auction_id,
            bidder_id,
            amount,
            created_at: at,
        }
    }
}

/// Self-describing bid record stored as a live bid-set member and emitted in
/// events. Producer and consumer agree on this codec: camelCase keys, the
/// amount as a fixed-point decimal string, the timestamp as ISO-8601 UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidEnvelope {
    pub bid_id: Uuid,
    pub bidder_id: Uuid,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub ts: DateTime<Utc>,
}

impl BidEnvelope {
    /// Compact single-line JSON, the exact bytes used as the bid-set member
    pub fn to_json(&self) -> String {
        // Serialization of this struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl From<&Bid> for BidEnvelope {
    fn from(bid: &Bid) -> Self {
        Self {
            bid_id: bid.id,
            bidder_id: bid.bidder_id,
            amount: bid.amount,
            ts: bid.created_at,
        }
    }
}

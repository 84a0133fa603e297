//! Live Store Capability
//!
//! Hot per-auction state: a state hash, an atomic highest-bid string and an
//! ordered bid set, all expiring shortly after the auction does. Admission
//! and head removal execute as single atomic steps on the store server, which
//! makes bidding linearizable per auction across horizontally scaled
//! instances without distributed locks.
//!
//! Key schema is authoritative; every process must agree on these strings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Auction, BidEnvelope};

/// `auction:{id}:state` — hash: status, itemId, startTime, endTime,
/// highestBid, highestBidder
pub fn state_key(auction_id: Uuid) -> String {
    format!("auction:{auction_id}:state")
}

/// `auction:{id}:highest` — decimal string
pub fn highest_key(auction_id: Uuid) -> String {
    format!("auction:{auction_id}:highest")
}

/// `auction:{id}:bids` — ordered set of bid envelopes scored by amount
pub fn bids_key(auction_id: Uuid) -> String {
    format!("auction:{auction_id}:bids")
}

/// Fixed two-decimal string form used for every amount the live store holds
pub fn format_amount(value: Decimal) -> String {
    format!("{value:.2}")
}

/// Snapshot of the per-auction state hash
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState {
    pub status: String,
    pub item_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub highest_bid: Decimal,
    pub highest_bidder: Option<Uuid>,
}

impl LiveState {
    pub fn is_live(&self) -> bool {
        self.status == "live"
    }
}

/// Outcome of the atomic admission step
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The bid is the new head
    Accepted,
    /// The caller already holds the head (re-checked inside the atomic step)
    SelfOutbid,
    /// First bid below the item's base price
    BelowBase { required_base: Decimal },
    /// Raise below the increment rule
    BelowIncrement {
        current_highest: Decimal,
        minimum_required: Decimal,
    },
}

/// Per-auction hot state store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LiveStore: Send + Sync {
    /// Project an auction into the live store: write the state hash, seed the
    /// highest from the durable head, load `bids` into the bid set and apply
    /// `ttl` to all three keys. Replaces whatever was there (idempotent).
    async fn project(
        &self,
        auction: &Auction,
        bids: &[BidEnvelope],
        ttl: Duration,
    ) -> Result<(), CoreError>;

    /// Cheap existence probe on the state hash; replaces any process-local
    /// membership set, which would be unreliable across instances.
    async fn state_exists(&self, auction_id: Uuid) -> Result<bool, CoreError>;

    async fn read_state(&self, auction_id: Uuid) -> Result<Option<LiveState>, CoreError>;

    /// Atomic admission of `envelope` against the base-price/increment rules.
    /// Validates and writes head, bid set and state hash without interleaving
    /// with other admissions on the same auction.
    async fn admit_bid(
        &self,
        auction_id: Uuid,
        envelope: &BidEnvelope,
        base_price: Decimal,
        increment_percent: Decimal,
    ) -> Result<Admission, CoreError>;

    /// Atomically pop the head of the bid set and promote the next record,
    /// rewriting the highest and the state hash from it. Returns the new
    /// head, or `None` when the set emptied.
    async fn remove_head(&self, auction_id: Uuid) -> Result<Option<BidEnvelope>, CoreError>;

    /// Up to `limit` bid envelopes, highest amount first
    async fn top_bids(&self, auction_id: Uuid, limit: usize)
        -> Result<Vec<BidEnvelope>, CoreError>;

    /// Every bid envelope currently in the set, highest first; the closer
    /// uses this to repair durable appends lost to a crash
    async fn all_bids(&self, auction_id: Uuid) -> Result<Vec<BidEnvelope>, CoreError>;

    async fn bid_count(&self, auction_id: Uuid) -> Result<u64, CoreError>;

    async fn current_highest(&self, auction_id: Uuid) -> Result<Decimal, CoreError>;

    /// Tear down all keys for an auction
    async fn remove_auction(&self, auction_id: Uuid) -> Result<(), CoreError>;

    async fn ping(&self) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_key_schema_strings() {
        let id = Uuid::nil();
        assert_eq!(
            state_key(id),
            "auction:00000000-0000-0000-0000-000000000000:state"
        );
        assert_eq!(
            highest_key(id),
            "auction:00000000-0000-0000-0000-000000000000:highest"
        );
        assert_eq!(
            bids_key(id),
            "auction:00000000-0000-0000-0000-000000000000:bids"
        );
    }

    #[test]
    fn test_format_amount_pads_two_decimals() {
        assert_eq!(format_amount(dec!(8500)), "8500.00");
        assert_eq!(format_amount(dec!(9350.5)), "9350.50");
        assert_eq!(format_amount(dec!(10999.99)), "10999.99");
    }
}

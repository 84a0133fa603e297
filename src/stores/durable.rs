//! Durable Store Capabilities
//!
//! One capability interface per entity kind, plus the explicit transaction
//! boundaries the lifecycle scheduler relies on. The relational store owns
//! the durable record of every entity; atomicity is entity-local except
//! where a combo operation says otherwise.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Auction, AuctionStatus, Bid, Item, Payment};

#[async_trait]
pub trait AuctionStore: Send + Sync {
    async fn get_auction(&self, id: Uuid) -> Result<Option<Auction>, CoreError>;

    async fn list_by_status(&self, status: AuctionStatus) -> Result<Vec<Auction>, CoreError>;

    /// Upsert, last-write-wins; concurrent writers are serialized by the
    /// underlying engine.
    async fn save_auction(&self, auction: &Auction) -> Result<(), CoreError>;
}

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_item(&self, id: Uuid) -> Result<Option<Item>, CoreError>;
}

#[async_trait]
pub trait BidStore: Send + Sync {
    /// Insert only; an existing bid id is left untouched so replays after a
    /// partial failure stay idempotent.
    async fn append_bid(&self, bid: &Bid) -> Result<(), CoreError>;

    async fn list_bids_desc_by_time(
        &self,
        auction_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Bid>, CoreError>;

    async fn top_bid(&self, auction_id: Uuid) -> Result<Option<Bid>, CoreError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn save_payment(&self, payment: &Payment) -> Result<(), CoreError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, CoreError>;

    /// Pending guarantee obligations across all auctions; the scheduler scans
    /// these for deadline timeouts.
    async fn list_pending_guarantee_payments(&self) -> Result<Vec<Payment>, CoreError>;

    /// Flip PENDING to SUCCESS. Returns the updated row, or `None` when the
    /// payment was not pending (a concurrent transition won).
    async fn mark_payment_succeeded(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Payment>, CoreError>;
}

/// Read-only lookup of bidder display names from the host's user records.
/// The core never writes these.
#[async_trait]
pub trait BidderDirectory: Send + Sync {
    async fn display_name(&self, bidder_id: Uuid) -> Result<Option<String>, CoreError>;
}

/// Transaction boundaries the lifecycle scheduler requires.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Close a LIVE auction with a winner: status, winner and head plus the
    /// guarantee payment row commit together. Guarded on `status = live`;
    /// returns `false` when another scheduler instance already closed it.
    async fn complete_with_guarantee(
        &self,
        auction_id: Uuid,
        winner_id: Uuid,
        winning_bid: Decimal,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError>;

    /// Flip a PENDING guarantee to FAILED. Returns `false` when the payment
    /// was no longer pending, in which case the caller must not fall back.
    async fn fail_payment(&self, payment_id: Uuid) -> Result<bool, CoreError>;

    /// Rewrite the auction's winner and head after a fallback, inserting the
    /// next guarantee when a new head exists, in one transaction. `None`
    /// clears both fields (no remaining bidders).
    async fn roll_winner(
        &self,
        auction_id: Uuid,
        new_head: Option<(Uuid, Decimal)>,
        next_payment: Option<&Payment>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError>;
}

/// The full durable contract the core runs against.
pub trait DurableStore:
    AuctionStore + ItemStore + BidStore + PaymentStore + BidderDirectory + LifecycleStore
{
}

impl<T> DurableStore for T where
    T: AuctionStore + ItemStore + BidStore + PaymentStore + BidderDirectory + LifecycleStore
{
}

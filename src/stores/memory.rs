//! In-Memory Stores
//!
//! Process-local implementations of both store capabilities. They back the
//! `memory:` connection scheme for local development and give tests the real
//! admission semantics without external services: every live-store operation
//! runs under one lock, which is exactly the atomicity the server-side
//! scripts provide.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    minimum_raise, Auction, AuctionStatus, Bid, BidEnvelope, Item, Payment, PaymentStatus,
    PaymentType,
};

use super::durable::{
    AuctionStore, BidStore, BidderDirectory, ItemStore, LifecycleStore, PaymentStore,
};
use super::live::{Admission, LiveState, LiveStore};

#[derive(Debug, Clone)]
struct LiveEntry {
    status: String,
    item_id: Uuid,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    highest: Decimal,
    highest_bidder: Option<Uuid>,
    // Ordered exactly like the scored set: amount, then serialized record
    bids: BTreeMap<(Decimal, String), BidEnvelope>,
}

/// In-process live store
#[derive(Default)]
pub struct MemoryLiveStore {
    entries: Mutex<HashMap<Uuid, LiveEntry>>,
}

impl MemoryLiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all hot state, as a live-store restart would
    pub fn flush_all(&self) {
        self.entries.lock().clear();
    }
}

#[async_trait]
impl LiveStore for MemoryLiveStore {
    async fn project(
        &self,
        auction: &Auction,
        bids: &[BidEnvelope],
        _ttl: Duration,
    ) -> Result<(), CoreError> {
        let mut entries = self.entries.lock();
        let mut set = BTreeMap::new();
        for bid in bids {
            set.insert((bid.amount, bid.to_json()), bid.clone());
        }
        // Head seeds from the top of the seeded set, falling back to the
        // durable row when the set is empty.
        let head = set.values().next_back().cloned();
        entries.insert(
            auction.id,
            LiveEntry {
                status: auction.status.as_str().to_string(),
                item_id: auction.item_id,
                start_time: auction.start_time,
                end_time: auction.end_time,
                highest: head
                    .as_ref()
                    .map(|b| b.amount)
                    .or(auction.current_highest_bid)
                    .unwrap_or(Decimal::ZERO),
                highest_bidder: head.map(|b| b.bidder_id),
                bids: set,
            },
        );
        Ok(())
    }

    async fn state_exists(&self, auction_id: Uuid) -> Result<bool, CoreError> {
        Ok(self.entries.lock().contains_key(&auction_id))
    }

    async fn read_state(&self, auction_id: Uuid) -> Result<Option<LiveState>, CoreError> {
        Ok(self.entries.lock().get(&auction_id).map(|e| LiveState {
            status: e.status.clone(),
            item_id: e.item_id,
            start_time: e.start_time,
            end_time: e.end_time,
            highest_bid: e.highest,
            highest_bidder: e.highest_bidder,
        }))
    }

    async fn admit_bid(
        &self,
        auction_id: Uuid,
        envelope: &BidEnvelope,
        base_price: Decimal,
        increment_percent: Decimal,
    ) -> Result<Admission, CoreError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&auction_id)
            .ok_or(CoreError::NotFound("live auction state"))?;

        if entry.highest_bidder == Some(envelope.bidder_id) {
            return Ok(Admission::SelfOutbid);
        }
        if entry.highest.is_zero() {
            if envelope.amount < base_price {
                return Ok(Admission::BelowBase {
                    required_base: base_price,
                });
            }
        } else {
            let minimum_required = minimum_raise(entry.highest, increment_percent);
            if envelope.amount < minimum_required {
                return Ok(Admission::BelowIncrement {
                    current_highest: entry.highest,
                    minimum_required,
                });
            }
        }

        entry.highest = envelope.amount;
        entry.highest_bidder = Some(envelope.bidder_id);
        entry
            .bids
            .insert((envelope.amount, envelope.to_json()), envelope.clone());
        Ok(Admission::Accepted)
    }

    async fn remove_head(&self, auction_id: Uuid) -> Result<Option<BidEnvelope>, CoreError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&auction_id)
            .ok_or(CoreError::NotFound("live auction state"))?;

        if let Some(top_key) = entry.bids.keys().next_back().cloned() {
            entry.bids.remove(&top_key);
        }
        match entry.bids.values().next_back().cloned() {
            Some(head) => {
                entry.highest = head.amount;
                entry.highest_bidder = Some(head.bidder_id);
                Ok(Some(head))
            }
            None => {
                entry.highest = Decimal::ZERO;
                entry.highest_bidder = None;
                Ok(None)
            }
        }
    }

    async fn top_bids(
        &self,
        auction_id: Uuid,
        limit: usize,
    ) -> Result<Vec<BidEnvelope>, CoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&auction_id)
            .map(|e| e.bids.values().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn all_bids(&self, auction_id: Uuid) -> Result<Vec<BidEnvelope>, CoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&auction_id)
            .map(|e| e.bids.values().rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn bid_count(&self, auction_id: Uuid) -> Result<u64, CoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&auction_id)
            .map(|e| e.bids.len() as u64)
            .unwrap_or(0))
    }

    async fn current_highest(&self, auction_id: Uuid) -> Result<Decimal, CoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&auction_id)
            .map(|e| e.highest)
            .unwrap_or(Decimal::ZERO))
    }

    async fn remove_auction(&self, auction_id: Uuid) -> Result<(), CoreError> {
        self.entries.lock().remove(&auction_id);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// In-process durable store
#[derive(Default)]
pub struct MemoryDurableStore {
    auctions: Mutex<HashMap<Uuid, Auction>>,
    items: Mutex<HashMap<Uuid, Item>>,
    bids: Mutex<Vec<Bid>>,
    payments: Mutex<HashMap<Uuid, Payment>>,
    names: Mutex<HashMap<Uuid, String>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: Item) {
        self.items.lock().insert(item.id, item);
    }

    pub fn insert_auction(&self, auction: Auction) {
        self.auctions.lock().insert(auction.id, auction);
    }

    pub fn set_display_name(&self, bidder_id: Uuid, name: impl Into<String>) {
        self.names.lock().insert(bidder_id, name.into());
    }
}

#[async_trait]
impl AuctionStore for MemoryDurableStore {
    async fn get_auction(&self, id: Uuid) -> Result<Option<Auction>, CoreError> {
        Ok(self.auctions.lock().get(&id).cloned())
    }

    async fn list_by_status(&self, status: AuctionStatus) -> Result<Vec<Auction>, CoreError> {
        let mut list: Vec<Auction> = self
            .auctions
            .lock()
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        list.sort_by_key(|a| a.end_time);
        Ok(list)
    }

    async fn save_auction(&self, auction: &Auction) -> Result<(), CoreError> {
        self.auctions.lock().insert(auction.id, auction.clone());
        Ok(())
    }
}

#[async_trait]
impl ItemStore for MemoryDurableStore {
    async fn get_item(&self, id: Uuid) -> Result<Option<Item>, CoreError> {
        Ok(self.items.lock().get(&id).cloned())
    }
}

#[async_trait]
impl BidStore for MemoryDurableStore {
    async fn append_bid(&self, bid: &Bid) -> Result<(), CoreError> {
        let mut bids = self.bids.lock();
        if !bids.iter().any(|b| b.id == bid.id) {
            bids.push(bid.clone());
        }
        Ok(())
    }

    async fn list_bids_desc_by_time(
        &self,
        auction_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Bid>, CoreError> {
        let mut list: Vec<Bid> = self
            .bids
            .lock()
            .iter()
            .filter(|b| b.auction_id == auction_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = limit {
            list.truncate(limit.max(0) as usize);
        }
        Ok(list)
    }

    async fn top_bid(&self, auction_id: Uuid) -> Result<Option<Bid>, CoreError> {
        Ok(self
            .bids
            .lock()
            .iter()
            .filter(|b| b.auction_id == auction_id)
            .max_by_key(|b| b.amount)
            .cloned())
    }
}

#[async_trait]
impl PaymentStore for MemoryDurableStore {
    async fn save_payment(&self, payment: &Payment) -> Result<(), CoreError> {
        self.payments.lock().insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, CoreError> {
        Ok(self.payments.lock().get(&id).cloned())
    }

    async fn list_pending_guarantee_payments(&self) -> Result<Vec<Payment>, CoreError> {
        let mut list: Vec<Payment> = self
            .payments
            .lock()
            .values()
            .filter(|p| p.payment_type == PaymentType::Guarantee && p.status == PaymentStatus::Pending)
            .cloned()
            .collect();
        list.sort_by_key(|p| p.due_by);
        Ok(list)
    }

    async fn mark_payment_succeeded(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Payment>, CoreError> {
        let mut payments = self.payments.lock();
        match payments.get_mut(&id) {
            Some(p) if p.status == PaymentStatus::Pending => {
                p.status = PaymentStatus::Success;
                p.paid_at = Some(paid_at);
                Ok(Some(p.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl BidderDirectory for MemoryDurableStore {
    async fn display_name(&self, bidder_id: Uuid) -> Result<Option<String>, CoreError> {
        Ok(self.names.lock().get(&bidder_id).cloned())
    }
}

#[async_trait]
impl LifecycleStore for MemoryDurableStore {
    async fn complete_with_guarantee(
        &self,
        auction_id: Uuid,
        winner_id: Uuid,
        winning_bid: Decimal,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut auctions = self.auctions.lock();
        let auction = auctions
            .get_mut(&auction_id)
            .ok_or(CoreError::NotFound("auction"))?;
        if auction.status != AuctionStatus::Live {
            return Ok(false);
        }
        auction.status = AuctionStatus::Completed;
        auction.winner_id = Some(winner_id);
        auction.current_highest_bid = Some(winning_bid);
        auction.updated_at = Some(now);
        drop(auctions);

        self.payments.lock().insert(payment.id, payment.clone());
        Ok(true)
    }

    async fn fail_payment(&self, payment_id: Uuid) -> Result<bool, CoreError> {
        let mut payments = self.payments.lock();
        match payments.get_mut(&payment_id) {
            Some(p) if p.status == PaymentStatus::Pending => {
                p.status = PaymentStatus::Failed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn roll_winner(
        &self,
        auction_id: Uuid,
        new_head: Option<(Uuid, Decimal)>,
        next_payment: Option<&Payment>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut auctions = self.auctions.lock();
        let auction = auctions
            .get_mut(&auction_id)
            .ok_or(CoreError::NotFound("auction"))?;
        match new_head {
            Some((bidder, amount)) => {
                auction.winner_id = Some(bidder);
                auction.current_highest_bid = Some(amount);
            }
            None => {
                auction.winner_id = None;
                auction.current_highest_bid = None;
            }
        }
        auction.updated_at = Some(now);
        drop(auctions);

        if let Some(payment) = next_payment {
            self.payments.lock().insert(payment.id, payment.clone());
        }
        Ok(())
    }
}

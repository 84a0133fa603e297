//! Lifecycle Scheduler
//!
//! Periodic driver of every time-based auction transition: activation,
//! close, guarantee-payment timeout and winner fallback. Each tick walks the
//! durable store and repairs the live projection where it is missing, so a
//! live-store restart loses no accepted bid. A failing auction is logged and
//! skipped; it must not stall the tick.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::models::{Auction, AuctionEvent, AuctionStatus, Bid, BidEnvelope, Payment};
use crate::services::bids::BidEngine;
use crate::services::broadcast::BroadcastHub;
use crate::settings::Settings;
use crate::stores::{DurableStore, LiveStore};

/// Time-driven auction state machine
pub struct LifecycleScheduler {
    store: Arc<dyn DurableStore>,
    live: Arc<dyn LiveStore>,
    engine: Arc<BidEngine>,
    hub: Arc<BroadcastHub>,
    settings: Settings,
}

impl LifecycleScheduler {
    pub fn new(
        store: Arc<dyn DurableStore>,
        live: Arc<dyn LiveStore>,
        engine: Arc<BidEngine>,
        hub: Arc<BroadcastHub>,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            live,
            engine,
            hub,
            settings,
        }
    }

    /// Periodic loop; returns when `shutdown` flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            tick_ms = self.settings.scheduler_tick_ms,
            "lifecycle scheduler running"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.tick(Utc::now()).await {
                        warn!(%err, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("lifecycle scheduler stopping");
                    break;
                }
            }
        }
    }

    /// One tick: activate due auctions, close ended ones, fail out overdue
    /// guarantees. Replay-safe: every transition is guarded on the state it
    /// leaves.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.activate_pending(now).await?;
        self.close_ended(now).await?;
        self.expire_payments(now).await?;
        Ok(())
    }

    // ---- phase (a): PENDING -> LIVE ----

    async fn activate_pending(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for auction in self.store.list_by_status(AuctionStatus::Pending).await? {
            if auction.start_time > now {
                continue;
            }
            let auction_id = auction.id;
            if let Err(err) = self.activate(auction, now).await {
                warn!(%auction_id, %err, "activation failed; will retry next tick");
            }
        }
        Ok(())
    }

    async fn activate(&self, mut auction: Auction, now: DateTime<Utc>) -> Result<(), CoreError> {
        auction.status = AuctionStatus::Live;
        auction.updated_at = Some(now);
        self.store.save_auction(&auction).await?;
        self.ensure_projected(&auction, now).await?;

        info!(auction_id = %auction.id, end_time = %auction.end_time, "auction live");
        self.hub.publish_event(AuctionEvent::AuctionStarted {
            auction_id: auction.id,
            end_time: auction.end_time,
        });
        Ok(())
    }

    /// Project the auction into the live store unless it already is. The
    /// existence probe runs against the store itself, so concurrent
    /// scheduler instances cannot double-seed.
    async fn ensure_projected(
        &self,
        auction: &Auction,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        if self.live.state_exists(auction.id).await? {
            return Ok(false);
        }
        let bids = self.store.list_bids_desc_by_time(auction.id, None).await?;
        let envelopes: Vec<BidEnvelope> = bids.iter().map(BidEnvelope::from).collect();
        let ttl_seconds = (auction.end_time + self.settings.ttl_grace() - now)
            .num_seconds()
            .max(60) as u64;
        self.live
            .project(auction, &envelopes, StdDuration::from_secs(ttl_seconds))
            .await?;
        debug!(auction_id = %auction.id, seeded_bids = envelopes.len(), "live state projected");
        Ok(true)
    }

    // ---- phase (b): LIVE -> COMPLETED ----

    async fn close_ended(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for auction in self.store.list_by_status(AuctionStatus::Live).await? {
            let auction_id = auction.id;
            if !auction.has_ended(now) {
                // still running: repair hot state lost to a live-store restart
                if let Err(err) = self.ensure_projected(&auction, now).await {
                    warn!(%auction_id, %err, "projection repair failed");
                }
                continue;
            }
            if let Err(err) = self.close(auction, now).await {
                warn!(%auction_id, %err, "close failed; will retry next tick");
            }
        }
        Ok(())
    }

    async fn close(&self, auction: Auction, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.ensure_projected(&auction, now).await?;
        self.reconcile_durable_bids(&auction).await?;

        let state = self.live.read_state(auction.id).await?;
        let (highest, head_bidder) = state
            .map(|s| (s.highest_bid, s.highest_bidder))
            .unwrap_or((rust_decimal::Decimal::ZERO, None));

        match head_bidder {
            Some(winner_id) if highest > rust_decimal::Decimal::ZERO => {
                let payment = Payment::guarantee(
                    auction.id,
                    winner_id,
                    highest,
                    now,
                    self.settings.payment_window(),
                );
                let closed = self
                    .store
                    .complete_with_guarantee(auction.id, winner_id, highest, &payment, now)
                    .await?;
                if !closed {
                    debug!(auction_id = %auction.id, "already closed by a concurrent tick");
                    return Ok(());
                }
                info!(
                    auction_id = %auction.id,
                    %winner_id,
                    winning_bid = %highest,
                    guarantee = %payment.amount,
                    "auction completed with winner"
                );
                self.hub.publish_event(AuctionEvent::AuctionEnded {
                    auction_id: auction.id,
                    winner_id,
                    winning_bid: highest,
                    guarantee_amount: payment.amount,
                    payment_due_by: payment.due_by,
                });
            }
            _ => {
                let mut updated = auction;
                updated.status = AuctionStatus::Completed;
                updated.updated_at = Some(now);
                self.store.save_auction(&updated).await?;
                self.live.remove_auction(updated.id).await?;
                info!(auction_id = %updated.id, "auction completed without bids");
                self.hub.publish_event(AuctionEvent::AuctionEndedNoBids {
                    auction_id: updated.id,
                });
            }
        }
        Ok(())
    }

    /// Append any live bid the durable store is missing. Covers admissions
    /// whose durable write was lost to a crash; the live set is
    /// authoritative for accepted bids.
    async fn reconcile_durable_bids(&self, auction: &Auction) -> Result<(), CoreError> {
        let live_bids = self.live.all_bids(auction.id).await?;
        if live_bids.is_empty() {
            return Ok(());
        }
        let durable: HashSet<_> = self
            .store
            .list_bids_desc_by_time(auction.id, None)
            .await?
            .iter()
            .map(|b| b.id)
            .collect();
        for envelope in live_bids {
            if durable.contains(&envelope.bid_id) {
                continue;
            }
            let bid = Bid {
                id: envelope.bid_id,
                auction_id: auction.id,
                bidder_id: envelope.bidder_id,
                amount: envelope.amount,
                created_at: envelope.ts,
            };
            warn!(auction_id = %auction.id, bid_id = %bid.id, "recovering bid missing from durable store");
            self.store.append_bid(&bid).await?;
        }
        Ok(())
    }

    // ---- phase (c): guarantee timeout and fallback ----

    async fn expire_payments(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        for payment in self.store.list_pending_guarantee_payments().await? {
            if payment.due_by >= now {
                continue;
            }
            let payment_id = payment.id;
            if let Err(err) = self.fail_and_roll(payment, now).await {
                warn!(%payment_id, %err, "payment fallback failed; will retry next tick");
            }
        }
        Ok(())
    }

    async fn fail_and_roll(&self, payment: Payment, now: DateTime<Utc>) -> Result<(), CoreError> {
        // Guarded flip: a payment that settled concurrently wins and this
        // whole fallback becomes a no-op.
        if !self.store.fail_payment(payment.id).await? {
            debug!(payment_id = %payment.id, "payment no longer pending; skipping fallback");
            return Ok(());
        }

        // The live set normally outlives the payment window; rebuild it from
        // the durable record if the store restarted in between.
        if let Some(auction) = self.store.get_auction(payment.auction_id).await? {
            self.ensure_projected(&auction, now).await?;
        }

        match self.engine.remove_head(payment.auction_id).await? {
            Some(head) => {
                let next = Payment::guarantee(
                    payment.auction_id,
                    head.bidder_id,
                    head.amount,
                    now,
                    self.settings.payment_window(),
                );
                self.store
                    .roll_winner(
                        payment.auction_id,
                        Some((head.bidder_id, head.amount)),
                        Some(&next),
                        now,
                    )
                    .await?;
                info!(
                    auction_id = %payment.auction_id,
                    previous_bidder = %payment.bidder_id,
                    new_winner = %head.bidder_id,
                    new_winning_bid = %head.amount,
                    "guarantee defaulted; winner rolled forward"
                );
                self.hub.publish_event(AuctionEvent::PaymentFallback {
                    auction_id: payment.auction_id,
                    previous_bidder: payment.bidder_id,
                    new_winner_id: head.bidder_id,
                    new_winning_bid: head.amount,
                    guarantee_amount: next.amount,
                    payment_due_by: next.due_by,
                });
            }
            None => {
                self.store
                    .roll_winner(payment.auction_id, None, None, now)
                    .await?;
                self.live.remove_auction(payment.auction_id).await?;
                info!(
                    auction_id = %payment.auction_id,
                    previous_bidder = %payment.bidder_id,
                    "guarantee defaulted with no remaining bidders"
                );
                self.hub.publish_event(AuctionEvent::AuctionNoWinner {
                    auction_id: payment.auction_id,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, PaymentStatus};
    use crate::stores::{
        AuctionStore, BidStore, MemoryDurableStore, MemoryLiveStore, PaymentStore,
    };
    use chrono::Duration;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        scheduler: LifecycleScheduler,
        engine: Arc<BidEngine>,
        store: Arc<MemoryDurableStore>,
        live: Arc<MemoryLiveStore>,
        hub: Arc<BroadcastHub>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryDurableStore::new());
        let live = Arc::new(MemoryLiveStore::new());
        let hub = Arc::new(BroadcastHub::default());
        let engine = Arc::new(BidEngine::new(live.clone(), store.clone(), hub.clone()));
        let scheduler = LifecycleScheduler::new(
            store.clone(),
            live.clone(),
            engine.clone(),
            hub.clone(),
            Settings::default(),
        );
        Fixture {
            scheduler,
            engine,
            store,
            live,
            hub,
        }
    }

    fn seed_auction(
        store: &MemoryDurableStore,
        base_price: Decimal,
        now: DateTime<Utc>,
        window: (Duration, Duration),
    ) -> Auction {
        let item = Item {
            id: Uuid::now_v7(),
            base_price,
            created_at: now,
        };
        let auction = Auction {
            id: Uuid::now_v7(),
            item_id: item.id,
            start_time: now + window.0,
            end_time: now + window.1,
            status: AuctionStatus::Pending,
            min_increment_percent: dec!(10.00),
            current_highest_bid: None,
            winner_id: None,
            created_at: now,
            updated_at: None,
        };
        store.insert_item(item);
        store.insert_auction(auction.clone());
        auction
    }

    #[tokio::test]
    async fn test_activation_projects_live_state() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(100.00),
            now,
            (Duration::minutes(-1), Duration::hours(1)),
        );

        f.scheduler.tick(now).await.unwrap();

        let stored = f.store.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuctionStatus::Live);
        assert!(f.live.state_exists(auction.id).await.unwrap());

        // second tick is a no-op
        f.scheduler.tick(now).await.unwrap();
        assert_eq!(
            f.store.get_auction(auction.id).await.unwrap().unwrap().status,
            AuctionStatus::Live
        );
    }

    #[tokio::test]
    async fn test_future_auction_stays_pending() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(100.00),
            now,
            (Duration::minutes(10), Duration::hours(1)),
        );

        f.scheduler.tick(now).await.unwrap();
        assert_eq!(
            f.store.get_auction(auction.id).await.unwrap().unwrap().status,
            AuctionStatus::Pending
        );
        assert!(!f.live.state_exists(auction.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_close_with_winner_creates_guarantee() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(8500.00),
            now,
            (Duration::minutes(-30), Duration::minutes(30)),
        );
        f.scheduler.tick(now).await.unwrap();

        let b1 = Uuid::now_v7();
        let b2 = Uuid::now_v7();
        f.engine.place_bid(auction.id, b1, dec!(8500.00)).await.unwrap();
        f.engine.place_bid(auction.id, b2, dec!(9350.00)).await.unwrap();
        f.engine.place_bid(auction.id, b1, dec!(10285.00)).await.unwrap();

        let close_time = auction.end_time + Duration::seconds(1);
        f.scheduler.tick(close_time).await.unwrap();

        let closed = f.store.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(closed.status, AuctionStatus::Completed);
        assert_eq!(closed.winner_id, Some(b1));
        assert_eq!(closed.current_highest_bid, Some(dec!(10285.00)));

        let payments = f.store.list_pending_guarantee_payments().await.unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].bidder_id, b1);
        assert_eq!(payments[0].amount, dec!(5142.50));
        assert_eq!(payments[0].due_by, close_time + Duration::minutes(5));

        // replay-safe: a second close tick changes nothing
        f.scheduler.tick(close_time + Duration::seconds(2)).await.unwrap();
        assert_eq!(f.store.list_pending_guarantee_payments().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_without_bids_tears_down() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(100.00),
            now,
            (Duration::minutes(-30), Duration::minutes(-1)),
        );

        let mut events = f.hub.subscribe(crate::services::broadcast::GLOBAL_TOPIC);
        f.scheduler.tick(now).await.unwrap();

        let closed = f.store.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(closed.status, AuctionStatus::Completed);
        assert_eq!(closed.winner_id, None);
        assert!(!f.live.state_exists(auction.id).await.unwrap());

        // AUCTION_STARTED then AUCTION_ENDED_NO_BIDS
        assert!(matches!(
            events.recv().await.unwrap(),
            AuctionEvent::AuctionStarted { .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            AuctionEvent::AuctionEndedNoBids { .. }
        ));
    }

    #[tokio::test]
    async fn test_payment_timeout_rolls_winner_forward() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(50000.00),
            now,
            (Duration::minutes(-30), Duration::minutes(10)),
        );
        f.scheduler.tick(now).await.unwrap();

        let x = Uuid::now_v7();
        let y = Uuid::now_v7();
        f.engine.place_bid(auction.id, x, dec!(50000.00)).await.unwrap();
        f.engine.place_bid(auction.id, y, dec!(55000.00)).await.unwrap();

        let close_time = auction.end_time + Duration::seconds(1);
        f.scheduler.tick(close_time).await.unwrap();

        let first_payment = f.store.list_pending_guarantee_payments().await.unwrap()[0].clone();
        assert_eq!(first_payment.bidder_id, y);
        assert_eq!(first_payment.amount, dec!(27500.00));

        let mut events = f.hub.subscribe(crate::services::broadcast::GLOBAL_TOPIC);

        // Y never pays; past the deadline the win rolls to X
        let after_deadline = first_payment.due_by + Duration::seconds(1);
        f.scheduler.tick(after_deadline).await.unwrap();

        let failed = f.store.get_payment(first_payment.id).await.unwrap().unwrap();
        assert_eq!(failed.status, PaymentStatus::Failed);

        let rolled = f.store.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(rolled.winner_id, Some(x));
        assert_eq!(rolled.current_highest_bid, Some(dec!(50000.00)));

        let pending = f.store.list_pending_guarantee_payments().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].bidder_id, x);
        assert_eq!(pending[0].amount, dec!(25000.00));
        assert_eq!(pending[0].due_by, after_deadline + Duration::minutes(5));

        match events.recv().await.unwrap() {
            AuctionEvent::PaymentFallback {
                previous_bidder,
                new_winner_id,
                new_winning_bid,
                ..
            } => {
                assert_eq!(previous_bidder, y);
                assert_eq!(new_winner_id, x);
                assert_eq!(new_winning_bid, dec!(50000.00));
            }
            other => panic!("expected PaymentFallback, got {other:?}"),
        }

        // the defaulted bidder's bid remains in the durable record
        let all = f.store.list_bids_desc_by_time(auction.id, None).await.unwrap();
        assert!(all.iter().any(|b| b.bidder_id == y));
    }

    #[tokio::test]
    async fn test_no_winner_cascade() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(50000.00),
            now,
            (Duration::minutes(-30), Duration::minutes(10)),
        );
        f.scheduler.tick(now).await.unwrap();

        let x = Uuid::now_v7();
        f.engine.place_bid(auction.id, x, dec!(50000.00)).await.unwrap();

        let close_time = auction.end_time + Duration::seconds(1);
        f.scheduler.tick(close_time).await.unwrap();
        let payment = f.store.list_pending_guarantee_payments().await.unwrap()[0].clone();

        let mut events = f.hub.subscribe(crate::services::broadcast::GLOBAL_TOPIC);
        f.scheduler.tick(payment.due_by + Duration::seconds(1)).await.unwrap();

        let cleared = f.store.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(cleared.winner_id, None);
        assert_eq!(cleared.current_highest_bid, None);
        assert!(!f.live.state_exists(auction.id).await.unwrap());
        assert!(f.store.list_pending_guarantee_payments().await.unwrap().is_empty());

        assert!(matches!(
            events.recv().await.unwrap(),
            AuctionEvent::AuctionNoWinner { .. }
        ));
    }

    #[tokio::test]
    async fn test_crash_recovery_reprojects_from_durable_bids() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(8500.00),
            now,
            (Duration::minutes(-30), Duration::hours(1)),
        );
        f.scheduler.tick(now).await.unwrap();

        let b1 = Uuid::now_v7();
        let b2 = Uuid::now_v7();
        f.engine.place_bid(auction.id, b1, dec!(8500.00)).await.unwrap();
        f.engine.place_bid(auction.id, b2, dec!(9350.00)).await.unwrap();

        // live store restart wipes all hot state
        f.live.flush_all();
        assert!(!f.live.state_exists(auction.id).await.unwrap());

        f.scheduler.tick(now + Duration::seconds(2)).await.unwrap();

        assert!(f.live.state_exists(auction.id).await.unwrap());
        assert_eq!(f.engine.current_highest(auction.id).await.unwrap(), dec!(9350.00));
        assert_eq!(f.engine.highest_bidder(auction.id).await.unwrap(), Some(b2));
        assert_eq!(f.engine.bid_count(auction.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_payment_success_beats_fallback() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(100.00),
            now,
            (Duration::minutes(-30), Duration::minutes(10)),
        );
        f.scheduler.tick(now).await.unwrap();

        let bidder = Uuid::now_v7();
        f.engine.place_bid(auction.id, bidder, dec!(100.00)).await.unwrap();
        f.scheduler.tick(auction.end_time + Duration::seconds(1)).await.unwrap();

        let payment = f.store.list_pending_guarantee_payments().await.unwrap()[0].clone();

        // payment settles just before the scheduler notices the deadline
        f.store
            .mark_payment_succeeded(payment.id, payment.due_by)
            .await
            .unwrap()
            .unwrap();

        f.scheduler.tick(payment.due_by + Duration::seconds(1)).await.unwrap();

        // the success stands; the winner was not rolled
        let settled = f.store.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(settled.status, PaymentStatus::Success);
        assert_eq!(
            f.store.get_auction(auction.id).await.unwrap().unwrap().winner_id,
            Some(bidder)
        );
    }

    #[tokio::test]
    async fn test_close_recovers_bid_missing_from_durable_store() {
        let f = fixture();
        let now = Utc::now();
        let auction = seed_auction(
            &f.store,
            dec!(100.00),
            now,
            (Duration::minutes(-30), Duration::minutes(10)),
        );
        f.scheduler.tick(now).await.unwrap();

        let bidder = Uuid::now_v7();
        let accepted = f.engine.place_bid(auction.id, bidder, dec!(100.00)).await.unwrap();

        // simulate an admission whose durable append was lost: rebuild the
        // durable store without the bid row
        let fresh = Arc::new(MemoryDurableStore::new());
        fresh.insert_item(Item {
            id: auction.item_id,
            base_price: dec!(100.00),
            created_at: now,
        });
        let mut live_auction = auction.clone();
        live_auction.status = AuctionStatus::Live;
        fresh.insert_auction(live_auction);

        let scheduler = LifecycleScheduler::new(
            fresh.clone(),
            f.live.clone(),
            f.engine.clone(),
            f.hub.clone(),
            Settings::default(),
        );
        scheduler.tick(auction.end_time + Duration::seconds(1)).await.unwrap();

        let recovered = fresh.list_bids_desc_by_time(auction.id, None).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, accepted.id);
        let closed = fresh.get_auction(auction.id).await.unwrap().unwrap();
        assert_eq!(closed.winner_id, Some(bidder));
    }
}

//! Bid Engine
//!
//! Admission of bids against the live auction head. Pre-checks fail fast on
//! obviously dead requests; the authoritative decision is the atomic script
//! on the live store, which re-checks the head without interleaving with
//! other admissions on the same auction. Durable writes happen only after
//! admission and never gate it.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BidRejection, CoreError};
use crate::models::{minimum_raise, AuctionEvent, Bid, BidEnvelope};
use crate::services::broadcast::BroadcastHub;
use crate::stores::{Admission, DurableStore, LiveStore};

/// Bid admission engine
pub struct BidEngine {
    live: Arc<dyn LiveStore>,
    store: Arc<dyn DurableStore>,
    hub: Arc<BroadcastHub>,
}

impl BidEngine {
    pub fn new(
        live: Arc<dyn LiveStore>,
        store: Arc<dyn DurableStore>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self { live, store, hub }
    }

    /// Validate and admit a bid. On success the accepted bid is the new
    /// auction head, durably appended and broadcast to subscribers.
    ///
    /// Never retried internally: after an ambiguous network failure the bid
    /// may already be live, so the caller must re-check state instead.
    pub async fn place_bid(
        &self,
        auction_id: Uuid,
        bidder_id: Uuid,
        amount: Decimal,
    ) -> Result<Bid, CoreError> {
        if amount <= Decimal::ZERO {
            return Err(BidRejection::NonPositiveAmount.into());
        }

        // Fail-fast guards against the live snapshot. Races here are safe:
        // the admission script re-checks the head.
        let now = Utc::now();
        let state = self
            .live
            .read_state(auction_id)
            .await?
            .ok_or(BidRejection::AuctionNotActive)?;
        if !state.is_live() {
            return Err(BidRejection::AuctionNotActive.into());
        }
        if now >= state.end_time {
            return Err(BidRejection::AuctionEnded.into());
        }
        if state.highest_bidder == Some(bidder_id) {
            return Err(BidRejection::SelfOutbid.into());
        }

        let auction = self
            .store
            .get_auction(auction_id)
            .await?
            .ok_or(CoreError::NotFound("auction"))?;
        let item = self
            .store
            .get_item(auction.item_id)
            .await?
            .ok_or(CoreError::NotFound("item"))?;

        // fixed two-decimal scale everywhere downstream
        let mut amount = amount.round_dp(2);
        amount.rescale(2);
        let bid = Bid::new(auction_id, bidder_id, amount, now);
        let envelope = BidEnvelope::from(&bid);

        let admission = self
            .live
            .admit_bid(
                auction_id,
                &envelope,
                item.base_price,
                auction.min_increment_percent,
            )
            .await?;

        match admission {
            Admission::Accepted => {}
            Admission::SelfOutbid => return Err(BidRejection::SelfOutbid.into()),
            Admission::BelowBase { required_base } => {
                return Err(BidRejection::BelowBasePrice {
                    amount: bid.amount,
                    required_base,
                }
                .into())
            }
            Admission::BelowIncrement {
                current_highest,
                minimum_required,
            } => {
                return Err(BidRejection::BelowIncrement {
                    current_highest,
                    minimum_required,
                }
                .into())
            }
        }

        debug!(%auction_id, %bidder_id, amount = %bid.amount, "bid admitted");

        // The live store is now authoritative for the head. A durable write
        // failing here is repaired by the closer re-reading the live bid
        // set, so the bidder still gets their acceptance.
        if let Err(err) = self.store.append_bid(&bid).await {
            warn!(%auction_id, bid_id = %bid.id, %err, "durable bid append failed; closer will repair");
        }
        let mut updated = auction;
        updated.current_highest_bid = Some(bid.amount);
        updated.updated_at = Some(now);
        if let Err(err) = self.store.save_auction(&updated).await {
            warn!(%auction_id, %err, "durable head update failed; closer will repair");
        }

        self.hub.publish_event(AuctionEvent::new_bid(
            auction_id,
            &envelope,
            minimum_raise(bid.amount, updated.min_increment_percent),
        ));

        Ok(bid)
    }

    /// Pop the head and promote the next bidder; used by the lifecycle
    /// scheduler when a guarantee payment defaults. The popped bid stays in
    /// the durable record as a historical bid that did not win.
    pub async fn remove_head(&self, auction_id: Uuid) -> Result<Option<BidEnvelope>, CoreError> {
        self.live.remove_head(auction_id).await
    }

    pub async fn current_highest(&self, auction_id: Uuid) -> Result<Decimal, CoreError> {
        self.live.current_highest(auction_id).await
    }

    pub async fn highest_bidder(&self, auction_id: Uuid) -> Result<Option<Uuid>, CoreError> {
        Ok(self
            .live
            .read_state(auction_id)
            .await?
            .and_then(|s| s.highest_bidder))
    }

    pub async fn recent_bids(
        &self,
        auction_id: Uuid,
        limit: usize,
    ) -> Result<Vec<BidEnvelope>, CoreError> {
        self.live.top_bids(auction_id, limit).await
    }

    pub async fn bid_count(&self, auction_id: Uuid) -> Result<u64, CoreError> {
        self.live.bid_count(auction_id).await
    }

    /// Smallest admissible next bid, or zero when the auction has no bids
    pub async fn minimum_next_bid(&self, auction_id: Uuid) -> Result<Decimal, CoreError> {
        let highest = self.live.current_highest(auction_id).await?;
        if highest.is_zero() {
            return Ok(Decimal::ZERO);
        }
        let increment = match self.store.get_auction(auction_id).await? {
            Some(auction) => auction.min_increment_percent,
            None => return Ok(Decimal::ZERO),
        };
        Ok(minimum_raise(highest, increment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Auction, AuctionStatus, Item};
    use crate::stores::live::MockLiveStore;
    use crate::stores::{AuctionStore, BidStore, MemoryDurableStore, MemoryLiveStore};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration as StdDuration;

    struct Fixture {
        engine: BidEngine,
        live: Arc<MemoryLiveStore>,
        store: Arc<MemoryDurableStore>,
        hub: Arc<BroadcastHub>,
        auction: Auction,
    }

    async fn fixture(base_price: Decimal) -> Fixture {
        let live = Arc::new(MemoryLiveStore::new());
        let store = Arc::new(MemoryDurableStore::new());
        let hub = Arc::new(BroadcastHub::default());

        let now = Utc::now();
        let item = Item {
            id: Uuid::now_v7(),
            base_price,
            created_at: now,
        };
        let auction = Auction {
            id: Uuid::now_v7(),
            item_id: item.id,
            start_time: now - Duration::minutes(1),
            end_time: now + Duration::hours(1),
            status: AuctionStatus::Live,
            min_increment_percent: dec!(10.00),
            current_highest_bid: None,
            winner_id: None,
            created_at: now,
            updated_at: None,
        };
        store.insert_item(item);
        store.insert_auction(auction.clone());
        live.project(&auction, &[], StdDuration::from_secs(3600))
            .await
            .unwrap();

        let engine = BidEngine::new(live.clone(), store.clone(), hub.clone());
        Fixture {
            engine,
            live,
            store,
            hub,
            auction,
        }
    }

    fn rejection(result: Result<Bid, CoreError>) -> BidRejection {
        match result {
            Err(CoreError::InvalidBid(rejection)) => rejection,
            other => panic!("expected InvalidBid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_simple_auction_flow() {
        let f = fixture(dec!(8500.00)).await;
        let b1 = Uuid::now_v7();
        let b2 = Uuid::now_v7();

        let first = f.engine.place_bid(f.auction.id, b1, dec!(8500.00)).await.unwrap();
        assert_eq!(first.amount, dec!(8500.00));

        // holder of the head cannot outbid themselves
        let again = rejection(f.engine.place_bid(f.auction.id, b1, dec!(9350.00)).await);
        assert_eq!(again, BidRejection::SelfOutbid);

        f.engine.place_bid(f.auction.id, b2, dec!(9350.00)).await.unwrap();
        f.engine.place_bid(f.auction.id, b1, dec!(10285.00)).await.unwrap();

        assert_eq!(f.engine.current_highest(f.auction.id).await.unwrap(), dec!(10285.00));
        assert_eq!(f.engine.highest_bidder(f.auction.id).await.unwrap(), Some(b1));
        assert_eq!(f.engine.bid_count(f.auction.id).await.unwrap(), 3);

        // durable record followed the live head
        let stored = f.store.get_auction(f.auction.id).await.unwrap().unwrap();
        assert_eq!(stored.current_highest_bid, Some(dec!(10285.00)));
        assert_eq!(
            f.store
                .list_bids_desc_by_time(f.auction.id, None)
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn test_below_increment_message_carries_amounts() {
        let f = fixture(dec!(1000.00)).await;
        f.engine
            .place_bid(f.auction.id, Uuid::now_v7(), dec!(10000.00))
            .await
            .unwrap();

        let rejected = rejection(
            f.engine
                .place_bid(f.auction.id, Uuid::now_v7(), dec!(10999.99))
                .await,
        );
        let message = rejected.to_string();
        assert!(message.contains("10000.00"));
        assert!(message.contains("11000.00"));

        f.engine
            .place_bid(f.auction.id, Uuid::now_v7(), dec!(11000.00))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_bid_below_base_price() {
        let f = fixture(dec!(8500.00)).await;
        let rejected = rejection(
            f.engine
                .place_bid(f.auction.id, Uuid::now_v7(), dec!(8499.99))
                .await,
        );
        assert_eq!(
            rejected,
            BidRejection::BelowBasePrice {
                amount: dec!(8499.99),
                required_base: dec!(8500.00)
            }
        );
    }

    #[tokio::test]
    async fn test_non_positive_amount() {
        let f = fixture(dec!(100.00)).await;
        let rejected = rejection(f.engine.place_bid(f.auction.id, Uuid::now_v7(), dec!(0)).await);
        assert_eq!(rejected, BidRejection::NonPositiveAmount);
    }

    #[tokio::test]
    async fn test_bid_against_missing_live_state() {
        let f = fixture(dec!(100.00)).await;
        f.live.remove_auction(f.auction.id).await.unwrap();
        let rejected = rejection(
            f.engine
                .place_bid(f.auction.id, Uuid::now_v7(), dec!(100.00))
                .await,
        );
        assert_eq!(rejected, BidRejection::AuctionNotActive);
    }

    #[tokio::test]
    async fn test_bid_at_end_time_rejected() {
        let f = fixture(dec!(100.00)).await;
        let mut ended = f.auction.clone();
        ended.end_time = Utc::now() - Duration::milliseconds(1);
        f.live
            .project(&ended, &[], StdDuration::from_secs(3600))
            .await
            .unwrap();

        let rejected = rejection(
            f.engine
                .place_bid(f.auction.id, Uuid::now_v7(), dec!(100.00))
                .await,
        );
        assert_eq!(rejected, BidRejection::AuctionEnded);
    }

    #[tokio::test]
    async fn test_accepted_bid_broadcasts_new_bid_event() {
        let f = fixture(dec!(100.00)).await;
        let mut rx = f.hub.subscribe(&crate::services::broadcast::auction_topic(f.auction.id));

        let bidder = Uuid::now_v7();
        f.engine.place_bid(f.auction.id, bidder, dec!(150.00)).await.unwrap();

        match rx.recv().await.unwrap() {
            AuctionEvent::NewBid {
                bidder_id,
                amount,
                minimum_next_bid,
                ..
            } => {
                assert_eq!(bidder_id, bidder);
                assert_eq!(amount, dec!(150.00));
                assert_eq!(minimum_next_bid, dec!(165.00));
            }
            other => panic!("expected NewBid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_surfaces_without_retry() {
        let mut live = MockLiveStore::new();
        live.expect_read_state().times(1).returning(|_| {
            Err(CoreError::TransientUnavailable("connection reset".to_string()))
        });

        let store = Arc::new(MemoryDurableStore::new());
        let engine = BidEngine::new(Arc::new(live), store, Arc::new(BroadcastHub::default()));

        let result = engine
            .place_bid(Uuid::now_v7(), Uuid::now_v7(), dec!(10.00))
            .await;
        assert!(matches!(result, Err(CoreError::TransientUnavailable(_))));
    }

    #[tokio::test]
    async fn test_minimum_next_bid_read() {
        let f = fixture(dec!(100.00)).await;
        assert_eq!(f.engine.minimum_next_bid(f.auction.id).await.unwrap(), Decimal::ZERO);
        f.engine
            .place_bid(f.auction.id, Uuid::now_v7(), dec!(100.00))
            .await
            .unwrap();
        assert_eq!(
            f.engine.minimum_next_bid(f.auction.id).await.unwrap(),
            dec!(110.00)
        );
    }

    #[tokio::test]
    async fn test_recent_bids_most_recent_first() {
        let f = fixture(dec!(100.00)).await;
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        f.engine.place_bid(f.auction.id, a, dec!(100.00)).await.unwrap();
        f.engine.place_bid(f.auction.id, b, dec!(110.00)).await.unwrap();
        f.engine.place_bid(f.auction.id, a, dec!(121.00)).await.unwrap();

        let recent = f.engine.recent_bids(f.auction.id, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].amount, dec!(121.00));
        assert_eq!(recent[1].amount, dec!(110.00));
    }
}

//! Broadcast Hub
//!
//! Per-auction topic fan-out of state events. Delivery is best-effort: a
//! subscriber joining after an event never sees it, and a slow subscriber
//! may lag out and re-sync through the state endpoints. The hub never
//! mutates auction state.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::AuctionEvent;

/// Cross-auction lifecycle topic
pub const GLOBAL_TOPIC: &str = "auctions/updates";

/// Topic carrying every event for one auction
pub fn auction_topic(auction_id: Uuid) -> String {
    format!("auction/{auction_id}")
}

/// Topic registry over broadcast channels
pub struct BroadcastHub {
    topics: RwLock<HashMap<String, broadcast::Sender<AuctionEvent>>>,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<AuctionEvent> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.clone();
        }
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publish to one topic. Events with no subscribers are dropped.
    pub fn publish(&self, topic: &str, event: AuctionEvent) {
        let delivered = self.sender(topic).send(event).unwrap_or(0);
        debug!(topic, delivered, "event published");
    }

    /// Publish an event to its auction topic, and to the global topic when
    /// it is a lifecycle event.
    pub fn publish_event(&self, event: AuctionEvent) {
        let topic = auction_topic(event.auction_id());
        if event.is_lifecycle() {
            self.publish(GLOBAL_TOPIC, event.clone());
        }
        self.publish(&topic, event);
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<AuctionEvent> {
        self.sender(topic).subscribe()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn no_winner(auction_id: Uuid) -> AuctionEvent {
        AuctionEvent::AuctionNoWinner { auction_id }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let hub = BroadcastHub::default();
        let auction_id = Uuid::now_v7();
        let topic = auction_topic(auction_id);

        let mut rx = hub.subscribe(&topic);
        hub.publish(&topic, no_winner(auction_id));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.auction_id(), auction_id);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let hub = BroadcastHub::default();
        let auction_id = Uuid::now_v7();
        let topic = auction_topic(auction_id);

        hub.publish(&topic, no_winner(auction_id));
        let mut rx = hub.subscribe(&topic);
        hub.publish(&topic, no_winner(auction_id));

        // only the event published after subscribing arrives
        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_events_reach_global_topic() {
        let hub = BroadcastHub::default();
        let auction_id = Uuid::now_v7();

        let mut global = hub.subscribe(GLOBAL_TOPIC);
        let mut local = hub.subscribe(&auction_topic(auction_id));

        hub.publish_event(AuctionEvent::AuctionStarted {
            auction_id,
            end_time: chrono::Utc::now(),
        });
        assert!(global.recv().await.is_ok());
        assert!(local.recv().await.is_ok());

        // bid events stay on the auction topic
        hub.publish_event(AuctionEvent::NewBid {
            auction_id,
            bid_id: Uuid::now_v7(),
            bidder_id: Uuid::now_v7(),
            amount: dec!(100.00),
            ts: chrono::Utc::now(),
            minimum_next_bid: dec!(110.00),
        });
        assert!(local.recv().await.is_ok());
        assert!(global.try_recv().is_err());
    }
}

//! Auction Models
//!
//! The auction entity and its lifecycle states.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An auction over a single item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: Uuid,
    pub item_id: Uuid,

    // Timing
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    // Current state
    pub status: AuctionStatus,
    pub min_increment_percent: Decimal,
    pub current_highest_bid: Option<Decimal>,
    pub winner_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Pending,
    Live,
    Completed,
    Cancelled,
}

impl AuctionStatus {
    /// Database/live-store representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Live => "live",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "live" => Some(Self::Live),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed and Cancelled never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl Auction {
    /// Check if the auction window is open at `now`.
    ///
    /// A bid arriving exactly at `end_time` is already outside the window.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AuctionStatus::Live && now >= self.start_time && now < self.end_time
    }

    /// Check if the auction is past its end time
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }

    /// Seconds until the auction closes, if it is live
    pub fn time_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status == AuctionStatus::Live && now < self.end_time {
            Some((self.end_time - now).num_seconds().max(0))
        } else {
            None
        }
    }

    /// Minimum amount the next bid must reach, or zero when no bid exists yet.
    ///
    /// The increment rule rounds up at two decimal places, so a bid exactly
    /// at the returned amount is accepted.
    pub fn minimum_next_bid(&self) -> Decimal {
        match self.current_highest_bid {
            Some(highest) => minimum_raise(highest, self.min_increment_percent),
            None => Decimal::ZERO,
        }
    }
}

/// Smallest admissible raise over `highest` under a percentage increment rule,
/// rounded up to two decimal places.
pub fn minimum_raise(highest: Decimal, increment_percent: Decimal) -> Decimal {
    let factor = Decimal::ONE + increment_percent / Decimal::from(100);
    (highest * factor).round_dp_with_strategy(2, RoundingStrategy::ToPositiveInfinity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn auction(now: DateTime<Utc>) -> Auction {
        Auction {
            id: Uuid::now_v7(),
            item_id: Uuid::now_v7(),
            start_time: now - Duration::minutes(5),
            end_time: now + Duration::hours(1),
            status: AuctionStatus::Live,
            min_increment_percent: dec!(10.00),
            current_highest_bid: None,
            winner_id: None,
            created_at: now - Duration::hours(1),
            updated_at: None,
        }
    }

    #[test]
    fn test_minimum_raise_rounds_up() {
        assert_eq!(minimum_raise(dec!(8500.00), dec!(10.00)), dec!(9350.00));
        assert_eq!(minimum_raise(dec!(10000.00), dec!(10.00)), dec!(11000.00));
        // 333.33 * 1.1 = 366.663 -> rounds up, never down
        assert_eq!(minimum_raise(dec!(333.33), dec!(10.00)), dec!(366.67));
    }

    #[test]
    fn test_bid_window_excludes_end_time() {
        let now = Utc::now();
        let mut a = auction(now);
        assert!(a.is_open_at(now));
        a.end_time = now;
        assert!(!a.is_open_at(now));
    }

    #[test]
    fn test_minimum_next_bid_zero_without_bids() {
        let now = Utc::now();
        let mut a = auction(now);
        assert_eq!(a.minimum_next_bid(), Decimal::ZERO);
        a.current_highest_bid = Some(dec!(9350.00));
        assert_eq!(a.minimum_next_bid(), dec!(10285.00));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(AuctionStatus::Completed.is_terminal());
        assert!(AuctionStatus::Cancelled.is_terminal());
        assert!(!AuctionStatus::Live.is_terminal());
        assert_eq!(AuctionStatus::parse("live"), Some(AuctionStatus::Live));
        assert_eq!(AuctionStatus::parse("bogus"), None);
    }
}

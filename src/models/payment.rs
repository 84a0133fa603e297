//! Payment Models
//!
//! Guarantee obligations owed by provisional auction winners.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment owed by a bidder for an auction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub auction_id: Uuid,
    pub bidder_id: Uuid,
    pub amount: Decimal,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub due_by: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Guarantee,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guarantee => "guarantee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "guarantee" => Some(Self::Guarantee),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Payment {
    /// Guarantee owed by the provisional winner: half of the winning bid,
    /// due within the payment window.
    pub fn guarantee(
        auction_id: Uuid,
        bidder_id: Uuid,
        winning_bid: Decimal,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            auction_id,
            bidder_id,
            amount: guarantee_amount(winning_bid),
            payment_type: PaymentType::Guarantee,
            status: PaymentStatus::Pending,
            due_by: now + window,
            paid_at: None,
            created_at: now,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && self.due_by < now
    }
}

/// Half of the winning bid, rounded half-up to two decimal places
pub fn guarantee_amount(winning_bid: Decimal) -> Decimal {
    (winning_bid / Decimal::TWO).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

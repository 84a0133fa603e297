//! Postgres Durable Store
//!
//! Relational adapter for the four owned entities plus the read-only bidder
//! directory. Entity operations are single statements; the lifecycle combos
//! wrap their writes in explicit transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    Auction, AuctionStatus, Bid, Item, Payment, PaymentStatus, PaymentType,
};

use super::durable::{
    AuctionStore, BidStore, BidderDirectory, ItemStore, LifecycleStore, PaymentStore,
};

/// Postgres-backed durable store
#[derive(Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    /// Connect with the durable-store deadline applied at acquisition
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_auction(row: &PgRow) -> Result<Auction, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Auction {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: AuctionStatus::parse(&status).ok_or_else(|| sqlx::Error::Decode(
            format!("unknown auction status {status:?}").into(),
        ))?,
        min_increment_percent: row.try_get("min_increment_percent")?,
        current_highest_bid: row.try_get("current_highest_bid")?,
        winner_id: row.try_get("winner_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_bid(row: &PgRow) -> Result<Bid, sqlx::Error> {
    Ok(Bid {
        id: row.try_get("id")?,
        auction_id: row.try_get("auction_id")?,
        bidder_id: row.try_get("bidder_id")?,
        amount: row.try_get("amount")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_payment(row: &PgRow) -> Result<Payment, sqlx::Error> {
    let payment_type: String = row.try_get("payment_type")?;
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: row.try_get("id")?,
        auction_id: row.try_get("auction_id")?,
        bidder_id: row.try_get("bidder_id")?,
        amount: row.try_get("amount")?,
        payment_type: PaymentType::parse(&payment_type).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown payment type {payment_type:?}").into())
        })?,
        status: PaymentStatus::parse(&status).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown payment status {status:?}").into())
        })?,
        due_by: row.try_get("due_by")?,
        paid_at: row.try_get("paid_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const AUCTION_COLUMNS: &str = "id, item_id, start_time, end_time, status, \
     min_increment_percent, current_highest_bid, winner_id, created_at, updated_at";

const PAYMENT_COLUMNS: &str =
    "id, auction_id, bidder_id, amount, payment_type, status, due_by, paid_at, created_at";

#[async_trait]
impl AuctionStore for PgDurableStore {
    async fn get_auction(&self, id: Uuid) -> Result<Option<Auction>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_auction).transpose()?)
    }

    async fn list_by_status(&self, status: AuctionStatus) -> Result<Vec<Auction>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE status = $1 ORDER BY end_time"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_auction)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn save_auction(&self, auction: &Auction) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO auctions (id, item_id, start_time, end_time, status, \
                 min_increment_percent, current_highest_bid, winner_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 current_highest_bid = EXCLUDED.current_highest_bid, \
                 winner_id = EXCLUDED.winner_id, \
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(auction.id)
        .bind(auction.item_id)
        .bind(auction.start_time)
        .bind(auction.end_time)
        .bind(auction.status.as_str())
        .bind(auction.min_increment_percent)
        .bind(auction.current_highest_bid)
        .bind(auction.winner_id)
        .bind(auction.created_at)
        .bind(auction.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for PgDurableStore {
    async fn get_item(&self, id: Uuid) -> Result<Option<Item>, CoreError> {
        let row = sqlx::query("SELECT id, base_price, created_at FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| -> Result<Item, sqlx::Error> {
                Ok(Item {
                    id: r.try_get("id")?,
                    base_price: r.try_get("base_price")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .transpose()?)
    }
}

#[async_trait]
impl BidStore for PgDurableStore {
    async fn append_bid(&self, bid: &Bid) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO bids (id, auction_id, bidder_id, amount, created_at) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
        )
        .bind(bid.id)
        .bind(bid.auction_id)
        .bind(bid.bidder_id)
        .bind(bid.amount)
        .bind(bid.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_bids_desc_by_time(
        &self,
        auction_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<Bid>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, auction_id, bidder_id, amount, created_at FROM bids \
             WHERE auction_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
        )
        .bind(auction_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_bid).collect::<Result<Vec<_>, _>>()?)
    }

    async fn top_bid(&self, auction_id: Uuid) -> Result<Option<Bid>, CoreError> {
        let row = sqlx::query(
            "SELECT id, auction_id, bidder_id, amount, created_at FROM bids \
             WHERE auction_id = $1 ORDER BY amount DESC LIMIT 1",
        )
        .bind(auction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_bid).transpose()?)
    }
}

#[async_trait]
impl PaymentStore for PgDurableStore {
    async fn save_payment(&self, payment: &Payment) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO payments (id, auction_id, bidder_id, amount, payment_type, \
                 status, due_by, paid_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 due_by = EXCLUDED.due_by, \
                 paid_at = EXCLUDED.paid_at",
        )
        .bind(payment.id)
        .bind(payment.auction_id)
        .bind(payment.bidder_id)
        .bind(payment.amount)
        .bind(payment.payment_type.as_str())
        .bind(payment.status.as_str())
        .bind(payment.due_by)
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, CoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_payment).transpose()?)
    }

    async fn list_pending_guarantee_payments(&self) -> Result<Vec<Payment>, CoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE payment_type = 'guarantee' AND status = 'pending' ORDER BY due_by"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_payment)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn mark_payment_succeeded(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<Option<Payment>, CoreError> {
        let row = sqlx::query(&format!(
            "UPDATE payments SET status = 'success', paid_at = $2 \
             WHERE id = $1 AND status = 'pending' RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(id)
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_payment).transpose()?)
    }
}

#[async_trait]
impl BidderDirectory for PgDurableStore {
    async fn display_name(&self, bidder_id: Uuid) -> Result<Option<String>, CoreError> {
        let row = sqlx::query("SELECT display_name FROM users WHERE id = $1")
            .bind(bidder_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.try_get::<String, _>("display_name"))
            .transpose()?)
    }
}

#[async_trait]
impl LifecycleStore for PgDurableStore {
    async fn complete_with_guarantee(
        &self,
        auction_id: Uuid,
        winner_id: Uuid,
        winning_bid: Decimal,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE auctions SET status = 'completed', winner_id = $2, \
                 current_highest_bid = $3, updated_at = $4 \
             WHERE id = $1 AND status = 'live'",
        )
        .bind(auction_id)
        .bind(winner_id)
        .bind(winning_bid)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO payments (id, auction_id, bidder_id, amount, payment_type, \
                 status, due_by, paid_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(payment.id)
        .bind(payment.auction_id)
        .bind(payment.bidder_id)
        .bind(payment.amount)
        .bind(payment.payment_type.as_str())
        .bind(payment.status.as_str())
        .bind(payment.due_by)
        .bind(payment.paid_at)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_payment(&self, payment_id: Uuid) -> Result<bool, CoreError> {
        let updated =
            sqlx::query("UPDATE payments SET status = 'failed' WHERE id = $1 AND status = 'pending'")
                .bind(payment_id)
                .execute(&self.pool)
                .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn roll_winner(
        &self,
        auction_id: Uuid,
        new_head: Option<(Uuid, Decimal)>,
        next_payment: Option<&Payment>,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;

        let (winner_id, winning_bid) = match new_head {
            Some((bidder, amount)) => (Some(bidder), Some(amount)),
            None => (None, None),
        };

        sqlx::query(
            "UPDATE auctions SET winner_id = $2, current_highest_bid = $3, updated_at = $4 \
             WHERE id = $1",
        )
        .bind(auction_id)
        .bind(winner_id)
        .bind(winning_bid)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if let Some(payment) = next_payment {
            sqlx::query(
                "INSERT INTO payments (id, auction_id, bidder_id, amount, payment_type, \
                     status, due_by, paid_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(payment.id)
            .bind(payment.auction_id)
            .bind(payment.bidder_id)
            .bind(payment.amount)
            .bind(payment.payment_type.as_str())
            .bind(payment.status.as_str())
            .bind(payment.due_by)
            .bind(payment.paid_at)
            .bind(payment.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

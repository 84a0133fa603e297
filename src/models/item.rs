//! Item Model
//!
//! Read-only view of a catalogue item. The core only needs the base price,
//! which floors the first bid of an auction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalogue item under auction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub base_price: Decimal,
    pub created_at: DateTime<Utc>,
}

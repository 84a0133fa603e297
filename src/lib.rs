//! BidHouse - Real-Time Auction Core
//!
//! The hot path of an English-auction marketplace for collectibles:
//! - Atomic bid admission under concurrency (base-price floor, percentage
//!   increment rule, self-outbid prevention)
//! - Time-driven lifecycle: activation, close, guarantee-payment timeout
//!   with winner fallback
//! - Dual state homes: a fast live store for the bidding hot path and a
//!   relational store for the durable record
//! - Per-auction topic fan-out of state events to subscribers
//!
//! # Architecture
//!
//! The crate follows a layered architecture:
//! - **Models**: Plain record types and wire envelopes
//! - **Stores**: Repository-shaped capability interfaces with Postgres,
//!   Redis, and in-memory adapters
//! - **Services**: Bid engine, lifecycle scheduler, payment settlement,
//!   broadcast hub
//! - **Handlers**: HTTP/WebSocket request facade

pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod settings;
pub mod stores;

pub use error::{BidRejection, CoreError};
pub use settings::Settings;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export commonly used types
pub use models::{Auction, AuctionEvent, AuctionStatus, Bid, BidEnvelope, Item, Payment};
pub use services::{BidEngine, BroadcastHub, LifecycleScheduler, PaymentService};
pub use stores::{DurableStore, LiveStore};

//! BidHouse Stores
//!
//! Repository-shaped capability interfaces over the two state homes:
//! - Durable store: transactional persistence of auctions, items, bids,
//!   payments (Postgres)
//! - Live store: per-auction hot state with server-side atomic scripting
//!   (Redis)
//!
//! In-memory implementations of both back tests and the `memory:` dev mode.

pub mod durable;
pub mod live;
pub mod memory;
pub mod postgres;
pub mod redis;

pub use durable::{
    AuctionStore, BidStore, BidderDirectory, DurableStore, ItemStore, LifecycleStore,
    PaymentStore,
};
pub use live::{bids_key, format_amount, highest_key, state_key, Admission, LiveState, LiveStore};
pub use memory::{MemoryDurableStore, MemoryLiveStore};
pub use postgres::PgDurableStore;
pub use redis::RedisLiveStore;

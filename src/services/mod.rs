//! BidHouse Core Services
//!
//! Business logic of the auction core: bid admission, lifecycle transitions,
//! guarantee settlement, and event fan-out.

pub mod bids;
pub mod broadcast;
pub mod lifecycle;
pub mod payments;

pub use bids::BidEngine;
pub use broadcast::BroadcastHub;
pub use lifecycle::LifecycleScheduler;
pub use payments::PaymentService;

//! BidHouse Data Models
//!
//! Plain record types for the auction core:
//! - Core entities: Auctions, Items, Bids, Payments
//! - Wire types: bid envelope, broadcast events

pub mod auction;
pub mod bid;
pub mod event;
pub mod item;
pub mod payment;

pub use auction::*;
pub use bid::*;
pub use event::*;
pub use item::*;
pub use payment::*;

//! BidHouse Error Types
//!
//! Error taxonomy surfaced by the auction core. Bid rejections carry the
//! structured payload the admission script produced, so callers receive both
//! a machine code and a human message.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by the auction core
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// The bid was rejected by a validation or admission rule
    #[error("{0}")]
    InvalidBid(#[from] BidRejection),

    /// The guarantee window closed before the caller submitted payment
    #[error("payment window has closed")]
    PaymentExpired,

    /// A referenced auction, item, bid, or payment does not exist
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Live-store or durable-store I/O failure; safe to retry at the caller
    #[error("store temporarily unavailable: {0}")]
    TransientUnavailable(String),

    /// A concurrent state transition won; this operation was a no-op
    #[error("conflicting update: {0}")]
    Conflict(&'static str),
}

/// Reasons a bid is refused admission
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BidRejection {
    #[error("auction is not open for bidding")]
    AuctionNotActive,

    #[error("auction has already ended")]
    AuctionEnded,

    #[error("you already hold the highest bid")]
    SelfOutbid,

    #[error("first bid must be at least the base price of {required_base:.2}")]
    BelowBasePrice {
        amount: Decimal,
        required_base: Decimal,
    },

    #[error("bid must reach {minimum_required:.2} to beat the current highest of {current_highest:.2}")]
    BelowIncrement {
        current_highest: Decimal,
        minimum_required: Decimal,
    },

    #[error("bid amount must be a positive decimal")]
    NonPositiveAmount,
}

impl BidRejection {
    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuctionNotActive => "AUCTION_NOT_ACTIVE",
            Self::AuctionEnded => "AUCTION_ENDED",
            Self::SelfOutbid => "SELF_OUTBID",
            Self::BelowBasePrice { .. } => "BELOW_BASE_PRICE",
            Self::BelowIncrement { .. } => "BELOW_INCREMENT",
            Self::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::TransientUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::TransientUnavailable(err.to_string())
    }
}

//! BidHouse Request Facade
//!
//! HTTP and WebSocket boundary between the auction core and any UI or CLI.
//! Authentication happens upstream; the facade trusts the bidder identity
//! injected in the `X-Bidder-Id` header.

pub mod auctions;
pub mod payments;
pub mod ws;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::CoreError;
use crate::services::{BidEngine, BroadcastHub, PaymentService};
use crate::stores::{DurableStore, LiveStore};

/// Shared state behind every handler
pub struct AppState {
    pub engine: Arc<BidEngine>,
    pub payments: Arc<PaymentService>,
    pub store: Arc<dyn DurableStore>,
    pub live: Arc<dyn LiveStore>,
    pub hub: Arc<BroadcastHub>,
}

/// Build the facade router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/auctions", get(auctions::list_auctions))
        .route("/api/auction/:id/bid", post(auctions::place_bid))
        .route("/api/auction/:id/state", get(auctions::auction_state))
        .route("/api/auction/:id/bids", get(auctions::recent_bids))
        .route("/bidder/payment/:id/pay", post(payments::pay_guarantee))
        .route("/ws/auction/:id", get(ws::subscribe_auction))
        .route("/ws/auctions/updates", get(ws::subscribe_updates))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let live_ok = state.live.ping().await.is_ok();
    Json(json!({
        "status": "ok",
        "liveStore": if live_ok { "up" } else { "down" },
    }))
}

/// Pre-authenticated bidder identity
pub struct BidderId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for BidderId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-bidder-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .map(BidderId)
            .ok_or(ApiError::Unauthorized)
    }
}

/// HTTP projection of core errors
pub enum ApiError {
    Unauthorized,
    Core(CoreError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED".to_string(),
                "missing or invalid bidder identity".to_string(),
            ),
            Self::Core(CoreError::InvalidBid(rejection)) => (
                StatusCode::BAD_REQUEST,
                rejection.code().to_string(),
                rejection.to_string(),
            ),
            Self::Core(CoreError::NotFound(what)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND".to_string(),
                format!("{what} not found"),
            ),
            Self::Core(CoreError::PaymentExpired) => (
                StatusCode::CONFLICT,
                "PAYMENT_EXPIRED".to_string(),
                "payment window has closed".to_string(),
            ),
            Self::Core(CoreError::Conflict(detail)) => (
                StatusCode::CONFLICT,
                "CONFLICT".to_string(),
                detail.to_string(),
            ),
            Self::Core(err @ CoreError::TransientUnavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "TRANSIENT_UNAVAILABLE".to_string(),
                err.to_string(),
            ),
        };
        (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BidRejection;
    use rust_decimal_macros::dec;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_of(ApiError::Unauthorized), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_of(ApiError::Core(CoreError::InvalidBid(
                BidRejection::BelowIncrement {
                    current_highest: dec!(10000.00),
                    minimum_required: dec!(11000.00),
                }
            ))),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::Core(CoreError::NotFound("auction"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Core(CoreError::PaymentExpired)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApiError::Core(CoreError::TransientUnavailable(
                "down".to_string()
            ))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}

//! Payment API Handlers
//!
//! Guarantee settlement by the provisional winner.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use super::{ApiError, AppState, BidderId};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayResponse {
    pub success: bool,
    pub message: String,
}

/// POST /bidder/payment/{id}/pay
pub async fn pay_guarantee(
    State(state): State<Arc<AppState>>,
    Path(payment_id): Path<Uuid>,
    BidderId(bidder_id): BidderId,
) -> Result<Json<PayResponse>, ApiError> {
    let payment = state.payments.settle_guarantee(payment_id, bidder_id).await?;
    Ok(Json(PayResponse {
        success: true,
        message: format!("guarantee of {:.2} settled", payment.amount),
    }))
}

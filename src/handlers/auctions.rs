//! Auction API Handlers
//!
//! Bidding and state reads. State reads prefer the live store and fall back
//! to the durable record when the hot state has expired or the live store is
//! unreachable.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BidRejection, CoreError};
use crate::models::{AuctionStatus, BidEnvelope};
use crate::stores::format_amount;

use super::{ApiError, AppState, BidderId};

#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub amount: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceBidResponse {
    pub success: bool,
    pub bid_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionStateResponse {
    pub status: String,
    pub current_highest: String,
    pub minimum_bid: String,
    pub highest_bidder: Option<Uuid>,
    pub highest_bidder_name: Option<String>,
    pub bid_count: u64,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_bidder_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second_bidder_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BidsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidEntry {
    pub bidder_id: Uuid,
    pub bidder_name: Option<String>,
    pub amount: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AuctionsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionSummary {
    pub id: Uuid,
    pub item_id: Uuid,
    pub status: String,
    pub current_highest: Option<String>,
    pub end_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
}

/// POST /api/auction/{id}/bid
pub async fn place_bid(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<Uuid>,
    BidderId(bidder_id): BidderId,
    Json(request): Json<PlaceBidRequest>,
) -> Result<Json<PlaceBidResponse>, ApiError> {
    let amount: Decimal = request
        .amount
        .parse()
        .map_err(|_| CoreError::InvalidBid(BidRejection::NonPositiveAmount))?;
    let bid = state.engine.place_bid(auction_id, bidder_id, amount).await?;
    Ok(Json(PlaceBidResponse {
        success: true,
        bid_id: bid.id,
    }))
}

/// GET /api/auction/{id}/state
pub async fn auction_state(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<Uuid>,
) -> Result<Json<AuctionStateResponse>, ApiError> {
    let auction = state
        .store
        .get_auction(auction_id)
        .await?
        .ok_or(CoreError::NotFound("auction"))?;

    // live view first; expired or unreachable hot state falls back to the
    // durable record
    let live = state.live.read_state(auction_id).await.unwrap_or(None);

    let response = match live {
        Some(snapshot) => {
            let top = state.live.top_bids(auction_id, 2).await.unwrap_or_default();
            let second = top.get(1);
            AuctionStateResponse {
                status: snapshot.status.clone(),
                current_highest: format_amount(snapshot.highest_bid),
                minimum_bid: format_amount(
                    state.engine.minimum_next_bid(auction_id).await.unwrap_or_default(),
                ),
                highest_bidder: snapshot.highest_bidder,
                highest_bidder_name: match snapshot.highest_bidder {
                    Some(id) => state.store.display_name(id).await?,
                    None => None,
                },
                bid_count: state.engine.bid_count(auction_id).await.unwrap_or(0),
                end_time: snapshot.end_time,
                winner_id: auction.winner_id,
                second_bidder_id: second.map(|b| b.bidder_id),
                second_bidder_name: match second {
                    Some(b) => state.store.display_name(b.bidder_id).await?,
                    None => None,
                },
            }
        }
        None => {
            let head = state.store.top_bid(auction_id).await?;
            let bids = state
                .store
                .list_bids_desc_by_time(auction_id, Some(2))
                .await?;
            let second = bids.get(1);
            AuctionStateResponse {
                status: auction.status.as_str().to_string(),
                current_highest: format_amount(
                    auction.current_highest_bid.unwrap_or(Decimal::ZERO),
                ),
                minimum_bid: format_amount(auction.minimum_next_bid()),
                highest_bidder: head.as_ref().map(|b| b.bidder_id),
                highest_bidder_name: match head.as_ref() {
                    Some(b) => state.store.display_name(b.bidder_id).await?,
                    None => None,
                },
                bid_count: state
                    .store
                    .list_bids_desc_by_time(auction_id, None)
                    .await?
                    .len() as u64,
                end_time: auction.end_time,
                winner_id: auction.winner_id,
                second_bidder_id: second.map(|b| b.bidder_id),
                second_bidder_name: match second {
                    Some(b) => state.store.display_name(b.bidder_id).await?,
                    None => None,
                },
            }
        }
    };
    Ok(Json(response))
}

/// GET /api/auction/{id}/bids?limit=N
pub async fn recent_bids(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<Uuid>,
    Query(query): Query<BidsQuery>,
) -> Result<Json<Vec<BidEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(20).min(200);

    let envelopes: Vec<BidEnvelope> = match state.live.top_bids(auction_id, limit).await {
        Ok(bids) if !bids.is_empty() => bids,
        _ => state
            .store
            .list_bids_desc_by_time(auction_id, Some(limit as i64))
            .await?
            .iter()
            .map(BidEnvelope::from)
            .collect(),
    };

    let mut names: HashMap<Uuid, Option<String>> = HashMap::new();
    let mut entries = Vec::with_capacity(envelopes.len());
    for envelope in envelopes {
        let name = match names.get(&envelope.bidder_id) {
            Some(cached) => cached.clone(),
            None => {
                let resolved = state.store.display_name(envelope.bidder_id).await?;
                names.insert(envelope.bidder_id, resolved.clone());
                resolved
            }
        };
        entries.push(BidEntry {
            bidder_id: envelope.bidder_id,
            bidder_name: name,
            amount: format_amount(envelope.amount),
            ts: envelope.ts,
        });
    }
    Ok(Json(entries))
}

/// GET /api/auctions?status=live
pub async fn list_auctions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuctionsQuery>,
) -> Result<Json<Vec<AuctionSummary>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(|s| AuctionStatus::parse(s).ok_or(CoreError::NotFound("auction status")))
        .transpose()?
        .unwrap_or(AuctionStatus::Live);

    let auctions = state.store.list_by_status(status).await?;
    Ok(Json(
        auctions
            .into_iter()
            .map(|a| AuctionSummary {
                id: a.id,
                item_id: a.item_id,
                status: a.status.as_str().to_string(),
                current_highest: a.current_highest_bid.map(format_amount),
                end_time: a.end_time,
                winner_id: a.winner_id,
            })
            .collect(),
    ))
}

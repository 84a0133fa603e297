//! WebSocket Handlers
//!
//! Event stream subscriptions. Delivery is best-effort: a subscriber who
//! lags past the channel capacity loses the skipped events and is expected
//! to re-sync through the state endpoints.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::AuctionEvent;
use crate::services::broadcast::{auction_topic, GLOBAL_TOPIC};

use super::AppState;

/// GET /ws/auction/{id}
pub async fn subscribe_auction(
    State(state): State<Arc<AppState>>,
    Path(auction_id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let receiver = state.hub.subscribe(&auction_topic(auction_id));
    upgrade.on_upgrade(move |socket| pump_events(socket, receiver))
}

/// GET /ws/auctions/updates
pub async fn subscribe_updates(
    State(state): State<Arc<AppState>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let receiver = state.hub.subscribe(GLOBAL_TOPIC);
    upgrade.on_upgrade(move |socket| pump_events(socket, receiver))
}

async fn pump_events(mut socket: WebSocket, mut events: broadcast::Receiver<AuctionEvent>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = socket.recv() => match message {
                // inbound frames are ignored; the close handshake ends the pump
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

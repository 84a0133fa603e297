//! Guarantee Payment Service
//!
//! Settlement of the 50% guarantee a provisional winner owes after close.
//! The transition is guarded on PENDING, so a scheduler failing the payment
//! at the same instant cannot race a success into a double transition.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{AuctionEvent, Payment, PaymentStatus};
use crate::services::broadcast::BroadcastHub;
use crate::stores::{DurableStore, LiveStore};

/// Settles guarantee obligations
pub struct PaymentService {
    store: Arc<dyn DurableStore>,
    live: Arc<dyn LiveStore>,
    hub: Arc<BroadcastHub>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn DurableStore>,
        live: Arc<dyn LiveStore>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self { store, live, hub }
    }

    /// Settle a pending guarantee before its deadline. On success the
    /// auction's hot state is torn down; its durable record remains.
    pub async fn settle_guarantee(
        &self,
        payment_id: Uuid,
        bidder_id: Uuid,
    ) -> Result<Payment, CoreError> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .filter(|p| p.bidder_id == bidder_id)
            .ok_or(CoreError::NotFound("payment"))?;

        let now = Utc::now();
        match payment.status {
            PaymentStatus::Pending if payment.due_by < now => {
                return Err(CoreError::PaymentExpired)
            }
            PaymentStatus::Failed => return Err(CoreError::PaymentExpired),
            PaymentStatus::Success => {
                return Err(CoreError::Conflict("payment already settled"))
            }
            PaymentStatus::Pending => {}
        }

        let settled = self
            .store
            .mark_payment_succeeded(payment.id, now)
            .await?
            .ok_or(CoreError::Conflict("payment was no longer pending"))?;

        // final payment success ends the auction's hot life
        self.live.remove_auction(settled.auction_id).await?;

        info!(
            payment_id = %settled.id,
            auction_id = %settled.auction_id,
            amount = %settled.amount,
            "guarantee settled"
        );
        self.hub.publish_event(AuctionEvent::PaymentCompleted {
            auction_id: settled.auction_id,
            payment_id: settled.id,
            bidder_id: settled.bidder_id,
            amount: settled.amount,
        });

        Ok(settled)
    }
}

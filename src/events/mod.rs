use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentStatus};

/// Domain events emitted after state changes commit. Never sent from inside
/// an open transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    CartItemAdded {
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    },
    CartItemRemoved {
        cart_id: Uuid,
        cart_item_id: Uuid,
    },
    GuestCartMerged {
        cart_id: Uuid,
        merged: usize,
        skipped: usize,
    },
    OrderCreated(Uuid),
    CheckoutSessionCreated {
        order_id: Uuid,
        checkout_id: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Event delivery is best-effort; it must never fail a request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event delivery failed: {}", e);
        }
    }
}

/// Consumes events from the channel and logs them. Downstream consumers
/// (notifications, analytics) hook in here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(?event, "domain event");
    }
    info!("Event channel closed; processor exiting");
}

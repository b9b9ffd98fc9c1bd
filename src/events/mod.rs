//! In-process event channel. Side effects of order lifecycle transitions
//! (kitchen notifications, audit breadcrumbs) are decoupled from the request
//! path through a bounded mpsc channel drained by `process_events`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Events emitted by the order and inventory services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        order_number: String,
        total_amount: Decimal,
    },
    /// Emitted when an order enters `confirmed`; the kitchen display is the
    /// intended consumer.
    OrderConfirmed {
        order_id: Uuid,
        order_number: String,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled {
        order_id: Uuid,
        reason: Option<String>,
    },
    PaymentRecorded {
        order_id: Uuid,
        payment_method: String,
        payment_reference: Option<String>,
    },
    StockMovementRecorded {
        movement_id: Uuid,
        inventory_item_id: Uuid,
        movement_type: String,
        quantity: Decimal,
        new_stock: Decimal,
    },
    /// Emitted when a deduction drops an item to or below its reorder
    /// threshold.
    LowStock {
        inventory_item_id: Uuid,
        item_name: String,
        current_stock: Decimal,
        minimum_stock: Decimal,
    },
}

/// Drains the event channel. Delivery here is log-only; the kitchen display
/// and reporting surfaces poll committed state and are outside this crate.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderConfirmed {
                order_id,
                order_number,
            } => {
                info!(%order_id, %order_number, "notifying kitchen of confirmed order");
            }
            Event::LowStock {
                item_name,
                current_stock,
                minimum_stock,
                ..
            } => {
                warn!(
                    %item_name,
                    %current_stock,
                    %minimum_stock,
                    "inventory item at or below reorder threshold"
                );
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }
    info!("Event channel closed; processor exiting");
}

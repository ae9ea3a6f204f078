use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event without waiting; fails when the channel is full or closed
    pub fn try_send(&self, event: Event) -> Result<(), String> {
        self.sender
            .try_send(event)
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Define the various events that can occur during checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        user_id: Uuid,
        total: Decimal,
        currency: String,
    },
    DiscountsApplied {
        order_id: Uuid,
        discount_ids: Vec<Uuid>,
        discount_total: Decimal,
    },
    CheckoutCompleted {
        cart_id: Uuid,
        order_id: Uuid,
        payment_intent_id: String,
    },
    CheckoutFailed {
        cart_id: Uuid,
        kind: String,
    },
}

// Handlers implementing this trait receive every event processed by the loop.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

// Function to process incoming events and distribute them to registered event handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                total,
                currency,
                ..
            } => info!(%order_id, %order_number, %total, %currency, "Order created"),
            Event::DiscountsApplied {
                order_id,
                discount_ids,
                discount_total,
            } => info!(
                %order_id,
                discounts = discount_ids.len(),
                %discount_total,
                "Discounts applied"
            ),
            Event::CheckoutCompleted {
                cart_id,
                order_id,
                payment_intent_id,
            } => info!(%cart_id, %order_id, %payment_intent_id, "Checkout completed"),
            Event::CheckoutFailed { cart_id, kind } => {
                warn!(%cart_id, %kind, "Checkout failed")
            }
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!("Event handler failed for {:?}: {}", event, e);
            }
        }
    }

    info!("Event channel closed, stopping event processing loop");
}

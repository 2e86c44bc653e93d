//! Domain events emitted by the order and payment workflow.
//!
//! Services publish through [`EventSender`]; a background task drains the
//! channel in [`process_events`]. Publishing never blocks a request: when the
//! channel is full or closed the event is logged and dropped.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentMethod, PaymentStatus};

/// Where a payment outcome came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationSource {
    Poll,
    Webhook,
}

impl VerificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationSource::Poll => "poll",
            VerificationSource::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: Decimal,
        payment_method: PaymentMethod,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentSessionCreated {
        order_id: Uuid,
        gateway_order_id: String,
        converted_from_cod: bool,
    },
    PaymentStatusChanged {
        order_id: Uuid,
        old_status: PaymentStatus,
        new_status: PaymentStatus,
        source: VerificationSource,
    },
    CartCleared {
        user_id: Uuid,
        order_id: Uuid,
    },
}

#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Publishes without waiting; a full or closed channel only logs
    pub fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            warn!(error = %err, "dropping domain event");
        }
    }
}

/// Creates a channel-backed sender and its receiving half
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderCreated {
                order_id,
                user_id,
                total_amount,
                payment_method,
            } => info!(
                %order_id, %user_id, %total_amount, %payment_method,
                "order created"
            ),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            Event::PaymentSessionCreated {
                order_id,
                gateway_order_id,
                converted_from_cod,
            } => info!(
                %order_id, %gateway_order_id, converted_from_cod,
                "payment session created"
            ),
            Event::PaymentStatusChanged {
                order_id,
                old_status,
                new_status,
                source,
            } => info!(
                %order_id, %old_status, %new_status, source = source.as_str(),
                "payment status changed"
            ),
            Event::CartCleared { user_id, order_id } => {
                info!(%user_id, %order_id, "cart cleared after payment")
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

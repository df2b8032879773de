use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{MovementReason, PaymentKind, ServiceOrderStatus};

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

    /// Publishes without waiting. A full or closed channel is logged and the
    /// event dropped; the committed operation is never failed by this.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping event: {}", e);
        }
    }
}

/// Notifications published after a service order mutation commits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ServiceOrderCreated {
        order_id: Uuid,
        order_number: String,
        site_id: Uuid,
    },
    ServiceOrderStatusChanged {
        order_id: Uuid,
        old_status: ServiceOrderStatus,
        new_status: ServiceOrderStatus,
    },
    ServiceOrderRepaired {
        order_id: Uuid,
        total: Decimal,
        repaired_at: DateTime<Utc>,
    },
    ServiceOrderDelivered {
        order_id: Uuid,
        pending_settlement: bool,
        delivered_at: DateTime<Utc>,
    },
    ServiceOrderCancelled {
        order_id: Uuid,
        reason: String,
        refunded_amount: Decimal,
    },
    PaymentRecorded {
        order_id: Uuid,
        payment_id: Uuid,
        kind: PaymentKind,
        amount: Decimal,
        balance: Decimal,
    },
    StockDeducted {
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
        reason: MovementReason,
        service_order_id: Option<Uuid>,
    },
    StockRestored {
        product_id: Uuid,
        site_id: Uuid,
        quantity: i32,
        reason: MovementReason,
        service_order_id: Option<Uuid>,
    },
}

impl Event {
    /// Service order the event concerns, if any.
    pub fn service_order_id(&self) -> Option<Uuid> {
        match self {
            Event::ServiceOrderCreated { order_id, .. }
            | Event::ServiceOrderStatusChanged { order_id, .. }
            | Event::ServiceOrderRepaired { order_id, .. }
            | Event::ServiceOrderDelivered { order_id, .. }
            | Event::ServiceOrderCancelled { order_id, .. }
            | Event::PaymentRecorded { order_id, .. } => Some(*order_id),
            Event::StockDeducted {
                service_order_id, ..
            }
            | Event::StockRestored {
                service_order_id, ..
            } => *service_order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::ServiceOrderCreated { .. } => "service_order.created",
            Event::ServiceOrderStatusChanged { .. } => "service_order.status_changed",
            Event::ServiceOrderRepaired { .. } => "service_order.repaired",
            Event::ServiceOrderDelivered { .. } => "service_order.delivered",
            Event::ServiceOrderCancelled { .. } => "service_order.cancelled",
            Event::PaymentRecorded { .. } => "service_order.payment_recorded",
            Event::StockDeducted { .. } => "inventory.stock_deducted",
            Event::StockRestored { .. } => "inventory.stock_restored",
        }
    }
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Writes every event to the structured log.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        info!(
            event = event.name(),
            service_order_id = ?event.service_order_id(),
            "domain event"
        );
        debug!(?event, "domain event payload");
        Ok(())
    }
}

/// Drains the channel and fans each event out to every handler.
/// A failing handler is logged and does not stop the others.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let name = event.name();
        let results = join_all(
            handlers
                .iter()
                .map(|handler| handler.handle_event(event.clone())),
        )
        .await;

        for result in results {
            if let Err(e) = result {
                error!("Event handler failed: event={}, error={}", name, e);
            }
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle_event(&self, event: Event) -> Result<(), String> {
            self.0.lock().unwrap().push(event.name());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle_event(&self, _event: Event) -> Result<(), String> {
            Err("boom".into())
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_starve_others() {
        let (tx, rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);
        let recording = Arc::new(Recording(Mutex::new(Vec::new())));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(Failing), recording.clone()];

        let order_id = Uuid::new_v4();
        sender.send_or_log(Event::ServiceOrderStatusChanged {
            order_id,
            old_status: ServiceOrderStatus::Received,
            new_status: ServiceOrderStatus::Diagnosing,
        });
        drop(sender);

        process_events(rx, handlers).await;
        assert_eq!(
            *recording.0.lock().unwrap(),
            vec!["service_order.status_changed"]
        );
    }

    #[test]
    fn send_or_log_tolerates_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        let event = Event::ServiceOrderCancelled {
            order_id: Uuid::new_v4(),
            reason: "client withdrew".into(),
            refunded_amount: Decimal::ZERO,
        };
        sender.send_or_log(event.clone());
        sender.send_or_log(event);
    }
}

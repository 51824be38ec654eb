use chrono::{DateTime, Utc};
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
    /// Creates a new EventSender
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

// The events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Quote events
    QuoteCreated {
        quote_id: Uuid,
        client_id: Uuid,
    },
    QuoteSubmitted {
        quote_id: Uuid,
        client_id: Uuid,
    },
    QuoteLocked {
        quote_id: Uuid,
        manager_id: Uuid,
    },
    QuoteLockReleased {
        quote_id: Uuid,
        manager_id: Uuid,
    },
    QuotePriced {
        quote_id: Uuid,
        manager_id: Uuid,
        total_amount: Decimal,
    },
    QuoteApproved {
        quote_id: Uuid,
    },
    QuoteRejected {
        quote_id: Uuid,
    },
    QuoteExpired {
        quote_id: Uuid,
    },
    QuoteConverted {
        quote_id: Uuid,
        order_id: Uuid,
    },
    ExpiredLocksReleased {
        count: u64,
        timestamp: DateTime<Utc>,
    },

    // Order events
    OrderPaymentConfirmed {
        order_id: Uuid,
    },

    // Delivery events
    DeliveryAssigned {
        delivery_id: Uuid,
        order_id: Uuid,
        client_id: Uuid,
        agent_id: Uuid,
        /// Sealed verification code, forwarded to the client out of band.
        /// Never logged.
        verification_code: String,
    },
    DeliveryStatusChanged {
        delivery_id: Uuid,
        old_status: String,
        new_status: String,
    },
    DeliveryClientVerified {
        delivery_id: Uuid,
        client_id: Uuid,
    },
    DeliveryManagerConfirmed {
        delivery_id: Uuid,
        order_id: Uuid,
        manager_id: Uuid,
    },
}

impl Event {
    /// Event name for logging. Payloads are not logged wholesale because
    /// `DeliveryAssigned` carries the verification code.
    pub fn name(&self) -> &'static str {
        match self {
            Event::QuoteCreated { .. } => "quote_created",
            Event::QuoteSubmitted { .. } => "quote_submitted",
            Event::QuoteLocked { .. } => "quote_locked",
            Event::QuoteLockReleased { .. } => "quote_lock_released",
            Event::QuotePriced { .. } => "quote_priced",
            Event::QuoteApproved { .. } => "quote_approved",
            Event::QuoteRejected { .. } => "quote_rejected",
            Event::QuoteExpired { .. } => "quote_expired",
            Event::QuoteConverted { .. } => "quote_converted",
            Event::ExpiredLocksReleased { .. } => "expired_locks_released",
            Event::OrderPaymentConfirmed { .. } => "order_payment_confirmed",
            Event::DeliveryAssigned { .. } => "delivery_assigned",
            Event::DeliveryStatusChanged { .. } => "delivery_status_changed",
            Event::DeliveryClientVerified { .. } => "delivery_client_verified",
            Event::DeliveryManagerConfirmed { .. } => "delivery_manager_confirmed",
        }
    }
}

// Processes incoming events. Side effects here are notification dispatch and
// audit logging; persistence already happened in the emitting service.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(event = %event.name(), "Received event");

        match event {
            Event::QuotePriced {
                quote_id,
                manager_id,
                total_amount,
            } => {
                handle_quote_priced(quote_id, manager_id, total_amount).await;
            }
            Event::QuoteConverted { quote_id, order_id } => {
                info!(
                    "Quote {} converted into order {}; procurement can begin",
                    quote_id, order_id
                );
            }
            Event::QuoteExpired { quote_id } => {
                info!(
                    "Quote {} expired without client approval and was rejected",
                    quote_id
                );
            }
            Event::ExpiredLocksReleased { count, timestamp } => {
                if count > 0 {
                    info!(
                        "Released {} expired pricing locks at {}",
                        count, timestamp
                    );
                }
            }
            Event::DeliveryAssigned {
                delivery_id,
                client_id,
                agent_id,
                ..
            } => {
                handle_delivery_assigned(delivery_id, client_id, agent_id).await;
            }
            Event::DeliveryManagerConfirmed {
                delivery_id,
                order_id,
                ..
            } => {
                info!(
                    "Delivery {} confirmed; order {} is settled",
                    delivery_id, order_id
                );
            }
            other => {
                info!(event = %other.name(), "No specific handler for event");
            }
        }
    }

    warn!("Event processing loop has ended");
}

// Handler functions for specific events

async fn handle_quote_priced(quote_id: Uuid, manager_id: Uuid, total_amount: Decimal) {
    info!(
        "Quote {} priced at {} by manager {}; notifying client for review",
        quote_id, total_amount, manager_id
    );
    // Notification fan-out (email, push) would hang off this handler.
}

async fn handle_delivery_assigned(delivery_id: Uuid, client_id: Uuid, agent_id: Uuid) {
    info!(
        "Delivery {} assigned to agent {}; dispatching verification code to client {}",
        delivery_id, agent_id, client_id
    );
    // The sealed code travels to the client through the notification channel,
    // not through logs.
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Post-commit record of an order changing status.
///
/// `old_status` is `None` when the order was just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChange {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

// Events published after a committed write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderStatusChanged(OrderStatusChange),
    /// An approval left an item at or below its minimum stock level.
    LowStock {
        item_id: Uuid,
        quantity_on_hand: i32,
        min_stock_level: i32,
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

    /// Sends an event, waiting for channel capacity
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event without waiting; a full or closed channel drops it
    pub fn try_send(&self, event: Event) -> Result<(), String> {
        self.sender
            .try_send(event)
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a bounded event channel
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

// Handlers receive every event published on the channel.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel and fans each event out to every handler.
/// Handler failures are logged and never stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!(handlers = handlers.len(), "Event processing loop started");

    while let Some(event) = rx.recv().await {
        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for err in results.into_iter().filter_map(Result::err) {
            error!(error = %err, event = ?event, "Event handler failed");
        }
    }

    warn!("Event processing loop has ended");
}

/// Tells the customer about their order's progress. Delivery is a log line
/// until a mail or push transport is wired in.
pub struct CustomerNoticeHandler;

#[async_trait]
impl EventHandler for CustomerNoticeHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        if let Event::OrderStatusChanged(change) = event {
            let notice = match change.new_status {
                OrderStatus::Pending => "Your order has been received and awaits review",
                OrderStatus::Approved => "Your order has been approved",
                OrderStatus::Preparing => "Your order is being prepared",
                OrderStatus::Ready => "Your order is ready",
                OrderStatus::Delivered => "Your order has been delivered",
                OrderStatus::Rejected => "Your order has been rejected",
                OrderStatus::Cancelled => "Your order has been cancelled",
            };
            info!(
                order_id = %change.order_id,
                user_id = %change.user_id,
                status = %change.new_status,
                reason = change.reason.as_deref().unwrap_or(""),
                "{}",
                notice
            );
        }
        Ok(())
    }
}

pub struct LowStockAlertHandler;

#[async_trait]
impl EventHandler for LowStockAlertHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        if let Event::LowStock {
            item_id,
            quantity_on_hand,
            min_stock_level,
        } = event
        {
            warn!(
                item_id = %item_id,
                quantity_on_hand,
                min_stock_level,
                "Low inventory alert"
            );
        }
        Ok(())
    }
}

/// Handlers registered by the server binary
pub fn default_handlers() -> Vec<Arc<dyn EventHandler>> {
    vec![Arc::new(CustomerNoticeHandler), Arc::new(LowStockAlertHandler)]
}

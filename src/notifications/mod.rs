use async_trait::async_trait;
use thiserror::Error;

use crate::events::{Event, EventSender};

pub use crate::events::OrderStatusChange;

/// Notification hook errors
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Informed after an order status change commits. Never consulted: an error
/// here is logged by the caller and does not affect the order.
#[async_trait]
pub trait NotificationHook: Send + Sync {
    async fn order_status_changed(&self, change: OrderStatusChange)
        -> Result<(), NotificationError>;
}

/// Publishes status changes onto the in-process event channel
#[derive(Debug, Clone)]
pub struct EventChannelHook {
    sender: EventSender,
}

impl EventChannelHook {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl NotificationHook for EventChannelHook {
    async fn order_status_changed(
        &self,
        change: OrderStatusChange,
    ) -> Result<(), NotificationError> {
        self.sender
            .try_send(Event::OrderStatusChanged(change))
            .map_err(NotificationError::ChannelUnavailable)
    }
}

/// Discards every change
#[derive(Debug, Clone, Default)]
pub struct NoopNotificationHook;

#[async_trait]
impl NotificationHook for NoopNotificationHook {
    async fn order_status_changed(
        &self,
        _change: OrderStatusChange,
    ) -> Result<(), NotificationError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::OrderStatus;
    use crate::events;
    use chrono::Utc;
    use uuid::Uuid;

    fn cancelled() -> OrderStatusChange {
        OrderStatusChange {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            old_status: Some(OrderStatus::Approved),
            new_status: OrderStatus::Cancelled,
            reason: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn channel_hook_forwards_change() {
        let (sender, mut rx) = events::channel(4);
        let hook = EventChannelHook::new(sender);
        let change = cancelled();

        hook.order_status_changed(change.clone()).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderStatusChanged(received)) => assert_eq!(received, change),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn channel_hook_fails_when_receiver_is_gone() {
        let (sender, rx) = events::channel(4);
        drop(rx);
        let hook = EventChannelHook::new(sender);

        let err = hook.order_status_changed(cancelled()).await.unwrap_err();
        assert!(matches!(err, NotificationError::ChannelUnavailable(_)));
    }
}

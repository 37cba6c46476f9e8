//! Order status state machine.
//!
//! ```text
//! Pending --approve--> Approved --fulfill--> Preparing --ready--> Ready --deliver--> Delivered
//! Pending --reject--> Rejected
//! Pending | Approved --cancel--> Cancelled
//! ```

use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;

/// Whether `from -> to` is an edge of the state machine
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;

    matches!(
        (from, to),
        (Pending, Approved)
            | (Pending, Rejected)
            | (Pending, Cancelled)
            | (Approved, Cancelled)
            | (Approved, Preparing)
            | (Preparing, Ready)
            | (Ready, Delivered)
    )
}

/// Statuses reachable through the generic fulfilment advance, paired with
/// the exact status each one requires.
pub fn fulfilment_predecessor(next: OrderStatus) -> Option<OrderStatus> {
    match next {
        OrderStatus::Preparing => Some(OrderStatus::Approved),
        OrderStatus::Ready => Some(OrderStatus::Preparing),
        OrderStatus::Delivered => Some(OrderStatus::Ready),
        _ => None,
    }
}

/// Fails with `InvalidTransition` unless `current -> requested` is an edge
pub fn ensure_transition(current: OrderStatus, requested: OrderStatus) -> Result<(), ServiceError> {
    if is_valid_transition(current, requested) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition { current, requested })
    }
}

/// Fails with `InvalidTransition` unless the generic advance may move
/// `current` to `requested`
pub fn ensure_fulfilment_step(
    current: OrderStatus,
    requested: OrderStatus,
) -> Result<(), ServiceError> {
    match fulfilment_predecessor(requested) {
        Some(required) if required == current => Ok(()),
        _ => Err(ServiceError::InvalidTransition { current, requested }),
    }
}

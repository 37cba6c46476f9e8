use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Error body returned by every HTTP endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error kind (e.g., "insufficient_stock")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    /// Structured data explaining the failure (offending item, statuses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Order has no lines")]
    EmptyOrder,

    #[error("Item not found or inactive: {0}")]
    ItemNotFound(Uuid),

    #[error("Insufficient stock for item {item_id}: requested {requested}, available {available}")]
    InsufficientStock {
        item_id: Uuid,
        requested: i32,
        available: i32,
    },

    #[error("Invalid transition from {current} to {requested}")]
    InvalidTransition {
        current: OrderStatus,
        requested: OrderStatus,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(#[from] DbErr),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Machine-readable kind used by API clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyOrder => "empty_order",
            Self::ItemNotFound(_) => "item_not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Forbidden(_) => "forbidden",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::OrderNotFound(_) => "order_not_found",
            Self::ValidationError(_) => "validation_error",
            Self::TransactionAborted(_) => "transaction_aborted",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::EmptyOrder | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::ItemNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InsufficientStock { .. } => StatusCode::CONFLICT,
            Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::TransactionAborted(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Store failures return a generic message.
    pub fn response_message(&self) -> String {
        match self {
            Self::TransactionAborted(_) => "The operation could not be completed, please retry".to_string(),
            _ => self.to_string(),
        }
    }

    /// Minimum structured data needed to explain the failure.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::ItemNotFound(item_id) => Some(json!({ "item_id": item_id })),
            Self::InsufficientStock {
                item_id,
                requested,
                available,
            } => Some(json!({
                "item_id": item_id,
                "requested": requested,
                "available": available,
            })),
            Self::InvalidTransition { current, requested } => Some(json!({
                "current": current,
                "requested": requested,
            })),
            Self::OrderNotFound(order_id) => Some(json!({ "order_id": order_id })),
            _ => None,
        }
    }

    /// Connection-level store failures that leave no partial state behind
    /// and may be retried by idempotent callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransactionAborted(DbErr::ConnectionAcquire(_) | DbErr::Conn(_))
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: self.details(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

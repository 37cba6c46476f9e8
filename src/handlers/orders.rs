use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::Actor;
use crate::{
    entities::order::OrderStatus,
    errors::ServiceError,
    queries::{
        execute_with_retry,
        order_queries::{
            GetOrderQuery, ListOrdersByStatusQuery, ListOrdersForUserQuery, ListPendingOrdersQuery,
            OrderStatsQuery,
        },
    },
    services::orders::{CheckoutDetails, OrderLineRequest},
    ApiResponse, AppState,
};

/// Checkout payload: the cart lines plus optional delivery information
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateOrderRequest {
    #[validate]
    pub lines: Vec<OrderLineRequest>,
    #[serde(flatten)]
    #[validate]
    pub details: CheckoutDetails,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RejectOrderRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub user_id: Option<Uuid>,
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw.trim())
        .map_err(|_| ServiceError::ValidationError(format!("Unknown order status: {}", raw)))
}

/// POST /orders
pub async fn create_order(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let created = state
        .orders
        .create_order(actor.user_id, payload.lines, payload.details)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// GET /orders/mine
pub async fn list_my_orders(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let query = ListOrdersForUserQuery {
        user_id: actor.user_id,
        page: params.page.unwrap_or(1).max(1),
        per_page: state.config.page_size(params.per_page),
    };
    let page = execute_with_retry(&query, &state.db, &state.config.retry_config()).await?;
    Ok(Json(ApiResponse::success(page)))
}

/// GET /orders/pending
pub async fn list_pending_orders(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_privileged()?;
    let orders = execute_with_retry(
        &ListPendingOrdersQuery,
        &state.db,
        &state.config.retry_config(),
    )
    .await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// GET /orders?status=
pub async fn list_orders_by_status(
    State(state): State<AppState>,
    actor: Actor,
    Query(filter): Query<StatusFilter>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_privileged()?;
    let raw = filter
        .status
        .ok_or_else(|| ServiceError::ValidationError("status query parameter is required".into()))?;
    let query = ListOrdersByStatusQuery {
        status: parse_status(&raw)?,
    };
    let orders = execute_with_retry(&query, &state.db, &state.config.retry_config()).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// GET /orders/stats
///
/// Customers always see their own figures. Staff see the whole store, or
/// one customer with `?user_id=`.
pub async fn order_stats(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<StatsParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let user_id = if actor.is_privileged() {
        params.user_id
    } else {
        Some(actor.user_id)
    };
    let stats = execute_with_retry(
        &OrderStatsQuery { user_id },
        &state.db,
        &state.config.retry_config(),
    )
    .await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// GET /orders/:id
pub async fn get_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let details = execute_with_retry(
        &GetOrderQuery { order_id },
        &state.db,
        &state.config.retry_config(),
    )
    .await?
    .ok_or(ServiceError::OrderNotFound(order_id))?;

    if !actor.is_privileged() && details.order.user_id != actor.user_id {
        return Err(ServiceError::Forbidden(
            "Order belongs to another customer".to_string(),
        ));
    }

    Ok(Json(ApiResponse::success(details)))
}

/// DELETE /orders/:id
pub async fn delete_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .orders
        .delete_pending_order(order_id, actor.requester_scope())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /orders/:id/approve
pub async fn approve_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_privileged()?;
    let approved = state.orders.approve(order_id, actor.user_id).await?;
    Ok(Json(ApiResponse::success(approved)))
}

/// POST /orders/:id/reject
pub async fn reject_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<RejectOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_privileged()?;
    let rejected = state
        .orders
        .reject(order_id, payload.reason, actor.user_id)
        .await?;
    Ok(Json(ApiResponse::success(rejected)))
}

/// POST /orders/:id/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let cancelled = state
        .orders
        .cancel(order_id, actor.requester_scope(), actor.user_id)
        .await?;
    Ok(Json(ApiResponse::success(cancelled)))
}

/// POST /orders/:id/status
pub async fn update_order_status(
    State(state): State<AppState>,
    actor: Actor,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_privileged()?;
    let next = parse_status(&payload.status)?;
    let updated = state.orders.transition(order_id, next, actor.user_id).await?;
    Ok(Json(ApiResponse::success(updated)))
}

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use uuid::Uuid;

use super::Actor;
use crate::{
    errors::ServiceError,
    queries::{
        execute_with_retry,
        inventory_queries::{LowStockItemsQuery, PeekStockQuery},
    },
    ApiResponse, AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct LowStockParams {
    pub threshold: Option<i32>,
}

/// GET /inventory/:item_id
pub async fn get_stock_level(
    State(state): State<AppState>,
    _actor: Actor,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let level = execute_with_retry(
        &PeekStockQuery { item_id },
        &state.db,
        &state.config.retry_config(),
    )
    .await?;
    Ok(Json(ApiResponse::success(level)))
}

/// GET /inventory/low-stock
pub async fn list_low_stock(
    State(state): State<AppState>,
    actor: Actor,
    Query(params): Query<LowStockParams>,
) -> Result<impl IntoResponse, ServiceError> {
    actor.require_privileged()?;
    if matches!(params.threshold, Some(t) if t < 0) {
        return Err(ServiceError::ValidationError(
            "threshold must not be negative".to_string(),
        ));
    }
    let items = execute_with_retry(
        &LowStockItemsQuery {
            threshold: params.threshold,
        },
        &state.db,
        &state.config.retry_config(),
    )
    .await?;
    Ok(Json(ApiResponse::success(items)))
}

//! Pharmacy order lifecycle and inventory consistency engine.
//!
//! Orders move `Pending -> Approved -> Preparing -> Ready -> Delivered`, or
//! end early as `Rejected` or `Cancelled`. Stock is taken on approval and
//! returned when an approved order is cancelled; every transition and its
//! stock effects commit together or not at all.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod queries;
pub mod services;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::AppConfig, db::DbPool, services::orders::OrderService};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub orders: Arc<OrderService>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    use handlers::{inventory, orders};

    let order_routes = Router::new()
        .route(
            "/orders",
            post(orders::create_order).get(orders::list_orders_by_status),
        )
        .route("/orders/mine", get(orders::list_my_orders))
        .route("/orders/pending", get(orders::list_pending_orders))
        .route("/orders/stats", get(orders::order_stats))
        .route(
            "/orders/:id",
            get(orders::get_order).delete(orders::delete_order),
        )
        .route("/orders/:id/approve", post(orders::approve_order))
        .route("/orders/:id/reject", post(orders::reject_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route("/orders/:id/status", post(orders::update_order_status));

    let inventory_routes = Router::new()
        .route("/inventory/low-stock", get(inventory::list_low_stock))
        .route("/inventory/:item_id", get(inventory::get_stock_level));

    order_routes.merge(inventory_routes)
}

/// Full application router: `/health` plus `/api/v1`.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.is_development().then(CorsLayer::permissive);

    let router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http());

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

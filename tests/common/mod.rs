#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, EntityTrait, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use pharmacy_orders::{
    config::AppConfig,
    db::DbPool,
    entities::item,
    events::{self, Event, OrderStatusChange},
    migrator::Migrator,
    notifications::{NoopNotificationHook, NotificationError, NotificationHook},
    services::{
        catalog::DbCatalog,
        orders::{OrderLineRequest, OrderService},
    },
    AppState,
};

/// Collects every change the engine publishes so tests can assert on it.
pub struct RecordingHook {
    tx: mpsc::UnboundedSender<OrderStatusChange>,
}

#[async_trait]
impl NotificationHook for RecordingHook {
    async fn order_status_changed(
        &self,
        change: OrderStatusChange,
    ) -> Result<(), NotificationError> {
        self.tx
            .send(change)
            .map_err(|e| NotificationError::Delivery(e.to_string()))
    }
}

/// An order engine over a fresh SQLite store.
pub struct TestEngine {
    pub db: Arc<DbPool>,
    pub orders: Arc<OrderService>,
    notices: Mutex<mpsc::UnboundedReceiver<OrderStatusChange>>,
    events: Mutex<mpsc::Receiver<Event>>,
    _store: Option<TempDir>,
}

pub async fn memory_db() -> DbPool {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect to in-memory sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

/// A file-backed store behind a pool of `connections`, so transactions on
/// different connections really overlap in the store.
pub async fn file_db(dir: &TempDir, connections: u32) -> DbPool {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("pharmacy.db").display());
    let mut opt = ConnectOptions::new(url);
    opt.max_connections(connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);
    let db = Database::connect(opt).await.expect("connect to file sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    db
}

impl TestEngine {
    /// In-memory store on one connection, recording every notification.
    pub async fn new() -> Self {
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        Self::assemble(
            memory_db().await,
            Arc::new(RecordingHook { tx: notice_tx }),
            notice_rx,
            None,
        )
    }

    /// File store shared by a pool of `connections`. Notifications are
    /// discarded.
    pub async fn with_pool(connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db = file_db(&dir, connections).await;
        let (_, notice_rx) = mpsc::unbounded_channel();
        Self::assemble(db, Arc::new(NoopNotificationHook), notice_rx, Some(dir))
    }

    fn assemble(
        db: DbPool,
        hook: Arc<dyn NotificationHook>,
        notices: mpsc::UnboundedReceiver<OrderStatusChange>,
        store: Option<TempDir>,
    ) -> Self {
        let db = Arc::new(db);
        let (event_sender, event_rx) = events::channel(64);

        let orders = Arc::new(OrderService::new(
            db.clone(),
            Arc::new(DbCatalog::new(db.clone())),
            hook,
            Some(Arc::new(event_sender)),
        ));

        Self {
            db,
            orders,
            notices: Mutex::new(notices),
            events: Mutex::new(event_rx),
            _store: store,
        }
    }

    /// Inserts an active item with the given price and stock.
    pub async fn item(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        self.item_with_minimum(name, price, stock, 0).await
    }

    pub async fn item_with_minimum(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        min_stock_level: i32,
    ) -> Uuid {
        let id = Uuid::new_v4();
        item::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            unit_price: Set(price),
            quantity_on_hand: Set(stock),
            min_stock_level: Set(min_stock_level),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("insert item");
        id
    }

    pub async fn stock_of(&self, item_id: Uuid) -> i32 {
        item::Entity::find_by_id(item_id)
            .one(&*self.db)
            .await
            .expect("read item")
            .expect("item exists")
            .quantity_on_hand
    }

    /// Waits for the next published status change.
    pub async fn next_notice(&self) -> OrderStatusChange {
        let mut rx = self.notices.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification within 5s")
            .expect("notification channel open")
    }

    pub async fn next_event(&self) -> Event {
        let mut rx = self.events.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within 5s")
            .expect("event channel open")
    }

    pub fn pending_events(&self) -> usize {
        self.events.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }
}

pub fn line(item_id: Uuid, quantity: i32) -> OrderLineRequest {
    OrderLineRequest { item_id, quantity }
}

/// The full HTTP application over an in-memory store.
pub struct TestApp {
    router: Router,
    pub engine: TestEngine,
}

impl TestApp {
    pub async fn new() -> Self {
        let engine = TestEngine::new().await;
        let config = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        let state = AppState {
            db: engine.db.clone(),
            config: Arc::new(config),
            orders: engine.orders.clone(),
        };

        Self {
            router: pharmacy_orders::build_router(state),
            engine,
        }
    }

    /// Sends a request as `user_id` with the given role header, returning
    /// the status and the decoded JSON body (`Null` when empty).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        identity: Option<(Uuid, &str)>,
    ) -> (axum::http::StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user_id, role)) = identity {
            builder = builder
                .header("x-user-id", user_id.to_string())
                .header("x-user-role", role);
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("build request"))
            .await
            .expect("router error during test request");

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is json")
        };
        (status, json)
    }
}

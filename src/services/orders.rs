use crate::{
    db::{with_transaction, DbPool},
    entities::{
        item,
        order::{self, ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
        order_line::{self, ActiveModel as OrderLineActiveModel, Entity as OrderLineEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender, OrderStatusChange},
    notifications::NotificationHook,
    queries::{inventory_queries::below_minimum, order_queries::load_order_details},
    services::{
        catalog::{CatalogItem, CatalogLookup},
        order_status, stock_ledger,
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub use crate::queries::order_queries::OrderDetails;

const MAX_REJECTION_REASON_LEN: usize = 1000;

/// One requested cart line
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrderLineRequest {
    pub item_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

/// Optional information supplied at checkout
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CheckoutDetails {
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
    #[validate(length(max = 500, message = "Delivery address must be at most 500 characters"))]
    pub delivery_address: Option<String>,
    #[validate(url(message = "Prescription image must be a valid URL"))]
    pub prescription_image_url: Option<String>,
}

/// `quantity × unit_price`, exact
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// Sum of line totals, exact
pub fn order_total<'a>(lines: impl IntoIterator<Item = &'a order_line::Model>) -> Decimal {
    lines.into_iter().map(|line| line.total_price).sum()
}

/// Conditional status write. Only succeeds while the stored status still
/// equals `from`, which serializes concurrent transitions on one order.
struct StatusWrite {
    order_id: Uuid,
    from: OrderStatus,
    to: OrderStatus,
    actor_id: Option<Uuid>,
    rejection_reason: Option<String>,
}

impl StatusWrite {
    async fn apply<C>(self, conn: &C) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(self.to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Some(now)))
            .col_expr(order::Column::UpdatedBy, Expr::value(self.actor_id))
            .col_expr(
                order::Column::Version,
                Expr::col(order::Column::Version).add(1),
            );

        if self.from == OrderStatus::Pending {
            update = update
                .col_expr(order::Column::ProcessedBy, Expr::value(self.actor_id))
                .col_expr(order::Column::ProcessedAt, Expr::value(Some(now)));
        }
        if let Some(reason) = self.rejection_reason {
            update = update.col_expr(order::Column::RejectionReason, Expr::value(Some(reason)));
        }

        let result = update
            .filter(order::Column::Id.eq(self.order_id))
            .filter(order::Column::Status.eq(self.from))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            let current = current_status(conn, self.order_id).await?;
            return Err(ServiceError::InvalidTransition {
                current,
                requested: self.to,
            });
        }

        Ok(())
    }
}

async fn find_order<C>(conn: &C, order_id: Uuid) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or(ServiceError::OrderNotFound(order_id))
}

async fn current_status<C>(conn: &C, order_id: Uuid) -> Result<OrderStatus, ServiceError>
where
    C: ConnectionTrait,
{
    OrderEntity::find_by_id(order_id)
        .select_only()
        .column(order::Column::Status)
        .into_tuple::<OrderStatus>()
        .one(conn)
        .await?
        .ok_or(ServiceError::OrderNotFound(order_id))
}

async fn lines_of<C>(conn: &C, order_id: Uuid) -> Result<Vec<order_line::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(OrderLineEntity::find()
        .filter(order_line::Column::OrderId.eq(order_id))
        .order_by_asc(order_line::Column::LineNo)
        .all(conn)
        .await?)
}

async fn reload<C>(conn: &C, order_id: Uuid) -> Result<OrderDetails, ServiceError>
where
    C: ConnectionTrait,
{
    load_order_details(conn, order_id)
        .await?
        .ok_or(ServiceError::OrderNotFound(order_id))
}

/// A requester other than the owner may not act on the order. `None` means
/// the caller is privileged.
fn ensure_owner(order: &order::Model, requester_id: Option<Uuid>) -> Result<(), ServiceError> {
    match requester_id {
        Some(requester) if requester != order.user_id => Err(ServiceError::Forbidden(format!(
            "order {} belongs to another user",
            order.id
        ))),
        _ => Ok(()),
    }
}

/// Order lifecycle engine: the only writer of orders and order lines and the
/// only caller of stock mutations.
///
/// Holds no state of its own beyond its collaborators, so any number of
/// instances may run against the same store.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    catalog: Arc<dyn CatalogLookup>,
    notifier: Arc<dyn NotificationHook>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: Arc<dyn CatalogLookup>,
        notifier: Arc<dyn NotificationHook>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db_pool,
            catalog,
            notifier,
            event_sender,
        }
    }

    /// Turns a cart into a `Pending` order.
    ///
    /// Every item is resolved and priced before anything is written; the
    /// order and all of its lines are then inserted in one transaction. No
    /// stock is taken.
    #[instrument(skip(self, lines, details), fields(user_id = %user_id, lines = lines.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        lines: Vec<OrderLineRequest>,
        details: CheckoutDetails,
    ) -> Result<OrderDetails, ServiceError> {
        if lines.is_empty() {
            warn!("Rejected empty order");
            return Err(ServiceError::EmptyOrder);
        }
        for line in &lines {
            line.validate()?;
        }
        details.validate()?;

        let mut resolved: HashMap<Uuid, CatalogItem> = HashMap::new();
        for line in &lines {
            if resolved.contains_key(&line.item_id) {
                continue;
            }
            match self.catalog.resolve_item(line.item_id).await? {
                Some(item) if item.is_active => {
                    resolved.insert(line.item_id, item);
                }
                _ => {
                    warn!(item_id = %line.item_id, "Order references unknown or inactive item");
                    return Err(ServiceError::ItemNotFound(line.item_id));
                }
            }
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        let order_lines: Vec<order_line::Model> = lines
            .iter()
            .zip(1..)
            .map(|(line, line_no)| {
                let item = &resolved[&line.item_id];
                order_line::Model {
                    id: Uuid::new_v4(),
                    order_id,
                    line_no,
                    item_id: line.item_id,
                    item_name: item.name.clone(),
                    quantity: line.quantity,
                    unit_price: item.unit_price,
                    total_price: line_total(item.unit_price, line.quantity),
                }
            })
            .collect();
        let total_price = order_total(&order_lines);

        let order_model = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            status: Set(OrderStatus::Pending),
            total_price: Set(total_price),
            notes: Set(details.notes),
            delivery_address: Set(details.delivery_address),
            prescription_image_url: Set(details.prescription_image_url),
            rejection_reason: Set(None),
            processed_by: Set(None),
            processed_at: Set(None),
            updated_by: Set(Some(user_id)),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            version: Set(1),
        };

        let created = with_transaction::<_, _, ServiceError>(&self.db_pool, move |txn| {
            let order_model = order_model.clone();
            let line_models: Vec<OrderLineActiveModel> = order_lines
                .iter()
                .cloned()
                .map(OrderLineActiveModel::from)
                .collect();
            Box::pin(async move {
                order_model.insert(txn).await?;
                OrderLineEntity::insert_many(line_models).exec(txn).await?;
                reload(txn, order_id).await
            })
        })
        .await?;

        counter!("pharmacy_orders.created", 1);
        info!(order_id = %order_id, total_price = %created.order.total_price, "Order created");

        self.notify(OrderStatusChange {
            order_id,
            user_id,
            old_status: None,
            new_status: OrderStatus::Pending,
            reason: None,
            occurred_at: now,
        });

        Ok(created)
    }

    /// `Pending -> Approved`, taking stock for every line.
    ///
    /// The status write and all decrements share one transaction; if any
    /// line lacks stock the whole approval rolls back.
    #[instrument(skip(self), fields(order_id = %order_id, actor_id = %actor_id))]
    pub async fn approve(&self, order_id: Uuid, actor_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let watch_low_stock = self.event_sender.is_some();

        let result = with_transaction::<_, _, ServiceError>(&self.db_pool, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, order_id).await?;
                order_status::ensure_transition(order.status, OrderStatus::Approved)?;

                StatusWrite {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Approved,
                    actor_id: Some(actor_id),
                    rejection_reason: None,
                }
                .apply(txn)
                .await?;

                let lines = lines_of(txn, order_id).await?;
                for line in &lines {
                    stock_ledger::adjust_stock(txn, line.item_id, -line.quantity).await?;
                }

                let low_stock = if watch_low_stock {
                    below_minimum(txn, lines.iter().map(|l| l.item_id).collect()).await?
                } else {
                    Vec::new()
                };

                Ok((reload(txn, order_id).await?, low_stock))
            })
        })
        .await;

        let (approved, low_stock) = result.map_err(|e| {
            if matches!(e, ServiceError::InsufficientStock { .. }) {
                counter!("pharmacy_orders.insufficient_stock", 1);
            }
            warn!(error = %e, "Approval failed");
            e
        })?;

        self.record_transition(&approved, OrderStatus::Pending, None);
        self.publish_low_stock(low_stock);

        Ok(approved)
    }

    /// `Pending -> Rejected`. No stock was taken, so none is returned.
    #[instrument(skip(self, reason), fields(order_id = %order_id, actor_id = %actor_id))]
    pub async fn reject(
        &self,
        order_id: Uuid,
        reason: String,
        actor_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "A rejection reason is required".to_string(),
            ));
        }
        if reason.chars().count() > MAX_REJECTION_REASON_LEN {
            return Err(ServiceError::ValidationError(format!(
                "Rejection reason must be at most {} characters",
                MAX_REJECTION_REASON_LEN
            )));
        }

        let stored_reason = reason.clone();
        let rejected = with_transaction::<_, _, ServiceError>(&self.db_pool, move |txn| {
            let stored_reason = stored_reason.clone();
            Box::pin(async move {
                let order = find_order(txn, order_id).await?;
                order_status::ensure_transition(order.status, OrderStatus::Rejected)?;

                StatusWrite {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Rejected,
                    actor_id: Some(actor_id),
                    rejection_reason: Some(stored_reason),
                }
                .apply(txn)
                .await?;

                reload(txn, order_id).await
            })
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Rejection failed");
            e
        })?;

        self.record_transition(&rejected, OrderStatus::Pending, Some(reason));
        Ok(rejected)
    }

    /// `Pending | Approved -> Cancelled`.
    ///
    /// With a `requester_id` the caller must own the order. Cancelling an
    /// approved order returns its stock in the same transaction as the
    /// status write.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        requester_id: Option<Uuid>,
        actor_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let result = with_transaction::<_, _, ServiceError>(&self.db_pool, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, order_id).await?;
                ensure_owner(&order, requester_id)?;
                order_status::ensure_transition(order.status, OrderStatus::Cancelled)?;

                StatusWrite {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Cancelled,
                    actor_id: Some(actor_id),
                    rejection_reason: None,
                }
                .apply(txn)
                .await?;

                if order.status == OrderStatus::Approved {
                    for line in lines_of(txn, order_id).await? {
                        stock_ledger::adjust_stock(txn, line.item_id, line.quantity).await?;
                    }
                }

                Ok((order.status, reload(txn, order_id).await?))
            })
        })
        .await;

        let (previous, cancelled) = result.map_err(|e| {
            warn!(error = %e, "Cancellation failed");
            e
        })?;

        self.record_transition(&cancelled, previous, None);
        Ok(cancelled)
    }

    /// Fulfilment advance: `Approved -> Preparing -> Ready -> Delivered`.
    /// Any other target is an invalid transition.
    #[instrument(skip(self), fields(order_id = %order_id, next = %next, actor_id = %actor_id))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
        actor_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let result = with_transaction::<_, _, ServiceError>(&self.db_pool, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, order_id).await?;
                order_status::ensure_fulfilment_step(order.status, next)?;

                StatusWrite {
                    order_id,
                    from: order.status,
                    to: next,
                    actor_id: Some(actor_id),
                    rejection_reason: None,
                }
                .apply(txn)
                .await?;

                Ok((order.status, reload(txn, order_id).await?))
            })
        })
        .await;

        let (previous, advanced) = result.map_err(|e| {
            warn!(error = %e, "Transition failed");
            e
        })?;

        self.record_transition(&advanced, previous, None);
        Ok(advanced)
    }

    /// Removes a `Pending` order and its lines. Ownership is checked as in
    /// `cancel`; stock is untouched.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_pending_order(
        &self,
        order_id: Uuid,
        requester_id: Option<Uuid>,
    ) -> Result<(), ServiceError> {
        with_transaction::<_, _, ServiceError>(&self.db_pool, move |txn| {
            Box::pin(async move {
                let order = find_order(txn, order_id).await?;
                ensure_owner(&order, requester_id)?;
                if order.status != OrderStatus::Pending {
                    return Err(ServiceError::InvalidTransition {
                        current: order.status,
                        requested: OrderStatus::Cancelled,
                    });
                }

                OrderLineEntity::delete_many()
                    .filter(order_line::Column::OrderId.eq(order_id))
                    .exec(txn)
                    .await?;

                let deleted = OrderEntity::delete_many()
                    .filter(order::Column::Id.eq(order_id))
                    .filter(order::Column::Status.eq(OrderStatus::Pending))
                    .exec(txn)
                    .await?;

                if deleted.rows_affected == 0 {
                    return Err(ServiceError::InvalidTransition {
                        current: current_status(txn, order_id).await?,
                        requested: OrderStatus::Cancelled,
                    });
                }

                Ok(())
            })
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Delete failed");
            e
        })?;

        info!("Pending order deleted");
        Ok(())
    }

    fn record_transition(&self, details: &OrderDetails, from: OrderStatus, reason: Option<String>) {
        let order = &details.order;
        counter!("pharmacy_orders.transitions", 1, "to" => order.status.to_string());
        info!(
            order_id = %order.id,
            from = %from,
            to = %order.status,
            version = order.version,
            "Order status changed"
        );

        self.notify(OrderStatusChange {
            order_id: order.id,
            user_id: order.user_id,
            old_status: Some(from),
            new_status: order.status,
            reason,
            occurred_at: order.updated_at.unwrap_or_else(Utc::now),
        });
    }

    /// Hands the change to the hook on a spawned task; the caller never
    /// waits for it and its failure only produces a log line.
    fn notify(&self, change: OrderStatusChange) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let order_id = change.order_id;
            if let Err(e) = notifier.order_status_changed(change).await {
                warn!(order_id = %order_id, error = %e, "Notification hook failed");
            }
        });
    }

    fn publish_low_stock(&self, items: Vec<item::Model>) {
        let Some(sender) = &self.event_sender else {
            return;
        };
        for item in items {
            let event = Event::LowStock {
                item_id: item.id,
                quantity_on_hand: item.quantity_on_hand,
                min_stock_level: item.min_stock_level,
            };
            if let Err(e) = sender.try_send(event) {
                warn!(item_id = %item.id, error = %e, "Dropped low stock event");
            }
        }
    }
}

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::Query;
use crate::{
    db::DbPool,
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_line::{self, Entity as OrderLineEntity},
    },
    errors::ServiceError,
};

/// An order together with its lines in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: order::Model,
    pub lines: Vec<order_line::Model>,
}

/// Loads one order and its lines through `conn`, which may be an open
/// transaction.
pub(crate) async fn load_order_details<C>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<OrderDetails>, ServiceError>
where
    C: ConnectionTrait,
{
    let Some(order) = OrderEntity::find_by_id(order_id).one(conn).await? else {
        return Ok(None);
    };

    let lines = OrderLineEntity::find()
        .filter(order_line::Column::OrderId.eq(order_id))
        .order_by_asc(order_line::Column::LineNo)
        .all(conn)
        .await?;

    Ok(Some(OrderDetails { order, lines }))
}

/// Fetches the lines for a batch of orders in one round trip
async fn attach_lines<C>(conn: &C, orders: Vec<order::Model>) -> Result<Vec<OrderDetails>, ServiceError>
where
    C: ConnectionTrait,
{
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut by_order: HashMap<Uuid, Vec<order_line::Model>> = HashMap::new();
    for line in OrderLineEntity::find()
        .filter(order_line::Column::OrderId.is_in(ids))
        .order_by_asc(order_line::Column::OrderId)
        .order_by_asc(order_line::Column::LineNo)
        .all(conn)
        .await?
    {
        by_order.entry(line.order_id).or_default().push(line);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let lines = by_order.remove(&order.id).unwrap_or_default();
            OrderDetails { order, lines }
        })
        .collect())
}

fn newest_first(select: Select<OrderEntity>) -> Select<OrderEntity> {
    select
        .order_by_desc(order::Column::CreatedAt)
        .order_by_desc(order::Column::Id)
}

/// Struct to get a specific order by ID.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetOrderQuery {
    pub order_id: Uuid,
}

#[async_trait]
impl Query for GetOrderQuery {
    type Result = Option<OrderDetails>;

    #[instrument(skip(self, db), fields(order_id = %self.order_id))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        debug!("Executing GetOrderQuery");
        load_order_details(db, self.order_id).await
    }
}

/// A page of a customer's orders, newest first. `page` starts at 1.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListOrdersForUserQuery {
    pub user_id: Uuid,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPage {
    pub orders: Vec<OrderDetails>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

#[async_trait]
impl Query for ListOrdersForUserQuery {
    type Result = OrderPage;

    #[instrument(skip(self, db), fields(user_id = %self.user_id, page = self.page))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        let page = self.page.max(1);
        let per_page = self.per_page.max(1);

        let paginator = newest_first(
            OrderEntity::find().filter(order::Column::UserId.eq(self.user_id)),
        )
        .paginate(db, per_page);

        let totals = paginator.num_items_and_pages().await?;
        let orders = paginator.fetch_page(page - 1).await?;

        Ok(OrderPage {
            orders: attach_lines(db, orders).await?,
            total: totals.number_of_items,
            page,
            per_page,
            total_pages: totals.number_of_pages,
        })
    }
}

/// The pharmacist work queue: every `Pending` order, oldest first
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ListPendingOrdersQuery;

#[async_trait]
impl Query for ListPendingOrdersQuery {
    type Result = Vec<OrderDetails>;

    #[instrument(skip(self, db))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .all(db)
            .await?;

        attach_lines(db, orders).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListOrdersByStatusQuery {
    pub status: OrderStatus,
}

#[async_trait]
impl Query for ListOrdersByStatusQuery {
    type Result = Vec<OrderDetails>;

    #[instrument(skip(self, db), fields(status = %self.status))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        let orders = newest_first(
            OrderEntity::find().filter(order::Column::Status.eq(self.status)),
        )
        .all(db)
        .await?;

        attach_lines(db, orders).await
    }
}

/// Order counts per status and delivered revenue, optionally for one customer
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct OrderStatsQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    pub total_orders: u64,
    pub pending: u64,
    pub approved: u64,
    pub preparing: u64,
    pub ready: u64,
    pub delivered: u64,
    pub rejected: u64,
    pub cancelled: u64,
    /// Sum of `total_price` over delivered orders
    pub revenue: Decimal,
}

impl OrderStats {
    fn record(&mut self, status: OrderStatus, count: u64) {
        let slot = match status {
            OrderStatus::Pending => &mut self.pending,
            OrderStatus::Approved => &mut self.approved,
            OrderStatus::Preparing => &mut self.preparing,
            OrderStatus::Ready => &mut self.ready,
            OrderStatus::Delivered => &mut self.delivered,
            OrderStatus::Rejected => &mut self.rejected,
            OrderStatus::Cancelled => &mut self.cancelled,
        };
        *slot += count;
        self.total_orders += count;
    }
}

#[async_trait]
impl Query for OrderStatsQuery {
    type Result = OrderStats;

    #[instrument(skip(self, db))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        let scoped = || {
            let select = OrderEntity::find();
            match self.user_id {
                Some(user_id) => select.filter(order::Column::UserId.eq(user_id)),
                None => select,
            }
        };

        let counts = scoped()
            .select_only()
            .column(order::Column::Status)
            .column_as(order::Column::Id.count(), "count")
            .group_by(order::Column::Status)
            .into_tuple::<(OrderStatus, i64)>()
            .all(db)
            .await?;

        let mut stats = OrderStats::default();
        for (status, count) in counts {
            stats.record(status, u64::try_from(count).unwrap_or(0));
        }

        // Summed here rather than in SQL so the arithmetic stays fixed-point
        // on every backend.
        stats.revenue = scoped()
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .select_only()
            .column(order::Column::TotalPrice)
            .into_tuple::<Decimal>()
            .all(db)
            .await?
            .into_iter()
            .sum();

        Ok(stats)
    }
}

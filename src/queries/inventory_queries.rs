use async_trait::async_trait;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::Query;
use crate::{
    db::DbPool,
    entities::item::{self, Entity as ItemEntity},
    errors::ServiceError,
    services::stock_ledger,
};

#[derive(Debug, Serialize, Deserialize)]
pub struct PeekStockQuery {
    pub item_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub item_id: Uuid,
    pub quantity_on_hand: i32,
}

#[async_trait]
impl Query for PeekStockQuery {
    type Result = StockLevel;

    #[instrument(skip(self, db), fields(item_id = %self.item_id))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        let quantity_on_hand = stock_ledger::peek_stock(db, self.item_id).await?;
        Ok(StockLevel {
            item_id: self.item_id,
            quantity_on_hand,
        })
    }
}

/// Active items at or below `threshold`, or at or below their own
/// `min_stock_level` when no threshold is given. Lowest stock first.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LowStockItemsQuery {
    pub threshold: Option<i32>,
}

#[async_trait]
impl Query for LowStockItemsQuery {
    type Result = Vec<item::Model>;

    #[instrument(skip(self, db))]
    async fn execute(&self, db: &DbPool) -> Result<Self::Result, ServiceError> {
        let select = ItemEntity::find().filter(item::Column::IsActive.eq(true));
        let select = match self.threshold {
            Some(threshold) => select.filter(item::Column::QuantityOnHand.lte(threshold)),
            None => select.filter(
                Expr::col(item::Column::QuantityOnHand).lte(Expr::col(item::Column::MinStockLevel)),
            ),
        };

        Ok(select
            .order_by_asc(item::Column::QuantityOnHand)
            .order_by_asc(item::Column::Name)
            .all(db)
            .await?)
    }
}

/// Which of `item_ids` are at or below their minimum stock level, read
/// through `conn` so an open transaction sees its own adjustments.
pub(crate) async fn below_minimum<C>(
    conn: &C,
    item_ids: Vec<Uuid>,
) -> Result<Vec<item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    if item_ids.is_empty() {
        return Ok(Vec::new());
    }

    Ok(ItemEntity::find()
        .filter(item::Column::Id.is_in(item_ids))
        .filter(
            Expr::col(item::Column::QuantityOnHand).lte(Expr::col(item::Column::MinStockLevel)),
        )
        .all(conn)
        .await?)
}

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::{EntityTrait, QuerySelect};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::item::{self, Entity as ItemEntity},
    errors::ServiceError,
};

/// Current catalog view of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub is_active: bool,
}

/// Read-only price and availability lookup used when an order is created
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// `None` when no such item exists
    async fn resolve_item(&self, item_id: Uuid) -> Result<Option<CatalogItem>, ServiceError>;
}

/// Catalog backed by the `items` table
#[derive(Clone)]
pub struct DbCatalog {
    db_pool: Arc<DbPool>,
}

impl DbCatalog {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl CatalogLookup for DbCatalog {
    async fn resolve_item(&self, item_id: Uuid) -> Result<Option<CatalogItem>, ServiceError> {
        let row = ItemEntity::find_by_id(item_id)
            .select_only()
            .columns([
                item::Column::Id,
                item::Column::Name,
                item::Column::UnitPrice,
                item::Column::IsActive,
            ])
            .into_tuple::<(Uuid, String, Decimal, bool)>()
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(item_id = %item_id, error = %e, "Failed to resolve catalog item");
                ServiceError::TransactionAborted(e)
            })?;

        Ok(row.map(|(id, name, unit_price, is_active)| CatalogItem {
            id,
            name,
            unit_price,
            is_active,
        }))
    }
}

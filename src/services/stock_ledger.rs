//! Authoritative quantity-on-hand per item.
//!
//! The only mutation is a relative adjust executed as one conditional
//! `UPDATE`, so concurrent callers on the same item serialize on the row
//! the store locks for the write. Callers pass the connection (normally an
//! open transaction) so the adjustment commits or rolls back with the rest
//! of their work.

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::item::{self, Entity as ItemEntity},
    errors::ServiceError,
};

/// Applies `delta` to the item's quantity-on-hand and returns the new
/// quantity.
///
/// Fails with `InsufficientStock` when the result would be negative and with
/// `ItemNotFound` when the item is missing or inactive; in both cases nothing
/// is written.
#[instrument(skip(conn))]
pub async fn adjust_stock<C>(conn: &C, item_id: Uuid, delta: i32) -> Result<i32, ServiceError>
where
    C: ConnectionTrait,
{
    let updated = ItemEntity::update_many()
        .col_expr(
            item::Column::QuantityOnHand,
            Expr::col(item::Column::QuantityOnHand).add(delta),
        )
        .col_expr(item::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(item::Column::Id.eq(item_id))
        .filter(item::Column::IsActive.eq(true))
        .filter(item::Column::QuantityOnHand.gte(delta.saturating_neg()))
        .exec_with_returning(conn)
        .await?;

    // The returned row is the one this statement wrote, not a later read
    if let Some(row) = updated.into_iter().next() {
        debug!(new_quantity = row.quantity_on_hand, "Stock adjusted");
        return Ok(row.quantity_on_hand);
    }

    let current = ItemEntity::find_by_id(item_id).one(conn).await?;
    match current {
        Some(row) if row.is_active => {
            warn!(
                available = row.quantity_on_hand,
                requested = delta.saturating_neg(),
                "Stock adjustment refused"
            );
            Err(ServiceError::InsufficientStock {
                item_id,
                requested: delta.saturating_neg(),
                available: row.quantity_on_hand,
            })
        }
        _ => Err(ServiceError::ItemNotFound(item_id)),
    }
}

/// Non-mutating read of an active item's quantity-on-hand. The value is an
/// estimate only; it reserves nothing.
pub async fn peek_stock<C>(conn: &C, item_id: Uuid) -> Result<i32, ServiceError>
where
    C: ConnectionTrait,
{
    quantity_of(conn, item_id).await
}

async fn quantity_of<C>(conn: &C, item_id: Uuid) -> Result<i32, ServiceError>
where
    C: ConnectionTrait,
{
    ItemEntity::find_by_id(item_id)
        .filter(item::Column::IsActive.eq(true))
        .select_only()
        .column(item::Column::QuantityOnHand)
        .into_tuple::<i32>()
        .one(conn)
        .await?
        .ok_or(ServiceError::ItemNotFound(item_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::item::ActiveModel as ItemActiveModel;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
    use sea_orm_migration::MigratorTrait;

    async fn setup() -> DatabaseConnection {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        crate::migrator::Migrator::up(&db, None).await.unwrap();
        db
    }

    async fn item(db: &DatabaseConnection, quantity: i32, active: bool) -> Uuid {
        let id = Uuid::new_v4();
        ItemActiveModel {
            id: Set(id),
            name: Set("Paracetamol 500mg".into()),
            unit_price: Set(dec!(15.00)),
            quantity_on_hand: Set(quantity),
            min_stock_level: Set(0),
            is_active: Set(active),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn decrement_and_restore() {
        let db = setup().await;
        let id = item(&db, 5, true).await;

        assert_eq!(adjust_stock(&db, id, -3).await.unwrap(), 2);
        assert_eq!(adjust_stock(&db, id, 3).await.unwrap(), 5);
        assert_eq!(adjust_stock(&db, id, 0).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn refuses_to_go_negative() {
        let db = setup().await;
        let id = item(&db, 2, true).await;

        let err = adjust_stock(&db, id, -3).await.unwrap_err();
        assert_matches!(
            err,
            ServiceError::InsufficientStock { item_id, requested: 3, available: 2 } if item_id == id
        );
        assert_eq!(peek_stock(&db, id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn draining_to_exactly_zero_is_allowed() {
        let db = setup().await;
        let id = item(&db, 4, true).await;

        assert_eq!(adjust_stock(&db, id, -4).await.unwrap(), 0);
        assert_matches!(
            adjust_stock(&db, id, -1).await,
            Err(ServiceError::InsufficientStock { available: 0, .. })
        );
    }

    #[tokio::test]
    async fn missing_or_inactive_items_are_not_found() {
        let db = setup().await;
        let inactive = item(&db, 10, false).await;
        let missing = Uuid::new_v4();

        assert_matches!(
            adjust_stock(&db, inactive, -1).await,
            Err(ServiceError::ItemNotFound(id)) if id == inactive
        );
        assert_matches!(
            adjust_stock(&db, missing, 1).await,
            Err(ServiceError::ItemNotFound(id)) if id == missing
        );
        assert_matches!(peek_stock(&db, missing).await, Err(ServiceError::ItemNotFound(_)));
    }
}

mod common;

use assert_matches::assert_matches;
use pharmacy_orders::{
    db::retry::RetryConfig,
    entities::{item, order::OrderStatus},
    errors::ServiceError,
    queries::{
        execute_with_retry,
        inventory_queries::{LowStockItemsQuery, PeekStockQuery},
        order_queries::{
            GetOrderQuery, ListOrdersByStatusQuery, ListOrdersForUserQuery,
            ListPendingOrdersQuery, OrderStatsQuery,
        },
        Query,
    },
    services::orders::CheckoutDetails,
};
use rust_decimal_macros::dec;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use common::{line, TestEngine};

#[tokio::test]
async fn get_order_returns_lines_in_insertion_order() {
    let engine = TestEngine::new().await;
    let a = engine.item("Amoxicillin 500mg", dec!(25.50), 10).await;
    let b = engine.item("Ibuprofen 400mg", dec!(20.75), 10).await;

    let created = engine
        .orders
        .create_order(
            Uuid::new_v4(),
            vec![line(b, 1), line(a, 2), line(b, 3)],
            CheckoutDetails::default(),
        )
        .await
        .unwrap();

    let found = GetOrderQuery {
        order_id: created.order.id,
    }
    .execute(&engine.db)
    .await
    .unwrap()
    .expect("order exists");
    let items: Vec<_> = found.lines.iter().map(|l| (l.item_id, l.quantity)).collect();
    assert_eq!(items, vec![(b, 1), (a, 2), (b, 3)]);
    assert_eq!(found, created);

    let missing = GetOrderQuery {
        order_id: Uuid::new_v4(),
    }
    .execute(&engine.db)
    .await
    .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn customer_history_is_paginated_newest_first() {
    let engine = TestEngine::new().await;
    let item = engine.item("Paracetamol 500mg", dec!(15.00), 100).await;
    let customer = Uuid::new_v4();

    let mut ids = Vec::new();
    for quantity in 1..=5 {
        let created = engine
            .orders
            .create_order(customer, vec![line(item, quantity)], CheckoutDetails::default())
            .await
            .unwrap();
        ids.push(created.order.id);
    }
    engine
        .orders
        .create_order(Uuid::new_v4(), vec![line(item, 1)], CheckoutDetails::default())
        .await
        .unwrap();

    let page = ListOrdersForUserQuery {
        user_id: customer,
        page: 1,
        per_page: 2,
    }
    .execute(&engine.db)
    .await
    .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    assert_eq!(
        page.orders.iter().map(|o| o.order.id).collect::<Vec<_>>(),
        vec![ids[4], ids[3]]
    );
    assert!(page.orders.iter().all(|o| o.lines.len() == 1));

    let last = ListOrdersForUserQuery {
        user_id: customer,
        page: 3,
        per_page: 2,
    }
    .execute(&engine.db)
    .await
    .unwrap();
    assert_eq!(last.orders.len(), 1);
    assert_eq!(last.orders[0].order.id, ids[0]);
}

#[tokio::test]
async fn pending_queue_and_status_listing() {
    let engine = TestEngine::new().await;
    let item = engine.item("Vitamin D3 5000 IU", dec!(35.00), 10).await;
    let staff = Uuid::new_v4();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let created = engine
            .orders
            .create_order(Uuid::new_v4(), vec![line(item, 1)], CheckoutDetails::default())
            .await
            .unwrap();
        ids.push(created.order.id);
    }
    engine.orders.approve(ids[1], staff).await.unwrap();

    let pending = ListPendingOrdersQuery.execute(&engine.db).await.unwrap();
    assert_eq!(
        pending.iter().map(|o| o.order.id).collect::<Vec<_>>(),
        vec![ids[0], ids[2]]
    );

    let approved = ListOrdersByStatusQuery {
        status: OrderStatus::Approved,
    }
    .execute(&engine.db)
    .await
    .unwrap();
    assert_eq!(approved.len(), 1);
    assert_eq!(approved[0].order.id, ids[1]);
    assert_eq!(approved[0].lines.len(), 1);
}

#[tokio::test]
async fn stats_count_statuses_and_delivered_revenue() {
    let engine = TestEngine::new().await;
    let item = engine.item("Ibuprofen 400mg", dec!(20.75), 50).await;
    let customer = Uuid::new_v4();
    let staff = Uuid::new_v4();

    let delivered = engine
        .orders
        .create_order(customer, vec![line(item, 2)], CheckoutDetails::default())
        .await
        .unwrap()
        .order
        .id;
    engine.orders.approve(delivered, staff).await.unwrap();
    for next in [OrderStatus::Preparing, OrderStatus::Ready, OrderStatus::Delivered] {
        engine.orders.transition(delivered, next, staff).await.unwrap();
    }

    let rejected = engine
        .orders
        .create_order(customer, vec![line(item, 1)], CheckoutDetails::default())
        .await
        .unwrap()
        .order
        .id;
    engine
        .orders
        .reject(rejected, "Duplicate order".into(), staff)
        .await
        .unwrap();

    engine
        .orders
        .create_order(Uuid::new_v4(), vec![line(item, 4)], CheckoutDetails::default())
        .await
        .unwrap();

    let mine = OrderStatsQuery {
        user_id: Some(customer),
    }
    .execute(&engine.db)
    .await
    .unwrap();
    assert_eq!(mine.total_orders, 2);
    assert_eq!(mine.delivered, 1);
    assert_eq!(mine.rejected, 1);
    assert_eq!(mine.pending, 0);
    assert_eq!(mine.revenue, dec!(41.50));

    let store = OrderStatsQuery { user_id: None }
        .execute(&engine.db)
        .await
        .unwrap();
    assert_eq!(store.total_orders, 3);
    assert_eq!(store.pending, 1);
    assert_eq!(store.revenue, dec!(41.50));
}

#[tokio::test]
async fn peek_reads_without_reserving() {
    let engine = TestEngine::new().await;
    let item_id = engine.item("Insulin Glargine", dec!(85.00), 7).await;

    let level = PeekStockQuery { item_id }.execute(&engine.db).await.unwrap();
    assert_eq!(level.quantity_on_hand, 7);
    let again = PeekStockQuery { item_id }.execute(&engine.db).await.unwrap();
    assert_eq!(again, level);

    item::Entity::update_many()
        .col_expr(item::Column::IsActive, Expr::value(false))
        .filter(item::Column::Id.eq(item_id))
        .exec(&*engine.db)
        .await
        .unwrap();
    assert_matches!(
        PeekStockQuery { item_id }.execute(&engine.db).await,
        Err(ServiceError::ItemNotFound(id)) if id == item_id
    );
}

#[tokio::test]
async fn low_stock_uses_threshold_or_item_minimum() {
    let engine = TestEngine::new().await;
    let low = engine
        .item_with_minimum("Insulin Glargine", dec!(85.00), 8, 10)
        .await;
    let at_minimum = engine
        .item_with_minimum("Vitamin D3 5000 IU", dec!(35.00), 15, 15)
        .await;
    engine
        .item_with_minimum("Paracetamol 500mg", dec!(15.00), 200, 30)
        .await;

    let by_minimum = LowStockItemsQuery { threshold: None }
        .execute(&engine.db)
        .await
        .unwrap();
    assert_eq!(
        by_minimum.iter().map(|i| i.id).collect::<Vec<_>>(),
        vec![low, at_minimum]
    );

    let by_threshold = LowStockItemsQuery { threshold: Some(10) }
        .execute(&engine.db)
        .await
        .unwrap();
    assert_eq!(by_threshold.iter().map(|i| i.id).collect::<Vec<_>>(), vec![low]);
}

#[tokio::test]
async fn retrying_executor_returns_the_query_result() {
    let engine = TestEngine::new().await;
    let item_id = engine.item("Amoxicillin 500mg", dec!(25.50), 3).await;

    let level = execute_with_retry(
        &PeekStockQuery { item_id },
        &engine.db,
        &RetryConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(level.quantity_on_hand, 3);

    // Domain failures are not retried
    assert_matches!(
        execute_with_retry(
            &PeekStockQuery {
                item_id: Uuid::new_v4()
            },
            &engine.db,
            &RetryConfig::default(),
        )
        .await,
        Err(ServiceError::ItemNotFound(_))
    );
}

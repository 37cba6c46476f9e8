//! Seeds the medicine catalog with starting stock.
//!
//! Run with: cargo run --bin seed-data
//!
//! Items that already exist by name are left alone, so the script can be
//! re-run safely.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use tracing::info;
use uuid::Uuid;

use pharmacy_orders::{db, entities::item, migrator::Migrator};
use sea_orm_migration::MigratorTrait;

struct SeedItem {
    name: &'static str,
    unit_price: Decimal,
    quantity_on_hand: i32,
    min_stock_level: i32,
}

fn catalog() -> Vec<SeedItem> {
    vec![
        SeedItem {
            name: "Amoxicillin 500mg",
            unit_price: dec!(25.50),
            quantity_on_hand: 120,
            min_stock_level: 20,
        },
        SeedItem {
            name: "Paracetamol 500mg",
            unit_price: dec!(15.00),
            quantity_on_hand: 200,
            min_stock_level: 30,
        },
        SeedItem {
            name: "Vitamin D3 5000 IU",
            unit_price: dec!(35.00),
            quantity_on_hand: 80,
            min_stock_level: 15,
        },
        SeedItem {
            name: "Ibuprofen 400mg",
            unit_price: dec!(20.75),
            quantity_on_hand: 150,
            min_stock_level: 25,
        },
        SeedItem {
            name: "Insulin Glargine",
            unit_price: dec!(85.00),
            quantity_on_hand: 45,
            min_stock_level: 10,
        },
        SeedItem {
            name: "Hyaluronic Acid Face Moisturizer",
            unit_price: dec!(45.50),
            quantity_on_hand: 60,
            min_stock_level: 12,
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://pharmacy.db?mode=rwc".to_string());

    info!("Connecting to database: {}", database_url);
    let db = db::establish_connection(&database_url).await?;
    Migrator::up(&db, None).await?;

    let created = seed_items(&db).await?;
    info!("Seeded {} new catalog items", created);
    Ok(())
}

async fn seed_items(db: &DatabaseConnection) -> anyhow::Result<usize> {
    let mut created = 0;
    for seed in catalog() {
        let existing = item::Entity::find()
            .filter(item::Column::Name.eq(seed.name))
            .count(db)
            .await?;
        if existing > 0 {
            info!("  {} already present, skipping", seed.name);
            continue;
        }

        item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(seed.name.to_string()),
            unit_price: Set(seed.unit_price),
            quantity_on_hand: Set(seed.quantity_on_hand),
            min_stock_level: Set(seed.min_stock_level),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await?;
        info!("  {} ({} in stock)", seed.name, seed.quantity_on_hand);
        created += 1;
    }
    Ok(created)
}

use sea_orm_migration::MigratorTrait;
use tracing::info;

use pharmacy_orders::{db, migrator::Migrator};

/// Applies pending schema migrations. `MIGRATE_DIRECTION=down` rolls back
/// the most recent one instead.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite://pharmacy.db?mode=rwc".to_string());
    info!("Connecting to database: {}", database_url);

    let db = db::establish_connection(&database_url).await?;

    let rollback = std::env::var("MIGRATE_DIRECTION")
        .map(|d| d.eq_ignore_ascii_case("down"))
        .unwrap_or(false);
    if rollback {
        info!("Rolling back the latest migration");
        Migrator::down(&db, Some(1)).await?;
    } else {
        info!("Applying pending migrations");
        Migrator::up(&db, None).await?;
    }

    info!("Migration completed successfully");
    Ok(())
}

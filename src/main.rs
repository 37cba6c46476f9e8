use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use pharmacy_orders as app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = app::config::load_config().context("failed to load configuration")?;
    app::config::init_tracing(&cfg.log_level, cfg.log_json);

    let db_pool = app::db::establish_connection_with_config(&cfg.db_config())
        .await
        .context("failed to connect to the database")?;
    if cfg.auto_migrate {
        app::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Status changes and low-stock alerts flow through one bounded channel
    let (event_sender, event_rx) = app::events::channel(cfg.event_channel_capacity);
    tokio::spawn(app::events::process_events(
        event_rx,
        app::events::default_handlers(),
    ));

    let notifier = Arc::new(app::notifications::EventChannelHook::new(event_sender.clone()));
    let catalog = Arc::new(app::services::catalog::DbCatalog::new(db_arc.clone()));
    let orders = Arc::new(app::services::orders::OrderService::new(
        db_arc.clone(),
        catalog,
        notifier,
        Some(Arc::new(event_sender)),
    ));

    let state = app::AppState {
        db: db_arc,
        config: Arc::new(cfg.clone()),
        orders,
    };
    let router = app::build_router(state);

    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address: {}", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);
    info!(environment = %cfg.environment, "pharmacy-orders listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

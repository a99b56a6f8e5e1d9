use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agenda_api::api::{build_router, handlers::AppState};
use agenda_api::config::Config;
use agenda_api::db::Database;

/// Main entry point for the application.
///
/// Initializes logging, loads configuration, connects to Postgres (applying
/// migrations unless disabled), builds the storefront cache and router, and
/// serves until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agenda_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    if config.run_migrations {
        db.migrate().await?;
    } else {
        tracing::info!("Skipping migrations (RUN_MIGRATIONS disabled)");
    }

    let app_state = Arc::new(AppState::new(db.pool.clone(), config.clone()));
    tracing::info!(
        "Storefront cache initialized ({}s TTL)",
        config.storefront_cache_ttl_secs
    );

    let app = build_router(app_state, true)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

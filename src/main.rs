use std::future::IntoFuture;

use tracing_subscriber::EnvFilter;

use wa_console::app::{router, AppState};
use wa_console::config::config;
use wa_console::database::DatabaseManager;
use wa_console::is_development;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, STORE_BACKEND, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = config();
    tracing::info!("Starting WhatsApp Console API in {:?} mode", config.environment);
    if is_development!() {
        tracing::debug!("Effective configuration: {:?}", config);
    }

    let state = AppState::from_config(config).await?;
    let app = router(state);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("WhatsApp Console API listening on http://{}", bind_addr);

    // Open push feeds never finish on their own, so stop serving outright on Ctrl-C
    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        _ = shutdown_signal() => {}
    }

    DatabaseManager::close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

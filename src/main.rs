//! Main entry point for the image generation worker node

use gen_worker_node::{api, config::Settings, AppState};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("Starting image generation worker node");
    info!(
        "Loaded configuration: server={}:{} backend={} output_dir={}",
        settings.server.host, settings.server.port, settings.backend.url, settings.backend.output_dir
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let liveness_enabled = settings.liveness.enabled;
    let liveness_interval = Duration::from_secs(settings.liveness.interval_secs);

    // Create application state
    let app_state = Arc::new(AppState::from_settings(settings)?);

    // Start liveness background task
    if liveness_enabled {
        app_state.liveness.start(liveness_interval).await;
    }

    // Build the router
    let app = api::routes::create_router(app_state.clone());

    info!("Server listening on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    app_state.liveness.stop().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

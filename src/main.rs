// Main entry point - Dependency injection and server setup
mod domain;
mod application;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use tracing_subscriber::EnvFilter;

use crate::application::feed_repository::FeedRepository;
use crate::application::overlay_controller::OverlayController;
use crate::infrastructure::config::{load_app_config, FeedSource};
use crate::infrastructure::file_feed_repository::FileFeedRepository;
use crate::infrastructure::http_feed_repository::HttpFeedRepository;
use crate::presentation::app_state::AppState;
use crate::presentation::router::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_app_config()?;

    // Initialize tracing; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Create repository (infrastructure layer)
    let feeds = &config.feeds;
    let repository: Arc<dyn FeedRepository> = match feeds.source {
        FeedSource::File => Arc::new(FileFeedRepository::new(
            &feeds.regions.location,
            &feeds.stations.location,
        )),
        FeedSource::Http => Arc::new(HttpFeedRepository::new(
            feeds.regions.location.clone(),
            feeds.stations.location.clone(),
            Duration::from_secs(feeds.timeout_secs),
        )?),
    };
    tracing::info!(
        "Reading {:?} feeds: regions={} stations={}",
        feeds.source,
        feeds.regions.location,
        feeds.stations.location
    );

    // Create controller (application layer); polling starts with an immediate refresh
    let controller = Arc::new(OverlayController::new(
        repository,
        feeds,
        config.engine.clone(),
        config.refresh.clone(),
    ));
    controller.start();

    // Build router (presentation layer)
    let state = Arc::new(AppState {
        controller: controller.clone(),
    });
    let router = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    tracing::info!("Starting meteo-overlay service on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    controller.stop();
    Ok(())
}

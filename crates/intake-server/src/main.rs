//! The `intake` service binary.

use std::path::PathBuf;
use std::sync::Arc;

use intake_core::MetricsRecorder;
use intake_engine::{DefaultAdapterFactory, IngestionEngine};
use intake_pipeline::{DuplicateStore, InMemoryReferenceLookup};
use intake_server::{router, AppState, ServiceConfig};
use intake_storage::{PostgresStorage, StorageAdapter};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("intake.toml"), PathBuf::from);
    let config = ServiceConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.tracing_filter.clone())),
        )
        .init();
    info!(config = ?config_path, bind = %config.bind_addr, "starting intake");

    let storage =
        Arc::new(PostgresStorage::with_pool_size(&config.database_url, config.pool_size).await?);
    storage.ensure_catalog().await?;

    let engine = IngestionEngine::new(
        config.engine_config(),
        storage.clone() as Arc<dyn StorageAdapter>,
        storage as Arc<dyn DuplicateStore>,
        Arc::new(InMemoryReferenceLookup::new()),
        Arc::new(DefaultAdapterFactory),
        MetricsRecorder::new(),
    );
    let restored = engine.restore_sources().await?;
    info!(restored, "persisted sources restored");
    engine.start();

    let app = router(Arc::new(AppState {
        engine: engine.clone(),
    }))
    .layer(tower_http::compression::CompressionLayer::new())
    .layer(tower_http::cors::CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "admin surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    engine.shutdown().await;
    Ok(())
}

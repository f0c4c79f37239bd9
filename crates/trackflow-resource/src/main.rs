//! Trackflow Resource Service - Main entry point
//!
//! Hosts the ingestion HTTP surface, the in-process event bus, the
//! processing worker subscription, and the completion consumer that
//! promotes processed resources to permanent storage.

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use trackflow_common::bus::{BusConfig, EventBus};
use trackflow_common::events::{COMPLETION_TOPIC, RESOURCE_TOPIC};
use trackflow_common::logging::{init_logging, LogConfig};
use trackflow_processor::clients::{HttpMetadataSink, HttpResourceFetcher};
use trackflow_processor::worker::{ProcessorWorker, PROCESSOR_GROUP};
use trackflow_resource::consumer::{CompletionConsumer, COMPLETION_GROUP};
use trackflow_resource::object_store::{ObjectMover, S3ObjectStore};
use trackflow_resource::records::PgRecordStore;
use trackflow_resource::routes::{self, AppState};
use trackflow_resource::storage_client::HttpStorageResolver;
use trackflow_resource::{Config, IngestionCoordinator};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::from_env()?
        .with_file_prefix("trackflow-resource");
    init_logging(&log_config)?;

    info!("Starting Trackflow Resource Service");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .connect(&config.database.url)
        .await?;
    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    let bus = EventBus::new(BusConfig::default());

    let coordinator = Arc::new(IngestionCoordinator::new(
        Arc::new(PgRecordStore::new(db_pool)),
        Arc::new(HttpStorageResolver::new(config.storage_service.base_url.clone())),
        ObjectMover::new(Arc::new(S3ObjectStore::new(&config.object_store))),
        bus.clone(),
    ));

    let own_base_url = format!("http://{}:{}", config.server.host, config.server.port);
    let worker = Arc::new(ProcessorWorker::new(
        Arc::new(HttpResourceFetcher::new(own_base_url)),
        Arc::new(HttpMetadataSink::new(config.catalog_service.base_url.clone())),
        bus.clone(),
    ));
    bus.subscribe(RESOURCE_TOPIC, PROCESSOR_GROUP, worker);
    bus.subscribe(
        COMPLETION_TOPIC,
        COMPLETION_GROUP,
        Arc::new(CompletionConsumer::new(coordinator.clone())),
    );
    info!("Event bus consumers registered");

    let app = routes::router(AppState { coordinator });

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

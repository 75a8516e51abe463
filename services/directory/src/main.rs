use anyhow::{Context, Result};
use school_directory::api::{create_router, start_api_server, AppState};
use school_directory::config::{
    Config, DatabaseBackend, DatabaseConfig, ImageBackend, ImageConfig, LogFormat,
};
use school_directory::{
    ImageSink, InMemorySchoolStore, LocalUploader, MySqlSchoolStore, PooledMySqlSchoolStore,
    RecordService, S3Uploader, SchoolStore,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, config.service.log_format);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        "Starting School Directory Service"
    );

    // Initialize metrics
    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let store = build_store(&config.database).await?;
    let images = build_image_sink(&config.images).await?;

    let records = Arc::new(
        RecordService::new(images, store).with_orphan_cleanup(config.images.cleanup_orphans),
    );

    let public_images = match config.images.backend {
        ImageBackend::Local => Some(&config.images.local),
        ImageBackend::S3 => None,
    };
    let router = create_router(AppState { records }, &config.api, public_images);

    info!("Directory service started successfully");

    if let Err(e) = start_api_server(router, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Directory service stopped");

    Ok(())
}

/// Build the storage gateway selected by configuration
async fn build_store(config: &DatabaseConfig) -> Result<Arc<dyn SchoolStore>> {
    let store: Arc<dyn SchoolStore> = match (config.backend, config.pooled) {
        (DatabaseBackend::Memory, _) => {
            warn!("Using in-memory school store; records are lost on restart");
            Arc::new(InMemorySchoolStore::new())
        }
        (DatabaseBackend::Mysql, false) => {
            let store = MySqlSchoolStore::new(config);
            if config.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            Arc::new(store)
        }
        (DatabaseBackend::Mysql, true) => {
            let store = PooledMySqlSchoolStore::new(config)
                .await
                .context("Failed to initialize school store")?;
            if config.run_migrations {
                store
                    .run_migrations()
                    .await
                    .context("Failed to run database migrations")?;
            }
            Arc::new(store)
        }
    };

    Ok(store)
}

/// Build the image sink selected by configuration
async fn build_image_sink(config: &ImageConfig) -> Result<Arc<dyn ImageSink>> {
    match config.backend {
        ImageBackend::Local => {
            let uploader = LocalUploader::new(&config.local);
            uploader
                .prepare()
                .await
                .context("Failed to initialize local image storage")?;
            Ok(Arc::new(uploader))
        }
        ImageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .context("images.s3 must be set for the s3 backend")?;
            Ok(Arc::new(S3Uploader::new(s3).await))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let json = (format == LogFormat::Json).then(|| fmt::layer().json());
    let pretty = (format == LogFormat::Pretty).then(|| fmt::layer().pretty());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json)
        .with(pretty)
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

use anyhow::{Context, Result};
use photo_feed::api::{bind_listener, create_router, serve, AppState};
use photo_feed::config::{ServiceConfig, StoreBackend};
use photo_feed::processor::{ProcessingLoop, ProcessorSettings};
use photo_feed::watcher::{bootstrap_dirs, IngestionWatcher};
use photo_feed::{
    Clock, Config, MemoryStore, PgStore, ProcessingQueue, SystemClock, TimeWindowedStore,
    TransformSettings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long tasks get to wind down after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting photo feed service"
    );

    config.validate().context("Invalid configuration")?;

    if let Some(port) = config.service.metrics_port {
        init_metrics(port)?;
    }

    bootstrap_dirs(&config.inbox).context("Failed to prepare inbox directories")?;

    // Open the store once; every component gets this handle
    let (store, pg_store) = open_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let queue = Arc::new(ProcessingQueue::with_capacity(config.queue.capacity));

    if config.queue.capacity.is_none() {
        info!("Processing queue is unbounded");
    }

    let _watch = IngestionWatcher::from_config(&config.inbox, queue.clone())
        .start()
        .with_context(|| format!("Cannot observe inbox {}", config.inbox.path.display()))?;

    let listener = bind_listener(&config.api).await?;
    let router = create_router(
        AppState {
            store: store.clone(),
            clock: clock.clone(),
        },
        &config.api,
    );

    let processor = ProcessingLoop::new(
        queue,
        store,
        clock,
        ProcessorSettings {
            ttl: config.ttl(),
            idle_interval: config.idle_interval(),
            transform: TransformSettings::from(&config.transform),
            processed_dir: config.inbox.processed_dir.clone(),
        },
    );

    let cancel = CancellationToken::new();

    // Spawn processing loop task
    let processor_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { processor.run(cancel).await }
    });

    // Spawn API server task
    let api_handle = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = serve(listener, router, cancel).await {
                error!(error = %e, "API server error");
            }
        }
    });

    info!("Photo feed service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down photo feed service");
    cancel.cancel();

    for (name, handle) in [("processor", processor_handle), ("api", api_handle)] {
        match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "Task panicked"),
            Err(_) => warn!(task = name, "Task did not stop in time"),
        }
    }

    if let Some(pg) = pg_store {
        pg.close().await;
    }

    info!("Photo feed service stopped");

    Ok(())
}

/// Open the configured store backend
async fn open_store(config: &Config) -> Result<(Arc<dyn TimeWindowedStore>, Option<Arc<PgStore>>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store, photos are lost on restart");
            let store: Arc<dyn TimeWindowedStore> = Arc::new(MemoryStore::new());
            Ok((store, None))
        }
        StoreBackend::Postgres => {
            let db = config
                .database
                .as_ref()
                .context("database section is required for the postgres backend")?;
            let pg = Arc::new(
                PgStore::connect(db)
                    .await
                    .context("Failed to initialize photo store")?,
            );
            let store: Arc<dyn TimeWindowedStore> = pg.clone();
            Ok((store, Some(pg)))
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
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
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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

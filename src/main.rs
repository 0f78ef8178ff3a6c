use anyhow::{Context, Result};
use axum::Router;
use config::RecordBackend;
use services::{
    clock::SystemClock,
    object_store::{ObjectStore, S3ObjectStore},
    record_store::{RecordStore, SqliteRecordStore, TagRecordStore},
    scan_client::HttpScanClient,
    scanner::ScannerService,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tasks::{
    discovery::{DiscoveryMode, DiscoveryTask},
    selection::SelectionTask,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod handlers;
mod models;
mod routes;
mod services;
mod tasks;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting av-scan-scheduler with config: {:?}", cfg);

    // --- Handle migration mode ---
    if migrate {
        let store = SqliteRecordStore::new(connect_sqlite(&cfg.database_url).await?);
        store.migrate().await.context("applying schema")?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize collaborators ---
    let objects: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&cfg.s3));
    let records: Arc<dyn RecordStore> = match cfg.record_backend {
        RecordBackend::Table => {
            let store = SqliteRecordStore::new(connect_sqlite(&cfg.database_url).await?);
            store.migrate().await.context("applying schema")?;
            Arc::new(store)
        }
        RecordBackend::Tags => Arc::new(TagRecordStore::new(objects.clone())),
    };
    let endpoint = Arc::new(
        HttpScanClient::new(&cfg.scan_endpoint).context("constructing scan endpoint client")?,
    );

    let scanner = ScannerService::new(
        objects,
        records,
        endpoint,
        Arc::new(SystemClock),
        cfg.rescan_interval,
    );

    // --- Start background loops ---
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let discovery_mode = match cfg.record_backend {
        RecordBackend::Table => DiscoveryMode::Register,
        RecordBackend::Tags => DiscoveryMode::ScanInline,
    };
    tokio::spawn(
        DiscoveryTask::new(
            scanner.clone(),
            cfg.object_prefix.clone(),
            discovery_mode,
            cfg.discovery_interval,
        )
        .run(cancel.clone()),
    );
    if cfg.record_backend == RecordBackend::Table {
        tokio::spawn(
            SelectionTask::new(scanner, cfg.selection_interval, cfg.discovery_interval)
                .run(cancel.clone()),
        );
    }

    // --- Build router ---
    let app: Router = routes::routes::routes();

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Open the SQLite database, creating the file and its directory if needed.
async fn connect_sqlite(db_url: &str) -> Result<Arc<sqlx::SqlitePool>> {
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    Ok(Arc::new(pool))
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {}", err);
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

    tracing::info!("Shutdown requested; stopping background loops");
    token.cancel();
}

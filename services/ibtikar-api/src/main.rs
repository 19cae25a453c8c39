//! Ibtikar API
//!
//! Single-binary service that:
//! 1. Links a user's X account through OAuth 2.0 + PKCE
//! 2. Fetches recent posts from the accounts that user follows
//! 3. Scores them with an external harm classifier
//! 4. Stores results idempotently and serves filtered views of them

mod config;
mod error;
mod metrics;
mod pipeline;
mod routes;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use analysis_store::{Database, SqliteHandshakeStore};
use classifier::HttpClassifier;
use common::SecretCodec;
use x_auth::{HandshakeStore, MemoryHandshakeStore};
use x_feed::{FeedFetcher, XApiClient};

use crate::config::{Config, HandshakeBackend};
use crate::routes::{AppState, build_router};

/// How long in-flight requests may run after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // `ibtikar-api generate-key` prints a fresh ENCRYPTION_KEY and exits.
    if args.get(1).map(String::as_str) == Some("generate-key") {
        println!("{}", SecretCodec::generate_key());
        return Ok(());
    }

    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting ibtikar-api");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let codec = config
        .codec()
        .context("ENCRYPTION_KEY is missing or invalid")?;

    info!(
        listen_addr = %config.server.listen_addr,
        x_api = %config.x_api.base_url,
        classifier = %config.classifier.url,
        database = %config.storage.database_path.display(),
        handshake_backend = ?config.handshake.backend,
        "configuration loaded"
    );

    let db = Arc::new(
        Database::open(&config.storage.database_path).with_context(|| {
            format!(
                "failed to open database {}",
                config.storage.database_path.display()
            )
        })?,
    );

    let handshake_ttl = Duration::from_secs(config.handshake.ttl_secs);
    let handshakes: Arc<dyn HandshakeStore> = match config.handshake.backend {
        HandshakeBackend::Memory => Arc::new(MemoryHandshakeStore::new(handshake_ttl)),
        HandshakeBackend::Sqlite => Arc::new(SqliteHandshakeStore::new(db.clone(), handshake_ttl)),
    };

    let x_api = XApiClient::with_timeout(
        &config.x_api.base_url,
        Duration::from_secs(config.x_api.timeout_secs),
    )
    .context("failed to build X API client")?;
    let classifier = HttpClassifier::with_timeout(
        &config.classifier.url,
        Duration::from_secs(config.classifier.timeout_secs),
    )
    .context("failed to build classifier client")?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.server.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let state = AppState {
        oauth: Arc::new(config.oauth_config()),
        http,
        handshakes,
        db,
        codec: Arc::new(codec),
        fetcher: Arc::new(FeedFetcher::new(Arc::new(x_api))),
        classifier: Arc::new(classifier),
        prometheus,
        started_at: Instant::now(),
    };

    let app = build_router(state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts when the signal fires, not when the server starts.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}

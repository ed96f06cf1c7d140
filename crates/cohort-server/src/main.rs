//! # cohort-server
//!
//! HTTP and WebSocket front end for the Cohort group-chat engine.
//!
//! This binary provides:
//! - **REST API** (axum) for the community, groups, messages and reports
//! - **WebSocket** endpoint streaming realtime events to connected clients
//! - **Attachment storage** on disk for image and file messages
//! - **Per-client rate limiting** to protect against abuse

mod api;
mod attachments;
mod config;
mod error;
mod identity;
mod rate_limit;
mod socket;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cohort_chat::Chat;
use cohort_store::Database;

use crate::api::AppState;
use crate::attachments::DiskAttachments;
use crate::config::ServerConfig;
use crate::rate_limit::RateLimiter;

/// How often idle rate-limit buckets are evicted, and after how long.
const RATE_LIMIT_PURGE_INTERVAL: Duration = Duration::from_secs(300);
const RATE_LIMIT_MAX_IDLE_SECS: f64 = 600.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cohort_server=debug,cohort_chat=debug")),
        )
        .init();

    info!("Starting Cohort chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path.display()))?;
    let chat = Chat::new(db);

    let attachments = Arc::new(
        DiskAttachments::new(config.upload_path.clone(), config.max_upload_size).await?,
    );

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    let http_addr = config.http_addr;
    let app_state = AppState {
        chat,
        attachments,
        rate_limiter: rate_limiter.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            rl.purge_stale(RATE_LIMIT_MAX_IDLE_SECS).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

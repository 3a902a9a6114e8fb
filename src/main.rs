//! Tiercache node
//!
//! Runs one cache engine process: connects to the shared store, starts the
//! background sweep and shuts down cleanly on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercache::{CacheConfig, RedisStore, TieredCache};

const REDIS_POOL_SIZE: usize = 16;
const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Main entry point for a cache node.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Connect to Redis when `REDIS_URL` is set, else use the in-process store
/// 4. Build and start the engine
/// 5. Wait for SIGINT/SIGTERM, then close the engine
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiercache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tiercache node");

    let config = CacheConfig::from_env();
    info!(
        l1_max_size = config.l1.max_size,
        l1_ttl_s = config.l1.ttl.as_secs(),
        l2_default_ttl_s = config.l2.default_ttl.as_secs(),
        eviction = ?config.l1.eviction_policy,
        "Configuration loaded"
    );

    let builder = TieredCache::builder(config.clone());
    let builder = match config.l2.url.as_deref() {
        Some(url) => match RedisStore::connect(url, REDIS_POOL_SIZE, REDIS_TIMEOUT).await {
            Ok(store) => builder.store(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-process store");
                builder
            }
        },
        None => {
            info!("REDIS_URL not set, using in-process store");
            builder
        }
    };

    let cache = builder.build().context("invalid cache configuration")?;
    cache.start().await.context("failed to start cache engine")?;

    shutdown_signal().await?;

    cache.close().await;
    let stats = cache.stats();
    info!(
        stats = %serde_json::to_string(&stats).unwrap_or_default(),
        "Final cache statistics"
    );

    info!("Shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("failed to install Ctrl+C handler") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<anyhow::Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        }
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
    Ok(())
}

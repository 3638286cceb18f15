//! LogScout Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - LOGSCOUT_HOST: Bind address (default: 0.0.0.0)
//! - LOGSCOUT_PORT: Port number (default: 8080)
//! - LOGSCOUT_DATA_FILE: JSON snapshot for persisted state (default: memory only)
//! - LOGSCOUT_QUERY_TIMEOUT_SECS: Log query timeout (default: 60)
//! - LOGSCOUT_METADATA_TIMEOUT_SECS: Label/probe timeout (default: 5)
//! - LOGSCOUT_HISTORY_RETENTION_DAYS: Age at which non-favourite history is pruned (default: 14)
//! - LOGSCOUT_HISTORY_CHECK_SECS: History pruning interval (default: 3600)
//! - LOGSCOUT_MONITOR_LOOKBACK_SECS: Window each monitor run queries (default: 3600)
//! - LOGSCOUT_ANALYSIS_LIMIT: Rows fetched per monitor run (default: 100)
//! - RUST_LOG: Log level (default: logscout=info,tower_http=info)

use logscout::api::{run_server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logscout=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    tracing::info!("LogScout configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!(
        "  Data file: {}",
        config.data_file.as_deref().unwrap_or("(memory only)")
    );
    tracing::info!(
        "  Timeouts: query {}s, metadata {}s",
        config.query_timeout_secs,
        config.metadata_timeout_secs
    );
    tracing::info!(
        "  Monitors: lookback {}s, analysis limit {} rows",
        config.monitor_lookback_secs,
        config.analysis_limit
    );
    tracing::info!(
        "  History retention: {} days, checked every {} seconds",
        config.history_retention_days,
        config.history_check_interval_secs
    );

    run_server(config).await
}

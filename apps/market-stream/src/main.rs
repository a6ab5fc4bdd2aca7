//! Market Stream Monitor Binary
//!
//! Connects to the configured feeds, subscribes to a watchlist and logs
//! updates, connection states and soft errors until interrupted.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_URL=wss://feed.example/ws \
//! MARKET_STREAM_WATCH="crypto:BTCUSDT,ETHUSDT;equity:AAPL" \
//!     cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required (at least one)
//! - `MARKET_STREAM_URL`: Generic multi-asset endpoint
//! - `MARKET_STREAM_EQUITY_URL` / `_FOREX_URL` / `_CRYPTO_URL`: Class endpoints
//!
//! ## Optional
//! - `MARKET_STREAM_WATCH`: Watchlist, `class:SYM,SYM;class:SYM`
//! - `MARKET_STREAM_HEARTBEAT_INTERVAL_SECS`: Ping interval (default: 20, 0 disables)
//! - `MARKET_STREAM_MAX_RECONNECT_ATTEMPTS`: Retry ceiling (default: 5)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use anyhow::Context;
use market_stream::application::services::group_requests;
use market_stream::infrastructure::config::{WATCHLIST_VAR, parse_watchlist};
use market_stream::infrastructure::metrics::get_metrics_handle;
use market_stream::infrastructure::telemetry;
use market_stream::{ConsumerBinding, MarketStream, StreamConfig, init_metrics};
use tokio::signal;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market stream monitor");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env().context("invalid market stream configuration")?;
    log_config(&config);

    let watchlist = std::env::var(WATCHLIST_VAR).unwrap_or_default();
    let requests = parse_watchlist(&watchlist).context("invalid watchlist")?;
    if requests.is_empty() {
        tracing::warn!(var = WATCHLIST_VAR, "Watchlist is empty; only connection states will be logged");
    }

    let stream = MarketStream::with_websocket(&config);
    let monitor = stream.bind("monitor");
    install_logging_callbacks(&monitor)?;

    for (asset_class, symbols) in group_requests(&requests) {
        if let Err(e) = monitor.subscribe(asset_class, &symbols) {
            tracing::error!(%asset_class, error = %e, "Cannot watch asset class");
        }
    }

    tracing::info!(symbols = requests.len(), "Market stream monitor ready");

    await_shutdown().await;

    monitor.detach();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, stream.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    if let Some(handle) = get_metrics_handle() {
        tracing::debug!(metrics = %handle.render(), "Final metrics");
    }

    tracing::info!(cached_symbols = stream.store().len(), "Market stream monitor stopped");
    Ok(())
}

/// Log updates, state changes and soft errors.
fn install_logging_callbacks(monitor: &ConsumerBinding) -> anyhow::Result<()> {
    monitor.on_update(|update| {
        tracing::info!(
            symbol = %update.display_symbol,
            asset_class = %update.asset_class,
            price = %update.price,
            volume = %update.volume,
            timestamp = %update.timestamp,
            "Price update"
        );
    })?;

    monitor.on_connection_state(|asset_class, state| {
        tracing::info!(%asset_class, %state, "Connection state changed");
    })?;

    monitor.on_error(|error| {
        if error.is_terminal() {
            tracing::error!(error = %error, "Feed gave up; restart or reconnect required");
        } else {
            tracing::warn!(error = %error, "Feed error");
        }
    })?;

    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    for route in config.session_routes() {
        tracing::info!(
            endpoint = %route.endpoint,
            asset_classes = ?route.asset_classes,
            "Feed endpoint"
        );
    }
    tracing::debug!(
        heartbeat_secs = config.websocket.heartbeat_interval.map(|d| d.as_secs()),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        auto_connect = config.auto_connect,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}

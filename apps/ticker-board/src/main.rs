//! Ticker Board Binary
//!
//! Connects to a ticker feed and prints the current page as JSON lines on
//! stdout. Page commands are read from stdin.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-board
//! ```
//!
//! Type `next` (or `n`) and `prev` (or `p`) to switch pages, `quit` to exit.
//!
//! # Environment Variables
//!
//! - `TICKER_BOARD_ENDPOINT`: Feed URL (default: `ws://localhost:8999`)
//! - `TICKER_BOARD_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `TICKER_BOARD_HEARTBEAT_INTERVAL_SECS`: Ping interval (default: 20)
//! - `TICKER_BOARD_HEARTBEAT_TIMEOUT_SECS`: Silence before a channel is dropped (default: 40)
//! - `TICKER_BOARD_RETRY_DELAY_INITIAL_MS`: First reconnect delay (default: 500)
//! - `TICKER_BOARD_RETRY_DELAY_MAX_SECS`: Reconnect delay cap (default: 30)
//! - `TICKER_BOARD_RETRY_DELAY_MULTIPLIER`: Backoff growth (default: 2.0)
//! - `TICKER_BOARD_MAX_RETRY_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `TICKER_BOARD_SIGNAL_CAPACITY`: Signal queue capacity (default: 1024)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticker_board::infrastructure::health::{HealthServer, HealthServerState};
use ticker_board::infrastructure::telemetry;
use ticker_board::{
    BoardConfig, ConnectionManager, ConnectionProvider, HeartbeatConfig, PageCommand, RetryConfig,
    RetryPolicy, SessionDriver, TickerBoard, WebSocketConnector, init_metrics,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the stdin command queue.
const COMMAND_CAPACITY: usize = 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("telemetry initialization failed")?;

    tracing::info!("Starting Ticker Board");

    let _metrics_handle = init_metrics().context("metrics recorder installation failed")?;

    let config = BoardConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Core wiring: connector -> manager -> provider -> board
    let (signal_tx, signal_rx) = mpsc::channel(config.signal_capacity);
    let connector = WebSocketConnector::new(
        signal_tx,
        HeartbeatConfig::from_settings(&config.websocket),
        shutdown_token.child_token(),
    );
    let provider = ConnectionProvider::new(ConnectionManager::new(
        config.endpoint.clone(),
        Box::new(connector),
    ));
    let board = Arc::new(TickerBoard::new(provider.handle()));

    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let driver = SessionDriver::new(
        provider.clone(),
        Arc::clone(&board),
        signal_rx,
        command_rx,
        RetryPolicy::new(RetryConfig::from_settings(&config.websocket)),
        shutdown_token.clone(),
    );

    // Spawn health server
    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            provider.clone(),
            Arc::clone(&board),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Spawn view printer
    tokio::spawn(print_views(Arc::clone(&board), shutdown_token.clone()));

    // Spawn stdin command reader
    tokio::spawn(read_commands(command_tx, shutdown_token.clone()));

    let mut driver_task = tokio::spawn(driver.run());

    tracing::info!(endpoint = %config.endpoint, "Ticker board ready");

    tokio::select! {
        () = await_shutdown(shutdown_token.clone()) => {}
        result = &mut driver_task => {
            shutdown_token.cancel();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("session ended"),
                Err(e) => Err(e).context("session task panicked"),
            };
        }
    }

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, driver_task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Session ended with error during shutdown"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Session task failed during shutdown"),
        Err(_) => tracing::warn!("Session did not stop within the shutdown timeout"),
    }

    tracing::info!("Ticker board stopped");
    Ok(())
}

/// Write the latest view to stdout as one JSON line after each change.
/// Views published in a burst coalesce into the last one.
async fn print_views(board: Arc<TickerBoard>, shutdown_token: CancellationToken) {
    let mut views = board.subscribe_view();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let line = match serde_json::to_string(&view) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "View serialization failed");
                        continue;
                    }
                };
                if stdout.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        }
    }
}

/// Turn stdin lines into page commands until EOF or `quit`.
async fn read_commands(commands: mpsc::Sender<PageCommand>, shutdown_token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown_token.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if matches!(input, "quit" | "q" | "exit") {
                    tracing::info!("Quit requested");
                    shutdown_token.cancel();
                    break;
                }
                match input.parse::<PageCommand>() {
                    Ok(command) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring input"),
                }
            }
            Ok(None) => {
                tracing::debug!("stdin closed");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BoardConfig) {
    tracing::info!(
        endpoint = %config.endpoint,
        health_port = config.server.health_port,
        signal_capacity = config.signal_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_interval_secs = config.websocket.heartbeat_interval.as_secs(),
        heartbeat_timeout_secs = config.websocket.heartbeat_timeout.as_secs(),
        max_retry_attempts = config.websocket.max_retry_attempts,
        "WebSocket settings"
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

/// Wait for shutdown signal (SIGTERM, SIGINT or `quit` on stdin).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
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
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
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
        () = shutdown_token.cancelled() => {}
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::panic
    )
)]

//! Ticker Board - Paginated Price Board over a WebSocket Feed
//!
//! Keeps one duplex connection to a ticker feed, folds each inbound frame
//! into a per-instrument price history and republishes the rows of the page
//! the server declares current.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Pure types and rules
//!   - `connection`: Lifecycle state machine, channel and listener identity
//!   - `ticker`: Instrument records, history fold, read model, page commands
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Duplex channel and channel factory traits
//!   - `services`: Connection manager/provider, ticker board
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: tokio-tungstenite channel, heartbeat, retry pacing
//!   - `session`: Signal loop driving the lifecycle
//!   - `codec`: Inbound frame decoding
//!   - `config`: Environment configuration
//!   - `health`: Health, metrics and view HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!  feed WS --> channel task --signal--> SessionDriver --dispatch--> listeners
//!                  ^                                                    |
//!                  |                                                    v
//!             outbound <-- send_message <-- PageCommand       TickerBoard::ingest
//!                                                                       |
//!                                                                       v
//!                                                         BoardView (stdout, /view)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    ChannelEvent, ChannelId, ChannelSignal, ConnectionPhase, EventKind, ListenerFn, ListenerId,
};
pub use domain::ticker::{
    BoardView, Direction, InstrumentRecord, Page, PageCommand, Symbol, TickerHistory,
    TickerUpdate,
};

// Ports and services
pub use application::ports::{ChannelError, ChannelFactory, DuplexChannel};
pub use application::services::{
    ConnectionError, ConnectionHandle, ConnectionManager, ConnectionProvider, ConnectionStatus,
    IngestOutcome, TickerBoard,
};

// Infrastructure config
pub use infrastructure::config::{BoardConfig, ConfigError, ServerSettings, WebSocketSettings};

// Adapters
pub use infrastructure::codec::{CodecError, JsonCodec, TickerFrame};
pub use infrastructure::session::{SessionDriver, SessionError};
pub use infrastructure::websocket::{
    HeartbeatConfig, RetryConfig, RetryPolicy, WebSocketChannel, WebSocketConnector,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};

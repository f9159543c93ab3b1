//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ConnectionManager`: Owns the duplex channel lifecycle and outbound buffer
//! - `TickerBoard`: Folds inbound frames and publishes the page view

/// Channel lifecycle, listener registry and provider scope.
pub mod connection;

/// Frame aggregation and page navigation.
pub mod board;

pub use board::{IngestOutcome, TickerBoard};
pub use connection::{
    ConnectionError, ConnectionHandle, ConnectionManager, ConnectionProvider, ConnectionStatus,
};

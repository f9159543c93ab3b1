//! Configuration Module
//!
//! Environment-driven configuration for the board service.

mod settings;

pub use settings::{BoardConfig, ConfigError, DEFAULT_ENDPOINT, ServerSettings, WebSocketSettings};

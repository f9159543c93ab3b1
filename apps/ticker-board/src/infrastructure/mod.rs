//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the process-level plumbing.

/// Inbound frame decoding.
pub mod codec;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Signal loop that drives the connection lifecycle.
pub mod session;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket duplex channel adapter.
pub mod websocket;

//! WebSocket Channel Adapter
//!
//! The tokio-tungstenite implementation of the duplex channel port, plus
//! the heartbeat and retry pacing it relies on.

/// Connector and channel task.
pub mod channel;

/// Ping/pong liveness tracking.
pub mod heartbeat;

/// Exponential backoff with jitter.
pub mod reconnect;

pub use channel::{WebSocketChannel, WebSocketConnector};
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use reconnect::{RetryConfig, RetryPolicy};

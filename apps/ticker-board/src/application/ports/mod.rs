//! Port Interfaces
//!
//! The duplex channel the connection manager drives, expressed as traits so
//! the manager never depends on a concrete transport.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`ChannelFactory`]: opens a channel to an endpoint
//! - [`DuplexChannel`]: one live channel (listeners, send, close)
//!
//! A channel never calls back into its owner. It reports `Ready`, `Message`,
//! `Error` and `Closed` as [`ChannelSignal`](crate::domain::connection::ChannelSignal)s
//! on a queue the owner drains, and the owner asks the channel which
//! listeners to invoke for each one.

use crate::domain::connection::{ChannelId, EventKind, Listener, ListenerFn, ListenerId};

/// Errors raised by a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel could not be constructed.
    #[error("failed to open channel: {0}")]
    Open(String),

    /// A payload could not be handed to the transport.
    #[error("failed to transmit: {0}")]
    Transmit(String),
}

/// One duplex channel instance.
pub trait DuplexChannel: Send {
    /// Identity of this channel; every signal it emits carries it.
    fn id(&self) -> ChannelId;

    /// Attach a listener. Attaching the same registration twice is a no-op.
    fn on(&mut self, listener: Listener);

    /// Detach a registration. Returns `false` if it was not attached.
    fn off(&mut self, kind: EventKind, id: ListenerId) -> bool;

    /// Attached handlers for `kind`, in attach order.
    fn handlers_for(&self, kind: EventKind) -> Vec<ListenerFn>;

    /// Queue `payload` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transmit`] if the transport cannot accept it.
    fn send(&mut self, payload: &str) -> Result<(), ChannelError>;

    /// Ask the transport to close. The `Closed` signal follows asynchronously.
    fn close(&mut self);
}

/// Opens channels to an endpoint.
#[cfg_attr(test, mockall::automock)]
pub trait ChannelFactory: Send {
    /// Construct a channel. Returning `Ok` means construction succeeded; the
    /// channel reports readiness later through its `Ready` signal.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Open`] if the channel cannot be constructed.
    fn open(&self, endpoint: &str) -> Result<Box<dyn DuplexChannel>, ChannelError>;
}

//! Connection Lifecycle Types
//!
//! The finite state machine that governs a single duplex channel, plus the
//! identity types used to track which listener is attached to which channel.
//!
//! # State Machine
//!
//! ```text
//! Disconnected --Connect--> Connecting --Ready--> Open --CloseRequested--> Closing
//!      ^                                                                  |
//!      +------Reset------ Closed <-----------------Detached---------------+
//!                           ^
//!         any phase --------+ ChannelClosed
//! ```
//!
//! Every pair not listed in [`transition`] is rejected with
//! [`InvalidTransition`]; the manager treats a rejection as a no-op.

mod listener;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use listener::{Listener, ListenerFn, ListenerTable};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of the managed duplex channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    /// No channel exists.
    #[default]
    Disconnected,
    /// A channel has been opened and is waiting for its ready signal.
    Connecting,
    /// The channel is ready; listeners are attached and sends go through.
    Open,
    /// A close was requested; listeners are being detached.
    Closing,
    /// The channel is gone; state is about to be reset.
    Closed,
}

impl ConnectionPhase {
    /// Get the phase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Numeric code used for the phase gauge.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Open => 2,
            Self::Closing => 3,
            Self::Closed => 4,
        }
    }

    /// Whether a live channel may be held in this phase.
    #[must_use]
    pub const fn holds_channel(&self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Events and Transition Function
// =============================================================================

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A new channel was constructed.
    Connect,
    /// Channel construction failed.
    OpenFailed,
    /// The channel reported it is ready.
    Ready,
    /// The consumer asked to close the channel.
    CloseRequested,
    /// All listeners were detached from the closing channel.
    Detached,
    /// The channel reported it has closed, normally or not.
    ChannelClosed,
    /// State was reset to its initial values.
    Reset,
}

/// A `(phase, event)` pair the state machine does not accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection transition: {event:?} in phase {from}")]
pub struct InvalidTransition {
    /// Phase the event arrived in.
    pub from: ConnectionPhase,
    /// The rejected event.
    pub event: ConnectionEvent,
}

/// Compute the next phase for `event` arriving in `phase`.
///
/// # Errors
///
/// Returns [`InvalidTransition`] for any pair outside the lifecycle table.
pub const fn transition(
    phase: ConnectionPhase,
    event: ConnectionEvent,
) -> Result<ConnectionPhase, InvalidTransition> {
    use ConnectionEvent as E;
    use ConnectionPhase as P;

    match (phase, event) {
        (_, E::ChannelClosed) => Ok(P::Closed),
        (P::Disconnected, E::Connect) => Ok(P::Connecting),
        (P::Disconnected, E::OpenFailed) => Ok(P::Disconnected),
        (P::Connecting, E::Ready) => Ok(P::Open),
        (P::Open, E::CloseRequested) => Ok(P::Closing),
        (P::Closing, E::Detached) => Ok(P::Closed),
        (P::Closed, E::Reset) => Ok(P::Disconnected),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

// =============================================================================
// Identity Types
// =============================================================================

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one channel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Allocate a fresh channel id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Identifier handed out for each listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Kinds of channel events a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The channel became ready.
    Open,
    /// An inbound text frame.
    Message,
    /// A transport error.
    Error,
    /// The channel closed.
    Close,
}

impl EventKind {
    /// Get the event kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

// =============================================================================
// Channel Events and Signals
// =============================================================================

/// Something a channel reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake completed; the channel can carry traffic.
    Ready,
    /// One inbound text frame.
    Message(String),
    /// A transport-level error. Usually followed by [`ChannelEvent::Closed`].
    Error(String),
    /// The channel is gone.
    Closed {
        /// Close reason, when the peer or transport supplied one.
        reason: Option<String>,
    },
}

impl ChannelEvent {
    /// The listener kind this event is delivered to.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Ready => EventKind::Open,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Closed { .. } => EventKind::Close,
        }
    }
}

/// A channel event tagged with the channel that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSignal {
    /// Originating channel.
    pub channel: ChannelId,
    /// What happened.
    pub event: ChannelEvent,
}

impl ChannelSignal {
    /// Create a new signal.
    #[must_use]
    pub const fn new(channel: ChannelId, event: ChannelEvent) -> Self {
        Self { channel, event }
    }
}

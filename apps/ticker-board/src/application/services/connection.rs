//! Connection Manager
//!
//! Owns at most one duplex channel, the ordered listener registry and the
//! single-slot outbound buffer. Every phase change goes through
//! [`transition`]; a rejected transition is logged and ignored.
//!
//! # Scope
//!
//! [`ConnectionProvider`] is the session-scoped owner. Consumers receive a
//! [`ConnectionHandle`], which holds only a weak reference: once the provider
//! is gone every handle call fails with [`ConnectionError::NoActiveProvider`].
//!
//! Signal processing happens under the manager lock, but listener callbacks
//! run after the lock is released so a handler may call back into a handle.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::application::ports::{ChannelFactory, DuplexChannel};
use crate::domain::connection::{
    ChannelEvent, ChannelId, ChannelSignal, ConnectionEvent, ConnectionPhase, EventKind, Listener,
    ListenerFn, ListenerId, transition,
};
use crate::infrastructure::metrics::{self, OpenOutcome, OutboundOutcome};

// =============================================================================
// Errors and Status
// =============================================================================

/// Errors surfaced to consumers of a [`ConnectionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The handle outlived the provider that issued it.
    #[error("connection handle used outside an active provider scope")]
    NoActiveProvider,
}

/// Read-only view of the manager, for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current lifecycle phase.
    pub phase: ConnectionPhase,
    /// Live or connecting channel, if any.
    pub channel: Option<ChannelId>,
    /// Registered listeners in this session.
    pub listener_count: usize,
    /// Whether an outbound message is waiting.
    pub has_pending: bool,
}

// =============================================================================
// Manager
// =============================================================================

#[derive(Default)]
struct ConnectionState {
    phase: ConnectionPhase,
    channel: Option<Box<dyn DuplexChannel>>,
    connecting: Option<Box<dyn DuplexChannel>>,
    listeners: Vec<Listener>,
    pending_outbound: Option<String>,
    close_requested: bool,
    attached: HashSet<(ChannelId, EventKind, ListenerId)>,
}

/// Lifecycle owner of one duplex channel at a time.
pub struct ConnectionManager {
    endpoint: String,
    factory: Box<dyn ChannelFactory>,
    state: ConnectionState,
    next_listener: u64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("phase", &self.state.phase)
            .field("listeners", &self.state.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a manager in the initial state. No channel is opened yet.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, factory: Box<dyn ChannelFactory>) -> Self {
        Self {
            endpoint: endpoint.into(),
            factory,
            state: ConnectionState::default(),
            next_listener: 1,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> ConnectionPhase {
        self.state.phase
    }

    /// Message waiting for an open channel, if any.
    #[must_use]
    pub fn pending_outbound(&self) -> Option<&str> {
        self.state.pending_outbound.as_deref()
    }

    /// Snapshot for health reporting.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        let channel = self
            .state
            .channel
            .as_ref()
            .or(self.state.connecting.as_ref())
            .map(|c| c.id());
        ConnectionStatus {
            phase: self.state.phase,
            channel,
            listener_count: self.state.listeners.len(),
            has_pending: self.state.pending_outbound.is_some(),
        }
    }

    fn apply(&mut self, event: ConnectionEvent) -> bool {
        match transition(self.state.phase, event) {
            Ok(next) => {
                if next != self.state.phase {
                    debug!(from = %self.state.phase, to = %next, ?event, "Connection phase changed");
                }
                self.state.phase = next;
                metrics::set_connection_phase(next);
                true
            }
            Err(e) => {
                debug!(error = %e, "Ignoring connection event");
                false
            }
        }
    }

    /// Open a channel if, and only if, none exists and the phase is
    /// `Disconnected`. Construction failure is logged and leaves the phase
    /// unchanged.
    pub fn ensure_connected(&mut self) {
        if self.state.phase != ConnectionPhase::Disconnected
            || self.state.channel.is_some()
            || self.state.connecting.is_some()
        {
            return;
        }

        match self.factory.open(&self.endpoint) {
            Ok(channel) => {
                info!(endpoint = %self.endpoint, channel = %channel.id(), "Opening channel");
                metrics::record_channel_open(OpenOutcome::Constructed);
                self.state.connecting = Some(channel);
                self.apply(ConnectionEvent::Connect);
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Channel construction failed");
                metrics::record_channel_open(OpenOutcome::Failed);
                self.apply(ConnectionEvent::OpenFailed);
            }
        }
    }

    /// Register a listener for this session. If a channel is open the
    /// listener is attached to it right away.
    pub fn add_listener(&mut self, kind: EventKind, handler: ListenerFn) -> ListenerId {
        let id = ListenerId::new(self.next_listener);
        self.next_listener += 1;

        let listener = Listener::new(id, kind, handler);
        self.state.listeners.push(listener.clone());

        if self.state.phase == ConnectionPhase::Open {
            if let Some(channel) = self.state.channel.as_mut() {
                Self::ensure_attached(&mut self.state.attached, channel, &listener);
            }
        }

        debug!(listener = ?id, kind = kind.as_str(), "Listener registered");
        id
    }

    /// Stage `payload` for transmission. A message already waiting is
    /// replaced.
    pub fn send_message(&mut self, payload: impl Into<String>) {
        let payload = payload.into();
        if let Some(previous) = self.state.pending_outbound.replace(payload) {
            debug!(dropped = %previous, "Replacing unsent outbound message");
        }
        self.flush();
    }

    /// Transmit the waiting message if the channel is open. On failure the
    /// message stays in the slot.
    pub fn flush(&mut self) {
        if self.state.phase != ConnectionPhase::Open {
            return;
        }
        let (Some(channel), Some(payload)) = (
            self.state.channel.as_mut(),
            self.state.pending_outbound.as_deref(),
        ) else {
            return;
        };

        match channel.send(payload) {
            Ok(()) => {
                debug!(channel = %channel.id(), payload, "Outbound message sent");
                metrics::record_outbound(OutboundOutcome::Sent);
                self.state.pending_outbound = None;
            }
            Err(e) => {
                warn!(channel = %channel.id(), error = %e, "Transmit failed, keeping message");
                metrics::record_outbound(OutboundOutcome::Failed);
            }
        }
    }

    /// Close intent. Open channels are closed now; a connecting channel is
    /// closed as soon as it reports ready. Otherwise a no-op.
    pub fn close(&mut self) {
        match self.state.phase {
            ConnectionPhase::Open => self.close_open_channel(),
            ConnectionPhase::Connecting => {
                debug!("Close requested while connecting");
                self.state.close_requested = true;
            }
            ConnectionPhase::Disconnected | ConnectionPhase::Closing | ConnectionPhase::Closed => {}
        }
    }

    fn close_open_channel(&mut self) {
        if !self.apply(ConnectionEvent::CloseRequested) {
            return;
        }
        if let Some(mut channel) = self.state.channel.take() {
            for listener in &self.state.listeners {
                let key = (channel.id(), listener.kind, listener.id);
                if self.state.attached.remove(&key) {
                    channel.off(listener.kind, listener.id);
                }
            }
            self.apply(ConnectionEvent::Detached);
            info!(channel = %channel.id(), "Closing channel");
            channel.close();
        } else {
            self.apply(ConnectionEvent::Detached);
        }
        self.reset();
    }

    /// React to one channel signal and return the handlers to invoke, in
    /// attach order. Signals from a channel that is no longer held are
    /// ignored.
    #[must_use]
    pub fn handle_signal(&mut self, signal: &ChannelSignal) -> Vec<ListenerFn> {
        let kind = signal.event.kind();

        match &signal.event {
            ChannelEvent::Ready => {
                if !self.is_connecting(signal.channel) {
                    debug!(channel = %signal.channel, "Ignoring stale ready signal");
                    return Vec::new();
                }
                self.on_ready()
            }
            ChannelEvent::Message(_) | ChannelEvent::Error(_) => {
                if let ChannelEvent::Error(message) = &signal.event {
                    warn!(channel = %signal.channel, error = %message, "Channel error");
                }
                self.state
                    .channel
                    .as_ref()
                    .filter(|c| c.id() == signal.channel)
                    .map(|c| c.handlers_for(kind))
                    .unwrap_or_default()
            }
            ChannelEvent::Closed { reason } => {
                let held = self
                    .state
                    .channel
                    .as_ref()
                    .is_some_and(|c| c.id() == signal.channel);
                if !held && !self.is_connecting(signal.channel) {
                    debug!(channel = %signal.channel, "Ignoring stale close signal");
                    return Vec::new();
                }
                info!(channel = %signal.channel, reason = reason.as_deref().unwrap_or(""), "Channel closed");

                let handlers = self
                    .state
                    .channel
                    .as_ref()
                    .map(|c| c.handlers_for(kind))
                    .unwrap_or_default();
                self.apply(ConnectionEvent::ChannelClosed);
                self.state.channel = None;
                self.state.connecting = None;
                self.reset();
                debug_assert!(!self.state.phase.holds_channel());
                handlers
            }
        }
    }

    fn is_connecting(&self, id: ChannelId) -> bool {
        self.state.connecting.as_ref().is_some_and(|c| c.id() == id)
    }

    fn on_ready(&mut self) -> Vec<ListenerFn> {
        if !self.apply(ConnectionEvent::Ready) {
            return Vec::new();
        }
        let Some(mut channel) = self.state.connecting.take() else {
            return Vec::new();
        };

        for listener in &self.state.listeners {
            Self::ensure_attached(&mut self.state.attached, &mut channel, listener);
        }
        info!(
            channel = %channel.id(),
            listeners = self.state.listeners.len(),
            "Channel open"
        );

        let handlers = channel.handlers_for(EventKind::Open);
        self.state.channel = Some(channel);
        self.flush();

        if std::mem::take(&mut self.state.close_requested) {
            self.close_open_channel();
        }
        debug_assert_eq!(self.state.phase.holds_channel(), self.state.channel.is_some());
        handlers
    }

    fn ensure_attached(
        attached: &mut HashSet<(ChannelId, EventKind, ListenerId)>,
        channel: &mut Box<dyn DuplexChannel>,
        listener: &Listener,
    ) {
        if attached.insert((channel.id(), listener.kind, listener.id)) {
            channel.on(listener.clone());
        }
    }

    /// Return to the initial state, listeners included.
    fn reset(&mut self) {
        self.apply(ConnectionEvent::Reset);
        let listeners = self.state.listeners.len();
        self.state = ConnectionState::default();
        metrics::set_connection_phase(self.state.phase);
        debug!(listeners, "Connection state reset");
    }
}

// =============================================================================
// Provider and Handle
// =============================================================================

/// Session-scoped owner of the [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionProvider {
    inner: Arc<Mutex<ConnectionManager>>,
}

impl ConnectionProvider {
    /// Wrap a manager.
    #[must_use]
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// Hand out a consumer handle.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Process one channel signal and notify the matching listeners.
    pub fn dispatch(&self, signal: &ChannelSignal) {
        let handlers = self.inner.lock().handle_signal(signal);
        for handler in handlers {
            handler(&signal.event);
        }
    }

    /// See [`ConnectionManager::ensure_connected`].
    pub fn ensure_connected(&self) {
        self.inner.lock().ensure_connected();
    }

    /// See [`ConnectionManager::close`].
    pub fn close(&self) {
        self.inner.lock().close();
    }

    /// See [`ConnectionManager::snapshot`].
    #[must_use]
    pub fn snapshot(&self) -> ConnectionStatus {
        self.inner.lock().snapshot()
    }

    /// Copy of the message waiting for an open channel.
    #[must_use]
    pub fn pending_outbound(&self) -> Option<String> {
        self.inner.lock().pending_outbound().map(str::to_string)
    }
}

/// Consumer-side reference to a provider.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Weak<Mutex<ConnectionManager>>,
}

impl ConnectionHandle {
    fn manager(&self) -> Result<Arc<Mutex<ConnectionManager>>, ConnectionError> {
        self.inner.upgrade().ok_or(ConnectionError::NoActiveProvider)
    }

    /// Register a listener for the current session.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoActiveProvider`] if the provider is gone.
    pub fn add_listener(
        &self,
        kind: EventKind,
        handler: ListenerFn,
    ) -> Result<ListenerId, ConnectionError> {
        Ok(self.manager()?.lock().add_listener(kind, handler))
    }

    /// Stage an outbound message.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoActiveProvider`] if the provider is gone.
    pub fn send_message(&self, payload: impl Into<String>) -> Result<(), ConnectionError> {
        self.manager()?.lock().send_message(payload);
        Ok(())
    }
}

//! Ordered listener registry.
//!
//! Channels keep their attached listeners in a [`ListenerTable`]. Order is
//! attach order and dispatch follows it, so a listener registered first (a
//! logger, say) always sees an event before the ones registered after it.

use std::sync::Arc;

use super::{ChannelEvent, EventKind, ListenerId};

/// Callback invoked with each event of the subscribed kind.
pub type ListenerFn = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// One `(kind, handler)` registration.
#[derive(Clone)]
pub struct Listener {
    /// Registration id.
    pub id: ListenerId,
    /// Event kind the handler receives.
    pub kind: EventKind,
    /// The handler itself.
    pub handler: ListenerFn,
}

impl Listener {
    /// Create a registration.
    #[must_use]
    pub fn new(id: ListenerId, kind: EventKind, handler: ListenerFn) -> Self {
        Self { id, kind, handler }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Listeners attached to one channel, in attach order.
#[derive(Debug, Default, Clone)]
pub struct ListenerTable {
    entries: Vec<Listener>,
}

impl ListenerTable {
    /// Create an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Attach a listener. Returns `false` if that registration is already attached.
    pub fn attach(&mut self, listener: Listener) -> bool {
        if self.contains(listener.kind, listener.id) {
            return false;
        }
        self.entries.push(listener);
        true
    }

    /// Detach a registration. Returns `false` if it was not attached.
    pub fn detach(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| !(l.kind == kind && l.id == id));
        self.entries.len() != before
    }

    /// Whether a registration is attached.
    #[must_use]
    pub fn contains(&self, kind: EventKind, id: ListenerId) -> bool {
        self.entries.iter().any(|l| l.kind == kind && l.id == id)
    }

    /// Handlers for `kind`, in attach order.
    #[must_use]
    pub fn handlers_for(&self, kind: EventKind) -> Vec<ListenerFn> {
        self.entries
            .iter()
            .filter(|l| l.kind == kind)
            .map(|l| Arc::clone(&l.handler))
            .collect()
    }

    /// Number of attached registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Type-safe event bus for intra-node pub/sub.
//!
//! The [`EventBus`] lets any component emit typed events and any other
//! component subscribe to specific event types without direct coupling:
//! the lookup updater rebuilds when the serving STH advances, the daemon
//! logs leadership transitions, tests observe sequencing progress.
//!
//! Each event type is a distinct struct implementing the [`Event`] marker
//! trait. Internally the bus keeps a `HashMap<TypeId, Box<dyn Any>>` where
//! each value is a `tokio::sync::broadcast::Sender<E>`; channels are
//! created lazily on the first `subscribe()` for a given type.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::warn;

use crate::{NodeId, SignedTreeHead};

// ---------------------------------------------------------------------------
// Event trait
// ---------------------------------------------------------------------------

/// Marker trait for all events that can travel through the [`EventBus`].
pub trait Event: Any + Send + Sync + Clone + std::fmt::Debug + 'static {}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// The leader published a new STH to the coordination store.
#[derive(Clone, Debug)]
pub struct SthPublished {
    /// The freshly signed tree head.
    pub sth: SignedTreeHead,
}
impl Event for SthPublished {}

/// The cluster-agreed serving STH moved forward.
#[derive(Clone, Debug)]
pub struct ServingSthAdvanced {
    /// The new serving tree head.
    pub sth: SignedTreeHead,
}
impl Event for ServingSthAdvanced {}

/// This node gained or lost the signing lease.
#[derive(Clone, Debug)]
pub struct LeadershipChanged {
    /// The node whose leadership changed (always the local node).
    pub node_id: NodeId,
    /// `true` on acquisition, `false` on loss or resignation.
    pub is_leader: bool,
}
impl Event for LeadershipChanged {}

/// A sequencing iteration committed a batch of entries.
#[derive(Clone, Debug)]
pub struct EntriesSequenced {
    /// Number of entries sequenced in this batch.
    pub count: u64,
    /// Tree size after the batch.
    pub new_size: u64,
}
impl Event for EntriesSequenced {}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default broadcast channel capacity.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct EventBusInner {
    channels: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

/// A type-safe event bus for intra-node communication.
///
/// Clonable (`Arc` inside). Thread-safe. Non-blocking emits: events with
/// no subscribers are dropped.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<EventBusInner>>,
}

impl EventBus {
    /// Create a new empty event bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventBusInner {
                channels: HashMap::new(),
            })),
        }
    }

    /// Emit an event to all current subscribers of type `E`.
    pub fn emit<E: Event>(&self, event: E) {
        let type_id = TypeId::of::<E>();
        let inner = self.inner.lock().expect("event bus lock poisoned");

        if let Some(boxed) = inner.channels.get(&type_id) {
            let sender = boxed
                .downcast_ref::<broadcast::Sender<E>>()
                .expect("type mismatch in event bus");
            // Send fails only when no receivers are alive — drop silently.
            let _ = sender.send(event);
        }
    }

    /// Subscribe to events of type `E`.
    ///
    /// The channel is created lazily if it doesn't exist yet.
    pub fn subscribe<E: Event>(&self) -> EventReceiver<E> {
        let type_id = TypeId::of::<E>();
        let mut inner = self.inner.lock().expect("event bus lock poisoned");

        let sender = inner
            .channels
            .entry(type_id)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel::<E>(DEFAULT_CHANNEL_CAPACITY);
                Box::new(tx)
            })
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("type mismatch in event bus");

        EventReceiver {
            rx: sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("channel_count", &inner.channels.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventReceiver
// ---------------------------------------------------------------------------

/// Typed receiver for a specific event type.
pub struct EventReceiver<E: Event> {
    rx: broadcast::Receiver<E>,
}

impl<E: Event> EventReceiver<E> {
    /// Wait for the next event.
    ///
    /// Returns `None` if the bus has been dropped. Skips over lagged
    /// events with a warning.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        skipped = n,
                        event_type = std::any::type_name::<E>(),
                        "event receiver lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

//! Single authenticated stream connection and its listeners

use crate::errors::{Error, Result};
use crate::metrics::{STREAM_CONNECTED, STREAM_EVENTS_TOTAL};
use crate::stream::event::{ping_frame, EventKind, StreamEvent};
use crate::stream::transport::{FramePipe, StreamTransport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

struct Slot {
    id: u64,
    handler: Handler,
}

struct ActiveConnection {
    id: String,
    outgoing: mpsc::Sender<String>,
    reader: JoinHandle<()>,
}

/// The task currently driving connects and disconnects
struct Owner {
    id: u64,
    supervisor: AbortHandle,
}

struct Inner {
    /// Bumped on every connect and disconnect; a reader only dispatches while
    /// its generation is current.
    generation: u64,
    next_listener: u64,
    listeners: HashMap<EventKind, Slot>,
    active: Option<ActiveConnection>,
    next_owner: u64,
    owner: Option<Owner>,
}

/// Owns at most one stream connection at a time.
///
/// Each event kind has a single listener slot. Registering a listener for a
/// kind replaces the previous one, so changing the selected chart never
/// stacks handlers. Handlers run while the binding's lock is held and must
/// not call back into the binding.
#[derive(Clone)]
pub struct StreamBinding {
    transport: Arc<dyn StreamTransport>,
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl std::fmt::Debug for StreamBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBinding")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl StreamBinding {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                next_listener: 0,
                listeners: HashMap::new(),
                active: None,
                next_owner: 0,
                owner: None,
            })),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Opens a connection authenticated with `token`, closing any existing one first.
    ///
    /// Fails with [`Error::Superseded`] when another connect or a disconnect
    /// ran while the handshake was in flight; the opened stream is discarded.
    pub async fn connect(&self, token: &str) -> Result<()> {
        let generation = self.teardown();
        self.state.send_replace(ConnectionState::Connecting);
        info!("Connecting realtime stream");

        let pipe = match self.transport.open(token).await {
            Ok(pipe) => pipe,
            Err(e) => {
                error!("Failed to open realtime stream: {}", e);
                if lock(&self.inner).generation == generation {
                    self.state.send_replace(ConnectionState::Disconnected);
                }
                return Err(e);
            }
        };

        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            debug!("Discarding stream opened for a stale connect");
            return Err(Error::Superseded);
        }

        let id = format!("dashboard-{}", Uuid::new_v4());
        let FramePipe { incoming, outgoing } = pipe;
        let reader = tokio::spawn(read_loop(
            id.clone(),
            generation,
            incoming,
            Arc::downgrade(&self.inner),
            self.state.clone(),
        ));
        inner.active = Some(ActiveConnection {
            id,
            outgoing,
            reader,
        });
        Ok(())
    }

    /// Closes the current connection, if any. No events are dispatched after this returns.
    pub fn disconnect(&self) {
        self.teardown();
    }

    /// Hands the binding to a new owner and aborts the previous owner's
    /// supervisor. Returns the id to pass to [`Self::release`].
    pub fn claim(&self, supervisor: AbortHandle) -> u64 {
        let mut inner = lock(&self.inner);
        inner.next_owner += 1;
        let id = inner.next_owner;
        if let Some(previous) = inner.owner.replace(Owner { id, supervisor }) {
            info!("Stream ownership moved from {} to {}", previous.id, id);
            previous.supervisor.abort();
        }
        id
    }

    /// Disconnects if `owner` still holds the binding. Returns false, leaving
    /// the connection alone, once ownership has moved on.
    pub fn release(&self, owner: u64) -> bool {
        let mut inner = lock(&self.inner);
        if inner.owner.as_ref().map(|o| o.id) != Some(owner) {
            debug!("Stream owner {} already replaced", owner);
            return false;
        }
        if let Some(current) = inner.owner.take() {
            current.supervisor.abort();
        }
        drop(inner);
        self.teardown();
        true
    }

    fn teardown(&self) -> u64 {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        if let Some(active) = inner.active.take() {
            info!("Closing realtime stream {}", active.id);
            active.reader.abort();
            drop(active.outgoing);
        }
        let generation = inner.generation;
        drop(inner);

        if self.state.send_replace(ConnectionState::Disconnected) != ConnectionState::Disconnected
        {
            STREAM_CONNECTED.set(0.0);
        }
        generation
    }

    /// Installs `handler` as the only listener for `kind`.
    ///
    /// Dropping the returned [`Subscription`] removes the handler unless it
    /// has already been replaced.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_listener += 1;
        let id = inner.next_listener;
        if inner
            .listeners
            .insert(
                kind,
                Slot {
                    id,
                    handler: Arc::new(handler),
                },
            )
            .is_some()
        {
            debug!("Replaced {:?} listener", kind);
        }
        Subscription {
            kind,
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn on_device_data<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::DeviceData, handler)
    }

    pub fn on_alert<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.on(EventKind::AlertNotification, handler)
    }

    pub fn off(&self, kind: EventKind) {
        lock(&self.inner).listeners.remove(&kind);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn ping(&self) -> Result<()> {
        let inner = lock(&self.inner);
        let active = inner.active.as_ref().ok_or(Error::NotConnected)?;
        active.outgoing.try_send(ping_frame()).map_err(|e| {
            warn!("Failed to queue ping: {}", e);
            Error::ChannelSend
        })
    }
}

async fn read_loop(
    id: String,
    generation: u64,
    mut incoming: mpsc::Receiver<Result<String>>,
    inner: Weak<Mutex<Inner>>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    while let Some(frame) = incoming.recv().await {
        let text = match frame {
            Ok(text) => text,
            Err(e) => {
                warn!("Stream {} failed: {}", id, e);
                break;
            }
        };
        let event = match StreamEvent::from_frame(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring malformed stream frame: {}", e);
                continue;
            }
        };
        STREAM_EVENTS_TOTAL.inc();

        let Some(shared) = inner.upgrade() else {
            return;
        };
        let guard = lock(&shared);
        if guard.generation != generation {
            return;
        }

        match &event {
            StreamEvent::Connected(_) => {
                info!("Realtime stream {} authenticated", id);
                state.send_replace(ConnectionState::Connected);
                STREAM_CONNECTED.set(1.0);
            }
            StreamEvent::Error(payload) => warn!("Stream {} reported error: {}", id, payload),
            StreamEvent::Unknown { event } => debug!("Unhandled stream event {}", event),
            _ => {}
        }

        if let Some(slot) = event.kind().and_then(|kind| guard.listeners.get(&kind)) {
            (slot.handler)(&event);
        }
    }

    // Connection ended on its own; only report it if it is still the current one.
    if let Some(shared) = inner.upgrade() {
        let mut guard = lock(&shared);
        if guard.generation == generation {
            info!("Realtime stream {} disconnected", id);
            guard.active = None;
            state.send_replace(ConnectionState::Disconnected);
            STREAM_CONNECTED.set(0.0);
        }
    }
}

/// Registration handle for one listener slot
pub struct Subscription {
    kind: EventKind,
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut guard = lock(&inner);
            if guard.listeners.get(&self.kind).map(|s| s.id) == Some(self.id) {
                guard.listeners.remove(&self.kind);
            }
        }
    }
}

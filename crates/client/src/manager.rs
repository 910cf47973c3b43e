//! Connection manager: reconnection with linear backoff and a handler
//! registry that outlives any single physical connection.
//!
//! The manager owns at most one live [`Transport`] at a time. When the
//! active connection drops it schedules exactly one reconnect attempt
//! (close and error usually arrive back to back; a single-flight flag
//! swallows the second), waits `base_delay * attempt`, then dials again and
//! re-attaches every registered handler to the fresh transport.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use parley_shared::Command;

use crate::transport::{
    EventCallback, EventKind, SocketState, Transport, TransportEvent, WsTransport,
};

/// Connection lifecycle as exposed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// The retry budget is spent; only `disconnect()` followed by a manual
    /// `connect()` starts over.
    Exhausted,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Reconnect behavior knobs.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Retry budget before the manager gives up.
    pub max_retries: u32,
    /// The delay before attempt N is `base_delay * N`.
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Identifies one registry entry; pass it to [`ConnectionManager::off`] to
/// stop receiving events, including from the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

struct Registry {
    next_id: u64,
    entries: Vec<(u64, EventKind, EventCallback)>,
}

impl Registry {
    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|(entry_id, _, _)| *entry_id == id)
    }
}

type Dialer = dyn Fn() -> Arc<dyn Transport> + Send + Sync;

/// Keeps one logical connection alive across any number of physical ones.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    url: String,
    policy: ReconnectPolicy,
    dial: Box<Dialer>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    registry: Mutex<Registry>,
    retries: AtomicU32,
    reconnecting: AtomicBool,
    /// Bumped on every dial; observers wired to an older transport use it
    /// to recognize they are stale and stand down.
    epoch: AtomicU64,
    backoff: Mutex<Option<JoinHandle<()>>>,
    state: watch::Sender<ConnectionState>,
    last_event: watch::Sender<String>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_policy(url, ReconnectPolicy::default())
    }

    pub fn with_policy(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self::with_dial(url, policy, || {
            let transport: Arc<dyn Transport> = WsTransport::new();
            transport
        })
    }

    pub(crate) fn with_dial(
        url: impl Into<String>,
        policy: ReconnectPolicy,
        dial: impl Fn() -> Arc<dyn Transport> + Send + Sync + 'static,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_event, _) = watch::channel(String::new());
        Self {
            inner: Arc::new(ManagerInner {
                url: url.into(),
                policy,
                dial: Box::new(dial),
                transport: Mutex::new(None),
                registry: Mutex::new(Registry {
                    next_id: 0,
                    entries: Vec::new(),
                }),
                retries: AtomicU32::new(0),
                reconnecting: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                backoff: Mutex::new(None),
                state,
                last_event,
            }),
        }
    }

    /// Dial the endpoint. Never blocks; progress is visible through the
    /// state watch. A call made while `Disconnected` starts a fresh retry
    /// budget; a call made while `Exhausted` keeps refusing.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Transmit `command` if a connection is currently open; silently drop
    /// it otherwise.
    pub fn send(&self, command: &Command) {
        let transport = self.inner.transport.lock().clone();
        if let Some(transport) = transport {
            transport.send(command);
        }
    }

    /// Register `callback` permanently: it survives every reconnect and,
    /// if a connection is currently live, also starts receiving its events
    /// right away.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&TransportEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.on(kind, Arc::new(callback))
    }

    /// Remove a registration. Takes effect immediately, including on the
    /// live connection.
    pub fn off(&self, subscription: Subscription) {
        self.inner
            .registry
            .lock()
            .entries
            .retain(|(id, _, _)| *id != subscription.0);
    }

    /// Force-close the connection and suppress any further automatic
    /// reconnection. Resolves once the transport confirms closure.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let inner = &self.inner;

        // pre-empt any further automatic reconnection
        inner
            .retries
            .store(inner.policy.max_retries, Ordering::SeqCst);
        if let Some(pending) = inner.backoff.lock().take() {
            pending.abort();
        }
        inner.reconnecting.store(false, Ordering::SeqCst);

        let transport = inner.transport.lock().take();
        let Some(transport) = transport else {
            return;
        };
        transport.close();

        let mut closed = transport.watch_state();
        while *closed.borrow_and_update() != SocketState::Closed {
            if closed.changed().await.is_err() {
                break;
            }
        }

        inner.state.send_replace(ConnectionState::Disconnected);
        inner.set_event("disconnected");
    }

    /// The endpoint this manager dials.
    pub fn endpoint(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// The latest human-readable connection event.
    pub fn last_event(&self) -> String {
        self.inner.last_event.borrow().clone()
    }

    pub fn watch_events(&self) -> watch::Receiver<String> {
        self.inner.last_event.subscribe()
    }
}

impl ManagerInner {
    fn set_event(&self, event: impl Into<String>) {
        self.last_event.send_replace(event.into());
    }

    fn on(self: &Arc<Self>, kind: EventKind, callback: EventCallback) -> Subscription {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, kind, callback.clone()));
            id
        };
        let transport = self.transport.lock().clone();
        if let Some(transport) = transport {
            transport.on(kind, self.guarded(id, callback));
        }
        Subscription(id)
    }

    /// Wrap a registry callback so `off` takes effect immediately even on
    /// the live connection.
    fn guarded(self: &Arc<Self>, id: u64, callback: EventCallback) -> EventCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |event: &TransportEvent| {
            let Some(inner) = weak.upgrade() else { return };
            if inner.registry.lock().contains(id) {
                callback(event);
            }
        })
    }

    fn connect(self: &Arc<Self>) {
        // a manual connect from the disconnected state starts over
        if *self.state.borrow() == ConnectionState::Disconnected {
            self.retries.store(0, Ordering::SeqCst);
        }

        if self.retries.load(Ordering::SeqCst) >= self.policy.max_retries {
            self.state.send_replace(ConnectionState::Exhausted);
            self.set_event("max retry attempts reached");
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        // fully discard the previous connection before creating the next
        let previous = self.transport.lock().take();
        if let Some(previous) = previous {
            previous.close();
        }

        let transport = (self.dial)();

        // re-attach every persistent handler, in registration order, before
        // the manager's own observers
        {
            let registry = self.registry.lock();
            for (id, kind, callback) in registry.entries.iter() {
                transport.on(*kind, self.guarded(*id, callback.clone()));
            }
        }

        let weak = Arc::downgrade(self);
        transport.on(
            EventKind::Open,
            Arc::new(move |_: &TransportEvent| {
                if let Some(inner) = weak.upgrade() {
                    if inner.epoch.load(Ordering::SeqCst) != epoch {
                        return; // a discarded connection finished its handshake
                    }
                    inner.retries.store(0, Ordering::SeqCst);
                    inner.state.send_replace(ConnectionState::Connected);
                    inner.set_event("connected to server");
                }
            }),
        );
        let weak = Arc::downgrade(self);
        transport.on(
            EventKind::Close,
            Arc::new(move |_: &TransportEvent| {
                if let Some(inner) = weak.upgrade() {
                    if inner.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    inner.schedule_reconnect();
                }
            }),
        );
        let weak = Arc::downgrade(self);
        transport.on(
            EventKind::Error,
            Arc::new(move |_: &TransportEvent| {
                if let Some(inner) = weak.upgrade() {
                    if inner.epoch.load(Ordering::SeqCst) != epoch {
                        return;
                    }
                    inner.schedule_reconnect();
                }
            }),
        );

        self.state.send_replace(ConnectionState::Connecting);
        *self.transport.lock() = Some(transport.clone());
        transport.open(&self.url);
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if self.retries.load(Ordering::SeqCst) >= self.policy.max_retries {
            return;
        }
        // single flight: close and error often arrive back to back
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let attempt = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .send_replace(ConnectionState::Reconnecting { attempt });
        self.set_event(format!("reconnecting attempt {attempt}..."));
        tracing::debug!("scheduling reconnect attempt {attempt}");

        let delay = self.policy.delay_for_attempt(attempt);
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            inner.reconnecting.store(false, Ordering::SeqCst);
            // stand down if an orderly disconnect overtook the timer
            if *inner.state.borrow() == ConnectionState::Disconnected {
                return;
            }
            inner.connect();
        });
        *self.backoff.lock() = Some(handle);
    }
}

//! Scripted transport used by the manager and dispatcher tests.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use parley_shared::{Command, Envelope};

use crate::transport::{
    EventCallback, EventKind, SocketState, Transport, TransportError, TransportEvent,
};

/// A transport whose events are fired by the test instead of a socket.
pub(crate) struct FakeTransport {
    callbacks: Mutex<HashMap<EventKind, Vec<EventCallback>>>,
    state: watch::Sender<SocketState>,
    pub endpoint: Mutex<Option<String>>,
    pub sent: Mutex<Vec<Command>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(SocketState::Connecting);
        Arc::new(Self {
            callbacks: Mutex::new(HashMap::new()),
            state,
            endpoint: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn fire(&self, event: TransportEvent) {
        let fanout: Vec<EventCallback> = self
            .callbacks
            .lock()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();
        for callback in fanout {
            callback(&event);
        }
    }

    pub fn fire_open(&self) {
        self.state.send_replace(SocketState::Open);
        self.fire(TransportEvent::Open);
    }

    pub fn fire_error(&self, message: &str) {
        self.fire(TransportEvent::Error(TransportError::Read(
            message.to_string(),
        )));
    }

    pub fn fire_close(&self) {
        self.state.send_replace(SocketState::Closed);
        self.fire(TransportEvent::Close);
    }

    pub fn fire_message(&self, envelope: Envelope) {
        self.fire(TransportEvent::Message(envelope));
    }
}

impl Transport for FakeTransport {
    fn open(self: Arc<Self>, endpoint: &str) {
        *self.endpoint.lock() = Some(endpoint.to_string());
    }

    fn on(&self, kind: EventKind, callback: EventCallback) {
        self.callbacks.lock().entry(kind).or_default().push(callback);
    }

    fn send(&self, command: &Command) {
        if *self.state.borrow() == SocketState::Open {
            self.sent.lock().push(command.clone());
        }
    }

    fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<SocketState> {
        self.state.subscribe()
    }

    fn close(&self) {
        if *self.state.borrow() == SocketState::Closed {
            return;
        }
        self.state.send_replace(SocketState::Closed);
        self.fire(TransportEvent::Close);
    }
}

/// Hands out [`FakeTransport`]s and records every dial.
pub(crate) struct FakeHub {
    transports: Mutex<Vec<Arc<FakeTransport>>>,
    dialed: Notify,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transports: Mutex::new(Vec::new()),
            dialed: Notify::new(),
        })
    }

    pub fn dialer(self: &Arc<Self>) -> impl Fn() -> Arc<dyn Transport> + Send + Sync + 'static {
        let hub = self.clone();
        move || {
            let transport = FakeTransport::new();
            hub.transports.lock().push(transport.clone());
            hub.dialed.notify_waiters();
            let transport: Arc<dyn Transport> = transport;
            transport
        }
    }

    pub fn dials(&self) -> usize {
        self.transports.lock().len()
    }

    /// The most recently dialed transport. Panics when nothing was dialed.
    pub fn latest(&self) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .last()
            .expect("no transport dialed yet")
            .clone()
    }

    pub async fn wait_for_dials(&self, count: usize) {
        loop {
            let dialed = self.dialed.notified();
            if self.dials() >= count {
                return;
            }
            dialed.await;
        }
    }
}

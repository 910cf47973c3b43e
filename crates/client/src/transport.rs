//! WebSocket transport: one physical connection with per-event callback
//! fanout.
//!
//! A [`Transport`] owns exactly one socket for its whole life. Callbacks
//! registered on it die with it; the connection manager re-attaches its
//! persistent registry to every fresh transport it dials.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use parley_shared::{Command, Envelope};

/// Low-level ready state of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Fault classes surfaced on the `error` channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("read failed: {0}")]
    Read(String),
    #[error("malformed frame: {0}")]
    Parse(String),
}

/// One event fired by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Open,
    Close,
    Error(TransportError),
    Message(Envelope),
}

/// Event families callbacks subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Close,
    Error,
    Message,
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TransportEvent::Open => EventKind::Open,
            TransportEvent::Close => EventKind::Close,
            TransportEvent::Error(_) => EventKind::Error,
            TransportEvent::Message(_) => EventKind::Message,
        }
    }
}

pub type EventCallback = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

/// One physical connection.
pub trait Transport: Send + Sync {
    /// Start connecting to `endpoint`. Never blocks; the outcome arrives as
    /// a later `open`, `error`, or `close` event.
    fn open(self: Arc<Self>, endpoint: &str);

    /// Register `callback` for `kind` on this connection. Callbacks for the
    /// same kind fire in registration order.
    fn on(&self, kind: EventKind, callback: EventCallback);

    /// Serialize and transmit `command` if the socket is open; drop it
    /// silently otherwise. Best-effort, no queueing.
    fn send(&self, command: &Command);

    fn state(&self) -> SocketState;

    /// Watch the ready state; closure is confirmed when it reads
    /// [`SocketState::Closed`].
    fn watch_state(&self) -> watch::Receiver<SocketState>;

    /// Request an orderly shutdown. Completion is observed via the `close`
    /// event or the state watch, not the return.
    fn close(&self);
}

/// Production transport over tokio-tungstenite.
pub struct WsTransport {
    callbacks: Mutex<HashMap<EventKind, Vec<EventCallback>>>,
    state: watch::Sender<SocketState>,
    outbound: mpsc::UnboundedSender<Message>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
}

impl WsTransport {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(SocketState::Connecting);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            callbacks: Mutex::new(HashMap::new()),
            state,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
        })
    }

    /// Invoke every callback registered for the event's kind, in
    /// registration order. The list is cloned out of the lock first so
    /// callbacks may register further callbacks.
    fn emit(&self, event: TransportEvent) {
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

    async fn run(self: Arc<Self>, endpoint: String) {
        let Some(mut outbound_rx) = self.outbound_rx.lock().take() else {
            return; // opened twice
        };

        let (stream, _response) = match connect_async(endpoint.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                tracing::debug!("websocket connect to {endpoint} failed: {e}");
                self.emit(TransportEvent::Error(TransportError::Connect(
                    e.to_string(),
                )));
                self.state.send_replace(SocketState::Closed);
                self.emit(TransportEvent::Close);
                return;
            }
        };

        tracing::debug!("websocket connected to {endpoint}");
        self.state.send_replace(SocketState::Open);
        self.emit(TransportEvent::Open);

        let (mut write, mut read) = stream.split();

        // Drain the outbound queue into the sink.
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if write.send(frame).await.is_err() {
                    break;
                }
            }
        });

        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                    Ok(envelope) => self.emit(TransportEvent::Message(envelope)),
                    Err(e) => {
                        tracing::warn!("dropping malformed frame: {e}");
                        self.emit(TransportEvent::Error(TransportError::Parse(
                            e.to_string(),
                        )));
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    // pong is handled by tungstenite
                }
                Ok(_) => {
                    // binary, pong: not part of the protocol
                }
                Err(e) => {
                    self.emit(TransportEvent::Error(TransportError::Read(e.to_string())));
                    break;
                }
            }
        }

        writer.abort();
        self.state.send_replace(SocketState::Closed);
        self.emit(TransportEvent::Close);
        tracing::debug!("websocket to {endpoint} closed");
    }
}

impl Transport for WsTransport {
    fn open(self: Arc<Self>, endpoint: &str) {
        let endpoint = endpoint.to_string();
        tokio::spawn(self.run(endpoint));
    }

    fn on(&self, kind: EventKind, callback: EventCallback) {
        self.callbacks.lock().entry(kind).or_default().push(callback);
    }

    fn send(&self, command: &Command) {
        if *self.state.borrow() != SocketState::Open {
            return;
        }
        match serde_json::to_string(command) {
            Ok(json) => {
                let _ = self.outbound.send(Message::Text(json.into()));
            }
            Err(e) => tracing::error!("failed to serialize command: {e}"),
        }
    }

    fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<SocketState> {
        self.state.subscribe()
    }

    fn close(&self) {
        if matches!(self.state(), SocketState::Closing | SocketState::Closed) {
            return;
        }
        if self.outbound_rx.lock().is_some() {
            // never opened; there is no socket to shut down
            self.state.send_replace(SocketState::Closed);
            self.emit(TransportEvent::Close);
            return;
        }
        self.state.send_replace(SocketState::Closing);
        if self.outbound.send(Message::Close(None)).is_err() {
            // the run task is already gone; nothing left to shut down
            self.state.send_replace(SocketState::Closed);
        }
    }
}

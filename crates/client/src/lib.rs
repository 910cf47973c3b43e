//! parley client core: a resilient websocket connection layer and the chat
//! protocol dispatcher on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  ChatClient                  │
//! │  (envelope dispatch → ChatState watch)       │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │              ConnectionManager               │
//! │  (backoff reconnects, persistent registry)   │
//! └──────────────────────────────────────────────┘
//!                       │ dials, one at a time
//!                       ▼
//! ┌──────────────────────────────────────────────┐
//! │           Transport (WsTransport)            │
//! │  (one socket, per-connection callbacks)      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Applications read state from the `tokio::sync::watch` channels
//! (`connection_state`, `last_event`, `ChatState`) rather than from events
//! directly; the dispatcher writes incoming envelopes into state
//! automatically.

pub mod chat;
pub mod manager;
pub mod session;
pub mod transport;

pub use chat::{ChatClient, ChatError, ChatMessage, ChatState};
pub use manager::{ConnectionManager, ConnectionState, ReconnectPolicy, Subscription};
pub use session::UserSession;
pub use transport::{
    EventKind, SocketState, Transport, TransportError, TransportEvent, WsTransport,
};

#[cfg(test)]
pub(crate) mod test_support;

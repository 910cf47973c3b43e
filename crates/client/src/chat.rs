//! Chat client: folds the inbound envelope stream into typed chat state.
//!
//! `ChatClient` sits on top of a [`ConnectionManager`] and classifies each
//! envelope by its content type: chat messages replace the current message,
//! notifications reconcile the presence set and land in the log,
//! online-users snapshots merge additively, typing lists replace the typing
//! set. Unrecognized types are ignored so old clients keep working against
//! newer servers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use parley_shared::{Command, ContentKind, Envelope};

use crate::manager::{ConnectionManager, ConnectionState};
use crate::session::UserSession;
use crate::transport::{EventKind, TransportEvent};

/// The message currently on screen.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub time: String,
    pub is_own: bool,
}

/// Chat-facing state derived from the envelope stream.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ChatState {
    pub current_message: ChatMessage,
    /// Timestamped lines: envelope notifications and connection lifecycle
    /// events.
    pub notification_log: Vec<String>,
    /// Who is typing right now, never including the local user.
    pub typing_users: Vec<String>,
    /// Users considered online, in arrival order, local user included.
    pub presence: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

/// The application-facing chat surface.
pub struct ChatClient {
    manager: ConnectionManager,
    session: Arc<UserSession>,
    state: Arc<watch::Sender<ChatState>>,
    initialized: AtomicBool,
}

impl ChatClient {
    /// Build a client for `base_url` (e.g. `ws://localhost:8080`). The
    /// local user travels in the endpoint query string.
    pub fn new(base_url: &str, session: Arc<UserSession>) -> Result<Self, ChatError> {
        let mut endpoint = url::Url::parse(base_url)?;
        endpoint.set_path("/ws");
        endpoint
            .query_pairs_mut()
            .append_pair("username", session.current_user());
        Ok(Self::with_manager(
            ConnectionManager::new(String::from(endpoint)),
            session,
        ))
    }

    pub(crate) fn with_manager(manager: ConnectionManager, session: Arc<UserSession>) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            manager,
            session,
            state: Arc::new(state),
            initialized: AtomicBool::new(false),
        }
    }

    /// Connect and start dispatching. Safe to call repeatedly; only the
    /// first call wires handlers.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }

        self.manager.connect();

        self.manager.on(EventKind::Open, |_| {
            tracing::debug!("chat stream open");
        });

        let session = self.session.clone();
        let state = self.state.clone();
        self.manager.on(EventKind::Message, move |event| {
            if let TransportEvent::Message(envelope) = event {
                apply(&session, &state, envelope.clone());
            }
        });

        // connection lifecycle events land in the notification log
        let state = self.state.clone();
        let mut events = self.manager.watch_events();
        tokio::spawn(async move {
            while events.changed().await.is_ok() {
                let event = events.borrow_and_update().clone();
                if event.is_empty() {
                    continue;
                }
                let time = chrono::Local::now().format("%H:%M:%S");
                state.send_modify(|chat| {
                    chat.notification_log.push(format!("[{time}] {event}"));
                });
            }
        });
    }

    /// Transmit a chat message. Best-effort: dropped if not connected.
    pub fn send_message(&self, text: impl Into<String>) {
        self.manager.send(&Command::Message { value: text.into() });
    }

    /// Announce typing. Only the active state is ever transmitted; there is
    /// no stopped-typing signal.
    pub fn send_typing(&self, is_typing: bool) {
        if is_typing {
            self.manager.send(&Command::Typing {
                value: "typing".to_string(),
            });
        }
    }

    /// Close the connection and stop reconnecting. Idempotent.
    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    pub fn last_event(&self) -> String {
        self.manager.last_event()
    }

    pub fn chat_state(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn watch_chat(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    /// The underlying connection manager, for direct `on`/`off`
    /// registrations.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn session(&self) -> &Arc<UserSession> {
        &self.session
    }
}

fn apply(session: &UserSession, state: &watch::Sender<ChatState>, envelope: Envelope) {
    let me = session.current_user();
    match envelope.content.kind {
        ContentKind::Message => {
            let message = ChatMessage {
                id: envelope.content.id,
                sender: envelope.username.clone(),
                text: envelope.content.value,
                time: envelope.time,
                is_own: envelope.username == me,
            };
            state.send_modify(|chat| chat.current_message = message);
        }
        ContentKind::Notification => {
            let extra = envelope.content.extra();
            let presence = session.reconcile(|users| {
                if extra.is_empty() {
                    users.clear();
                } else {
                    // keep only self and whoever the refresh still lists,
                    // then pick up newcomers
                    users.retain(|user| user == me || extra.iter().any(|kept| kept == user));
                    for user in extra {
                        if user != me && !users.contains(user) {
                            users.push(user.clone());
                        }
                    }
                }
            });
            let line = format!("[{}] {}", envelope.time, envelope.content.value);
            state.send_modify(|chat| {
                chat.presence = presence;
                chat.notification_log.push(line);
            });
        }
        ContentKind::OnlineUsers => {
            let extra = envelope.content.extra();
            let presence = session.reconcile(|users| {
                for user in extra {
                    if user != me && !users.contains(user) {
                        users.push(user.clone());
                    }
                }
            });
            state.send_modify(|chat| chat.presence = presence);
        }
        ContentKind::Typing => {
            let typing: Vec<String> = envelope
                .content
                .extra()
                .iter()
                .filter(|user| user.as_str() != me)
                .cloned()
                .collect();
            state.send_modify(|chat| chat.typing_users = typing);
        }
        ContentKind::Unknown => {}
    }
}

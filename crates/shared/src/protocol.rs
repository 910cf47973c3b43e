//! Chat wire protocol: inbound envelopes and outbound commands.
//!
//! Everything on the wire is JSON text frames. The server stamps each
//! envelope with a local `HH:MM:SS` time; clients treat the stamp as an
//! opaque display string.

use chrono::Local;
use serde::{Deserialize, Serialize};

/// Tag carried by every inbound envelope's content.
///
/// The catch-all variant keeps old clients working when the server grows
/// new event types; dispatchers treat it as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentKind {
    Message,
    Notification,
    OnlineUsers,
    Typing,
    #[serde(other)]
    Unknown,
}

/// Payload of one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub kind: ContentKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Vec<String>>,
}

impl Content {
    /// The extra user list, empty when absent.
    pub fn extra(&self) -> &[String] {
        self.extra.as_deref().unwrap_or_default()
    }
}

/// One structured unit received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub username: String,
    pub content: Content,
    pub time: String,
}

impl Envelope {
    fn stamped(username: &str, content: Content) -> Self {
        Self {
            username: username.to_string(),
            content,
            time: Local::now().format("%H:%M:%S").to_string(),
        }
    }

    /// A chat message from `username`.
    pub fn message(username: &str, id: &str, value: &str) -> Self {
        Self::stamped(
            username,
            Content {
                kind: ContentKind::Message,
                id: id.to_string(),
                value: value.to_string(),
                extra: None,
            },
        )
    }

    /// A system notification attributed to `username`, carrying the current
    /// online-users snapshot.
    pub fn notification(username: &str, value: &str, extra: Vec<String>) -> Self {
        Self::stamped(
            username,
            Content {
                kind: ContentKind::Notification,
                id: String::new(),
                value: value.to_string(),
                extra: Some(extra),
            },
        )
    }

    /// The full online-users snapshot sent to a newly connected client.
    pub fn online_users(extra: Vec<String>) -> Self {
        Self::stamped(
            "",
            Content {
                kind: ContentKind::OnlineUsers,
                id: String::new(),
                value: String::new(),
                extra: Some(extra),
            },
        )
    }

    /// The set of users currently typing. An empty list clears the
    /// indicator on every client.
    pub fn typing(extra: Vec<String>) -> Self {
        Self::stamped(
            "",
            Content {
                kind: ContentKind::Typing,
                id: String::new(),
                value: String::new(),
                extra: Some(extra),
            },
        )
    }
}

/// One command sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    Message { value: String },
    Typing { value: String },
}

//! Connected-client registry and broadcast fanout.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use parley_shared::Envelope;

/// A short alphanumeric identifier for message ids and anonymous names.
pub(crate) fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

struct Client {
    username: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Fans envelopes out to every live connection. One instance per server;
/// owned by the application state, not a process-wide static.
pub struct Hub {
    clients: RwLock<HashMap<Uuid, Client>>,
    typing: Mutex<HashSet<String>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            typing: Mutex::new(HashSet::new()),
        }
    }

    /// Register a connection and announce the join to everyone else.
    pub async fn register(&self, username: &str, tx: mpsc::UnboundedSender<Envelope>) -> Uuid {
        let id = Uuid::new_v4();
        self.clients.write().await.insert(
            id,
            Client {
                username: username.to_string(),
                tx,
            },
        );
        tracing::info!(user = %username, "client registered");

        let online = self.online_users().await;
        self.broadcast(Envelope::notification(
            username,
            &format!("{username} joined"),
            online,
        ))
        .await;
        id
    }

    /// Drop a connection and announce the leave.
    pub async fn unregister(&self, id: Uuid) {
        let removed = self.clients.write().await.remove(&id);
        if let Some(client) = removed {
            tracing::info!(user = %client.username, "client unregistered");
            let online = self.online_users().await;
            self.broadcast(Envelope::notification(
                &client.username,
                &format!("{} left", client.username),
                online,
            ))
            .await;
        }
    }

    /// Usernames of all live connections, one entry per connection.
    pub async fn online_users(&self) -> Vec<String> {
        self.clients
            .read()
            .await
            .values()
            .map(|client| client.username.clone())
            .collect()
    }

    /// Queue `envelope` to every client except the originating username:
    /// senders never see their own envelopes.
    pub async fn broadcast(&self, envelope: Envelope) {
        let clients = self.clients.read().await;
        for client in clients.values() {
            if !envelope.username.is_empty() && client.username == envelope.username {
                continue;
            }
            let _ = client.tx.send(envelope.clone());
        }
    }

    /// Broadcast a chat message from `username` with a fresh short id.
    pub async fn broadcast_message(&self, username: &str, text: &str) {
        self.broadcast(Envelope::message(username, &random_id(10), text))
            .await;
    }

    /// Remember `username` as typing until the next flush.
    pub async fn set_typing(&self, username: &str) {
        self.typing.lock().await.insert(username.to_string());
    }

    /// Periodically broadcast and clear the typing set. After a burst ends
    /// one trailing empty broadcast clears the indicator on every client.
    pub async fn flush_typing(&self) {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        let mut was_typing = false;
        loop {
            interval.tick().await;
            let users: Vec<String> = self.typing.lock().await.drain().collect();
            if users.is_empty() && !was_typing {
                continue;
            }
            was_typing = !users.is_empty();
            self.broadcast(Envelope::typing(users)).await;
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::ContentKind;

    #[tokio::test]
    async fn join_announces_to_everyone_else() {
        let hub = Hub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        hub.register("alice", alice_tx).await;

        let (bob_tx, _bob_rx) = mpsc::unbounded_channel();
        hub.register("bob", bob_tx).await;

        let envelope = alice_rx.recv().await.unwrap();
        assert_eq!(envelope.content.kind, ContentKind::Notification);
        assert_eq!(envelope.content.value, "bob joined");
        let mut online = envelope.content.extra().to_vec();
        online.sort();
        assert_eq!(online, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn senders_never_receive_their_own_envelopes() {
        let hub = Hub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        hub.register("alice", alice_tx).await;
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        hub.register("bob", bob_tx).await;
        let _ = alice_rx.recv().await; // bob's join

        hub.broadcast_message("bob", "hi").await;

        let envelope = alice_rx.recv().await.unwrap();
        assert_eq!(envelope.content.kind, ContentKind::Message);
        assert_eq!(envelope.username, "bob");
        assert_eq!(envelope.content.value, "hi");
        assert_eq!(envelope.content.id.len(), 10);

        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_announces_the_remaining_users() {
        let hub = Hub::new();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        hub.register("alice", alice_tx).await;
        let (bob_tx, _bob_rx) = mpsc::unbounded_channel();
        let bob = hub.register("bob", bob_tx).await;
        let _ = alice_rx.recv().await;

        hub.unregister(bob).await;

        let envelope = alice_rx.recv().await.unwrap();
        assert_eq!(envelope.content.value, "bob left");
        assert_eq!(envelope.content.extra().to_vec(), vec!["alice"]);
        assert_eq!(hub.online_users().await, vec!["alice"]);
    }

    #[tokio::test]
    async fn unregister_twice_is_harmless() {
        let hub = Hub::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = hub.register("alice", tx).await;
        hub.unregister(id).await;
        hub.unregister(id).await;
        assert!(hub.online_users().await.is_empty());
    }
}

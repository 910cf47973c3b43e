//! End-to-end: real clients against a real server on an ephemeral port.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_client::{
    ChatClient, EventKind, SocketState, Transport, TransportEvent, UserSession, WsTransport,
};
use parley_server::{app, AppState};
use parley_shared::{Command, ContentKind, Envelope};

async fn start_server() -> String {
    let state = AppState::new();
    let hub = state.hub.clone();
    tokio::spawn(async move { hub.flush_typing().await });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.unwrap();
    });
    format!("ws://{addr}")
}

async fn wait_for(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;
    assert!(deadline.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn two_clients_chat_roundtrip() {
    let base = start_server().await;

    let alice = ChatClient::new(&base, Arc::new(UserSession::new("alice"))).unwrap();
    alice.init();
    wait_for("alice to connect", || {
        alice.connection_state().is_connected()
    })
    .await;

    let bob = ChatClient::new(&base, Arc::new(UserSession::new("bob"))).unwrap();
    bob.init();
    wait_for("bob to connect", || bob.connection_state().is_connected()).await;

    // alice learns about bob from the join notification, bob from the
    // online-users snapshot
    wait_for("alice to see bob", || {
        alice.chat_state().presence.contains(&"bob".to_string())
    })
    .await;
    wait_for("bob to see alice", || {
        bob.chat_state().presence.contains(&"alice".to_string())
    })
    .await;
    assert!(alice
        .chat_state()
        .notification_log
        .iter()
        .any(|line| line.ends_with("bob joined")));

    bob.send_message("hi alice");
    wait_for("alice to receive the message", || {
        alice.chat_state().current_message.text == "hi alice"
    })
    .await;
    let message = alice.chat_state().current_message;
    assert_eq!(message.sender, "bob");
    assert!(!message.is_own);
    assert_eq!(message.id.len(), 10);
    // the sender never gets an echo
    assert!(bob.chat_state().current_message.text.is_empty());

    bob.send_typing(true);
    wait_for("alice to see bob typing", || {
        alice.chat_state().typing_users == vec!["bob".to_string()]
    })
    .await;
    // the trailing empty flush clears the indicator
    wait_for("the typing indicator to clear", || {
        alice.chat_state().typing_users.is_empty()
    })
    .await;

    bob.disconnect().await;
    wait_for("alice to see bob leave", || {
        !alice.chat_state().presence.contains(&"bob".to_string())
    })
    .await;
    assert!(alice
        .chat_state()
        .notification_log
        .iter()
        .any(|line| line.ends_with("bob left")));
    assert_eq!(alice.chat_state().presence, vec!["alice".to_string()]);
}

#[tokio::test]
async fn bare_transport_gets_an_anonymous_identity() {
    let base = start_server().await;

    let received: Arc<Mutex<Vec<Envelope>>> = Arc::new(Mutex::new(Vec::new()));
    let opened = Arc::new(Mutex::new(false));

    let transport = WsTransport::new();
    let sink = received.clone();
    transport.on(
        EventKind::Message,
        Arc::new(move |event: &TransportEvent| {
            if let TransportEvent::Message(envelope) = event {
                sink.lock().unwrap().push(envelope.clone());
            }
        }),
    );
    let flag = opened.clone();
    transport.on(
        EventKind::Open,
        Arc::new(move |_: &TransportEvent| {
            *flag.lock().unwrap() = true;
        }),
    );

    // no username in the query: the server assigns one
    transport.clone().open(&format!("{base}/ws"));
    wait_for("the socket to open", || *opened.lock().unwrap()).await;

    wait_for("the online-users snapshot", || {
        !received.lock().unwrap().is_empty()
    })
    .await;
    let snapshot = received.lock().unwrap()[0].clone();
    assert_eq!(snapshot.content.kind, ContentKind::OnlineUsers);
    assert_eq!(snapshot.content.extra().len(), 1);
    assert!(snapshot.content.extra()[0].starts_with("anonymous-"));

    // a lone sender receives no echo of its own message
    transport.send(&Command::Message {
        value: "into the void".to_string(),
    });

    transport.close();
    let mut state = transport.watch_state();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *state.borrow_and_update() != SocketState::Closed {
            if state.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("close was never confirmed");
    assert_eq!(received.lock().unwrap().len(), 1);
}

//! End-to-end tests for the live channel over a real socket.

use futures_util::StreamExt;
use heartlink_relay::config::Config;
use heartlink_relay::http::build_router;
use heartlink_relay::notify::LogDispatcher;
use heartlink_relay::server::LoveRelay;
use heartlink_relay::storage::{PairStore, SqliteStorage};
use link_types::{LiveFrame, UserId};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    relay: Arc<LoveRelay>,
    alice: UserId,
    bob: UserId,
}

async fn spawn_paired_server() -> TestServer {
    let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
    let alice = storage.create_user("alice").await.unwrap().id;
    let bob = storage.create_user("bob").await.unwrap().id;
    let relay = Arc::new(LoveRelay::new(
        Config::default(),
        storage,
        Arc::new(LogDispatcher),
    ));

    let request = relay.request_pair(alice, "bob").await.unwrap();
    relay
        .respond_to_request(request.id, bob, true)
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(relay.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        relay,
        alice,
        bob,
    }
}

async fn connect_as(addr: SocketAddr, user: UserId) -> Socket {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    request.headers_mut().insert(
        "x-user-id",
        HeaderValue::from_str(&user.to_string()).unwrap(),
    );
    let (socket, _) = connect_async(request).await.unwrap();
    socket
}

async fn wait_until_connected(relay: &LoveRelay, user: UserId, connected: bool) {
    for _ in 0..200 {
        if relay.registry().is_connected(user).await == connected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user never reached connected={connected}");
}

async fn next_frame(socket: &mut Socket) -> LiveFrame {
    let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("timed out waiting for frame")
        .expect("socket closed")
        .unwrap();
    match message {
        Message::Text(text) => LiveFrame::from_json(&text).unwrap(),
        other => panic!("unexpected message {other:?}"),
    }
}

#[tokio::test]
async fn partner_receives_love_event_sent_over_http() {
    let server = spawn_paired_server().await;
    let mut bob_socket = connect_as(server.addr, server.bob).await;
    wait_until_connected(&server.relay, server.bob, true).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/love/send", server.addr))
        .header("x-user-id", server.alice.to_string())
        .json(&serde_json::json!({ "duration_seconds": 42 }))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let LiveFrame::LoveEvent(event) = next_frame(&mut bob_socket).await;
    assert_eq!(event.duration_seconds, 42);
    assert_eq!(event.sender_id, server.alice);
    assert_eq!(event.sender.unwrap().username, "alice");
}

#[tokio::test]
async fn frames_arrive_in_send_order() {
    let server = spawn_paired_server().await;
    let mut alice_socket = connect_as(server.addr, server.alice).await;
    wait_until_connected(&server.relay, server.alice, true).await;

    for duration in 1..=5 {
        server.relay.send_love(server.bob, duration).await.unwrap();
    }

    for expected in 1..=5u32 {
        let LiveFrame::LoveEvent(event) = next_frame(&mut alice_socket).await;
        assert_eq!(event.duration_seconds, expected);
    }
}

#[tokio::test]
async fn new_connection_replaces_old_one() {
    let server = spawn_paired_server().await;
    let mut first = connect_as(server.addr, server.bob).await;
    wait_until_connected(&server.relay, server.bob, true).await;
    let mut second = connect_as(server.addr, server.bob).await;

    // The first socket is closed by the server.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "old connection was not closed");

    server.relay.send_love(server.alice, 7).await.unwrap();
    let LiveFrame::LoveEvent(event) = next_frame(&mut second).await;
    assert_eq!(event.duration_seconds, 7);
    assert_eq!(server.relay.registry().connection_count().await, 1);
}

#[tokio::test]
async fn closing_the_socket_unregisters() {
    let server = spawn_paired_server().await;
    let mut socket = connect_as(server.addr, server.bob).await;
    wait_until_connected(&server.relay, server.bob, true).await;

    socket.close(None).await.unwrap();

    wait_until_connected(&server.relay, server.bob, false).await;
}

#[tokio::test]
async fn unauthenticated_upgrade_is_refused() {
    let server = spawn_paired_server().await;

    let url = format!("ws://{}/ws", server.addr);
    let err = connect_async(url.as_str()).await.unwrap_err();

    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

//! Live channel.
//!
//! `GET /ws` upgrades an authenticated request to a WebSocket. The server
//! only pushes frames; anything the client sends other than a close is
//! ignored. One writer task per socket drains the connection's outbound
//! buffer, so frames reach the client in the order they were queued.

use super::auth::Caller;
use crate::registry::{ConnectionHandle, Outbound};
use crate::server::LoveRelay;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use futures_util::{Sink, SinkExt, StreamExt};
use link_types::UserId;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// How long a closing handshake may take before the socket is dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn ws_handler(
    Extension(relay): Extension<Arc<LoveRelay>>,
    Caller(user): Caller,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, relay, user))
}

async fn serve_socket(socket: WebSocket, relay: Arc<LoveRelay>, user: UserId) {
    let (handle, outbound) = ConnectionHandle::new(relay.config().realtime.outbound_buffer);
    let connection = handle.id();
    relay.registry().register(user, handle).await;
    relay
        .metrics()
        .connections_total
        .fetch_add(1, Ordering::Relaxed);
    tracing::info!(user = %user, connection = %connection, "Live connection opened");

    let (sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(write_frames(sink, outbound));

    let mut reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    relay.registry().unregister(user, connection).await;
    tracing::info!(user = %user, connection = %connection, "Live connection closed");
}

/// Write queued frames to `sink` until the registry closes the connection
/// or the peer stops accepting writes.
///
/// A close from the registry also interrupts a write that is blocked on a
/// peer that stopped reading.
async fn write_frames<S>(mut sink: S, mut outbound: Outbound)
where
    S: Sink<Message> + Unpin,
{
    while let Some(frame) = outbound.next().await {
        let written = tokio::select! {
            result = sink.send(Message::Text(frame.to_string())) => result.is_ok(),
            () = outbound.closed() => false,
        };
        if !written {
            return;
        }
    }
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use std::convert::Infallible;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A peer that stopped reading: no write ever completes.
    struct StalledPeer;

    impl Sink<Message> for StalledPeer {
        type Error = Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn start_send(self: Pin<&mut Self>, _: Message) -> Result<(), Infallible> {
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Pending
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Send until the registry gives up on `user`.
    async fn fill_until_evicted(registry: &ConnectionRegistry, user: UserId) {
        for _ in 0..8 {
            if !registry.send_to_user(user, Arc::from("{}")).await {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("connection was never evicted");
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_stops_writer_blocked_on_stalled_peer() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (handle, outbound) = ConnectionHandle::new(1);
        registry.register(user, handle).await;
        let writer = tokio::spawn(write_frames(StalledPeer, outbound));

        fill_until_evicted(&registry, user).await;

        tokio::time::timeout(CLOSE_TIMEOUT * 2, writer)
            .await
            .expect("writer still running after eviction")
            .unwrap();
        assert!(!registry.is_connected(user).await);
        assert_eq!(registry.evictions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_stops_writer_blocked_on_stalled_peer() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (first, outbound) = ConnectionHandle::new(4);
        registry.register(user, first).await;
        let writer = tokio::spawn(write_frames(StalledPeer, outbound));
        assert!(registry.send_to_user(user, Arc::from("{}")).await);

        let (second, _second_outbound) = ConnectionHandle::new(4);
        registry.register(user, second).await;

        tokio::time::timeout(CLOSE_TIMEOUT * 2, writer)
            .await
            .expect("writer still running after replacement")
            .unwrap();
        assert!(registry.is_connected(user).await);
        assert_eq!(registry.evictions(), 0);
    }
}

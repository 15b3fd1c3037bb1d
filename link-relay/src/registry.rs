//! Live connection registry.
//!
//! A single task owns the `UserId -> ConnectionHandle` map; everything else
//! talks to it through a bounded control channel. Each connection has its
//! own bounded outbound buffer drained by that connection's writer task.
//! Sends use `try_send`, so a slow reader never stalls the registry: when a
//! buffer is full the connection is evicted instead. Eviction and
//! replacement fire the connection's close signal, which stops its writer
//! even while it is blocked on the socket.

use link_types::UserId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Registry side of one connection: its outbound buffer and close signal.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Arc<str>>,
    close: oneshot::Sender<()>,
}

impl ConnectionHandle {
    /// Create a handle with an outbound buffer of `capacity` frames.
    pub fn new(capacity: usize) -> (Self, Outbound) {
        let (outbound, frames) = mpsc::channel(capacity.max(1));
        let (close, closed) = oneshot::channel();
        (
            Self {
                id: ConnectionId::next(),
                outbound,
                close,
            },
            Outbound {
                frames,
                closed,
                is_closed: false,
            },
        )
    }

    /// This connection's id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Tell the connection's writer to stop now, discarding queued frames.
    fn close(self) {
        let _ = self.close.send(());
    }
}

/// Connection side of a [`ConnectionHandle`], owned by the socket writer.
#[derive(Debug)]
pub struct Outbound {
    frames: mpsc::Receiver<Arc<str>>,
    closed: oneshot::Receiver<()>,
    is_closed: bool,
}

impl Outbound {
    /// Next queued frame.
    ///
    /// Returns `None` once the registry has closed or dropped the
    /// connection. A close takes priority over frames still queued.
    pub async fn next(&mut self) -> Option<Arc<str>> {
        if self.is_closed {
            return None;
        }
        tokio::select! {
            biased;
            _ = &mut self.closed => {
                self.is_closed = true;
                None
            }
            frame = self.frames.recv() => frame,
        }
    }

    /// Resolves when the registry evicts, replaces or drops the connection.
    pub async fn closed(&mut self) {
        if !self.is_closed {
            let _ = (&mut self.closed).await;
            self.is_closed = true;
        }
    }
}

enum Command {
    Register {
        user: UserId,
        handle: ConnectionHandle,
    },
    Unregister {
        user: UserId,
        connection: ConnectionId,
    },
    Send {
        user: UserId,
        payload: Arc<str>,
        reply: oneshot::Sender<bool>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    IsConnected {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
}

/// Cloneable handle to the registry task.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    control: mpsc::Sender<Command>,
    evictions: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    /// Start the registry task.
    ///
    /// The task exits once every `ConnectionRegistry` clone is dropped.
    pub fn spawn(control_buffer: usize) -> (Self, JoinHandle<()>) {
        let (control, rx) = mpsc::channel(control_buffer.max(1));
        let evictions = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run(rx, evictions.clone()));
        (Self { control, evictions }, task)
    }

    /// Register `handle` as the live connection of `user`.
    ///
    /// Any previous connection of that user is closed.
    pub async fn register(&self, user: UserId, handle: ConnectionHandle) {
        self.dispatch(Command::Register { user, handle }).await;
    }

    /// Remove `user`'s entry if it is still `connection`.
    pub async fn unregister(&self, user: UserId, connection: ConnectionId) {
        self.dispatch(Command::Unregister { user, connection }).await;
    }

    /// Best-effort delivery of one frame to `user`.
    ///
    /// Returns `false` if the user has no live connection or the connection
    /// was evicted because its buffer is full.
    pub async fn send_to_user(&self, user: UserId, payload: Arc<str>) -> bool {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Send {
            user,
            payload,
            reply,
        })
        .await;
        rx.await.unwrap_or(false)
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Count { reply }).await;
        rx.await.unwrap_or(0)
    }

    /// Whether `user` has a live connection.
    pub async fn is_connected(&self, user: UserId) -> bool {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::IsConnected { user, reply }).await;
        rx.await.unwrap_or(false)
    }

    /// Connections evicted for a full outbound buffer since start.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    async fn dispatch(&self, command: Command) {
        if self.control.send(command).await.is_err() {
            tracing::error!("Connection registry task has stopped");
        }
    }
}

async fn run(mut control: mpsc::Receiver<Command>, evictions: Arc<AtomicU64>) {
    let mut connections: HashMap<UserId, ConnectionHandle> = HashMap::new();

    while let Some(command) = control.recv().await {
        match command {
            Command::Register { user, handle } => {
                let id = handle.id;
                if let Some(previous) = connections.insert(user, handle) {
                    tracing::info!(user = %user, old = %previous.id, new = %id, "Replaced live connection");
                    previous.close();
                } else {
                    tracing::debug!(user = %user, connection = %id, "Registered live connection");
                }
            }
            Command::Unregister { user, connection } => {
                if connections.get(&user).is_some_and(|h| h.id == connection) {
                    connections.remove(&user);
                    tracing::debug!(user = %user, connection = %connection, "Unregistered live connection");
                }
            }
            Command::Send {
                user,
                payload,
                reply,
            } => {
                let delivered = match connections.get(&user) {
                    None => false,
                    Some(handle) => match handle.outbound.try_send(payload) {
                        Ok(()) => true,
                        Err(TrySendError::Full(_)) => {
                            if let Some(stalled) = connections.remove(&user) {
                                stalled.close();
                            }
                            evictions.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(user = %user, "Evicted slow live connection");
                            false
                        }
                        Err(TrySendError::Closed(_)) => {
                            connections.remove(&user);
                            tracing::debug!(user = %user, "Dropped closed live connection");
                            false
                        }
                    },
                };
                let _ = reply.send(delivered);
            }
            Command::Count { reply } => {
                let _ = reply.send(connections.len());
            }
            Command::IsConnected { user, reply } => {
                let _ = reply.send(connections.contains_key(&user));
            }
        }
    }

    tracing::debug!("Connection registry task finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Arc<str> {
        Arc::from(text)
    }

    #[tokio::test]
    async fn send_without_connection_returns_false() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        assert!(!registry.send_to_user(UserId::new(), frame("x")).await);
    }

    #[tokio::test]
    async fn frames_reach_only_their_user() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let (alice, bob) = (UserId::new(), UserId::new());
        let (alice_handle, mut alice_rx) = ConnectionHandle::new(8);
        let (bob_handle, mut bob_rx) = ConnectionHandle::new(8);
        registry.register(alice, alice_handle).await;
        registry.register(bob, bob_handle).await;

        assert!(registry.send_to_user(alice, frame("for alice")).await);

        assert_eq!(&*alice_rx.next().await.unwrap(), "for alice");
        assert!(bob_rx.frames.try_recv().is_err());
        assert_eq!(registry.connection_count().await, 2);
    }

    #[tokio::test]
    async fn full_buffer_evicts_connection() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (handle, mut rx) = ConnectionHandle::new(2);
        registry.register(user, handle).await;

        assert!(registry.send_to_user(user, frame("1")).await);
        assert!(registry.send_to_user(user, frame("2")).await);
        assert!(!registry.send_to_user(user, frame("3")).await);

        assert!(!registry.is_connected(user).await);
        assert_eq!(registry.evictions(), 1);

        // The writer is told to stop before the queued frames.
        assert!(rx.next().await.is_none());
        assert!(rx.next().await.is_none());
        rx.closed().await;
    }

    #[tokio::test]
    async fn eviction_does_not_affect_other_users() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let (slow, fast) = (UserId::new(), UserId::new());
        let (slow_handle, _slow_rx) = ConnectionHandle::new(1);
        let (fast_handle, mut fast_rx) = ConnectionHandle::new(8);
        registry.register(slow, slow_handle).await;
        registry.register(fast, fast_handle).await;

        assert!(registry.send_to_user(slow, frame("a")).await);
        assert!(!registry.send_to_user(slow, frame("b")).await);

        assert!(registry.send_to_user(fast, frame("c")).await);
        assert_eq!(&*fast_rx.next().await.unwrap(), "c");
        assert!(registry.is_connected(fast).await);
    }

    #[tokio::test]
    async fn register_replaces_and_closes_previous() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (first, mut first_rx) = ConnectionHandle::new(4);
        let (second, mut second_rx) = ConnectionHandle::new(4);

        registry.register(user, first).await;
        assert!(registry.send_to_user(user, frame("stale")).await);
        registry.register(user, second).await;

        assert!(first_rx.next().await.is_none());
        assert!(registry.send_to_user(user, frame("latest")).await);
        assert_eq!(&*second_rx.next().await.unwrap(), "latest");
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn stale_unregister_keeps_newer_connection() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (first, _first_rx) = ConnectionHandle::new(4);
        let first_id = first.id();
        let (second, _second_rx) = ConnectionHandle::new(4);
        let second_id = second.id();

        registry.register(user, first).await;
        registry.register(user, second).await;
        registry.unregister(user, first_id).await;
        assert!(registry.is_connected(user).await);

        registry.unregister(user, second_id).await;
        registry.unregister(user, second_id).await;
        assert!(!registry.is_connected(user).await);
    }

    #[tokio::test]
    async fn closed_receiver_is_removed() {
        let (registry, _task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (handle, outbound) = ConnectionHandle::new(4);
        registry.register(user, handle).await;
        drop(outbound);

        assert!(!registry.send_to_user(user, frame("gone")).await);
        assert!(!registry.is_connected(user).await);
        assert_eq!(registry.evictions(), 0);
    }

    #[tokio::test]
    async fn closed_resolves_when_registry_stops() {
        let (registry, task) = ConnectionRegistry::spawn(16);
        let user = UserId::new();
        let (handle, mut outbound) = ConnectionHandle::new(4);
        registry.register(user, handle).await;

        drop(registry);
        task.await.unwrap();

        outbound.closed().await;
        assert!(outbound.next().await.is_none());
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _) = ConnectionHandle::new(1);
        let (b, _) = ConnectionHandle::new(1);
        assert_ne!(a.id(), b.id());
    }
}

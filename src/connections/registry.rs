//! Connection registry.
//!
//! The only state shared between connection tasks, the broadcast scheduler and
//! the event bridge. Membership is guarded by a sharded `DashMap`; each
//! connection's subscription set sits behind its own lock and is only written
//! on behalf of that connection's inbound messages.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::SendError;
use crate::websocket::messages::ServerMessage;

/// Opaque connection identifier, never reused while the process runs.
pub type ConnectionId = Uuid;

/// Pre-serialized frame handed to a connection's writer task.
pub type OutboundFrame = Arc<str>;

/// One live client connection.
pub struct ClientConnection {
    pub id: ConnectionId,
    /// Sending half of the bounded outbound buffer. The writer task owns the receiver.
    tx: mpsc::Sender<OutboundFrame>,
    subscriptions: RwLock<HashSet<String>>,
    connected_at: DateTime<Utc>,
    /// Unix millis of the last inbound frame.
    last_activity: AtomicI64,
    /// Fired when the connection leaves the registry; the socket task watches it.
    closed: CancellationToken,
}

impl ClientConnection {
    /// Create a connection with a fresh id and no subscriptions.
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self::with_close_signal(tx, CancellationToken::new())
    }

    /// Like `new`, but `closed` is cancelled when the connection is removed.
    /// Pass a child of the server's shutdown token so either event ends the socket task.
    pub fn with_close_signal(tx: mpsc::Sender<OutboundFrame>, closed: CancellationToken) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tx,
            subscriptions: RwLock::new(HashSet::new()),
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            closed,
        }
    }

    /// Serialize and queue a message. Never waits.
    pub fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let frame = msg.to_frame()?;
        self.send_frame(frame)
    }

    /// Queue an already serialized frame. Never waits: a full buffer is a failure.
    pub fn send_frame(&self, frame: OutboundFrame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    /// Release the transport: the socket task stops reading and closes.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Time since the last inbound frame, as seen at `now_ms`.
    pub fn idle_for(&self, now_ms: i64) -> Duration {
        let idle = now_ms.saturating_sub(self.last_activity()).max(0);
        Duration::from_millis(idle as u64)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.read().contains(topic)
    }

    /// Sorted copy of the current subscription set.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscriptions.read().iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Set-insert each topic. Returns how many were new.
    pub(crate) fn add_topics<I>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = self.subscriptions.write();
        topics.into_iter().filter(|t| set.insert(t.clone())).count()
    }

    /// Set-remove each topic. Returns how many were held.
    pub(crate) fn remove_topics<I>(&self, topics: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut set = self.subscriptions.write();
        topics.into_iter().filter(|t| set.remove(t)).count()
    }
}

/// Outcome of a fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Connections the frame was queued for
    pub delivered: usize,
    /// Connections removed because their send failed
    pub dropped: Vec<ConnectionId>,
}

/// A connection silent for longer than the idle threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleConnection {
    pub id: ConnectionId,
    pub idle: Duration,
    pub connected_at: DateTime<Utc>,
}

/// Process-wide registry of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Insert a connection. From here on it is `OPEN`.
    pub fn register(&self, connection: ClientConnection) -> Arc<ClientConnection> {
        let connection = Arc::new(connection);
        self.connections
            .insert(connection.id, Arc::clone(&connection));
        debug!("Connection {} registered ({} live)", connection.id, self.len());
        connection
    }

    /// Remove a connection. Idempotent: close and error can race.
    ///
    /// Dropping the entry drops the registry's sender; once no snapshot holds the
    /// connection any more the writer task sees a closed channel and shuts the socket.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some((_, connection)) => {
                connection.close();
                debug!("Connection {} removed ({} live)", id, self.len());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Total topics held across all connections.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().subscription_count())
            .sum()
    }

    /// Point-in-time copy of every live connection.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Point-in-time copy of connections subscribed to `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().is_subscribed(topic))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Queue `frame` for every connection subscribed to `topic`.
    pub fn publish(&self, topic: &str, frame: OutboundFrame) -> Delivery {
        self.deliver(self.subscribers(topic), frame)
    }

    /// Queue `frame` for every live connection, ignoring subscriptions.
    pub fn broadcast_all(&self, frame: OutboundFrame) -> Delivery {
        self.deliver(self.snapshot(), frame)
    }

    /// Send to each target independently; failures are removed after the loop so
    /// no shard lock is held while removing.
    fn deliver(&self, targets: Vec<Arc<ClientConnection>>, frame: OutboundFrame) -> Delivery {
        let mut delivery = Delivery::default();

        for connection in targets {
            match connection.send_frame(Arc::clone(&frame)) {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    warn!("Dropping connection {}: {}", connection.id, e);
                    delivery.dropped.push(connection.id);
                }
            }
        }

        for id in &delivery.dropped {
            self.remove(id);
        }

        delivery
    }

    /// Connections whose last inbound frame is older than `threshold`.
    pub fn idle_connections(&self, threshold: Duration) -> Vec<IdleConnection> {
        let now = Utc::now().timestamp_millis();
        self.connections
            .iter()
            .filter_map(|entry| {
                let connection = entry.value();
                let idle = connection.idle_for(now);
                (idle > threshold).then(|| IdleConnection {
                    id: connection.id,
                    idle,
                    connected_at: connection.connected_at(),
                })
            })
            .collect()
    }

    /// Remove every connection (server stop). Returns how many were live.
    pub fn drain(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        let drained = ids.iter().filter(|id| self.remove(id)).count();
        info!("Connection registry drained ({} connections closed)", drained);
        drained
    }
}

use chrono::Utc;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{ClientConnection, ConnectionId, ConnectionRegistry, OutboundFrame};
use super::subscription_router::SubscriptionRouter;
use crate::errors::EngineError;
use crate::websocket::messages::{decode, ClientMessage, ServerMessage};

/// Text sent in the welcome acknowledgement
pub const WELCOME_MESSAGE: &str = "Connected to market data stream";

/// Per-connection state machine: `Connecting -> Open -> Closed`, never back.
///
/// `Connecting` only exists inside `on_accept`, so from the outside a known id is
/// either in the registry (`Open`) or not (`Closed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Handles accept, per-message dispatch and close/error cleanup
#[derive(Clone)]
pub struct ConnectionManager {
    registry: Arc<ConnectionRegistry>,
    router: SubscriptionRouter,
}

impl ConnectionManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        let router = SubscriptionRouter::new(Arc::clone(&registry));
        Self { registry, router }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Greet a new transport with its id, then register it.
    ///
    /// The welcome is queued before the connection becomes visible to
    /// broadcasts, so it is always the first frame. `closed` is cancelled once
    /// the connection leaves the registry.
    ///
    /// Always returns an id. If the welcome cannot be queued the connection is
    /// never registered and `closed` is already cancelled.
    pub fn on_accept(
        &self,
        tx: mpsc::Sender<OutboundFrame>,
        closed: CancellationToken,
    ) -> ConnectionId {
        let connection = ClientConnection::with_close_signal(tx, closed);
        let id = connection.id;

        let welcome = ServerMessage::Welcome {
            client_id: id.to_string(),
            message: WELCOME_MESSAGE.to_string(),
        };
        if let Err(e) = connection.send(&welcome) {
            warn!("Client {} dropped before welcome: {}", id, e);
            connection.close();
            return id;
        }

        self.registry.register(connection);
        info!("Client {} connected ({} live)", id, self.registry.len());
        id
    }

    /// Decode and dispatch one inbound frame.
    ///
    /// Malformed input only ever produces an `error` reply to the sender.
    pub fn on_message(&self, id: &ConnectionId, raw: &[u8]) {
        let Some(connection) = self.registry.get(id) else {
            debug!("Message from {} ignored: connection closed", id);
            return;
        };
        connection.touch();

        let msg = match decode(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Protocol error from {}: {}", id, e);
                self.reply(&connection, &ServerMessage::error(e.to_string()));
                return;
            }
        };

        match msg {
            ClientMessage::Subscribe {
                topic_prefix,
                pairs,
            } => {
                self.router.subscribe(id, &topic_prefix, &pairs);
            }
            ClientMessage::Unsubscribe {
                topic_prefix,
                pairs,
            } => {
                self.router.unsubscribe(id, &topic_prefix, &pairs);
            }
            ClientMessage::Ping => {
                let pong = ServerMessage::Pong {
                    timestamp: Utc::now().timestamp_millis(),
                };
                self.reply(&connection, &pong);
            }
            ClientMessage::Unknown => {
                debug!("Unknown action from {}", id);
                self.reply(&connection, &ServerMessage::error("Unknown action"));
            }
        }
    }

    /// Refresh activity for frames that carry no message (transport-level ping/pong).
    pub fn on_activity(&self, id: &ConnectionId) {
        if let Some(connection) = self.registry.get(id) {
            connection.touch();
        }
    }

    /// Peer closed. Idempotent.
    pub fn on_close(&self, id: &ConnectionId) {
        if self.registry.remove(id) {
            info!("Client {} disconnected ({} live)", id, self.registry.len());
        }
    }

    /// Transport failed. Same cleanup as close; idempotent.
    pub fn on_transport_error(&self, id: &ConnectionId, err: &dyn Display) {
        if self.registry.remove(id) {
            warn!("Client {} dropped after transport error: {}", id, err);
        }
    }

    pub fn state(&self, id: &ConnectionId) -> ConnectionState {
        if self.registry.contains(id) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Periodically log connections that have been silent longer than `threshold`.
    ///
    /// Diagnostics only, nothing is evicted. A zero threshold is rejected.
    pub fn spawn_idle_monitor(
        &self,
        threshold: Duration,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, EngineError> {
        if threshold.is_zero() {
            return Err(EngineError::InvalidPeriod("idle threshold"));
        }

        let registry = Arc::clone(&self.registry);
        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(threshold);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for idle in registry.idle_connections(threshold) {
                            warn!(
                                "Client {} idle for {}s (connected at {})",
                                idle.id,
                                idle.idle.as_secs(),
                                idle.connected_at.to_rfc3339()
                            );
                        }
                    }
                }
            }
            debug!("Idle monitor stopped");
        }))
    }

    fn reply(&self, connection: &ClientConnection, msg: &ServerMessage) {
        if let Err(e) = connection.send(msg) {
            if e.is_transport_fault() {
                self.on_transport_error(&connection.id, &e);
            } else {
                warn!("Failed to encode reply for {}: {}", connection.id, e);
            }
        }
    }
}

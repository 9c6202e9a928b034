use std::sync::Arc;
use tracing::{debug, warn};

use super::registry::{ClientConnection, ConnectionId, ConnectionRegistry};
use crate::models::topics;
use crate::websocket::messages::ServerMessage;

/// Translates subscribe/unsubscribe requests into registry mutations.
///
/// Subscriptions are stored per connection rather than per topic: subscribe
/// volume is far below broadcast volume, so the hot path stays a single set
/// lookup per (connection, topic) pair.
#[derive(Clone)]
pub struct SubscriptionRouter {
    registry: Arc<ConnectionRegistry>,
}

impl SubscriptionRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Add `<topic_prefix>:<instrument>` for each instrument and confirm to the requester.
    ///
    /// Any prefix is stored verbatim; only `market_data` is ever published by the
    /// default quote source. Returns `false` if the connection is gone.
    pub fn subscribe(&self, id: &ConnectionId, topic_prefix: &str, instruments: &[String]) -> bool {
        let Some(connection) = self.registry.get(id) else {
            debug!("Subscribe from {} dropped: connection already closed", id);
            return false;
        };

        let added = connection.add_topics(
            instruments
                .iter()
                .map(|instrument| topics::topic(topic_prefix, instrument)),
        );
        debug!(
            "Connection {} subscribed to {} {:?} ({} new)",
            id, topic_prefix, instruments, added
        );

        let confirmation = ServerMessage::SubscriptionSuccess {
            subscribed: instruments.to_vec(),
            message: format!(
                "Subscribed to {} for {}",
                topic_prefix.replace('_', " "),
                instruments.join(", ")
            ),
        };
        self.reply(&connection, &confirmation)
    }

    /// Remove `<topic_prefix>:<instrument>` for each instrument and confirm to the requester.
    pub fn unsubscribe(&self, id: &ConnectionId, topic_prefix: &str, instruments: &[String]) -> bool {
        let Some(connection) = self.registry.get(id) else {
            debug!("Unsubscribe from {} dropped: connection already closed", id);
            return false;
        };

        let removed = connection.remove_topics(
            instruments
                .iter()
                .map(|instrument| topics::topic(topic_prefix, instrument)),
        );
        debug!(
            "Connection {} unsubscribed from {} {:?} ({} held)",
            id, topic_prefix, instruments, removed
        );

        let confirmation = ServerMessage::UnsubscriptionSuccess {
            unsubscribed: instruments.to_vec(),
        };
        self.reply(&connection, &confirmation)
    }

    fn reply(&self, connection: &ClientConnection, msg: &ServerMessage) -> bool {
        match connection.send(msg) {
            Ok(()) => true,
            Err(e) if e.is_transport_fault() => {
                warn!("Failed to confirm subscription to {}: {}", connection.id, e);
                self.registry.remove(&connection.id);
                false
            }
            Err(e) => {
                warn!("Failed to encode confirmation for {}: {}", connection.id, e);
                false
            }
        }
    }
}

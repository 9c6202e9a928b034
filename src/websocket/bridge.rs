use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::messages::ServerMessage;
use crate::connections::{ConnectionRegistry, Delivery};
use crate::errors::EngineError;

/// Entry point for other components to push messages to every live client.
///
/// Subscriptions are ignored. Cloning is cheap, each clone shares the registry.
#[derive(Clone)]
pub struct EventBridge {
    registry: Arc<ConnectionRegistry>,
}

impl EventBridge {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Serialize `msg` once and queue it for every live connection.
    ///
    /// A failing connection is removed and counted in `Delivery::dropped`; the
    /// rest still receive the message.
    pub fn broadcast_to_all(&self, msg: &ServerMessage) -> Result<Delivery, EngineError> {
        let frame = msg.to_frame()?;
        Ok(self.registry.broadcast_all(frame))
    }

    /// Wrap `data` in a `trade_update` and broadcast it.
    pub fn notify_all(&self, data: Value) -> Result<Delivery, EngineError> {
        let delivery = self.broadcast_to_all(&ServerMessage::TradeUpdate { data })?;
        info!(
            "🔔 Trade update sent to {} clients ({} dropped)",
            delivery.delivered,
            delivery.dropped.len()
        );
        Ok(delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{ClientConnection, OutboundFrame};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn connect(registry: &ConnectionRegistry, topics: &[&str]) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(8);
        let conn = registry.register(ClientConnection::new(tx));
        conn.add_topics(topics.iter().map(|t| t.to_string()));
        rx
    }

    #[test]
    fn test_notify_reaches_every_client_regardless_of_subscriptions() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut rx_a = connect(&registry, &["market_data:EUR/USD"]);
        let mut rx_b = connect(&registry, &[]);
        let bridge = EventBridge::new(registry.clone());

        let delivery = bridge
            .notify_all(json!({"id": "t1", "price": 1.0857}))
            .unwrap();

        assert_eq!(delivery.delivered, 2);
        assert!(delivery.dropped.is_empty());
        for rx in [&mut rx_a, &mut rx_b] {
            let value: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(
                value,
                json!({"type": "trade_update", "data": {"id": "t1", "price": 1.0857}})
            );
        }
    }

    #[test]
    fn test_dead_client_is_dropped_others_delivered() {
        let registry = Arc::new(ConnectionRegistry::new());
        let rx_a = connect(&registry, &[]);
        let mut rx_b = connect(&registry, &[]);
        let bridge = EventBridge::new(registry.clone());
        drop(rx_a);

        let delivery = bridge.notify_all(json!({"id": "t2"})).unwrap();

        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.dropped.len(), 1);
        assert_eq!(registry.len(), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn test_broadcast_with_no_clients() {
        let bridge = EventBridge::new(Arc::new(ConnectionRegistry::new()));

        let delivery = bridge
            .broadcast_to_all(&ServerMessage::error("maintenance"))
            .unwrap();
        assert_eq!(delivery, Delivery::default());
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::models::Quote;

/// Message sent from client to server, tagged by `action`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        /// Topic prefix, e.g. "market_data"
        #[serde(rename = "type")]
        topic_prefix: String,
        pairs: Vec<String>,
    },
    Unsubscribe {
        #[serde(rename = "type")]
        topic_prefix: String,
        pairs: Vec<String>,
    },
    Ping,
    /// Any action we do not recognize
    #[serde(other)]
    Unknown,
}

/// Decode one inbound frame.
///
/// - not JSON -> `ProtocolError::InvalidJson`
/// - JSON without a string `action` -> `ClientMessage::Unknown`
/// - known action with bad fields -> `ProtocolError::InvalidPayload`
pub fn decode(raw: &[u8]) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_slice(raw).map_err(ProtocolError::InvalidJson)?;

    let action = match value.get("action").and_then(Value::as_str) {
        Some(action) => action.to_string(),
        None => return Ok(ClientMessage::Unknown),
    };

    serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
        action,
        reason: e.to_string(),
    })
}

/// Message sent from server to client, tagged by `type`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once right after accept
    Welcome {
        #[serde(rename = "clientId")]
        client_id: String,
        message: String,
    },
    /// Quote for a subscribed topic
    MarketData { data: Quote },
    /// Cross-cutting notification pushed through the event bridge
    TradeUpdate { data: Value },
    SubscriptionSuccess {
        subscribed: Vec<String>,
        message: String,
    },
    UnsubscriptionSuccess { unsubscribed: Vec<String> },
    /// Reply to `ping`, unix millis
    Pong { timestamp: i64 },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Serialize once into a frame that can be shared across recipients
    pub fn to_frame(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

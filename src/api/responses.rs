use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::market_data::SchedulerStats;

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    /// Open WebSocket connections
    pub connections: usize,
    /// Topics held across all connections
    pub subscriptions: usize,
    pub scheduler: SchedulerStats,
}

/// Where and how to consume the quote stream
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    #[schema(example = "ws://localhost:8080")]
    pub ws_url: String,
    pub supported_pairs: Vec<String>,
    #[schema(example = "1s")]
    pub update_interval: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StreamInfoResponse {
    pub success: bool,
    pub data: StreamInfo,
}

/// Trade event to push to every connected client
#[derive(Debug, Deserialize, ToSchema)]
pub struct TradeEventRequest {
    /// Forwarded verbatim as the `data` of a `trade_update` message
    #[schema(value_type = Object)]
    pub data: Value,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TradeEventResponse {
    pub success: bool,
    /// Connections the update was queued for
    pub delivered: usize,
    /// Connections removed because the send failed
    pub dropped: usize,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

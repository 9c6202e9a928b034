use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::connections::ConnectionRegistry;
use crate::errors::EngineError;
use crate::market_data::BroadcastScheduler;
use crate::websocket::EventBridge;

use super::responses::*;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub scheduler: Arc<BroadcastScheduler>,
    pub bridge: EventBridge,
    pub config: Arc<ServerConfig>,
}

/// Errors returned by the REST handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    /// Returns true if the caller sent something we cannot act on
    pub fn is_client_fault(&self) -> bool {
        matches!(self, ApiError::BadRequest(_))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = if self.is_client_fault() {
            (StatusCode::BAD_REQUEST, "bad_request")
        } else {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

/// "1s" for whole seconds, "<n>ms" otherwise
pub(crate) fn format_interval(interval: Duration) -> String {
    let ms = interval.as_millis();
    if ms > 0 && ms % 1000 == 0 {
        format!("{}s", ms / 1000)
    } else {
        format!("{}ms", ms)
    }
}

/// Health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Engine is healthy", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.registry.len(),
        subscriptions: state.registry.subscription_count(),
        scheduler: state.scheduler.stats(),
    })
}

/// Describe the WebSocket quote stream
#[utoipa::path(
    get,
    path = "/api/v1/stream-info",
    responses(
        (status = 200, description = "Stream connection details", body = StreamInfoResponse)
    ),
    tag = "Market Data"
)]
pub async fn get_stream_info(State(state): State<AppState>) -> Json<StreamInfoResponse> {
    Json(StreamInfoResponse {
        success: true,
        data: StreamInfo {
            ws_url: state.config.public_ws_url(),
            supported_pairs: state.config.supported_pairs(),
            update_interval: format_interval(state.config.tick_interval()),
        },
    })
}

/// Push a trade update to every connected client
#[utoipa::path(
    post,
    path = "/api/v1/events/trade",
    request_body = TradeEventRequest,
    responses(
        (status = 200, description = "Trade update broadcast", body = TradeEventResponse),
        (status = 400, description = "Malformed request body", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse),
    ),
    tag = "Events"
)]
pub async fn post_trade_event(
    State(state): State<AppState>,
    payload: Result<Json<TradeEventRequest>, JsonRejection>,
) -> Result<Json<TradeEventResponse>, ApiError> {
    let Json(request) = payload?;
    let delivery = state.bridge.notify_all(request.data)?;

    Ok(Json(TradeEventResponse {
        success: true,
        delivered: delivery.delivered,
        dropped: delivery.dropped.len(),
    }))
}

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::websocket::{websocket_handler, WsState};

use super::handlers::*;
use super::openapi::ApiDoc;

/// Create the API router with Swagger UI and WebSocket support
pub fn create_router(state: AppState, ws_state: Arc<WsState>) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // WebSocket endpoints; clients may connect at the root or at /ws
        .route("/", get(websocket_handler))
        .route("/ws", get(websocket_handler))
        .with_state(ws_state)
        .route("/api/v1/health", get(get_health))
        .route("/api/v1/stream-info", get(get_stream_info))
        .route("/api/v1/events/trade", post(post_trade_event))
        .with_state(state)
}

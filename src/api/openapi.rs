use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::market_data::SchedulerStats;

/// OpenAPI specification for the REST side of the engine
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Market Data Engine API",
        version = "1.0.0",
        description = "Real-time FX quote distribution over WebSocket. Connect to /ws, send \
                       {\"action\":\"subscribe\",\"type\":\"market_data\",\"pairs\":[\"EUR/USD\"]} \
                       and receive market_data messages every tick.",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::get_health,
        handlers::get_stream_info,
        handlers::post_trade_event,
    ),
    components(
        schemas(
            HealthResponse,
            SchedulerStats,
            StreamInfo,
            StreamInfoResponse,
            TradeEventRequest,
            TradeEventResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Market Data", description = "Quote stream discovery"),
        (name = "Events", description = "Notifications pushed to every connected client"),
    )
)]
pub struct ApiDoc;

use market_data_engine::{EngineError, MarketDataServer, ServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_data_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Invalid configuration: {}", e);
            return Err(e.into());
        }
    };

    let addr = config.bind_addr();
    let pairs = config.supported_pairs().join(", ");
    let interval = config.tick_interval();

    let server = Arc::new(MarketDataServer::new(config)?);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🚀 Market data engine running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/api/v1/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws", addr);
    tracing::info!("💱 Streaming {} every {:?}", pairs, interval);
    tracing::info!("");
    tracing::info!("📡 WebSocket Subscription Example:");
    tracing::info!(r#"   {{"action":"subscribe","type":"market_data","pairs":["EUR/USD","GBP/USD"]}}"#);
    tracing::info!("");

    tokio::spawn(cancel_on_signal(server.shutdown_token()));

    server.serve(listener).await
}

/// Cancel `token` on ctrl-c or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("🛑 Shutdown signal received");
    token.cancel();
}

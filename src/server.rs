use axum::Router;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::config::ServerConfig;
use crate::connections::{ConnectionManager, ConnectionRegistry};
use crate::errors::EngineError;
use crate::market_data::{BroadcastScheduler, QuoteSource, SimulatedQuoteSource};
use crate::websocket::{EventBridge, WsState};

/// Owns every engine component and drives start, serve and shutdown
pub struct MarketDataServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    manager: ConnectionManager,
    scheduler: Arc<BroadcastScheduler>,
    bridge: EventBridge,
    shutdown: CancellationToken,
    idle_monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MarketDataServer {
    /// Build a server quoting the configured instruments with the simulator
    pub fn new(config: ServerConfig) -> Result<Self, EngineError> {
        let source = Arc::new(SimulatedQuoteSource::new(config.instruments.clone()));
        Self::with_source(config, source)
    }

    /// Build a server around any quote source. The config is validated first.
    pub fn with_source(
        config: ServerConfig,
        source: Arc<dyn QuoteSource>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let scheduler = Arc::new(BroadcastScheduler::new(
            Arc::clone(&registry),
            source,
            config.tick_interval(),
        ));

        Ok(Self {
            manager: ConnectionManager::new(Arc::clone(&registry)),
            bridge: EventBridge::new(Arc::clone(&registry)),
            config: Arc::new(config),
            registry,
            scheduler,
            shutdown: CancellationToken::new(),
            idle_monitor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<BroadcastScheduler> {
        &self.scheduler
    }

    /// Handle for pushing notifications to every client
    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    /// Token cancelled by `shutdown()`. Cancelling it stops `serve()`.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// HTTP + WebSocket routes bound to this server's components
    pub fn router(&self) -> Router {
        let ws_state = Arc::new(WsState {
            manager: self.manager.clone(),
            outbound_buffer: self.config.outbound_buffer,
            shutdown: self.shutdown.clone(),
        });
        let state = AppState {
            registry: Arc::clone(&self.registry),
            scheduler: Arc::clone(&self.scheduler),
            bridge: self.bridge.clone(),
            config: Arc::clone(&self.config),
        };
        create_router(state, ws_state)
    }

    /// Start the broadcast scheduler and, if enabled, the idle monitor
    pub fn start(&self) -> Result<(), EngineError> {
        self.scheduler.start()?;

        if let Some(threshold) = self.config.idle_threshold() {
            let handle = self
                .manager
                .spawn_idle_monitor(threshold, self.shutdown.clone())?;
            *self.idle_monitor.lock() = Some(handle);
            info!("⏱️  Idle monitor started (threshold {:?})", threshold);
        }
        Ok(())
    }

    /// Start the engine and serve until the shutdown token is cancelled,
    /// then shut everything down.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), EngineError> {
        self.start()?;

        let addr = listener.local_addr()?;
        info!("🚀 Market data server listening on {}", addr);

        let token = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;

        self.shutdown();
        result.map_err(EngineError::from)
    }

    /// Stop ticking, close every connection and drain the registry. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.stop();
        if let Some(handle) = self.idle_monitor.lock().take() {
            handle.abort();
        }
        let closed = self.registry.drain();
        info!("🛑 Market data server stopped ({} connections closed)", closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_config() -> ServerConfig {
        ServerConfig {
            tick_interval_ms: 20,
            idle_warn_after_secs: 1,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_then_shutdown_stops_everything() {
        let server = MarketDataServer::new(test_config()).unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let closed = server.shutdown_token().child_token();
        let id = server.manager.on_accept(tx, closed.clone());
        rx.recv().await.unwrap();

        server.start().unwrap();
        assert!(server.scheduler().is_running());
        assert!(matches!(
            server.start(),
            Err(EngineError::SchedulerAlreadyRunning)
        ));

        server.shutdown();

        assert!(!server.scheduler().is_running());
        assert!(server.shutdown_token().is_cancelled());
        assert!(!server.registry().contains(&id));
        assert!(closed.is_cancelled());
        // Sender dropped with the registry entry
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(closed.is_none());

        // Second shutdown is a no-op
        server.shutdown();
    }

    #[tokio::test]
    async fn test_serve_returns_after_token_cancelled() {
        let server = Arc::new(MarketDataServer::new(test_config()).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(listener).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.scheduler().is_running());

        server.shutdown_token().cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!server.scheduler().is_running());
    }

    #[test]
    fn test_invalid_config_is_rejected_at_construction() {
        let config = ServerConfig {
            tick_interval_ms: 0,
            ..ServerConfig::default()
        };

        let result = MarketDataServer::new(config);
        assert!(matches!(result, Err(ref e) if e.is_config_error()));
    }
}

// Library Crate Root
// lib.rs

// pub mod xxx declares xxx module exists in the same crate
// lib.rs is the public API contract for your library crate when other crates using it
// main.rs (if you have it) also imports through lib.rs like an external crate
pub mod api;
pub mod config;
pub mod connections;
pub mod errors;
pub mod market_data;
pub mod models;
pub mod server;
pub mod websocket;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use config::{InstrumentConfig, ServerConfig};
pub use connections::{ConnectionManager, ConnectionRegistry};
pub use errors::{ConfigError, EngineError};
pub use market_data::{BroadcastScheduler, QuoteSource, SimulatedQuoteSource};
pub use models::{Direction, Quote};
pub use server::MarketDataServer;
pub use websocket::EventBridge;

pub mod bridge;
pub mod handler;
pub mod messages;

pub use bridge::EventBridge;
pub use handler::{websocket_handler, WsState};
pub use messages::{ClientMessage, ServerMessage};

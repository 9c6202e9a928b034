//! Error types for the market data engine
//!
//! This module centralizes the error taxonomy of the engine:
//!
//! - **Protocol errors**: a client sent something we cannot act on. Reported back to
//!   that client only, the connection stays open.
//! - **Send errors**: writing to a client's outbound buffer failed. The connection is
//!   removed from the registry.
//! - **Quote errors**: the quote source could not produce a quote for one instrument.
//!   Logged and skipped for that tick.
//! - **Config / engine errors**: startup-time failures surfaced from `main`.

use thiserror::Error;

/// Errors produced while decoding an inbound client frame.
///
/// The `Display` text is exactly what is sent to the client inside the
/// `error` message, so keep it human readable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload is not valid JSON
    #[error("Invalid JSON format")]
    InvalidJson(#[source] serde_json::Error),

    /// Action is known but its fields are missing or have the wrong shape
    #[error("Invalid {action} request: {reason}")]
    InvalidPayload { action: String, reason: String },
}

/// Errors that can occur when handing a frame to a client's transport
#[derive(Debug, Error)]
pub enum SendError {
    /// The writer side is gone (socket closed or connection already removed)
    #[error("connection closed")]
    Closed,

    /// Outbound buffer is full, the client is not keeping up
    #[error("outbound buffer full")]
    Full,

    /// Message could not be serialized
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SendError {
    /// Returns true if the failure means the transport should be released
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, SendError::Closed | SendError::Full)
    }
}

/// Errors raised by a quote source for a single instrument
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Invalid price for {pair}: {reason}")]
    InvalidPrice { pair: String, reason: String },
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top level engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `BroadcastScheduler::start` was called while a tick task is alive
    #[error("Broadcast scheduler is already running")]
    SchedulerAlreadyRunning,

    /// A timer was asked to run with a zero period
    #[error("Invalid {0}: period must be greater than zero")]
    InvalidPeriod(&'static str),
}

impl EngineError {
    /// Returns true if the error comes from operator input (config, env) rather than runtime I/O
    pub fn is_config_error(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display_is_client_facing() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(ProtocolError::InvalidJson(err).to_string(), "Invalid JSON format");

        let err = ProtocolError::InvalidPayload {
            action: "subscribe".to_string(),
            reason: "missing field `pairs`".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid subscribe request: missing field `pairs`");
    }

    #[test]
    fn test_error_categories() {
        assert!(SendError::Closed.is_transport_fault());
        assert!(SendError::Full.is_transport_fault());
        assert!(EngineError::from(ConfigError::Invalid("x".into())).is_config_error());
        assert!(!EngineError::SchedulerAlreadyRunning.is_config_error());
    }
}

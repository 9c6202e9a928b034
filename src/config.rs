use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

/// Environment variable naming an optional JSON config file
pub const CONFIG_FILE_ENV: &str = "MARKET_DATA_CONFIG";

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Listening port for WebSocket and HTTP traffic
    #[serde(default = "default_port")]
    pub port: u16,

    /// Broadcast tick period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capacity of each connection's outbound buffer (frames)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Idle diagnostics threshold in seconds (0 = disabled)
    #[serde(default = "default_idle_warn_after_secs")]
    pub idle_warn_after_secs: u64,

    /// Tracked instruments with their simulation parameters
    #[serde(default = "default_instruments")]
    pub instruments: Vec<InstrumentConfig>,
}

/// One tracked instrument and its simulation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Instrument name, e.g. "EUR/USD"
    pub pair: String,

    /// Price the simulation oscillates around
    pub base_price: Decimal,

    /// Ask minus bid
    #[serde(default = "default_spread")]
    pub spread: Decimal,

    /// Width of the uniform variation applied to the base price each tick
    #[serde(default = "default_variation")]
    pub variation: f64,
}

impl InstrumentConfig {
    pub fn new(pair: &str, base_price: Decimal) -> Self {
        Self {
            pair: pair.to_string(),
            base_price,
            spread: default_spread(),
            variation: default_variation(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tick_interval_ms: default_tick_interval_ms(),
            outbound_buffer: default_outbound_buffer(),
            idle_warn_after_secs: default_idle_warn_after_secs(),
            instruments: default_instruments(),
        }
    }
}

impl ServerConfig {
    /// Load configuration: defaults, then the optional JSON file, then env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply overrides from an environment lookup
    ///
    /// Takes the lookup as a closure so tests don't have to mutate the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("WS_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_env(&lookup, "WS_PORT")? {
            self.port = port;
        }
        if let Some(interval) = parse_env(&lookup, "BROADCAST_INTERVAL_MS")? {
            self.tick_interval_ms = interval;
        }
        if let Some(buffer) = parse_env(&lookup, "WS_OUTBOUND_BUFFER")? {
            self.outbound_buffer = buffer;
        }
        if let Some(idle) = parse_env(&lookup, "IDLE_WARN_SECS")? {
            self.idle_warn_after_secs = idle;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".to_string()));
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid("outbound_buffer must be > 0".to_string()));
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid("at least one instrument is required".to_string()));
        }

        let mut seen = HashSet::new();
        for instrument in &self.instruments {
            if !seen.insert(instrument.pair.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate instrument: {}",
                    instrument.pair
                )));
            }
            if instrument.base_price <= Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "base_price for {} must be positive",
                    instrument.pair
                )));
            }
            if instrument.spread < Decimal::ZERO {
                return Err(ConfigError::Invalid(format!(
                    "spread for {} must not be negative",
                    instrument.pair
                )));
            }
            if !instrument.variation.is_finite() || instrument.variation < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "variation for {} must be a non-negative number",
                    instrument.pair
                )));
            }
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// `None` when idle diagnostics are disabled
    pub fn idle_threshold(&self) -> Option<Duration> {
        (self.idle_warn_after_secs > 0).then(|| Duration::from_secs(self.idle_warn_after_secs))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL advertised to clients. Wildcard binds are advertised as localhost.
    pub fn public_ws_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" | "[::]" => "localhost",
            other => other,
        };
        format!("ws://{}:{}", host, self.port)
    }

    pub fn supported_pairs(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.pair.clone()).collect()
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

// Default value functions for serde
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_idle_warn_after_secs() -> u64 {
    60
}

fn default_spread() -> Decimal {
    dec!(0.0002) // 2 pips
}

fn default_variation() -> f64 {
    0.001 // +/- 0.05% around base
}

fn default_instruments() -> Vec<InstrumentConfig> {
    vec![
        InstrumentConfig::new("EUR/USD", dec!(1.0856)),
        InstrumentConfig::new("GBP/USD", dec!(1.2534)),
        InstrumentConfig::new("USD/JPY", dec!(149.32)),
        InstrumentConfig::new("USD/CHF", dec!(0.9145)),
        InstrumentConfig::new("AUD/USD", dec!(0.6542)),
    ]
}

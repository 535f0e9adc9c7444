//! # Orion Configuration
//!
//! Layered configuration for the transport, RPC server/client and logging.
//!
//! Sources are merged in order, later ones winning:
//! 1. Built-in defaults ([`OrionConfig::default`])
//! 2. An optional file, format chosen by extension (TOML, YAML, JSON)
//! 3. `ORION_`-prefixed environment variables, `__` separating nested keys
//!    (e.g. `ORION_TRANSPORT__BUFFER_CAPACITY=65536`)
//!
//! ```rust,no_run
//! use orion_core::config::OrionConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrionConfig::load(None)?;
//! println!("buffer capacity: {}", config.transport.buffer_capacity);
//! # Ok(())
//! # }
//! ```

use crate::error::{OrionError, OrionResult};
use crate::transport::DEFAULT_BUFFER_CAPACITY;
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default upper bound on a single RPC frame (4 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const ENV_PREFIX: &str = "ORION";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrionConfig {
    pub transport: TransportConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Bytes buffered per direction of each connection
    pub buffer_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_frame_size: usize,
    /// Requests dispatched concurrently per connection
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_requests: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub max_frame_size: usize,
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            request_timeout_ms: 30_000,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive such as `info` or `orion_core=debug`; environment-derived when unset
    pub level: Option<String>,
    pub json: bool,
}

impl OrionConfig {
    /// Load defaults, then `path` if given, then `ORION_*` environment overrides
    pub fn load(path: Option<&Path>) -> OrionResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> OrionResult<()> {
        if self.transport.buffer_capacity == 0 {
            return Err(OrionError::Configuration(
                "transport.buffer_capacity must be positive".to_string(),
            ));
        }
        if self.server.max_frame_size == 0 || self.client.max_frame_size == 0 {
            return Err(OrionError::Configuration(
                "max_frame_size must be positive".to_string(),
            ));
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(OrionError::Configuration(
                "server.max_concurrent_requests must be positive".to_string(),
            ));
        }
        if self.client.request_timeout_ms == 0 {
            return Err(OrionError::Configuration(
                "client.request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

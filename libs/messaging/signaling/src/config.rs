//! Configuration for signaling endpoints
//!
//! TOML-based configuration covering:
//! - Relay base URL and HTTP client timeouts
//! - Poll cycle interval
//! - Endpoint names to create at startup

use crate::{Result, SignalError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Top-level signaling configuration
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Endpoint names to spawn at startup
    pub endpoints: Vec<String>,

    /// Relay connection settings
    pub relay: RelayConfig,
}

/// Relay connection and poll settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the relay service
    pub url: String,

    /// Interval between poll cycles in milliseconds
    pub poll_interval_ms: u64,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Idle keep-alive for pooled connections in seconds
    pub pool_idle_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:8000".to_string(),
            poll_interval_ms: 1000,
            request_timeout_secs: 10,
            pool_idle_timeout_secs: 90,
        }
    }
}

impl RelayConfig {
    /// Config pointing at `url` with default timings
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }

    /// Parse the relay URL, checking it can carry path segments
    pub fn base_url(&self) -> Result<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| SignalError::invalid_config(format!("Invalid relay URL '{}': {}", self.url, e)))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SignalError::invalid_config(format!(
                    "Unsupported relay scheme '{}'. Supported: http, https",
                    other
                )))
            }
        }

        if url.cannot_be_a_base() {
            return Err(SignalError::invalid_config(format!(
                "Relay URL '{}' cannot be used as a base",
                self.url
            )));
        }

        Ok(url)
    }

    pub fn validate(&self) -> Result<()> {
        self.base_url()?;

        if self.poll_interval_ms == 0 {
            return Err(SignalError::invalid_config(
                "Poll interval must be greater than 0",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(SignalError::invalid_config(
                "Request timeout must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl SignalingConfig {
    /// Create from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| SignalError::invalid_config(format!("Failed to parse TOML: {}", e)))
    }

    /// Load and validate a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SignalError::invalid_config(format!("Failed to serialize to TOML: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;

        let mut seen = HashSet::new();
        for name in &self.endpoints {
            if name.trim().is_empty() {
                return Err(SignalError::invalid_config("Endpoint names cannot be empty"));
            }
            if !seen.insert(name.as_str()) {
                return Err(SignalError::invalid_config(format!(
                    "Endpoint '{}' is listed more than once",
                    name
                )));
            }
        }

        Ok(())
    }
}

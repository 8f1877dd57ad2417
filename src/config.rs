//! Client configuration
//!
//! ## Environment
//! ```bash
//! DOWNLOAD_STREAM_BASE_URL=http://127.0.0.1:8000
//! DOWNLOAD_STREAM_EVENTS_PATH=/api/events
//! DOWNLOAD_STREAM_COALESCE_MS=50
//! DOWNLOAD_STREAM_RECONNECT_BASE_MS=1000
//! DOWNLOAD_STREAM_RECONNECT_INCREMENT_MS=500
//! DOWNLOAD_STREAM_RECONNECT_CAP_MS=8000
//! DOWNLOAD_STREAM_MAX_ATTEMPTS=15
//! DOWNLOAD_STREAM_TOKEN=eyJhbGciOiJIUzI1NiIs...
//! ```

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::stream::ReconnectPolicy;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid number: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Invalid(String),
}

/// Settings for the event stream client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub base_url: String,
    pub events_path: String,
    pub coalesce_window_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_increment_ms: u64,
    pub reconnect_cap_ms: u64,
    pub max_reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            events_path: "/api/events".to_string(),
            coalesce_window_ms: 50,
            reconnect_base_ms: 1000,
            reconnect_increment_ms: 500,
            reconnect_cap_ms: 8000,
            max_reconnect_attempts: 15,
            auth_token: None,
        }
    }
}

impl StreamConfig {
    /// Config with defaults pointing at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read configuration from `DOWNLOAD_STREAM_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary lookup, defaulting missing keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("DOWNLOAD_STREAM_BASE_URL") {
            config.base_url = url;
        }
        if let Some(path) = lookup("DOWNLOAD_STREAM_EVENTS_PATH") {
            config.events_path = path;
        }
        read_number(&lookup, "DOWNLOAD_STREAM_COALESCE_MS", &mut config.coalesce_window_ms)?;
        read_number(&lookup, "DOWNLOAD_STREAM_RECONNECT_BASE_MS", &mut config.reconnect_base_ms)?;
        read_number(
            &lookup,
            "DOWNLOAD_STREAM_RECONNECT_INCREMENT_MS",
            &mut config.reconnect_increment_ms,
        )?;
        read_number(&lookup, "DOWNLOAD_STREAM_RECONNECT_CAP_MS", &mut config.reconnect_cap_ms)?;
        read_number(
            &lookup,
            "DOWNLOAD_STREAM_MAX_ATTEMPTS",
            &mut config.max_reconnect_attempts,
        )?;
        config.auth_token = lookup("DOWNLOAD_STREAM_TOKEN").filter(|t| !t.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    /// Check the values make sense together
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.events_url()?;
        if self.coalesce_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "coalesce window must be at least 1ms".to_string(),
            ));
        }
        if self.reconnect_cap_ms < self.reconnect_base_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect cap ({}ms) is below the base delay ({}ms)",
                self.reconnect_cap_ms, self.reconnect_base_ms
            )));
        }
        Ok(())
    }

    /// Base URL joined with a server path
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: scheme must be http or https",
                self.base_url
            )));
        }
        base.join(path)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Full URL of the event stream
    pub fn events_url(&self) -> Result<Url, ConfigError> {
        self.endpoint(&self.events_path)
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(self.reconnect_base_ms),
            Duration::from_millis(self.reconnect_increment_ms),
            Duration::from_millis(self.reconnect_cap_ms),
            self.max_reconnect_attempts,
        )
    }
}

fn read_number<F, N>(lookup: &F, name: &'static str, target: &mut N) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    N: FromStr,
{
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw })?;
    }
    Ok(())
}

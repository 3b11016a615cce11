//! Tabguard Configuration
//!
//! Configuration types for waits and new-context visits. Durations are stored
//! in milliseconds so the JSON form stays flat.

use crate::result::ConfigError;
use crate::wait::WaitOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overrides the general wait timeout
pub const ENV_TIMEOUT_MS: &str = "TABGUARD_TIMEOUT_MS";

/// Overrides the polling interval
pub const ENV_POLL_INTERVAL_MS: &str = "TABGUARD_POLL_INTERVAL_MS";

/// Overrides the new-context timeout
pub const ENV_NEW_CONTEXT_TIMEOUT_MS: &str = "TABGUARD_NEW_CONTEXT_TIMEOUT_MS";

/// Default new-context timeout (10 seconds)
pub const DEFAULT_NEW_CONTEXT_TIMEOUT_MS: u64 = 10_000;

/// Configuration for a tabguard session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TabguardConfig {
    /// General wait options
    pub wait: WaitOptions,
    /// How long to wait for a trigger to open a new context
    pub new_context_timeout_ms: u64,
    /// Re-read the focused context after switching home
    pub restore_check: bool,
}

impl Default for TabguardConfig {
    fn default() -> Self {
        Self {
            wait: WaitOptions::default(),
            new_context_timeout_ms: DEFAULT_NEW_CONTEXT_TIMEOUT_MS,
            restore_check: true,
        }
    }
}

impl TabguardConfig {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> TabguardConfigBuilder {
        TabguardConfigBuilder::default()
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `TABGUARD_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Overlay overrides read through `lookup` onto this configuration
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = parse_ms(&lookup, ENV_TIMEOUT_MS)? {
            self.wait.timeout_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, ENV_POLL_INTERVAL_MS)? {
            self.wait.poll_interval_ms = ms;
        }
        if let Some(ms) = parse_ms(&lookup, ENV_NEW_CONTEXT_TIMEOUT_MS)? {
            self.new_context_timeout_ms = ms;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject settings the wait engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wait
            .validate()
            .map_err(|err| ConfigError::InvalidValue {
                key: "poll_interval_ms".to_string(),
                value: self.wait.poll_interval_ms.to_string(),
                message: err.to_string(),
            })
    }

    /// New-context timeout as a duration
    #[must_use]
    pub const fn new_context_timeout(&self) -> Duration {
        Duration::from_millis(self.new_context_timeout_ms)
    }

    /// Wait options used while awaiting a new context
    #[must_use]
    pub const fn new_context_options(&self) -> WaitOptions {
        self.wait.with_timeout(self.new_context_timeout_ms)
    }
}

fn parse_ms<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            message: err.to_string(),
        })
}

/// Builder for `TabguardConfig`
#[derive(Debug, Clone, Default)]
pub struct TabguardConfigBuilder {
    config: TabguardConfig,
}

impl TabguardConfigBuilder {
    /// Set the general wait timeout
    #[must_use]
    pub const fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.wait.timeout_ms = ms;
        self
    }

    /// Set the polling interval
    #[must_use]
    pub const fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.wait.poll_interval_ms = ms;
        self
    }

    /// Set the new-context timeout
    #[must_use]
    pub const fn new_context_timeout_ms(mut self, ms: u64) -> Self {
        self.config.new_context_timeout_ms = ms;
        self
    }

    /// Enable/disable the focus check after restoring home
    #[must_use]
    pub const fn restore_check(mut self, enabled: bool) -> Self {
        self.config.restore_check = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<TabguardConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

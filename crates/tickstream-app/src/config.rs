//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tickstream_ws::{ConnectionConfig, FeedEndpoint};

/// One named feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    /// Stream address (`ws://` or `wss://`).
    pub uri: String,
    /// Text frame sent after every successful open.
    pub subscription: String,
}

impl FeedConfig {
    pub fn endpoint(&self) -> FeedEndpoint {
        FeedEndpoint::new(self.uri.clone(), self.subscription.clone())
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection settings.
    #[serde(default)]
    pub websocket: ConnectionConfig,
    /// Feed catalogue.
    pub feeds: Vec<FeedConfig>,
    /// Feed selected at startup.
    pub default_feed: String,
    /// How often session statistics are published as metrics.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML content.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.feeds.is_empty() {
            return Err(AppError::Config("at least one feed is required".to_string()));
        }

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if !names.insert(feed.name.as_str()) {
                return Err(AppError::Config(format!("duplicate feed name: {}", feed.name)));
            }
            feed.endpoint()
                .validate()
                .map_err(|e| AppError::Config(format!("feed {}: {e}", feed.name)))?;
        }

        if !names.contains(self.default_feed.as_str()) {
            return Err(AppError::UnknownFeed(self.default_feed.clone()));
        }
        if self.metrics_interval_secs == 0 {
            return Err(AppError::Config(
                "metrics_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

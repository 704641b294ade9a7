//! Feed catalogue: the configured feeds and the current selection.

use crate::config::FeedConfig;
use crate::error::{AppError, AppResult};
use parking_lot::RwLock;
use tickstream_ws::{FeedEndpoint, FeedSource, WsError, WsResult};
use tracing::info;

/// Serves the selected feed to the connection on every non-initial connect.
pub struct FeedCatalog {
    feeds: Vec<FeedConfig>,
    selected: RwLock<String>,
}

impl FeedCatalog {
    pub fn new(feeds: Vec<FeedConfig>, default_feed: &str) -> AppResult<Self> {
        let catalog = Self {
            feeds,
            selected: RwLock::new(String::new()),
        };
        catalog.select(default_feed)?;
        Ok(catalog)
    }

    /// Change the selected feed. Takes effect on the next connect.
    pub fn select(&self, name: &str) -> AppResult<()> {
        if self.find(name).is_none() {
            return Err(AppError::UnknownFeed(name.to_string()));
        }
        *self.selected.write() = name.to_string();
        info!(feed = name, "Feed selected");
        Ok(())
    }

    pub fn selected(&self) -> String {
        self.selected.read().clone()
    }

    fn find(&self, name: &str) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.name == name)
    }
}

impl FeedSource for FeedCatalog {
    fn get_feed(&self) -> WsResult<FeedEndpoint> {
        let selected = self.selected.read();
        self.find(&selected)
            .map(FeedConfig::endpoint)
            .ok_or_else(|| WsError::Configuration(format!("feed {selected} not in catalogue")))
    }
}

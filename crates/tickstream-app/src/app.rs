//! Application orchestration.
//!
//! Owns the feed client and drives it from operator commands:
//! - Initial connect and resume at startup
//! - stdin commands for sleep, resume and feed switching
//! - Periodic metrics publication from session statistics
//! - Sleep on Ctrl-C before exiting

use crate::catalog::FeedCatalog;
use crate::command::{Command, HELP};
use crate::config::AppConfig;
use crate::consumer::{LoggingConsumer, MetricsReporter};
use crate::error::AppResult;
use std::sync::Arc;
use std::time::Duration;
use tickstream_telemetry::StatsPublisher;
use tickstream_ws::FeedClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// What the command loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Main application.
pub struct Application {
    client: FeedClient,
    catalog: Arc<FeedCatalog>,
    publisher: StatsPublisher,
    metrics_interval: Duration,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let catalog = Arc::new(FeedCatalog::new(config.feeds, &config.default_feed)?);
        let client = FeedClient::builder(
            config.websocket,
            catalog.clone(),
            Arc::new(LoggingConsumer),
        )
        .reporter(Arc::new(MetricsReporter))
        .build();

        Ok(Self {
            client,
            catalog,
            publisher: StatsPublisher::new(),
            metrics_interval: Duration::from_secs(config.metrics_interval_secs),
        })
    }

    pub fn client(&self) -> &FeedClient {
        &self.client
    }

    pub fn catalog(&self) -> &FeedCatalog {
        &self.catalog
    }

    /// Create the first connection and resume the stream.
    ///
    /// A failed first open is not fatal: the client keeps retrying.
    pub async fn start(&self) -> AppResult<()> {
        self.client.init().await?;
        if let Err(e) = self.client.resume().await {
            warn!(error = %e, "Initial open failed, reconnecting in background");
        }
        info!(feed = %self.catalog.selected(), "Stream started");
        Ok(())
    }

    /// Apply one operator command.
    pub async fn handle(&self, command: Command) -> AppResult<Flow> {
        match command {
            Command::Sleep => self.client.sleep().await?,
            Command::Resume => {
                if let Err(e) = self.client.resume().await {
                    warn!(error = %e, "Open failed on resume, reconnecting in background");
                }
            }
            Command::Feed(name) => {
                self.catalog.select(&name)?;
                self.client.switch_feed().await?;
            }
            Command::Status => self.log_status(),
            Command::Help => info!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Run until `quit` or Ctrl-C, then sleep the stream.
    pub async fn run(&self) -> AppResult<()> {
        self.start().await?;
        info!("{HELP}");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let mut metrics_interval = tokio::time::interval(self.metrics_interval);

        loop {
            tokio::select! {
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match line.parse::<Command>() {
                        Ok(command) => match self.handle(command).await {
                            Ok(Flow::Quit) => break,
                            Ok(Flow::Continue) => {}
                            Err(e) => warn!(error = %e, "Command failed"),
                        },
                        Err(e) => warn!(error = %e, "{HELP}"),
                    },
                    Ok(None) => {
                        info!("stdin closed, streaming until Ctrl-C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed, streaming until Ctrl-C");
                        stdin_open = false;
                    }
                },

                _ = metrics_interval.tick() => self.publish_metrics(),

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Sleep the stream and publish final statistics.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.client.sleep().await?;
        self.publish_metrics();
        self.log_status();
        info!("Shut down");
        Ok(())
    }

    pub fn publish_metrics(&self) {
        self.publisher.publish(
            &self.client.stats(),
            self.client.connection_state(),
            self.client.registration_state(),
        );
    }

    fn log_status(&self) {
        let stats = self.client.stats();
        info!(
            feed = %self.catalog.selected(),
            uri = %self.client.endpoint().map(|e| e.uri).unwrap_or_default(),
            registration = ?self.client.registration_state(),
            state = %self.client.connection_state(),
            reconnecting = self.client.is_reconnecting(),
            opens = stats.opens,
            unexpected_closes = stats.unexpected_closes,
            reconnect_attempts = stats.reconnect_attempts,
            frames = stats.frames_received,
            errors = stats.transport_errors,
            since_last_message_ms = ?stats.since_last_message_ms(),
            "Status"
        );
    }
}

//! tickstream command-line client.
//!
//! Keeps one market-data stream alive and lets an operator drive it:
//! - TOML feed catalogue with a selectable current feed
//! - Resume/sleep and feed switching from stdin
//! - Periodic Prometheus publication of session statistics

pub mod app;
pub mod catalog;
pub mod command;
pub mod config;
pub mod consumer;
pub mod error;

pub use app::{Application, Flow};
pub use catalog::FeedCatalog;
pub use command::Command;
pub use config::{AppConfig, FeedConfig};
pub use error::{AppError, AppResult};

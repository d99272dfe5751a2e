//! Error types for the path watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Failed to load config: {reason}")]
    ConfigError { reason: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl From<figment::Error> for WatchError {
    fn from(e: figment::Error) -> Self {
        WatchError::ConfigError {
            reason: e.to_string(),
        }
    }
}

//! Error types for the watch-and-dispatch engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from notification sources and the watch tree.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    SetupFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Watch root {path} was removed")]
    RootRemoved { path: PathBuf },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl WatchError {
    /// Build a setup failure from a notify error, naming the resource limit
    /// when that is what ran out.
    pub fn setup(path: impl Into<PathBuf>, err: &notify::Error) -> Self {
        let reason = match &err.kind {
            notify::ErrorKind::MaxFilesWatch => "OS watch limit reached".to_string(),
            notify::ErrorKind::PathNotFound => "path not found".to_string(),
            _ => err.to_string(),
        };
        WatchError::SetupFailed {
            path: path.into(),
            reason,
        }
    }
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Errors surfaced by [`DispatchEngine`](super::DispatchEngine).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("Action '{action}' failed for {path}: {reason}")]
    ActionFailed {
        action: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Engine has already been started")]
    NotIdle,

    #[error("Failed to start engine worker: {reason}")]
    WorkerSpawn { reason: String },

    #[error("Engine worker thread panicked")]
    WorkerPanicked,
}

//! File Processing Engine.
//!
//! Watches a folder, including folders created inside it up to a maximum
//! depth, and runs a task once on every new file.

pub mod logging;

pub mod actions;
pub mod cli;
pub mod config;
pub mod watcher;

pub use actions::{ActionContext, TaskKind};
pub use config::{ConfigError, LoggingConfig, Settings};
pub use watcher::{
    Action, DispatchEngine, EngineConfig, EngineError, EngineState, Outcome, StopHandle,
    StopReason, WatchError,
};

//! Watch-folder engine.
//!
//! A [`DispatchEngine`] watches a directory tree and hands every file that
//! appears in it, exactly once, to a pluggable [`Action`].
//!
//! # Architecture
//!
//! ```text
//! DispatchEngine
//!   - single event loop (caller thread or "fpe-monitor")
//!   - stop flag, kill count, RunState
//!         |
//!     WatchTree
//!   - one WatchNode per watched directory, depth per node
//!   - reconciles new directories, drops stale events
//!         |
//!  NotificationSource
//!   - NativeSource (notify)  |  MemorySource (tests)
//! ```

mod action;
mod engine;
mod error;
pub mod source;
mod tree;

pub use action::{Action, Outcome};
pub use engine::{
    DispatchEngine, EngineConfig, EngineState, POLL_INTERVAL, RunState, StopHandle, StopReason,
};
pub use error::{EngineError, WatchError};
pub use source::{
    EntryKind, MemorySource, MemorySourceHandle, NativeSource, NotificationSource, SourceEvent,
    WatchHandle,
};
pub use tree::{Event, EventKind, WatchNode, WatchTree};

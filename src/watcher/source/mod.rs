//! Filesystem notification sources.
//!
//! A [`NotificationSource`] installs non-recursive watches on single
//! directories and yields raw [`SourceEvent`]s. Recursion, depth and
//! reconciliation live in [`WatchTree`](super::WatchTree).

mod memory;
mod native;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use memory::{MemorySource, MemorySourceHandle};
pub use native::NativeSource;

use super::WatchError;

/// Opaque handle for one installed watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(pub(crate) u64);

/// What kind of filesystem entry an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    /// Stat `path` without following a final symlink into a directory.
    ///
    /// Returns `None` when the path is already gone.
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::symlink_metadata(path).ok()?;
        if meta.is_dir() {
            Some(EntryKind::Directory)
        } else {
            Some(EntryKind::File)
        }
    }
}

/// Raw notification from a source, before reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// A new entry appeared in a watched directory.
    Created { path: PathBuf, entry: EntryKind },

    /// A file opened for writing was closed.
    WriteClosed(PathBuf),

    /// An entry was deleted.
    Removed(PathBuf),

    /// An entry was renamed away and no matching arrival was seen.
    RenamedFrom(PathBuf),

    /// An entry was renamed in and no matching departure was seen.
    RenamedTo { path: PathBuf, entry: EntryKind },

    /// A matched rename pair, coalesced into one move.
    Moved {
        from: PathBuf,
        to: PathBuf,
        entry: EntryKind,
    },

    /// The source dropped events; some arrivals may never be reported.
    Overflow,
}

/// Capability interface over OS-level change notification.
pub trait NotificationSource: Send {
    /// Install a non-recursive watch on `path`.
    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError>;

    /// Release a watch. Unknown or already released handles are ignored.
    fn remove_watch(&mut self, handle: WatchHandle);

    /// Block up to `timeout` for the next event.
    ///
    /// `Ok(None)` means nothing arrived in time. An `Err` is a read failure
    /// the engine treats as fatal.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, WatchError>;

    /// Whether `WriteClosed` is delivered for files this source reports as
    /// created. When true the tree waits for it before dispatching.
    fn reports_write_completion(&self) -> bool {
        false
    }
}

impl<S: NotificationSource + ?Sized> NotificationSource for Box<S> {
    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError> {
        (**self).add_watch(path)
    }

    fn remove_watch(&mut self, handle: WatchHandle) {
        (**self).remove_watch(handle)
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, WatchError> {
        (**self).next_event(timeout)
    }

    fn reports_write_completion(&self) -> bool {
        (**self).reports_write_completion()
    }
}

//! In-memory notification source for tests.
//!
//! Events are injected through a [`MemorySourceHandle`]; watches are plain
//! bookkeeping so tests can assert which directories the tree holds.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{EntryKind, NotificationSource, SourceEvent, WatchHandle};
use crate::watcher::{StopHandle, WatchError};

type Injected = Result<SourceEvent, String>;

#[derive(Debug, Default)]
struct Shared {
    watched: BTreeMap<WatchHandle, PathBuf>,
    failing: HashSet<PathBuf>,
    stop_when_drained: Option<StopHandle>,
    next_handle: u64,
}

/// Fake [`NotificationSource`] driven by injected events.
#[derive(Debug)]
pub struct MemorySource {
    event_rx: Receiver<Injected>,
    shared: Arc<Mutex<Shared>>,
    write_completion: bool,
}

/// Injection side of a [`MemorySource`].
#[derive(Debug, Clone)]
pub struct MemorySourceHandle {
    event_tx: Option<Sender<Injected>>,
    shared: Arc<Mutex<Shared>>,
}

impl MemorySource {
    /// Create a source and the handle used to feed it.
    pub fn new() -> (Self, MemorySourceHandle) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let source = Self {
            event_rx: rx,
            shared: shared.clone(),
            write_completion: false,
        };
        let handle = MemorySourceHandle {
            event_tx: Some(tx),
            shared,
        };
        (source, handle)
    }

    /// Report `WriteClosed` for created files, like inotify does.
    pub fn with_write_completion(mut self, enabled: bool) -> Self {
        self.write_completion = enabled;
        self
    }
}

impl NotificationSource for MemorySource {
    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError> {
        let mut shared = self.shared.lock();

        if shared.failing.contains(path) {
            return Err(WatchError::SetupFailed {
                path: path.to_path_buf(),
                reason: "injected failure".to_string(),
            });
        }

        let handle = WatchHandle(shared.next_handle);
        shared.next_handle += 1;
        shared.watched.insert(handle, path.to_path_buf());
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) {
        self.shared.lock().watched.remove(&handle);
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, WatchError> {
        if self.event_rx.is_empty() {
            if let Some(stop) = &self.shared.lock().stop_when_drained {
                stop.request();
                return Ok(None);
            }
        }

        match self.event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(Some(event)),
            Ok(Err(details)) => Err(WatchError::EventError { details }),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WatchError::ChannelClosed),
        }
    }

    fn reports_write_completion(&self) -> bool {
        self.write_completion
    }
}

impl MemorySourceHandle {
    pub fn send(&self, event: SourceEvent) {
        self.inject(Ok(event));
    }

    pub fn file_created(&self, path: impl Into<PathBuf>) {
        self.send(SourceEvent::Created {
            path: path.into(),
            entry: EntryKind::File,
        });
    }

    pub fn dir_created(&self, path: impl Into<PathBuf>) {
        self.send(SourceEvent::Created {
            path: path.into(),
            entry: EntryKind::Directory,
        });
    }

    pub fn write_closed(&self, path: impl Into<PathBuf>) {
        self.send(SourceEvent::WriteClosed(path.into()));
    }

    pub fn removed(&self, path: impl Into<PathBuf>) {
        self.send(SourceEvent::Removed(path.into()));
    }

    /// Make the next read fail with `details`.
    pub fn fail_read(&self, details: impl Into<String>) {
        self.inject(Err(details.into()));
    }

    /// Make every later `add_watch` on `path` fail.
    pub fn fail_watch(&self, path: impl Into<PathBuf>) {
        self.shared.lock().failing.insert(path.into());
    }

    /// Request `stop` as soon as every injected event has been read.
    pub fn stop_when_drained(&self, stop: StopHandle) {
        self.shared.lock().stop_when_drained = Some(stop);
    }

    /// Paths with a live watch, sorted.
    pub fn watched(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.shared.lock().watched.values().cloned().collect();
        paths.sort();
        paths
    }

    /// Events injected but not yet read by the source.
    pub fn queued(&self) -> usize {
        self.event_tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Disconnect this handle's sender. Once every clone is closed the
    /// source reports `ChannelClosed`.
    pub fn close(&mut self) {
        self.event_tx = None;
    }

    fn inject(&self, event: Injected) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

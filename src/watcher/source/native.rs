//! Notification source backed by the `notify` crate.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::{EntryKind, NotificationSource, SourceEvent, WatchHandle};
use crate::watcher::WatchError;

/// How long a rename-away half waits for its rename-into partner.
const RENAME_PAIR_WINDOW: Duration = Duration::from_millis(50);

/// [`NotificationSource`] over the platform's recommended notify backend.
///
/// Every directory gets its own non-recursive watch so the tree decides
/// what is in depth.
pub struct NativeSource {
    watcher: RecommendedWatcher,
    event_rx: Receiver<notify::Result<Event>>,
    watches: HashMap<WatchHandle, PathBuf>,
    next_handle: u64,
    renames: RenamePairing,
}

impl NativeSource {
    pub fn new() -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded();

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;

        Ok(Self {
            watcher,
            event_rx: rx,
            watches: HashMap::new(),
            next_handle: 0,
            renames: RenamePairing::default(),
        })
    }

    /// Number of live watches.
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }
}

impl std::fmt::Debug for NativeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSource")
            .field("watches", &self.watches.len())
            .finish_non_exhaustive()
    }
}

impl NotificationSource for NativeSource {
    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle, WatchError> {
        if !path.is_dir() {
            return Err(WatchError::SetupFailed {
                path: path.to_path_buf(),
                reason: "not an accessible directory".to_string(),
            });
        }

        self.watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::setup(path, &e))?;

        let handle = WatchHandle(self.next_handle);
        self.next_handle += 1;
        self.watches.insert(handle, path.to_path_buf());

        crate::debug_event!("source", "watching", "{}", path.display());
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) {
        let Some(path) = self.watches.remove(&handle) else {
            return;
        };

        // The kernel drops watches on deleted directories by itself, so a
        // failure here usually means there is nothing left to release.
        if let Err(e) = self.watcher.unwatch(&path) {
            crate::debug_event!("source", "unwatch", "{}: {e}", path.display());
        }
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<SourceEvent>, WatchError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(event) = self.renames.pop() {
                return Ok(Some(event));
            }

            let wait = if self.renames.is_holding() {
                RENAME_PAIR_WINDOW
            } else {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                deadline - now
            };

            match self.event_rx.recv_timeout(wait) {
                Ok(Ok(event)) => self.renames.push(event),
                Ok(Err(e)) => {
                    return Err(WatchError::EventError {
                        details: e.to_string(),
                    });
                }
                Err(RecvTimeoutError::Timeout) => self.renames.flush_held(),
                Err(RecvTimeoutError::Disconnected) => return Err(WatchError::ChannelClosed),
            }
        }
    }

    fn reports_write_completion(&self) -> bool {
        cfg!(target_os = "linux")
    }
}

/// A rename-away half waiting for its partner.
#[derive(Debug)]
struct HeldRename {
    path: PathBuf,
    tracker: Option<usize>,
}

/// Translates notify events into [`SourceEvent`]s, pairing rename halves.
///
/// inotify reports a rename inside watched directories as `From`, `To` and
/// then `Both`, all carrying the same tracker. The pair becomes one
/// `Moved` and the trailing `Both` is dropped.
#[derive(Debug, Default)]
struct RenamePairing {
    held: Option<HeldRename>,
    coalesced: Option<usize>,
    ready: VecDeque<SourceEvent>,
}

impl RenamePairing {
    fn pop(&mut self) -> Option<SourceEvent> {
        self.ready.pop_front()
    }

    fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Surface a held rename-away half on its own.
    fn flush_held(&mut self) {
        if let Some(held) = self.held.take() {
            self.ready.push_back(SourceEvent::RenamedFrom(held.path));
        }
    }

    fn push(&mut self, event: Event) {
        if event.need_rescan() {
            self.flush_held();
            self.ready.push_back(SourceEvent::Overflow);
            return;
        }

        let tracker = event.attrs.tracker();

        if let EventKind::Modify(ModifyKind::Name(mode)) = event.kind {
            self.push_rename(mode, tracker, event.paths);
            return;
        }

        self.flush_held();

        for path in event.paths {
            let translated = match event.kind {
                EventKind::Create(CreateKind::File) => Some(SourceEvent::Created {
                    path,
                    entry: EntryKind::File,
                }),
                EventKind::Create(CreateKind::Folder) => Some(SourceEvent::Created {
                    path,
                    entry: EntryKind::Directory,
                }),
                EventKind::Create(_) => {
                    EntryKind::of(&path).map(|entry| SourceEvent::Created { path, entry })
                }
                EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                    Some(SourceEvent::WriteClosed(path))
                }
                EventKind::Remove(_) => Some(SourceEvent::Removed(path)),
                _ => None,
            };

            if let Some(translated) = translated {
                self.ready.push_back(translated);
            }
        }
    }

    fn push_rename(&mut self, mode: RenameMode, tracker: Option<usize>, paths: Vec<PathBuf>) {
        match mode {
            RenameMode::From => {
                self.flush_held();
                if let Some(path) = paths.into_iter().next() {
                    self.held = Some(HeldRename { path, tracker });
                }
            }
            RenameMode::To => {
                let Some(to) = paths.into_iter().next() else {
                    return;
                };

                match self.held.take() {
                    Some(held) if tracker.is_some() && held.tracker == tracker => {
                        self.coalesced = tracker;
                        self.push_move(held.path, to);
                    }
                    other => {
                        self.held = other;
                        self.flush_held();
                        self.push_arrival(to);
                    }
                }
            }
            RenameMode::Both => {
                if tracker.is_some() && self.coalesced == tracker {
                    self.coalesced = None;
                    return;
                }

                let mut paths = paths.into_iter();
                let (Some(from), Some(to)) = (paths.next(), paths.next()) else {
                    return;
                };

                if self.held.as_ref().is_some_and(|held| held.path == from) {
                    self.held = None;
                }
                self.flush_held();
                self.push_move(from, to);
            }
            _ => {
                self.flush_held();
                for path in paths {
                    match EntryKind::of(&path) {
                        Some(entry) => self.ready.push_back(SourceEvent::RenamedTo { path, entry }),
                        None => self.ready.push_back(SourceEvent::RenamedFrom(path)),
                    }
                }
            }
        }
    }

    fn push_move(&mut self, from: PathBuf, to: PathBuf) {
        match EntryKind::of(&to) {
            Some(entry) => self.ready.push_back(SourceEvent::Moved { from, to, entry }),
            // Moved and already gone again: only the departure is left.
            None => self.ready.push_back(SourceEvent::RenamedFrom(from)),
        }
    }

    fn push_arrival(&mut self, path: PathBuf) {
        if let Some(entry) = EntryKind::of(&path) {
            self.ready.push_back(SourceEvent::RenamedTo { path, entry });
        }
    }
}

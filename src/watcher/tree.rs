//! Watched directory tree with depth tracking and reconciliation.
//!
//! The tree owns one [`WatchNode`] per watched directory, keyed by path,
//! with its depth below the root stored on the node. Raw source events are
//! turned into [`Event`]s here: new directories are registered and re-listed
//! so files written before their watch existed are not lost, and stale
//! events for unwatched directories are dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
#[cfg(not(unix))]
use std::time::SystemTime;

use walkdir::WalkDir;

use super::WatchError;
use super::source::{EntryKind, NotificationSource, SourceEvent, WatchHandle};

/// One watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchNode {
    pub path: PathBuf,
    /// Levels below the root; the root itself is 0.
    pub depth: usize,
    handle: WatchHandle,
}

/// Kind of a reconciled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A file arrived and is ready for processing.
    FileCreated,
    /// A directory was created and is now watched.
    DirectoryCreated,
    /// An entry was deleted.
    Removed,
    /// An entry was renamed away.
    RenamedFrom,
    /// A directory was renamed in and is now watched.
    RenamedTo,
    /// The source dropped events.
    Overflow,
}

/// Reconciled event handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub path: PathBuf,
    /// Depth of the watched directory that contains `path`.
    pub parent_depth: usize,
}

impl Event {
    fn new(kind: EventKind, path: PathBuf, parent_depth: usize) -> Self {
        Self {
            kind,
            path,
            parent_depth,
        }
    }
}

/// Identity of a file seen by a reconciliation scan.
///
/// A later notification only matches the scan when the path still names
/// the same file; a new file renamed over the old name gets a new identity.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<SystemTime>,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        fs::symlink_metadata(path).ok().map(|meta| Self::of(&meta))
    }

    #[cfg(unix)]
    fn of(meta: &fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &fs::Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}

/// Whether a freshly created entry will be followed by a close-after-write.
///
/// Only a regular file with a single link has a writer behind it. Symlinks,
/// hard links and special files are complete when they appear.
fn awaits_write_close(meta: &fs::Metadata) -> bool {
    if !meta.file_type().is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.nlink() == 1
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Set of watched directories kept consistent with the filesystem.
pub struct WatchTree<S: NotificationSource> {
    source: S,
    root: PathBuf,
    max_depth: Option<usize>,
    nodes: HashMap<PathBuf, WatchNode>,
    /// Events produced ahead of the next source read.
    pending: VecDeque<Event>,
    /// Files dispatched by a reconciliation scan whose own notification may
    /// still be on its way. Cleared whenever the source goes idle.
    reconciled: HashMap<PathBuf, FileStamp>,
    /// Files created but not yet closed by their writer.
    in_creation: HashSet<PathBuf>,
}

impl<S: NotificationSource> WatchTree<S> {
    /// Watch `root` and every directory below it within `max_depth`.
    ///
    /// The walk is breadth-first. Files already present are the startup
    /// baseline and are never reported. Any watch failure aborts.
    pub fn initialize(source: S, root: &Path, max_depth: Option<usize>) -> Result<Self, WatchError> {
        let root = root.canonicalize().map_err(|e| WatchError::SetupFailed {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut tree = Self {
            source,
            root: root.clone(),
            max_depth,
            nodes: HashMap::new(),
            pending: VecDeque::new(),
            reconciled: HashMap::new(),
            in_creation: HashSet::new(),
        };

        let mut queue = VecDeque::from([(root, 0usize)]);
        while let Some((dir, depth)) = queue.pop_front() {
            tree.register(&dir, depth)?;

            if !tree.depth_allows(depth + 1) {
                continue;
            }

            for sub in subdirectories(&dir)? {
                queue.push_back((sub, depth + 1));
            }
        }

        crate::log_event!(
            "tree",
            "baseline",
            "{} directories under {}",
            tree.nodes.len(),
            tree.root.display()
        );

        Ok(tree)
    }

    /// Canonical root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Number of watched directories.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, path: &Path) -> Option<&WatchNode> {
        self.nodes.get(path)
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.nodes.contains_key(path)
    }

    /// Next reconciled event, waiting up to `timeout` on the source.
    ///
    /// Events synthesized by a reconciliation scan are returned before the
    /// source is read again. `Ok(None)` means nothing is ready yet, either
    /// because the source timed out or because its event was not relevant.
    ///
    /// An idle source has delivered every notification raised before the
    /// last scan, so the scan's dedup records are dropped at that point.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<Event>, WatchError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        let Some(raw) = self.source.next_event(timeout)? else {
            if !self.reconciled.is_empty() {
                crate::debug_event!(
                    "tree",
                    "idle",
                    "dropping {} dedup records",
                    self.reconciled.len()
                );
                self.reconciled.clear();
            }
            return Ok(None);
        };

        self.apply(raw)?;
        Ok(self.pending.pop_front())
    }

    /// Release every watch. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.nodes.is_empty() {
            return;
        }

        let count = self.nodes.len();
        for (_, node) in self.nodes.drain() {
            self.source.remove_watch(node.handle);
        }
        self.pending.clear();
        self.reconciled.clear();
        self.in_creation.clear();

        crate::debug_event!("tree", "released", "{count} watches");
    }

    fn apply(&mut self, raw: SourceEvent) -> Result<(), WatchError> {
        match raw {
            SourceEvent::Created {
                path,
                entry: EntryKind::Directory,
            } => self.on_directory_created(path, EventKind::DirectoryCreated),
            SourceEvent::Created {
                path,
                entry: EntryKind::File,
            } => self.on_file_created(path),
            SourceEvent::WriteClosed(path) => self.on_write_closed(path),
            SourceEvent::Removed(path) => self.on_removed(path, EventKind::Removed)?,
            SourceEvent::RenamedFrom(path) => self.on_removed(path, EventKind::RenamedFrom)?,
            SourceEvent::RenamedTo {
                path,
                entry: EntryKind::Directory,
            } => self.on_directory_created(path, EventKind::RenamedTo),
            SourceEvent::RenamedTo {
                path,
                entry: EntryKind::File,
            } => self.on_file_arrived(path),
            SourceEvent::Moved { from, to, entry } => {
                self.on_removed(from, EventKind::RenamedFrom)?;
                match entry {
                    EntryKind::Directory => self.on_directory_created(to, EventKind::RenamedTo),
                    EntryKind::File => self.on_file_arrived(to),
                }
            }
            SourceEvent::Overflow => {
                tracing::warn!(
                    "[tree] notification queue overflowed under {}",
                    self.root.display()
                );
                self.pending
                    .push_back(Event::new(EventKind::Overflow, self.root.clone(), 0));
            }
        }
        Ok(())
    }

    /// Register and reconcile a new directory.
    ///
    /// A directory past `max_depth` is never watched. A watch failure leaves
    /// that subtree unmonitored without stopping the rest of the tree.
    fn on_directory_created(&mut self, path: PathBuf, kind: EventKind) {
        let Some(parent_depth) = self.parent_depth(&path) else {
            crate::debug_event!("tree", "stale", "{}", path.display());
            return;
        };

        let depth = parent_depth + 1;
        if !self.depth_allows(depth) {
            crate::debug_event!("tree", "beyond max depth", "{}", path.display());
            return;
        }

        if self.nodes.contains_key(&path) {
            crate::debug_event!("tree", "already watched", "{}", path.display());
            return;
        }

        match self.register(&path, depth) {
            Ok(()) => {
                self.pending
                    .push_back(Event::new(kind, path.clone(), parent_depth));
                self.reconcile(&path, depth);
            }
            Err(e) => {
                tracing::warn!("[tree] subtree left unmonitored: {e}");
            }
        }
    }

    fn on_file_created(&mut self, path: PathBuf) {
        let Some(parent_depth) = self.parent_depth(&path) else {
            crate::debug_event!("tree", "stale", "{}", path.display());
            return;
        };

        if self.already_reconciled(&path) {
            crate::debug_event!("tree", "already reconciled", "{}", path.display());
            return;
        }

        if self.source.reports_write_completion() {
            match fs::symlink_metadata(&path) {
                Ok(meta) if awaits_write_close(&meta) => {
                    self.in_creation.insert(path);
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    crate::debug_event!("tree", "gone", "{}: {e}", path.display());
                    return;
                }
            }
        }

        self.pending
            .push_back(Event::new(EventKind::FileCreated, path, parent_depth));
    }

    fn on_write_closed(&mut self, path: PathBuf) {
        if !self.in_creation.remove(&path) {
            return;
        }

        if let Some(parent_depth) = self.parent_depth(&path) {
            self.pending
                .push_back(Event::new(EventKind::FileCreated, path, parent_depth));
        }
    }

    /// A file renamed into the tree is complete on arrival.
    fn on_file_arrived(&mut self, path: PathBuf) {
        let Some(parent_depth) = self.parent_depth(&path) else {
            crate::debug_event!("tree", "stale", "{}", path.display());
            return;
        };

        if self.already_reconciled(&path) {
            crate::debug_event!("tree", "already reconciled", "{}", path.display());
            return;
        }

        self.pending
            .push_back(Event::new(EventKind::FileCreated, path, parent_depth));
    }

    /// Consume the scan record for `path`.
    ///
    /// The arrival is a duplicate when the path still names the scanned file,
    /// or names nothing because the file was already handled and deleted.
    fn already_reconciled(&mut self, path: &Path) -> bool {
        let Some(scanned) = self.reconciled.remove(path) else {
            return false;
        };
        FileStamp::read(path).is_none_or(|now| now == scanned)
    }

    /// Drop the node for `path` and every node nested under it.
    fn on_removed(&mut self, path: PathBuf, kind: EventKind) -> Result<(), WatchError> {
        if path == self.root {
            return Err(WatchError::RootRemoved { path });
        }

        let doomed: Vec<PathBuf> = self
            .nodes
            .keys()
            .filter(|p| p.starts_with(&path))
            .cloned()
            .collect();

        for dir in &doomed {
            if let Some(node) = self.nodes.remove(dir) {
                self.source.remove_watch(node.handle);
            }
        }

        if !doomed.is_empty() {
            crate::log_event!(
                "tree",
                "unwatched",
                "{} directories under {}",
                doomed.len(),
                path.display()
            );
        }

        self.reconciled.retain(|p, _| !p.starts_with(&path));
        self.in_creation.retain(|p| !p.starts_with(&path));

        if let Some(parent_depth) = self.parent_depth(&path) {
            self.pending.push_back(Event::new(kind, path, parent_depth));
        }
        Ok(())
    }

    /// Re-list a freshly watched directory.
    ///
    /// Files found are reported as created and remembered so their own
    /// notification, if it arrives later, is not dispatched again. Nested
    /// directories within depth are registered on the way down.
    ///
    /// A directory moved within the tree is re-listed like any other arrival,
    /// so files inside it are dispatched again under their new paths.
    fn reconcile(&mut self, dir: &Path, depth: usize) {
        let walk_depth = match self.max_depth {
            Some(max) => max - depth + 1,
            None => usize::MAX,
        };

        let mut walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(walk_depth)
            .sort_by_file_name()
            .into_iter();

        let mut found = 0usize;

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("[tree] reconcile {}: {e}", dir.display());
                    continue;
                }
            };

            let path = entry.path().to_path_buf();
            let Some(parent_depth) = self.parent_depth(&path) else {
                continue;
            };

            if entry.file_type().is_dir() {
                // Past max depth only happens at the walk's own depth limit,
                // where nothing below is yielded anyway.
                let sub_depth = parent_depth + 1;
                if !self.depth_allows(sub_depth) {
                    continue;
                }
                if self.nodes.contains_key(&path) {
                    walker.skip_current_dir();
                    continue;
                }

                match self.register(&path, sub_depth) {
                    Ok(()) => self.pending.push_back(Event::new(
                        EventKind::DirectoryCreated,
                        path,
                        parent_depth,
                    )),
                    Err(e) => {
                        tracing::warn!("[tree] subtree left unmonitored: {e}");
                        walker.skip_current_dir();
                    }
                }
            } else if entry.file_type().is_file() || entry.file_type().is_symlink() {
                let Ok(meta) = entry.metadata() else {
                    continue;
                };
                self.in_creation.remove(&path);
                self.reconciled.insert(path.clone(), FileStamp::of(&meta));
                self.pending
                    .push_back(Event::new(EventKind::FileCreated, path, parent_depth));
                found += 1;
            }
        }

        if found > 0 {
            crate::debug_event!("tree", "reconciled", "{found} files under {}", dir.display());
        }
    }

    fn register(&mut self, path: &Path, depth: usize) -> Result<(), WatchError> {
        if self.nodes.contains_key(path) {
            return Ok(());
        }

        let handle = self.source.add_watch(path)?;
        self.nodes.insert(
            path.to_path_buf(),
            WatchNode {
                path: path.to_path_buf(),
                depth,
                handle,
            },
        );

        crate::debug_event!("tree", "watching", "{} (depth {depth})", path.display());
        Ok(())
    }

    fn parent_depth(&self, path: &Path) -> Option<usize> {
        path.parent()
            .and_then(|parent| self.nodes.get(parent))
            .map(|node| node.depth)
    }

    fn depth_allows(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth <= max)
    }
}

impl<S: NotificationSource> Drop for WatchTree<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: NotificationSource> std::fmt::Debug for WatchTree<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchTree")
            .field("root", &self.root)
            .field("max_depth", &self.max_depth)
            .field("nodes", &self.nodes.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Immediate subdirectories of `dir`, sorted. Symlinks are not followed.
fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, WatchError> {
    let setup_failed = |e: std::io::Error| WatchError::SetupFailed {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    };

    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(setup_failed)? {
        let entry = entry.map_err(setup_failed)?;
        if entry.file_type().map_err(setup_failed)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::source::{MemorySource, MemorySourceHandle};
    use tempfile::TempDir;

    const TICK: Duration = Duration::from_millis(10);

    fn setup(max_depth: Option<usize>) -> (TempDir, PathBuf, WatchTree<MemorySource>, MemorySourceHandle) {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let (source, handle) = MemorySource::new();
        let tree = WatchTree::initialize(source, &root, max_depth).unwrap();
        (temp, root, tree, handle)
    }

    /// Read until both the tree and the injected queue are empty.
    fn drain<S: NotificationSource>(tree: &mut WatchTree<S>, handle: &MemorySourceHandle) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match tree.next_event(TICK).unwrap() {
                Some(event) => events.push(event),
                None if handle.queued() == 0 => return events,
                None => {}
            }
        }
    }

    fn files(events: &[Event]) -> Vec<PathBuf> {
        events
            .iter()
            .filter(|e| e.kind == EventKind::FileCreated)
            .map(|e| e.path.clone())
            .collect()
    }

    #[test]
    fn test_initialize_walks_within_depth() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("x")).unwrap();
        fs::write(root.join("a/existing.txt"), b"old").unwrap();

        let (source, handle) = MemorySource::new();
        let mut tree = WatchTree::initialize(source, &root, Some(1)).unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node(&root).unwrap().depth, 0);
        assert_eq!(tree.node(&root.join("a")).unwrap().depth, 1);
        assert!(!tree.is_watched(&root.join("a/b")));
        assert_eq!(
            handle.watched(),
            vec![root.clone(), root.join("a"), root.join("x")]
        );

        // The baseline is never reported.
        assert!(drain(&mut tree, &handle).is_empty());
    }

    #[test]
    fn test_unbounded_depth_watches_everything() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b/c/d")).unwrap();

        let (source, _handle) = MemorySource::new();
        let tree = WatchTree::initialize(source, &root, None).unwrap();

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.node(&root.join("a/b/c/d")).unwrap().depth, 4);
    }

    #[test]
    fn test_startup_watch_failure_aborts() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir(root.join("locked")).unwrap();

        let (source, handle) = MemorySource::new();
        handle.fail_watch(root.join("locked"));

        let err = WatchTree::initialize(source, &root, None).unwrap_err();
        assert!(matches!(err, WatchError::SetupFailed { path, .. } if path == root.join("locked")));
        // The root watch taken before the failure was released again.
        assert!(handle.watched().is_empty());
    }

    #[test]
    fn test_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let (source, _handle) = MemorySource::new();
        let result = WatchTree::initialize(source, &temp.path().join("nope"), None);
        assert!(matches!(result, Err(WatchError::SetupFailed { .. })));
    }

    #[test]
    fn test_file_created_in_root() {
        let (_temp, root, mut tree, handle) = setup(None);

        handle.file_created(root.join("a.txt"));

        let events = drain(&mut tree, &handle);
        assert_eq!(events, vec![Event::new(EventKind::FileCreated, root.join("a.txt"), 0)]);
    }

    #[test]
    fn test_new_directory_is_reconciled_once() {
        let (_temp, root, mut tree, handle) = setup(None);

        // Files written before the watch on `drop` existed.
        let dir = root.join("drop");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("one.txt"), b"1").unwrap();
        fs::write(dir.join("two.txt"), b"2").unwrap();

        handle.dir_created(&dir);
        // The native notification for one file also arrives.
        handle.file_created(dir.join("one.txt"));
        handle.file_created(dir.join("three.txt"));

        let events = drain(&mut tree, &handle);
        assert_eq!(events[0], Event::new(EventKind::DirectoryCreated, dir.clone(), 0));
        assert_eq!(
            files(&events),
            vec![dir.join("one.txt"), dir.join("two.txt"), dir.join("three.txt")]
        );
        assert_eq!(tree.node(&dir).unwrap().depth, 1);
        assert!(events[1..].iter().all(|e| e.parent_depth == 1));
    }

    #[test]
    fn test_duplicate_directory_notification_keeps_one_node() {
        let (_temp, root, mut tree, handle) = setup(None);

        let dir = root.join("twice");
        fs::create_dir(&dir).unwrap();
        handle.dir_created(&dir);
        handle.dir_created(&dir);

        let events = drain(&mut tree, &handle);
        assert_eq!(events.len(), 1);
        assert_eq!(handle.watched(), vec![root.clone(), dir]);
    }

    #[test]
    fn test_nested_directories_reconciled_within_depth() {
        let (_temp, root, mut tree, handle) = setup(Some(2));

        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/in_b.txt"), b"b").unwrap();
        fs::write(root.join("a/b/c/in_c.txt"), b"c").unwrap();

        handle.dir_created(root.join("a"));
        // Notifications for the nested directory arrive after its watch.
        handle.dir_created(root.join("a/b"));

        let events = drain(&mut tree, &handle);
        assert!(tree.is_watched(&root.join("a")));
        assert!(tree.is_watched(&root.join("a/b")));
        assert!(!tree.is_watched(&root.join("a/b/c")));
        assert_eq!(files(&events), vec![root.join("a/b/in_b.txt")]);
        assert_eq!(
            events
                .iter()
                .filter(|e| e.kind == EventKind::DirectoryCreated)
                .count(),
            2
        );
    }

    #[test]
    fn test_max_depth_zero_ignores_subdirectories() {
        let (_temp, root, mut tree, handle) = setup(Some(0));

        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("early.txt"), b"e").unwrap();

        handle.dir_created(&sub);
        handle.file_created(sub.join("late.txt"));
        handle.file_created(root.join("top.txt"));

        let events = drain(&mut tree, &handle);
        assert!(!tree.is_watched(&sub));
        assert_eq!(files(&events), vec![root.join("top.txt")]);
    }

    #[test]
    fn test_dynamic_watch_failure_leaves_subtree_unmonitored() {
        let (_temp, root, mut tree, handle) = setup(None);

        let bad = root.join("bad");
        fs::create_dir(&bad).unwrap();
        fs::write(bad.join("inside.txt"), b"x").unwrap();
        handle.fail_watch(&bad);

        handle.dir_created(&bad);
        handle.file_created(bad.join("later.txt"));
        handle.file_created(root.join("fine.txt"));

        let events = drain(&mut tree, &handle);
        assert!(!tree.is_watched(&bad));
        assert_eq!(files(&events), vec![root.join("fine.txt")]);
    }

    #[test]
    fn test_removal_drops_nested_nodes() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::create_dir_all(root.join("keep")).unwrap();

        let (source, handle) = MemorySource::new();
        let mut tree = WatchTree::initialize(source, &root, None).unwrap();
        assert_eq!(tree.len(), 5);

        fs::remove_dir_all(root.join("a")).unwrap();
        handle.removed(root.join("a"));
        handle.file_created(root.join("a/b/late.txt"));

        let events = drain(&mut tree, &handle);
        assert_eq!(events, vec![Event::new(EventKind::Removed, root.join("a"), 0)]);
        assert_eq!(handle.watched(), vec![root.clone(), root.join("keep")]);

        // Recreated with the same name: unwatched until its own creation event.
        fs::create_dir(root.join("a")).unwrap();
        handle.file_created(root.join("a/again.txt"));
        assert!(files(&drain(&mut tree, &handle)).is_empty());

        handle.dir_created(root.join("a"));
        handle.file_created(root.join("a/again.txt"));
        assert_eq!(files(&drain(&mut tree, &handle)), vec![root.join("a/again.txt")]);
    }

    #[test]
    fn test_removed_file_can_arrive_again() {
        let (_temp, root, mut tree, handle) = setup(None);

        let dir = root.join("d");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("f.txt"), b"1").unwrap();
        handle.dir_created(&dir);
        handle.removed(dir.join("f.txt"));
        handle.file_created(dir.join("f.txt"));

        let events = drain(&mut tree, &handle);
        assert_eq!(files(&events), vec![dir.join("f.txt"), dir.join("f.txt")]);
    }

    #[test]
    fn test_root_removal_is_fatal() {
        let (_temp, root, mut tree, handle) = setup(None);

        handle.removed(&root);
        let err = tree.next_event(TICK).unwrap_err();
        assert_eq!(err, WatchError::RootRemoved { path: root });
    }

    #[test]
    fn test_write_completion_gates_dispatch() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        let (source, handle) = MemorySource::new();
        let source = source.with_write_completion(true);
        let mut tree = WatchTree::initialize(source, &root, None).unwrap();

        fs::write(root.join("big.iso"), b"first chunk").unwrap();
        handle.file_created(root.join("big.iso"));
        assert!(drain(&mut tree, &handle).is_empty());

        handle.write_closed(root.join("big.iso"));
        // A second close of the same file is not a new arrival.
        handle.write_closed(root.join("big.iso"));
        assert_eq!(files(&drain(&mut tree, &handle)), vec![root.join("big.iso")]);
    }

    #[test]
    fn test_moves_relocate_subtrees() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("old/inner")).unwrap();

        let (source, handle) = MemorySource::new();
        let mut tree = WatchTree::initialize(source, &root, None).unwrap();

        fs::rename(root.join("old"), root.join("new")).unwrap();
        fs::write(root.join("moved.txt"), b"m").unwrap();
        handle.send(SourceEvent::Moved {
            from: root.join("old"),
            to: root.join("new"),
            entry: EntryKind::Directory,
        });
        handle.send(SourceEvent::RenamedTo {
            path: root.join("moved.txt"),
            entry: EntryKind::File,
        });

        let events = drain(&mut tree, &handle);
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::RenamedFrom,
                EventKind::RenamedTo,
                EventKind::DirectoryCreated,
                EventKind::FileCreated,
            ]
        );
        assert!(!tree.is_watched(&root.join("old/inner")));
        assert!(tree.is_watched(&root.join("new/inner")));
        assert_eq!(files(&events), vec![root.join("moved.txt")]);
    }

    #[test]
    fn test_shutdown_releases_all_watches() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("a/b")).unwrap();

        let (source, handle) = MemorySource::new();
        let tree = WatchTree::initialize(source, &root, None).unwrap();
        assert_eq!(handle.watched().len(), 3);

        drop(tree);
        assert!(handle.watched().is_empty());
    }

    #[test]
    fn test_overflow_is_surfaced() {
        let (_temp, root, mut tree, handle) = setup(None);
        handle.send(SourceEvent::Overflow);
        assert_eq!(drain(&mut tree, &handle), vec![Event::new(EventKind::Overflow, root, 0)]);
    }

    #[test]
    fn test_rename_over_reconciled_file_is_dispatched() {
        let (_temp, root, mut tree, handle) = setup(None);

        let dir = root.join("drop");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("report.csv"), b"first").unwrap();
        handle.dir_created(&dir);

        // Applying the directory event runs the scan.
        let first = tree.next_event(TICK).unwrap().unwrap();
        assert_eq!(first.kind, EventKind::DirectoryCreated);

        // A finished upload replaces the scanned file before its
        // notification is read.
        fs::write(dir.join("report.csv.part"), b"second upload").unwrap();
        fs::rename(dir.join("report.csv.part"), dir.join("report.csv")).unwrap();
        handle.send(SourceEvent::RenamedTo {
            path: dir.join("report.csv"),
            entry: EntryKind::File,
        });

        let events = drain(&mut tree, &handle);
        assert_eq!(
            files(&events),
            vec![dir.join("report.csv"), dir.join("report.csv")]
        );
    }

    #[test]
    fn test_handled_and_deleted_file_is_not_dispatched_again() {
        let (_temp, root, mut tree, handle) = setup(None);

        let dir = root.join("drop");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("once.txt"), b"1").unwrap();
        handle.dir_created(&dir);

        assert_eq!(tree.next_event(TICK).unwrap().unwrap().kind, EventKind::DirectoryCreated);
        let scanned = tree.next_event(TICK).unwrap().unwrap();
        assert_eq!(scanned.path, dir.join("once.txt"));

        // Processed with delete before its own notification is read.
        fs::remove_file(dir.join("once.txt")).unwrap();
        handle.file_created(dir.join("once.txt"));

        assert!(files(&drain(&mut tree, &handle)).is_empty());
    }

    #[test]
    fn test_scan_records_expire_when_source_is_idle() {
        let (_temp, root, mut tree, handle) = setup(None);

        let dir = root.join("drop");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("early.txt"), b"e").unwrap();
        handle.dir_created(&dir);

        assert_eq!(files(&drain(&mut tree, &handle)), vec![dir.join("early.txt")]);
        assert!(tree.reconciled.is_empty());

        handle.file_created(dir.join("early.txt"));
        assert_eq!(files(&drain(&mut tree, &handle)), vec![dir.join("early.txt")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_links_bypass_write_completion_gate() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::write(root.join("target.bin"), b"t").unwrap();

        let (source, handle) = MemorySource::new();
        let source = source.with_write_completion(true);
        let mut tree = WatchTree::initialize(source, &root, None).unwrap();

        // Neither kind of link is ever closed after a write.
        std::os::unix::fs::symlink(root.join("target.bin"), root.join("soft.bin")).unwrap();
        fs::hard_link(root.join("target.bin"), root.join("hard.bin")).unwrap();
        handle.file_created(root.join("soft.bin"));
        handle.file_created(root.join("hard.bin"));

        assert_eq!(
            files(&drain(&mut tree, &handle)),
            vec![root.join("soft.bin"), root.join("hard.bin")]
        );
        assert!(tree.in_creation.is_empty());
    }

    #[test]
    fn test_moved_directory_contents_are_listed_again() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().canonicalize().unwrap();
        fs::create_dir(root.join("old")).unwrap();
        fs::write(root.join("old/kept.txt"), b"k").unwrap();

        let (source, handle) = MemorySource::new();
        let mut tree = WatchTree::initialize(source, &root, None).unwrap();

        fs::rename(root.join("old"), root.join("new")).unwrap();
        handle.send(SourceEvent::Moved {
            from: root.join("old"),
            to: root.join("new"),
            entry: EntryKind::Directory,
        });

        assert_eq!(files(&drain(&mut tree, &handle)), vec![root.join("new/kept.txt")]);
    }
}

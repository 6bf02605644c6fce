//! Built-in file actions.
//!
//! Each task is an [`Action`] built from a shared [`ActionContext`]. The
//! engine only sees the boxed trait object; everything task specific
//! (destination layout, command templates, source deletion) lives here.

mod command;
mod copy;
mod video;

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub use command::CommandAction;
pub use copy::CopyAction;
pub use video::VideoAction;

use crate::watcher::Action;

/// Placeholder replaced by the source file path in command templates.
pub const SOURCE_PLACEHOLDER: &str = "%1%";

/// Placeholder replaced by the output file path in command templates.
pub const OUTPUT_PLACEHOLDER: &str = "%2%";

/// Settings every action is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionContext {
    pub watch: PathBuf,
    pub destination: Option<PathBuf>,
    pub command: Option<String>,
    pub extension: Option<String>,
    /// Remove the source file after it was processed successfully.
    pub delete_source: bool,
    pub params: BTreeMap<String, String>,
}

impl ActionContext {
    pub fn new(watch: impl Into<PathBuf>) -> Self {
        Self {
            watch: watch.into(),
            ..Self::default()
        }
    }

    /// Path of `file` below the watch folder.
    ///
    /// Events carry canonical paths, so the canonical form of the watch
    /// folder is tried too. Falls back to the bare file name.
    pub fn relative_to_watch(&self, file: &Path) -> PathBuf {
        if let Ok(rel) = file.strip_prefix(&self.watch) {
            return rel.to_path_buf();
        }
        if let Ok(canonical) = self.watch.canonicalize() {
            if let Ok(rel) = file.strip_prefix(&canonical) {
                return rel.to_path_buf();
            }
        }
        file.file_name().map(PathBuf::from).unwrap_or_default()
    }

    /// Remove `file` if source deletion is enabled.
    ///
    /// The file was already processed, so a failed delete is only logged.
    pub(crate) fn finish(&self, action: &str, file: &Path) {
        if !self.delete_source {
            return;
        }
        match fs::remove_file(file) {
            Ok(()) => crate::debug_event!(action, "deleted source", "{}", file.display()),
            Err(e) => tracing::warn!("[{action}] could not delete {}: {e}", file.display()),
        }
    }
}

/// Built-in tasks, in the order `--list` shows them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Copy,
    Video,
    Command,
}

impl TaskKind {
    pub fn all() -> &'static [TaskKind] {
        &[TaskKind::Copy, TaskKind::Video, TaskKind::Command]
    }

    /// Task number shown by `--list`.
    pub fn number(self) -> usize {
        match self {
            TaskKind::Copy => 0,
            TaskKind::Video => 1,
            TaskKind::Command => 2,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            TaskKind::Copy => "copy",
            TaskKind::Video => "video",
            TaskKind::Command => "command",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskKind::Copy => copy::NAME,
            TaskKind::Video => video::NAME,
            TaskKind::Command => command::NAME,
        }
    }

    pub fn required_parameters(self) -> &'static [&'static str] {
        match self {
            TaskKind::Copy => copy::REQUIRED,
            TaskKind::Video => video::REQUIRED,
            TaskKind::Command => command::REQUIRED,
        }
    }

    /// Resolve a task given by key (`copy`) or by number (`0`).
    pub fn parse(task: &str) -> Option<TaskKind> {
        let task = task.trim();
        Self::all().iter().copied().find(|kind| {
            kind.key().eq_ignore_ascii_case(task) || task.parse::<usize>() == Ok(kind.number())
        })
    }

    pub fn create(self, context: &ActionContext) -> Box<dyn Action> {
        match self {
            TaskKind::Copy => Box::new(CopyAction::new(context.clone())),
            TaskKind::Video => Box::new(VideoAction::new(context.clone())),
            TaskKind::Command => Box::new(CommandAction::new(context.clone())),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

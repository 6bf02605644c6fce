//! Copy new files into the destination folder.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use super::ActionContext;
use crate::watcher::{Action, Outcome};

pub(super) const NAME: &str = "Copy File";
pub(super) const REQUIRED: &[&str] = &["destination"];

/// Mirrors each file to `destination/<path below watch>`.
#[derive(Debug)]
pub struct CopyAction {
    context: ActionContext,
}

impl CopyAction {
    pub fn new(context: ActionContext) -> Self {
        Self { context }
    }

    fn copy(&self, destination: &Path, file: &Path) -> Result<PathBuf> {
        let target = destination.join(self.context.relative_to_watch(file));

        if target.exists() {
            bail!("{} already exists", target.display());
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::copy(file, &target)
            .with_context(|| format!("Failed to copy to {}", target.display()))?;

        Ok(target)
    }
}

impl Action for CopyAction {
    fn name(&self) -> &str {
        NAME
    }

    fn required_parameters(&self) -> &[&'static str] {
        REQUIRED
    }

    fn process(&mut self, file: &Path) -> Outcome {
        let Some(destination) = self.context.destination.as_deref() else {
            return Outcome::FatalFailure("no destination configured".to_string());
        };

        match self.copy(destination, file) {
            Ok(target) => {
                crate::debug_event!(NAME, "copied", "{} -> {}", file.display(), target.display());
                self.context.finish(NAME, file);
                Outcome::Success
            }
            Err(e) => Outcome::RecoverableFailure(format!("{e:#}")),
        }
    }
}

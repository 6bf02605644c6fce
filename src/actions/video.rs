//! Convert video files with HandBrake.

use std::path::{Path, PathBuf};

use super::command::run_shell;
use super::{ActionContext, OUTPUT_PLACEHOLDER, SOURCE_PLACEHOLDER};
use crate::watcher::{Action, Outcome};

pub(super) const NAME: &str = "Video File Conversion";
pub(super) const REQUIRED: &[&str] = &["destination"];

pub const DEFAULT_TEMPLATE: &str = "HandBrakeCLI -i %1% -o %2% --preset=\"Very Fast 1080p30\"";
pub const DEFAULT_EXTENSION: &str = "mp4";

/// Runs a conversion command writing `destination/<stem>.<extension>`.
#[derive(Debug)]
pub struct VideoAction {
    context: ActionContext,
}

impl VideoAction {
    pub fn new(context: ActionContext) -> Self {
        Self { context }
    }

    fn template(&self) -> &str {
        self.context.command.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }

    /// Output path for `file`: same stem, configured extension.
    pub fn output_path(&self, destination: &Path, file: &Path) -> PathBuf {
        let extension = self
            .context
            .extension
            .as_deref()
            .map(|ext| ext.trim_start_matches('.'))
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_EXTENSION);

        // Appended rather than `with_extension` so dotted stems stay whole.
        let mut name = file.file_stem().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(extension);
        destination.join(name)
    }
}

impl Action for VideoAction {
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

        let output = self.output_path(destination, file);
        let command_line = self
            .template()
            .replace(SOURCE_PLACEHOLDER, &file.to_string_lossy())
            .replace(OUTPUT_PLACEHOLDER, &output.to_string_lossy());

        let outcome = run_shell(NAME, &command_line);
        if outcome.is_success() {
            crate::debug_event!(NAME, "converted", "{}", output.display());
            self.context.finish(NAME, file);
        }
        outcome
    }
}

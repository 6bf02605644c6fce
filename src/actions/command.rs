//! Run a shell command for each file.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};

use super::{ActionContext, SOURCE_PLACEHOLDER};
use crate::watcher::{Action, Outcome};

pub(super) const NAME: &str = "Run Command";
pub(super) const REQUIRED: &[&str] = &["command"];

/// Runs the configured command template with `%1%` set to the new file.
#[derive(Debug)]
pub struct CommandAction {
    context: ActionContext,
}

impl CommandAction {
    pub fn new(context: ActionContext) -> Self {
        Self { context }
    }
}

impl Action for CommandAction {
    fn name(&self) -> &str {
        NAME
    }

    fn required_parameters(&self) -> &[&'static str] {
        REQUIRED
    }

    fn process(&mut self, file: &Path) -> Outcome {
        let Some(template) = self.context.command.as_deref() else {
            return Outcome::FatalFailure("no command configured".to_string());
        };

        let command_line = template.replace(SOURCE_PLACEHOLDER, &file.to_string_lossy());
        let outcome = run_shell(NAME, &command_line);
        if outcome.is_success() {
            self.context.finish(NAME, file);
        }
        outcome
    }
}

/// Run `command_line` through `sh -c` and classify the result.
///
/// A shell that cannot be started is fatal; a command that exits non-zero
/// only fails this file.
pub(super) fn run_shell(action: &str, command_line: &str) -> Outcome {
    crate::debug_event!(action, "running", "{command_line}");

    let output = match spawn_shell(command_line) {
        Ok(output) => output,
        Err(e) => return Outcome::FatalFailure(format!("{e:#}")),
    };

    if output.status.success() {
        return Outcome::Success;
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Outcome::RecoverableFailure(format!(
        "command exited with {}: {}",
        output.status,
        stderr.trim()
    ))
}

fn spawn_shell(command_line: &str) -> Result<Output> {
    Command::new("sh")
        .arg("-c")
        .arg(command_line)
        .output()
        .with_context(|| format!("Failed to start shell for: {command_line}"))
}

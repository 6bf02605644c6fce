//! Action trait and outcome types for the dispatch engine.

use std::path::Path;

/// Result of processing one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The file was processed; counts towards the kill count.
    Success,

    /// This file failed; the engine logs it and moves on.
    RecoverableFailure(String),

    /// The engine must stop. The detail is kept as the run's last error.
    FatalFailure(String),
}

impl Outcome {
    /// Wrap a fallible step as a recoverable outcome.
    pub fn recoverable<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(e) => Outcome::RecoverableFailure(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// A unit of work executed once per newly arrived file.
///
/// The engine never looks at action-specific parameters. It only calls
/// [`process`](Action::process) and interprets the returned [`Outcome`].
pub trait Action: Send {
    /// Action name for logging.
    fn name(&self) -> &str;

    /// Parameters the configuration layer must supply before the engine
    /// starts.
    fn required_parameters(&self) -> &[&'static str] {
        &[]
    }

    /// Process one file. Called sequentially, never concurrently.
    fn process(&mut self, file: &Path) -> Outcome;
}

impl<A: Action + ?Sized> Action for Box<A> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn required_parameters(&self) -> &[&'static str] {
        (**self).required_parameters()
    }

    fn process(&mut self, file: &Path) -> Outcome {
        (**self).process(file)
    }
}

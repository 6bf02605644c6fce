//! Run the engine with the selected task.

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::logging;
use crate::watcher::{DispatchEngine, StopReason};

/// Validate settings, start the engine and block until it stops.
///
/// Returns the stop reason for a normal stop; any fatal error is returned
/// as `Err`.
pub fn run_engine(mut settings: Settings) -> Result<StopReason> {
    logging::init_with_config(&settings.effective_logging(), settings.log.as_deref())
        .with_context(|| match &settings.log {
            Some(path) => format!("Cannot open log file {}", path.display()),
            None => "Cannot initialize logging".to_string(),
        })?;

    let task = settings.task_kind()?;
    settings.check_task_parameters(task.required_parameters())?;
    settings.prepare()?;

    crate::log_event!("fpe", "starting", "File Processing Engine {}", env!("CARGO_PKG_VERSION"));
    for (name, value) in settings.run_options(task.name()) {
        if value.is_empty() {
            tracing::info!("*** {name} ***");
        } else {
            tracing::info!("*** {name} = [{value}] ***");
        }
    }

    let action = task.create(&settings.action_context()?);
    let mut engine = DispatchEngine::initialize(settings.engine_config()?, action)?;

    let reason = engine.monitor()?;
    crate::log_event!(
        "fpe",
        "finished",
        "{reason:?} after {} files",
        engine.processed_count()
    );
    Ok(reason)
}

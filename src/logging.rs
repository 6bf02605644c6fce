//! Unified logging for engine and task output.
//!
//! Provides compact timestamped logging with per-module level configuration.
//! Supports `RUST_LOG` environment variable for runtime overrides.
//!
//! # Configuration
//!
//! ```toml
//! quiet = false        # true lowers the default to "warn"
//! log = "/var/log/fpe.log"
//!
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! "fpe::watcher" = "debug"
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug fpe -w inbox -t copy -d outbox
//! RUST_LOG=fpe::watcher=trace fpe -c fpe.toml
//! ```

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter from `RUST_LOG` if set, otherwise from the configuration.
pub fn filter_for(config: &LoggingConfig) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.directives())
    }
}

/// Initialize logging with configuration.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
///
/// Output goes to stderr, or is appended to `log_file` without colors when
/// one is given. Fails only if the log file cannot be opened.
pub fn init_with_config(config: &LoggingConfig, log_file: Option<&Path>) -> io::Result<()> {
    let file = log_file.map(open_log_file).transpose()?;

    INIT.call_once(|| {
        let filter = filter_for(config);

        let (stderr_layer, file_layer) = match file {
            Some(file) => (
                None,
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_timer(CompactTime)
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                ),
            ),
            None => (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_timer(CompactTime)
                        .with_writer(io::stderr),
                ),
                None,
            ),
        };

        // A subscriber installed by an embedding program wins.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("engine", "running", "{}", root.display());
/// log_event!("engine", "stopped");
/// ```
#[macro_export]
macro_rules! log_event {
    ($handler:expr, $event:expr) => {
        tracing::info!("[{}] {}", $handler, $event)
    };
    ($handler:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $handler, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("tree", "watching", "{}", path.display());
/// ```
#[macro_export]
macro_rules! debug_event {
    ($handler:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $handler, $event)
    };
    ($handler:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $handler, $event, format!($($arg)*))
    };
}

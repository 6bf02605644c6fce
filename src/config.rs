//! Configuration for the file processing engine.
//!
//! Settings are layered, later layers winning:
//! - Default values
//! - TOML configuration file (`--config`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the caller)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `FPE_` and use double
//! underscores to separate nested levels:
//! - `FPE_KILL_COUNT=10` sets `kill_count`
//! - `FPE_LOGGING__DEFAULT=debug` sets `logging.default`
//! - `FPE_PARAMS__MAILBOX=Inbox` sets `params.mailbox`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::actions::{ActionContext, TaskKind};
use crate::watcher::EngineConfig;

const ENV_PREFIX: &str = "FPE_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("Specified config file [{path}] does not exist.")]
    ConfigNotFound { path: PathBuf },

    #[error("No watch folder specified.")]
    MissingWatch,

    #[error("No task specified.")]
    MissingTask,

    #[error("Error invalid task '{task}'.")]
    InvalidTask { task: String },

    #[error("Task option '{name}' missing.")]
    MissingParameter { name: String },

    #[error("Cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot render settings: {0}")]
    Render(#[from] toml::ser::Error),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Folder to watch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch: Option<PathBuf>,

    /// Destination folder for tasks that write output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,

    /// Task key (`copy`) or number (`0`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Shell command template for the command and video tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Output extension override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    /// Deepest watched level below the watch folder, -1 for unbounded
    #[serde(default = "default_max_depth")]
    pub max_depth: i64,

    /// Stop after this many processed files, 0 for unbounded
    #[serde(default)]
    pub kill_count: u64,

    /// Run the task on the main thread
    #[serde(default)]
    pub single: bool,

    /// Only log warnings and errors
    #[serde(default)]
    pub quiet: bool,

    /// Delete the source file after processing
    #[serde(default)]
    pub delete: bool,

    /// Append log output to this file instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Extra task parameters, passed through untouched
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `fpe::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_max_depth() -> i64 {
    -1
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch: None,
            destination: None,
            task: None,
            command: None,
            extension: None,
            max_depth: default_max_depth(),
            kill_count: 0,
            single: false,
            quiet: false,
            delete: false,
            log: None,
            logging: LoggingConfig::default(),
            params: BTreeMap::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    /// `EnvFilter` directives: the default level, then module overrides.
    pub fn directives(&self) -> String {
        let mut modules: Vec<_> = self.modules.iter().collect();
        modules.sort();

        let mut filter = self.default.clone();
        for (module, level) in modules {
            filter.push_str(&format!(",{module}={level}"));
        }
        filter
    }
}

impl Settings {
    /// Load defaults and environment overrides, plus `config` when given.
    pub fn layered(config: Option<&Path>) -> Result<Self, ConfigError> {
        match config {
            Some(path) if !path.exists() => Err(ConfigError::ConfigNotFound {
                path: path.to_path_buf(),
            }),
            Some(path) => Self::load_from(path),
            None => Self::extract(Figment::new().merge(Serialized::defaults(Settings::default()))),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Settings::default()))
                .merge(Toml::file(path)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            // Double underscore separates nested levels; single underscores
            // stay inside field names.
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(|e| ConfigError::Figment(Box::new(e)))
    }

    /// Value of a named option or task parameter, if set and non-empty.
    pub fn parameter(&self, name: &str) -> Option<String> {
        let value = match name {
            "watch" => self.watch.as_ref().map(|p| p.display().to_string()),
            "destination" => self.destination.as_ref().map(|p| p.display().to_string()),
            "task" => self.task.clone(),
            "command" => self.command.clone(),
            "extension" => self.extension.clone(),
            "log" => self.log.as_ref().map(|p| p.display().to_string()),
            other => self.params.get(other).cloned(),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Resolve the configured task.
    pub fn task_kind(&self) -> Result<TaskKind, ConfigError> {
        let task = self
            .task
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingTask)?;
        TaskKind::parse(task).ok_or_else(|| ConfigError::InvalidTask {
            task: task.to_string(),
        })
    }

    /// Fail on the first required parameter that is missing or empty.
    pub fn check_task_parameters(&self, required: &[&str]) -> Result<(), ConfigError> {
        match required.iter().find(|name| self.parameter(name).is_none()) {
            Some(name) => Err(ConfigError::MissingParameter {
                name: name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Make the watch and destination folders absolute and create them.
    pub fn prepare(&mut self) -> Result<(), ConfigError> {
        let watch = self.watch.as_deref().ok_or(ConfigError::MissingWatch)?;
        let watch = absolute(watch)?;
        create_folder(&watch)?;
        self.watch = Some(watch);

        if let Some(destination) = self.destination.as_deref() {
            let destination = absolute(destination)?;
            create_folder(&destination)?;
            self.destination = Some(destination);
        }
        Ok(())
    }

    /// Depth limit for the engine; negative values mean unbounded.
    pub fn max_depth_limit(&self) -> Option<usize> {
        EngineConfig::depth_limit(self.max_depth)
    }

    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let watch = self.watch.clone().ok_or(ConfigError::MissingWatch)?;
        let mut config = EngineConfig::new(watch)
            .with_max_depth(self.max_depth_limit())
            .with_kill_count(self.kill_count)
            .on_caller_thread(self.single);
        if let Some(destination) = &self.destination {
            config = config.with_destination(destination);
        }
        config.params = self.params.clone();
        Ok(config)
    }

    pub fn action_context(&self) -> Result<ActionContext, ConfigError> {
        let watch = self.watch.clone().ok_or(ConfigError::MissingWatch)?;
        Ok(ActionContext {
            watch,
            destination: self.destination.clone(),
            command: self.parameter("command"),
            extension: self.parameter("extension"),
            delete_source: self.delete,
            params: self.params.clone(),
        })
    }

    /// Run options worth showing at startup, as `(name, value)` pairs.
    ///
    /// Empty options are skipped; flags appear by name only.
    pub fn run_options(&self, task_name: &str) -> Vec<(&'static str, String)> {
        let mut options: Vec<(&'static str, String)> = Vec::new();
        options.push(("task", task_name.to_string()));
        for name in ["watch", "destination", "command", "extension", "log"] {
            if let Some(value) = self.parameter(name) {
                options.push((name, value));
            }
        }
        if self.max_depth >= 0 {
            options.push(("maxdepth", self.max_depth.to_string()));
        }
        if self.kill_count > 0 {
            options.push(("killcount", self.kill_count.to_string()));
        }
        for (flag, set) in [
            ("quiet", self.quiet),
            ("delete", self.delete),
            ("single", self.single),
        ] {
            if set {
                options.push((flag, String::new()));
            }
        }
        options
    }

    /// Logging configuration with `quiet` applied.
    pub fn effective_logging(&self) -> LoggingConfig {
        let mut logging = self.logging.clone();
        if self.quiet {
            logging.default = "warn".to_string();
        }
        logging
    }

    /// Effective settings as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Absolute, lexically normalized form of `path`. Symlinks are kept.
fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    let absolute = std::path::absolute(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }
    Ok(normal)
}

fn create_folder(path: &Path) -> Result<(), ConfigError> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    crate::log_event!("config", "created folder", "{}", path.display());
    Ok(())
}

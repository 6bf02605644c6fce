//! CLI argument parsing using clap.
//!
//! Every option can also come from the config file or `FPE_*` environment
//! variables; values given here win.

use clap::{
    Parser,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::Settings;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// File Processing Engine
#[derive(Parser, Debug, Default)]
#[command(
    name = "fpe",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch a folder and run a task on every new file",
    long_about = "Watch a folder (and folders created inside it) and run a task on every new file.",
    next_line_help = true,
    styles = clap_cargo_style(),
    after_help = "Examples:\n  fpe --list\n  fpe -w inbox -d outbox -t copy --delete\n  fpe -w videos -d converted -t video -e mkv\n  fpe -w drop -t command --command \"gzip %1%\" -k 10\n  fpe -c fpe.toml --show-config"
)]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Folder to watch
    #[arg(short, long)]
    pub watch: Option<PathBuf>,

    /// Destination folder for processed files
    #[arg(short, long)]
    pub destination: Option<PathBuf>,

    /// Task key or number (see --list)
    #[arg(short, long)]
    pub task: Option<String>,

    /// Shell command template; %1% is the new file
    #[arg(long)]
    pub command: Option<String>,

    /// Maximum watch depth below the watch folder (-1 = unbounded)
    #[arg(long = "maxdepth", allow_negative_numbers = true, value_name = "DEPTH")]
    pub max_depth: Option<i64>,

    /// Override destination file extension
    #[arg(short, long)]
    pub extension: Option<String>,

    /// Only log warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Delete source file after successful processing
    #[arg(long)]
    pub delete: bool,

    /// Append log output to this file
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Run the task on the main thread
    #[arg(short, long)]
    pub single: bool,

    /// Stop after this many processed files (0 = run until stopped)
    #[arg(short = 'k', long = "killcount", value_name = "COUNT")]
    pub kill_count: Option<u64>,

    /// Extra task parameter, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Display a list of supported tasks
    #[arg(long)]
    pub list: bool,

    /// Print the effective settings as TOML and exit
    #[arg(long)]
    pub show_config: bool,
}

impl Cli {
    /// Apply options given on the command line on top of `settings`.
    ///
    /// Flags only ever switch a setting on.
    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(watch) = &self.watch {
            settings.watch = Some(watch.clone());
        }
        if let Some(destination) = &self.destination {
            settings.destination = Some(destination.clone());
        }
        if let Some(task) = &self.task {
            settings.task = Some(task.clone());
        }
        if let Some(command) = &self.command {
            settings.command = Some(command.clone());
        }
        if let Some(extension) = &self.extension {
            settings.extension = Some(extension.clone());
        }
        if let Some(max_depth) = self.max_depth {
            settings.max_depth = max_depth;
        }
        if let Some(kill_count) = self.kill_count {
            settings.kill_count = kill_count;
        }
        if let Some(log) = &self.log {
            settings.log = Some(log.clone());
        }
        settings.quiet |= self.quiet;
        settings.delete |= self.delete;
        settings.single |= self.single;

        for (key, value) in &self.params {
            settings.params.insert(key.clone(), value.clone());
        }
    }
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

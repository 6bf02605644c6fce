//! Settings loading and `--show-config`.

use anyhow::{Context, Result};

use crate::cli::Cli;
use crate::config::Settings;

/// Layered settings with the command line applied last.
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::layered(cli.config.as_deref())?;
    cli.apply_to(&mut settings);
    Ok(settings)
}

/// Print the effective settings.
pub fn run_show_config(settings: &Settings) -> Result<()> {
    let rendered = settings
        .to_toml()
        .context("Error displaying config")?;
    println!("{rendered}");
    Ok(())
}

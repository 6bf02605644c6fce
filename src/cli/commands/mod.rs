//! Command implementations for the CLI.
//!
//! `--list` and `--show-config` print and exit; everything else runs the
//! engine.

pub mod config;
pub mod list;
pub mod run;

use anyhow::Result;

use super::Cli;

/// Dispatch on the parsed command line.
pub fn dispatch(cli: &Cli) -> Result<()> {
    if cli.list {
        list::run_list(&mut std::io::stdout())?;
        return Ok(());
    }

    let settings = config::load_settings(cli)?;

    if cli.show_config {
        config::run_show_config(&settings)?;
        return Ok(());
    }

    run::run_engine(settings)?;
    Ok(())
}

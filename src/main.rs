use clap::Parser;
use std::process::ExitCode;

use fpe::cli::{Cli, commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match commands::dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("FPE Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

//! Command-line interface for the file processing engine.
//!
//! Provides argument parsing and command dispatch.

pub mod args;
pub mod commands;

pub use args::Cli;

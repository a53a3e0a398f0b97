//! Command-line interface of podkeeper.
//!
//! Argument parsing and the formatting of reports for the terminal.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::OutputFormatter;

//! Tooling
//!
//! Command-line entry points and console helpers for running a system from a
//! terminal.

pub mod cli;

pub use cli::{render_default_config, Cli, CliContext, ConsolePrinter};

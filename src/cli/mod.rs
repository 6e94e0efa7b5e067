//! Command-line interface for labforge.
//!
//! Provides commands for serving the API, checking the environment, and
//! managing report history.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};

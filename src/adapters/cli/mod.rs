//! CLI Adapter
//!
//! Command-line interface for pump-scout.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{CliApp, Command, ProfilesCmd, RunCmd, ScanCmd, DEFAULT_CONFIG_PATH};

/// Parse the command line
pub fn init() -> CliApp {
    use clap::Parser;
    CliApp::parse()
}

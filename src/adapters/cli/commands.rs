//! CLI Command Definitions
//!
//! Argument structures for every pump-scout subcommand.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "config/scout.toml";

/// pump-scout - Token discovery scanner for Solana
#[derive(Parser, Debug)]
#[command(
    name = "pump-scout",
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = "Token discovery scanner for Solana",
    long_about = "pump-scout polls new, graduated and trending token feeds, enriches each \
                  candidate with market data under rate limits and a circuit breaker, and \
                  alerts on the ones that pass a threshold profile."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Poll every configured scan until interrupted
    Run(RunCmd),

    /// Run a single cycle and print the result
    Scan(ScanCmd),

    /// Show the configured filter profiles
    Profiles(ProfilesCmd),
}

/// Continuous polling
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override poll interval (seconds)
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,

    /// Log alerts only, without JSON lines on stdout
    #[arg(long)]
    pub no_json: bool,
}

/// One-shot scan
#[derive(Parser, Debug)]
pub struct ScanCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Only run scans using this profile
    #[arg(short, long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Override the lookback window (seconds)
    #[arg(long, value_name = "SECS")]
    pub lookback: Option<u64>,

    /// Override the result limit
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Include the stage report for each scan
    #[arg(long)]
    pub report: bool,
}

/// Profile listing
#[derive(Parser, Debug)]
pub struct ProfilesCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,
}

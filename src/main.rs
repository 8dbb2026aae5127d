//! pump-scout - Token discovery scanner for Solana
//!
//! Polls token feeds, enriches candidates with market data and alerts on
//! the ones that pass a threshold profile.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use pump_scout::adapters::cli::{self, Command, ProfilesCmd, RunCmd, ScanCmd};
use pump_scout::adapters::{BirdeyeMetadata, BitqueryDiscovery, LogAlertSink};
use pump_scout::application::{FetchWindow, Pipeline, PipelineRunner, ScanJob};
use pump_scout::config::{load_config, Config};
use pump_scout::domain::{Constraint, FilterProfile};
use pump_scout::ports::{DiscoverySource, MetadataSource};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (API keys go here, not in the config file)
    dotenvy::dotenv().ok();

    let app = cli::init();

    let config_path = match &app.command {
        Command::Run(cmd) => &cmd.config,
        Command::Scan(cmd) => &cmd.config,
        Command::Profiles(cmd) => &cmd.config,
    };
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    init_logging(app.verbose, app.debug, &config.logging.level)?;

    match app.command {
        Command::Run(cmd) => run_command(cmd, config).await,
        Command::Scan(cmd) => scan_command(cmd, config).await,
        Command::Profiles(cmd) => profiles_command(cmd, config),
    }
}

/// RUST_LOG wins; otherwise --debug, then --verbose, then the config level
fn init_logging(verbose: bool, debug: bool, level: &str) -> Result<()> {
    let fallback = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        level
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // stdout is reserved for alert and scan JSON
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Optional overrides applied to every selected scan
#[derive(Default)]
struct ScanOverrides<'a> {
    profile: Option<&'a str>,
    lookback_secs: Option<u64>,
    limit: Option<usize>,
}

fn build_jobs(config: &Config, overrides: &ScanOverrides<'_>) -> Result<Vec<ScanJob>> {
    let profiles = config.filter_profiles()?;

    if config.metadata.get_api_key().is_none() {
        tracing::warn!("No Birdeye API key (metadata.api_key or BIRDEYE_API_KEY); enrichment will fail");
    }
    if config.discovery.get_api_key().is_none() {
        tracing::warn!("No Bitquery API key (discovery.api_key or BITQUERY_API_KEY); discovery will fail");
    }

    let mut jobs = Vec::new();
    for scan in &config.scans {
        if overrides.profile.is_some_and(|p| p != scan.profile) {
            continue;
        }

        let profile = profiles
            .get(&scan.profile)
            .cloned()
            .with_context(|| format!("Unknown profile '{}'", scan.profile))?;

        let window = FetchWindow::new(
            Duration::from_secs(overrides.lookback_secs.unwrap_or(scan.lookback_secs)),
            overrides.limit.unwrap_or(scan.limit),
        )
        .with_context(|| format!("Invalid window for scan '{}'", scan.profile))?;

        let discovery: Arc<dyn DiscoverySource> = Arc::new(
            BitqueryDiscovery::new(scan.feed, config.discovery.to_bitquery_config())
                .context("Failed to create Bitquery client")?,
        );
        let metadata: Arc<dyn MetadataSource> = Arc::new(
            BirdeyeMetadata::new(config.metadata.to_birdeye_config(&profile))
                .context("Failed to create Birdeye client")?,
        );

        jobs.push(ScanJob {
            pipeline: Pipeline::with_config(discovery, metadata, config.pipeline_config()),
            window,
            profile,
        });
    }

    Ok(jobs)
}

async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    tracing::info!("Starting pump-scout...");

    let interval = match cmd.interval {
        Some(0) => bail!("--interval must be > 0"),
        Some(secs) => Duration::from_secs(secs),
        None => config.poll_interval(),
    };

    let jobs = build_jobs(&config, &ScanOverrides::default())?;
    if jobs.is_empty() {
        bail!("No [[scan]] entries configured");
    }

    for job in &jobs {
        tracing::info!(
            "Scan: feed={} profile={} lookback={:?} limit={}",
            job.pipeline.feed(),
            job.profile.name(),
            job.window.lookback(),
            job.window.max_results()
        );
    }

    let sink = Arc::new(LogAlertSink::new().with_json_lines(config.pipeline.json_alerts && !cmd.no_json));
    let runner = Arc::new(
        PipelineRunner::new(jobs, sink, config.enrichment.max_concurrency).with_poll_interval(interval),
    );

    // Setup Ctrl+C handler
    let handle = runner.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        handle.stop().await;
    });

    runner.run().await;
    tracing::info!("pump-scout stopped after {} round(s)", runner.cycles_completed());
    Ok(())
}

async fn scan_command(cmd: ScanCmd, config: Config) -> Result<()> {
    let overrides = ScanOverrides {
        profile: cmd.profile.as_deref(),
        lookback_secs: cmd.lookback,
        limit: cmd.limit,
    };

    let jobs = build_jobs(&config, &overrides)?;
    if jobs.is_empty() {
        match cmd.profile {
            Some(name) => bail!("No scan uses profile '{}'", name),
            None => bail!("No [[scan]] entries configured"),
        }
    }

    let mut results = Vec::with_capacity(jobs.len());
    for job in &jobs {
        let (passed, report) = job
            .pipeline
            .run_cycle_with_report(&job.window, &job.profile, config.enrichment.max_concurrency)
            .await;

        let mut entry = serde_json::json!({
            "profile": job.profile.name(),
            "feed": job.pipeline.feed(),
            "candidates": passed,
        });
        if cmd.report {
            entry["report"] = serde_json::to_value(&report)?;
        }
        results.push(entry);
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn profiles_command(cmd: ProfilesCmd, config: Config) -> Result<()> {
    let profiles = config.filter_profiles()?;

    match cmd.format.as_str() {
        "json" => {
            let list: Vec<&FilterProfile> = profiles.values().map(|p| p.as_ref()).collect();
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        "text" => {
            for profile in profiles.values() {
                print_profile(profile, &config);
            }
        }
        other => bail!("Unknown format '{}' (expected text or json)", other),
    }

    Ok(())
}

fn print_profile(profile: &FilterProfile, config: &Config) {
    let feeds: Vec<String> = config
        .scans
        .iter()
        .filter(|s| s.profile == profile.name())
        .map(|s| s.feed.to_string())
        .collect();

    println!("{}", profile.name());
    if feeds.is_empty() {
        println!("  feeds: (not scanned)");
    } else {
        println!("  feeds: {}", feeds.join(", "));
    }
    for (metric, constraint) in profile.constraints() {
        println!("  {:<14} {}", metric.label(), describe(constraint));
    }
    println!();
}

fn describe(constraint: &Constraint) -> String {
    match constraint {
        Constraint::Min(min) => format!(">= {}", min),
        Constraint::Max(max) => format!("<= {}", max),
        Constraint::Range { min, max } => format!("{} ..= {}", min, max),
    }
}

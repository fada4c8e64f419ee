//! Watchpost CLI entry point.
//!
//! Provides `start`, `once`, and `validate` subcommands for running cycles on
//! a timer, running a single cycle, or checking the configuration.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use watchpost::config::{self, Config, CONFIG_ENV};
use watchpost::cooldown::CooldownTracker;
use watchpost::credentials;
use watchpost::dispatcher::ProcessRunner;
use watchpost::fetcher::HttpFetcher;
use watchpost::registry::Registry;
use watchpost::scout::Scout;

/// Lowest accepted `--interval-ms`.
const MIN_INTERVAL_MS: u64 = 100;

/// Watchpost: poll endpoints, evaluate predicates, run remediation commands.
#[derive(Parser)]
#[command(name = "watchpost", version, about)]
struct Cli {
    /// Path to config.toml or config.json.
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run cycles on a fixed interval until interrupted.
    Start {
        /// Override `schedule.interval_ms` from the config file.
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Directory for rotated JSON logs.
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Run exactly one cycle and exit.
    Once,
    /// Load and validate the configuration, then print a summary.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start {
            interval_ms,
            log_dir,
        } => handle_start(cli.config.as_deref(), interval_ms, log_dir).await,
        Command::Once => handle_once(cli.config.as_deref()).await,
        Command::Validate => handle_validate(cli.config.as_deref()),
    }
}

/// Resolve, parse and validate the configuration into a registry.
fn load(explicit: Option<&Path>) -> anyhow::Result<(PathBuf, Config, Registry)> {
    let path = config::resolve_config_path(explicit)?;
    let config = config::load_config(&path)?;
    let credentials = credentials::load_for_config(&path)
        .with_context(|| format!("failed to load credentials for {}", path.display()))?;
    let registry = Registry::from_config(&config.targets, &credentials)
        .with_context(|| format!("invalid configuration in {}", path.display()))?;

    info!(
        config = %path.display(),
        targets = registry.targets().len(),
        rules = registry.rule_count(),
        "configuration loaded"
    );
    Ok((path, config, registry))
}

fn build_scout(config: &Config) -> anyhow::Result<Scout> {
    let fetcher = HttpFetcher::new(Duration::from_secs(config.http.timeout_secs))
        .context("failed to build HTTP client")?;
    Ok(Scout::new(Arc::new(fetcher), Arc::new(ProcessRunner)))
}

/// Run cycles until Ctrl-C or SIGTERM.
async fn handle_start(
    explicit: Option<&Path>,
    interval_ms: Option<u64>,
    log_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let logs_dir = match log_dir {
        Some(dir) => dir,
        None => config::default_logs_dir()?,
    };
    let _logging_guard = watchpost::logging::init_production(&logs_dir)?;

    let (_path, config, registry) = load(explicit)?;
    let interval_ms = interval_ms.unwrap_or(config.schedule.interval_ms);
    anyhow::ensure!(
        interval_ms >= MIN_INTERVAL_MS,
        "--interval-ms must be >= {MIN_INTERVAL_MS}"
    );

    let scout = build_scout(&config)?;
    let mut cooldowns = CooldownTracker::new();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    scout
        .run_scheduled(
            &registry,
            &mut cooldowns,
            Duration::from_millis(interval_ms),
            shutdown_rx,
        )
        .await;
    Ok(())
}

/// Run a single cycle and exit. Rule failures do not change the exit status.
async fn handle_once(explicit: Option<&Path>) -> anyhow::Result<()> {
    watchpost::logging::init_cli();

    let (_path, config, registry) = load(explicit)?;
    let scout = build_scout(&config)?;
    let mut cooldowns = CooldownTracker::new();
    scout.run_cycle(&registry, &mut cooldowns).await?;
    Ok(())
}

/// Validate the configuration and print one line per target and rule.
fn handle_validate(explicit: Option<&Path>) -> anyhow::Result<()> {
    watchpost::logging::init_cli();

    let (path, _config, registry) = load(explicit)?;
    println!("{}: ok", path.display());
    for target in registry.targets() {
        println!(
            "target {} ({}://{}:{}): {} rule(s)",
            target.label(),
            target.protocol.scheme(),
            target.host,
            target.port,
            target.rules.len()
        );
        for rule in &target.rules {
            println!(
                "  rule {}: {} {} cooldown={}ms actions={}",
                rule.id,
                rule.request.method,
                rule.request.path,
                rule.cooldown.as_millis(),
                rule.actions.len()
            );
        }
    }
    Ok(())
}

/// Resolve when Ctrl-C (or SIGTERM on unix) arrives.
///
/// If a signal handler cannot be installed this never resolves, so the
/// process keeps running rather than shutting down at once.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    () = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

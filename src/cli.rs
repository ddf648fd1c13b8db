//! Command-line interface module for export-watchdog.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Configuration loading and overrides
//! - Dispatch to the watch service or the one-shot commands

use crate::clock::SystemClock;
use crate::config::{Settings, WatchdogConfig};
use crate::logging::{LogConfig, init_logging};
use crate::output::{OutputFormatter, tally};
use crate::router::RouteResult;
use crate::service::{bootstrap, build_router, run_service};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Parser)]
#[command(
    name = "export-watchdog",
    version,
    about = "Files recurring export downloads into the export tree"
)]
pub struct Cli {
    /// Configuration file (defaults to .export-watchdog.toml, then ~/.config/export-watchdog/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Root of the destination tree
    #[arg(long, global = true)]
    pub export_root: Option<PathBuf>,

    /// Folder to monitor; repeat for several. Replaces the configured list.
    #[arg(long = "watch", global = true)]
    pub watch_folders: Vec<PathBuf>,

    /// Directory for the rotating log file
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log debug details
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Scan existing files, then follow new ones until interrupted (default)
    Watch,
    /// Route files already in the monitored folders and exit
    Scan {
        /// Show where files would go without moving them
        #[arg(long)]
        dry_run: bool,
    },
    /// List the routing rules in evaluation order
    Rules {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which rule a file name matches and where it would be filed
    Route {
        filename: String,
    },
}

impl Cli {
    /// Loads the configuration file and applies command-line overrides.
    pub fn settings(&self) -> Result<Settings> {
        let mut config = WatchdogConfig::load(self.config.as_deref())
            .context("Error loading configuration")?;

        if let Some(root) = &self.export_root {
            config.export_root = Some(root.clone());
        }
        if !self.watch_folders.is_empty() {
            config.watch_folders = Some(self.watch_folders.clone());
        }
        if let Some(log_dir) = &self.log_dir {
            config.log_dir = Some(log_dir.clone());
        }

        config
            .compile()
            .context("Error resolving configuration")
    }
}

/// Runs the CLI application.
pub fn run_cli(cli: Cli) -> Result<()> {
    let settings = cli.settings()?;
    let command = cli.command.clone().unwrap_or(Command::Watch);

    match command {
        Command::Watch => {
            init_logging(LogConfig {
                log_dir: &settings.log_dir,
                verbose: cli.verbose,
                quiet_console: false,
            })?;
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = shutdown.clone();
            ctrlc::set_handler(move || {
                tracing::info!("received interrupt, stopping");
                flag.store(true, Ordering::SeqCst);
            })
            .context("Failed to install Ctrl+C handler")?;
            run_service(&settings, shutdown)
        }
        Command::Scan { dry_run } => {
            init_logging(LogConfig {
                log_dir: &settings.log_dir,
                verbose: cli.verbose,
                quiet_console: !cli.verbose,
            })?;
            scan_once(&settings, dry_run)
        }
        Command::Rules { json } => print_rules(&settings, json),
        Command::Route { filename } => route_name(&settings, &filename),
    }
}

/// Routes every matching file in the monitored folders once.
fn scan_once(settings: &Settings, dry_run: bool) -> Result<()> {
    if dry_run {
        OutputFormatter::dry_run_notice("No files will be moved.");
    } else {
        bootstrap(settings)?;
    }

    let mut router = build_router(settings, Arc::new(SystemClock), dry_run);
    let progress = OutputFormatter::create_progress_bar(settings.watch_folders.len() as u64);
    let mut results: Vec<RouteResult> = Vec::new();

    for folder in &settings.watch_folders {
        progress.set_message(folder.display().to_string());
        results.extend(router.scan(std::slice::from_ref(folder)));
        progress.inc(1);
    }
    progress.finish_and_clear();

    for routed in results.iter().filter_map(RouteResult::routed) {
        let name = routed
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match &routed.outcome {
            None => OutputFormatter::plain(&format!(
                " - {} → {}",
                name,
                routed.destination.display()
            )),
            Some(outcome) if outcome.is_success() => OutputFormatter::success(&format!(
                "{} → {}",
                name,
                routed.destination.display()
            )),
            Some(outcome) if outcome.is_skipped() => {
                OutputFormatter::warning(&format!("{}: {}", name, outcome))
            }
            Some(outcome) => OutputFormatter::error(&format!("{}: {}", name, outcome)),
        }
    }

    OutputFormatter::summary_table(&tally(&results));
    Ok(())
}

fn print_rules(settings: &Settings, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(settings.rules.rules())
            .context("Failed to serialize rules")?;
        println!("{}", rendered);
    } else {
        OutputFormatter::info(&format!("Export root: {}", settings.export_root.display()));
        OutputFormatter::rules_table(settings.rules.rules());
    }
    Ok(())
}

fn route_name(settings: &Settings, filename: &str) -> Result<()> {
    let router = build_router(settings, Arc::new(SystemClock), true);
    if settings.filters.is_ignored(filename) {
        OutputFormatter::warning(&format!("{} matches an ignore pattern", filename));
        return Ok(());
    }
    match router.plan(filename) {
        Some((rule, destination)) => {
            OutputFormatter::success(&format!("{} matches rule {}", filename, rule.id));
            OutputFormatter::plain(&format!("   → {}", destination.display()));
        }
        None => OutputFormatter::warning(&format!("{} matches no rule", filename)),
    }
    Ok(())
}

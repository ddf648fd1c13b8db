//! Routing of observed files to their destination in the export tree.
//!
//! [`ExportRouter`] is the piece that ties everything together. For each
//! observed path it:
//! 1. Ignores directories and names matching the ignore patterns
//! 2. Drops repeated notifications via the [`EventDebouncer`]
//! 3. Finds the first matching [`Rule`]; unmatched files are dropped silently
//! 4. Waits the settle delay so an in-progress write can finish
//! 5. Computes the destination for the rule's naming scheme
//! 6. Hands the move to the [`FileMover`] and logs an audit line
//!
//! The router is driven from a single thread and takes `&mut self`, so the
//! debounce map has exactly one owner and two notifications for the same path
//! can never be processed at the same time.

use crate::clock::Clock;
use crate::config::CompiledFilters;
use crate::debounce::EventDebouncer;
use crate::file_mover::{FileMover, MoveOutcome};
use crate::rules::{Naming, Rule, RuleSet};
use crate::year::YearExtractor;
use chrono::{DateTime, Local};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timestamp layout for renamed exports. Downstream tooling parses it.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Default wait between accepting an event and moving the file.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Router settings that are not collaborators.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Root that relative rule destinations are joined to.
    pub export_root: PathBuf,
    pub settle_delay: Duration,
    /// Compute and log destinations without moving anything.
    pub dry_run: bool,
}

impl RouterOptions {
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            dry_run: false,
        }
    }
}

/// Why an observed path produced no move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Directory,
    Excluded,
    Debounced,
    Unmatched,
}

/// A file a rule claimed.
#[derive(Debug)]
pub struct RoutedFile {
    pub source: PathBuf,
    pub rule_id: String,
    pub destination: PathBuf,
    /// `None` in dry-run mode.
    pub outcome: Option<MoveOutcome>,
}

/// What happened to one observed path.
#[derive(Debug)]
pub enum RouteResult {
    Ignored(IgnoreReason),
    Routed(RoutedFile),
}

impl RouteResult {
    pub fn routed(&self) -> Option<&RoutedFile> {
        match self {
            RouteResult::Routed(routed) => Some(routed),
            RouteResult::Ignored(_) => None,
        }
    }

    pub fn ignored(&self) -> Option<IgnoreReason> {
        match self {
            RouteResult::Ignored(reason) => Some(*reason),
            RouteResult::Routed(_) => None,
        }
    }
}

pub struct ExportRouter {
    rules: RuleSet,
    filters: CompiledFilters,
    debouncer: EventDebouncer,
    mover: FileMover,
    clock: Arc<dyn Clock>,
    options: RouterOptions,
}

impl ExportRouter {
    pub fn new(
        rules: RuleSet,
        filters: CompiledFilters,
        debouncer: EventDebouncer,
        mover: FileMover,
        clock: Arc<dyn Clock>,
        options: RouterOptions,
    ) -> Self {
        Self {
            rules,
            filters,
            debouncer,
            mover,
            clock,
            options,
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Processes one notification for `path` (a create, a modify, or the new
    /// side of a rename).
    pub fn handle(&mut self, path: &Path) -> RouteResult {
        if path.is_dir() {
            return RouteResult::Ignored(IgnoreReason::Directory);
        }
        let Some(name) = file_name(path) else {
            return RouteResult::Ignored(IgnoreReason::Unmatched);
        };
        if self.filters.is_ignored(&name) {
            debug!(file = %name, "ignoring excluded file name");
            return RouteResult::Ignored(IgnoreReason::Excluded);
        }
        if !self.debouncer.should_process(path, self.clock.now()) {
            debug!(file = %name, "duplicate notification within debounce window");
            return RouteResult::Ignored(IgnoreReason::Debounced);
        }

        self.dispatch(path, &name)
    }

    /// Routes files already sitting in `folders`, e.g. ones that arrived while
    /// the service was not running.
    ///
    /// Each folder is read non-recursively and its files are processed in name
    /// order. The debouncer is bypassed. Unreadable folders are logged and
    /// skipped.
    pub fn scan<P: AsRef<Path>>(&mut self, folders: &[P]) -> Vec<RouteResult> {
        info!("starting initial directory scan");
        let mut results = Vec::new();

        for folder in folders {
            let folder = folder.as_ref();
            let entries = match fs::read_dir(folder) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(folder = %folder.display(), error = %e, "cannot scan folder");
                    continue;
                }
            };

            // `Path::is_file` follows symlinks, so linked exports are picked up too
            let mut files: Vec<PathBuf> = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.is_file())
                .collect();
            files.sort();

            for path in files {
                let Some(name) = file_name(&path) else {
                    continue;
                };
                if self.filters.is_ignored(&name) {
                    continue;
                }
                if let Some(rule) = self.rules.find(&name) {
                    info!(file = %name, rule = %rule.id, "startup scan found matching file");
                    results.push(self.dispatch(&path, &name));
                }
            }
        }

        results
    }

    /// Works out where `filename` would go, without touching the filesystem.
    pub fn plan(&self, filename: &str) -> Option<(&Rule, PathBuf)> {
        let rule = self.rules.find(filename)?;
        let destination =
            self.destination_for(rule, OsStr::new(filename), self.clock.local_now());
        Some((rule, destination))
    }

    fn dispatch(&self, path: &Path, name: &str) -> RouteResult {
        let Some(rule) = self.rules.find(name) else {
            return RouteResult::Ignored(IgnoreReason::Unmatched);
        };

        // Let any write in progress finish
        if !self.options.dry_run {
            self.clock.sleep(self.options.settle_delay);
        }

        info!(file = %name, rule = %rule.id, "detected '{}' export", rule.label());
        // Year-bucketed exports keep their exact on-disk name, even when it is not UTF-8
        let original = path.file_name().unwrap_or_else(|| OsStr::new(name));
        let destination = self.destination_for(rule, original, self.clock.local_now());

        if self.options.dry_run {
            info!(
                file = %name,
                rule = %rule.id,
                destination = %destination.display(),
                "dry run: would move"
            );
            return RouteResult::Routed(RoutedFile {
                source: path.to_path_buf(),
                rule_id: rule.id.clone(),
                destination,
                outcome: None,
            });
        }

        let outcome = self.mover.move_file(path, &destination);
        log_outcome(name, rule, &destination, &outcome);

        RouteResult::Routed(RoutedFile {
            source: path.to_path_buf(),
            rule_id: rule.id.clone(),
            destination,
            outcome: Some(outcome),
        })
    }

    fn destination_for(&self, rule: &Rule, name: &OsStr, now: DateTime<Local>) -> PathBuf {
        let root = &self.options.export_root;
        match &rule.naming {
            Naming::TimestampPrefix {
                destination,
                suffix,
            } => root.join(destination).join(format!(
                "{}_{}.{}",
                now.format(TIMESTAMP_FORMAT),
                suffix,
                rule.format
            )),
            Naming::YearBucketed {
                base_dir,
                year_strategy,
            } => {
                let base = root.join(base_dir);
                let display_name = name.to_string_lossy();
                match YearExtractor::extract(&display_name, *year_strategy) {
                    Some(year) => base.join(year).join(name),
                    None => {
                        warn!(
                            file = %display_name,
                            strategy = %year_strategy,
                            "could not extract year, filing in base directory"
                        );
                        base.join(name)
                    }
                }
            }
        }
    }
}

fn log_outcome(name: &str, rule: &Rule, destination: &Path, outcome: &MoveOutcome) {
    match outcome {
        MoveOutcome::Success => info!(
            file = %name,
            rule = %rule.id,
            destination = %destination.display(),
            "SUCCESS: {} export moved",
            rule.label()
        ),
        MoveOutcome::Skipped(reason) => warn!(
            file = %name,
            rule = %rule.id,
            destination = %destination.display(),
            reason = %reason,
            "SKIPPED: {} export not moved",
            rule.label()
        ),
        MoveOutcome::Failed(err) => error!(
            file = %name,
            rule = %rule.id,
            destination = %destination.display(),
            error = %err,
            "FAILED: could not move {} export",
            rule.label()
        ),
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

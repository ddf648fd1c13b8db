//! export-watchdog - files recurring export downloads into a structured tree
//!
//! This library watches a handful of folders for export files with recognizable
//! names, matches them against an ordered rule table, and moves each one into
//! the export tree: renamed with a timestamp prefix, or kept under its own name
//! inside a per-year folder. Moves tolerate files that are still open elsewhere.

pub mod cli;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod file_mover;
pub mod logging;
pub mod output;
pub mod router;
pub mod rules;
pub mod service;
pub mod watcher;
pub mod year;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CompiledFilters, ConfigError, Settings, WatchdogConfig};
pub use debounce::EventDebouncer;
pub use file_mover::{FileMover, LockProbe, MoveError, MoveOutcome, RetryPolicy, SkipReason};
pub use router::{ExportRouter, IgnoreReason, RouteResult, RoutedFile, RouterOptions};
pub use rules::{Naming, Rule, RuleSet};
pub use year::{YearExtractor, YearStrategy};

pub use cli::{Cli, Command, run_cli};

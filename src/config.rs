//! Service configuration.
//!
//! Settings are read from a TOML file. Every key is optional: anything left
//! out falls back to the production layout under the user's home directory and
//! the built-in rule table.
//!
//! # Configuration File Format
//!
//! ```toml
//! export_root = "~/OneDrive - City of Hackensack/05_EXPORTS"
//! watch_folders = ["~/OneDrive - City of Hackensack/Desktop", "~/Downloads"]
//! log_dir = "~/.export-watchdog/logs"
//! ignore = ["~$*", "*.tmp", "*.crdownload"]
//!
//! [timing]
//! debounce_secs = 5
//! settle_secs = 1
//! max_retries = 5
//! retry_delay_secs = 2
//! retry_backoff = 1
//!
//! [[rules]]
//! id = "SCRPA_CAD_Export"
//! label = "CAD"
//! keywords = ["SCRPA_CAD_Export"]
//! format = "xlsx"
//! naming = "timestamp_prefix"
//! destination = "_CAD/SCRPA"
//! suffix = "SCRPA_CAD"
//!
//! [[rules]]
//! id = "Monthly_CAD"
//! keywords = ["Monthly_CAD"]
//! format = "xlsx"
//! naming = "year_bucketed"
//! base_dir = "_CAD/monthly_export"
//! year_strategy = "from_start"
//! ```
//!
//! When `rules` is present it replaces the built-in table entirely, and the
//! order of the `[[rules]]` entries is the evaluation order.

use crate::file_mover::RetryPolicy;
use crate::rules::{Naming, Rule, RuleSet};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Folder under the home directory that holds the synced work tree.
const ONEDRIVE_FOLDER: &str = "OneDrive - City of Hackensack";
const LOCAL_CONFIG_FILE: &str = ".export-watchdog.toml";

/// Errors that can occur while loading or compiling configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    InvalidGlobPattern { pattern: String, reason: String },

    #[error("Invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Could not determine the home directory needed to resolve {}", .0.display())]
    HomeDirUnavailable(PathBuf),

    #[error("IO error reading configuration: {0}")]
    IoError(#[from] std::io::Error),
}

/// Timing knobs, all in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: u32,
}

fn default_debounce_secs() -> u64 {
    5
}

fn default_settle_secs() -> u64 {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_retry_backoff() -> u32 {
    1
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_secs: default_debounce_secs(),
            settle_secs: default_settle_secs(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            retry_backoff: default_retry_backoff(),
        }
    }
}

/// The configuration file as written by the user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Root of the destination tree.
    #[serde(default)]
    pub export_root: Option<PathBuf>,

    /// Folders watched non-recursively for new exports.
    #[serde(default)]
    pub watch_folders: Option<Vec<PathBuf>>,

    /// Where the rotating log file lives.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// File name globs that are never routed.
    #[serde(default)]
    pub ignore: Option<Vec<String>>,

    #[serde(default)]
    pub timing: TimingConfig,

    /// Routing table, in evaluation order.
    #[serde(default)]
    pub rules: Option<Vec<Rule>>,
}

impl WatchdogConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.export-watchdog.toml` in the current directory
    /// 3. Look for `~/.config/export-watchdog/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is explicitly provided but cannot be read,
    /// or if any discovered file is not valid TOML.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home
                .join(".config")
                .join("export-watchdog")
                .join("config.toml");
            if home_config.exists() {
                return Self::load_from_file(&home_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))
    }

    /// Resolve paths against the current user's home directory and compile
    /// rules and filters.
    pub fn compile(self) -> Result<Settings, ConfigError> {
        self.compile_with_home(dirs::home_dir())
    }

    /// Like [`compile`](Self::compile) with an explicit home directory, used
    /// for `~` expansion and the default folder layout.
    pub fn compile_with_home(self, home: Option<PathBuf>) -> Result<Settings, ConfigError> {
        let home = home.as_deref();
        let onedrive = PathBuf::from("~").join(ONEDRIVE_FOLDER);

        let export_root = self
            .export_root
            .unwrap_or_else(|| onedrive.join("05_EXPORTS"));
        let watch_folders = self.watch_folders.unwrap_or_else(|| {
            vec![
                onedrive.join("Desktop"),
                onedrive.join("Downloads"),
                PathBuf::from("~").join("Downloads"),
            ]
        });
        let log_dir = self
            .log_dir
            .unwrap_or_else(|| PathBuf::from("~").join(".export-watchdog").join("logs"));

        let export_root = expand_home(&export_root, home)?;
        let watch_folders = watch_folders
            .iter()
            .map(|folder| expand_home(folder, home))
            .collect::<Result<Vec<_>, _>>()?;
        let log_dir = expand_home(&log_dir, home)?;

        let rules = match self.rules {
            Some(rules) => {
                let rules = rules
                    .into_iter()
                    .map(|rule| expand_rule_paths(rule, home))
                    .collect::<Result<Vec<_>, _>>()?;
                RuleSet::new(rules)?
            }
            None => RuleSet::builtin(),
        };

        let ignore = self.ignore.unwrap_or_else(default_ignore_patterns);
        let filters = CompiledFilters::new(&ignore)?;

        let timing = self.timing;
        let retry = RetryPolicy::fixed(
            timing.max_retries.max(1),
            Duration::from_secs(timing.retry_delay_secs),
        )
        .with_backoff(timing.retry_backoff);

        Ok(Settings {
            export_root,
            watch_folders,
            log_dir,
            rules,
            filters,
            debounce_window: Duration::from_secs(timing.debounce_secs),
            settle_delay: Duration::from_secs(timing.settle_secs),
            retry,
        })
    }
}

/// Patterns for partial downloads and editor owner files.
pub fn default_ignore_patterns() -> Vec<String> {
    ["~$*", "*.tmp", "*.crdownload", "*.part", ".~lock*"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Fully resolved settings the service runs with.
#[derive(Debug, Clone)]
pub struct Settings {
    pub export_root: PathBuf,
    pub watch_folders: Vec<PathBuf>,
    pub log_dir: PathBuf,
    pub rules: RuleSet,
    pub filters: CompiledFilters,
    pub debounce_window: Duration,
    pub settle_delay: Duration,
    pub retry: RetryPolicy,
}

/// Compiled ignore patterns, matched against bare file names.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    ignore_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidGlobPattern` for malformed globs.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let ignore_patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Pattern::new(pattern).map_err(|e| ConfigError::InvalidGlobPattern {
                    pattern: pattern.to_string(),
                    reason: e.msg.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ignore_patterns })
    }

    /// True if `file_name` must never be routed.
    pub fn is_ignored(&self, file_name: &str) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches(file_name))
    }
}

fn expand_rule_paths(mut rule: Rule, home: Option<&Path>) -> Result<Rule, ConfigError> {
    match &mut rule.naming {
        Naming::TimestampPrefix { destination, .. } => *destination = expand_home(destination, home)?,
        Naming::YearBucketed { base_dir, .. } => *base_dir = expand_home(base_dir, home)?,
    }
    Ok(rule)
}

/// Replaces a leading `~` component with `home`.
fn expand_home(path: &Path, home: Option<&Path>) -> Result<PathBuf, ConfigError> {
    match path.strip_prefix("~") {
        Ok(rest) => home
            .map(|home| home.join(rest))
            .ok_or_else(|| ConfigError::HomeDirUnavailable(path.to_path_buf())),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Relocation of a single export file with lock detection and bounded retries.
///
/// Exports are often still open in a spreadsheet application when they land in
/// a watched folder. The mover probes for that, waits according to a
/// [`RetryPolicy`], and gives up with a [`MoveOutcome`] instead of an error so
/// one stubborn file never stops the service.
use crate::clock::Clock;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt.
    pub delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. 1 keeps it fixed.
    pub backoff_factor: u32,
}

impl RetryPolicy {
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff_factor: 1,
        }
    }

    pub fn with_backoff(mut self, backoff_factor: u32) -> Self {
        self.backoff_factor = backoff_factor.max(1);
        self
    }

    /// Wait before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.delay
            .saturating_mul(self.backoff_factor.max(1).saturating_pow(exponent))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(2))
    }
}

/// Decides whether another process still holds a file.
pub trait LockProbe: Send + Sync {
    fn is_locked(&self, path: &Path) -> bool;
}

/// Treats a file as locked when it cannot be opened for reading and writing.
///
/// This is a heuristic, not an advisory lock: it catches applications that
/// hold files exclusively (spreadsheet editors on Windows) and read-only files.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadWriteProbe;

impl LockProbe for ReadWriteProbe {
    fn is_locked(&self, path: &Path) -> bool {
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(_) => false,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(_) => true,
        }
    }
}

/// Why a move was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source disappeared, usually moved by an earlier notification.
    SourceMissing,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SourceMissing => f.write_str("source missing"),
        }
    }
}

/// Why a move gave up. The source is left where it was in every case.
#[derive(Debug, Error)]
pub enum MoveError {
    #[error("{} is locked after {attempts} attempts", path.display())]
    Locked { path: PathBuf, attempts: u32 },

    #[error("failed to move {} to {} after {attempts} attempts: {source}", from.display(), to.display())]
    Io {
        from: PathBuf,
        to: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of one call to [`FileMover::move_file`].
#[derive(Debug)]
pub enum MoveOutcome {
    Success,
    Skipped(SkipReason),
    Failed(MoveError),
}

impl MoveOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MoveOutcome::Success)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, MoveOutcome::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, MoveOutcome::Failed(_))
    }
}

impl fmt::Display for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveOutcome::Success => f.write_str("moved"),
            MoveOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            MoveOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Moves files under a retry policy.
pub struct FileMover {
    policy: RetryPolicy,
    probe: Box<dyn LockProbe>,
    clock: Arc<dyn Clock>,
}

impl FileMover {
    /// Creates a mover that probes with [`ReadWriteProbe`].
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            probe: Box::new(ReadWriteProbe),
            clock,
        }
    }

    /// Replaces the lock probe.
    pub fn with_probe(mut self, probe: impl LockProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Moves `source` to `destination`, creating the destination's parent
    /// directories first.
    ///
    /// Lock checks and move failures are retried according to the policy. An
    /// existing file at `destination` is replaced.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use export_watchdog::clock::SystemClock;
    /// use export_watchdog::file_mover::{FileMover, RetryPolicy};
    /// use std::path::Path;
    /// use std::sync::Arc;
    ///
    /// let mover = FileMover::new(RetryPolicy::default(), Arc::new(SystemClock));
    /// let outcome = mover.move_file(
    ///     Path::new("/home/user/Downloads/2025_03_Monthly_CAD.xlsx"),
    ///     Path::new("/exports/_CAD/monthly_export/2025/2025_03_Monthly_CAD.xlsx"),
    /// );
    /// println!("{}", outcome);
    /// ```
    pub fn move_file(&self, source: &Path, destination: &Path) -> MoveOutcome {
        let name = display_name(source);

        if !source.exists() {
            warn!(file = %name, "source file does not exist (already moved?)");
            return MoveOutcome::Skipped(SkipReason::SourceMissing);
        }

        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            return MoveOutcome::Failed(MoveError::DirectoryCreation {
                path: parent.to_path_buf(),
                source: e,
            });
        }

        let max_attempts = self.policy.attempts();
        let mut attempt = 1;
        loop {
            if !source.exists() {
                warn!(file = %name, attempt, "source file vanished between attempts");
                return MoveOutcome::Skipped(SkipReason::SourceMissing);
            }

            if self.probe.is_locked(source) {
                if attempt >= max_attempts {
                    error!(file = %name, attempts = max_attempts, "file is still locked, leaving it in place");
                    return MoveOutcome::Failed(MoveError::Locked {
                        path: source.to_path_buf(),
                        attempts: max_attempts,
                    });
                }
                let wait = self.policy.delay_for(attempt);
                info!(
                    file = %name,
                    attempt,
                    max_attempts,
                    retry_in = ?wait,
                    "file is locked, retrying"
                );
                self.clock.sleep(wait);
                attempt += 1;
                continue;
            }

            if destination.exists() {
                warn!(destination = %destination.display(), "replacing existing file at destination");
            }

            match relocate(source, destination) {
                Ok(()) => {
                    debug!(file = %name, destination = %destination.display(), attempt, "relocated");
                    return MoveOutcome::Success;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                    warn!(file = %name, "source file vanished during move");
                    return MoveOutcome::Skipped(SkipReason::SourceMissing);
                }
                Err(e) if attempt < max_attempts => {
                    let wait = self.policy.delay_for(attempt);
                    warn!(
                        file = %name,
                        attempt,
                        max_attempts,
                        retry_in = ?wait,
                        error = %e,
                        "error moving file, retrying"
                    );
                    self.clock.sleep(wait);
                    attempt += 1;
                }
                Err(e) => {
                    error!(file = %name, attempts = max_attempts, error = %e, "giving up on move");
                    return MoveOutcome::Failed(MoveError::Io {
                        from: source.to_path_buf(),
                        to: destination.to_path_buf(),
                        attempts: max_attempts,
                        source: e,
                    });
                }
            }
        }
    }
}

/// Renames in place, falling back to a staged copy across volumes.
fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_then_swap(source, destination),
        Err(e) => Err(e),
    }
}

/// Copies `source` into a temporary file next to `destination`, renames it
/// into place, then removes `source`.
///
/// The temporary file is deleted if any step before the rename fails, so a
/// partial copy never appears under the destination name.
pub(crate) fn copy_then_swap(source: &Path, destination: &Path) -> io::Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new()
        .prefix(".export-watchdog-")
        .suffix(".partial")
        .tempfile_in(dir)?;
    let mut input = File::open(source)?;
    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    drop(input);

    staged.persist(destination).map_err(|e| e.error)?;
    fs::remove_file(source)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

//! Log setup: a size-capped rotating file plus console echo.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "export_watchdog=info";
const VERBOSE_LOG_FILTER: &str = "export_watchdog=debug";
const LOG_FILE_NAME: &str = "watchdog";
/// Rotated backups kept next to the live file.
pub const MAX_BACKUPS: usize = 5;
pub const MAX_LOG_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// How the console half of the output behaves.
pub struct LogConfig<'a> {
    pub log_dir: &'a Path,
    pub verbose: bool,
    /// Only warnings and errors on the console, e.g. while a progress bar is drawn.
    pub quiet_console: bool,
}

/// Initialize tracing with a rotating file writer and stderr output.
///
/// # Errors
///
/// Fails if the log directory or the log file cannot be created.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    fs::create_dir_all(config.log_dir).with_context(|| {
        format!(
            "Failed to create logs directory: {}",
            config.log_dir.display()
        )
    })?;
    let file_writer = LogFileWriter::open(config.log_dir).with_context(|| {
        format!("Failed to open log file in {}", config.log_dir.display())
    })?;

    let default_filter = if config.verbose {
        VERBOSE_LOG_FILTER
    } else {
        DEFAULT_LOG_FILTER
    };
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let console_filter = if config.quiet_console {
        EnvFilter::new("warn")
    } else {
        file_filter.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}

/// `watchdog.log` in the log directory, shifted to `watchdog.log.1` and onwards
/// once the next line would push it past the size cap.
struct SizeCappedLog {
    path: PathBuf,
    max_backups: usize,
    max_size: u64,
    file: File,
    written: u64,
}

impl SizeCappedLog {
    fn open(dir: &Path, max_backups: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", LOG_FILE_NAME));
        let file = append_to(&path)?;
        let written = file.metadata()?.len();
        let mut log = Self {
            path,
            max_backups,
            max_size,
            file,
            written,
        };
        if log.written > log.max_size {
            log.roll()?;
        }
        Ok(log)
    }

    fn backup(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Drops the oldest backup, shifts the rest up by one, and starts an empty
    /// live file.
    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.max_backups == 0 {
            remove_if_present(&self.path)?;
        } else {
            remove_if_present(&self.backup(self.max_backups))?;
            for index in (1..self.max_backups).rev() {
                rename_if_present(&self.backup(index), &self.backup(index + 1))?;
            }
            rename_if_present(&self.path, &self.backup(1))?;
        }

        self.file = append_to(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for SizeCappedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // A single oversized line still goes into a fresh file
        if self.written > 0 && self.written + buf.len() as u64 > self.max_size {
            self.roll()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn rename_if_present(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Hands every fmt layer event the same [`SizeCappedLog`].
#[derive(Clone)]
struct LogFileWriter(Arc<Mutex<SizeCappedLog>>);

impl LogFileWriter {
    fn open(dir: &Path) -> io::Result<Self> {
        let log = SizeCappedLog::open(dir, MAX_BACKUPS, MAX_LOG_FILE_SIZE)?;
        Ok(Self(Arc::new(Mutex::new(log))))
    }

    fn with_log<T>(&self, f: impl FnOnce(&mut SizeCappedLog) -> io::Result<T>) -> io::Result<T> {
        let mut log = self
            .0
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        f(&mut log)
    }
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_log(|log| log.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_log(|log| log.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

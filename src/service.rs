//! Process lifecycle of the watchdog: bootstrap, startup scan, live watching.

use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::debounce::EventDebouncer;
use crate::file_mover::FileMover;
use crate::router::{ExportRouter, RouterOptions};
use crate::rules::Naming;
use crate::watcher::FolderWatcher;
use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::info;

/// Wires a router from resolved settings.
pub fn build_router(settings: &Settings, clock: Arc<dyn Clock>, dry_run: bool) -> ExportRouter {
    let mover = FileMover::new(settings.retry, clock.clone());
    let options = RouterOptions {
        export_root: settings.export_root.clone(),
        settle_delay: settings.settle_delay,
        dry_run,
    };
    ExportRouter::new(
        settings.rules.clone(),
        settings.filters.clone(),
        EventDebouncer::new(settings.debounce_window),
        mover,
        clock,
        options,
    )
}

/// Creates the export root, the monitored folders, and the fixed destination
/// folder of every timestamp-prefixed rule.
///
/// Year folders are created on demand when the first file for a year arrives.
pub fn bootstrap(settings: &Settings) -> Result<()> {
    fs::create_dir_all(&settings.export_root).with_context(|| {
        format!(
            "Failed to create export root {}",
            settings.export_root.display()
        )
    })?;

    for folder in &settings.watch_folders {
        fs::create_dir_all(folder)
            .with_context(|| format!("Failed to create watch folder {}", folder.display()))?;
    }

    for rule in settings.rules.rules() {
        if let Naming::TimestampPrefix { destination, .. } = &rule.naming {
            let dir = settings.export_root.join(destination);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create destination {}", dir.display()))?;
        }
    }

    Ok(())
}

/// Runs until `shutdown` is set: bootstrap, route files that are already
/// waiting, then follow live notifications.
pub fn run_service(settings: &Settings, shutdown: Arc<AtomicBool>) -> Result<()> {
    bootstrap(settings)?;

    info!(export_root = %settings.export_root.display(), "export watchdog initialized");
    for folder in &settings.watch_folders {
        info!(folder = %folder.display(), "monitoring folder");
    }
    info!(rules = settings.rules.len(), "routing rules loaded");

    let mut router = build_router(settings, Arc::new(SystemClock), false);
    router.scan(settings.watch_folders.as_slice());

    let watcher = FolderWatcher::start(settings.watch_folders.as_slice())
        .context("Failed to subscribe to folder events")?;
    info!("watchdog service is now running, press Ctrl+C to stop");

    watcher.run(&mut router, &shutdown);

    info!("watchdog service stopped");
    Ok(())
}

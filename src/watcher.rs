//! Live filesystem notifications.
//!
//! A thin layer over `notify`: one non-recursive watch per monitored folder,
//! raw events pushed through a channel, and a loop that feeds the paths that
//! matter to the [`ExportRouter`] one at a time.

use crate::router::ExportRouter;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the loop wakes up to check for shutdown when no events arrive.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Failed to create watcher: {0}")]
    Create(#[source] notify::Error),

    #[error("Failed to watch {}: {source}", path.display())]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Kind of change a path took part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    /// The path is the new name of a moved or renamed file.
    RenamedTo,
}

/// One path the router should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

/// Converts a `notify` event into the paths worth routing.
///
/// Removals, accesses, and the old side of a rename produce nothing.
pub fn file_events(event: &Event) -> Vec<FileEvent> {
    let with_kind = |paths: &[PathBuf], kind: FileEventKind| -> Vec<FileEvent> {
        paths
            .iter()
            .map(|path| FileEvent {
                path: path.clone(),
                kind,
            })
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => with_kind(&event.paths, FileEventKind::Created),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::To => with_kind(&event.paths[..event.paths.len().min(1)], FileEventKind::RenamedTo),
            RenameMode::Both => with_kind(
                event.paths.get(1..2).unwrap_or_default(),
                FileEventKind::RenamedTo,
            ),
            RenameMode::From => Vec::new(),
            // Backends that cannot tell the sides apart report both paths;
            // only the one that still exists is the new name.
            RenameMode::Any | RenameMode::Other => {
                let existing: Vec<PathBuf> = event
                    .paths
                    .iter()
                    .filter(|path| path.exists())
                    .cloned()
                    .collect();
                with_kind(&existing, FileEventKind::RenamedTo)
            }
        },
        EventKind::Modify(_) => with_kind(&event.paths, FileEventKind::Modified),
        EventKind::Remove(_) | EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Subscriptions on the monitored folders.
pub struct FolderWatcher {
    // Dropping the watcher ends the subscriptions.
    _watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
}

impl FolderWatcher {
    /// Starts a non-recursive watch on every folder.
    ///
    /// # Errors
    ///
    /// Fails if the platform watcher cannot be created or any folder cannot be
    /// subscribed to.
    pub fn start<P: AsRef<Path>>(folders: &[P]) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // The receiver is gone only during shutdown
            let _ = tx.send(res);
        })
        .map_err(WatchError::Create)?;

        for folder in folders {
            let folder = folder.as_ref();
            watcher
                .watch(folder, RecursiveMode::NonRecursive)
                .map_err(|source| WatchError::Subscribe {
                    path: folder.to_path_buf(),
                    source,
                })?;
            info!(folder = %folder.display(), "watching folder");
        }

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }

    /// Feeds events to `router` until `shutdown` is set or the watcher stops.
    ///
    /// Each event is processed to completion, including the settle delay and
    /// any retries, before the next one is read.
    pub fn run(&self, router: &mut ExportRouter, shutdown: &AtomicBool) {
        while !shutdown.load(Ordering::SeqCst) {
            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(event)) => {
                    for file_event in file_events(&event) {
                        debug!(path = %file_event.path.display(), kind = ?file_event.kind, "file event");
                        router.handle(&file_event.path);
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "watcher error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("watcher channel closed");
                    break;
                }
            }
        }
    }
}

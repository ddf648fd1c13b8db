/// Suppression of repeated notifications for the same path.
///
/// Directory watchers usually report a single save as a create followed by one
/// or more modifies. The debouncer accepts the first notification for a path
/// and rejects the rest until the window has passed.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Default suppression window.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

/// Remembers when each path was last accepted.
#[derive(Debug)]
pub struct EventDebouncer {
    window: Duration,
    accepted: HashMap<PathBuf, Instant>,
}

impl EventDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accepted: HashMap::new(),
        }
    }

    /// Returns `true` if `path` should be processed now, recording `now` as its
    /// acceptance time. Returns `false` if it was accepted less than one window ago.
    ///
    /// Entries older than the window are swept on every call, so the map only
    /// ever holds recently active paths.
    pub fn should_process(&mut self, path: &Path, now: Instant) -> bool {
        let window = self.window;
        self.accepted
            .retain(|_, accepted_at| now.saturating_duration_since(*accepted_at) < window);

        if self.accepted.contains_key(path) {
            return false;
        }

        self.accepted.insert(path.to_path_buf(), now);
        true
    }

    /// Number of paths currently inside the window.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

impl Default for EventDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

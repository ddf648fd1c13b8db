//! Time source shared by the debouncer, the mover and the router.
//!
//! Everything that waits or compares timestamps goes through [`Clock`], so the
//! settle delay and the retry loop can be exercised with [`ManualClock`] instead
//! of real sleeps.

use chrono::{DateTime, Local};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A source of monotonic time, wall-clock time, and blocking waits.
pub trait Clock: Send + Sync {
    /// Monotonic reading used for debounce windows.
    fn now(&self) -> Instant;
    /// Local wall-clock time used for timestamped file names.
    fn local_now(&self) -> DateTime<Local>;
    /// Blocks the current event for `duration`.
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn local_now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A virtual clock. `sleep` returns immediately after advancing time.
///
/// Every requested sleep is recorded, which lets tests assert how many retries
/// happened and how long each wait was.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    wall_start: DateTime<Local>,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    /// Creates a clock whose wall time starts at `wall_start`.
    pub fn new(wall_start: DateTime<Local>) -> Self {
        Self {
            start: Instant::now(),
            wall_start,
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Moves time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.with_state(|state| state.elapsed += duration);
    }

    /// All sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.with_state(|state| state.sleeps.clone())
    }

    /// Total virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        self.with_state(|state| state.elapsed)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ManualState) -> T) -> T {
        // A poisoned lock only means a test panicked mid-update; the data is still usable.
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Local::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn local_now(&self) -> DateTime<Local> {
        let elapsed = self.elapsed();
        let offset = chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_start + offset
    }

    fn sleep(&self, duration: Duration) {
        self.with_state(|state| {
            state.elapsed += duration;
            state.sleeps.push(duration);
        });
    }
}

/// Integration tests for export-watchdog
///
/// These tests simulate real-world usage scenarios, driving the router the
/// same way the watcher does: files appear in a monitored folder and their
/// paths are handed over one notification at a time.
///
/// Test categories:
/// 1. Timestamp-prefixed exports
/// 2. Year-bucketed exports
/// 3. Locked and vanished files
/// 4. Unrelated files and ignore patterns
/// 5. Startup scan and dry run
/// 6. Configuration files
/// 7. Audit log levels
use chrono::{Local, TimeZone};
use export_watchdog::config::WatchdogConfig;
use export_watchdog::service::{bootstrap, build_router};
use export_watchdog::{
    CompiledFilters, EventDebouncer, ExportRouter, FileMover, IgnoreReason, LockProbe,
    ManualClock, MoveError, MoveOutcome, RetryPolicy, RouterOptions, RuleSet, Settings,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// A test fixture with a desktop folder, a downloads folder, and an export
/// root inside one temporary directory.
struct TestFixture {
    temp_dir: TempDir,
    clock: Arc<ManualClock>,
}

impl TestFixture {
    /// Create a new fixture whose clock reads 2025-03-14 09:30:00 local time.
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp_dir.path().join("Desktop")).expect("Failed to create Desktop");
        fs::create_dir_all(temp_dir.path().join("Downloads")).expect("Failed to create Downloads");
        let wall = Local
            .with_ymd_and_hms(2025, 3, 14, 9, 30, 0)
            .single()
            .expect("unambiguous local time");
        TestFixture {
            temp_dir,
            clock: Arc::new(ManualClock::new(wall)),
        }
    }

    fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    fn desktop(&self) -> PathBuf {
        self.path().join("Desktop")
    }

    fn downloads(&self) -> PathBuf {
        self.path().join("Downloads")
    }

    fn export_root(&self) -> PathBuf {
        self.path().join("05_EXPORTS")
    }

    /// Settings pointing every folder into the fixture.
    fn settings(&self) -> Settings {
        WatchdogConfig {
            export_root: Some(self.export_root()),
            watch_folders: Some(vec![self.desktop(), self.downloads()]),
            log_dir: Some(self.path().join("logs")),
            ..Default::default()
        }
        .compile_with_home(None)
        .expect("fixture settings compile")
    }

    fn router(&self) -> ExportRouter {
        build_router(&self.settings(), self.clock.clone(), false)
    }

    fn dry_run_router(&self) -> ExportRouter {
        build_router(&self.settings(), self.clock.clone(), true)
    }

    /// Create a file with content in `dir`.
    fn create_file(&self, dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let file_path = dir.join(name);
        let mut file = File::create(&file_path).expect("Failed to create file");
        file.write_all(content)
            .expect("Failed to write file content");
        file_path
    }

    /// Assert that a file exists at the given path relative to the export root.
    fn assert_exported(&self, rel_path: &str) {
        let path = self.export_root().join(rel_path);
        assert!(
            path.exists() && path.is_file(),
            "File should exist: {}",
            path.display()
        );
    }

    /// List all files under the export root recursively.
    fn exported_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        Self::walk_dir(&self.export_root(), &mut files);
        files.sort();
        files
    }

    fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>) {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() {
                    files.push(path);
                } else if path.is_dir() {
                    Self::walk_dir(&path, files);
                }
            }
        }
    }
}

/// Simulates a spreadsheet editor holding the file open.
struct HeldOpen;

impl LockProbe for HeldOpen {
    fn is_locked(&self, _path: &Path) -> bool {
        true
    }
}

/// In-memory sink for log lines emitted while a test body runs.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLog {
    fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Runs `f` with a subscriber that records every event down to DEBUG.
fn with_captured_log<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, log.lines())
}

fn count_lines(lines: &[String], needles: &[&str]) -> usize {
    lines
        .iter()
        .filter(|line| needles.iter().all(|needle| line.contains(needle)))
        .count()
}

// ============================================================================
// Test Suite 1: Timestamp-prefixed exports
// ============================================================================

#[test]
fn test_scrpa_cad_export_on_desktop() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.desktop(), "SCRPA_CAD_Export_final.xlsx", b"cad rows");

    let result = router.handle(&source);

    let routed = result.routed().expect("file should be routed");
    assert_eq!(routed.rule_id, "SCRPA_CAD_Export");
    assert_eq!(
        routed.destination,
        fixture
            .export_root()
            .join("_CAD")
            .join("SCRPA")
            .join("2025_03_14_09_30_01_SCRPA_CAD.xlsx")
    );
    assert!(!source.exists());
    fixture.assert_exported("_CAD/SCRPA/2025_03_14_09_30_01_SCRPA_CAD.xlsx");
    assert_eq!(
        fs::read(&routed.destination).unwrap(),
        b"cad rows".to_vec(),
        "content must survive the move"
    );
}

#[test]
fn test_timestamp_exports_from_downloads() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();

    for (name, expected) in [
        ("OTActivity (3).xlsx", "_POSS_EXPORT/OVERTIME_EXPORT/2025_03_14_09_30_01_OTActivity.xlsx"),
        ("TimeOffActivity.xlsx", "_POSS_EXPORT/TIME_OFF_EXPORT/2025_03_14_09_30_02_TimeOffActivity.xlsx"),
        ("e_ticket_2025.XLSX", "_Summons/E_Ticket/2025_03_14_09_30_03_e_ticket.xlsx"),
        (
            "Backtracet_Arrests_Export.xlsx",
            "_BACKTRACE_ARRESTS/2025_03_14_09_30_04_Backtracet_Arrests_Export.xlsx",
        ),
    ] {
        let source = fixture.create_file(&fixture.downloads(), name, b"x");
        router.handle(&source);
        fixture.assert_exported(expected);
    }
}

// ============================================================================
// Test Suite 2: Year-bucketed exports
// ============================================================================

#[test]
fn test_monthly_cad_filed_by_year() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_CAD.xlsx", b"monthly");

    let result = router.handle(&source);

    assert_eq!(result.routed().unwrap().rule_id, "Monthly_CAD");
    assert!(!source.exists());
    fixture.assert_exported("_CAD/monthly_export/2025/2025_03_Monthly_CAD.xlsx");
}

#[test]
fn test_year_rules_from_any_monitored_folder() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();

    let cases = [
        (fixture.desktop(), "2025_11_Monthly_RMS.xlsx", "_RMS/monthly_export/2025/2025_11_Monthly_RMS.xlsx"),
        (
            fixture.downloads(),
            "2024_09_to_2025_09_Rolling13_CAD.xlsx",
            "_CAD/rolling_13/2025/2024_09_to_2025_09_Rolling13_CAD.xlsx",
        ),
        (
            fixture.desktop(),
            "2024_09_to_2025_09_Rolling13_RMS.xlsx",
            "_RMS/rolling_13/2025/2024_09_to_2025_09_Rolling13_RMS.xlsx",
        ),
        (
            fixture.downloads(),
            "2023_01_to_2023_12_ResponseTime_CAD.xlsx",
            "_CAD/response_time/2023/2023_01_to_2023_12_ResponseTime_CAD.xlsx",
        ),
        (
            fixture.downloads(),
            "2024_01_to_2024_12_ResponseTime_RMS.xlsx",
            "_RMS/response_time/2024/2024_01_to_2024_12_ResponseTime_RMS.xlsx",
        ),
    ];

    for (dir, name, expected) in cases {
        let source = fixture.create_file(&dir, name, b"x");
        router.handle(&source);
        fixture.assert_exported(expected);
    }
}

#[test]
fn test_year_missing_goes_to_base_folder() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "Rolling13_CAD_latest.xlsx", b"x");

    router.handle(&source);

    fixture.assert_exported("_CAD/rolling_13/Rolling13_CAD_latest.xlsx");
}

// ============================================================================
// Test Suite 3: Locked and vanished files
// ============================================================================

#[test]
fn test_locked_file_is_retried_then_left_in_place() {
    let fixture = TestFixture::new();
    let settings = fixture.settings();
    let mover = FileMover::new(RetryPolicy::default(), fixture.clock.clone()).with_probe(HeldOpen);
    let mut router = ExportRouter::new(
        settings.rules.clone(),
        settings.filters.clone(),
        EventDebouncer::new(settings.debounce_window),
        mover,
        fixture.clock.clone(),
        RouterOptions {
            export_root: settings.export_root.clone(),
            settle_delay: settings.settle_delay,
            dry_run: false,
        },
    );
    let source = fixture.create_file(&fixture.desktop(), "SCRPA_RMS_Export.xlsx", b"open in editor");

    let result = router.handle(&source);

    let outcome = result.routed().and_then(|r| r.outcome.as_ref()).unwrap();
    assert!(matches!(
        outcome,
        MoveOutcome::Failed(MoveError::Locked { attempts: 5, .. })
    ));
    assert!(source.exists(), "locked file must stay where it was");
    assert_eq!(fs::read(&source).unwrap(), b"open in editor".to_vec());
    assert!(fixture.exported_files().is_empty());

    let retry_waits: Vec<Duration> = fixture.clock.sleeps().into_iter().skip(1).collect();
    assert_eq!(retry_waits, vec![Duration::from_secs(2); 4]);
}

#[test]
fn test_already_moved_file_is_skipped() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_CAD.xlsx", b"x");
    fs::remove_file(&source).unwrap();

    let result = router.handle(&source);

    let outcome = result.routed().and_then(|r| r.outcome.as_ref()).unwrap();
    assert!(outcome.is_skipped());
    assert!(fixture.exported_files().is_empty());
    assert!(!fixture.export_root().join("_CAD").exists());
}

#[test]
fn test_create_then_modify_moves_once() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.desktop(), "SCRPA_CAD_Export.xlsx", b"x");

    let create = router.handle(&source);
    let modify = router.handle(&source);

    assert!(create.routed().is_some());
    assert_eq!(modify.ignored(), Some(IgnoreReason::Debounced));
    assert_eq!(fixture.exported_files().len(), 1);
}

// ============================================================================
// Test Suite 4: Unrelated files and ignore patterns
// ============================================================================

#[test]
fn test_unrelated_file_has_no_side_effects() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "random_notes.txt", b"notes");

    let result = router.handle(&source);

    assert_eq!(result.ignored(), Some(IgnoreReason::Unmatched));
    assert!(source.exists());
    assert!(!fixture.export_root().exists());
}

#[test]
fn test_partial_downloads_are_ignored() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let partial = fixture.create_file(&fixture.downloads(), "OTActivity.xlsx.crdownload", b"x");
    let owner = fixture.create_file(&fixture.downloads(), "~$OTActivity.xlsx", b"x");

    assert_eq!(router.handle(&partial).ignored(), Some(IgnoreReason::Excluded));
    assert_eq!(router.handle(&owner).ignored(), Some(IgnoreReason::Excluded));
    assert!(partial.exists());
    assert!(owner.exists());
}

#[test]
fn test_wrong_extension_is_unmatched() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_CAD.csv", b"x");

    assert_eq!(router.handle(&source).ignored(), Some(IgnoreReason::Unmatched));
    assert!(source.exists());
}

// ============================================================================
// Test Suite 5: Startup scan and dry run
// ============================================================================

#[test]
fn test_startup_scan_recovers_waiting_files() {
    let fixture = TestFixture::new();
    let settings = fixture.settings();
    bootstrap(&settings).unwrap();
    fixture.create_file(&fixture.desktop(), "SCRPA_CAD_Export.xlsx", b"x");
    fixture.create_file(&fixture.downloads(), "2025_01_Monthly_RMS.xlsx", b"x");
    fixture.create_file(&fixture.downloads(), "holiday_photo.jpg", b"x");
    fs::create_dir(fixture.downloads().join("nested")).unwrap();
    fixture.create_file(&fixture.downloads().join("nested"), "2025_02_Monthly_RMS.xlsx", b"x");

    let mut router = fixture.router();
    let results = router.scan(&settings.watch_folders);

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| {
        r.routed()
            .and_then(|routed| routed.outcome.as_ref())
            .is_some_and(MoveOutcome::is_success)
    }));
    fixture.assert_exported("_RMS/monthly_export/2025/2025_01_Monthly_RMS.xlsx");
    assert!(fixture.downloads().join("holiday_photo.jpg").exists());
    // Scan is not recursive
    assert!(fixture.downloads().join("nested/2025_02_Monthly_RMS.xlsx").exists());
}

#[test]
fn test_dry_run_scan_moves_nothing() {
    let fixture = TestFixture::new();
    let source = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_CAD.xlsx", b"x");

    let mut router = fixture.dry_run_router();
    let results = router.scan(&[fixture.downloads()]);

    assert_eq!(results.len(), 1);
    let routed = results[0].routed().unwrap();
    assert!(routed.outcome.is_none());
    assert_eq!(
        routed.destination,
        fixture.export_root().join("_CAD/monthly_export/2025/2025_03_Monthly_CAD.xlsx")
    );
    assert!(source.exists());
    assert!(!fixture.export_root().exists());
}

// ============================================================================
// Test Suite 6: Configuration files
// ============================================================================

#[test]
fn test_config_file_rules_replace_builtin_table() {
    let fixture = TestFixture::new();
    let config_path = fixture.path().join("watchdog.toml");
    let config = format!(
        r#"
export_root = "{root}"
watch_folders = ["{inbox}"]
log_dir = "{logs}"

[timing]
settle_secs = 0

[[rules]]
id = "Quarterly_CAD"
label = "CAD"
keywords = ["Quarterly_CAD", "CAD_Q"]
format = "csv"
naming = "year_bucketed"
base_dir = "_CAD/quarterly"
year_strategy = "from_start"
"#,
        root = fixture.export_root().display(),
        inbox = fixture.downloads().display(),
        logs = fixture.path().join("logs").display(),
    );
    fs::write(&config_path, config).unwrap();

    let settings = WatchdogConfig::load(Some(config_path.as_path()))
        .unwrap()
        .compile_with_home(None)
        .unwrap();
    let mut router = build_router(&settings, fixture.clock.clone(), false);

    let quarterly = fixture.create_file(&fixture.downloads(), "2024_CAD_Q3.csv", b"x");
    let monthly = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_CAD.xlsx", b"x");
    router.handle(&quarterly);
    router.handle(&monthly);

    fixture.assert_exported("_CAD/quarterly/2024/2024_CAD_Q3.csv");
    // The built-in Monthly_CAD rule is not active any more
    assert!(monthly.exists());
    assert!(fixture.clock.sleeps().iter().all(|d| d.is_zero()));
}

#[test]
fn test_config_rule_order_decides_overlaps() {
    let config = WatchdogConfig::from_toml(
        r#"
        [[rules]]
        id = "AnyCad"
        keywords = ["CAD"]
        format = "xlsx"
        naming = "timestamp_prefix"
        destination = "_CAD/misc"
        suffix = "CAD"

        [[rules]]
        id = "Monthly_CAD"
        keywords = ["Monthly_CAD"]
        format = "xlsx"
        naming = "year_bucketed"
        base_dir = "_CAD/monthly_export"
        year_strategy = "from_start"
        "#,
    )
    .unwrap();
    let rules: RuleSet = RuleSet::new(config.rules.unwrap()).unwrap();

    assert_eq!(
        rules.find("2025_03_Monthly_CAD.xlsx").map(|r| r.id.as_str()),
        Some("AnyCad")
    );
    let filters = CompiledFilters::default();
    assert!(!filters.is_ignored("2025_03_Monthly_CAD.xlsx"));
}

// ============================================================================
// Test Suite 7: Audit log levels
// ============================================================================

#[test]
fn test_unrelated_file_logs_no_error() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "random_notes.txt", b"notes");

    let (result, lines) = with_captured_log(|| router.handle(&source));

    assert_eq!(result.ignored(), Some(IgnoreReason::Unmatched));
    assert_eq!(count_lines(&lines, &[" ERROR "]), 0, "log: {:#?}", lines);
}

#[test]
fn test_locked_file_logs_one_failure_at_error() {
    let fixture = TestFixture::new();
    let settings = fixture.settings();
    let mover = FileMover::new(RetryPolicy::default(), fixture.clock.clone()).with_probe(HeldOpen);
    let mut router = ExportRouter::new(
        settings.rules.clone(),
        settings.filters.clone(),
        EventDebouncer::new(settings.debounce_window),
        mover,
        fixture.clock.clone(),
        RouterOptions::new(settings.export_root.clone()),
    );
    let source = fixture.create_file(&fixture.desktop(), "SCRPA_RMS_Export.xlsx", b"x");

    let (result, lines) = with_captured_log(|| router.handle(&source));

    assert!(result.routed().and_then(|r| r.outcome.as_ref()).is_some_and(MoveOutcome::is_failed));
    assert_eq!(
        count_lines(&lines, &[" ERROR ", "FAILED", "file=SCRPA_RMS_Export.xlsx", "rule=SCRPA_RMS_Export"]),
        1,
        "log: {:#?}",
        lines
    );
    assert_eq!(count_lines(&lines, &[" INFO ", "file is locked, retrying"]), 4);
    assert_eq!(count_lines(&lines, &["SUCCESS"]), 0);
}

#[test]
fn test_vanished_source_logs_warning() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_RMS.xlsx", b"x");
    fs::remove_file(&source).unwrap();

    let (result, lines) = with_captured_log(|| router.handle(&source));

    assert!(result.routed().and_then(|r| r.outcome.as_ref()).is_some_and(MoveOutcome::is_skipped));
    assert_eq!(
        count_lines(&lines, &[" WARN ", "SKIPPED", "reason=source missing"]),
        1,
        "log: {:#?}",
        lines
    );
    assert_eq!(count_lines(&lines, &[" ERROR "]), 0);
}

#[test]
fn test_successful_move_is_audited_at_info() {
    let fixture = TestFixture::new();
    let mut router = fixture.router();
    let source = fixture.create_file(&fixture.downloads(), "2025_03_Monthly_CAD.xlsx", b"x");

    let (_, lines) = with_captured_log(|| router.handle(&source));

    assert_eq!(
        count_lines(&lines, &[" INFO ", "SUCCESS", "rule=Monthly_CAD", "destination="]),
        1,
        "log: {:#?}",
        lines
    );
    assert_eq!(count_lines(&lines, &[" WARN "]), 0);
    assert_eq!(count_lines(&lines, &[" ERROR "]), 0);
}

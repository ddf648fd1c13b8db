//! Year extraction from export file names.
//!
//! Monthly exports are named `YYYY_MM_<Report>.xlsx`, rolling and response-time
//! exports cover a range and are named `YYYY_MM_to_YYYY_MM_<Report>.xlsx`. The
//! year used for filing is the first year in the former and the closing year in
//! the latter.
//!
//! ```
//! use export_watchdog::year::{YearExtractor, YearStrategy};
//!
//! assert_eq!(
//!     YearExtractor::extract("2025_11_Monthly_CAD.xlsx", YearStrategy::FromStart).as_deref(),
//!     Some("2025")
//! );
//! assert_eq!(
//!     YearExtractor::extract("2024_09_to_2025_09_Rolling13_RMS.xlsx", YearStrategy::FromRangeEnd).as_deref(),
//!     Some("2025")
//! );
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

// ASCII digits only: `\d` would also accept non-Latin numerals.
static YEAR_AT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{4})_").expect("static regex is valid"));
static YEAR_AFTER_TO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"to_([0-9]{4})_").expect("static regex is valid"));

/// Where in a file name the filing year lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearStrategy {
    /// `2025_11_Monthly_CAD.xlsx` → `2025`
    FromStart,
    /// `2024_09_to_2025_09_Rolling13_RMS.xlsx` → `2025`
    FromRangeEnd,
}

impl fmt::Display for YearStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            YearStrategy::FromStart => f.write_str("from_start"),
            YearStrategy::FromRangeEnd => f.write_str("from_range_end"),
        }
    }
}

/// Stateless year parser.
pub struct YearExtractor;

impl YearExtractor {
    /// Returns the four-digit year for `filename` under `strategy`, or `None`
    /// when the name does not follow the expected pattern exactly.
    pub fn extract(filename: &str, strategy: YearStrategy) -> Option<String> {
        let pattern = match strategy {
            YearStrategy::FromStart => &*YEAR_AT_START,
            YearStrategy::FromRangeEnd => &*YEAR_AFTER_TO,
        };
        pattern
            .captures(filename)
            .and_then(|caps| caps.get(1))
            .map(|year| year.as_str().to_string())
    }
}

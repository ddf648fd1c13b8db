//! Routing rules for recurring export files.
//!
//! A [`Rule`] recognizes one export type by keyword and extension and says how
//! the file is filed: renamed with a timestamp prefix into a fixed folder, or
//! kept under its own name inside a per-year folder.
//!
//! Rules are evaluated in declaration order and the first match wins. Several
//! rules share the `xlsx` format, so the order of the table is part of the
//! configuration, not an accident of storage.
//!
//! ```
//! use export_watchdog::rules::RuleSet;
//!
//! let rules = RuleSet::builtin();
//! assert_eq!(rules.find("2025_03_Monthly_CAD.xlsx").map(|r| r.id.as_str()), Some("Monthly_CAD"));
//! assert!(rules.find("random_notes.txt").is_none());
//! ```

use crate::config::ConfigError;
use crate::year::YearStrategy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// How a matched file is named and where it lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "naming", rename_all = "snake_case")]
pub enum Naming {
    /// Renamed to `<YYYY_MM_DD_HH_MM_SS>_<suffix>.<format>` inside `destination`.
    TimestampPrefix { destination: PathBuf, suffix: String },
    /// Original name kept, filed under `<base_dir>/<year>/`, or `<base_dir>/`
    /// when no year can be read from the name.
    YearBucketed {
        base_dir: PathBuf,
        year_strategy: YearStrategy,
    },
}

/// One export type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Identifier used in logs and summaries.
    pub id: String,
    /// Export type shown in audit lines. Defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Any of these substrings identifies the export (case-insensitive).
    pub keywords: Vec<String>,
    /// Required extension, without the dot (case-insensitive).
    pub format: String,
    #[serde(flatten)]
    pub naming: Naming,
}

impl Rule {
    /// Builds a timestamp-prefixed rule with a single keyword.
    pub fn timestamp_prefix(
        id: &str,
        label: &str,
        keyword: &str,
        destination: impl Into<PathBuf>,
        suffix: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            label: Some(label.to_string()),
            keywords: vec![keyword.to_string()],
            format: "xlsx".to_string(),
            naming: Naming::TimestampPrefix {
                destination: destination.into(),
                suffix: suffix.to_string(),
            },
        }
    }

    /// Builds a year-bucketed rule whose keyword is its id.
    pub fn year_bucketed(id: &str, base_dir: impl Into<PathBuf>, year_strategy: YearStrategy) -> Self {
        Self {
            id: id.to_string(),
            label: None,
            keywords: vec![id.to_string()],
            format: "xlsx".to_string(),
            naming: Naming::YearBucketed {
                base_dir: base_dir.into(),
                year_strategy,
            },
        }
    }

    /// The export type for audit lines.
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// Tests an already-lowercased file name against this rule.
    ///
    /// Keywords and format must already be lowercase, which [`RuleSet::new`] ensures.
    fn matches_lowercase(&self, name_lower: &str) -> bool {
        let has_format = name_lower
            .strip_suffix(self.format.as_str())
            .is_some_and(|stem| stem.ends_with('.'));
        has_format
            && self
                .keywords
                .iter()
                .any(|keyword| name_lower.contains(keyword.as_str()))
    }

    fn normalized(mut self) -> Result<Self, ConfigError> {
        let format = self.format.trim().trim_start_matches('.').to_lowercase();
        if format.is_empty() {
            return Err(ConfigError::InvalidRule {
                id: self.id,
                reason: "format must not be empty".to_string(),
            });
        }

        let keywords: Vec<String> = self
            .keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .filter(|keyword| !keyword.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(ConfigError::InvalidRule {
                id: self.id,
                reason: "at least one non-empty keyword is required".to_string(),
            });
        }

        if let Naming::TimestampPrefix { suffix, .. } = &self.naming
            && suffix.is_empty()
        {
            return Err(ConfigError::InvalidRule {
                id: self.id,
                reason: "timestamp_prefix rules need a suffix".to_string(),
            });
        }

        self.format = format;
        self.keywords = keywords;
        Ok(self)
    }
}

/// An ordered table of rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validates and normalizes `rules`, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidRule` for empty keyword lists, empty formats,
    /// missing suffixes, or duplicate ids.
    pub fn new(rules: Vec<Rule>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let rules = rules
            .into_iter()
            .map(|rule| {
                if !seen.insert(rule.id.clone()) {
                    return Err(ConfigError::InvalidRule {
                        id: rule.id,
                        reason: "duplicate rule id".to_string(),
                    });
                }
                rule.normalized()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// The rule table used by the production deployment.
    pub fn builtin() -> Self {
        Self {
            rules: builtin_rules()
                .into_iter()
                .filter_map(|rule| rule.normalized().ok())
                .collect(),
        }
    }

    /// Returns the first rule, in declared order, that matches `filename`.
    pub fn find(&self, filename: &str) -> Option<&Rule> {
        let name_lower = filename.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches_lowercase(&name_lower))
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Timestamp-prefixed rules come first, then the year-bucketed ones.
pub fn builtin_rules() -> Vec<Rule> {
    use YearStrategy::{FromRangeEnd, FromStart};

    vec![
        Rule::timestamp_prefix("SCRPA_CAD_Export", "CAD", "SCRPA_CAD_Export", "_CAD/SCRPA", "SCRPA_CAD"),
        Rule::timestamp_prefix("SCRPA_RMS_Export", "RMS", "SCRPA_RMS_Export", "_RMS/SCRPA", "SCRPA_RMS"),
        Rule::timestamp_prefix(
            "OTActivity",
            "OvertimeActivity",
            "OTActivity",
            "_POSS_EXPORT/OVERTIME_EXPORT",
            "OTActivity",
        ),
        Rule::timestamp_prefix(
            "TimeOffActivity",
            "TimeOffActivity",
            "TimeOffActivity",
            "_POSS_EXPORT/TIME_OFF_EXPORT",
            "TimeOffActivity",
        ),
        Rule::timestamp_prefix("e_ticket", "E_Ticket", "e_ticket", "_Summons/E_Ticket", "e_ticket"),
        Rule::timestamp_prefix(
            "Backtracet_Arrests_Export",
            "Backtracet_Arrests",
            "Backtracet_Arrests_Export",
            "_BACKTRACE_ARRESTS",
            "Backtracet_Arrests_Export",
        ),
        Rule::year_bucketed("Monthly_CAD", "_CAD/monthly_export", FromStart),
        Rule::year_bucketed("Monthly_RMS", "_RMS/monthly_export", FromStart),
        Rule::year_bucketed("Rolling13_CAD", "_CAD/rolling_13", FromRangeEnd),
        Rule::year_bucketed("Rolling13_RMS", "_RMS/rolling_13", FromRangeEnd),
        Rule::year_bucketed("ResponseTime_CAD", "_CAD/response_time", FromRangeEnd),
        Rule::year_bucketed("ResponseTime_RMS", "_RMS/response_time", FromRangeEnd),
    ]
}

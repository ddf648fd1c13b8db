//! Output formatting and styling module.
//!
//! Provides a centralized interface for the one-shot CLI commands: colored
//! status lines, a progress bar for scans, and summary tables. The long-running
//! `watch` command reports through the log instead.

use crate::router::RouteResult;
use crate::rules::{Naming, Rule};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;

/// Per-rule tally of a scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuleTally {
    pub moved: usize,
    pub planned: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Counts scan results per rule id, in rule id order.
pub fn tally(results: &[RouteResult]) -> BTreeMap<String, RuleTally> {
    let mut counts: BTreeMap<String, RuleTally> = BTreeMap::new();
    for routed in results.iter().filter_map(RouteResult::routed) {
        let entry = counts.entry(routed.rule_id.clone()).or_default();
        match &routed.outcome {
            None => entry.planned += 1,
            Some(outcome) if outcome.is_success() => entry.moved += 1,
            Some(outcome) if outcome.is_skipped() => entry.skipped += 1,
            Some(_) => entry.failed += 1,
        }
    }
    counts
}

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a spinner-style progress bar for scans.
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        pb
    }

    /// Prints a table of scan results per rule.
    pub fn summary_table(counts: &BTreeMap<String, RuleTally>) {
        Self::header("SUMMARY");

        if counts.is_empty() {
            Self::plain("No matching export files found.");
            return;
        }

        let width = counts.keys().map(|id| id.len()).max().unwrap_or(0).max(4);

        println!(
            "{:<width$} | {:>5} | {:>7} | {:>6}",
            "Rule".bold(),
            "Moved".bold(),
            "Skipped".bold(),
            "Failed".bold(),
            width = width
        );
        println!("{}", "-".repeat(width + 29));

        let mut total = RuleTally::default();
        for (rule_id, tally) in counts {
            let moved = tally.moved + tally.planned;
            println!(
                "{:<width$} | {:>5} | {:>7} | {:>6}",
                rule_id,
                moved.to_string().green(),
                tally.skipped.to_string().yellow(),
                if tally.failed > 0 {
                    tally.failed.to_string().red()
                } else {
                    tally.failed.to_string().normal()
                },
                width = width
            );
            total.moved += moved;
            total.skipped += tally.skipped;
            total.failed += tally.failed;
        }

        println!("{}", "-".repeat(width + 29));
        println!(
            "{:<width$} | {:>5} | {:>7} | {:>6}",
            "Total".bold(),
            total.moved.to_string().green().bold(),
            total.skipped,
            total.failed,
            width = width
        );
    }

    /// Prints the rule table in evaluation order.
    pub fn rules_table(rules: &[Rule]) {
        Self::header("RULES (first match wins)");
        for (index, rule) in rules.iter().enumerate() {
            let target = match &rule.naming {
                Naming::TimestampPrefix {
                    destination,
                    suffix,
                } => format!(
                    "{}/<timestamp>_{}.{}",
                    destination.display(),
                    suffix,
                    rule.format
                ),
                Naming::YearBucketed {
                    base_dir,
                    year_strategy,
                } => format!("{}/<year:{}>/<name>", base_dir.display(), year_strategy),
            };
            println!(
                "{:>2}. {} {} [{}] *.{} → {}",
                index + 1,
                rule.id.bold(),
                format!("({})", rule.label()).dimmed(),
                rule.keywords.join(", "),
                rule.format,
                target.cyan()
            );
        }
    }
}

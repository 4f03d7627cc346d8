//! Output formatting and styling module.
//!
//! Every user-facing line the CLI prints goes through [`OutputFormatter`], so
//! colors, symbols and table layouts stay consistent across commands.

use crate::backup::{BackupSizeStats, BackupSummary};
use crate::file_organizer::{FileStats, PreviewEntry, RunStatistics, format_size};
use crate::rules::OrganizationRule;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use tracing::warn;

const PROGRESS_TEMPLATE: &str = "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Manages all CLI output with consistent styling and formatting.
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// OutputFormatter::success("Backup created");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message to stderr in red.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn plain(message: &str) {
        println!("{}", message);
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Creates a progress bar for `total` files.
    ///
    /// Falls back to the default bar style if the template is rejected.
    ///
    /// ```no_run
    /// use tidydesk::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("Completed!");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        match ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
            Ok(style) => pb.set_style(style.progress_chars("█▓░")),
            Err(e) => warn!("Invalid progress bar template: {}", e),
        }
        pb
    }

    /// Prints the counters of a finished organization run.
    pub fn run_summary(stats: &RunStatistics, dry_run: bool) {
        Self::header(if dry_run { "DRY RUN SUMMARY" } else { "SUMMARY" });

        let moved_label = if dry_run { "Would move" } else { "Moved" };
        let rows = [
            ("Processed", stats.files_processed.to_string().normal()),
            (moved_label, stats.files_moved.to_string().green()),
            ("Skipped", stats.files_skipped.to_string().yellow()),
            ("Errors", error_count(stats.errors)),
        ];
        for (label, value) in rows {
            println!("  {:<12} {}", label, value);
        }

        if let Some(duration) = stats.duration() {
            let seconds = duration.num_milliseconds() as f64 / 1000.0;
            println!("  {:<12} {:.2}s", "Duration", seconds);
        }
        if let Some(backup) = &stats.backup_path {
            println!("  {:<12} {}", "Backup", backup.display());
        }
        if stats.cancelled {
            Self::warning("Run was cancelled before all files were processed");
        }
    }

    /// Prints file counts per rule, plus totals.
    pub fn stats_table(stats: &FileStats) {
        Self::header("FILES BY RULE");
        Self::count_table("Rule", &stats.files_by_rule, stats.total_files);

        Self::header("FILES BY EXTENSION");
        let by_extension: BTreeMap<String, usize> = stats
            .files_by_extension
            .iter()
            .map(|(ext, count)| {
                let label = if ext.is_empty() {
                    "(none)".to_string()
                } else {
                    ext.clone()
                };
                (label, *count)
            })
            .collect();
        Self::count_table("Extension", &by_extension, stats.total_files);

        println!("\nTotal size: {}", format_size(stats.total_size).bold());
    }

    /// Prints the planned moves, grouped by target folder.
    pub fn preview_table(entries: &[PreviewEntry]) {
        if entries.is_empty() {
            Self::info("No files would be moved.");
            return;
        }

        let mut by_folder: BTreeMap<&str, Vec<&PreviewEntry>> = BTreeMap::new();
        for entry in entries {
            by_folder
                .entry(entry.target_folder.as_str())
                .or_default()
                .push(entry);
        }

        for (folder, files) in by_folder {
            println!("\n{}/", folder.bold());
            for entry in files {
                println!(
                    "  → {} ({}, {})",
                    entry.file_name,
                    entry.rule_name.cyan(),
                    format_size(entry.file_size)
                );
            }
        }
        println!("\n{} file(s) would be moved", entries.len().to_string().green());
    }

    pub fn rules_table(rules: &[OrganizationRule]) {
        if rules.is_empty() {
            Self::info("No rules configured.");
            return;
        }

        let width = rules
            .iter()
            .map(|rule| rule.name.len())
            .max()
            .unwrap_or(0)
            .max(4);

        for (position, rule) in rules.iter().enumerate() {
            let state = if rule.enabled {
                "enabled".green()
            } else {
                "disabled".dimmed()
            };
            println!(
                "{:>2}. {:<width$} → {:<16} [{}] {}",
                position + 1,
                rule.name.bold(),
                format!("{}/", rule.target_folder),
                state,
                rule.file_extensions.join(" "),
                width = width
            );
        }
    }

    /// Prints available backups, newest first.
    pub fn backups_table(backups: &[BackupSummary]) {
        if backups.is_empty() {
            Self::info("No backups found.");
            return;
        }

        for backup in backups {
            println!("{}", backup.backup_name.bold());
            println!("  Created: {}", backup.created_at);
            println!("  Source:  {} ({})", backup.source_path, backup.backup_type);
            println!(
                "  Files:   {}  Archive: {} MB",
                backup.file_count, backup.size_mb
            );
        }
    }

    pub fn backup_size(stats: &BackupSizeStats) {
        println!(
            "{} backup(s) using {} ({} MB, {} GB)",
            stats.backup_count,
            format_size(stats.total_size_bytes).bold(),
            stats.total_size_mb,
            stats.total_size_gb
        );
    }

    fn count_table(label: &str, counts: &BTreeMap<String, usize>, total: usize) {
        let width = counts
            .keys()
            .map(|name| name.len())
            .max()
            .unwrap_or(0)
            .max(label.len());

        println!("{:<width$} | {}", label.bold(), "Files".bold(), width = width);
        println!("{}", "-".repeat(width + 10));
        for (name, count) in counts {
            println!(
                "{:<width$} | {} {}",
                name,
                count.to_string().green(),
                plural_files(*count),
                width = width
            );
        }
        println!("{}", "-".repeat(width + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            plural_files(total),
            width = width
        );
    }
}

fn plural_files(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

fn error_count(errors: usize) -> ColoredString {
    if errors == 0 {
        errors.to_string().normal()
    } else {
        errors.to_string().red()
    }
}

//! Command-line interface for tidydesk.
//!
//! Parses arguments with clap, loads configuration, initializes logging and
//! dispatches to the organizer, backup store and scheduler. Errors are turned
//! into messages for the user; `main` decides the exit code.

use crate::backup::BackupManager;
use crate::config::{AppConfig, CompiledFilters, ConfigError, ConfigPatch};
use crate::file_organizer::FileOrganizer;
use crate::logging::init_logging;
use crate::output::OutputFormatter;
use crate::rules::OrganizationRule;
use crate::scheduler::{Job, Scheduler};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_KEEP_BACKUPS: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "tidydesk", version)]
#[command(about = "Sort files into folders by extension, with zip backups", long_about = None)]
pub struct Cli {
    /// Configuration file to use instead of the default lookup
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Move the files of a directory into rule folders
    Organize {
        directory: PathBuf,
        /// Report what would happen without touching any file
        #[arg(long)]
        dry_run: bool,
        /// Skip the backup normally taken before organizing
        #[arg(long)]
        no_backup: bool,
    },
    /// Show where each file would go
    Preview {
        directory: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Count files by extension and rule
    Stats {
        directory: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Print a plain-text organization report
    Report { directory: PathBuf },
    /// Manage zip backups
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
    /// Manage organization rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Run organization on a schedule
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Archive a file or directory
    Create {
        source: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    /// List backups, newest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Extract a backup, given its name or archive path
    Restore {
        archive: String,
        /// Defaults to the original location
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Delete a backup and its metadata
    Delete { name: String },
    /// Keep only the newest backups
    Cleanup {
        #[arg(long)]
        keep: Option<usize>,
    },
    /// Total storage used by backups
    Size {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    /// List rules in priority order
    List,
    /// Append a rule at the lowest priority
    Add {
        #[arg(long)]
        name: String,
        /// File extensions, with or without the leading dot
        #[arg(long = "ext", num_args = 1.., required = true)]
        extensions: Vec<String>,
        #[arg(long)]
        folder: String,
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a rule by name
    Remove { name: String },
    Enable { name: String },
    Disable { name: String },
}

#[derive(Debug, Subcommand)]
pub enum SchedulerCommand {
    /// Show the scheduler configuration and next run
    Status,
    /// Run the scheduler in the foreground
    Start { directory: Option<PathBuf> },
    /// Organize the scheduled directory once, now
    RunNow { directory: Option<PathBuf> },
}

/// Runs one invocation of the CLI.
///
/// ```no_run
/// use clap::Parser;
/// use tidydesk::cli::{Cli, run_cli};
///
/// let cli = Cli::parse_from(["tidydesk", "organize", "/home/user/Downloads", "--dry-run"]);
/// if let Err(e) = run_cli(cli) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(cli: Cli) -> Result<(), String> {
    let (mut config, config_path) = AppConfig::load(cli.config.as_deref())
        .map_err(|e| format!("Error loading configuration: {}", e))?;

    config
        .apply_patch(ConfigPatch {
            log_level: cli.log_level.clone(),
            ..Default::default()
        })
        .map_err(|e| e.to_string())?;

    let _guard = match init_logging(&config.log_level, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            OutputFormatter::warning(&format!("Logging not initialized: {}", e));
            None
        }
    };

    if let Some(path) = &config_path {
        info!(config = %path.display(), "Loaded configuration");
    }

    match cli.command {
        Commands::Organize {
            directory,
            dry_run,
            no_backup,
        } => {
            let patch = ConfigPatch {
                dry_run: dry_run.then_some(true),
                backup_before_organize: no_backup.then_some(false),
                ..Default::default()
            };
            config.apply_patch(patch).map_err(|e| e.to_string())?;
            organize(&config, &directory)
        }
        Commands::Preview { directory, json } => preview(&config, &directory, json),
        Commands::Stats { directory, json } => stats(&config, &directory, json),
        Commands::Report { directory } => {
            let report = inspector(&config)?
                .create_organization_report(&directory)
                .map_err(|e| e.to_string())?;
            OutputFormatter::plain(&report);
            Ok(())
        }
        Commands::Backup { command } => run_backup_command(&config, command),
        Commands::Rules { command } => run_rules_command(config, config_path, command),
        Commands::Scheduler { command } => run_scheduler_command(config, command),
    }
}

/// Rules and filters only; never touches the backup directory.
fn inspector(config: &AppConfig) -> Result<FileOrganizer, String> {
    let filters = CompiledFilters::new(&config.filters).map_err(|e| e.to_string())?;
    Ok(FileOrganizer::new(config.rule_set()).with_filters(filters))
}

fn organize(config: &AppConfig, directory: &Path) -> Result<(), String> {
    let dry_run = config.dry_run;
    if dry_run {
        OutputFormatter::dry_run_notice(&format!("Analyzing {}", directory.display()));
    } else {
        OutputFormatter::info(&format!("Organizing {}", directory.display()));
    }

    let pb = OutputFormatter::create_progress_bar(0);
    let progress = pb.clone();
    let organizer = FileOrganizer::from_config(config)
        .map_err(|e| e.to_string())?
        .with_progress(Box::new(move |index: usize, total: usize, name: &str| {
            progress.set_length(total as u64);
            progress.set_position(index as u64);
            progress.set_message(name.to_string());
        }));

    let result = organizer.organize_directory(directory, dry_run);
    pb.finish_and_clear();
    let stats = result.map_err(|e| e.to_string())?;

    OutputFormatter::run_summary(&stats, dry_run);
    if stats.errors > 0 {
        OutputFormatter::warning("Some files could not be organized. See the log for details.");
    } else if dry_run {
        OutputFormatter::success("Dry run complete. No files were modified.");
    } else {
        OutputFormatter::success("Organization complete!");
    }
    Ok(())
}

fn preview(config: &AppConfig, directory: &Path, json: bool) -> Result<(), String> {
    let entries = inspector(config)?
        .preview_organization(directory)
        .map_err(|e| e.to_string())?;
    if json {
        return print_json(&entries);
    }
    OutputFormatter::header(&format!("PREVIEW: {}", directory.display()));
    OutputFormatter::preview_table(&entries);
    Ok(())
}

fn stats(config: &AppConfig, directory: &Path, json: bool) -> Result<(), String> {
    let stats = inspector(config)?
        .get_file_stats(directory)
        .map_err(|e| e.to_string())?;
    if json {
        return print_json(&stats);
    }
    OutputFormatter::stats_table(&stats);
    Ok(())
}

fn backup_manager(config: &AppConfig) -> Result<BackupManager, String> {
    let dir = config.backup_dir().map_err(|e| e.to_string())?;
    BackupManager::new(dir).map_err(|e| e.to_string())
}

fn run_backup_command(config: &AppConfig, command: BackupCommand) -> Result<(), String> {
    let manager = backup_manager(config)?;

    match command {
        BackupCommand::Create { source, name } => {
            let archive = manager
                .create_backup(&source, name.as_deref())
                .map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("Backup created: {}", archive.display()));
        }
        BackupCommand::List { json } => {
            let backups = manager.list_backups().map_err(|e| e.to_string())?;
            if json {
                return print_json(&backups);
            }
            OutputFormatter::backups_table(&backups);
        }
        BackupCommand::Restore { archive, target } => {
            let archive_path = if Path::new(&archive).is_file() {
                PathBuf::from(&archive)
            } else {
                manager.archive_path(&archive)
            };
            let restored = manager
                .restore_backup(&archive_path, target.as_deref())
                .map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!(
                "Restored {} to {}",
                archive_path.display(),
                restored.display()
            ));
        }
        BackupCommand::Delete { name } => {
            if manager.delete_backup(&name) {
                OutputFormatter::success(&format!("Deleted backup '{}'", name));
            } else {
                return Err(format!("Could not delete backup '{}'", name));
            }
        }
        BackupCommand::Cleanup { keep } => {
            let keep = keep
                .or(config.keep_backups)
                .unwrap_or(DEFAULT_KEEP_BACKUPS);
            let deleted = manager
                .cleanup_old_backups(keep)
                .map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!(
                "Deleted {} old backup(s), kept up to {}",
                deleted, keep
            ));
        }
        BackupCommand::Size { json } => {
            let size = manager.get_backup_size().map_err(|e| e.to_string())?;
            if json {
                return print_json(&size);
            }
            OutputFormatter::backup_size(&size);
        }
    }
    Ok(())
}

fn run_rules_command(
    mut config: AppConfig,
    config_path: Option<PathBuf>,
    command: RulesCommand,
) -> Result<(), String> {
    match command {
        RulesCommand::List => {
            OutputFormatter::rules_table(&config.rules);
            return Ok(());
        }
        RulesCommand::Add {
            name,
            extensions,
            folder,
            disabled,
        } => {
            let rule = OrganizationRule::new(&name, &extensions, &folder)
                .map_err(|e| e.to_string())?
                .with_enabled(!disabled);
            config.add_rule(rule).map_err(|e| e.to_string())?;
            OutputFormatter::success(&format!("Added rule '{}'", name));
        }
        RulesCommand::Remove { name } => {
            if !config.remove_rule(&name) {
                return Err(ConfigError::RuleNotFound(name).to_string());
            }
            OutputFormatter::success(&format!("Removed rule '{}'", name));
        }
        RulesCommand::Enable { name } => set_rule_enabled(&mut config, &name, true)?,
        RulesCommand::Disable { name } => set_rule_enabled(&mut config, &name, false)?,
    }

    let path = match config_path {
        Some(path) => path,
        None => AppConfig::user_config_path()
            .ok_or_else(|| ConfigError::NoPlatformDir("config").to_string())?,
    };
    config.save(&path).map_err(|e| e.to_string())?;
    OutputFormatter::info(&format!("Configuration saved to {}", path.display()));
    Ok(())
}

fn set_rule_enabled(config: &mut AppConfig, name: &str, enabled: bool) -> Result<(), String> {
    let rule = config
        .get_rule(name)
        .cloned()
        .ok_or_else(|| ConfigError::RuleNotFound(name.to_string()).to_string())?;
    config
        .replace_rule(name, rule.with_enabled(enabled))
        .map_err(|e| e.to_string())?;
    let state = if enabled { "Enabled" } else { "Disabled" };
    OutputFormatter::success(&format!("{} rule '{}'", state, name));
    Ok(())
}

fn run_scheduler_command(mut config: AppConfig, command: SchedulerCommand) -> Result<(), String> {
    match command {
        SchedulerCommand::Status => {
            let schedule = &config.scheduler;
            let scheduler = Scheduler::new(schedule.clone(), Arc::new(|| {}));
            OutputFormatter::plain(&format!("Status:    {}", scheduler.status()));
            if schedule.interval_hours > 0 {
                OutputFormatter::plain(&format!("Interval:  every {}h", schedule.interval_hours));
            } else {
                OutputFormatter::plain(&format!(
                    "Daily at:  {} on days {:?}",
                    schedule.time, schedule.days
                ));
            }
            match &schedule.directory {
                Some(dir) => OutputFormatter::plain(&format!("Directory: {}", dir.display())),
                None => OutputFormatter::warning("No scheduled directory configured"),
            }
            Ok(())
        }
        SchedulerCommand::RunNow { directory } => {
            let directory = scheduled_directory(&config, directory)?;
            Scheduler::new(config.scheduler.clone(), scheduled_job(config, directory)).run_now();
            Ok(())
        }
        SchedulerCommand::Start { directory } => {
            let directory = scheduled_directory(&config, directory)?;
            config
                .apply_patch(ConfigPatch {
                    scheduler_enabled: Some(true),
                    ..Default::default()
                })
                .map_err(|e| e.to_string())?;

            let mut scheduler =
                Scheduler::new(config.scheduler.clone(), scheduled_job(config, directory));
            scheduler.start().map_err(|e| e.to_string())?;
            OutputFormatter::info(&scheduler.status());
            scheduler.wait();
            Ok(())
        }
    }
}

fn scheduled_directory(config: &AppConfig, directory: Option<PathBuf>) -> Result<PathBuf, String> {
    directory
        .or_else(|| config.scheduler.directory.clone())
        .ok_or_else(|| "No directory given and none configured in [scheduler]".to_string())
}

fn scheduled_job(config: AppConfig, directory: PathBuf) -> Job {
    Arc::new(move || {
        let result = FileOrganizer::from_config(&config)
            .and_then(|organizer| organizer.organize_directory(&directory, config.dry_run));
        match result {
            Ok(stats) => info!(
                directory = %directory.display(),
                moved = stats.files_moved,
                skipped = stats.files_skipped,
                errors = stats.errors,
                "Scheduled organization finished"
            ),
            Err(e) => error!(directory = %directory.display(), "Scheduled organization failed: {}", e),
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    OutputFormatter::plain(&json);
    Ok(())
}

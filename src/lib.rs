//! tidydesk - keeps a directory tidy
//!
//! This library sorts the files of a directory into subfolders chosen by
//! extension rules, with dry-run and preview modes, zip backups taken before
//! anything moves, and an optional scheduler for periodic runs. Rules,
//! filters and backup settings come from TOML configuration files.

pub mod backup;
pub mod cli;
pub mod config;
pub mod file_organizer;
pub mod logging;
pub mod output;
pub mod rules;
pub mod scheduler;

pub use backup::{BackupError, BackupManager, BackupRecord, BackupSummary};
pub use config::{AppConfig, CompiledFilters, ConfigError, ConfigPatch};
pub use file_organizer::{FileOrganizer, FileStats, OrganizeError, PreviewEntry, RunStatistics};
pub use rules::{OrganizationRule, RuleSet};
pub use scheduler::Scheduler;

pub use cli::{Cli, run_cli};

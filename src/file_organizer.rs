//! File organization engine.
//!
//! Moves the direct files of a directory into rule-named subfolders. Only the
//! top level is scanned: existing subdirectories, including the ones created
//! by earlier runs, are never entered, so organizing twice moves nothing the
//! second time.

use crate::backup::{BackupError, BackupManager};
use crate::config::{AppConfig, CompiledFilters, ConfigError};
use crate::rules::{OrganizationRule, RuleSet, file_extension};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Bucket used by [`FileStats::files_by_rule`] for files no rule claims.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Called after each file with (1-based index, total, file name).
///
/// Runs inline on the organizing thread, so it must return quickly; hand work
/// off to another thread (e.g. a UI event loop) if it needs to do more.
pub type ProgressCallback = Box<dyn Fn(usize, usize, &str) + Send + Sync>;

/// Errors that can occur during file organization operations.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// The directory to organize is missing or not a directory.
    #[error("Directory does not exist or is not a directory: {}", path.display())]
    InvalidDirectory { path: PathBuf },
    /// The safety backup failed; nothing was moved.
    #[error("Backup before organize failed: {0}")]
    Backup(#[from] BackupError),
    #[error("Failed to read directory {}: {source}", path.display())]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to create a rule's target folder.
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Failed to move a file into its target folder.
    #[error("Failed to move {} to {}: {source}", from.display(), to.display())]
    FileMoveFailure {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Path has no file name: {}", .0.display())]
    NoFileName(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for file organization operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Counters for one `organize_directory` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    /// Files looked at, whether moved, skipped or failed.
    pub files_processed: usize,
    /// In dry-run mode, files that would have been moved.
    pub files_moved: usize,
    /// Files no enabled rule claims.
    pub files_skipped: usize,
    /// Files whose move failed.
    pub errors: usize,
    pub start_time: DateTime<Local>,
    /// Unset until the run finishes.
    pub end_time: Option<DateTime<Local>>,
    /// Set when the run stopped early on the cancel flag.
    pub cancelled: bool,
    /// Archive written before any file was touched.
    pub backup_path: Option<PathBuf>,
}

impl RunStatistics {
    fn new() -> Self {
        Self {
            files_processed: 0,
            files_moved: 0,
            files_skipped: 0,
            errors: 0,
            start_time: Local::now(),
            end_time: None,
            cancelled: false,
            backup_path: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Read-only summary of a directory's direct files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileStats {
    /// Direct files that pass the filters.
    pub total_files: usize,
    /// Keyed by normalized extension; files without one use "".
    pub files_by_extension: BTreeMap<String, usize>,
    /// Keyed by rule name, or [`UNCATEGORIZED`].
    pub files_by_rule: BTreeMap<String, usize>,
    /// Sum of file sizes in bytes.
    pub total_size: u64,
}

/// A move that organizing would perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewEntry {
    pub file_name: String,
    pub current_path: PathBuf,
    /// Folder relative to the organized directory.
    pub target_folder: String,
    /// The rule that claims the file.
    pub rule_name: String,
    /// Size in bytes.
    pub file_size: u64,
}

/// Organizes files by moving them into rule target folders.
pub struct FileOrganizer {
    rules: RuleSet,
    filters: CompiledFilters,
    backup: Option<BackupManager>,
    keep_backups: Option<usize>,
    progress: Option<ProgressCallback>,
    cancel: Option<Arc<AtomicBool>>,
}

impl FileOrganizer {
    /// An organizer with no backup, no filters and no progress reporting.
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            filters: CompiledFilters::allow_all(),
            backup: None,
            keep_backups: None,
            progress: None,
            cancel: None,
        }
    }

    /// Builds an organizer from configuration: rules, filters and, when
    /// `backup_before_organize` is set, a backup store with its retention.
    pub fn from_config(config: &AppConfig) -> OrganizeResult<Self> {
        let mut organizer =
            Self::new(config.rule_set()).with_filters(CompiledFilters::new(&config.filters)?);

        if config.backup_before_organize {
            let manager = BackupManager::new(config.backup_dir()?)?;
            organizer = organizer.with_backup(manager);
            if let Some(keep) = config.keep_backups {
                organizer = organizer.with_retention(keep);
            }
        }

        Ok(organizer)
    }

    /// Snapshot the directory with `manager` before every real run.
    pub fn with_backup(mut self, manager: BackupManager) -> Self {
        self.backup = Some(manager);
        self
    }

    /// After each pre-organize backup, keep only the newest `keep` backups.
    ///
    /// The snapshot just taken is always kept, so `0` behaves like `1`.
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep_backups = Some(keep.max(1));
        self
    }

    /// Leave out files the filters exclude, from every operation.
    pub fn with_filters(mut self, filters: CompiledFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Report each file to `callback` as it is processed.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Stop between files once `flag` becomes true.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Organizes the direct files of `directory` into rule target folders.
    ///
    /// With a backup store configured and `dry_run` false, the whole
    /// directory is archived first; if that fails the run aborts before any
    /// file is touched. Each file then goes to the first enabled rule listing
    /// its extension. Files no rule claims are skipped. Name clashes in the
    /// target folder are resolved as `name_1.ext`, `name_2.ext`, ...
    ///
    /// A failure on one file is logged and counted in `errors`; the run
    /// carries on with the next file and already moved files stay moved.
    ///
    /// In dry-run mode nothing on disk changes, but `files_moved` still
    /// counts what a real run would move.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tidydesk::config::default_rules;
    /// use tidydesk::file_organizer::FileOrganizer;
    /// use tidydesk::rules::RuleSet;
    /// use std::path::Path;
    ///
    /// let organizer = FileOrganizer::new(RuleSet::new(default_rules()));
    /// match organizer.organize_directory(Path::new("/home/user/Downloads"), false) {
    ///     Ok(stats) => println!("Moved {} files", stats.files_moved),
    ///     Err(e) => eprintln!("Organization failed: {}", e),
    /// }
    /// ```
    pub fn organize_directory(
        &self,
        directory: &Path,
        dry_run: bool,
    ) -> OrganizeResult<RunStatistics> {
        validate_directory(directory)?;

        let mut stats = RunStatistics::new();
        info!(directory = %directory.display(), dry_run, "Starting organization");

        if !dry_run {
            if let Some(manager) = &self.backup {
                stats.backup_path = Some(self.create_backup(manager, directory)?);
            }
        }

        let files = self.collect_files(directory)?;
        let total = files.len();

        for (index, file_path) in files.iter().enumerate() {
            if self.is_cancelled() {
                warn!(
                    processed = stats.files_processed,
                    total, "Organization cancelled"
                );
                stats.cancelled = true;
                break;
            }

            stats.files_processed += 1;
            let file_name = display_name(file_path);

            if let Some(callback) = &self.progress {
                callback(index + 1, total, &file_name);
            }

            let Some(rule) = self.rules.find_match(file_path) else {
                stats.files_skipped += 1;
                debug!(file = %file_name, "No rule matches");
                continue;
            };

            match move_to_rule_folder(directory, file_path, rule, dry_run) {
                Ok(destination) => {
                    stats.files_moved += 1;
                    if dry_run {
                        info!(
                            "[DRY RUN] Would move {} to {}",
                            file_path.display(),
                            destination.display()
                        );
                    } else {
                        debug!(file = %file_name, folder = %rule.target_folder, "Moved");
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    error!(file = %file_name, "Error processing file: {}", e);
                }
            }
        }

        stats.end_time = Some(Local::now());
        info!(
            processed = stats.files_processed,
            moved = stats.files_moved,
            skipped = stats.files_skipped,
            errors = stats.errors,
            "Organization completed"
        );
        Ok(stats)
    }

    fn create_backup(&self, manager: &BackupManager, directory: &Path) -> OrganizeResult<PathBuf> {
        let archive = manager.create_backup(directory, None).map_err(|e| {
            error!(directory = %directory.display(), "Failed to create backup: {}", e);
            OrganizeError::Backup(e)
        })?;
        info!(archive = %archive.display(), "Backup created");

        if let Some(keep) = self.keep_backups {
            if let Err(e) = manager.cleanup_old_backups(keep) {
                warn!("Backup retention cleanup failed: {}", e);
            }
        }
        Ok(archive)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Direct files of `directory` that pass the filters, in enumeration order.
    fn collect_files(&self, directory: &Path) -> OrganizeResult<Vec<PathBuf>> {
        let entries = fs::read_dir(directory).map_err(|source| OrganizeError::ReadDirectory {
            path: directory.to_path_buf(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(directory = %directory.display(), "Unreadable directory entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if path.is_file() && self.filters.should_include(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Counts files by extension and by matching rule, and sums their sizes.
    pub fn get_file_stats(&self, directory: &Path) -> OrganizeResult<FileStats> {
        validate_directory(directory)?;

        let mut stats = FileStats::default();
        for file_path in self.collect_files(directory)? {
            stats.total_files += 1;
            stats.total_size += file_size(&file_path);

            *stats
                .files_by_extension
                .entry(file_extension(&file_path))
                .or_insert(0) += 1;

            let bucket = self
                .rules
                .find_match(&file_path)
                .map(|rule| rule.name.clone())
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            *stats.files_by_rule.entry(bucket).or_insert(0) += 1;
        }
        Ok(stats)
    }

    /// Lists every file a real run would move, and where to.
    pub fn preview_organization(&self, directory: &Path) -> OrganizeResult<Vec<PreviewEntry>> {
        validate_directory(directory)?;

        Ok(self
            .collect_files(directory)?
            .into_iter()
            .filter_map(|file_path| {
                let rule = self.rules.find_match(&file_path)?;
                Some(PreviewEntry {
                    file_name: display_name(&file_path),
                    file_size: file_size(&file_path),
                    target_folder: rule.target_folder.clone(),
                    rule_name: rule.name.clone(),
                    current_path: file_path,
                })
            })
            .collect())
    }

    /// Plain-text report combining [`Self::get_file_stats`] and
    /// [`Self::preview_organization`].
    pub fn create_organization_report(&self, directory: &Path) -> OrganizeResult<String> {
        let stats = self.get_file_stats(directory)?;
        let preview = self.preview_organization(directory)?;

        let mut report = String::new();
        report.push_str("File Organization Report\n");
        report.push_str("========================\n");
        report.push_str(&format!("Directory: {}\n", directory.display()));
        report.push_str(&format!(
            "Generated: {}\n\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        report.push_str("Summary:\n--------\n");
        report.push_str(&format!("Total files: {}\n", stats.total_files));
        report.push_str(&format!("Total size: {}\n\n", format_size(stats.total_size)));

        report.push_str("Files by category:\n------------------\n");
        for (rule_name, count) in &stats.files_by_rule {
            report.push_str(&format!("{}: {} files\n", rule_name, count));
        }

        report.push_str("\nFiles to be organized:\n");
        report.push_str(&"-".repeat(50));
        report.push('\n');
        for item in &preview {
            report.push_str(&format!(
                "{} -> {} ({})\n",
                item.file_name,
                item.target_folder,
                format_size(item.file_size)
            ));
        }

        Ok(report)
    }
}

fn validate_directory(directory: &Path) -> OrganizeResult<()> {
    if directory.is_dir() {
        Ok(())
    } else {
        Err(OrganizeError::InvalidDirectory {
            path: directory.to_path_buf(),
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Moves a file into `base/rule.target_folder`, creating the folder if needed.
///
/// Returns the final destination. In dry-run mode only the destination is
/// computed.
fn move_to_rule_folder(
    base_path: &Path,
    file_path: &Path,
    rule: &OrganizationRule,
    dry_run: bool,
) -> OrganizeResult<PathBuf> {
    let target_dir = base_path.join(&rule.target_folder);
    let file_name = file_path
        .file_name()
        .ok_or_else(|| OrganizeError::NoFileName(file_path.to_path_buf()))?;
    let destination = unique_destination(&target_dir.join(file_name));

    if dry_run {
        return Ok(destination);
    }

    fs::create_dir_all(&target_dir).map_err(|source| OrganizeError::DirectoryCreationFailed {
        path: target_dir.clone(),
        source,
    })?;

    move_file(file_path, &destination)?;
    Ok(destination)
}

/// Renames, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> OrganizeResult<()> {
    let failure = |source| OrganizeError::FileMoveFailure {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to).map_err(failure)?;
            fs::remove_file(from).map_err(failure)
        }
        Err(e) => Err(failure(e)),
    }
}

/// First free path among `name.ext`, `name_1.ext`, `name_2.ext`, ...
///
/// ```
/// use tidydesk::file_organizer::unique_destination;
/// use std::path::Path;
///
/// let free = unique_destination(Path::new("/definitely/not/here/report.pdf"));
/// assert_eq!(free, Path::new("/definitely/not/here/report.pdf"));
/// ```
pub fn unique_destination(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1u64;
    loop {
        let candidate = parent.join(format!("{}_{}{}", stem, counter, suffix));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Human-readable size, dividing by 1024 per unit step.
///
/// ```
/// use tidydesk::file_organizer::format_size;
///
/// assert_eq!(format_size(512), "512.0 B");
/// assert_eq!(format_size(1536), "1.5 KB");
/// assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
/// ```
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}

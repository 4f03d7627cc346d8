//! Zip snapshots of files and directory trees.
//!
//! Every backup is two files in the backup directory:
//!
//! * `<name>.zip`: the deflate-compressed archive
//! * `<name>_metadata.json`: a pretty-printed [`BackupRecord`]
//!
//! The archive is assembled under a `.partial` name and renamed into place only
//! once complete, so a failed or interrupted backup never leaves a readable but
//! truncated archive behind.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ARCHIVE_EXTENSION: &str = "zip";
const METADATA_SUFFIX: &str = "_metadata.json";
const PARTIAL_SUFFIX: &str = ".partial";
const CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Placeholder for fields of backups whose metadata is missing or unreadable.
pub const UNKNOWN: &str = "Unknown";

/// Errors raised by [`BackupManager`].
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Source path does not exist: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("Backup file does not exist: {}", .0.display())]
    BackupNotFound(PathBuf),
    #[error("A backup named '{0}' already exists")]
    AlreadyExists(String),
    #[error("Invalid backup name '{0}'")]
    InvalidName(String),
    #[error("Cannot back up the backup directory itself: {}", .0.display())]
    SourceIsBackupDir(PathBuf),
    #[error("Failed to create backup directory {}: {source}", path.display())]
    BackupDirUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create backup: {0}")]
    Create(#[source] Box<BackupError>),
    #[error("Failed to restore backup: {0}")]
    Restore(#[source] Box<BackupError>),
    #[error("Archive entry '{0}' would be extracted outside the target directory")]
    UnsafeEntry(String),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Result type for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> BackupError + '_ {
    move |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What was backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    File,
    Directory,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::File => "file",
            BackupType::Directory => "directory",
        }
    }
}

/// The metadata sidecar stored next to every archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_name: String,
    /// Absolute path of the backed-up file or directory.
    pub source_path: PathBuf,
    /// ISO-8601 local timestamp.
    pub created_at: String,
    pub backup_type: BackupType,
    pub file_count: u64,
    pub total_size: u64,
}

impl BackupRecord {
    /// `created_at` as a timestamp, if it parses.
    pub fn created_at_time(&self) -> Option<NaiveDateTime> {
        parse_created_at(&self.created_at)
    }
}

/// One entry of [`BackupManager::list_backups`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupSummary {
    /// Archive file stem.
    pub backup_name: String,
    /// Full path of the `.zip` archive.
    pub backup_path: PathBuf,
    /// Fields below read "Unknown" (or 0) when metadata is missing.
    pub created_at: String,
    /// Directory or file that was archived.
    pub source_path: String,
    /// `"directory"` or `"file"`.
    pub backup_type: String,
    /// Number of files stored in the archive.
    pub file_count: u64,
    /// Uncompressed size of the archived files, in bytes.
    pub total_size: u64,
    /// On-disk size of the archive.
    pub archive_size: u64,
    /// `archive_size` in megabytes, rounded to two decimals.
    pub size_mb: f64,
}

impl BackupSummary {
    fn created_at_time(&self) -> Option<NaiveDateTime> {
        parse_created_at(&self.created_at)
    }
}

/// Aggregate storage used by all archives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupSizeStats {
    /// Sum of all archive sizes.
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub total_size_gb: f64,
    /// Number of `.zip` archives in the store.
    pub backup_count: usize,
}

/// Accepts the native `%Y-%m-%dT%H:%M:%S%.f` form as well as RFC 3339.
fn parse_created_at(value: &str) -> Option<NaiveDateTime> {
    value
        .parse::<NaiveDateTime>()
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Creates, lists, restores and prunes backups in a single directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    /// Opens (and creates, if needed) a backup store rooted at `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>) -> BackupResult<Self> {
        let backup_dir = backup_dir.into();
        fs::create_dir_all(&backup_dir).map_err(|source| BackupError::BackupDirUnavailable {
            path: backup_dir.clone(),
            source,
        })?;
        Ok(Self { backup_dir })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn archive_path(&self, backup_name: &str) -> PathBuf {
        self.backup_dir
            .join(format!("{}.{}", backup_name, ARCHIVE_EXTENSION))
    }

    pub fn metadata_path(&self, backup_name: &str) -> PathBuf {
        self.backup_dir
            .join(format!("{}{}", backup_name, METADATA_SUFFIX))
    }

    fn exists(&self, backup_name: &str) -> bool {
        self.archive_path(backup_name).exists() || self.metadata_path(backup_name).exists()
    }

    /// Archives `source_path` and writes its metadata record.
    ///
    /// Without a name, one is derived from the current time
    /// (`backup_YYYYMMDD_HHMMSS`, suffixed `_1`, `_2`, ... if taken).
    /// An explicit name that is already in use is rejected.
    ///
    /// Returns the path of the new archive.
    pub fn create_backup(
        &self,
        source_path: &Path,
        backup_name: Option<&str>,
    ) -> BackupResult<PathBuf> {
        if !source_path.exists() {
            return Err(BackupError::SourceNotFound(source_path.to_path_buf()));
        }
        if self.is_backup_dir(source_path) {
            return Err(BackupError::SourceIsBackupDir(source_path.to_path_buf()));
        }

        let backup_name = match backup_name {
            Some(name) => {
                validate_backup_name(name)?;
                if self.exists(name) {
                    return Err(BackupError::AlreadyExists(name.to_string()));
                }
                name.to_string()
            }
            None => self.generate_backup_name(),
        };

        let source = std::path::absolute(source_path).map_err(io_err(source_path))?;
        let archive_path = self.archive_path(&backup_name);
        let partial = partial_path(&archive_path);

        info!(
            source = %source.display(),
            backup = %backup_name,
            "Creating backup"
        );

        let (backup_type, file_count, total_size) =
            match self.write_archive(&source, &partial) {
                Ok(summary) => summary,
                Err(e) => {
                    remove_if_exists(&partial);
                    return Err(BackupError::Create(Box::new(e)));
                }
            };

        if let Err(e) = fs::rename(&partial, &archive_path) {
            remove_if_exists(&partial);
            return Err(BackupError::Create(Box::new(BackupError::Io {
                path: archive_path,
                source: e,
            })));
        }

        let record = BackupRecord {
            backup_name: backup_name.clone(),
            source_path: source,
            created_at: Local::now().format(CREATED_AT_FORMAT).to_string(),
            backup_type,
            file_count,
            total_size,
        };

        if let Err(e) = self.write_metadata(&record) {
            remove_if_exists(&archive_path);
            return Err(BackupError::Create(Box::new(e)));
        }

        info!(
            archive = %archive_path.display(),
            files = file_count,
            bytes = total_size,
            "Backup created"
        );
        Ok(archive_path)
    }

    fn is_backup_dir(&self, path: &Path) -> bool {
        match (fs::canonicalize(path), fs::canonicalize(&self.backup_dir)) {
            (Ok(path), Ok(own)) => path == own,
            _ => false,
        }
    }

    fn generate_backup_name(&self) -> String {
        let base = format!("backup_{}", Local::now().format("%Y%m%d_%H%M%S"));
        if !self.exists(&base) {
            return base;
        }
        let mut counter = 1;
        loop {
            let candidate = format!("{}_{}", base, counter);
            if !self.exists(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Writes every file under `source` into a zip at `archive_path`.
    ///
    /// Symlinks are followed, so linked files are stored with their content.
    fn write_archive(
        &self,
        source: &Path,
        archive_path: &Path,
    ) -> BackupResult<(BackupType, u64, u64)> {
        let file = File::create(archive_path).map_err(io_err(archive_path))?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);

        let mut file_count = 0u64;
        let mut total_size = 0u64;

        let backup_type = if source.is_file() {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| BackupError::InvalidName(source.display().to_string()))?;
            total_size += append_file(&mut zip, source, name, options)?;
            file_count += 1;
            BackupType::File
        } else {
            // A store nested inside the source is left out.
            let own_dir = fs::canonicalize(&self.backup_dir).ok();
            let walker = WalkDir::new(source)
                .follow_links(true)
                .into_iter()
                .filter_entry(|entry| {
                    if entry.depth() == 0 || !entry.file_type().is_dir() {
                        return true;
                    }
                    match (&own_dir, fs::canonicalize(entry.path())) {
                        (Some(own), Ok(path)) => path != *own,
                        _ => true,
                    }
                });

            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e.path().unwrap_or(source).to_path_buf();
                    BackupError::Io {
                        path,
                        source: io::Error::other(e),
                    }
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let relative = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(|_| BackupError::InvalidName(entry.path().display().to_string()))?;
                total_size += append_file(&mut zip, entry.path(), archive_name(relative), options)?;
                file_count += 1;
            }
            BackupType::Directory
        };

        zip.finish()?;
        Ok((backup_type, file_count, total_size))
    }

    fn write_metadata(&self, record: &BackupRecord) -> BackupResult<()> {
        let metadata_path = self.metadata_path(&record.backup_name);
        let temp_path = partial_path(&metadata_path);
        let json = serde_json::to_string_pretty(record)?;

        fs::write(&temp_path, json).map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &metadata_path).map_err(|e| {
            remove_if_exists(&temp_path);
            BackupError::Io {
                path: metadata_path.clone(),
                source: e,
            }
        })
    }

    /// Reads the metadata record stored next to `archive_path`, if any.
    pub fn read_metadata(&self, archive_path: &Path) -> BackupResult<Option<BackupRecord>> {
        let Some(stem) = archive_path.file_stem() else {
            return Ok(None);
        };
        let metadata_path = archive_path
            .parent()
            .unwrap_or(&self.backup_dir)
            .join(format!("{}{}", stem.to_string_lossy(), METADATA_SUFFIX));

        if !metadata_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&metadata_path).map_err(io_err(&metadata_path))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Extracts an archive in full.
    ///
    /// Without `target_path`, restores to the original location recorded in
    /// the metadata (the parent directory for single-file backups), or to a
    /// `restored` folder next to the archive when there is no metadata.
    /// Existing files are overwritten.
    pub fn restore_backup(
        &self,
        backup_path: &Path,
        target_path: Option<&Path>,
    ) -> BackupResult<PathBuf> {
        if !backup_path.exists() {
            return Err(BackupError::BackupNotFound(backup_path.to_path_buf()));
        }

        let target = match target_path {
            Some(path) => path.to_path_buf(),
            None => self.default_restore_target(backup_path),
        };

        info!(
            archive = %backup_path.display(),
            target = %target.display(),
            "Restoring backup"
        );

        extract_archive(backup_path, &target).map_err(|e| BackupError::Restore(Box::new(e)))?;
        Ok(target)
    }

    fn default_restore_target(&self, backup_path: &Path) -> PathBuf {
        let fallback = backup_path
            .parent()
            .unwrap_or(&self.backup_dir)
            .join("restored");

        match self.read_metadata(backup_path) {
            Ok(Some(record)) => match record.backup_type {
                BackupType::Directory => record.source_path,
                BackupType::File => record
                    .source_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or(fallback),
            },
            Ok(None) => fallback,
            Err(e) => {
                warn!(archive = %backup_path.display(), "Ignoring unreadable metadata: {}", e);
                fallback
            }
        }
    }

    /// All archives, newest first.
    ///
    /// Backups with missing or malformed metadata are still listed, with
    /// "Unknown" fields, after every dated backup.
    pub fn list_backups(&self) -> BackupResult<Vec<BackupSummary>> {
        let mut backups = Vec::new();

        for archive_path in self.archive_paths()? {
            let backup_name = archive_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let archive_size = fs::metadata(&archive_path)
                .map(|m| m.len())
                .unwrap_or(0);

            let record = match self.read_metadata(&archive_path) {
                Ok(record) => record,
                Err(e) => {
                    warn!(backup = %backup_name, "Skipping malformed metadata: {}", e);
                    None
                }
            };

            let summary = match record {
                Some(record) => BackupSummary {
                    backup_name,
                    backup_path: archive_path,
                    created_at: record.created_at,
                    source_path: record.source_path.display().to_string(),
                    backup_type: record.backup_type.as_str().to_string(),
                    file_count: record.file_count,
                    total_size: record.total_size,
                    archive_size,
                    size_mb: round2(archive_size as f64 / (1024.0 * 1024.0)),
                },
                None => BackupSummary {
                    backup_name,
                    backup_path: archive_path,
                    created_at: UNKNOWN.to_string(),
                    source_path: UNKNOWN.to_string(),
                    backup_type: UNKNOWN.to_string(),
                    file_count: 0,
                    total_size: 0,
                    archive_size,
                    size_mb: round2(archive_size as f64 / (1024.0 * 1024.0)),
                },
            };
            backups.push(summary);
        }

        backups.sort_by(newest_first);
        Ok(backups)
    }

    fn archive_paths(&self) -> BackupResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.backup_dir).map_err(io_err(&self.backup_dir))?;
        Ok(entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext == ARCHIVE_EXTENSION)
            })
            .collect())
    }

    /// Removes an archive and its metadata. Missing files are not an error;
    /// any failure is logged and reported as `false`.
    pub fn delete_backup(&self, backup_name: &str) -> bool {
        if validate_backup_name(backup_name).is_err() {
            warn!(backup = %backup_name, "Refusing to delete backup with invalid name");
            return false;
        }

        for path in [
            self.archive_path(backup_name),
            self.metadata_path(backup_name),
        ] {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::error!(
                        backup = %backup_name,
                        path = %path.display(),
                        "Error deleting backup: {}",
                        e
                    );
                    return false;
                }
            }
        }

        info!(backup = %backup_name, "Backup deleted");
        true
    }

    /// Keeps the `keep_count` newest backups and deletes the rest.
    ///
    /// Returns how many were actually deleted.
    pub fn cleanup_old_backups(&self, keep_count: usize) -> BackupResult<usize> {
        let backups = self.list_backups()?;
        if backups.len() <= keep_count {
            return Ok(0);
        }

        let deleted = backups[keep_count..]
            .iter()
            .filter(|backup| self.delete_backup(&backup.backup_name))
            .count();

        info!(kept = keep_count, deleted, "Old backups cleaned up");
        Ok(deleted)
    }

    /// Total on-disk size and count of all archives (metadata excluded).
    pub fn get_backup_size(&self) -> BackupResult<BackupSizeStats> {
        let archives = self.archive_paths()?;
        let total_size_bytes: u64 = archives
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum();

        Ok(BackupSizeStats {
            total_size_bytes,
            total_size_mb: round2(total_size_bytes as f64 / (1024.0 * 1024.0)),
            total_size_gb: round2(total_size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)),
            backup_count: archives.len(),
        })
    }
}

/// Dated backups newest first, then undated ones; ties broken by name, descending.
fn newest_first(a: &BackupSummary, b: &BackupSummary) -> Ordering {
    match (a.created_at_time(), b.created_at_time()) {
        (Some(ta), Some(tb)) => tb.cmp(&ta),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| b.backup_name.cmp(&a.backup_name))
}

fn validate_backup_name(name: &str) -> BackupResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(BackupError::InvalidName(name.to_string())),
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Could not remove incomplete file: {}", e);
        }
    }
}

/// Zip entry name for a relative path: components joined with '/'.
fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn append_file<W: io::Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    path: &Path,
    name: String,
    options: SimpleFileOptions,
) -> BackupResult<u64> {
    debug!(file = %path.display(), entry = %name, "Adding to archive");
    let mut file = File::open(path).map_err(io_err(path))?;
    zip.start_file(name, options)?;
    io::copy(&mut file, zip).map_err(io_err(path))
}

fn extract_archive(archive_path: &Path, target: &Path) -> BackupResult<()> {
    let file = File::open(archive_path).map_err(io_err(archive_path))?;
    let mut archive = ZipArchive::new(file)?;

    fs::create_dir_all(target).map_err(io_err(target))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| BackupError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(io_err(&out_path))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut out = File::create(&out_path).map_err(io_err(&out_path))?;
        io::copy(&mut entry, &mut out).map_err(io_err(&out_path))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp_dir: &TempDir) -> BackupManager {
        BackupManager::new(temp_dir.path().join("backups")).expect("Failed to open backup store")
    }

    fn source_tree(temp_dir: &TempDir) -> PathBuf {
        let source = temp_dir.path().join("source");
        fs::create_dir_all(source.join("nested/deeper")).unwrap();
        fs::write(source.join("a.txt"), "alpha").unwrap();
        fs::write(source.join("nested/b.bin"), [0u8, 1, 2, 3]).unwrap();
        fs::write(source.join("nested/deeper/c.md"), "# c").unwrap();
        source
    }

    fn fake_backup(manager: &BackupManager, name: &str, created_at: &str) {
        fs::write(manager.archive_path(name), b"not really a zip").unwrap();
        let record = BackupRecord {
            backup_name: name.to_string(),
            source_path: PathBuf::from("/somewhere"),
            created_at: created_at.to_string(),
            backup_type: BackupType::Directory,
            file_count: 1,
            total_size: 1,
        };
        fs::write(
            manager.metadata_path(name),
            serde_json::to_string_pretty(&record).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_create_backup_writes_archive_and_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        let archive = manager.create_backup(&source, Some("snap")).unwrap();
        assert_eq!(archive, manager.archive_path("snap"));
        assert!(archive.exists());
        assert!(!partial_path(&archive).exists());

        let record = manager.read_metadata(&archive).unwrap().unwrap();
        assert_eq!(record.backup_name, "snap");
        assert_eq!(record.backup_type, BackupType::Directory);
        assert_eq!(record.file_count, 3);
        assert_eq!(record.total_size, 5 + 4 + 3);
        assert!(record.source_path.is_absolute());
        assert!(record.created_at_time().is_some());

        let mut archive = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "nested/b.bin", "nested/deeper/c.md"]);
        assert!(archive.by_name("nested/deeper/c.md").is_ok());
    }

    #[test]
    fn test_backing_up_the_store_itself_fails() {
        let temp_dir = TempDir::new().unwrap();
        let store = temp_dir.path().join("store");
        fs::create_dir_all(&store).unwrap();
        fs::write(store.join("photo.jpg"), b"jpg").unwrap();
        let manager = BackupManager::new(&store).unwrap();

        let result = manager.create_backup(&store, Some("self"));
        assert!(matches!(result, Err(BackupError::SourceIsBackupDir(_))));
        assert!(!manager.archive_path("self").exists());
        assert!(!partial_path(&manager.archive_path("self")).exists());
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_store_nested_in_source_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_tree(&temp_dir);
        let manager = BackupManager::new(source.join("backups")).unwrap();

        manager.create_backup(&source, Some("first")).unwrap();
        let archive = manager.create_backup(&source, Some("second")).unwrap();

        let record = manager.read_metadata(&archive).unwrap().unwrap();
        assert_eq!(record.file_count, 3);
        let archive = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert!(archive.file_names().all(|name| !name.starts_with("backups")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_files_are_archived_with_content() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("real.jpg"), b"linked bytes").unwrap();
        let source = temp_dir.path().join("linked");
        fs::create_dir_all(&source).unwrap();
        std::os::unix::fs::symlink(outside.join("real.jpg"), source.join("link.jpg")).unwrap();

        let archive = manager.create_backup(&source, Some("links")).unwrap();
        let record = manager.read_metadata(&archive).unwrap().unwrap();
        assert_eq!(record.file_count, 1);
        assert_eq!(record.total_size, 12);

        let target = temp_dir.path().join("restored");
        manager.restore_backup(&archive, Some(&target)).unwrap();
        assert_eq!(fs::read(target.join("link.jpg")).unwrap(), b"linked bytes");
    }

    #[test]
    fn test_uppercase_extension_is_not_a_backup() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let foreign = manager.backup_dir().join("Foreign.ZIP");
        fs::write(&foreign, b"someone else's archive").unwrap();
        fake_backup(&manager, "backup_20240101_000000", "2024-01-01T00:00:00");

        let listed = manager.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(manager.get_backup_size().unwrap().backup_count, 1);

        assert_eq!(manager.cleanup_old_backups(0).unwrap(), 1);
        assert!(foreign.exists());
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_metadata_json_layout() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        manager.create_backup(&source, Some("layout")).unwrap();
        let json = fs::read_to_string(manager.metadata_path("layout")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        for field in [
            "backup_name",
            "source_path",
            "created_at",
            "backup_type",
            "file_count",
            "total_size",
        ] {
            assert!(value.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(value["backup_type"], "directory");
        assert!(json.contains('\n'), "metadata should be pretty-printed");
    }

    #[test]
    fn test_single_file_backup_stores_base_name() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        let archive = manager
            .create_backup(&source.join("nested/b.bin"), Some("one"))
            .unwrap();
        let record = manager.read_metadata(&archive).unwrap().unwrap();
        assert_eq!(record.backup_type, BackupType::File);
        assert_eq!(record.file_count, 1);

        let archive = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(archive.file_names().collect::<Vec<_>>(), vec!["b.bin"]);
    }

    #[test]
    fn test_missing_source_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        let result = manager.create_backup(&temp_dir.path().join("nope"), None);
        assert!(matches!(result, Err(BackupError::SourceNotFound(_))));
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_explicit_name_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        manager.create_backup(&source, Some("dup")).unwrap();
        let result = manager.create_backup(&source, Some("dup"));
        assert!(matches!(result, Err(BackupError::AlreadyExists(_))));
    }

    #[test]
    fn test_generated_names_never_collide() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        let first = manager.create_backup(&source, None).unwrap();
        let second = manager.create_backup(&source, None).unwrap();
        assert_ne!(first, second);
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("backup_")
        );
        assert_eq!(manager.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_names_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        for name in ["", "../escape", "a/b", ".."] {
            let result = manager.create_backup(&source, Some(name));
            assert!(
                matches!(result, Err(BackupError::InvalidName(_))),
                "name {:?} should be rejected",
                name
            );
        }
        assert!(!manager.delete_backup("../escape"));
    }

    #[test]
    fn test_failed_archive_leaves_nothing_behind() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        // A directory squatting on the partial path makes File::create fail.
        fs::create_dir(partial_path(&manager.archive_path("blocked"))).unwrap();

        let result = manager.create_backup(&source, Some("blocked"));
        assert!(matches!(result, Err(BackupError::Create(_))));
        assert!(!manager.archive_path("blocked").exists());
        assert!(!manager.metadata_path("blocked").exists());
    }

    #[test]
    fn test_backup_dir_inside_source_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let source = source_tree(&temp_dir);
        let manager = BackupManager::new(source.join(".backups")).unwrap();

        let archive = manager.create_backup(&source, Some("self")).unwrap();
        let record = manager.read_metadata(&archive).unwrap().unwrap();
        assert_eq!(record.file_count, 3);
    }

    #[test]
    fn test_restore_roundtrip_to_explicit_target() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        let archive = manager.create_backup(&source, Some("rt")).unwrap();
        let target = temp_dir.path().join("restore-here");
        let restored = manager.restore_backup(&archive, Some(&target)).unwrap();

        assert_eq!(restored, target);
        assert_eq!(fs::read_to_string(target.join("a.txt")).unwrap(), "alpha");
        assert_eq!(fs::read(target.join("nested/b.bin")).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(
            fs::read_to_string(target.join("nested/deeper/c.md")).unwrap(),
            "# c"
        );
    }

    #[test]
    fn test_restore_defaults_to_original_location_and_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        let archive = manager.create_backup(&source, Some("orig")).unwrap();
        fs::write(source.join("a.txt"), "changed").unwrap();
        fs::remove_file(source.join("nested/b.bin")).unwrap();

        let restored = manager.restore_backup(&archive, None).unwrap();
        assert_eq!(restored, std::path::absolute(&source).unwrap());
        assert_eq!(fs::read_to_string(source.join("a.txt")).unwrap(), "alpha");
        assert!(source.join("nested/b.bin").exists());
    }

    #[test]
    fn test_restore_without_metadata_uses_restored_folder() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let source = source_tree(&temp_dir);

        let archive = manager.create_backup(&source, Some("bare")).unwrap();
        fs::remove_file(manager.metadata_path("bare")).unwrap();

        let restored = manager.restore_backup(&archive, None).unwrap();
        assert_eq!(restored, manager.backup_dir().join("restored"));
        assert!(restored.join("nested/deeper/c.md").exists());
    }

    #[test]
    fn test_restore_missing_archive_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        let result = manager.restore_backup(&temp_dir.path().join("gone.zip"), None);
        assert!(matches!(result, Err(BackupError::BackupNotFound(_))));
    }

    #[test]
    fn test_list_sorts_newest_first_and_unknown_last() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        fake_backup(&manager, "old", "2024-01-01T08:00:00.000000");
        fake_backup(&manager, "new", "2024-06-01T08:00:00.000000");
        fake_backup(&manager, "mid", "2024-03-01T08:00:00+00:00");
        fs::write(manager.archive_path("orphan"), b"zip").unwrap();
        fs::write(manager.archive_path("broken"), b"zip").unwrap();
        fs::write(manager.metadata_path("broken"), "{ not json").unwrap();

        let backups = manager.list_backups().unwrap();
        let names: Vec<_> = backups.iter().map(|b| b.backup_name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old", "orphan", "broken"]);

        let orphan = &backups[3];
        assert_eq!(orphan.created_at, UNKNOWN);
        assert_eq!(orphan.source_path, UNKNOWN);
        assert_eq!(orphan.backup_type, UNKNOWN);
        assert_eq!(orphan.archive_size, 3);
    }

    #[test]
    fn test_list_ignores_partial_and_metadata_files() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);

        fs::write(partial_path(&manager.archive_path("half")), b"zip").unwrap();
        fs::write(manager.metadata_path("lonely"), "{}").unwrap();
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        fake_backup(&manager, "gone", "2024-01-01T08:00:00");

        assert!(manager.delete_backup("gone"));
        assert!(!manager.archive_path("gone").exists());
        assert!(!manager.metadata_path("gone").exists());
        assert!(manager.delete_backup("gone"));
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        for (name, day) in [("d1", 1), ("d2", 2), ("d3", 3), ("d4", 4), ("d5", 5)] {
            fake_backup(&manager, name, &format!("2024-05-0{}T10:00:00", day));
        }

        assert_eq!(manager.cleanup_old_backups(10).unwrap(), 0);
        assert_eq!(manager.cleanup_old_backups(2).unwrap(), 3);

        let names: Vec<_> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.backup_name)
            .collect();
        assert_eq!(names, vec!["d5", "d4"]);
    }

    #[test]
    fn test_backup_size_counts_archives_only() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir);
        fs::write(manager.archive_path("a"), vec![0u8; 1024]).unwrap();
        fs::write(manager.archive_path("b"), vec![0u8; 2048]).unwrap();
        fs::write(manager.metadata_path("a"), "x".repeat(500)).unwrap();

        let stats = manager.get_backup_size().unwrap();
        assert_eq!(stats.backup_count, 2);
        assert_eq!(stats.total_size_bytes, 3072);
        assert_eq!(stats.total_size_mb, 0.0);
        assert_eq!(stats.total_size_gb, 0.0);
    }
}

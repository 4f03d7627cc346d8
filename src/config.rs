//! Application configuration.
//!
//! Configuration is stored as TOML. It holds the ordered organization rules,
//! the backup settings, the scheduler settings and optional file filters:
//!
//! ```toml
//! backup_before_organize = true
//! log_level = "info"
//! keep_backups = 10
//!
//! [[rules]]
//! name = "Images"
//! file_extensions = [".jpg", ".png"]
//! target_folder = "Images"
//!
//! [scheduler]
//! enabled = false
//! interval_hours = 24
//! time = "09:00"
//! days = [0, 1, 2, 3, 4, 5, 6]
//!
//! [filters]
//! enable_hidden_files = true
//!
//! [filters.exclude]
//! filenames = [".DS_Store", "Thumbs.db"]
//! patterns = ["*.part"]
//! extensions = ["tmp"]
//! ```

use crate::rules::{OrganizationRule, RuleError, RuleSet};
use chrono::NaiveTime;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the per-directory configuration file.
pub const LOCAL_CONFIG_FILE: &str = ".tidydeskrc.toml";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors that can occur while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Invalid glob pattern '{0}'")]
    InvalidGlobPattern(String),
    #[error("Invalid rule: {0}")]
    InvalidRule(#[from] RuleError),
    #[error("A rule named '{0}' already exists")]
    DuplicateRule(String),
    #[error("No rule named '{0}'")]
    RuleNotFound(String),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Could not determine a default {0} directory for this platform")]
    NoPlatformDir(&'static str),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Settings for the periodic organizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Run every N hours. Zero switches to daily runs at `time`.
    pub interval_hours: u32,
    /// Time of day for daily runs, "HH:MM".
    pub time: String,
    /// Days for daily runs, 0 = Monday .. 6 = Sunday.
    pub days: Vec<u8>,
    /// Directory organized on every run.
    pub directory: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_hours: 24,
            time: "09:00".to_string(),
            days: (0..7).collect(),
            directory: None,
        }
    }
}

impl SchedulerConfig {
    /// Parses `time` as "HH:MM".
    pub fn time_of_day(&self) -> Result<NaiveTime, ConfigError> {
        parse_time_of_day(&self.time)
    }
}

/// Rules that keep files out of organization entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether hidden files (starting with ".") are organized.
    #[serde(default = "default_enable_hidden_files")]
    pub enable_hidden_files: bool,

    #[serde(default)]
    pub exclude: ExcludeRules,
}

fn default_enable_hidden_files() -> bool {
    true
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: default_enable_hidden_files(),
            exclude: ExcludeRules::default(),
        }
    }
}

/// Files matching any of these are never touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames (e.g. ".DS_Store").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name (e.g. "*.part").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Extensions, with or without the dot, case-insensitive.
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backup_before_organize: bool,
    pub dry_run: bool,
    pub log_level: String,
    /// Where archives are stored. Defaults to the platform data directory.
    pub backup_dir: Option<PathBuf>,
    /// Retention applied after every pre-organize backup.
    pub keep_backups: Option<usize>,
    pub rules: Vec<OrganizationRule>,
    pub scheduler: SchedulerConfig,
    pub filters: FilterRules,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backup_before_organize: true,
            dry_run: false,
            log_level: "info".to_string(),
            backup_dir: None,
            keep_backups: None,
            rules: default_rules(),
            scheduler: SchedulerConfig::default(),
            filters: FilterRules::default(),
        }
    }
}

/// The rule set shipped with the application.
pub fn default_rules() -> Vec<OrganizationRule> {
    let table: [(&str, &[&str]); 6] = [
        (
            "Images",
            &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".tiff", ".webp", ".svg"],
        ),
        (
            "Documents",
            &[".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt", ".pages"],
        ),
        (
            "Videos",
            &[".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".mkv"],
        ),
        ("Audio", &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".m4a"]),
        ("Archives", &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2"]),
        (
            "Code",
            &[
                ".py", ".js", ".html", ".css", ".java", ".cpp", ".c", ".h", ".php", ".rb", ".go",
            ],
        ),
    ];

    table
        .iter()
        .map(|(name, extensions)| OrganizationRule {
            name: name.to_string(),
            file_extensions: extensions.iter().map(|ext| ext.to_string()).collect(),
            target_folder: name.to_string(),
            enabled: true,
        })
        .collect()
}

impl AppConfig {
    /// Load configuration, falling back to defaults.
    ///
    /// Lookup order:
    /// 1. `config_path`, if provided (must exist)
    /// 2. `.tidydeskrc.toml` in the current directory
    /// 3. `<config dir>/tidydesk/config.toml`
    /// 4. built-in defaults
    ///
    /// Returns the configuration together with the file it came from, if any.
    pub fn load(config_path: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = config_path {
            return Ok((Self::load_from_file(path)?, Some(path.to_path_buf())));
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            let config = Self::load_from_file(&local_config)?;
            return Ok((config, Some(local_config)));
        }

        if let Some(user_config) = Self::user_config_path() {
            if user_config.exists() {
                let config = Self::load_from_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((Self::default(), None))
    }

    /// `<config dir>/tidydesk/config.toml`, when the platform has a config dir.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tidydesk").join("config.toml"))
    }

    /// Load and validate configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;
        config.validated()
    }

    /// Normalizes every rule and checks every field.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in self.rules {
            let rule = rule.validated()?;
            if !seen.insert(rule.name.clone()) {
                return Err(ConfigError::DuplicateRule(rule.name));
            }
            rules.push(rule);
        }
        self.rules = rules;

        validate_log_level(&self.log_level)?;
        self.log_level = self.log_level.to_lowercase();
        if let Some(keep) = self.keep_backups {
            validate_keep_backups(keep)?;
        }
        self.scheduler.time_of_day()?;
        validate_days(&self.scheduler.days)?;
        CompiledFilters::new(&self.filters)?;
        Ok(self)
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The rules as an ordered [`RuleSet`].
    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.rules.clone())
    }

    /// Resolved backup directory: the configured one or
    /// `<data dir>/TidyDesk/backups`.
    pub fn backup_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.backup_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("TidyDesk").join("backups"))
                .ok_or(ConfigError::NoPlatformDir("data")),
        }
    }

    /// Appends a rule at the lowest priority.
    pub fn add_rule(&mut self, rule: OrganizationRule) -> Result<(), ConfigError> {
        let rule = rule.validated()?;
        if self.get_rule(&rule.name).is_some() {
            return Err(ConfigError::DuplicateRule(rule.name));
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Removes a rule by name. Returns whether a rule was removed.
    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.name != name);
        self.rules.len() != before
    }

    pub fn get_rule(&self, name: &str) -> Option<&OrganizationRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Replaces the rule called `name` with `rule`, keeping its priority.
    pub fn replace_rule(&mut self, name: &str, rule: OrganizationRule) -> Result<(), ConfigError> {
        let rule = rule.validated()?;
        let position = self
            .rules
            .iter()
            .position(|existing| existing.name == name)
            .ok_or_else(|| ConfigError::RuleNotFound(name.to_string()))?;

        if rule.name != name && self.get_rule(&rule.name).is_some() {
            return Err(ConfigError::DuplicateRule(rule.name));
        }

        self.rules.remove(position);
        self.rules.insert(position, rule);
        Ok(())
    }

    /// Validates every field named in `patch`, then merges them.
    ///
    /// A rejected patch leaves the configuration unchanged.
    pub fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(level) = &patch.log_level {
            validate_log_level(level)?;
        }
        if let Some(time) = &patch.scheduler_time {
            parse_time_of_day(time)?;
        }
        if let Some(days) = &patch.scheduler_days {
            validate_days(days)?;
        }
        if let Some(keep) = patch.keep_backups {
            validate_keep_backups(keep)?;
        }

        if let Some(value) = patch.backup_before_organize {
            self.backup_before_organize = value;
        }
        if let Some(value) = patch.dry_run {
            self.dry_run = value;
        }
        if let Some(value) = patch.log_level {
            self.log_level = value.to_lowercase();
        }
        if let Some(value) = patch.backup_dir {
            self.backup_dir = Some(value);
        }
        if let Some(value) = patch.keep_backups {
            self.keep_backups = Some(value);
        }
        if let Some(value) = patch.scheduler_enabled {
            self.scheduler.enabled = value;
        }
        if let Some(value) = patch.scheduler_interval_hours {
            self.scheduler.interval_hours = value;
        }
        if let Some(value) = patch.scheduler_time {
            self.scheduler.time = value;
        }
        if let Some(value) = patch.scheduler_days {
            self.scheduler.days = value;
        }
        if let Some(value) = patch.scheduler_directory {
            self.scheduler.directory = Some(value);
        }
        Ok(())
    }
}

/// A partial update of [`AppConfig`]. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub backup_before_organize: Option<bool>,
    pub dry_run: Option<bool>,
    pub log_level: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub keep_backups: Option<usize>,
    pub scheduler_enabled: Option<bool>,
    pub scheduler_interval_hours: Option<u32>,
    pub scheduler_time: Option<String>,
    pub scheduler_days: Option<Vec<u8>>,
    pub scheduler_directory: Option<PathBuf>,
}

fn validate_log_level(level: &str) -> Result<(), ConfigError> {
    if LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "log_level",
            reason: format!("'{}' is not one of {}", level, LOG_LEVELS.join(", ")),
        })
    }
}

/// Retention runs right after each pre-organize backup, so it must at least
/// keep that snapshot.
fn validate_keep_backups(keep: usize) -> Result<(), ConfigError> {
    if keep == 0 {
        Err(ConfigError::InvalidValue {
            field: "keep_backups",
            reason: "must keep at least one backup".to_string(),
        })
    } else {
        Ok(())
    }
}

fn parse_time_of_day(time: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(time, "%H:%M").map_err(|e| ConfigError::InvalidValue {
        field: "scheduler.time",
        reason: format!("'{}' is not HH:MM ({})", time, e),
    })
}

fn validate_days(days: &[u8]) -> Result<(), ConfigError> {
    match days.iter().find(|day| **day > 6) {
        Some(day) => Err(ConfigError::InvalidValue {
            field: "scheduler.days",
            reason: format!("{} is outside 0 (Monday) ..= 6 (Sunday)", day),
        }),
        None => Ok(()),
    }
}

/// Filter rules pre-processed for matching.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Compiles filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob pattern is invalid.
    pub fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = rules
            .exclude
            .patterns
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
        })
    }

    /// A filter set that lets every file through.
    pub fn allow_all() -> Self {
        Self {
            enable_hidden_files: true,
            ..Self::default()
        }
    }

    /// Whether a file should be considered for organization.
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            if self
                .exclude_extensions
                .contains(&ext.to_string_lossy().to_lowercase())
            {
                return false;
            }
        }

        !self
            .exclude_patterns
            .iter()
            .any(|pattern| pattern.matches(&file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default().validated().unwrap();
        assert!(config.backup_before_organize);
        assert_eq!(config.rules.len(), 6);
        assert_eq!(config.rules[0].name, "Images");
        assert!(config.get_rule("Code").unwrap().matches_extension(".py"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            backup_before_organize = false

            [[rules]]
            name = "Pictures"
            file_extensions = ["JPG", "png"]
            target_folder = "Pictures"
            "#,
        )
        .unwrap();

        assert!(!config.backup_before_organize);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].file_extensions, vec![".jpg", ".png"]);
        assert!(config.rules[0].enabled);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_invalid_rule_rejected_on_load() {
        let result = AppConfig::from_toml(
            r#"
            [[rules]]
            name = "Escape"
            file_extensions = [".txt"]
            target_folder = "../elsewhere"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidRule(_))));
    }

    #[test]
    fn test_duplicate_rule_names_rejected_on_load() {
        let result = AppConfig::from_toml(
            r#"
            [[rules]]
            name = "Docs"
            file_extensions = [".txt"]
            target_folder = "A"

            [[rules]]
            name = "Docs"
            file_extensions = [".pdf"]
            target_folder = "B"
            "#,
        );
        assert!(matches!(result, Err(ConfigError::DuplicateRule(_))));
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.keep_backups = Some(3);
        config.scheduler.directory = Some(PathBuf::from("/tmp/downloads"));
        config.save(&path).expect("Failed to save config");

        let (loaded, source) = AppConfig::load(Some(&path)).expect("Failed to load config");
        assert_eq!(loaded, config);
        assert_eq!(source, Some(path));
    }

    #[test]
    fn test_explicit_missing_config_is_error() {
        let result = AppConfig::load(Some(Path::new("/non/existent/tidydesk.toml")));
        assert!(matches!(result, Err(ConfigError::ConfigNotFound(_))));
    }

    #[test]
    fn test_rule_editing() {
        let mut config = AppConfig::default();

        let rule = OrganizationRule::new("Ebooks", &["epub"], "Books").unwrap();
        config.add_rule(rule.clone()).unwrap();
        assert_eq!(config.rules.last().unwrap().name, "Ebooks");
        assert!(matches!(
            config.add_rule(rule),
            Err(ConfigError::DuplicateRule(_))
        ));

        let replacement = OrganizationRule::new("Pictures", &["jpg"], "Pictures").unwrap();
        config.replace_rule("Images", replacement).unwrap();
        assert_eq!(config.rules[0].name, "Pictures");
        assert!(config.get_rule("Images").is_none());

        assert!(config.remove_rule("Ebooks"));
        assert!(!config.remove_rule("Ebooks"));
        assert!(matches!(
            config.replace_rule("Ebooks", OrganizationRule::new("X", &["x"], "X").unwrap()),
            Err(ConfigError::RuleNotFound(_))
        ));
    }

    #[test]
    fn test_patch_merges_named_fields() {
        let mut config = AppConfig::default();
        config
            .apply_patch(ConfigPatch {
                backup_before_organize: Some(false),
                log_level: Some("DEBUG".to_string()),
                scheduler_time: Some("18:30".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert!(!config.backup_before_organize);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.scheduler.time, "18:30");
        assert_eq!(config.scheduler.interval_hours, 24);
    }

    #[test]
    fn test_rejected_patch_changes_nothing() {
        let mut config = AppConfig::default();
        let before = config.clone();

        let result = config.apply_patch(ConfigPatch {
            backup_before_organize: Some(false),
            scheduler_days: Some(vec![1, 9]),
            ..Default::default()
        });

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        assert_eq!(config, before);

        let result = config.apply_patch(ConfigPatch {
            scheduler_time: Some("25:00".to_string()),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(config, before);
    }

    #[test]
    fn test_zero_keep_backups_rejected() {
        let result = AppConfig::from_toml("keep_backups = 0\n");
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "keep_backups",
                ..
            })
        ));
        assert_eq!(
            AppConfig::from_toml("keep_backups = 1\n").unwrap().keep_backups,
            Some(1)
        );

        let mut config = AppConfig::default();
        let result = config.apply_patch(ConfigPatch {
            keep_backups: Some(0),
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(config.keep_backups, None);
    }

    #[test]
    fn test_default_filters_include_everything() {
        let compiled = CompiledFilters::new(&FilterRules::default()).unwrap();
        assert!(compiled.should_include(Path::new(".hidden")));
        assert!(compiled.should_include(Path::new("file.tmp")));
    }

    #[test]
    fn test_exclude_filters() {
        let rules = FilterRules {
            enable_hidden_files: false,
            exclude: ExcludeRules {
                filenames: vec!["Thumbs.db".to_string()],
                patterns: vec!["*.part".to_string(), "[0-9]*.log".to_string()],
                extensions: vec![".TMP".to_string(), "bak".to_string()],
            },
        };
        let compiled = CompiledFilters::new(&rules).unwrap();

        assert!(!compiled.should_include(Path::new(".DS_Store")));
        assert!(!compiled.should_include(Path::new("Thumbs.db")));
        assert!(!compiled.should_include(Path::new("movie.mkv.part")));
        assert!(!compiled.should_include(Path::new("1server.log")));
        assert!(!compiled.should_include(Path::new("draft.tmp")));
        assert!(!compiled.should_include(Path::new("old.BAK")));

        assert!(compiled.should_include(Path::new("server.log")));
        assert!(compiled.should_include(Path::new("photo.jpg")));
    }

    #[test]
    fn test_invalid_glob_pattern_returns_error() {
        let rules = FilterRules {
            enable_hidden_files: true,
            exclude: ExcludeRules {
                patterns: vec!["[invalid".to_string()],
                ..Default::default()
            },
        };
        assert!(matches!(
            CompiledFilters::new(&rules),
            Err(ConfigError::InvalidGlobPattern(_))
        ));
    }
}

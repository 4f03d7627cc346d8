//! Extension-matching rules that decide where a file belongs.
//!
//! A rule maps a set of file extensions to a target subfolder. Rules live in an
//! ordered [`RuleSet`]; the order is the match priority, so when two enabled
//! rules claim the same extension only the earlier one is ever applied.
//!
//! # Examples
//!
//! ```
//! use tidydesk::rules::{OrganizationRule, RuleSet};
//! use std::path::Path;
//!
//! let images = OrganizationRule::new("Images", &["jpg", ".PNG"], "Images").unwrap();
//! let rules = RuleSet::new(vec![images]);
//!
//! let rule = rules.find_match(Path::new("holiday.png")).unwrap();
//! assert_eq!(rule.target_folder, "Images");
//! assert!(rules.find_match(Path::new("notes.txt")).is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use thiserror::Error;

/// Errors raised when a rule fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule name must not be empty")]
    EmptyName,
    #[error("rule '{rule}' has no file extensions")]
    NoExtensions { rule: String },
    #[error("rule '{rule}' has an empty file extension")]
    EmptyExtension { rule: String },
    #[error("rule '{rule}' has an invalid target folder '{folder}': {reason}")]
    InvalidTargetFolder {
        rule: String,
        folder: String,
        reason: &'static str,
    },
}

/// Maps a list of file extensions to a target subfolder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRule {
    /// Unique, human-readable identifier.
    pub name: String,
    /// Extensions, stored lowercase with a leading dot (".jpg").
    pub file_extensions: Vec<String>,
    /// Subfolder created under the organized directory.
    pub target_folder: String,
    /// Disabled rules never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl OrganizationRule {
    /// Builds an enabled rule, normalizing extensions and validating every field.
    ///
    /// Extensions may be given with or without the leading dot and in any case.
    pub fn new<S: AsRef<str>>(
        name: &str,
        file_extensions: &[S],
        target_folder: &str,
    ) -> Result<Self, RuleError> {
        Self {
            name: name.to_string(),
            file_extensions: file_extensions
                .iter()
                .map(|ext| ext.as_ref().to_string())
                .collect(),
            target_folder: target_folder.to_string(),
            enabled: true,
        }
        .validated()
    }

    /// Returns a copy of this rule with the `enabled` flag replaced.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Normalizes the extension list and checks every field.
    ///
    /// Used for rules coming from deserialized configuration, which bypass
    /// [`OrganizationRule::new`].
    pub fn validated(mut self) -> Result<Self, RuleError> {
        self.name = self.name.trim().to_string();
        if self.name.is_empty() {
            return Err(RuleError::EmptyName);
        }

        if self.file_extensions.is_empty() {
            return Err(RuleError::NoExtensions {
                rule: self.name.clone(),
            });
        }

        let mut normalized: Vec<String> = Vec::with_capacity(self.file_extensions.len());
        for ext in &self.file_extensions {
            let ext = normalize_extension(ext).ok_or_else(|| RuleError::EmptyExtension {
                rule: self.name.clone(),
            })?;
            if !normalized.contains(&ext) {
                normalized.push(ext);
            }
        }
        self.file_extensions = normalized;

        self.target_folder = self.target_folder.trim().to_string();
        validate_target_folder(&self.name, &self.target_folder)?;

        Ok(self)
    }

    /// Returns true if this rule lists the given normalized extension.
    pub fn matches_extension(&self, extension: &str) -> bool {
        self.file_extensions.iter().any(|ext| ext == extension)
    }
}

/// Lowercases an extension and makes sure it starts with a dot.
///
/// Returns `None` for an empty or dot-only extension.
///
/// ```
/// use tidydesk::rules::normalize_extension;
///
/// assert_eq!(normalize_extension("JPG"), Some(".jpg".to_string()));
/// assert_eq!(normalize_extension(".tar"), Some(".tar".to_string()));
/// assert_eq!(normalize_extension("."), None);
/// ```
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

/// The normalized extension of a path (".jpg"), or an empty string when the
/// file has none. Dotfiles such as ".bashrc" have no extension.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn validate_target_folder(rule: &str, folder: &str) -> Result<(), RuleError> {
    let invalid = |reason| RuleError::InvalidTargetFolder {
        rule: rule.to_string(),
        folder: folder.to_string(),
        reason,
    };

    if folder.is_empty() {
        return Err(invalid("folder name is empty"));
    }

    for component in Path::new(folder).components() {
        match component {
            Component::Normal(_) => {}
            Component::CurDir => return Err(invalid("'.' is not allowed")),
            Component::ParentDir => return Err(invalid("'..' is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("folder must be relative"));
            }
        }
    }

    Ok(())
}

/// An ordered collection of rules. Insertion order is match priority.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<OrganizationRule>,
}

impl RuleSet {
    /// Wraps rules in priority order, highest first.
    pub fn new(rules: Vec<OrganizationRule>) -> Self {
        Self { rules }
    }

    /// Finds the first enabled rule claiming the file's extension.
    ///
    /// This is the single matching function shared by organizing, previewing
    /// and statistics, so all three always agree.
    pub fn find_match(&self, path: &Path) -> Option<&OrganizationRule> {
        let extension = file_extension(path);
        if extension.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches_extension(&extension))
    }
}

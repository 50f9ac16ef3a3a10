//! Pre-analysis file filtering.
//!
//! Filters out lock files, vendored dependencies, binary files, and files
//! matching configured glob patterns before they reach the analysis service.
//! Filtered files stay in the [`DiffDocument`]; they are only left out of
//! the requests.

use std::fmt;
use std::path::{Path, PathBuf};

use prwarden_core::{DiffDocument, FileChange, ReviewConfig, WardenError};

/// Decides which files of a diff are sent for analysis.
///
/// # Examples
///
/// ```
/// use prwarden_difflens::filter::DiffFilter;
///
/// let filter = DiffFilter::default_filter();
/// assert!(filter.should_skip("package-lock.json"));
/// assert!(!filter.should_skip("src/main.rs"));
/// ```
pub struct DiffFilter {
    skip_patterns: Vec<glob::Pattern>,
}

impl DiffFilter {
    /// Create a filter with only the built-in rules.
    pub fn default_filter() -> Self {
        Self {
            skip_patterns: Vec::new(),
        }
    }

    /// Create a filter from review configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if a skip pattern is not a valid glob.
    ///
    /// # Examples
    ///
    /// ```
    /// use prwarden_core::ReviewConfig;
    /// use prwarden_difflens::filter::DiffFilter;
    ///
    /// let config = ReviewConfig {
    ///     skip_patterns: vec!["docs/**".into()],
    ///     ..ReviewConfig::default()
    /// };
    /// let filter = DiffFilter::from_config(&config).unwrap();
    /// assert!(filter.should_skip("docs/guide.md"));
    /// ```
    pub fn from_config(config: &ReviewConfig) -> Result<Self, WardenError> {
        let skip_patterns = config
            .skip_patterns
            .iter()
            .map(|pat| {
                glob::Pattern::new(pat).map_err(|e| {
                    WardenError::Config(format!("invalid skip pattern '{pat}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { skip_patterns })
    }

    /// Check if a single file path should be skipped.
    pub fn should_skip(&self, path: &str) -> bool {
        self.check_path(Path::new(path)).is_some()
    }

    /// Split the files of `doc` into analyzable ones and skipped ones.
    ///
    /// Both lists keep diff order.
    pub fn partition<'d>(&self, doc: &'d DiffDocument) -> FilterResult<'d> {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for file in &doc.files {
            match self.check(file) {
                Some(reason) => skipped.push(SkippedFile {
                    path: file.path.clone(),
                    reason,
                }),
                None => kept.push(file),
            }
        }

        FilterResult { kept, skipped }
    }

    fn check(&self, file: &FileChange) -> Option<SkipReason> {
        if file.binary {
            return Some(SkipReason::Binary);
        }
        if file.hunks.is_empty() {
            return Some(SkipReason::NoContent);
        }
        self.check_path(&file.path)
    }

    fn check_path(&self, path: &Path) -> Option<SkipReason> {
        let path_str = path.to_string_lossy();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_lock_file(&file_name) {
            return Some(SkipReason::LockFile);
        }

        if is_vendored(&path_str) {
            return Some(SkipReason::VendoredCode);
        }

        self.skip_patterns
            .iter()
            .find(|pat| pat.matches(&path_str))
            .map(|pat| SkipReason::PatternMatch(pat.to_string()))
    }
}

/// Result of filtering a diff.
#[derive(Debug)]
pub struct FilterResult<'d> {
    /// Files to send for analysis.
    pub kept: Vec<&'d FileChange>,
    /// Files left out, with the reason.
    pub skipped: Vec<SkippedFile>,
}

/// A file left out of analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    /// Path of the skipped file.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Reason a file was not analyzed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Dependency lock file.
    LockFile,
    /// Third-party code checked into the repository.
    VendoredCode,
    /// Binary content.
    Binary,
    /// Rename or mode change without hunks.
    NoContent,
    /// Matched a configured skip pattern.
    PatternMatch(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::LockFile => write!(f, "lock file"),
            SkipReason::VendoredCode => write!(f, "vendored code"),
            SkipReason::Binary => write!(f, "binary file"),
            SkipReason::NoContent => write!(f, "no textual changes"),
            SkipReason::PatternMatch(p) => write!(f, "matches pattern {p}"),
        }
    }
}

fn is_lock_file(name: &str) -> bool {
    const LOCK_FILES: &[&str] = &[
        "Cargo.lock",
        "package-lock.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        "poetry.lock",
        "Pipfile.lock",
        "Gemfile.lock",
        "composer.lock",
        "go.sum",
        "uv.lock",
    ];
    LOCK_FILES.contains(&name)
}

fn is_vendored(path: &str) -> bool {
    const VENDOR_DIRS: &[&str] = &["vendor/", "node_modules/", "third_party/"];
    VENDOR_DIRS
        .iter()
        .any(|dir| path.starts_with(dir) || path.contains(&format!("/{dir}")))
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A parsed unified diff for one pull request.
///
/// Holds every byte of the source text: any preamble before the first file,
/// each file's header block, each hunk's raw text, and trailing
/// whitespace-only lines. [`DiffDocument::as_text`] reproduces the input
/// exactly.
///
/// # Examples
///
/// ```
/// use prwarden_core::DiffDocument;
///
/// let doc = DiffDocument::default();
/// assert!(doc.is_empty());
/// assert_eq!(doc.as_text(), "");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffDocument {
    /// Text before the first file header (e.g. `git format-patch` mail headers).
    pub preamble: String,
    /// File entries in the order they appear in the diff.
    pub files: Vec<FileChange>,
    /// Whitespace-only lines after the last hunk.
    pub trailer: String,
}

impl DiffDocument {
    /// Returns `true` when the diff touches no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Reassemble the full diff text, byte for byte.
    pub fn as_text(&self) -> String {
        let mut out = String::with_capacity(self.byte_len());
        out.push_str(&self.preamble);
        for file in &self.files {
            file.write_text(&mut out);
        }
        out.push_str(&self.trailer);
        out
    }

    /// Concatenation of every hunk's raw text in diff order.
    pub fn hunk_text(&self) -> String {
        self.files
            .iter()
            .flat_map(|f| f.hunks.iter())
            .map(|h| h.text.as_str())
            .collect()
    }

    /// Total size of the reassembled diff in bytes.
    pub fn byte_len(&self) -> usize {
        self.preamble.len()
            + self.files.iter().map(FileChange::byte_len).sum::<usize>()
            + self.trailer.len()
    }

    /// Position of `path` among the files of this diff.
    pub fn position_of(&self, path: &Path) -> Option<usize> {
        self.files.iter().position(|f| f.path == path)
    }
}

/// One file touched by a diff.
///
/// # Examples
///
/// ```
/// use prwarden_core::{ChangeKind, FileChange, Hunk};
/// use std::path::PathBuf;
///
/// let file = FileChange {
///     path: PathBuf::from("src/lib.rs"),
///     old_path: None,
///     kind: ChangeKind::Modified,
///     header: "--- a/src/lib.rs\n+++ b/src/lib.rs\n".into(),
///     hunks: vec![Hunk {
///         old_start: 1,
///         old_lines: 1,
///         new_start: 1,
///         new_lines: 1,
///         text: "@@ -1 +1 @@\n-a\n+b\n".into(),
///     }],
///     binary: false,
/// };
/// assert_eq!(file.changed_lines(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Path of the file after the change (before it, for deletions).
    pub path: PathBuf,
    /// Previous path when the file was renamed.
    pub old_path: Option<PathBuf>,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Raw header block (`diff --git`, mode, index, `---`/`+++` lines).
    pub header: String,
    /// Hunks in diff order.
    pub hunks: Vec<Hunk>,
    /// Whether git reported the file as binary.
    pub binary: bool,
}

impl FileChange {
    /// Append header and hunks to `out` exactly as they appeared.
    pub fn write_text(&self, out: &mut String) {
        out.push_str(&self.header);
        for hunk in &self.hunks {
            out.push_str(&hunk.text);
        }
    }

    /// Size of header plus hunks in bytes.
    pub fn byte_len(&self) -> usize {
        self.header.len() + self.hunks.iter().map(|h| h.text.len()).sum::<usize>()
    }

    /// Number of added plus removed lines.
    pub fn changed_lines(&self) -> usize {
        self.hunks.iter().map(Hunk::changed_lines).sum()
    }
}

/// A single hunk, kept as raw text including its `@@` header line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
    /// Raw hunk text with original line endings.
    pub text: String,
}

impl Hunk {
    /// Number of `+`/`-` body lines.
    pub fn changed_lines(&self) -> usize {
        self.text
            .lines()
            .skip(1)
            .filter(|l| l.starts_with('+') || l.starts_with('-'))
            .count()
    }
}

/// Classification of a file change.
///
/// # Examples
///
/// ```
/// use prwarden_core::ChangeKind;
///
/// assert_eq!(ChangeKind::Renamed.to_string(), "renamed");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// File created by the change.
    Added,
    /// Existing file edited in place.
    Modified,
    /// File removed by the change.
    Deleted,
    /// File moved, possibly with edits.
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

/// Issue severity level for review findings.
///
/// # Examples
///
/// ```
/// use prwarden_core::Severity;
///
/// let s: Severity = serde_json::from_str("\"bug\"").unwrap();
/// assert_eq!(s, Severity::Bug);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A likely defect that should be fixed.
    Bug,
    /// A potential issue worth investigating.
    Warning,
    /// An optional improvement.
    Suggestion,
    /// Informational observation.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Bug => write!(f, "bug"),
            Severity::Warning => write!(f, "warning"),
            Severity::Suggestion => write!(f, "suggestion"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bug" | "error" | "critical" => Ok(Severity::Bug),
            "warning" => Ok(Severity::Warning),
            "suggestion" => Ok(Severity::Suggestion),
            "info" | "note" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One issue or remark produced by the analysis service.
///
/// A finding without a `file` applies to the diff as a whole.
///
/// # Examples
///
/// ```
/// use prwarden_core::{ReviewFinding, Severity};
/// use std::path::PathBuf;
///
/// let finding = ReviewFinding {
///     file: Some(PathBuf::from("src/auth.rs")),
///     line: Some(42),
///     severity: Severity::Bug,
///     message: "Possible null dereference".into(),
/// };
/// assert!(!finding.is_diff_wide());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFinding {
    /// File the finding refers to, if any.
    pub file: Option<PathBuf>,
    /// Line number in the new version of the file.
    pub line: Option<u32>,
    /// Severity of the finding.
    pub severity: Severity,
    /// Explanation of the issue.
    pub message: String,
}

impl ReviewFinding {
    /// Returns `true` if the finding is not tied to a file.
    pub fn is_diff_wide(&self) -> bool {
        self.file.is_none()
    }
}

/// Analysis-service API key.
///
/// Never printed: `Debug` is redacted and there is no `Display`.
///
/// # Examples
///
/// ```
/// use prwarden_core::Credential;
///
/// let key = Credential::new("sk-secret");
/// assert_eq!(format!("{key:?}"), "Credential(***)");
/// assert_eq!(key.expose(), "sk-secret");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw key.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw key for placing it in a request header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the key is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Output format for CLI summaries.
///
/// # Examples
///
/// ```
/// use prwarden_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> DiffDocument {
        DiffDocument {
            preamble: String::new(),
            files: vec![FileChange {
                path: PathBuf::from("a.py"),
                old_path: None,
                kind: ChangeKind::Modified,
                header: "diff --git a/a.py b/a.py\n--- a/a.py\n+++ b/a.py\n".into(),
                hunks: vec![
                    Hunk {
                        old_start: 1,
                        old_lines: 1,
                        new_start: 1,
                        new_lines: 2,
                        text: "@@ -1 +1,2 @@\n x\n+y\n".into(),
                    },
                    Hunk {
                        old_start: 9,
                        old_lines: 1,
                        new_start: 10,
                        new_lines: 0,
                        text: "@@ -9 +10,0 @@\n-z\n".into(),
                    },
                ],
                binary: false,
            }],
            trailer: "\n".into(),
        }
    }

    #[test]
    fn as_text_concatenates_in_order() {
        let doc = sample_doc();
        assert_eq!(
            doc.as_text(),
            "diff --git a/a.py b/a.py\n--- a/a.py\n+++ b/a.py\n@@ -1 +1,2 @@\n x\n+y\n@@ -9 +10,0 @@\n-z\n\n"
        );
        assert_eq!(doc.byte_len(), doc.as_text().len());
    }

    #[test]
    fn hunk_text_excludes_headers() {
        let doc = sample_doc();
        assert_eq!(doc.hunk_text(), "@@ -1 +1,2 @@\n x\n+y\n@@ -9 +10,0 @@\n-z\n");
    }

    #[test]
    fn changed_lines_ignores_hunk_header_and_context() {
        let doc = sample_doc();
        assert_eq!(doc.files[0].changed_lines(), 2);
    }

    #[test]
    fn position_of_finds_file() {
        let doc = sample_doc();
        assert_eq!(doc.position_of(Path::new("a.py")), Some(0));
        assert_eq!(doc.position_of(Path::new("b.py")), None);
    }

    #[test]
    fn severity_from_str_accepts_aliases() {
        assert_eq!("bug".parse::<Severity>().unwrap(), Severity::Bug);
        assert_eq!("Critical".parse::<Severity>().unwrap(), Severity::Bug);
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("note".parse::<Severity>().unwrap(), Severity::Info);
        assert!("blocker".parse::<Severity>().is_err());
    }

    #[test]
    fn finding_serializes_camel_case() {
        let finding = ReviewFinding {
            file: Some(PathBuf::from("a.py")),
            line: Some(3),
            severity: Severity::Warning,
            message: "m".into(),
        };
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["line"], 3);
    }

    #[test]
    fn credential_debug_is_redacted() {
        let key = Credential::new("sk-very-secret");
        let rendered = format!("{:?}", Some(&key));
        assert!(!rendered.contains("sk-very-secret"));
        assert!(Credential::new("  ").is_blank());
    }

    #[test]
    fn change_kind_display() {
        assert_eq!(ChangeKind::Added.to_string(), "added");
        assert_eq!(ChangeKind::Deleted.to_string(), "deleted");
    }
}

//! Report assembly and Markdown rendering.
//!
//! Rendering is a pure function of the diff's file order and the findings:
//! the same inputs always give byte-identical Markdown.

use std::path::{Path, PathBuf};

use prwarden_core::{DiffDocument, ReviewFinding, Severity};

/// Fixed heading placed above the report body in the artifact and the comment.
pub const REPORT_HEADING: &str = "## \u{1f50e} prwarden review";

/// Body of a report for a diff that touches no files.
pub const NO_CHANGES: &str = "No changes to review.";

/// Body of a report for a diff without findings.
pub const NO_ISSUES: &str = "No issues found.";

/// What a section is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionScope {
    /// Remarks about the diff as a whole.
    Summary,
    /// Findings for one file of the diff.
    File(PathBuf),
}

/// One section of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    /// Section subject.
    pub scope: SectionScope,
    /// Findings in render order.
    pub findings: Vec<ReviewFinding>,
}

/// Report content before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportBody {
    /// The diff touched no files.
    NoChanges,
    /// Files changed, but nothing was found.
    NoIssues,
    /// Summary section (if any) followed by file sections in diff order.
    Sections(Vec<ReportSection>),
}

/// The assembled review report.
///
/// # Examples
///
/// ```
/// use prwarden_core::DiffDocument;
/// use prwarden_review::report::{ReviewReport, NO_CHANGES};
///
/// let report = ReviewReport::assemble(&DiffDocument::default(), &[]);
/// assert_eq!(report.to_markdown(), format!("{NO_CHANGES}\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewReport {
    body: ReportBody,
}

impl ReviewReport {
    /// Group `findings` by the files of `doc`.
    ///
    /// Diff-wide findings, and findings naming a file the diff does not
    /// touch, go to a leading summary section in the order they arrived.
    /// File sections follow the diff's file order and list findings by line,
    /// line-less ones last. Files without findings get no section.
    pub fn assemble(doc: &DiffDocument, findings: &[ReviewFinding]) -> Self {
        if doc.is_empty() {
            return Self {
                body: ReportBody::NoChanges,
            };
        }
        if findings.is_empty() {
            return Self {
                body: ReportBody::NoIssues,
            };
        }

        let mut summary = Vec::new();
        let mut per_file: Vec<Vec<ReviewFinding>> = vec![Vec::new(); doc.files.len()];
        for finding in findings {
            match finding.file.as_deref().and_then(|p| locate(doc, p)) {
                Some(idx) => per_file[idx].push(finding.clone()),
                None => summary.push(finding.clone()),
            }
        }

        let mut sections = Vec::new();
        if !summary.is_empty() {
            sections.push(ReportSection {
                scope: SectionScope::Summary,
                findings: summary,
            });
        }
        for (file, mut group) in doc.files.iter().zip(per_file) {
            if group.is_empty() {
                continue;
            }
            group.sort_by_key(|f| (f.line.is_none(), f.line));
            sections.push(ReportSection {
                scope: SectionScope::File(file.path.clone()),
                findings: group,
            });
        }

        Self {
            body: ReportBody::Sections(sections),
        }
    }

    /// Assembled content.
    pub fn body(&self) -> &ReportBody {
        &self.body
    }

    /// Render the report body as Markdown.
    pub fn to_markdown(&self) -> String {
        match &self.body {
            ReportBody::NoChanges => format!("{NO_CHANGES}\n"),
            ReportBody::NoIssues => format!("{NO_ISSUES}\n"),
            ReportBody::Sections(sections) => {
                let rendered: Vec<String> = sections.iter().map(render_section).collect();
                rendered.join("\n")
            }
        }
    }

    /// Render the full artifact: the fixed heading followed by the body.
    pub fn to_document(&self) -> String {
        format!("{REPORT_HEADING}\n\n{}", self.to_markdown())
    }
}

/// Find the diff entry a finding refers to, tolerating `./` and `a/`/`b/` prefixes.
fn locate(doc: &DiffDocument, path: &Path) -> Option<usize> {
    doc.position_of(path).or_else(|| {
        ["./", "b/", "a/"]
            .iter()
            .filter_map(|prefix| path.strip_prefix(prefix).ok())
            .find_map(|stripped| doc.position_of(stripped))
    })
}

fn render_section(section: &ReportSection) -> String {
    let mut out = match &section.scope {
        SectionScope::Summary => "### Summary\n\n".to_string(),
        SectionScope::File(path) => format!("### `{}`\n\n", path.display()),
    };
    for finding in &section.findings {
        let location = match (&section.scope, &finding.file, finding.line) {
            (SectionScope::File(_), _, Some(line)) => format!(" (line {line})"),
            (SectionScope::File(_), _, None) => String::new(),
            (SectionScope::Summary, Some(file), Some(line)) => {
                format!(" `{}:{line}`", file.display())
            }
            (SectionScope::Summary, Some(file), None) => format!(" `{}`", file.display()),
            (SectionScope::Summary, None, _) => String::new(),
        };
        out.push_str(&format!(
            "- {} **{}**{location}: {}\n",
            severity_emoji(finding.severity),
            severity_label(finding.severity),
            indent_continuation(&finding.message),
        ));
    }
    out
}

fn indent_continuation(message: &str) -> String {
    message
        .trim()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n  ")
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Bug => "\u{1f41b}",
        Severity::Warning => "\u{26a0}\u{fe0f}",
        Severity::Suggestion => "\u{1f4a1}",
        Severity::Info => "\u{2139}\u{fe0f}",
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Bug => "Bug",
        Severity::Warning => "Warning",
        Severity::Suggestion => "Suggestion",
        Severity::Info => "Info",
    }
}

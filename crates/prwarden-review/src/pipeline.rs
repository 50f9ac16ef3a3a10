//! Pipeline driver: acquire, analyze, assemble, publish.
//!
//! Stages run strictly in order and each one finishes before the next
//! starts. Any fatal error stops the run before later stages execute, so a
//! failed run never publishes anything.

use std::path::{Path, PathBuf};

use prwarden_core::{Credential, DiffDocument, WardenError};
use prwarden_difflens::acquire::acquire_diff_text;
use prwarden_difflens::parser::parse_unified_diff;
use serde::Serialize;
use tracing::{info, instrument};

use crate::client::{ReviewClient, ReviewOutcome, ReviewStats};
use crate::github::{report_digest, CommentPoster, PullRequestRef, Publisher};
use crate::report::ReviewReport;
use crate::transport::AnalysisTransport;

/// Where the diff comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffSource {
    /// Compute it from a git checkout against a base branch.
    Git {
        /// Directory inside the checkout.
        workdir: PathBuf,
        /// Branch the pull request targets.
        base_branch: String,
    },
    /// Read an existing unified diff file.
    File(PathBuf),
}

/// Inputs for one run, fixed at startup.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Diff input.
    pub diff_source: DiffSource,
    /// Where to save the raw diff acquired from git, if anywhere.
    pub diff_path: Option<PathBuf>,
    /// Where to write the Markdown report.
    pub report_path: PathBuf,
    /// Analysis-service key. Only required when there is something to analyze.
    pub credential: Option<Credential>,
    /// Pull request to comment on.
    pub target: Option<PullRequestRef>,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Review counts.
    pub stats: ReviewStats,
    /// Location of the report artifact.
    pub report_path: PathBuf,
    /// SHA-256 of the report document.
    pub digest: String,
    /// Whether the report was posted to the pull request.
    pub published: bool,
}

/// Sequences the run's stages.
///
/// Without a poster the run stops after writing the report artifact.
pub struct ReviewPipeline<T, P> {
    client: ReviewClient<T>,
    poster: Option<P>,
}

impl<T: AnalysisTransport, P: CommentPoster> ReviewPipeline<T, P> {
    /// Create a pipeline around a review client and an optional comment poster.
    pub fn new(client: ReviewClient<T>, poster: Option<P>) -> Self {
        Self { client, poster }
    }

    /// Execute one run.
    ///
    /// # Errors
    ///
    /// - [`WardenError::DiffUnavailable`] if the diff cannot be acquired or parsed.
    /// - [`WardenError::Config`] if a credential or publish target is missing.
    /// - [`WardenError::AnalysisAuth`] if the service rejects the credential.
    /// - [`WardenError::Io`] if an artifact cannot be written.
    /// - [`WardenError::Publish`] if the comment cannot be posted; the report
    ///   artifact is already on disk at that point.
    #[instrument(skip_all)]
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary, WardenError> {
        if self.poster.is_some() && ctx.target.is_none() {
            return Err(WardenError::Config(
                "no pull request to publish to; pass --pr owner/repo#N or --dry-run".into(),
            ));
        }

        let doc = acquire(ctx).await?;
        info!(files = doc.files.len(), bytes = doc.byte_len(), "diff ready");

        let outcome = if doc.is_empty() {
            info!("no changes to review");
            ReviewOutcome::default()
        } else {
            let credential = ctx.credential.as_ref().ok_or_else(|| {
                WardenError::Config(
                    "no analysis-service API key; export the variable named by llm.api_key_env"
                        .into(),
                )
            })?;
            self.client.review(&doc, credential).await?
        };

        let report = ReviewReport::assemble(&doc, &outcome.findings);
        write_artifact(&ctx.report_path, &report.to_document()).await?;
        info!(path = %ctx.report_path.display(), "report written");

        let mut published = false;
        if let (Some(poster), Some(target)) = (&self.poster, &ctx.target) {
            Publisher::new(poster, target.clone())
                .publish(&report)
                .await?;
            published = true;
        }

        let summary = RunSummary {
            stats: outcome.stats,
            report_path: ctx.report_path.clone(),
            digest: report_digest(&report),
            published,
        };
        info!(
            files = summary.stats.files_total,
            chunks = summary.stats.chunks,
            findings = summary.stats.findings,
            degraded = summary.stats.degraded_chunks,
            published,
            "run complete"
        );
        Ok(summary)
    }
}

async fn acquire(ctx: &RunContext) -> Result<DiffDocument, WardenError> {
    let text = read_diff(&ctx.diff_source).await?;
    if let (DiffSource::Git { .. }, Some(path)) = (&ctx.diff_source, &ctx.diff_path) {
        write_artifact(path, &text).await?;
    }
    parse_unified_diff(&text)
}

/// Produce the raw diff text for `source`.
///
/// Git work runs on the blocking thread pool.
///
/// # Errors
///
/// Returns [`WardenError::DiffUnavailable`] if the repository or base branch
/// cannot be resolved, or the diff file cannot be read.
pub async fn read_diff(source: &DiffSource) -> Result<String, WardenError> {
    match source {
        DiffSource::Git {
            workdir,
            base_branch,
        } => {
            let workdir = workdir.clone();
            let base_branch = base_branch.clone();
            tokio::task::spawn_blocking(move || acquire_diff_text(&workdir, &base_branch))
                .await
                .map_err(|e| WardenError::DiffUnavailable(format!("diff task failed: {e}")))?
        }
        DiffSource::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
            WardenError::DiffUnavailable(format!("cannot read {}: {e}", path.display()))
        }),
    }
}

/// Write `content` to `path`, creating missing parent directories.
///
/// # Errors
///
/// Returns [`WardenError::Io`] if a directory or the file cannot be written.
pub async fn write_artifact(path: &Path, content: &str) -> Result<(), WardenError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{AnalysisRequest, AnalysisResponse};
    use prwarden_core::ReviewConfig;

    struct Unreachable;

    impl AnalysisTransport for Unreachable {
        async fn submit(
            &self,
            _request: &AnalysisRequest,
            _credential: &Credential,
        ) -> Result<AnalysisResponse, WardenError> {
            panic!("the analysis service must not be called");
        }
    }

    struct NoPost;

    impl CommentPoster for NoPost {
        async fn post_comment(
            &self,
            _target: &PullRequestRef,
            _body: &str,
        ) -> Result<(), WardenError> {
            panic!("nothing must be posted");
        }
    }

    fn pipeline(poster: Option<NoPost>) -> ReviewPipeline<Unreachable, NoPost> {
        let client = ReviewClient::new(Unreachable, &ReviewConfig::default()).unwrap();
        ReviewPipeline::new(client, poster)
    }

    fn context(dir: &Path, source: DiffSource) -> RunContext {
        RunContext {
            diff_source: source,
            diff_path: None,
            report_path: dir.join("out/review.md"),
            credential: None,
            target: None,
        }
    }

    #[tokio::test]
    async fn poster_without_target_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), DiffSource::File(dir.path().join("missing.diff")));
        let err = pipeline(Some(NoPost)).run(&ctx).await.unwrap_err();

        assert!(matches!(err, WardenError::Config(_)));
        assert!(!ctx.report_path.exists());
    }

    #[tokio::test]
    async fn missing_diff_file_is_diff_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), DiffSource::File(dir.path().join("missing.diff")));
        let err = pipeline(None).run(&ctx).await.unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert!(!ctx.report_path.exists());
    }

    #[tokio::test]
    async fn empty_diff_needs_no_credential() {
        let dir = tempfile::tempdir().unwrap();
        let diff = dir.path().join("empty.diff");
        std::fs::write(&diff, "").unwrap();
        let ctx = context(dir.path(), DiffSource::File(diff));

        let summary = pipeline(None).run(&ctx).await.unwrap();
        assert!(!summary.published);
        assert_eq!(summary.stats.files_total, 0);
        let written = std::fs::read_to_string(&ctx.report_path).unwrap();
        assert!(written.ends_with("No changes to review.\n"));
    }

    #[tokio::test]
    async fn write_artifact_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/diff.txt");
        write_artifact(&path, "--- a/x\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "--- a/x\n");
    }

    #[tokio::test]
    async fn read_diff_from_missing_repository_is_diff_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = DiffSource::Git {
            workdir: dir.path().to_path_buf(),
            base_branch: "main".into(),
        };
        let err = read_diff(&source).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn changes_without_credential_are_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let diff = dir.path().join("one.diff");
        std::fs::write(&diff, "--- a/x.py\n+++ b/x.py\n@@ -1 +1 @@\n-a\n+b\n").unwrap();
        let ctx = context(dir.path(), DiffSource::File(diff));

        let err = pipeline(None).run(&ctx).await.unwrap_err();
        assert!(matches!(err, WardenError::Config(_)));
        assert!(!ctx.report_path.exists());
    }
}

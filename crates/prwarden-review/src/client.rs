//! Review client: chunked, retrying, bounded-concurrency analysis of a diff.

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use prwarden_core::{Credential, DiffDocument, ReviewConfig, ReviewFinding, Severity, WardenError};
use prwarden_difflens::filter::DiffFilter;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::chunk::{build_chunks, Chunk};
use crate::transport::{AnalysisOptions, AnalysisRequest, AnalysisTransport};

/// Bounded retry with exponential backoff for transient failures.
///
/// # Examples
///
/// ```
/// use prwarden_review::client::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy { retries: 2, backoff: Duration::from_millis(100) };
/// assert_eq!(policy.delay(0), Duration::from_millis(100));
/// assert_eq!(policy.delay(2), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Wait before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Build the policy from review configuration.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            retries: config.retry_count,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Wait before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Counts describing one review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    /// Files in the diff.
    pub files_total: usize,
    /// Files sent for analysis.
    pub files_analyzed: usize,
    /// Files left out by the filter.
    pub files_skipped: usize,
    /// Requests planned.
    pub chunks: usize,
    /// Chunks replaced by an "analysis unavailable" note.
    pub degraded_chunks: usize,
    /// Findings returned, notes included.
    pub findings: usize,
}

/// Findings of a review, in chunk (and therefore file) order.
#[derive(Debug, Clone, Default)]
pub struct ReviewOutcome {
    /// Findings ready for report assembly.
    pub findings: Vec<ReviewFinding>,
    /// Run statistics.
    pub stats: ReviewStats,
}

enum ChunkOutcome {
    Analyzed(Vec<ReviewFinding>),
    Degraded,
}

/// Sends a diff to the analysis service and collects its findings.
///
/// Chunks are submitted with bounded parallelism; results are restored to
/// chunk order before they are returned. A chunk whose transient failures
/// outlast the retry policy, or whose answer is malformed, is replaced by a
/// single diff-wide warning naming its files. An authentication failure on
/// any chunk aborts the whole review.
pub struct ReviewClient<T> {
    transport: T,
    filter: DiffFilter,
    policy: RetryPolicy,
    max_chunk_bytes: usize,
    max_findings: Option<usize>,
    concurrency: usize,
}

impl<T: AnalysisTransport> ReviewClient<T> {
    /// Create a client around `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if a skip pattern is not a valid glob.
    pub fn new(transport: T, config: &ReviewConfig) -> Result<Self, WardenError> {
        Ok(Self {
            transport,
            filter: DiffFilter::from_config(config)?,
            policy: RetryPolicy::from_config(config),
            max_chunk_bytes: config.max_chunk_bytes,
            max_findings: config.max_findings,
            concurrency: config.concurrency.max(1),
        })
    }

    /// Review `doc` with `credential`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::AnalysisAuth`] if the service rejects the
    /// credential. Every other service failure degrades the affected chunk.
    #[instrument(skip_all, fields(files = doc.files.len()))]
    pub async fn review(
        &self,
        doc: &DiffDocument,
        credential: &Credential,
    ) -> Result<ReviewOutcome, WardenError> {
        let filtered = self.filter.partition(doc);
        for skipped in &filtered.skipped {
            debug!(path = %skipped.path.display(), reason = %skipped.reason, "skipping file");
        }

        let chunks = build_chunks(&filtered.kept, self.max_chunk_bytes);
        info!(
            analyzed = filtered.kept.len(),
            skipped = filtered.skipped.len(),
            chunks = chunks.len(),
            "submitting diff for analysis"
        );

        let mut results = Vec::with_capacity(chunks.len());
        let mut pending = stream::iter(chunks.iter())
            .map(|chunk| async move {
                let outcome = self.analyze_chunk(chunk, credential).await;
                (chunk.index, outcome)
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, outcome)) = pending.next().await {
            // An auth failure returns here; chunks still in flight are dropped.
            results.push((index, outcome?));
        }
        results.sort_by_key(|(index, _)| *index);

        let mut findings = Vec::new();
        let mut degraded_chunks = 0;
        for (index, outcome) in results {
            match outcome {
                ChunkOutcome::Analyzed(chunk_findings) => findings.extend(chunk_findings),
                ChunkOutcome::Degraded => {
                    degraded_chunks += 1;
                    findings.push(unavailable_note(&chunks[index].files));
                }
            }
        }

        let stats = ReviewStats {
            files_total: doc.files.len(),
            files_analyzed: filtered.kept.len(),
            files_skipped: filtered.skipped.len(),
            chunks: chunks.len(),
            degraded_chunks,
            findings: findings.len(),
        };
        info!(
            findings = stats.findings,
            degraded = stats.degraded_chunks,
            "analysis complete"
        );
        Ok(ReviewOutcome { findings, stats })
    }

    async fn analyze_chunk(
        &self,
        chunk: &Chunk,
        credential: &Credential,
    ) -> Result<ChunkOutcome, WardenError> {
        let request = AnalysisRequest {
            diff_chunk: chunk.text.clone(),
            options: AnalysisOptions {
                max_findings: self.max_findings,
            },
        };

        let mut attempt = 0;
        loop {
            let result = self
                .transport
                .submit(&request, credential)
                .await
                .and_then(|response| match response.error {
                    Some(message) => Err(WardenError::AnalysisTransient(format!(
                        "service reported: {message}"
                    ))),
                    None => Ok(response.findings),
                });

            match result {
                Ok(mut findings) => {
                    if let Some(max) = self.max_findings {
                        findings.truncate(max);
                    }
                    debug!(chunk = chunk.index, findings = findings.len(), "chunk analyzed");
                    return Ok(ChunkOutcome::Analyzed(findings));
                }
                Err(err @ WardenError::AnalysisAuth(_)) => return Err(err),
                Err(err) if err.is_transient() && attempt < self.policy.retries => {
                    let delay = self.policy.delay(attempt);
                    attempt += 1;
                    warn!(
                        chunk = chunk.index,
                        attempt,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying chunk"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(chunk = chunk.index, error = %err, "analysis unavailable for chunk");
                    return Ok(ChunkOutcome::Degraded);
                }
            }
        }
    }
}

fn unavailable_note(files: &[PathBuf]) -> ReviewFinding {
    let names: Vec<String> = files
        .iter()
        .map(|p| format!("`{}`", p.display()))
        .collect();
    ReviewFinding {
        file: None,
        line: None,
        severity: Severity::Warning,
        message: format!("Analysis unavailable for these files: {}", names.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AnalysisResponse;
    use prwarden_difflens::parser::parse_unified_diff;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const TWO_FILES: &str = "\
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -1,1 +1,2 @@
 x
+y
diff --git a/yarn.lock b/yarn.lock
--- a/yarn.lock
+++ b/yarn.lock
@@ -1 +1 @@
-v1
+v2
diff --git a/b.py b/b.py
--- a/b.py
+++ b/b.py
@@ -1,2 +1,1 @@
 keep
-drop
";

    /// Replays scripted results in order; repeats the last one when exhausted.
    struct Scripted {
        script: Mutex<VecDeque<Result<AnalysisResponse, WardenError>>>,
        last: fn() -> Result<AnalysisResponse, WardenError>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(
            script: Vec<Result<AnalysisResponse, WardenError>>,
            last: fn() -> Result<AnalysisResponse, WardenError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl AnalysisTransport for Scripted {
        async fn submit(
            &self,
            request: &AnalysisRequest,
            _credential: &Credential,
        ) -> Result<AnalysisResponse, WardenError> {
            self.calls.lock().unwrap().push(request.diff_chunk.clone());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.last)
        }
    }

    fn ok_empty() -> Result<AnalysisResponse, WardenError> {
        Ok(AnalysisResponse::default())
    }

    fn transient() -> Result<AnalysisResponse, WardenError> {
        Err(WardenError::AnalysisTransient("timed out".into()))
    }

    fn finding(file: &str, line: u32) -> ReviewFinding {
        ReviewFinding {
            file: Some(PathBuf::from(file)),
            line: Some(line),
            severity: Severity::Bug,
            message: format!("issue at {line}"),
        }
    }

    fn config() -> ReviewConfig {
        ReviewConfig {
            retry_backoff_ms: 0,
            ..ReviewConfig::default()
        }
    }

    fn doc() -> DiffDocument {
        parse_unified_diff(TWO_FILES).unwrap()
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(250),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn skipped_files_are_not_sent() {
        let transport = Scripted::new(vec![], ok_empty);
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let outcome = client.review(&doc(), &Credential::new("k")).await.unwrap();

        assert_eq!(transport.calls(), 1);
        let sent = transport.calls.lock().unwrap()[0].clone();
        assert!(sent.contains("+++ b/a.py"));
        assert!(sent.contains("+++ b/b.py"));
        assert!(!sent.contains("yarn.lock"));
        assert_eq!(outcome.stats.files_total, 3);
        assert_eq!(outcome.stats.files_skipped, 1);
        assert_eq!(outcome.stats.chunks, 1);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let transport = Scripted::new(
            vec![
                transient(),
                Ok(AnalysisResponse {
                    findings: vec![finding("a.py", 2)],
                    error: None,
                }),
            ],
            ok_empty,
        );
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let outcome = client.review(&doc(), &Credential::new("k")).await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(outcome.findings, vec![finding("a.py", 2)]);
        assert_eq!(outcome.stats.degraded_chunks, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_degrade_the_chunk() {
        let transport = Scripted::new(vec![], transient);
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let outcome = client.review(&doc(), &Credential::new("k")).await.unwrap();

        assert_eq!(transport.calls(), 3);
        assert_eq!(outcome.stats.degraded_chunks, 1);
        assert_eq!(outcome.findings.len(), 1);
        let note = &outcome.findings[0];
        assert!(note.is_diff_wide());
        assert_eq!(note.severity, Severity::Warning);
        assert_eq!(
            note.message,
            "Analysis unavailable for these files: `a.py`, `b.py`"
        );
    }

    #[tokio::test]
    async fn service_error_field_is_retried() {
        let transport = Scripted::new(
            vec![Ok(AnalysisResponse {
                findings: vec![],
                error: Some("overloaded".into()),
            })],
            ok_empty,
        );
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let outcome = client.review(&doc(), &Credential::new("k")).await.unwrap();

        assert_eq!(transport.calls(), 2);
        assert_eq!(outcome.stats.degraded_chunks, 0);
    }

    #[tokio::test]
    async fn malformed_response_degrades_without_retry() {
        let transport = Scripted::new(
            vec![Err(WardenError::MalformedResponse("not json".into()))],
            ok_empty,
        );
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let outcome = client.review(&doc(), &Credential::new("k")).await.unwrap();

        assert_eq!(transport.calls(), 1);
        assert_eq!(outcome.stats.degraded_chunks, 1);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal() {
        let transport = Scripted::new(
            vec![Err(WardenError::AnalysisAuth("HTTP 401".into()))],
            ok_empty,
        );
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let err = client
            .review(&doc(), &Credential::new("k"))
            .await
            .unwrap_err();

        assert!(matches!(err, WardenError::AnalysisAuth(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn findings_are_capped_per_chunk() {
        let transport = Scripted::new(
            vec![Ok(AnalysisResponse {
                findings: vec![finding("a.py", 1), finding("a.py", 2), finding("b.py", 1)],
                error: None,
            })],
            ok_empty,
        );
        let cfg = ReviewConfig {
            max_findings: Some(2),
            ..config()
        };
        let client = ReviewClient::new(&transport, &cfg).unwrap();
        let outcome = client.review(&doc(), &Credential::new("k")).await.unwrap();

        assert_eq!(outcome.findings.len(), 2);
    }

    #[tokio::test]
    async fn empty_diff_makes_no_requests() {
        let transport = Scripted::new(vec![], ok_empty);
        let client = ReviewClient::new(&transport, &config()).unwrap();
        let outcome = client
            .review(&DiffDocument::default(), &Credential::new("k"))
            .await
            .unwrap();

        assert_eq!(transport.calls(), 0);
        assert!(outcome.findings.is_empty());
        assert_eq!(outcome.stats, ReviewStats::default());
    }

    #[test]
    fn invalid_skip_pattern_is_rejected() {
        let cfg = ReviewConfig {
            skip_patterns: vec!["[".into()],
            ..config()
        };
        let transport = Scripted::new(vec![], ok_empty);
        assert!(ReviewClient::new(&transport, &cfg).is_err());
    }
}

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use prwarden_core::WardenError;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::report::ReviewReport;

/// The pull request a run comments on.
///
/// # Examples
///
/// ```
/// use prwarden_review::github::PullRequestRef;
///
/// let pr: PullRequestRef = "rust-lang/rust#12345".parse().unwrap();
/// assert_eq!(pr.owner, "rust-lang");
/// assert_eq!(pr.repo, "rust");
/// assert_eq!(pr.number, 12345);
/// assert_eq!(pr.to_string(), "rust-lang/rust#12345");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl PullRequestRef {
    /// Resolve the pull request from a GitHub Actions environment
    /// (`GITHUB_REPOSITORY` and the event payload at `GITHUB_EVENT_PATH`).
    ///
    /// Returns `Ok(None)` outside of Actions or for events that are not about
    /// a pull request.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Io`] if the event file cannot be read, or
    /// [`WardenError::Config`] if its content is not usable.
    pub fn from_actions_env() -> Result<Option<Self>, WardenError> {
        let (Ok(repository), Ok(event_path)) = (
            std::env::var("GITHUB_REPOSITORY"),
            std::env::var("GITHUB_EVENT_PATH"),
        ) else {
            return Ok(None);
        };
        let event = std::fs::read_to_string(Path::new(&event_path))?;
        Self::from_actions_event(&repository, &event)
    }

    /// Resolve the pull request from a repository slug and an event payload.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if the slug is not `owner/repo` or the
    /// payload is not JSON.
    ///
    /// # Examples
    ///
    /// ```
    /// use prwarden_review::github::PullRequestRef;
    ///
    /// let event = r#"{"pull_request": {"number": 7}}"#;
    /// let pr = PullRequestRef::from_actions_event("octocat/hello", event).unwrap().unwrap();
    /// assert_eq!(pr.to_string(), "octocat/hello#7");
    /// ```
    pub fn from_actions_event(repository: &str, event: &str) -> Result<Option<Self>, WardenError> {
        let (owner, repo) = split_slug(repository)?;
        let payload: serde_json::Value = serde_json::from_str(event)
            .map_err(|e| WardenError::Config(format!("unreadable GitHub event payload: {e}")))?;
        let number = payload
            .get("pull_request")
            .and_then(|pr| pr.get("number"))
            .and_then(serde_json::Value::as_u64);
        Ok(number.map(|number| Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        }))
    }
}

impl FromStr for PullRequestRef {
    type Err = WardenError;

    fn from_str(pr_ref: &str) -> Result<Self, Self::Err> {
        let Some((owner_repo, number_str)) = pr_ref.split_once('#') else {
            return Err(WardenError::Config(format!(
                "invalid PR reference '{pr_ref}', expected owner/repo#number"
            )));
        };
        let (owner, repo) = split_slug(owner_repo)?;
        let number: u64 = number_str
            .parse()
            .map_err(|_| WardenError::Config(format!("invalid PR number: {number_str}")))?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        })
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

fn split_slug(slug: &str) -> Result<(&str, &str), WardenError> {
    match slug.split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner, repo))
        }
        _ => Err(WardenError::Config(format!(
            "invalid repository '{slug}', expected owner/repo"
        ))),
    }
}

/// Capability to post one comment on a pull request.
#[allow(async_fn_in_trait)]
pub trait CommentPoster {
    /// Post `body` as a new comment on `target`.
    async fn post_comment(&self, target: &PullRequestRef, body: &str) -> Result<(), WardenError>;
}

impl<P: CommentPoster> CommentPoster for &P {
    async fn post_comment(&self, target: &PullRequestRef, body: &str) -> Result<(), WardenError> {
        (**self).post_comment(target, body).await
    }
}

/// GitHub client that posts review reports as issue comments.
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
}

impl GitHubClient {
    /// Create a client from an explicit token or the `GITHUB_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if no token is available or the client
    /// cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use prwarden_review::github::GitHubClient;
    ///
    /// let client = GitHubClient::new(None).unwrap();
    /// ```
    pub fn new(token: Option<&str>) -> Result<Self, WardenError> {
        let token = match token {
            Some(t) => t.to_string(),
            None => std::env::var("GITHUB_TOKEN").map_err(|_| {
                WardenError::Config(
                    "GITHUB_TOKEN not set. Export it or pass --dry-run to skip publishing".into(),
                )
            })?,
        };

        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| WardenError::Config(format!("failed to create GitHub client: {e}")))?;

        Ok(Self { octocrab })
    }
}

impl CommentPoster for GitHubClient {
    async fn post_comment(&self, target: &PullRequestRef, body: &str) -> Result<(), WardenError> {
        self.octocrab
            .issues(&target.owner, &target.repo)
            .create_comment(target.number, body)
            .await
            .map_err(|e| WardenError::Publish(format!("comment on {target} failed: {e}")))?;
        Ok(())
    }
}

/// Hex SHA-256 of the rendered report document.
pub fn report_digest(report: &ReviewReport) -> String {
    let digest = Sha256::digest(report.to_document().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Comment text for `report`: the document plus a hidden digest marker, so
/// reruns that produced the same report can be recognized.
pub fn comment_body(report: &ReviewReport) -> String {
    format!(
        "{}\n<!-- prwarden:digest={} -->\n",
        report.to_document(),
        report_digest(report)
    )
}

/// Delivers one report to one pull request.
///
/// [`Publisher::publish`] consumes the publisher, so a run can post at most
/// one comment through it.
pub struct Publisher<P> {
    poster: P,
    target: PullRequestRef,
}

impl<P: CommentPoster> Publisher<P> {
    /// Prepare delivery to `target`.
    pub fn new(poster: P, target: PullRequestRef) -> Self {
        Self { poster, target }
    }

    /// Post the report. Failures are not retried.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Publish`] if the comment could not be posted.
    pub async fn publish(self, report: &ReviewReport) -> Result<(), WardenError> {
        let body = comment_body(report);
        self.poster.post_comment(&self.target, &body).await?;
        info!(pr = %self.target, bytes = body.len(), "review published");
        Ok(())
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::WardenError;

/// Environment variable consulted when the one named by `llm.api_key_env` is unset.
pub const FALLBACK_API_KEY_ENV: &str = "PRWARDEN_API_KEY";

/// Top-level configuration loaded from `.prwarden.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// The analysis-service credential is never part of this file; only the name
/// of the environment variable that carries it.
///
/// # Examples
///
/// ```
/// use prwarden_core::WardenConfig;
///
/// let config = WardenConfig::default();
/// assert_eq!(config.review.base_branch, "main");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Analysis service settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Review behavior settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// Artifact locations.
    #[serde(default)]
    pub output: OutputConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Io`] if the file cannot be read, or
    /// [`WardenError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use prwarden_core::WardenConfig;
    /// use std::path::Path;
    ///
    /// let config = WardenConfig::from_file(Path::new(".prwarden.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, WardenError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use prwarden_core::WardenConfig;
    ///
    /// let toml = r#"
    /// [review]
    /// base_branch = "develop"
    /// "#;
    /// let config = WardenConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.review.base_branch, "develop");
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, WardenError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make a run meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] naming the offending key.
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.review.max_chunk_bytes == 0 {
            return Err(WardenError::Config(
                "review.max_chunk_bytes must be greater than zero".into(),
            ));
        }
        if self.review.concurrency == 0 {
            return Err(WardenError::Config(
                "review.concurrency must be at least 1".into(),
            ));
        }
        if self.review.base_branch.trim().is_empty() {
            return Err(WardenError::Config("review.base_branch is empty".into()));
        }
        for pattern in &self.review.skip_patterns {
            if pattern.trim().is_empty() {
                return Err(WardenError::Config(
                    "review.skip_patterns contains an empty pattern".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Analysis service configuration.
///
/// # Examples
///
/// ```
/// use prwarden_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// assert_eq!(config.api_key_env, "OPENAI_API_KEY");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name, `"openai"` or `"ollama"`. Picks the default endpoint
    /// when `base_url` is unset.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// Custom base URL for an OpenAI-compatible endpoint.
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Review behavior configuration.
///
/// # Examples
///
/// ```
/// use prwarden_core::ReviewConfig;
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.max_chunk_bytes, 48_000);
/// assert_eq!(config.retry_count, 2);
/// assert_eq!(config.retry_backoff_ms, 1000);
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Branch the pull request targets (default: `main`).
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Size threshold in bytes above which the diff is split into chunks (default: 48000).
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
    /// Upper bound on findings requested per chunk.
    pub max_findings: Option<usize>,
    /// Extra attempts after a transient failure (default: 2).
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Initial backoff between attempts in milliseconds, doubled each retry (default: 1000).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Chunks analyzed in parallel (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Glob patterns for files never sent for analysis.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
}

fn default_base_branch() -> String {
    "main".into()
}

fn default_max_chunk_bytes() -> usize {
    48_000
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_concurrency() -> usize {
    4
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            max_chunk_bytes: default_max_chunk_bytes(),
            max_findings: None,
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            concurrency: default_concurrency(),
            skip_patterns: Vec::new(),
        }
    }
}

/// Where the run writes its artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Raw diff captured from git (default: `diff.txt`).
    #[serde(default = "default_diff_path")]
    pub diff_path: PathBuf,
    /// Rendered Markdown report (default: `review.md`).
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
}

fn default_diff_path() -> PathBuf {
    PathBuf::from("diff.txt")
}

fn default_report_path() -> PathBuf {
    PathBuf::from("review.md")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            diff_path: default_diff_path(),
            report_path: default_report_path(),
        }
    }
}

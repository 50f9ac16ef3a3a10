use miette::Diagnostic;

/// Errors that can occur during a review run.
///
/// The variants follow the run's failure taxonomy: diff acquisition and
/// publishing failures are always fatal, authentication failures abort the
/// run, and transient or malformed analysis results are recovered per chunk
/// by the review client.
///
/// # Examples
///
/// ```
/// use prwarden_core::WardenError;
///
/// let err = WardenError::DiffUnavailable("unknown ref 'main'".into());
/// assert!(err.to_string().contains("unknown ref"));
/// assert_eq!(err.exit_code(), 2);
/// ```
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum WardenError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(prwarden::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(prwarden::config))]
    Config(String),

    /// The base branch is unreachable or the diff could not be parsed.
    #[error("diff unavailable: {0}")]
    #[diagnostic(
        code(prwarden::diff_unavailable),
        help("make sure the base branch is fetched, e.g. `git fetch origin main`")
    )]
    DiffUnavailable(String),

    /// The analysis service rejected the credential.
    #[error("analysis service rejected the credential: {0}")]
    #[diagnostic(
        code(prwarden::analysis_auth),
        help("check the API key exported in the variable named by `llm.api_key_env`")
    )]
    AnalysisAuth(String),

    /// A network or service error that may succeed on retry.
    #[error("analysis service unavailable: {0}")]
    #[diagnostic(code(prwarden::analysis_transient))]
    AnalysisTransient(String),

    /// The analysis service answered with an unexpected shape.
    #[error("malformed analysis response: {0}")]
    #[diagnostic(code(prwarden::malformed_response))]
    MalformedResponse(String),

    /// The comment could not be delivered to the pull request.
    #[error("failed to publish review: {0}")]
    #[diagnostic(
        code(prwarden::publish),
        help("the report artifact was written locally; rerun the job to retry posting")
    )]
    Publish(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(prwarden::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(prwarden::toml))]
    Toml(#[from] toml::de::Error),
}

impl WardenError {
    /// Process exit status for this error when it aborts a run.
    ///
    /// `2` diff unavailable, `3` authentication failure, `4` publish failure,
    /// `1` for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            WardenError::DiffUnavailable(_) => 2,
            WardenError::AnalysisAuth(_) => 3,
            WardenError::Publish(_) => 4,
            _ => 1,
        }
    }

    /// Returns `true` for errors worth retrying against the analysis service.
    pub fn is_transient(&self) -> bool {
        matches!(self, WardenError::AnalysisTransient(_))
    }
}

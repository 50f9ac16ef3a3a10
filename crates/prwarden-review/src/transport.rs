use prwarden_core::{Credential, ReviewFinding, WardenError};
use serde::Serialize;

/// One analysis request: a bounded slice of the diff plus options.
///
/// The credential travels next to the request, never inside it, so the
/// payload can be logged or shown to the model without leaking the key.
///
/// # Examples
///
/// ```
/// use prwarden_review::transport::{AnalysisOptions, AnalysisRequest};
///
/// let request = AnalysisRequest {
///     diff_chunk: "+added".into(),
///     options: AnalysisOptions { max_findings: Some(3) },
/// };
/// let json = serde_json::to_value(&request).unwrap();
/// assert_eq!(json["options"]["max_findings"], 3);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    /// Raw unified-diff text of the chunk.
    pub diff_chunk: String,
    /// Request options.
    pub options: AnalysisOptions,
}

/// Options forwarded with every request.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnalysisOptions {
    /// Upper bound on findings the service should return.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_findings: Option<usize>,
}

/// Validated answer for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisResponse {
    /// Findings in the order the service produced them.
    pub findings: Vec<ReviewFinding>,
    /// Service-side error message, if the service reported one.
    pub error: Option<String>,
}

/// Narrow seam to the external analysis service.
///
/// Implementations report failures with the run's taxonomy:
/// [`WardenError::AnalysisAuth`] when the credential is rejected,
/// [`WardenError::AnalysisTransient`] for failures worth retrying, and
/// [`WardenError::MalformedResponse`] for answers that cannot be used.
#[allow(async_fn_in_trait)]
pub trait AnalysisTransport {
    /// Submit one chunk and return the service's findings.
    async fn submit(
        &self,
        request: &AnalysisRequest,
        credential: &Credential,
    ) -> Result<AnalysisResponse, WardenError>;
}

impl<T: AnalysisTransport> AnalysisTransport for &T {
    async fn submit(
        &self,
        request: &AnalysisRequest,
        credential: &Credential,
    ) -> Result<AnalysisResponse, WardenError> {
        (**self).submit(request, credential).await
    }
}

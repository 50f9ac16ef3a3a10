use std::time::Duration;

use prwarden_core::{Credential, LlmConfig, WardenError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::prompt::{build_review_prompt, build_system_prompt, parse_analysis_response};
use crate::transport::{AnalysisRequest, AnalysisResponse, AnalysisTransport};

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use prwarden_review::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage {
///     role: Role::User,
///     content: "Review this code".into(),
/// };
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Text content of the message.
    pub content: String,
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions.
    System,
    /// User input.
    User,
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider that exposes the `/v1/chat/completions` endpoint:
/// OpenAI, Ollama, vLLM, LiteLLM, etc. The credential is only ever placed in
/// the `Authorization` header.
///
/// # Examples
///
/// ```
/// use prwarden_core::LlmConfig;
/// use prwarden_review::llm::LlmClient;
///
/// let client = LlmClient::new(&LlmConfig::default()).unwrap();
/// assert_eq!(client.model(), "gpt-4o");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    base_url: String,
}

/// Default endpoint root for a provider, or `None` if prwarden cannot talk to it.
fn provider_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("https://api.openai.com"),
        "ollama" => Some("http://localhost:11434"),
        _ => None,
    }
}

impl LlmClient {
    /// Create a new LLM client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if the provider is not supported or
    /// the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, WardenError> {
        let default_base = provider_base_url(&config.provider).ok_or_else(|| {
            WardenError::Config(format!(
                "unsupported llm.provider '{}'; use \"openai\" or \"ollama\" (any \
                 OpenAI-compatible server works with provider \"openai\" and base_url)",
                config.provider
            ))
        })?;
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(default_base)
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("prwarden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WardenError::Config(format!("failed to create HTTP client: {e}")))?;
        debug!(provider = %config.provider, base_url = %base_url, "llm client ready");
        Ok(Self {
            client,
            config: config.clone(),
            base_url,
        })
    }

    /// Return the model name from the configuration.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    /// Send a chat completion request and return the text of the first choice.
    ///
    /// # Errors
    ///
    /// - [`WardenError::AnalysisAuth`] on HTTP 401 or 403.
    /// - [`WardenError::AnalysisTransient`] on timeouts, connection errors,
    ///   HTTP 408, 429 and 5xx.
    /// - [`WardenError::MalformedResponse`] on any other status or an
    ///   unexpected response body.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        credential: &Credential,
    ) -> Result<String, WardenError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    "timed out"
                } else if e.is_connect() {
                    "connection failed"
                } else {
                    "request failed"
                };
                WardenError::AnalysisTransient(format!("{kind}: {}", e.without_url()))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body_text));
        }

        let response_body: serde_json::Value = response.json().await.map_err(|e| {
            WardenError::MalformedResponse(format!("response body is not JSON: {e}"))
        })?;

        let content = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                WardenError::MalformedResponse("response has no choices[0].message.content".into())
            })?;

        Ok(content.to_string())
    }
}

impl AnalysisTransport for LlmClient {
    async fn submit(
        &self,
        request: &AnalysisRequest,
        credential: &Credential,
    ) -> Result<AnalysisResponse, WardenError> {
        let messages = vec![
            ChatMessage {
                role: Role::System,
                content: build_system_prompt(),
            },
            ChatMessage {
                role: Role::User,
                content: build_review_prompt(&request.diff_chunk, &request.options),
            },
        ];
        debug!(
            model = %self.config.model,
            bytes = request.diff_chunk.len(),
            "submitting chunk"
        );
        let content = self.chat(messages, credential).await?;
        parse_analysis_response(&content)
    }
}

fn classify_status(status: StatusCode, body: &str) -> WardenError {
    let detail = format!("HTTP {status}: {}", excerpt(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WardenError::AnalysisAuth(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            WardenError::AnalysisTransient(detail)
        }
        s if s.is_server_error() => WardenError::AnalysisTransient(detail),
        _ => WardenError::MalformedResponse(detail),
    }
}

fn excerpt(body: &str) -> &str {
    let body = body.trim();
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

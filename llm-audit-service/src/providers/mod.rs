pub mod openai;
pub mod anthropic;
pub mod ollama;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{AuditError, AuditResult, ProviderError};
use crate::fingerprint::Fingerprint;

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Provider-agnostic request; the unit that gets fingerprinted
///
/// `message` is sent as given (trimmed, CRLF folded to LF) so prompt layout
/// survives. Whitespace collapsing applies only to the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRequest {
    pub message: String,
    /// Overrides the provider's configured model when set
    pub model: Option<String>,
}

impl NormalizedRequest {
    pub fn new(message: &str, model_hint: Option<&str>) -> Self {
        Self {
            message: message.trim().replace("\r\n", "\n"),
            model: model_hint
                .map(str::trim)
                .filter(|model| !model.is_empty())
                .map(str::to_string),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.message, self.model.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub usage: TokenUsage,
    /// Model that actually served the request
    pub model: String,
}

/// Trait for LLM backends. One call is one attempt: no retries here.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;

    async fn send(&self, request: &NormalizedRequest, timeout: Duration) -> Result<ProviderResponse, ProviderError>;
}

/// Tagged set of provider variants the orchestrator iterates over
#[derive(Clone)]
pub enum ProviderClient {
    OpenAi(openai::OpenAiProvider),
    Anthropic(anthropic::AnthropicProvider),
    Ollama(ollama::OllamaProvider),
    /// In-process backends and test doubles
    Custom(Arc<dyn LlmProvider>),
}

impl ProviderClient {
    pub fn id(&self) -> &str {
        match self {
            Self::OpenAi(provider) => provider.id(),
            Self::Anthropic(provider) => provider.id(),
            Self::Ollama(provider) => provider.id(),
            Self::Custom(provider) => provider.id(),
        }
    }

    pub async fn send(&self, request: &NormalizedRequest, timeout: Duration) -> Result<ProviderResponse, ProviderError> {
        match self {
            Self::OpenAi(provider) => provider.send(request, timeout).await,
            Self::Anthropic(provider) => provider.send(request, timeout).await,
            Self::Ollama(provider) => provider.send(request, timeout).await,
            Self::Custom(provider) => provider.send(request, timeout).await,
        }
    }
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ProviderClient").field(&self.id()).finish()
    }
}

/// Create a provider instance based on configuration
pub fn create_provider(config: &ProviderConfig, http: &reqwest::Client) -> AuditResult<ProviderClient> {
    match config {
        ProviderConfig::OpenAi { .. } => Ok(ProviderClient::OpenAi(openai::OpenAiProvider::new(config, http.clone())?)),
        ProviderConfig::Anthropic { .. } => Ok(ProviderClient::Anthropic(anthropic::AnthropicProvider::new(config, http.clone())?)),
        ProviderConfig::Ollama { .. } => Ok(ProviderClient::Ollama(ollama::OllamaProvider::new(config, http.clone())?)),
    }
}

/// Builds every configured provider, preserving priority order
pub fn create_providers(configs: &[ProviderConfig]) -> AuditResult<Vec<ProviderClient>> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("rustcare-llm-audit/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AuditError::Config(format!("Failed to build HTTP client: {e}")))?;

    configs.iter().map(|config| create_provider(config, &http)).collect()
}

pub(crate) fn endpoint(api_url: &str, path: &str) -> String {
    format!("{}/{}", api_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Sends the request and decodes a JSON body, mapping HTTP failures onto
/// the provider error taxonomy
pub(crate) async fn execute_json<R: DeserializeOwned>(
    builder: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<R, ProviderError> {
    let response = builder.timeout(timeout).send().await?;
    let status = response.status();

    if !status.is_success() {
        let retry_after = retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, retry_after, &body));
    }

    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse(format!("undecodable body: {e}")))
}

pub(crate) fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let excerpt: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ProviderError::Timeout,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::ProviderUnavailable(format!("credentials rejected ({status})"))
        }
        s if s.is_server_error() => ProviderError::ProviderUnavailable(format!("{status}: {excerpt}")),
        _ => ProviderError::InvalidResponse(format!("{status}: {excerpt}")),
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn non_empty_completion(text: Option<String>) -> Result<String, ProviderError> {
    text.map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("empty completion".to_string()))
}

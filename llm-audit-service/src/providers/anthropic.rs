/// Anthropic Messages API provider
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{AuditError, AuditResult, ProviderError};
use crate::providers::{endpoint, execute_json, non_empty_completion, LlmProvider, NormalizedRequest, ProviderResponse, TokenUsage};

const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> AuditResult<Self> {
        match config {
            ProviderConfig::Anthropic { api_url, api_key, model, max_tokens } => Ok(Self {
                http,
                api_url: api_url.clone(),
                api_key: api_key.clone(),
                model: model.clone(),
                max_tokens: *max_tokens,
            }),
            other => Err(AuditError::Config(format!("expected anthropic provider config, got {}", other.id()))),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl MessagesResponse {
    fn into_provider_response(self, requested_model: &str) -> Result<ProviderResponse, ProviderError> {
        let text: String = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        let usage = self
            .usage
            .map(|usage| TokenUsage::new(usage.input_tokens, usage.output_tokens))
            .unwrap_or_default();

        Ok(ProviderResponse {
            text: non_empty_completion(Some(text))?,
            usage,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    async fn send(&self, request: &NormalizedRequest, timeout: Duration) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: &request.message,
            }],
        };

        let builder = self
            .http
            .post(endpoint(&self.api_url, "v1/messages"))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let response: MessagesResponse = execute_json(builder, timeout).await?;
        response.into_provider_response(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joins_text_blocks_and_reads_usage() {
        let body = r#"{
            "id": "msg_01",
            "model": "claude-3-5-haiku-20241022",
            "content": [
                {"type": "text", "text": "Follow-up in "},
                {"type": "text", "text": "two weeks."}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 9}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_provider_response("claude-3-5-haiku-latest").unwrap();

        assert_eq!(response.text, "Follow-up in two weeks.");
        assert_eq!(response.usage.total_tokens, 129);
        assert_eq!(response.model, "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_non_text_content_is_invalid_response() {
        let parsed: MessagesResponse =
            serde_json::from_str(r#"{"content": [{"type": "tool_use", "id": "t1"}]}"#).unwrap();
        assert!(matches!(
            parsed.into_provider_response("claude"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}

/// OpenAI-compatible chat completions provider
///
/// Works against api.openai.com as well as self-hosted gateways exposing the
/// same `/v1/chat/completions` surface (vLLM, LiteLLM, LM Studio).
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{AuditError, AuditResult, ProviderError};
use crate::providers::{endpoint, execute_json, non_empty_completion, LlmProvider, NormalizedRequest, ProviderResponse, TokenUsage};

#[derive(Clone)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> AuditResult<Self> {
        match config {
            ProviderConfig::OpenAi { api_url, api_key, model } => Ok(Self {
                http,
                api_url: api_url.clone(),
                api_key: api_key.clone(),
                model: model.clone(),
            }),
            other => Err(AuditError::Config(format!("expected openai provider config, got {}", other.id()))),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl ChatCompletionResponse {
    fn into_provider_response(self, requested_model: &str) -> Result<ProviderResponse, ProviderError> {
        let content = self.choices.into_iter().next().and_then(|choice| choice.message.content);
        let usage = self
            .usage
            .map(|usage| TokenUsage::new(usage.prompt_tokens, usage.completion_tokens))
            .unwrap_or_default();

        Ok(ProviderResponse {
            text: non_empty_completion(content)?,
            usage,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    async fn send(&self, request: &NormalizedRequest, timeout: Duration) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatCompletionRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.message,
            }],
        };

        let mut builder = self
            .http
            .post(endpoint(&self.api_url, "v1/chat/completions"))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: ChatCompletionResponse = execute_json(builder, timeout).await?;
        response.into_provider_response(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_completion_and_usage() {
        let body = r#"{
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": " Patient reports mild headache. "}}],
            "usage": {"prompt_tokens": 42, "completion_tokens": 7, "total_tokens": 49}
        }"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_provider_response("gpt-4o-mini").unwrap();

        assert_eq!(response.text, "Patient reports mild headache.");
        assert_eq!(response.usage, TokenUsage::new(42, 7));
        assert_eq!(response.model, "gpt-4o-mini-2024-07-18");
    }

    #[test]
    fn test_missing_choices_is_invalid_response() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(
            parsed.into_provider_response("gpt-4o-mini"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_config() {
        let config = ProviderConfig::Ollama {
            api_url: "http://localhost:11434".into(),
            model: "llama3.1:8b".into(),
            api_key: None,
        };
        assert!(OpenAiProvider::new(&config, reqwest::Client::new()).is_err());
    }
}

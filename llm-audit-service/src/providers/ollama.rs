/// Ollama Provider - Fully private, self-hosted LLMs
///
/// Ollama is an open-source local LLM runner; prompts and transcripts never
/// leave your infrastructure. Uses the non-streaming `/api/chat` endpoint.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{AuditError, AuditResult, ProviderError};
use crate::providers::{endpoint, execute_json, non_empty_completion, LlmProvider, NormalizedRequest, ProviderResponse, TokenUsage};

#[derive(Clone)]
pub struct OllamaProvider {
    http: reqwest::Client,
    api_url: String,
    model: String,
    api_key: Option<String>,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig, http: reqwest::Client) -> AuditResult<Self> {
        match config {
            ProviderConfig::Ollama { api_url, model, api_key } => Ok(Self {
                http,
                api_url: api_url.clone(),
                model: model.clone(),
                api_key: api_key.clone(),
            }),
            other => Err(AuditError::Config(format!("expected ollama provider config, got {}", other.id()))),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_provider_response(self, requested_model: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            text: non_empty_completion(self.message.and_then(|message| message.content))?,
            usage: TokenUsage::new(self.prompt_eval_count, self.eval_count),
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn send(&self, request: &NormalizedRequest, timeout: Duration) -> Result<ProviderResponse, ProviderError> {
        let model = request.model.as_deref().unwrap_or(&self.model);
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.message,
            }],
            stream: false,
        };

        let mut builder = self.http.post(endpoint(&self.api_url, "api/chat")).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: ChatResponse = execute_json(builder, timeout).await?;
        response.into_provider_response(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_chat_response_counts() {
        let body = r#"{
            "model": "llama3.1:8b",
            "created_at": "2024-07-22T20:33:28.123648Z",
            "message": {"role": "assistant", "content": "BP 120/80, stable."},
            "done": true,
            "prompt_eval_count": 26,
            "eval_count": 12
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_provider_response("llama3.1:8b").unwrap();

        assert_eq!(response.text, "BP 120/80, stable.");
        assert_eq!(response.usage, TokenUsage::new(26, 12));
    }

    #[test]
    fn test_blank_message_is_invalid_response() {
        let parsed: ChatResponse =
            serde_json::from_str(r#"{"message": {"role": "assistant", "content": "   "}}"#).unwrap();
        assert!(matches!(
            parsed.into_provider_response("llama3.1:8b"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }
}

//! Scripted in-process providers for integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llm_audit_service::{
    LlmProvider, NormalizedRequest, ProviderClient, ProviderError, ProviderResponse, RetryPolicy, TokenUsage,
};
use parking_lot::Mutex;

type Reply = Result<ProviderResponse, ProviderError>;

/// Replays queued replies in order, then repeats `fallback` forever
pub struct ScriptedProvider {
    id: String,
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn always(id: &str, reply: Reply) -> Arc<Self> {
        Self::scripted(id, Vec::new(), reply)
    }

    pub fn scripted(id: &str, script: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Provider that takes `delay` before answering
    pub fn slow(id: &str, delay: Duration, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: reply,
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }

    pub fn client(self: &Arc<Self>) -> ProviderClient {
        ProviderClient::Custom(Arc::clone(self) as Arc<dyn LlmProvider>)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, request: &NormalizedRequest, _timeout: Duration) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.message.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn reply(text: &str) -> Reply {
    Ok(ProviderResponse {
        text: text.to_string(),
        usage: TokenUsage::new(20, 5),
        model: "scripted-model".to_string(),
    })
}

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries_per_provider: 3,
        per_call_timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(100),
        cache_ttl: Duration::from_secs(60),
        request_deadline: None,
    }
}

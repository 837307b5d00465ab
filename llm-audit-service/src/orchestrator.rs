//! Cache-first, priority-ordered provider fallback.
//!
//! Per request the orchestrator walks `Idle -> Trying(provider, attempt) ->
//! Succeeded | NextProvider | Exhausted`. Attempts are strictly sequential so
//! a request never has two billable calls in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use logger_redacted::preview;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CachedPayload, ResponseCache};
use crate::config::LlmAuditConfig;
use crate::error::{AuditError, AuditResult, ProviderError};
use crate::fingerprint::Fingerprint;
use crate::metrics::{AttemptOutcome, MetricsRegistry, ProviderAttempt};
use crate::providers::{create_providers, NormalizedRequest, ProviderClient, ProviderResponse, TokenUsage};

/// Longest exponent applied to the backoff base
const MAX_BACKOFF_SHIFT: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub cache_hit: bool,
    pub provider: String,
    pub model: String,
}

/// One line of the per-request call trail (`gptLogs`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCallLog {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 1-based attempt number on this provider; 0 for cache hits
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub tokens_used: u64,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query result together with every attempt made for it
#[derive(Debug)]
pub struct TracedQuery {
    pub result: AuditResult<QueryResponse>,
    pub logs: Vec<LlmCallLog>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries_per_provider: u32,
    pub per_call_timeout: Duration,
    pub backoff_base: Duration,
    pub cache_ttl: Duration,
    pub request_deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &LlmAuditConfig) -> Self {
        Self {
            max_retries_per_provider: config.max_retries_per_provider.max(1),
            per_call_timeout: config.per_call_timeout(),
            backoff_base: config.backoff_base(),
            cache_ttl: config.cache_ttl(),
            request_deadline: config.request_deadline(),
        }
    }

    /// Delay before attempt `attempt + 1`: `base * 2^(attempt - 1)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.backoff_base.saturating_mul(1u32 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&LlmAuditConfig::default())
    }
}

pub struct FallbackOrchestrator {
    providers: Vec<ProviderClient>,
    cache: Arc<ResponseCache>,
    metrics: Arc<MetricsRegistry>,
    policy: RetryPolicy,
}

impl FallbackOrchestrator {
    pub fn new(
        providers: Vec<ProviderClient>,
        cache: Arc<ResponseCache>,
        metrics: Arc<MetricsRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            providers,
            cache,
            metrics,
            policy,
        }
    }

    /// Builds the configured HTTP providers in priority order
    pub fn from_config(
        config: &LlmAuditConfig,
        cache: Arc<ResponseCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> AuditResult<Self> {
        config.validate()?;
        let providers = create_providers(&config.providers)?;
        Ok(Self::new(providers, cache, metrics, RetryPolicy::from_config(config)))
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.iter().map(ProviderClient::id).collect()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Answers `message`, using the configured request deadline if any
    pub async fn query(&self, message: &str, model_hint: Option<&str>) -> AuditResult<QueryResponse> {
        self.query_traced(message, model_hint, self.policy.request_deadline)
            .await
            .result
    }

    pub async fn query_with_deadline(
        &self,
        message: &str,
        model_hint: Option<&str>,
        deadline: Duration,
    ) -> AuditResult<QueryResponse> {
        self.query_traced(message, model_hint, Some(deadline)).await.result
    }

    pub async fn query_traced(
        &self,
        message: &str,
        model_hint: Option<&str>,
        deadline: Option<Duration>,
    ) -> TracedQuery {
        let request = NormalizedRequest::new(message, model_hint);
        let fingerprint = request.fingerprint();
        let mut logs = Vec::new();

        debug!(
            fingerprint = %fingerprint.short(),
            model = request.model.as_deref().unwrap_or("default"),
            prompt = %preview(&request.message, 80),
            "LLM query"
        );

        if let Some(entry) = self.cache.get(&fingerprint) {
            self.metrics.record_cache_hit();
            debug!(fingerprint = %fingerprint.short(), provider = %entry.payload.provider, "Cache hit");

            let payload = entry.payload.clone();
            logs.push(LlmCallLog {
                provider: payload.provider.clone(),
                model: Some(payload.model.clone()),
                attempt: 0,
                outcome: AttemptOutcome::Success,
                latency_ms: 0,
                tokens_used: 0,
                cache_hit: true,
                error: None,
            });
            let result = Ok(QueryResponse {
                text: payload.text,
                usage: payload.usage,
                cache_hit: true,
                provider: payload.provider,
                model: payload.model,
            });
            return TracedQuery { result, logs };
        }

        let result = self
            .dispatch(&request, &fingerprint, deadline.map(|d| Instant::now() + d), &mut logs)
            .await;
        TracedQuery { result, logs }
    }

    async fn dispatch(
        &self,
        request: &NormalizedRequest,
        fingerprint: &Fingerprint,
        deadline: Option<Instant>,
        logs: &mut Vec<LlmCallLog>,
    ) -> AuditResult<QueryResponse> {
        let max_attempts = self.policy.max_retries_per_provider;
        let mut attempts = 0u32;
        let mut last_error: Option<ProviderError> = None;

        'providers: for provider in &self.providers {
            for attempt in 1..=max_attempts {
                let timeout = match deadline {
                    Some(deadline) => {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        if remaining.is_zero() {
                            return Err(deadline_exceeded(attempts));
                        }
                        remaining.min(self.policy.per_call_timeout)
                    }
                    None => self.policy.per_call_timeout,
                };

                attempts += 1;
                let outcome = self.attempt(provider, request, attempt, timeout, logs).await;

                let error = match outcome {
                    Ok(response) => {
                        info!(
                            provider = provider.id(),
                            attempt,
                            tokens = response.usage.total_tokens,
                            fingerprint = %fingerprint.short(),
                            "LLM query served"
                        );
                        self.cache.put(
                            fingerprint.clone(),
                            CachedPayload {
                                text: response.text.clone(),
                                usage: response.usage,
                                provider: provider.id().to_string(),
                                model: response.model.clone(),
                            },
                            self.policy.cache_ttl,
                        );
                        return Ok(QueryResponse {
                            text: response.text,
                            usage: response.usage,
                            cache_hit: false,
                            provider: provider.id().to_string(),
                            model: response.model,
                        });
                    }
                    Err(error) => error,
                };

                let retryable = error.is_retryable();
                let retry_after = match &error {
                    ProviderError::RateLimited { retry_after } => *retry_after,
                    _ => None,
                };
                last_error = Some(error);

                if !retryable {
                    continue 'providers;
                }
                if attempt == max_attempts {
                    break;
                }

                let delay = self.policy.backoff(attempt).max(retry_after.unwrap_or_default());
                let wake = Instant::now() + delay;
                if deadline.is_some_and(|deadline| wake >= deadline) {
                    debug!(provider = provider.id(), ?delay, "Backoff would pass the request deadline");
                    return Err(deadline_exceeded(attempts));
                }
                debug!(provider = provider.id(), attempt, ?delay, "Backing off before retry");
                tokio::time::sleep_until(wake).await;
            }
        }

        warn!(attempts, last_error = ?last_error, "All LLM providers exhausted");
        Err(AuditError::AllProvidersExhausted {
            attempts,
            last_error,
            deadline_exceeded: false,
        })
    }

    /// Single bounded call; records the attempt whatever the outcome
    async fn attempt(
        &self,
        provider: &ProviderClient,
        request: &NormalizedRequest,
        attempt: u32,
        timeout: Duration,
        logs: &mut Vec<LlmCallLog>,
    ) -> Result<ProviderResponse, ProviderError> {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let outcome = match tokio::time::timeout(timeout, provider.send(request, timeout)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout),
        };

        let elapsed = clock.elapsed();
        let ended_at = started_at + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let latency_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let (attempt_outcome, tokens_used, model, error) = match &outcome {
            Ok(response) => (AttemptOutcome::Success, response.usage.total_tokens, Some(response.model.clone()), None),
            Err(err) => {
                warn!(provider = provider.id(), attempt, error = %err, "LLM provider call failed");
                (AttemptOutcome::from_error(err), 0, request.model.clone(), Some(err.to_string()))
            }
        };

        self.metrics.record(ProviderAttempt {
            provider: provider.id().to_string(),
            started_at,
            ended_at,
            outcome: attempt_outcome,
            tokens_used,
        });
        logs.push(LlmCallLog {
            provider: provider.id().to_string(),
            model,
            attempt,
            outcome: attempt_outcome,
            latency_ms,
            tokens_used,
            cache_hit: false,
            error,
        });

        outcome
    }
}

fn deadline_exceeded(attempts: u32) -> AuditError {
    warn!(attempts, "Request deadline exceeded, abandoning remaining providers");
    AuditError::AllProvidersExhausted {
        attempts,
        last_error: Some(ProviderError::Timeout),
        deadline_exceeded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthThresholds;

    #[test]
    fn test_empty_chain_exhausts_without_attempts() {
        let orchestrator = FallbackOrchestrator::new(
            Vec::new(),
            Arc::new(ResponseCache::new()),
            Arc::new(MetricsRegistry::new(10, HealthThresholds::default())),
            RetryPolicy::default(),
        );
        let err = tokio_test::block_on(orchestrator.query("hello", None)).unwrap_err();
        assert!(matches!(
            err,
            AuditError::AllProvidersExhausted {
                attempts: 0,
                last_error: None,
                deadline_exceeded: false
            }
        ));
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(100),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(40), Duration::from_millis(100 * 1024));
    }

    #[test]
    fn test_policy_from_config() {
        let config = LlmAuditConfig {
            max_retries_per_provider: 5,
            request_deadline_ms: Some(2_000),
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries_per_provider, 5);
        assert_eq!(policy.request_deadline, Some(Duration::from_secs(2)));
        assert_eq!(policy.cache_ttl, Duration::from_secs(3_600));
    }

    #[test]
    fn test_call_log_wire_format() {
        let log = LlmCallLog {
            provider: "ollama".into(),
            model: None,
            attempt: 2,
            outcome: AttemptOutcome::Timeout,
            latency_ms: 1500,
            tokens_used: 0,
            cache_hit: false,
            error: Some("Provider call timed out".into()),
        };
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["latencyMs"], 1500);
        assert_eq!(json["outcome"], "timeout");
        assert_eq!(json["cacheHit"], false);
        assert!(json.get("model").is_none());
    }
}

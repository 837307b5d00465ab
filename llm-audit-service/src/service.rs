use std::sync::Arc;

use logger_redacted::preview;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audit::{AuditTask, LlmAuditRequest, LlmAuditResponse, LlmAuditResult};
use crate::cache::{CacheStats, ResponseCache};
use crate::config::LlmAuditConfig;
use crate::error::AuditResult;
use crate::merger::TranscriptMerger;
use crate::metrics::{HealthSnapshot, MetricsRegistry, MetricsSnapshot};
use crate::orchestrator::{FallbackOrchestrator, LlmCallLog, RetryPolicy};
use crate::providers::{create_providers, ProviderClient, TokenUsage};
use crate::transcript::MergedTranscript;

/// Fixed summarization prompt; the labeled transcript is appended
const SUMMARY_PROMPT: &str = "Summarize the following clinical conversation in a few concise sentences. \
Cover the chief complaint and the agreed plan. Use only facts stated in the transcript.\n\nTranscript:\n";

const PREVIEW_CHARS: usize = 120;

/// Entry point for transcript audits
pub struct AuditCoordinator {
    merger: TranscriptMerger,
    orchestrator: FallbackOrchestrator,
    cache: Arc<ResponseCache>,
    metrics: Arc<MetricsRegistry>,
}

/// Successful audit plus the summarization usage, if a summary was produced
#[derive(Debug, Clone, PartialEq)]
pub struct AuditOutcome {
    pub result: LlmAuditResult,
    pub usage: Option<TokenUsage>,
}

impl AuditCoordinator {
    /// Create a coordinator backed by the configured HTTP providers
    pub fn new(config: LlmAuditConfig) -> AuditResult<Self> {
        config.validate()?;
        let providers = create_providers(&config.providers)?;
        Ok(Self::with_providers(config, providers))
    }

    /// Create a coordinator over an explicit provider list, in priority order
    pub fn with_providers(config: LlmAuditConfig, providers: Vec<ProviderClient>) -> Self {
        let cache = Arc::new(ResponseCache::new());
        let metrics = Arc::new(MetricsRegistry::new(
            config.metrics_window_size,
            config.health_thresholds,
        ));
        Self::with_components(config, providers, cache, metrics)
    }

    /// Create a coordinator on process-wide cache and metrics handles, so
    /// several coordinators (or a host's own tooling) observe the same state
    pub fn with_components(
        config: LlmAuditConfig,
        providers: Vec<ProviderClient>,
        cache: Arc<ResponseCache>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let orchestrator = FallbackOrchestrator::new(
            providers,
            Arc::clone(&cache),
            Arc::clone(&metrics),
            RetryPolicy::from_config(&config),
        );

        info!(
            providers = ?orchestrator.provider_ids(),
            max_retries = config.max_retries_per_provider,
            "LLM audit coordinator ready"
        );

        Self {
            merger: TranscriptMerger::new(config.merger),
            orchestrator,
            cache,
            metrics,
        }
    }

    /// Run an audit, folding failures into an unsuccessful response
    pub async fn audit(&self, request: &LlmAuditRequest) -> LlmAuditResponse {
        match self.try_audit(request).await {
            Ok(outcome) => LlmAuditResponse::ok(outcome.result, outcome.usage),
            Err(err) => {
                warn!(task = %request.task, code = err.code(), error = %err, "Audit request rejected");
                LlmAuditResponse::failure(&err)
            }
        }
    }

    /// Run an audit. Only request validation errors surface here; a failed
    /// summary leaves `summary` empty. The configured request deadline runs
    /// from this call, not from the start of summarization.
    pub async fn try_audit(&self, request: &LlmAuditRequest) -> AuditResult<AuditOutcome> {
        let deadline = self
            .orchestrator
            .policy()
            .request_deadline
            .map(|budget| Instant::now() + budget);
        self.audit_until(request, deadline).await
    }

    async fn audit_until(&self, request: &LlmAuditRequest, deadline: Option<Instant>) -> AuditResult<AuditOutcome> {
        let task: AuditTask = request.task.parse()?;

        debug!(
            task = %task,
            segments = request.diarization_segments.len(),
            transcript = %preview(&request.transcript, PREVIEW_CHARS),
            "Audit request"
        );

        let merged = self.merger.merge(
            &request.transcript,
            &request.diarization_segments,
            request.partial_transcripts.as_deref(),
        )?;

        info!(
            task = %task,
            speakers = merged.speaker_labels().len(),
            segments = merged.speakers.len(),
            "Transcript merged"
        );

        if !task.wants_summary() {
            return Ok(AuditOutcome {
                result: LlmAuditResult {
                    merged_transcript: merged.merged_transcript,
                    speakers: merged.speakers,
                    summary: None,
                    gpt_logs: None,
                },
                usage: None,
            });
        }

        let (summary, usage, logs) = self
            .summarize(&merged, request.model_hint.as_deref(), deadline)
            .await;

        Ok(AuditOutcome {
            result: LlmAuditResult {
                merged_transcript: merged.merged_transcript,
                speakers: merged.speakers,
                summary,
                gpt_logs: Some(logs),
            },
            usage,
        })
    }

    async fn summarize(
        &self,
        merged: &MergedTranscript,
        model_hint: Option<&str>,
        deadline: Option<Instant>,
    ) -> (Option<String>, Option<TokenUsage>, Vec<LlmCallLog>) {
        if merged.speakers.is_empty() {
            debug!("Nothing to summarize");
            return (None, None, Vec::new());
        }

        let prompt = format!("{SUMMARY_PROMPT}{}", merged.to_labeled_text());
        let traced = self
            .orchestrator
            .query_traced(
                &prompt,
                model_hint,
                deadline.map(|deadline| deadline.saturating_duration_since(Instant::now())),
            )
            .await;

        match traced.result {
            Ok(response) => {
                debug!(
                    provider = %response.provider,
                    cache_hit = response.cache_hit,
                    summary = %preview(&response.text, PREVIEW_CHARS),
                    "Summary produced"
                );
                (Some(response.text), Some(response.usage), traced.logs)
            }
            Err(err) => {
                warn!(code = err.code(), error = %err, "Summarization failed, returning transcript without summary");
                (None, None, traced.logs)
            }
        }
    }

    pub fn orchestrator(&self) -> &FallbackOrchestrator {
        &self.orchestrator
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.get_metrics()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.metrics.get_health_status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

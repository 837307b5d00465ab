//! LLM Audit & Query Orchestration for clinical transcripts
//!
//! Turns raw speech-to-text output plus diarization into a speaker-attributed
//! transcript and, on request, an LLM summary, with cost and latency kept in
//! check by a response cache and a provider fallback chain.
//!
//! # Provider Hierarchy (Privacy-First)
//!
//! Providers are tried strictly in configured order. The default chain is a
//! single self-hosted **Ollama** instance so no transcript leaves the
//! network; **OpenAI**-compatible gateways and **Anthropic** can be appended
//! when a BAA is in place.
//!
//! # Features
//!
//! - Fingerprint-keyed response cache with TTL (cache hits never reach a provider)
//! - Bounded retries with exponential backoff on transient errors
//! - Immediate fallback on structural errors (bad payload, provider down)
//! - Per-call timeouts and an optional request deadline
//! - Rolling-window health status (healthy / degraded / unhealthy)
//! - Transcript merge with overlap clamping and proportional text allocation
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use llm_audit_service::{AuditCoordinator, AuditTask, DiarizationSegment, LlmAuditConfig, LlmAuditRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LlmAuditConfig::from_env()?;
//! let coordinator = AuditCoordinator::new(config)?;
//!
//! let request = LlmAuditRequest::new(
//!     AuditTask::AuditTranscript,
//!     "good morning what brings you in my knee has been aching",
//!     vec![
//!         DiarizationSegment::new(0.0, 2.1).with_speaker("doctor"),
//!         DiarizationSegment::new(2.4, 4.0).with_speaker("patient"),
//!     ],
//! );
//!
//! let response = coordinator.audit(&request).await;
//! if let Some(data) = response.data {
//!     println!("{}", data.merged_transcript);
//! }
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod merger;
pub mod metrics;
pub mod orchestrator;
pub mod providers;
pub mod service;
pub mod transcript;

pub use audit::*;
pub use cache::{CacheStats, ResponseCache};
pub use self::config::*;
pub use error::*;
pub use fingerprint::Fingerprint;
pub use merger::TranscriptMerger;
pub use self::metrics::{HealthSnapshot, HealthStatus, MetricsRegistry, MetricsSnapshot};
pub use orchestrator::{FallbackOrchestrator, LlmCallLog, QueryResponse, RetryPolicy, TracedQuery};
pub use providers::{LlmProvider, NormalizedRequest, ProviderClient, ProviderResponse, TokenUsage};
pub use service::*;
pub use transcript::*;

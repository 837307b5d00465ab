//! Integration tests for cache-first provider fallback
//!
//! Providers are scripted in-process doubles; tests that depend on backoff
//! or timeouts run on a paused tokio clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_policy, reply, ScriptedProvider};
use llm_audit_service::metrics::AttemptOutcome;
use llm_audit_service::{
    AuditError, FallbackOrchestrator, HealthStatus, HealthThresholds, MetricsRegistry, ProviderClient,
    ProviderError, ResponseCache, RetryPolicy,
};

fn orchestrator(providers: Vec<ProviderClient>, policy: RetryPolicy) -> FallbackOrchestrator {
    FallbackOrchestrator::new(
        providers,
        Arc::new(ResponseCache::new()),
        Arc::new(MetricsRegistry::new(100, HealthThresholds::default())),
        policy,
    )
}

fn orchestrator_with_state(
    providers: Vec<ProviderClient>,
    policy: RetryPolicy,
) -> (FallbackOrchestrator, Arc<ResponseCache>, Arc<MetricsRegistry>) {
    let cache = Arc::new(ResponseCache::new());
    let metrics = Arc::new(MetricsRegistry::new(100, HealthThresholds::default()));
    let orchestrator = FallbackOrchestrator::new(providers, Arc::clone(&cache), Arc::clone(&metrics), policy);
    (orchestrator, cache, metrics)
}

#[tokio::test]
async fn test_cache_hit_never_calls_provider() {
    let provider = ScriptedProvider::always("primary", reply("Mild tension headache."));
    let (orchestrator, cache, metrics) = orchestrator_with_state(vec![provider.client()], fast_policy());

    let first = orchestrator.query("Summarize:  patient reports headache", None).await.unwrap();
    assert!(!first.cache_hit);
    assert_eq!(first.provider, "primary");

    // Whitespace differences normalize to the same fingerprint
    let second = orchestrator.query("Summarize: patient reports headache ", None).await.unwrap();
    assert!(second.cache_hit);
    assert_eq!(second.text, "Mild tension headache.");
    assert_eq!(second.usage, first.usage);

    assert_eq!(provider.calls(), 1);
    assert_eq!(cache.stats().hits, 1);
    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.cache_hits, 1);
    assert_eq!(snapshot.total_calls, 1);
}

#[tokio::test]
async fn test_model_hint_is_part_of_cache_key() {
    let provider = ScriptedProvider::always("primary", reply("ok"));
    let orchestrator = orchestrator(vec![provider.client()], fast_policy());

    orchestrator.query("same prompt", Some("model-a")).await.unwrap();
    let other = orchestrator.query("same prompt", Some("model-b")).await.unwrap();

    assert!(!other.cache_hit);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_structural_error_falls_back_without_retry() {
    let broken = ScriptedProvider::always("a", Err(ProviderError::InvalidResponse("not json".into())));
    let healthy = ScriptedProvider::always("b", reply("From b"));
    let orchestrator = orchestrator(vec![broken.client(), healthy.client()], fast_policy());

    let traced = orchestrator.query_traced("Summarize visit", None, None).await;
    let response = traced.result.unwrap();

    assert_eq!(response.provider, "b");
    assert_eq!(response.text, "From b");
    assert_eq!(broken.calls(), 1);
    assert_eq!(healthy.calls(), 1);

    let providers: Vec<&str> = traced.logs.iter().map(|log| log.provider.as_str()).collect();
    assert_eq!(providers, vec!["a", "b"]);
    assert_eq!(traced.logs[0].outcome, AttemptOutcome::from_error(&ProviderError::InvalidResponse(String::new())));
    assert!(traced.logs[1].outcome.is_success());
    assert_eq!(traced.logs[1].tokens_used, 25);
}

#[tokio::test]
async fn test_unavailable_provider_falls_back() {
    let down = ScriptedProvider::always("a", Err(ProviderError::ProviderUnavailable("HTTP 503".into())));
    let healthy = ScriptedProvider::always("b", reply("ok"));
    let orchestrator = orchestrator(vec![down.client(), healthy.client()], fast_policy());

    let response = orchestrator.query("hello", None).await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(down.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_after_max_retries_per_provider() {
    let first = ScriptedProvider::always("a", Err(ProviderError::Timeout));
    let second = ScriptedProvider::always("b", Err(ProviderError::RateLimited { retry_after: None }));
    let (orchestrator, _cache, metrics) =
        orchestrator_with_state(vec![first.client(), second.client()], fast_policy());

    let err = orchestrator.query("hello", None).await.unwrap_err();

    match err {
        AuditError::AllProvidersExhausted {
            attempts,
            last_error,
            deadline_exceeded,
        } => {
            assert_eq!(attempts, 6);
            assert_eq!(last_error, Some(ProviderError::RateLimited { retry_after: None }));
            assert!(!deadline_exceeded);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(first.calls(), 3);
    assert_eq!(second.calls(), 3);

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.total_calls, 6);
    assert_eq!(snapshot.errors, 6);
    assert_eq!(metrics.get_health_status().status, HealthStatus::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_backs_off_then_succeeds() {
    let provider = ScriptedProvider::scripted(
        "a",
        vec![Err(ProviderError::Timeout), Err(ProviderError::Timeout)],
        reply("third time lucky"),
    );
    let orchestrator = orchestrator(vec![provider.client()], fast_policy());

    let started = tokio::time::Instant::now();
    let response = orchestrator.query("hello", None).await.unwrap();

    assert_eq!(response.text, "third time lucky");
    assert_eq!(provider.calls(), 3);
    // 100ms then 200ms of backoff
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_extends_backoff() {
    let provider = ScriptedProvider::scripted(
        "a",
        vec![Err(ProviderError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        })],
        reply("ok"),
    );
    let orchestrator = orchestrator(vec![provider.client()], fast_policy());

    let started = tokio::time::Instant::now();
    orchestrator.query("hello", None).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(provider.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_shorter_than_backoff_aborts() {
    let provider = ScriptedProvider::always("a", Err(ProviderError::RateLimited { retry_after: None }));
    let policy = RetryPolicy {
        backoff_base: Duration::from_secs(1),
        ..fast_policy()
    };
    let orchestrator = orchestrator(vec![provider.client()], policy);

    let err = orchestrator
        .query_with_deadline("hello", None, Duration::from_millis(300))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuditError::AllProvidersExhausted {
            attempts: 1,
            last_error: Some(ProviderError::Timeout),
            deadline_exceeded: true,
        }
    ));
    assert_eq!(provider.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_provider_times_out_and_falls_through() {
    let slow = ScriptedProvider::slow("slow", Duration::from_secs(60), reply("too late"));
    let fast = ScriptedProvider::always("fast", reply("on time"));
    let policy = RetryPolicy {
        max_retries_per_provider: 1,
        per_call_timeout: Duration::from_millis(500),
        ..fast_policy()
    };
    let orchestrator = orchestrator(vec![slow.client(), fast.client()], policy);

    let traced = orchestrator.query_traced("hello", None, None).await;

    assert_eq!(traced.result.unwrap().provider, "fast");
    assert_eq!(traced.logs[0].outcome, AttemptOutcome::Timeout);
    assert_eq!(traced.logs[0].provider, "slow");
}

#[tokio::test(start_paused = true)]
async fn test_deadline_caps_per_call_timeout() {
    let slow = ScriptedProvider::slow("slow", Duration::from_secs(60), reply("too late"));
    let orchestrator = orchestrator(vec![slow.client()], fast_policy());

    let started = tokio::time::Instant::now();
    let err = orchestrator
        .query_with_deadline("hello", None, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuditError::AllProvidersExhausted {
            deadline_exceeded: true,
            ..
        }
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(slow.calls(), 1);
}

#[tokio::test]
async fn test_concurrent_queries_share_cache_and_metrics() {
    let provider = ScriptedProvider::always("primary", reply("ok"));
    let (orchestrator, cache, metrics) = orchestrator_with_state(vec![provider.client()], fast_policy());
    let orchestrator = Arc::new(orchestrator);

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.query(&format!("prompt {}", i % 4), None).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.total_calls + snapshot.cache_hits, 16);
    assert_eq!(snapshot.total_calls as usize, provider.calls());
    assert_eq!(cache.stats().size, 4);
}

//! Provider call metrics and derived health status.
//!
//! Lifetime counters and a count-bounded window of recent attempts live
//! behind a single short-held mutex, so concurrent `record` calls never lose
//! updates. Health is computed from the window on demand. Every record is
//! also forwarded to the `metrics` facade for whatever exporter the host
//! process installs.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::HealthThresholds;
use crate::error::{ProviderError, ProviderErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Error(ProviderErrorKind),
    Timeout,
}

impl AttemptOutcome {
    pub fn from_error(error: &ProviderError) -> Self {
        match error {
            ProviderError::Timeout => Self::Timeout,
            other => Self::Error(other.kind()),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Error(ProviderErrorKind::RateLimited) => "rate_limited",
            Self::Error(ProviderErrorKind::Timeout) => "timeout",
            Self::Error(ProviderErrorKind::InvalidResponse) => "invalid_response",
            Self::Error(ProviderErrorKind::ProviderUnavailable) => "provider_unavailable",
        }
    }
}

/// One provider call, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttempt {
    pub provider: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub tokens_used: u64,
}

impl ProviderAttempt {
    pub fn latency(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub error_rate: f64,
    pub p95_latency_ms: u64,
    pub window_size: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetrics {
    pub calls: u64,
    pub errors: u64,
    pub tokens_used: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub errors: u64,
    pub tokens_used: u64,
    pub avg_latency_ms: f64,
    pub cache_hits: u64,
    pub by_provider: BTreeMap<String, ProviderMetrics>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    calls: u64,
    errors: u64,
    tokens_used: u64,
    latency_ms_total: u128,
}

impl Counters {
    fn add(&mut self, attempt: &ProviderAttempt) {
        self.calls += 1;
        if !attempt.outcome.is_success() {
            self.errors += 1;
        }
        self.tokens_used += attempt.tokens_used;
        self.latency_ms_total += attempt.latency().as_millis();
    }

    #[allow(clippy::cast_precision_loss)]
    fn avg_latency_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.latency_ms_total as f64 / self.calls as f64
        }
    }

    fn to_provider_metrics(self) -> ProviderMetrics {
        ProviderMetrics {
            calls: self.calls,
            errors: self.errors,
            tokens_used: self.tokens_used,
            avg_latency_ms: self.avg_latency_ms(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    window: VecDeque<ProviderAttempt>,
    totals: Counters,
    by_provider: HashMap<String, Counters>,
    cache_hits: u64,
}

pub struct MetricsRegistry {
    window_size: usize,
    thresholds: HealthThresholds,
    state: Mutex<RegistryState>,
}

impl MetricsRegistry {
    pub fn new(window_size: usize, thresholds: HealthThresholds) -> Self {
        let window_size = window_size.max(1);
        Self {
            window_size,
            thresholds,
            state: Mutex::new(RegistryState {
                window: VecDeque::with_capacity(window_size),
                ..Default::default()
            }),
        }
    }

    pub fn record(&self, attempt: ProviderAttempt) {
        let latency = attempt.latency();
        let outcome = attempt.outcome;
        let provider = attempt.provider.clone();
        let tokens = attempt.tokens_used;

        {
            let mut state = self.state.lock();
            state.totals.add(&attempt);
            state.by_provider.entry(attempt.provider.clone()).or_default().add(&attempt);
            while state.window.len() >= self.window_size {
                state.window.pop_front();
            }
            state.window.push_back(attempt);
        }

        ::metrics::counter!("llm_provider_calls_total", "provider" => provider.clone(), "outcome" => outcome.label())
            .increment(1);
        if !outcome.is_success() {
            ::metrics::counter!("llm_provider_errors_total", "provider" => provider.clone()).increment(1);
        }
        ::metrics::counter!("llm_tokens_total", "provider" => provider.clone()).increment(tokens);
        ::metrics::histogram!("llm_provider_latency_seconds", "provider" => provider).record(latency.as_secs_f64());
    }

    pub fn record_cache_hit(&self) {
        self.state.lock().cache_hits += 1;
        ::metrics::counter!("llm_cache_hits_total").increment(1);
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        MetricsSnapshot {
            total_calls: state.totals.calls,
            errors: state.totals.errors,
            tokens_used: state.totals.tokens_used,
            avg_latency_ms: state.totals.avg_latency_ms(),
            cache_hits: state.cache_hits,
            by_provider: state
                .by_provider
                .iter()
                .map(|(provider, counters)| (provider.clone(), counters.to_provider_metrics()))
                .collect(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn get_health_status(&self) -> HealthSnapshot {
        let (total, failures, latencies) = {
            let state = self.state.lock();
            let failures = state.window.iter().filter(|a| !a.outcome.is_success()).count();
            let latencies: Vec<u64> = state
                .window
                .iter()
                .map(|a| u64::try_from(a.latency().as_millis()).unwrap_or(u64::MAX))
                .collect();
            (state.window.len(), failures, latencies)
        };

        let error_rate = if total == 0 { 0.0 } else { failures as f64 / total as f64 };
        let p95_latency_ms = percentile(latencies, 0.95);

        let status = if total == 0 {
            HealthStatus::Healthy
        } else if failures == total || error_rate > self.thresholds.unhealthy_error_rate {
            HealthStatus::Unhealthy
        } else if error_rate > self.thresholds.degraded_error_rate
            || p95_latency_ms > self.thresholds.degraded_latency_ms
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            status,
            error_rate,
            p95_latency_ms,
            window_size: total,
            last_updated: Utc::now(),
        }
    }
}

/// Nearest-rank percentile
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percentile(mut values: Vec<u64>, quantile: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.sort_unstable();
    let rank = (quantile * values.len() as f64).ceil() as usize;
    let index = rank.clamp(1, values.len()) - 1;
    values.get(index).copied().unwrap_or_default()
}

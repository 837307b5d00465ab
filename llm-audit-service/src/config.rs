use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, AuditResult};

/// LLM backend configuration, one entry per provider in priority order
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Any OpenAI-compatible chat completions endpoint
    OpenAi {
        api_url: String,
        api_key: Option<String>,
        model: String, // e.g., "gpt-4o-mini"
    },
    /// Anthropic messages API
    Anthropic {
        api_url: String,
        api_key: String,
        model: String, // e.g., "claude-3-5-haiku-latest"
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
    },
    /// Ollama local LLMs (fully private, self-hosted)
    Ollama {
        api_url: String,
        model: String, // e.g., "llama3.1:8b"
        api_key: Option<String>,
    },
}

fn default_max_tokens() -> u32 {
    1024
}

impl ProviderConfig {
    /// Provider id used in metrics and call logs
    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Anthropic { .. } => "anthropic",
            Self::Ollama { .. } => "ollama",
        }
    }

    fn from_env_named(name: &str) -> AuditResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi {
                api_url: std::env::var("OPENAI_API_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                api_key: std::env::var("OPENAI_API_KEY").ok(),
                model: std::env::var("OPENAI_MODEL")
                    .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            }),
            "anthropic" => Ok(Self::Anthropic {
                api_url: std::env::var("ANTHROPIC_API_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com".to_string()),
                api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
                max_tokens: env_or("ANTHROPIC_MAX_TOKENS", default_max_tokens()),
            }),
            "ollama" => Ok(Self::Ollama {
                api_url: std::env::var("OLLAMA_API_URL")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string()),
                model: std::env::var("OLLAMA_MODEL")
                    .unwrap_or_else(|_| "llama3.1:8b".to_string()),
                api_key: std::env::var("OLLAMA_API_KEY").ok(),
            }),
            other => Err(AuditError::Config(format!("Unknown LLM provider: {other}"))),
        }
    }
}

/// Thresholds applied to the rolling metrics window
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HealthThresholds {
    pub degraded_error_rate: f64,
    pub unhealthy_error_rate: f64,
    pub degraded_latency_ms: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_error_rate: 0.1,
            unhealthy_error_rate: 0.5,
            degraded_latency_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MergerConfig {
    /// Same-speaker segments separated by less than this are coalesced
    pub coalesce_gap_secs: f64,
    pub unknown_speaker_label: String,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            coalesce_gap_secs: 1.0,
            unknown_speaker_label: "unknown".to_string(),
        }
    }
}

/// LLM audit service configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LlmAuditConfig {
    pub providers: Vec<ProviderConfig>,
    pub max_retries_per_provider: u32,
    pub per_call_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub cache_ttl_ms: u64,
    pub metrics_window_size: usize,
    pub health_thresholds: HealthThresholds,
    /// Overall budget for one `query`/`audit` call
    pub request_deadline_ms: Option<u64>,
    pub merger: MergerConfig,
}

impl Default for LlmAuditConfig {
    fn default() -> Self {
        Self {
            // Default to Ollama (self-hosted, nothing leaves the network)
            providers: vec![ProviderConfig::Ollama {
                api_url: "http://localhost:11434".to_string(),
                model: "llama3.1:8b".to_string(),
                api_key: None,
            }],
            max_retries_per_provider: 3,
            per_call_timeout_ms: 30_000,
            backoff_base_ms: 250,
            cache_ttl_ms: 3_600_000, // 1 hour
            metrics_window_size: 100,
            health_thresholds: HealthThresholds::default(),
            request_deadline_ms: None,
            merger: MergerConfig::default(),
        }
    }
}

impl LlmAuditConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> AuditResult<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let providers = match std::env::var("LLM_PROVIDERS") {
            Ok(list) => list
                .split(',')
                .filter(|name| !name.trim().is_empty())
                .map(ProviderConfig::from_env_named)
                .collect::<AuditResult<Vec<_>>>()?,
            Err(_) => defaults.providers,
        };

        let health_thresholds = HealthThresholds {
            degraded_error_rate: env_or(
                "LLM_HEALTH_DEGRADED_ERROR_RATE",
                defaults.health_thresholds.degraded_error_rate,
            ),
            unhealthy_error_rate: env_or(
                "LLM_HEALTH_UNHEALTHY_ERROR_RATE",
                defaults.health_thresholds.unhealthy_error_rate,
            ),
            degraded_latency_ms: env_or(
                "LLM_HEALTH_DEGRADED_LATENCY_MS",
                defaults.health_thresholds.degraded_latency_ms,
            ),
        };

        let merger = MergerConfig {
            coalesce_gap_secs: env_or("LLM_MERGER_COALESCE_GAP_SECS", defaults.merger.coalesce_gap_secs),
            unknown_speaker_label: std::env::var("LLM_MERGER_UNKNOWN_SPEAKER")
                .unwrap_or(defaults.merger.unknown_speaker_label),
        };

        let config = Self {
            providers,
            max_retries_per_provider: env_or("LLM_MAX_RETRIES_PER_PROVIDER", defaults.max_retries_per_provider),
            per_call_timeout_ms: env_or("LLM_PER_CALL_TIMEOUT_MS", defaults.per_call_timeout_ms),
            backoff_base_ms: env_or("LLM_BACKOFF_BASE_MS", defaults.backoff_base_ms),
            cache_ttl_ms: env_or("LLM_CACHE_TTL_MS", defaults.cache_ttl_ms),
            metrics_window_size: env_or("LLM_METRICS_WINDOW_SIZE", defaults.metrics_window_size),
            health_thresholds,
            request_deadline_ms: std::env::var("LLM_REQUEST_DEADLINE_MS")
                .ok()
                .and_then(|s| s.parse().ok()),
            merger,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML, TOML or JSON file.
    ///
    /// `LLM_AUDIT__*` environment variables override file values
    /// (e.g. `LLM_AUDIT__CACHE_TTL_MS=60000`).
    pub fn from_file(path: impl AsRef<Path>) -> AuditResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("LLM_AUDIT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AuditResult<()> {
        if self.providers.is_empty() {
            return Err(AuditError::Config("At least one LLM provider is required".to_string()));
        }
        if self.max_retries_per_provider == 0 {
            return Err(AuditError::Config("max_retries_per_provider must be at least 1".to_string()));
        }
        if self.per_call_timeout_ms == 0 {
            return Err(AuditError::Config("per_call_timeout_ms must be positive".to_string()));
        }
        if self.metrics_window_size == 0 {
            return Err(AuditError::Config("metrics_window_size must be positive".to_string()));
        }

        let thresholds = &self.health_thresholds;
        let in_unit = |rate: f64| (0.0..=1.0).contains(&rate);
        if !in_unit(thresholds.degraded_error_rate) || !in_unit(thresholds.unhealthy_error_rate) {
            return Err(AuditError::Config("Health error rates must be within [0, 1]".to_string()));
        }
        if thresholds.degraded_error_rate > thresholds.unhealthy_error_rate {
            return Err(AuditError::Config(
                "degraded_error_rate must not exceed unhealthy_error_rate".to_string(),
            ));
        }
        if !self.merger.coalesce_gap_secs.is_finite() || self.merger.coalesce_gap_secs < 0.0 {
            return Err(AuditError::Config("coalesce_gap_secs must be a non-negative number".to_string()));
        }
        if self.merger.unknown_speaker_label.trim().is_empty() {
            return Err(AuditError::Config("unknown_speaker_label must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn request_deadline(&self) -> Option<Duration> {
        self.request_deadline_ms.map(Duration::from_millis)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // process environment is global; tests touching it run one at a time
    static ENV_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

    const ENV_KEYS: &[&str] = &[
        "LLM_PROVIDERS",
        "LLM_MAX_RETRIES_PER_PROVIDER",
        "LLM_CACHE_TTL_MS",
        "LLM_REQUEST_DEADLINE_MS",
        "LLM_MERGER_UNKNOWN_SPEAKER",
        "OPENAI_MODEL",
        "OPENAI_API_KEY",
        "OLLAMA_MODEL",
    ];

    fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
        let _guard = ENV_LOCK.lock();
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let result = f();
        for key in ENV_KEYS {
            std::env::remove_var(key);
        }
        result
    }

    #[test]
    fn test_from_env_reads_priority_and_overrides() {
        let config = with_env(
            &[
                ("LLM_PROVIDERS", "openai, ollama"),
                ("LLM_MAX_RETRIES_PER_PROVIDER", "5"),
                ("LLM_REQUEST_DEADLINE_MS", "8000"),
                ("OLLAMA_MODEL", "mistral:7b"),
            ],
            LlmAuditConfig::from_env,
        )
        .unwrap();

        let ids: Vec<&str> = config.providers.iter().map(ProviderConfig::id).collect();
        assert_eq!(ids, vec!["openai", "ollama"]);
        assert_eq!(config.max_retries_per_provider, 5);
        assert_eq!(config.request_deadline(), Some(Duration::from_secs(8)));
        assert!(matches!(
            &config.providers[1],
            ProviderConfig::Ollama { model, .. } if model == "mistral:7b"
        ));
        assert!(matches!(
            &config.providers[0],
            ProviderConfig::OpenAi { model, api_key: None, .. } if model == "gpt-4o-mini"
        ));
        // unset or unparsable values fall back to defaults
        assert_eq!(config.cache_ttl_ms, 3_600_000);
        assert_eq!(config.merger.unknown_speaker_label, "unknown");
    }

    #[test]
    fn test_from_env_defaults_and_rejections() {
        let config = with_env(&[("LLM_CACHE_TTL_MS", "soon")], LlmAuditConfig::from_env).unwrap();
        assert_eq!(config, LlmAuditConfig::default());

        let unknown = with_env(&[("LLM_PROVIDERS", "openai,watson")], LlmAuditConfig::from_env);
        assert!(matches!(unknown, Err(AuditError::Config(msg)) if msg.contains("watson")));

        let zero_retries = with_env(&[("LLM_MAX_RETRIES_PER_PROVIDER", "0")], LlmAuditConfig::from_env);
        assert!(matches!(zero_retries, Err(AuditError::Config(_))));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = LlmAuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_retries_per_provider, 3);
        assert_eq!(config.health_thresholds.unhealthy_error_rate, 0.5);
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let config = LlmAuditConfig {
            health_thresholds: HealthThresholds {
                degraded_error_rate: 0.7,
                unhealthy_error_rate: 0.5,
                degraded_latency_ms: 1_000,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AuditError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_provider_list() {
        let config = LlmAuditConfig {
            providers: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_name() {
        let err = ProviderConfig::from_env_named("watson").unwrap_err();
        assert!(err.to_string().contains("watson"));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
providers:
  - type: openai
    api_url: "http://localhost:8080"
    model: "gpt-4o-mini"
  - type: ollama
    api_url: "http://localhost:11434"
    model: "llama3.1:8b"
max_retries_per_provider: 2
backoff_base_ms: 10
health_thresholds:
  degraded_latency_ms: 2500
"#
        )
        .unwrap();

        let config = LlmAuditConfig::from_file(file.path()).unwrap();
        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].id(), "openai");
        assert_eq!(config.providers[1].id(), "ollama");
        assert_eq!(config.max_retries_per_provider, 2);
        assert_eq!(config.backoff_base_ms, 10);
        assert_eq!(config.health_thresholds.degraded_latency_ms, 2500);
        // untouched sections keep their defaults
        assert_eq!(config.health_thresholds.unhealthy_error_rate, 0.5);
        assert_eq!(config.cache_ttl_ms, 3_600_000);
    }
}

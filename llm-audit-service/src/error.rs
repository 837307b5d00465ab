use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes surfaced in `LlmAuditResponse::error`
pub mod codes {
    pub const ALL_PROVIDERS_EXHAUSTED: &str = "LLM_5001";
    pub const INVALID_DIARIZATION_INPUT: &str = "LLM_4001";
    pub const UNSUPPORTED_TASK: &str = "LLM_4002";
    pub const CONFIGURATION: &str = "LLM_5002";
}

/// Failure of a single provider call.
///
/// `RateLimited` and `Timeout` are transient and retried on the same provider;
/// the other two are structural and move the orchestrator to the next provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider call timed out")]
    Timeout,

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Timeout)
    }

    /// Short label used in metrics and call logs
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::Timeout => ProviderErrorKind::Timeout,
            Self::InvalidResponse(_) => ProviderErrorKind::InvalidResponse,
            Self::ProviderUnavailable(_) => ProviderErrorKind::ProviderUnavailable,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::ProviderUnavailable(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimited,
    Timeout,
    InvalidResponse,
    ProviderUnavailable,
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("All providers exhausted after {attempts} attempts{}", last_error_suffix(.last_error, .deadline_exceeded))]
    AllProvidersExhausted {
        attempts: u32,
        last_error: Option<ProviderError>,
        deadline_exceeded: bool,
    },

    #[error("Invalid diarization input: {0}")]
    InvalidDiarizationInput(String),

    #[error("Unsupported task: {0}")]
    UnsupportedTask(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn last_error_suffix(last_error: &Option<ProviderError>, deadline_exceeded: &bool) -> String {
    match (last_error, *deadline_exceeded) {
        (_, true) => " (request deadline exceeded)".to_string(),
        (Some(err), false) => format!(" (last error: {err})"),
        (None, false) => String::new(),
    }
}

impl AuditError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllProvidersExhausted { .. } => codes::ALL_PROVIDERS_EXHAUSTED,
            Self::InvalidDiarizationInput(_) => codes::INVALID_DIARIZATION_INPUT,
            Self::UnsupportedTask(_) => codes::UNSUPPORTED_TASK,
            Self::Config(_) => codes::CONFIGURATION,
        }
    }
}

impl From<config::ConfigError> for AuditError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub type AuditResult<T> = Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(ProviderError::Timeout.is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(!ProviderError::InvalidResponse("bad json".into()).is_retryable());
        assert!(!ProviderError::ProviderUnavailable("503".into()).is_retryable());
    }

    #[test]
    fn test_exhaustion_message_mentions_cause() {
        let err = AuditError::AllProvidersExhausted {
            attempts: 4,
            last_error: Some(ProviderError::Timeout),
            deadline_exceeded: false,
        };
        assert_eq!(
            err.to_string(),
            "All providers exhausted after 4 attempts (last error: Provider call timed out)"
        );
        assert_eq!(err.code(), codes::ALL_PROVIDERS_EXHAUSTED);
    }
}

pub mod redactor;
pub mod config;

pub use redactor::*;
pub use config::*;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Logging for services that handle clinical text
///
/// Installs a `tracing` subscriber (human or JSON output, `RUST_LOG`
/// filtering) and provides [`preview`] for putting transcript or prompt
/// excerpts into log fields with PII redacted.
///
/// # Detected Data Types
///
/// - **Email Addresses**: user@example.com → EMAIL[hash]
/// - **Phone Numbers**: (555) 123-4567 → (***) ***-****
/// - **SSN**: 123-45-6789 → ***-**-****
/// - **Credit Cards**: 4111-1111-1111-1111 → ****-****-****-****
/// - **IP Addresses**: 192.168.1.1 → 192.***.***.1
/// - **Medical Record Numbers**: MRN123456 → MRN******
/// - **Dates**: 03/14/2024 → [DATE]
///
/// # Example
///
/// ```rust,no_run
/// use logger_redacted::{init_logging, preview, LoggerConfig};
///
/// init_logging(&LoggerConfig::default().with_json(true)).ok();
/// tracing::info!(text = %preview("Call (555) 123-4567 re: MRN 00481234", 60), "Transcript received");
/// ```
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter '{0}': {1}")]
    InvalidFilter(String, String),

    #[error("Invalid redaction pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("Failed to install global subscriber: {0}")]
    Init(String),
}

/// Installs the global subscriber. `RUST_LOG` wins over `config.log_level`.
pub fn init_logging(config: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .map_err(|e| LoggerError::InvalidFilter(config.log_level.clone(), e.to_string()))?,
    };

    install_redactor(PiiRedactor::new(RedactionConfig::from_settings(&config.redaction)?));
    set_redaction_enabled(config.redaction_enabled);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(false).with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| LoggerError::Init(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LoggerConfig::default().with_level("llm_audit=loudest");
        assert!(matches!(init_logging(&config), Err(LoggerError::InvalidFilter(..))));
    }
}

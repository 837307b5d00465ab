// Logger configuration
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default directive when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit newline-delimited JSON instead of the human format
    pub json: bool,
    pub redaction_enabled: bool,
    pub redaction: RedactionSettings,
}

/// Which PII classes `preview` masks, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionSettings {
    pub emails: bool,
    pub phones: bool,
    pub ssn: bool,
    pub credit_cards: bool,
    pub ip_addresses: bool,
    pub mrns: bool,
    pub dates: bool,
    /// Replace matches with a short hash so repeated values correlate
    pub hash_for_correlation: bool,
    /// Site-specific patterns applied after the built-in ones
    pub custom_patterns: Vec<CustomPattern>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPattern {
    pub pattern: String,
    pub replacement: String,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            emails: true,
            phones: true,
            ssn: true,
            credit_cards: true,
            ip_addresses: true,
            mrns: true,
            dates: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            redaction_enabled: true,
            redaction: RedactionSettings::default(),
        }
    }
}

impl LoggerConfig {
    /// Reads `LOG_LEVEL`, `LOG_FORMAT` (`json` or `pretty`), `LOG_REDACTION`
    /// and `LOG_REDACTION_HASH`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let env_bool = |key: &str, default: bool| {
            std::env::var(key)
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(default)
        };
        Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            json: std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")),
            redaction_enabled: env_bool("LOG_REDACTION", defaults.redaction_enabled),
            redaction: RedactionSettings {
                hash_for_correlation: env_bool("LOG_REDACTION_HASH", defaults.redaction.hash_for_correlation),
                ..defaults.redaction
            },
        }
    }

    pub fn with_redaction(mut self, redaction: RedactionSettings) -> Self {
        self.redaction = redaction;
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redaction_section_deserializes_with_defaults() {
        let config: LoggerConfig = serde_json::from_str(
            r#"{
                "log_level": "debug",
                "redaction": {
                    "dates": false,
                    "custom_patterns": [{"pattern": "Bed\\s*\\d+", "replacement": "Bed [REDACTED]"}]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert!(config.redaction_enabled);
        assert!(!config.redaction.dates);
        assert!(config.redaction.emails);
        assert!(config.redaction.hash_for_correlation);
        assert_eq!(config.redaction.custom_patterns[0].replacement, "Bed [REDACTED]");
    }
}

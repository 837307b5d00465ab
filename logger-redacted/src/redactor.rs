use regex::Regex;
use lazy_static::lazy_static;
use sha2::{Sha256, Digest};
use base64::{Engine as _, engine::general_purpose};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RedactionSettings;
use crate::LoggerError;

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"\b(?:\+1[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref CREDIT_CARD_REGEX: Regex = Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap();
    static ref IP_REGEX: Regex = Regex::new(r"\b(?:[0-9]{1,3}\.){3}[0-9]{1,3}\b").unwrap();
    static ref MRN_REGEX: Regex = Regex::new(r"(?i)\bMRN[-:#\s]?\d{4,}\b").unwrap();
    static ref DATE_REGEX: Regex = Regex::new(r"\b(?:\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref ACTIVE_REDACTOR: RwLock<Arc<PiiRedactor>> =
        RwLock::new(Arc::new(PiiRedactor::new(RedactionConfig::default())));
}

static REDACTION_ENABLED: AtomicBool = AtomicBool::new(true);

/// Turns log previews on or off process-wide; set by `init_logging`
pub fn set_redaction_enabled(enabled: bool) {
    REDACTION_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Replaces the redactor used by [`preview`]; set by `init_logging`
pub fn install_redactor(redactor: PiiRedactor) {
    *ACTIVE_REDACTOR.write() = Arc::new(redactor);
}

/// Redacted, length-bounded preview of free text for log fields
///
/// Transcripts and prompts carry PHI; never log them without going through
/// this. When redaction is disabled the text is only truncated.
pub fn preview(text: &str, max_chars: usize) -> String {
    if REDACTION_ENABLED.load(Ordering::Relaxed) {
        let redactor = Arc::clone(&ACTIVE_REDACTOR.read());
        redactor.preview(text, max_chars)
    } else {
        truncate_chars(text, max_chars)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// PII redaction configuration
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub redact_emails: bool,
    pub redact_phones: bool,
    pub redact_ssn: bool,
    pub redact_credit_cards: bool,
    pub redact_ip_addresses: bool,
    pub redact_mrns: bool,
    pub redact_dates: bool,
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl RedactionConfig {
    /// Builds the runtime config, compiling custom patterns
    pub fn from_settings(settings: &RedactionSettings) -> Result<Self, LoggerError> {
        let custom_patterns = settings
            .custom_patterns
            .iter()
            .map(|custom| {
                Regex::new(&custom.pattern)
                    .map(|regex| (regex, custom.replacement.clone()))
                    .map_err(|e| LoggerError::InvalidPattern(custom.pattern.clone(), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            redact_emails: settings.emails,
            redact_phones: settings.phones,
            redact_ssn: settings.ssn,
            redact_credit_cards: settings.credit_cards,
            redact_ip_addresses: settings.ip_addresses,
            redact_mrns: settings.mrns,
            redact_dates: settings.dates,
            hash_for_correlation: settings.hash_for_correlation,
            custom_patterns,
        })
    }
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            redact_emails: true,
            redact_phones: true,
            redact_ssn: true,
            redact_credit_cards: true,
            redact_ip_addresses: true,
            redact_mrns: true,
            redact_dates: true,
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

/// PII redactor for log messages
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }
    
    pub fn redact(&self, text: &str) -> String {
        let mut result = text.to_string();

        if self.config.redact_mrns {
            result = self.redact_mrns(&result);
        }

        if self.config.redact_dates {
            result = DATE_REGEX.replace_all(&result, "[DATE]").to_string();
        }
        
        if self.config.redact_emails {
            result = self.redact_emails(&result);
        }
        
        if self.config.redact_phones {
            result = self.redact_phones(&result);
        }
        
        if self.config.redact_ssn {
            result = self.redact_ssn(&result);
        }
        
        if self.config.redact_credit_cards {
            result = self.redact_credit_cards(&result);
        }
        
        if self.config.redact_ip_addresses {
            result = self.redact_ip_addresses(&result);
        }
        
        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement).to_string();
        }
        
        result
    }
    
    /// Redacts first, then truncates to `max_chars` characters
    pub fn preview(&self, text: &str, max_chars: usize) -> String {
        truncate_chars(&self.redact(text), max_chars)
    }

    fn redact_mrns(&self, text: &str) -> String {
        MRN_REGEX.replace_all(text, |caps: &regex::Captures| {
            if self.config.hash_for_correlation {
                format!("MRN[{}]", self.hash_value(&caps[0]))
            } else {
                "MRN******".to_string()
            }
        }).to_string()
    }

    fn redact_emails(&self, text: &str) -> String {
        EMAIL_REGEX.replace_all(text, |caps: &regex::Captures| {
            let email = &caps[0];
            if self.config.hash_for_correlation {
                format!("EMAIL[{}]", self.hash_value(email))
            } else {
                let parts: Vec<&str> = email.split('@').collect();
                if parts.len() == 2 {
                    format!("{}***@{}***", &parts[0][..1.min(parts[0].len())], &parts[1][..1.min(parts[1].len())])
                } else {
                    "***@***.com".to_string()
                }
            }
        }).to_string()
    }
    
    fn redact_phones(&self, text: &str) -> String {
        PHONE_REGEX.replace_all(text, |caps: &regex::Captures| {
            if self.config.hash_for_correlation {
                format!("PHONE[{}]", self.hash_value(&caps[0]))
            } else {
                "(***) ***-****".to_string()
            }
        }).to_string()
    }
    
    fn redact_ssn(&self, text: &str) -> String {
        SSN_REGEX.replace_all(text, |caps: &regex::Captures| {
            if self.config.hash_for_correlation {
                format!("SSN[{}]", self.hash_value(&caps[0]))
            } else {
                "***-**-****".to_string()
            }
        }).to_string()
    }
    
    fn redact_credit_cards(&self, text: &str) -> String {
        CREDIT_CARD_REGEX.replace_all(text, |caps: &regex::Captures| {
            if self.config.hash_for_correlation {
                format!("CC[{}]", self.hash_value(&caps[0]))
            } else {
                "****-****-****-****".to_string()
            }
        }).to_string()
    }
    
    fn redact_ip_addresses(&self, text: &str) -> String {
        IP_REGEX.replace_all(text, |caps: &regex::Captures| {
            if self.config.hash_for_correlation {
                format!("IP[{}]", self.hash_value(&caps[0]))
            } else {
                let ip = &caps[0];
                let parts: Vec<&str> = ip.split('.').collect();
                if parts.len() == 4 {
                    format!("{}.***.***.{}", parts[0], parts[3])
                } else {
                    "***.***.***.***".to_string()
                }
            }
        }).to_string()
    }
    
    fn hash_value(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        let result = hasher.finalize();
        general_purpose::STANDARD.encode(&result[..8]) // Use first 8 bytes for shorter hash
    }
}

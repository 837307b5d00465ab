use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Model identifier hashed when the caller gives no hint
pub const DEFAULT_MODEL_KEY: &str = "default";

// ASCII unit separator keeps ("ab", "c") and ("a", "bc") apart
const FIELD_SEPARATOR: u8 = 0x1f;

/// Content address of a logical LLM request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(message: &str, model: Option<&str>) -> Self {
        let normalized = normalize_message(message);
        let model = model.map(str::trim).filter(|m| !m.is_empty()).unwrap_or(DEFAULT_MODEL_KEY);

        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(model.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, enough to correlate log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-agnostic message form: trimmed, every whitespace run collapsed
/// to one space (which also folds CRLF/LF differences).
pub fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Audit request/response wire types
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::orchestrator::LlmCallLog;
use crate::providers::TokenUsage;
use crate::transcript::{DiarizationSegment, SpeakerSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditTask {
    /// Merge plus LLM summary
    AuditTranscript,
    /// Merge only
    Diarize,
}

impl AuditTask {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuditTranscript => "audit-transcript",
            Self::Diarize => "diarize",
        }
    }

    pub fn wants_summary(self) -> bool {
        matches!(self, Self::AuditTranscript)
    }
}

impl FromStr for AuditTask {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "audit-transcript" => Ok(Self::AuditTranscript),
            "diarize" => Ok(Self::Diarize),
            other => Err(AuditError::UnsupportedTask(other.to_string())),
        }
    }
}

impl fmt::Display for AuditTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound audit request
///
/// `task` stays a plain string so that an unknown task reaches the
/// coordinator and gets a structured error response instead of failing
/// deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmAuditRequest {
    pub task: String,
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub diarization_segments: Vec<DiarizationSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_transcripts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hint: Option<String>,
}

impl LlmAuditRequest {
    pub fn new(task: AuditTask, transcript: impl Into<String>, segments: Vec<DiarizationSegment>) -> Self {
        Self {
            task: task.as_str().to_string(),
            transcript: transcript.into(),
            diarization_segments: segments,
            partial_transcripts: None,
            model_hint: None,
        }
    }

    pub fn with_partial_transcripts(mut self, partials: Vec<String>) -> Self {
        self.partial_transcripts = Some(partials);
        self
    }

    pub fn with_model_hint(mut self, model: impl Into<String>) -> Self {
        self.model_hint = Some(model.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmAuditResult {
    pub merged_transcript: String,
    pub speakers: Vec<SpeakerSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpt_logs: Option<Vec<LlmCallLog>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&AuditError> for AuditErrorBody {
    fn from(err: &AuditError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmAuditResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<LlmAuditResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl LlmAuditResponse {
    pub fn ok(data: LlmAuditResult, usage: Option<TokenUsage>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            usage,
        }
    }

    pub fn failure(err: &AuditError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.into()),
            usage: None,
        }
    }
}

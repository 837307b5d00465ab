use serde::{Deserialize, Serialize};

/// Speaker turn produced by the external diarization collaborator.
///
/// Times are seconds from the start of the recording. `text` is present when
/// the diarizer had a per-speaker channel, otherwise the merger allocates a
/// slice of the raw transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiarizationSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl DiarizationSegment {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            speaker: None,
            text: None,
        }
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Speaker-attributed piece of the merged transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakerSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub text: String,
}

/// Output of `TranscriptMerger::merge`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedTranscript {
    pub merged_transcript: String,
    pub speakers: Vec<SpeakerSegment>,
}

impl MergedTranscript {
    pub(crate) fn from_speakers(speakers: Vec<SpeakerSegment>) -> Self {
        let merged_transcript = speakers
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            merged_transcript,
            speakers,
        }
    }

    /// Distinct speaker labels in order of first appearance
    pub fn speaker_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for segment in &self.speakers {
            if !labels.contains(&segment.speaker.as_str()) {
                labels.push(segment.speaker.as_str());
            }
        }
        labels
    }

    /// Transcript rendered as `speaker: text` lines, used as summarization input
    pub fn to_labeled_text(&self) -> String {
        self.speakers
            .iter()
            .map(|segment| format!("{}: {}", segment.speaker, segment.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

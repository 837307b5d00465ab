//! Merges a speech-to-text transcript with diarization output.
//!
//! Text allocation for segments without their own text is proportional to
//! speaking time: the transcript's characters are spread over the summed
//! duration of those segments (silence between turns is not counted), each
//! boundary is `floor(cumulative_secs / total_secs * char_count)` and is then
//! moved to the nearest word boundary at most `MAX_WORD_SNAP` characters
//! away (forward preferred) so ordinary words are not split across speakers.
//! Unspaced scripts (CJK) and overlong tokens keep the raw boundary. Every
//! character lands in exactly one segment.

use tracing::debug;

use crate::config::MergerConfig;
use crate::error::{AuditError, AuditResult};
use crate::fingerprint::normalize_message;
use crate::transcript::{DiarizationSegment, MergedTranscript, SpeakerSegment};

/// Furthest a split point may move forward looking for whitespace
const MAX_WORD_SNAP: usize = 24;

pub struct TranscriptMerger {
    config: MergerConfig,
}

impl TranscriptMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    pub fn merge(
        &self,
        raw_transcript: &str,
        diarization_segments: &[DiarizationSegment],
        partial_transcripts: Option<&[String]>,
    ) -> AuditResult<MergedTranscript> {
        validate_segments(diarization_segments)?;

        let transcript = effective_transcript(raw_transcript, partial_transcripts);

        if diarization_segments.is_empty() {
            if transcript.is_empty() {
                return Ok(MergedTranscript::default());
            }
            return Ok(MergedTranscript::from_speakers(vec![SpeakerSegment {
                start: 0.0,
                end: 0.0,
                speaker: self.config.unknown_speaker_label.clone(),
                text: transcript,
            }]));
        }

        let timeline = clamp_overlaps(diarization_segments);
        let texts = allocate_text(&transcript, &timeline);

        let mut speakers: Vec<SpeakerSegment> = Vec::with_capacity(timeline.len());
        for (segment, text) in timeline.iter().zip(texts) {
            if text.is_empty() {
                debug!(start = segment.start, end = segment.end, "Diarization segment carries no speech");
                continue;
            }
            let speaker = self.speaker_label(segment);
            self.push_coalesced(&mut speakers, SpeakerSegment {
                start: segment.start,
                end: segment.end,
                speaker,
                text,
            });
        }

        debug!(
            input_segments = diarization_segments.len(),
            speaker_segments = speakers.len(),
            "Transcript merged"
        );

        Ok(MergedTranscript::from_speakers(speakers))
    }

    fn speaker_label(&self, segment: &DiarizationSegment) -> String {
        segment
            .speaker
            .as_deref()
            .map(str::trim)
            .filter(|speaker| !speaker.is_empty())
            .map_or_else(|| self.config.unknown_speaker_label.clone(), str::to_string)
    }

    fn push_coalesced(&self, speakers: &mut Vec<SpeakerSegment>, next: SpeakerSegment) {
        if let Some(last) = speakers.last_mut() {
            if last.speaker == next.speaker && next.start - last.end < self.config.coalesce_gap_secs {
                last.end = last.end.max(next.end);
                last.text.push(' ');
                last.text.push_str(&next.text);
                return;
            }
        }
        speakers.push(next);
    }
}

fn validate_segments(segments: &[DiarizationSegment]) -> AuditResult<()> {
    for (index, segment) in segments.iter().enumerate() {
        if !segment.start.is_finite() || !segment.end.is_finite() {
            return Err(AuditError::InvalidDiarizationInput(format!(
                "segment {index} has a non-finite time bound"
            )));
        }
        if segment.start < 0.0 {
            return Err(AuditError::InvalidDiarizationInput(format!(
                "segment {index} starts before zero ({})",
                segment.start
            )));
        }
        if segment.end < segment.start {
            return Err(AuditError::InvalidDiarizationInput(format!(
                "segment {index} ends ({}) before it starts ({})",
                segment.end, segment.start
            )));
        }
    }
    Ok(())
}

fn effective_transcript(raw_transcript: &str, partial_transcripts: Option<&[String]>) -> String {
    let raw = normalize_message(raw_transcript);
    if !raw.is_empty() {
        return raw;
    }

    let partials = partial_transcripts.unwrap_or_default();
    partials
        .iter()
        .map(|partial| normalize_message(partial))
        .filter(|partial| !partial.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sorts by start time and pushes each overlapping segment's start to the
/// previous segment's end. Segments are shortened, never removed.
fn clamp_overlaps(segments: &[DiarizationSegment]) -> Vec<DiarizationSegment> {
    let mut sorted = segments.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut previous_end: Option<f64> = None;
    for segment in &mut sorted {
        if let Some(prev_end) = previous_end {
            if segment.start < prev_end {
                debug!(
                    start = segment.start,
                    clamped_to = prev_end,
                    speaker = segment.speaker.as_deref().unwrap_or_default(),
                    "Clamping overlapping diarization segment"
                );
                segment.start = prev_end;
                segment.end = segment.end.max(prev_end);
            }
        }
        previous_end = Some(segment.end);
    }
    sorted
}

/// Returns one (possibly empty) text per segment, in timeline order
fn allocate_text(transcript: &str, timeline: &[DiarizationSegment]) -> Vec<String> {
    let chars: Vec<char> = transcript.chars().collect();
    let untexted: Vec<usize> = timeline
        .iter()
        .enumerate()
        .filter(|(_, segment)| segment.text.is_none())
        .map(|(index, _)| index)
        .collect();

    let boundaries = proportional_boundaries(&chars, timeline, &untexted);

    let mut allocated = vec![String::new(); timeline.len()];
    for (slot, index) in untexted.iter().enumerate() {
        let (from, to) = match (boundaries.get(slot), boundaries.get(slot + 1)) {
            (Some(&from), Some(&to)) => (from, to),
            _ => continue,
        };
        let slice: String = chars.iter().skip(from).take(to.saturating_sub(from)).collect();
        if let Some(target) = allocated.get_mut(*index) {
            *target = slice.trim().to_string();
        }
    }

    for (index, segment) in timeline.iter().enumerate() {
        if let (Some(text), Some(target)) = (&segment.text, allocated.get_mut(index)) {
            *target = normalize_message(text);
        }
    }
    allocated
}

/// Character boundaries (len = untexted + 1) splitting the transcript among
/// the untexted segments
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn proportional_boundaries(chars: &[char], timeline: &[DiarizationSegment], untexted: &[usize]) -> Vec<usize> {
    let char_count = chars.len();
    let durations: Vec<f64> = untexted
        .iter()
        .filter_map(|index| timeline.get(*index))
        .map(DiarizationSegment::duration)
        .collect();
    let total: f64 = durations.iter().sum();

    let mut boundaries = Vec::with_capacity(untexted.len() + 1);
    boundaries.push(0);

    let mut cumulative = 0.0;
    for (slot, duration) in durations.iter().enumerate() {
        let is_last = slot + 1 == durations.len();
        let raw = if is_last {
            char_count
        } else if total > 0.0 {
            cumulative += duration;
            ((cumulative / total) * char_count as f64).floor() as usize
        } else {
            // all zero-length: split evenly by count
            ((slot + 1) * char_count) / durations.len()
        };
        let previous = boundaries.last().copied().unwrap_or(0);
        boundaries.push(snap_to_word_boundary(chars, raw.min(char_count)).max(previous));
    }
    boundaries
}

/// Nearest word boundary within `MAX_WORD_SNAP` characters, looking forward
/// first and then back; `index` itself when the text has no whitespace there
fn snap_to_word_boundary(chars: &[char], index: usize) -> usize {
    if index == 0 || index >= chars.len() {
        return index.min(chars.len());
    }
    let is_space = |i: usize| chars.get(i).is_some_and(|c| c.is_whitespace());
    let at_boundary = |i: &usize| is_space(*i - 1) || is_space(*i);

    let forward_limit = index.saturating_add(MAX_WORD_SNAP + 1).min(chars.len());
    let backward_limit = index.saturating_sub(MAX_WORD_SNAP).max(1);

    (index..forward_limit)
        .find(at_boundary)
        .or_else(|| (backward_limit..index).rev().find(at_boundary))
        .unwrap_or(index)
}

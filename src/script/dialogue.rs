//! Validation of generated dialogue: batching, coverage and alternation.

use std::collections::BTreeSet;

use crate::content::Segment;

use super::types::{CandidateTurn, SpeakerRole};

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "because", "been", "before", "being", "between", "both",
    "could", "does", "doing", "down", "each", "from", "further", "have", "having", "here",
    "into", "just", "more", "most", "much", "must", "only", "other", "over", "same", "should",
    "some", "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "under", "until", "very", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your", "yours",
];

/// A group of consecutive segments sent to the generator together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub number: usize,
    pub segments: Vec<Segment>,
}

/// Group segments into batches whose combined text stays within
/// `max_chars`. A segment larger than the limit gets a batch of its own.
pub fn batch_segments(segments: &[Segment], max_chars: usize) -> Vec<Batch> {
    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<Segment> = Vec::new();
    let mut size = 0;

    for segment in segments {
        let len = segment.text.chars().count();
        if !current.is_empty() && size + len > max_chars {
            batches.push(Batch {
                number: batches.len(),
                segments: std::mem::take(&mut current),
            });
            size = 0;
        }
        size += len;
        current.push(segment.clone());
    }
    if !current.is_empty() {
        batches.push(Batch {
            number: batches.len(),
            segments: current,
        });
    }
    batches
}

/// Lowercase content words of four or more letters, minus stop words.
pub fn key_terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4 && w.chars().all(char::is_alphabetic))
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Best fraction of a segment's key terms found in any single turn.
/// Segments without key terms count as fully covered.
pub fn coverage(segment: &str, turns: &[CandidateTurn]) -> f32 {
    let terms = key_terms(segment);
    if terms.is_empty() {
        return 1.0;
    }
    turns
        .iter()
        .map(|turn| {
            let turn_terms = key_terms(&turn.text);
            terms.intersection(&turn_terms).count() as f32 / terms.len() as f32
        })
        .fold(0.0, f32::max)
}

/// Check one batch of candidate turns. Returns the reason on rejection.
pub fn validate_batch(
    batch: &Batch,
    turns: &[CandidateTurn],
    opening_speaker: SpeakerRole,
    threshold: f32,
) -> Result<(), String> {
    if turns.is_empty() {
        return Err("generator returned no turns".to_string());
    }
    if let Some(pos) = turns.iter().position(|t| t.text.trim().is_empty()) {
        return Err(format!("turn {pos} is empty"));
    }
    if turns.iter().any(|t| t.speaker == SpeakerRole::Narrator) {
        return Err("narrator turn in a dialogue".to_string());
    }

    let speakers: BTreeSet<SpeakerRole> = turns.iter().map(|t| t.speaker).collect();
    if speakers.len() < 2 {
        return Err("only one speaker used".to_string());
    }

    if turns[0].speaker != opening_speaker && !turns[0].continuation {
        return Err(format!(
            "batch must open with {opening_speaker}, got {}",
            turns[0].speaker
        ));
    }
    for (i, pair) in turns.windows(2).enumerate() {
        if pair[0].speaker == pair[1].speaker && !pair[1].continuation {
            return Err(format!(
                "turn {} repeats speaker {} without continuation",
                i + 1,
                pair[1].speaker
            ));
        }
    }

    for segment in &batch.segments {
        let score = coverage(&segment.text, turns);
        if score < threshold {
            return Err(format!(
                "segment {} not covered (overlap {:.2} < {:.2})",
                segment.index, score, threshold
            ));
        }
    }
    Ok(())
}

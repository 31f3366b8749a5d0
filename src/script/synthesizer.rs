//! Script synthesis for both styles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::Fingerprint;
use crate::content::{Document, Segment};
use crate::error::ErrorKind;

use super::dialogue::{Batch, batch_segments, validate_batch};
use super::generator::{GenerationRequest, ScriptGenerator};
use super::narration::{NARRATION_VERSION, rewrite_for_speech};
use super::types::{CandidateTurn, Script, ScriptError, SpeakerRole, Style, Turn};

/// Script synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptConfig {
    /// Extra generation attempts per batch after the first one.
    pub retries: u32,
    /// Minimum key-term overlap for a segment to count as covered.
    pub coverage_threshold: f32,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            coverage_threshold: 0.3,
        }
    }
}

/// Produces scripts from segments.
pub struct ScriptSynthesizer {
    generator: Arc<dyn ScriptGenerator>,
    config: ScriptConfig,
}

impl ScriptSynthesizer {
    pub fn new(generator: Arc<dyn ScriptGenerator>, config: ScriptConfig) -> Self {
        Self { generator, config }
    }

    /// Version string that identifies how scripts of `style` are produced.
    pub fn producer_version(&self, style: Style) -> String {
        match style {
            Style::Narration => NARRATION_VERSION.to_string(),
            Style::Dialogue => self.generator.version(),
        }
    }

    /// Cache key of the script this synthesizer would produce.
    pub fn fingerprint(&self, document: &Document, style: Style) -> Fingerprint {
        Fingerprint::script(&document.source_hash, style, &self.producer_version(style))
    }

    pub async fn synthesize(
        &self,
        document: &Document,
        segments: &[Segment],
        style: Style,
    ) -> Result<Script, ScriptError> {
        if segments.is_empty() {
            return Err(ScriptError::NoSegments);
        }

        let candidates = match style {
            Style::Narration => narrate(segments),
            Style::Dialogue => self.converse(segments).await?,
        };

        let id = self.fingerprint(document, style).short();
        let turns = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| Turn {
                script_id: id.clone(),
                index,
                speaker_role: candidate.speaker,
                text: candidate.text,
                continuation: candidate.continuation,
            })
            .collect::<Vec<_>>();

        info!(script = %id, style = style.as_str(), turns = turns.len(), "script ready");
        Ok(Script {
            id,
            document_id: document.id.clone(),
            style,
            producer_version: self.producer_version(style),
            turns,
        })
    }

    async fn converse(&self, segments: &[Segment]) -> Result<Vec<CandidateTurn>, ScriptError> {
        let batches = batch_segments(segments, self.generator.max_input_chars());
        let mut turns: Vec<CandidateTurn> = Vec::new();

        for batch in &batches {
            let opening = turns
                .last()
                .map(|t| t.speaker.other_host())
                .unwrap_or(SpeakerRole::HostA);
            let accepted = self.generate_batch(batch, opening).await?;
            turns.extend(accepted);
        }
        Ok(turns)
    }

    async fn generate_batch(
        &self,
        batch: &Batch,
        opening_speaker: SpeakerRole,
    ) -> Result<Vec<CandidateTurn>, ScriptError> {
        let attempts = self.config.retries + 1;
        let mut last_reason = String::new();

        for attempt in 0..attempts {
            let request = GenerationRequest {
                style: Style::Dialogue,
                segments: batch.segments.iter().map(|s| s.text.clone()).collect(),
                opening_speaker,
                attempt,
            };

            let reason = match self.generator.generate(&request).await {
                Ok(candidates) => match validate_batch(
                    batch,
                    &candidates,
                    opening_speaker,
                    self.config.coverage_threshold,
                ) {
                    Ok(()) => {
                        debug!(batch = batch.number, attempt, turns = candidates.len(), "batch accepted");
                        return Ok(candidates);
                    }
                    Err(reason) => reason,
                },
                Err(e) if attempt + 1 == attempts && e.kind() == ErrorKind::BackendTransient => {
                    return Err(ScriptError::Generator(e));
                }
                Err(e) => e.to_string(),
            };

            warn!(batch = batch.number, attempt, %reason, "rejected generated dialogue");
            last_reason = reason;
        }

        Err(ScriptError::Incomplete {
            batch: batch.number,
            reason: last_reason,
        })
    }
}

/// One narrator turn per segment.
fn narrate(segments: &[Segment]) -> Vec<CandidateTurn> {
    segments
        .iter()
        .map(|segment| {
            let spoken = rewrite_for_speech(&segment.text);
            let text = if spoken.is_empty() {
                segment.text.clone()
            } else {
                spoken
            };
            CandidateTurn::new(SpeakerRole::Narrator, text)
        })
        .collect()
}

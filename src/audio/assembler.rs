//! Joins per-turn clips into the final track.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::AudioClip;
use crate::error::ErrorKind;
use crate::script::{Script, SpeakerRole};

use super::wav::{self, PcmAudio};

const MAX_SNIPPET_CHARS: usize = 50;

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-\s]+").unwrap());

/// Errors raised while assembling the final audio.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Missing audio for turns {0:?}")]
    MissingClip(Vec<usize>),

    #[error("Cannot decode clip for turn {turn}: {reason}")]
    Decode { turn: usize, reason: String },

    #[error("Cannot encode output audio: {0}")]
    Encode(#[from] hound::Error),

    #[error("Output IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot write boundaries: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AssemblyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AssemblyError::MissingClip(_) | AssemblyError::Decode { .. } => ErrorKind::AssemblyIncomplete,
            AssemblyError::Encode(_) | AssemblyError::Io(_) | AssemblyError::Serialization(_) => {
                ErrorKind::Storage
            }
        }
    }
}

/// Pacing and format of the assembled track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblerConfig {
    /// Output sample rate; clips at other rates are resampled.
    pub sample_rate: u32,
    /// Silence between turns of the same speaker.
    pub pause_ms: u64,
    /// Silence when the speaker changes.
    pub speaker_change_pause_ms: u64,
    /// Overlap applied where a speaker continues without a pause.
    pub crossfade_ms: u64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            pause_ms: 300,
            speaker_change_pause_ms: 650,
            crossfade_ms: 20,
        }
    }
}

/// Where one turn sits in the final track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnBoundary {
    pub turn_index: usize,
    pub speaker_role: SpeakerRole,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// The assembled output of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub job_id: String,
    pub audio_path: PathBuf,
    pub total_duration_ms: u64,
    pub turn_boundaries: Vec<TurnBoundary>,
}

impl Artifact {
    /// Sidecar file next to the audio.
    pub fn sidecar_path(&self) -> PathBuf {
        self.audio_path.with_extension("json")
    }
}

/// Concatenates clips in turn order.
pub struct Assembler {
    config: AssemblerConfig,
}

impl Assembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self { config }
    }

    /// Join the clips of `script` and write the track to `output`, with a
    /// JSON sidecar of turn boundaries next to it.
    ///
    /// Clips are placed by turn index, never by the order they finished in.
    pub fn assemble(
        &self,
        job_id: &str,
        script: &Script,
        clips: &BTreeMap<usize, AudioClip>,
        output: &Path,
    ) -> Result<Artifact, AssemblyError> {
        let missing: Vec<usize> = script
            .turns
            .iter()
            .filter(|t| !clips.contains_key(&t.index))
            .map(|t| t.index)
            .collect();
        if !missing.is_empty() {
            return Err(AssemblyError::MissingClip(missing));
        }

        let rate = self.config.sample_rate;
        let mut track: Vec<f32> = Vec::new();
        let mut boundaries = Vec::with_capacity(script.turns.len());
        let mut previous_len = 0;

        for (position, turn) in script.turns.iter().enumerate() {
            let clip = &clips[&turn.index];
            let mut samples = self.load(clip)?;

            let mut start = track.len();
            if position > 0 {
                if turn.continuation && !script.speaker_changes_at(position) {
                    let overlap = wav::ms_to_samples(self.config.crossfade_ms, rate)
                        .min(samples.len() / 2)
                        .min(previous_len / 2);
                    start -= overlap;
                    crossfade(&mut track, &samples, overlap);
                    track.extend_from_slice(&samples[overlap..]);
                } else {
                    let pause = if script.speaker_changes_at(position) {
                        self.config.speaker_change_pause_ms
                    } else {
                        self.config.pause_ms
                    };
                    // Fade both edges of the silence so the join does not click.
                    let ramp = wav::ms_to_samples(self.config.crossfade_ms, rate)
                        .min(samples.len() / 2)
                        .min(previous_len / 2);
                    fade_out(&mut track, ramp);
                    fade_in(&mut samples, ramp);
                    track.resize(track.len() + wav::ms_to_samples(pause, rate), 0.0);
                    start = track.len();
                    track.extend_from_slice(&samples);
                }
            } else {
                track.extend_from_slice(&samples);
            }

            previous_len = samples.len();
            boundaries.push(TurnBoundary {
                turn_index: turn.index,
                speaker_role: turn.speaker_role,
                start_ms: wav::samples_to_ms(start, rate),
                end_ms: wav::samples_to_ms(start + samples.len(), rate),
            });
        }

        let audio = PcmAudio {
            samples: track,
            sample_rate: rate,
        };
        let artifact = Artifact {
            job_id: job_id.to_string(),
            audio_path: output.to_path_buf(),
            total_duration_ms: audio.duration_ms(),
            turn_boundaries: boundaries,
        };

        if let Some(dir) = output.parent() {
            std::fs::create_dir_all(dir)?;
        }
        write_atomic(output, &wav::encode(&audio)?)?;
        write_atomic(&artifact.sidecar_path(), &serde_json::to_vec_pretty(&artifact)?)?;

        info!(
            job = job_id,
            path = %output.display(),
            turns = artifact.turn_boundaries.len(),
            duration_ms = artifact.total_duration_ms,
            "artifact written"
        );
        Ok(artifact)
    }

    fn load(&self, clip: &AudioClip) -> Result<Vec<f32>, AssemblyError> {
        let bytes = std::fs::read(&clip.audio_path).map_err(|e| AssemblyError::Decode {
            turn: clip.turn_index,
            reason: format!("{}: {e}", clip.audio_path.display()),
        })?;
        let pcm = wav::decode(&bytes).map_err(|e| AssemblyError::Decode {
            turn: clip.turn_index,
            reason: e.to_string(),
        })?;
        if pcm.sample_rate == self.config.sample_rate {
            return Ok(pcm.samples);
        }
        debug!(turn = clip.turn_index, from = pcm.sample_rate, "resampling clip");
        wav::resample(&pcm.samples, pcm.sample_rate, self.config.sample_rate).map_err(|reason| {
            AssemblyError::Decode {
                turn: clip.turn_index,
                reason,
            }
        })
    }
}

/// Blend the first `overlap` samples of `next` into the tail of `track`.
fn crossfade(track: &mut [f32], next: &[f32], overlap: usize) {
    if overlap == 0 {
        return;
    }
    let tail = track.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap + 1) as f32;
        track[tail + i] = track[tail + i] * (1.0 - t) + next[i] * t;
    }
}

fn fade_out(track: &mut [f32], len: usize) {
    let tail = track.len() - len;
    for (i, sample) in track[tail..].iter_mut().enumerate() {
        *sample *= 1.0 - (i + 1) as f32 / (len + 1) as f32;
    }
}

fn fade_in(samples: &mut [f32], len: usize) {
    for (i, sample) in samples[..len].iter_mut().enumerate() {
        *sample *= (i + 1) as f32 / (len + 1) as f32;
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact");
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Turn a title into a short file-name-safe snippet.
pub fn sanitize_filename(text: &str) -> String {
    let lowered = text.to_lowercase();
    let cleaned = NON_WORD.replace_all(&lowered, "");
    let joined = SEPARATORS.replace_all(cleaned.trim(), "_");
    let snippet: String = joined.trim_matches('_').chars().take(MAX_SNIPPET_CHARS).collect();
    let snippet = snippet.trim_end_matches('_').to_string();
    if snippet.is_empty() {
        "audio".to_string()
    } else {
        snippet
    }
}

/// `<dir>/<YYYYMMDD_HHMMSS>_<snippet>.wav`.
pub fn output_path(dir: &Path, title: &str, at: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}_{}.wav", at.format("%Y%m%d_%H%M%S"), sanitize_filename(title)))
}

/// A generated audio file in the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// Generated audio files in `dir`, newest first. A missing directory is
/// treated as empty.
pub fn list_outputs(dir: &Path) -> Result<Vec<OutputFile>, std::io::Error> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_audio = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wav") || ext.eq_ignore_ascii_case("mp3"));
        if !is_audio {
            continue;
        }
        let metadata = std::fs::metadata(&path)?;
        files.push(OutputFile {
            path,
            modified: metadata.modified()?,
            size: metadata.len(),
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

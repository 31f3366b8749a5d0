//! Per-turn speech synthesis with bounded concurrency.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendError, BackendKind, SpeechBackend, SynthesizeRequest};
use crate::cache::{CacheError, Fingerprint, Namespace, PipelineCache};
use crate::error::ErrorKind;
use crate::script::{Script, Turn};
use crate::voice::{VoiceBinding, VoiceError};

use super::retry::{RetryFailure, RetryPolicy, retry};

/// Errors for a single turn.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("{error} (gave up after {attempts} attempts)")]
    Exhausted { error: BackendError, attempts: u32 },

    #[error(transparent)]
    Backend(BackendError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Cancelled before synthesis")]
    Cancelled,
}

impl TurnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TurnError::Exhausted { error, .. } | TurnError::Backend(error) => error.kind(),
            TurnError::Voice(_) => ErrorKind::BackendFatal,
            TurnError::Cache(_) => ErrorKind::Storage,
            TurnError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<RetryFailure> for TurnError {
    fn from(failure: RetryFailure) -> Self {
        match failure {
            RetryFailure::Exhausted { error, attempts } => TurnError::Exhausted { error, attempts },
            RetryFailure::Fatal(error) => TurnError::Backend(error),
            RetryFailure::Cancelled => TurnError::Cancelled,
        }
    }
}

/// Recorded failure of one turn, kept in job status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&TurnError> for TurnFailure {
    fn from(e: &TurnError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Cache entry for rendered audio. Shared by every turn with the same
/// text, backend and voice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub fingerprint: Fingerprint,
    pub backend: BackendKind,
    pub voice_id: String,
    pub audio_path: PathBuf,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

/// Rendered audio for one turn of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub script_id: String,
    pub turn_index: usize,
    pub backend: BackendKind,
    pub voice_id: String,
    pub fingerprint: Fingerprint,
    pub audio_path: PathBuf,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

impl AudioClip {
    fn for_turn(turn: &Turn, record: ClipRecord) -> Self {
        Self {
            script_id: turn.script_id.clone(),
            turn_index: turn.index,
            backend: record.backend,
            voice_id: record.voice_id,
            fingerprint: record.fingerprint,
            audio_path: record.audio_path,
            duration_ms: record.duration_ms,
            sample_rate: record.sample_rate,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    /// Backend requests in flight at once, per job.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one orchestration pass, keyed by turn index.
#[derive(Debug, Default)]
pub struct TtsReport {
    pub clips: BTreeMap<usize, AudioClip>,
    pub failures: BTreeMap<usize, TurnFailure>,
    /// Turns skipped because cancellation was observed.
    pub cancelled: Vec<usize>,
}

impl TtsReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.cancelled.is_empty()
    }
}

#[derive(Clone)]
struct Voiced {
    backend: Arc<dyn SpeechBackend>,
    voices: VoiceBinding,
}

impl Voiced {
    fn key(&self, turn: &Turn) -> Result<(String, Fingerprint), VoiceError> {
        let voice = self.voices.voice_for(turn.speaker_role)?.to_string();
        let settings = self.backend.render_settings();
        let key = Fingerprint::clip(&turn.text, self.backend.kind(), &voice, &settings);
        Ok((voice, key))
    }
}

/// Renders the turns of a script through a primary backend, falling back
/// to a secondary one when the primary keeps failing transiently.
#[derive(Clone)]
pub struct TtsOrchestrator {
    primary: Voiced,
    fallback: Option<Voiced>,
    cache: Arc<PipelineCache>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    owner: Option<Arc<str>>,
}

impl TtsOrchestrator {
    pub fn new(
        primary: Arc<dyn SpeechBackend>,
        voices: VoiceBinding,
        cache: Arc<PipelineCache>,
        config: &TtsConfig,
    ) -> Self {
        Self {
            primary: Voiced {
                backend: primary,
                voices,
            },
            fallback: None,
            cache,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            retry: config.retry.clone(),
            owner: None,
        }
    }

    /// Pin every clip this orchestrator touches in the cache under `owner`,
    /// so eviction cannot remove audio before it is assembled. The owner
    /// releases the pins with [`PipelineCache::release`].
    pub fn pinned_for(mut self, owner: &str) -> Self {
        self.owner = Some(Arc::from(owner));
        self
    }

    fn pin(&self, key: &Fingerprint) {
        if let Some(owner) = &self.owner {
            self.cache.pin(owner, Namespace::Clips, key);
        }
    }

    /// Use `backend` with `voices` when the primary backend is exhausted.
    pub fn with_fallback(mut self, backend: Arc<dyn SpeechBackend>, voices: VoiceBinding) -> Self {
        self.fallback = Some(Voiced { backend, voices });
        self
    }

    /// Render the turns at `pending` indices of `script`.
    ///
    /// A failing turn never aborts its siblings; every turn ends up in
    /// exactly one of the report's maps. `on_clip` is called with the
    /// number of clips finished so far in this pass.
    pub async fn synthesize<P>(
        &self,
        script: &Script,
        pending: &[usize],
        cancel: &CancellationToken,
        on_clip: P,
    ) -> TtsReport
    where
        P: Fn(usize) + Send + Sync,
    {
        let mut tasks = JoinSet::new();
        let mut task_turns = HashMap::new();
        let mut report = TtsReport::default();

        for &index in pending {
            let Some(turn) = script.turns.get(index).cloned() else {
                warn!(index, script = %script.id, "no such turn, skipping");
                continue;
            };
            let this = self.clone();
            let cancel = cancel.clone();
            let handle = tasks.spawn(async move {
                let result = this.render_turn(&turn, &cancel).await;
                (turn.index, result)
            });
            task_turns.insert(handle.id(), index);
        }

        info!(script = %script.id, turns = task_turns.len(), "synthesizing turns");

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(clip))) => {
                    report.clips.insert(index, clip);
                    on_clip(report.clips.len());
                }
                Ok((index, Err(TurnError::Cancelled))) => report.cancelled.push(index),
                Ok((index, Err(e))) => {
                    warn!(index, kind = %e.kind(), error = %e, "turn failed");
                    report.failures.insert(index, TurnFailure::from(&e));
                }
                Err(e) => {
                    let index = task_turns.get(&e.id()).copied().unwrap_or_default();
                    error!(index, error = %e, "turn task aborted");
                    report.failures.insert(
                        index,
                        TurnFailure {
                            kind: ErrorKind::BackendFatal,
                            message: e.to_string(),
                        },
                    );
                }
            }
        }

        report.cancelled.sort_unstable();
        report
    }

    async fn render_turn(&self, turn: &Turn, cancel: &CancellationToken) -> Result<AudioClip, TurnError> {
        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }

        let (voice, key) = self.primary.key(turn)?;

        // A resumed job may already have this turn from the fallback.
        if !self.cache.contains(Namespace::Clips, &key)
            && let Some(record) = self.cached_fallback(turn)?
        {
            debug!(turn = turn.index, "reusing fallback clip");
            return Ok(AudioClip::for_turn(turn, record));
        }

        match self.render_with(&self.primary, &voice, &key, &turn.text, cancel).await {
            Ok(record) => Ok(AudioClip::for_turn(turn, record)),
            Err(TurnError::Exhausted { error, attempts }) => {
                let Some(fallback) = &self.fallback else {
                    return Err(TurnError::Exhausted { error, attempts });
                };
                warn!(
                    turn = turn.index,
                    primary = %self.primary.backend.kind(),
                    fallback = %fallback.backend.kind(),
                    %error,
                    "primary backend exhausted, falling back"
                );
                let (voice, key) = fallback.key(turn)?;
                let record = self.render_with(fallback, &voice, &key, &turn.text, cancel).await?;
                Ok(AudioClip::for_turn(turn, record))
            }
            Err(e) => Err(e),
        }
    }

    fn cached_fallback(&self, turn: &Turn) -> Result<Option<ClipRecord>, TurnError> {
        let Some(fallback) = &self.fallback else {
            return Ok(None);
        };
        let Ok((_, key)) = fallback.key(turn) else {
            return Ok(None);
        };
        if !self.cache.contains(Namespace::Clips, &key) {
            return Ok(None);
        }
        self.pin(&key);
        Ok(self.cache.get::<ClipRecord>(Namespace::Clips, &key)?)
    }

    async fn render_with(
        &self,
        target: &Voiced,
        voice: &str,
        key: &Fingerprint,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<ClipRecord, TurnError> {
        self.pin(key);
        let (record, _hit) = self
            .cache
            .get_or_compute(Namespace::Clips, key, || async {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(TurnError::Cancelled),
                    permit = self.permits.acquire() => permit.map_err(|_| TurnError::Cancelled)?,
                };

                let request = &SynthesizeRequest::new(text, voice);
                let backend = &target.backend;
                let audio = retry(&self.retry, cancel, move |_| backend.synthesize(request)).await?;

                let audio_path = self.cache.write_blob(Namespace::Clips, key, &audio.bytes)?;
                Ok::<_, TurnError>(ClipRecord {
                    fingerprint: key.clone(),
                    backend: backend.kind(),
                    voice_id: voice.to_string(),
                    audio_path,
                    duration_ms: audio.duration_ms,
                    sample_rate: audio.sample_rate,
                })
            })
            .await?;
        Ok(record)
    }
}

//! Job records.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::Artifact;
use crate::backend::BackendKind;
use crate::cache::{CacheError, Fingerprint};
use crate::content::RawInput;
use crate::engine::{AudioClip, TurnFailure};
use crate::error::{ErrorKind, PipelineError};
use crate::script::Style;
use crate::voice::{VoiceBinding, VoiceError};

/// Errors from the job surface.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job id: {0}")]
    InvalidId(String),

    #[error("Job {id} is {state} and cannot be resumed")]
    NotResumable { id: String, state: JobState },

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Backend {0} is not configured")]
    BackendNotConfigured(BackendKind),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Job store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::NotFound(_)
            | JobError::InvalidId(_)
            | JobError::NotResumable { .. }
            | JobError::AlreadyRunning(_)
            | JobError::BackendNotConfigured(_) => ErrorKind::InvalidInput,
            JobError::Voice(_) => ErrorKind::BackendFatal,
            JobError::Pipeline(e) => e.kind(),
            JobError::Cache(_) | JobError::Io(_) | JobError::Serialization(_) => ErrorKind::Storage,
        }
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Normalizing,
    Segmenting,
    SynthesizingScript,
    SynthesizingAudio,
    Assembling,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Submitted => "Submitted",
            JobState::Normalizing => "Normalizing",
            JobState::Segmenting => "Segmenting",
            JobState::SynthesizingScript => "SynthesizingScript",
            JobState::SynthesizingAudio => "SynthesizingAudio",
            JobState::Assembling => "Assembling",
            JobState::Completed => "Completed",
            JobState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub input: RawInput,
    pub style: Style,
    pub backend: BackendKind,
    #[serde(default)]
    pub fallback: Option<BackendKind>,
    /// Voice overrides on top of the backend defaults.
    #[serde(default)]
    pub voices: VoiceBinding,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl JobRequest {
    pub fn new(input: RawInput, style: Style) -> Self {
        Self {
            input,
            style,
            backend: BackendKind::default(),
            fallback: None,
            voices: VoiceBinding::new(),
            output_dir: None,
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_fallback(mut self, fallback: BackendKind) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_voices(mut self, voices: VoiceBinding) -> Self {
        self.voices = voices;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }
}

/// Where and why a job stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: JobState,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub failed_turns: Vec<usize>,
}

/// Output of each stage, kept so a resumed job can skip finished work.
/// Documents and scripts are referenced by cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageResults {
    pub document_key: Option<Fingerprint>,
    pub document_id: Option<String>,
    pub title: Option<String>,
    pub segments: Option<usize>,
    pub script_key: Option<Fingerprint>,
    pub script_id: Option<String>,
    pub turns_total: usize,
    pub clips: BTreeMap<usize, AudioClip>,
    pub turn_failures: BTreeMap<usize, TurnFailure>,
    pub artifact: Option<Artifact>,
}

/// One run of the pipeline for one input. The only mutable record in the
/// system; everything it points to is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub request: JobRequest,
    pub state: JobState,
    #[serde(default)]
    pub results: StageResults,
    #[serde(default)]
    pub failure: Option<StageFailure>,
    /// Mirrors the cancel marker in the job store.
    #[serde(default)]
    pub cancel_requested: bool,
    /// Number of times the job has been run.
    #[serde(default)]
    pub runs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(request: JobRequest) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request,
            state: JobState::Submitted,
            results: StageResults::default(),
            failure: None,
            cancel_requested: false,
            runs: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        self.results.document_id.as_deref()
    }

    pub fn style(&self) -> Style {
        self.request.style
    }

    pub(crate) fn transition(&mut self, state: JobState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Record `error` against the stage the job was in.
    pub(crate) fn fail(&mut self, error: &JobError) {
        let failed_turns = match error {
            JobError::Pipeline(PipelineError::TurnsFailed(turns, _)) => turns.clone(),
            _ => Vec::new(),
        };
        self.failure = Some(StageFailure {
            stage: self.state,
            kind: error.kind(),
            message: error.to_string(),
            failed_turns,
        });
        self.transition(JobState::Failed);
    }
}

/// Live progress of a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub state: JobState,
    pub turns_done: usize,
    pub turns_total: usize,
}

impl JobProgress {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            turns_done: 0,
            turns_total: 0,
        }
    }
}

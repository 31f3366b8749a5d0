//! Pipeline-wide error taxonomy.
//!
//! Each module keeps its own error enum; [`PipelineError`] wraps them so the
//! job coordinator can record a single value per failed stage, and
//! [`ErrorKind`] is the user-visible classification stored in job status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::AssemblyError;
use crate::backend::BackendError;
use crate::cache::CacheError;
use crate::content::ContentError;
use crate::script::ScriptError;
use crate::voice::VoiceError;

/// User-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad or empty source. Never retried.
    InvalidInput,
    /// Script generation produced degenerate output after bounded retries.
    SynthesisIncomplete,
    /// Rate limit, timeout or unavailable backend after retries and fallback.
    BackendTransient,
    /// The backend rejected the request outright (e.g. unknown voice).
    BackendFatal,
    /// A clip required for assembly is missing.
    AssemblyIncomplete,
    /// A cancellation request was observed.
    Cancelled,
    /// Cache or job store I/O failure.
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::SynthesisIncomplete => "SynthesisIncomplete",
            ErrorKind::BackendTransient => "BackendTransient",
            ErrorKind::BackendFatal => "BackendFatal",
            ErrorKind::AssemblyIncomplete => "AssemblyIncomplete",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Storage => "Storage",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any failure a pipeline stage can produce.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error("Speech synthesis failed for turns {0:?}")]
    TurnsFailed(Vec<usize>, ErrorKind),

    #[error("Job cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Content(e) => e.kind(),
            PipelineError::Script(e) => e.kind(),
            PipelineError::Backend(e) => e.kind(),
            PipelineError::Cache(_) => ErrorKind::Storage,
            PipelineError::Assembly(e) => e.kind(),
            PipelineError::Voice(_) => ErrorKind::BackendFatal,
            PipelineError::TurnsFailed(_, kind) => *kind,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

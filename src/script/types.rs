//! Script data model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Rendering mode of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum Style {
    /// Single narrator, near-verbatim ("plain audio").
    #[value(name = "narration")]
    Narration,
    /// Two hosts discussing the article ("notebook").
    #[value(name = "dialogue")]
    Dialogue,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Narration => "narration",
            Style::Dialogue => "dialogue",
        }
    }
}

/// Who speaks a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpeakerRole {
    Narrator,
    HostA,
    HostB,
}

impl SpeakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakerRole::Narrator => "narrator",
            SpeakerRole::HostA => "host_a",
            SpeakerRole::HostB => "host_b",
        }
    }

    /// Parse a role label as written by people or by the generator.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "narrator" | "n" => Some(SpeakerRole::Narrator),
            "hosta" | "a" | "host1" => Some(SpeakerRole::HostA),
            "hostb" | "b" | "host2" => Some(SpeakerRole::HostB),
            _ => None,
        }
    }

    /// The other dialogue host.
    pub fn other_host(&self) -> SpeakerRole {
        match self {
            SpeakerRole::HostA => SpeakerRole::HostB,
            _ => SpeakerRole::HostA,
        }
    }
}

impl std::fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attributed utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub script_id: String,
    pub index: usize,
    pub speaker_role: SpeakerRole,
    pub text: String,
    /// Same speaker keeps talking after the previous turn.
    #[serde(default)]
    pub continuation: bool,
}

/// Ordered turns for one (document, style) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub document_id: String,
    pub style: Style,
    /// Version of the producer (narration rules or generation capability).
    pub producer_version: String,
    pub turns: Vec<Turn>,
}

impl Script {
    /// Turn texts in order, separated by newlines.
    pub fn full_text(&self) -> String {
        self.turns
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether the speaker changes going into turn `index`.
    pub fn speaker_changes_at(&self, index: usize) -> bool {
        index > 0
            && self
                .turns
                .get(index)
                .zip(self.turns.get(index - 1))
                .is_some_and(|(cur, prev)| cur.speaker_role != prev.speaker_role)
    }
}

/// A turn proposed by the generation capability, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTurn {
    pub speaker: SpeakerRole,
    pub text: String,
    pub continuation: bool,
}

impl CandidateTurn {
    pub fn new(speaker: SpeakerRole, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            continuation: false,
        }
    }

    pub fn continuing(mut self) -> Self {
        self.continuation = true;
        self
    }
}

/// Errors reported by a script generation capability.
#[derive(Error, Debug, Clone)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generator request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid generator response: {0}")]
    InvalidResponse(String),
}

impl GeneratorError {
    /// Unusable output counts against the script, not the connection.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GeneratorError::InvalidResponse(_) => ErrorKind::SynthesisIncomplete,
            GeneratorError::Unavailable(_) | GeneratorError::RequestFailed(_) => {
                ErrorKind::BackendTransient
            }
        }
    }
}

/// Errors raised while producing a script.
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script incomplete for batch {batch}: {reason}")]
    Incomplete { batch: usize, reason: String },

    #[error("Script generation failed: {0}")]
    Generator(#[from] GeneratorError),

    #[error("Nothing to synthesize: document has no segments")]
    NoSegments,
}

impl ScriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScriptError::Incomplete { .. } => ErrorKind::SynthesisIncomplete,
            ScriptError::Generator(e) => e.kind(),
            ScriptError::NoSegments => ErrorKind::InvalidInput,
        }
    }
}

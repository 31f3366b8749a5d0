//! CLI argument definitions and parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::backend::BackendKind;
use crate::content::{ContentError, RawInput};
use crate::script::{SpeakerRole, Style};
use crate::voice::{VoiceBinding, VoiceError};

/// Turn blog posts into narrated or two-host audio.
#[derive(Parser, Debug)]
#[command(name = "blogcaster")]
#[command(about = "Turn blog posts into narrated or two-host audio")]
#[command(version)]
pub struct Args {
    /// Config file (default: ~/.blogcaster/config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a job and run it in the foreground
    Submit(SubmitArgs),

    /// Show the state of a job
    Status {
        /// Job id
        job_id: String,
    },

    /// Request cancellation of a running job
    Cancel {
        /// Job id
        job_id: String,
    },

    /// Re-run a failed or cancelled job from its first unfinished stage
    Resume {
        /// Job id
        job_id: String,
    },

    /// List jobs, newest first
    Jobs,

    /// List generated audio files, newest first
    List {
        /// Directory to list (default: configured output directory)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Check that a speech backend is reachable
    Health {
        /// Backend to probe
        #[arg(short, long, value_enum, default_value = "local")]
        backend: BackendKind,
    },
}

/// Arguments for `submit`.
#[derive(clap::Args, Debug, Clone)]
pub struct SubmitArgs {
    /// Article text
    #[arg(short, long)]
    pub text: Option<String>,

    /// Article file (plain text, Markdown or HTML)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Encoding of --file: utf-8, utf-16, utf-16le or utf-16be
    #[arg(long, default_value = "utf-8")]
    pub encoding: String,

    /// Use --file even when --text is also given
    #[arg(long)]
    pub use_file: bool,

    /// Article URL
    #[arg(long, conflicts_with_all = ["text", "file"])]
    pub url: Option<String>,

    /// Rendering style
    #[arg(short, long, value_enum, default_value = "narration")]
    pub style: Style,

    /// Speech backend
    #[arg(short, long, value_enum, default_value = "local")]
    pub backend: BackendKind,

    /// Backend to use when the primary one keeps failing
    #[arg(long, value_enum)]
    pub fallback: Option<BackendKind>,

    /// Voice for a speaker role: "host_a=nova" (repeatable)
    #[arg(long = "voice", value_name = "ROLE=VOICE")]
    pub voices: Vec<String>,

    /// Directory for the finished audio
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Speech speed multiplier passed to the backend
    #[arg(long)]
    pub speed: Option<f32>,

    /// Concurrent speech requests per job
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Errors that can occur when reading the submitted input.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Content(#[from] ContentError),
}

impl SubmitArgs {
    /// Build the raw input from text, file and URL flags.
    pub fn raw_input(&self) -> Result<RawInput, InputError> {
        if let Some(url) = &self.url {
            return Ok(RawInput::Url(url.clone()));
        }

        let file = match &self.file {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|source| InputError::Read {
                    path: path.clone(),
                    source,
                })?;
                Some(RawInput::File {
                    bytes,
                    encoding: self.encoding.clone(),
                    name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                })
            }
            None => None,
        };

        Ok(RawInput::choose(self.text.clone(), file, self.use_file)?)
    }

    /// Voice overrides from the repeated `--voice` flags.
    pub fn voice_binding(&self) -> Result<VoiceBinding, VoiceAssignmentError> {
        self.voices.iter().try_fold(VoiceBinding::new(), |binding, raw| {
            let assignment = VoiceAssignment::parse(raw)?;
            Ok(binding.bind(assignment.role, assignment.voice_id)?)
        })
    }
}

/// Parsed `role=voice` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceAssignment {
    pub role: SpeakerRole,
    pub voice_id: String,
}

/// Errors that can occur when parsing a voice assignment.
#[derive(Error, Debug)]
pub enum VoiceAssignmentError {
    #[error("Invalid format: {0}. Expected 'role=voice'")]
    InvalidFormat(String),

    #[error("Unknown speaker role: {0} (expected narrator, host_a or host_b)")]
    UnknownRole(String),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}

impl VoiceAssignment {
    /// Parse a voice assignment from "role=voice" format.
    ///
    /// # Examples
    /// ```
    /// use blogcaster::cli::VoiceAssignment;
    /// let assignment = VoiceAssignment::parse("host_a=nova").unwrap();
    /// assert_eq!(assignment.voice_id, "nova");
    /// ```
    pub fn parse(input: &str) -> Result<Self, VoiceAssignmentError> {
        let Some((role, voice)) = input.split_once('=') else {
            return Err(VoiceAssignmentError::InvalidFormat(
                "Missing '=' separator".to_string(),
            ));
        };

        let role_label = role.trim();
        let role = SpeakerRole::parse(role_label)
            .ok_or_else(|| VoiceAssignmentError::UnknownRole(role_label.to_string()))?;

        let voice_id = voice.trim();
        if voice_id.is_empty() {
            return Err(VoiceAssignmentError::InvalidFormat(
                "Voice cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            role,
            voice_id: voice_id.to_string(),
        })
    }
}

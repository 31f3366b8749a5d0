//! Backend request/response types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Which speech-synthesis provider to use.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
pub enum BackendKind {
    /// Model server running on this machine.
    #[default]
    #[value(name = "local")]
    Local,

    /// Hosted speech API.
    #[value(name = "cloud")]
    Cloud,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur when talking to a speech backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid voice: {0}")]
    InvalidVoice(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid audio returned: {0}")]
    InvalidAudio(String),

    #[error("Backend configuration error: {0}")]
    Configuration(String),
}

impl BackendError {
    /// Transient failures are retried with backoff; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::RateLimited { .. } | BackendError::Timeout(_) | BackendError::Unavailable(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_transient() {
            ErrorKind::BackendTransient
        } else {
            ErrorKind::BackendFatal
        }
    }
}

/// Health check response from a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

/// Request for speech synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(rename = "voice")]
    pub voice_id: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
}

fn default_speed() -> f32 {
    1.0
}

impl SynthesizeRequest {
    pub fn new(text: impl Into<String>, voice_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice_id: voice_id.into(),
            speed: 1.0,
        }
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }
}

/// Audio returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// WAV file bytes.
    pub bytes: Vec<u8>,
    pub duration_ms: u64,
    pub sample_rate: u32,
}

/// Connection settings for the local model server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocalBackendConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            timeout_secs: 300,
        }
    }
}

/// Connection settings for the hosted speech API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CloudBackendConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for CloudBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "tts-1".to_string(),
            api_key_env: "BLOGCASTER_CLOUD_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Settings for both backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    pub local: LocalBackendConfig,
    pub cloud: CloudBackendConfig,
    /// Speaking rate passed to the backend.
    pub speed: Option<f32>,
}

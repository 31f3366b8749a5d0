//! Speech-synthesis backends.
//!
//! The orchestrator only sees the [`SpeechBackend`] trait; the local model
//! server and the hosted API are two HTTP implementations of it.

mod client;
mod types;

pub use client::{HttpBackend, classify_status};
pub use types::{
    BackendError, BackendKind, BackendSettings, CloudBackendConfig, HealthResponse,
    LocalBackendConfig, SynthesizeRequest, SynthesizedAudio,
};

use async_trait::async_trait;

/// Trait for speech backend communication.
///
/// This abstracts the HTTP communication with the TTS servers,
/// allowing for mock implementations in tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Which provider this is.
    fn kind(&self) -> BackendKind;

    /// Settings that change the audio rendered for a given text and voice,
    /// such as model and speed. Part of the clip cache key.
    fn render_settings(&self) -> String;

    /// Check backend health status.
    async fn health(&self) -> Result<HealthResponse, BackendError>;

    /// Synthesize speech for one piece of text with one voice.
    ///
    /// # Returns
    /// WAV audio with its duration
    async fn synthesize(&self, request: &SynthesizeRequest) -> Result<SynthesizedAudio, BackendError>;
}

/// Create the HTTP backend for `kind`.
pub fn create_backend(kind: BackendKind, settings: &BackendSettings) -> Result<HttpBackend, BackendError> {
    match kind {
        BackendKind::Local => HttpBackend::local(settings),
        BackendKind::Cloud => HttpBackend::cloud(settings),
    }
}

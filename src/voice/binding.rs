//! Speaker-role to voice mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendKind;
use crate::script::{SpeakerRole, Style};

/// Errors that can occur while resolving voices.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoiceError {
    #[error("No voice bound for {0}")]
    Unbound(SpeakerRole),

    #[error("Invalid voice id: {0}")]
    InvalidId(String),
}

/// Which voice renders each speaker role, for one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceBinding {
    voices: BTreeMap<SpeakerRole, String>,
}

impl VoiceBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `role` to `voice_id`.
    pub fn bind(mut self, role: SpeakerRole, voice_id: impl Into<String>) -> Result<Self, VoiceError> {
        let voice_id = voice_id.into();
        Self::validate_id(&voice_id)?;
        self.voices.insert(role, voice_id);
        Ok(self)
    }

    /// Validate a voice id.
    fn validate_id(voice_id: &str) -> Result<(), VoiceError> {
        if voice_id.trim().is_empty() {
            return Err(VoiceError::InvalidId("Voice id cannot be empty".to_string()));
        }

        // Voice ids end up in request bodies and cache keys
        if voice_id.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(VoiceError::InvalidId(format!(
                "Voice id cannot contain whitespace: {voice_id:?}"
            )));
        }

        Ok(())
    }

    /// Voice for `role`.
    pub fn voice_for(&self, role: SpeakerRole) -> Result<&str, VoiceError> {
        self.voices
            .get(&role)
            .map(String::as_str)
            .ok_or(VoiceError::Unbound(role))
    }

    /// Roles a script of `style` needs.
    pub fn required_roles(style: Style) -> &'static [SpeakerRole] {
        match style {
            Style::Narration => &[SpeakerRole::Narrator],
            Style::Dialogue => &[SpeakerRole::HostA, SpeakerRole::HostB],
        }
    }

    /// Check that every role of `style` has a voice.
    pub fn validate_for(&self, style: Style) -> Result<(), VoiceError> {
        for role in Self::required_roles(style) {
            self.voice_for(*role)?;
        }
        Ok(())
    }

    /// Overlay `overrides` on top of this binding.
    pub fn merged(&self, overrides: &VoiceBinding) -> VoiceBinding {
        let mut voices = self.voices.clone();
        voices.extend(overrides.voices.iter().map(|(r, v)| (*r, v.clone())));
        VoiceBinding { voices }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpeakerRole, &str)> {
        self.voices.iter().map(|(r, v)| (*r, v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

/// Default bindings per backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultVoices {
    pub local: VoiceBinding,
    pub cloud: VoiceBinding,
}

impl Default for DefaultVoices {
    fn default() -> Self {
        // CMU ARCTIC speakers on the local model server, stock voices in the cloud.
        let local = [
            (SpeakerRole::Narrator, "slt"),
            (SpeakerRole::HostA, "slt"),
            (SpeakerRole::HostB, "bdl"),
        ];
        let cloud = [
            (SpeakerRole::Narrator, "alloy"),
            (SpeakerRole::HostA, "nova"),
            (SpeakerRole::HostB, "onyx"),
        ];
        Self {
            local: VoiceBinding {
                voices: local.iter().map(|(r, v)| (*r, v.to_string())).collect(),
            },
            cloud: VoiceBinding {
                voices: cloud.iter().map(|(r, v)| (*r, v.to_string())).collect(),
            },
        }
    }
}

impl DefaultVoices {
    pub fn for_backend(&self, kind: BackendKind) -> &VoiceBinding {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Cloud => &self.cloud,
        }
    }

    /// Effective binding for a job: backend defaults overlaid with the
    /// caller's choices, checked against the roles `style` needs.
    pub fn resolve(
        &self,
        kind: BackendKind,
        overrides: &VoiceBinding,
        style: Style,
    ) -> Result<VoiceBinding, VoiceError> {
        let binding = self.for_backend(kind).merged(overrides);
        binding.validate_for(style)?;
        Ok(binding)
    }
}

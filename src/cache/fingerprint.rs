//! Deterministic cache keys for each pipeline stage.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::backend::BackendKind;
use crate::script::Style;

/// SHA-256 over a stage's inputs and configuration, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    fn of(stage: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(stage.as_bytes());
        for part in parts {
            // Length prefix keeps ("ab", "c") and ("a", "bc") apart.
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Normalized document, keyed by content hash and origin.
    pub fn document(source_hash: &str, origin: Option<&str>) -> Self {
        Self::of("document", &[source_hash, origin.unwrap_or("")])
    }

    /// Script for a document in a style, produced by a given producer version.
    pub fn script(source_hash: &str, style: Style, producer_version: &str) -> Self {
        Self::of("script", &[source_hash, style.as_str(), producer_version])
    }

    /// Synthesized audio for one turn, rendered with the given backend
    /// settings.
    pub fn clip(text: &str, backend: BackendKind, voice_id: &str, settings: &str) -> Self {
        Self::of("clip", &[text, backend.as_str(), voice_id, settings])
    }

    /// Wrap an existing hex digest, e.g. a cache file stem.
    pub(crate) fn from_hex(hex: &str) -> Self {
        Self(hex.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex characters, used as a readable identifier.
    pub fn short(&self) -> String {
        self.0.chars().take(16).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

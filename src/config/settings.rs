//! Pipeline configuration file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::audio::AssemblerConfig;
use crate::backend::BackendSettings;
use crate::cache::CacheConfig;
use crate::content::ContentConfig;
use crate::engine::TtsConfig;
use crate::script::{GeneratorConfig, ScriptConfig};
use crate::voice::DefaultVoices;

const APP_DIR: &str = ".blogcaster";
const CONFIG_FILE: &str = "config.json";

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not find home directory")]
    NoHomeDir,

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the pipeline can be tuned with. Every field has a default,
/// so a config file only needs the values it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Cache and job records live here.
    pub data_dir: PathBuf,
    /// Finished audio files are written here.
    pub output_dir: PathBuf,
    /// Jobs allowed to run at the same time in one process.
    pub max_concurrent_jobs: usize,
    /// How often a running job checks for a persisted cancel request.
    pub cancel_poll_ms: u64,
    pub content: ContentConfig,
    pub script: ScriptConfig,
    pub generator: GeneratorConfig,
    pub tts: TtsConfig,
    pub audio: AssemblerConfig,
    pub cache: CacheConfig,
    pub backends: BackendSettings,
    pub voices: DefaultVoices,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: app_dir().unwrap_or_else(|_| PathBuf::from(APP_DIR)),
            output_dir: PathBuf::from("music"),
            max_concurrent_jobs: 2,
            cancel_poll_ms: 500,
            content: ContentConfig::default(),
            script: ScriptConfig::default(),
            generator: GeneratorConfig::default(),
            tts: TtsConfig::default(),
            audio: AssemblerConfig::default(),
            cache: CacheConfig::default(),
            backends: BackendSettings::default(),
            voices: DefaultVoices::default(),
        }
    }
}

/// `~/.blogcaster`.
pub fn app_dir() -> Result<PathBuf, ConfigError> {
    Ok(dirs::home_dir().ok_or(ConfigError::NoHomeDir)?.join(APP_DIR))
}

/// `~/.blogcaster/config.json`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dir()?.join(CONFIG_FILE))
}

impl PipelineConfig {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path()?,
        };

        let config = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        config.validate()?;
        Ok(config)
    }

    /// Write this configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tts.concurrency == 0 {
            return Err(ConfigError::Invalid("tts.concurrency must be at least 1".to_string()));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::Invalid("max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.content.max_segment_chars == 0 {
            return Err(ConfigError::Invalid("content.max_segment_chars must be positive".to_string()));
        }
        if self.audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio.sample_rate must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.script.coverage_threshold) {
            return Err(ConfigError::Invalid(
                "script.coverage_threshold must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }
}

//! Configuration loading.

mod settings;

pub use settings::{ConfigError, PipelineConfig, app_dir, default_config_path};

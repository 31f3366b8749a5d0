//! blogcaster: turn written articles into narrated or two-host audio.
//!
//! An article goes through five stages: normalization into a clean
//! document, segmentation, script synthesis (single narrator or a
//! two-host dialogue), speech synthesis per turn, and assembly into one
//! audio file. Every intermediate is cached by content fingerprint, and
//! jobs record their progress so a failed or cancelled run can resume.

pub mod audio;
pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod content;
pub mod engine;
pub mod error;
pub mod job;
pub mod script;
pub mod voice;

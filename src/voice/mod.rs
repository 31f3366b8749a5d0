//! Voice assignment.
//!
//! Maps the speaker roles of a script to concrete voice ids for the selected
//! backend, starting from per-backend defaults and applying job overrides.

mod binding;

pub use binding::{DefaultVoices, VoiceBinding, VoiceError};

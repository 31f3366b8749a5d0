//! Pipeline cache.
//!
//! Content-addressed storage for documents, scripts and per-turn audio,
//! keyed by stage fingerprints so re-runs reuse finished work.

mod fingerprint;
mod store;

pub use fingerprint::Fingerprint;
pub use store::{CacheConfig, CacheError, CacheStats, Namespace, PipelineCache};

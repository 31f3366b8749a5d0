//! Audio assembly.
//!
//! Decodes per-turn clips, places them on one timeline with pauses and
//! cross-fades, and writes the final WAV plus a boundaries sidecar.

mod assembler;
pub mod wav;

pub use assembler::{
    Artifact, Assembler, AssemblerConfig, AssemblyError, OutputFile, TurnBoundary, list_outputs,
    output_path, sanitize_filename,
};

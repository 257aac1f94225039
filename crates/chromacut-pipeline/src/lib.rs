//! chromacut-pipeline: pure chroma-key matting pipeline.
//!
//! Turns an RGBA raster shot against a solid backdrop into a cutout with a
//! clean alpha matte. This crate has zero I/O dependencies: it takes
//! decoded pixels and parameters, and returns pixels.
//!
//! The work is split into two tiers so interactive tuning stays cheap:
//!
//! - **Heavy**: [`sample`] the key color and [`classify`] every pixel,
//!   producing a [`CachedBase`].
//! - **Light**: run the refinement stages ([`morph`], [`feather`],
//!   [`edge`], [`decontaminate`], [`cleanup`], [`supersample`]) on a copy
//!   of that base.
//!
//! [`process`] runs both tiers back to back.

pub mod classify;
pub mod cleanup;
pub mod decontaminate;
pub mod diagnostics;
pub mod edge;
pub mod feather;
pub mod morph;
pub mod pipeline;
pub mod raster;
pub mod sample;
pub mod supersample;
pub mod types;

pub use diagnostics::{Clock, PipelineDiagnostics, WebClock};
pub use pipeline::{
    CachedBase, Cancellation, NeverCancel, RunOutput, Stage, heavy_fingerprint, key, refine,
    run_heavy, run_light, source_digest,
};
pub use raster::AlphaCounts;
pub use types::{
    ChangeClass, ChromaColor, ChromaMode, ChromaPreset, GrayImage, MorphOp, ParameterSet,
    PipelineError, ProcessResult, RgbaImage,
};

/// Run the full pipeline on `source`.
///
/// Out-of-range parameters are clamped, never rejected. The output has the
/// same dimensions as the input.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] for a zero-area source.
pub fn process(source: &RgbaImage, params: &ParameterSet) -> Result<ProcessResult, PipelineError> {
    let output = run_heavy(source, params, &NeverCancel, &WebClock)?;
    Ok(ProcessResult {
        raster: output.raster,
        used_chroma: output.used_chroma,
    })
}

/// Like [`process`], but over a raw `width * height * 4` RGBA buffer.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] or
/// [`PipelineError::BufferLength`] for a malformed buffer.
pub fn process_raw(
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    params: &ParameterSet,
) -> Result<ProcessResult, PipelineError> {
    let source = raster::from_raw(width, height, pixels)?;
    process(&source, params)
}

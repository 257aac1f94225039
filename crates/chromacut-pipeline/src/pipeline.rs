//! Two-tier pipeline runner.
//!
//! The heavy tier samples the key color and classifies every pixel, which
//! yields a [`CachedBase`]. The light tier starts from that base and runs
//! the refinement stages in a fixed order:
//!
//! ```text
//! Morph -> Choke -> Feather -> EdgePrecision -> Decontaminate -> Cleanup -> Supersample
//! ```
//!
//! Stages whose parameters disable them are skipped. Between stages the
//! runner polls a [`Cancellation`] and bails out with
//! [`PipelineError::Cancelled`] once a newer request supersedes this one.

use std::hash::{Hash, Hasher};

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use tracing::{debug, trace};

use crate::diagnostics::{
    Clock, PipelineDiagnostics, PipelineSummary, StageDiagnostics, StageMetrics,
};
use crate::raster::{self, AlphaCounts};
use crate::types::{ChangeClass, ChromaColor, ParameterSet, PipelineError};
use crate::{classify, cleanup, decontaminate, edge, feather, morph, sample, supersample};

/// Every stage, heavy and light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Resolve the key color.
    Sample,
    /// Per-pixel chroma classification.
    Classify,
    /// General morphology.
    Morph,
    /// Signed choke.
    Choke,
    /// Alpha feathering.
    Feather,
    /// Corner, median, contrast and softening passes.
    EdgePrecision,
    /// Edge color decontamination.
    Decontaminate,
    /// Small-island removal.
    Cleanup,
    /// Supersampled anti-aliasing.
    Supersample,
}

impl Stage {
    /// Stages that produce the cached base.
    pub const HEAVY: [Self; 2] = [Self::Sample, Self::Classify];

    /// Refinement stages, in execution order.
    pub const REFINE: [Self; 7] = [
        Self::Morph,
        Self::Choke,
        Self::Feather,
        Self::EdgePrecision,
        Self::Decontaminate,
        Self::Cleanup,
        Self::Supersample,
    ];

    /// Human-readable name.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sample => "Sample",
            Self::Classify => "Classify",
            Self::Morph => "Morph",
            Self::Choke => "Choke",
            Self::Feather => "Feather",
            Self::EdgePrecision => "Edge Precision",
            Self::Decontaminate => "Decontaminate",
            Self::Cleanup => "Cleanup",
            Self::Supersample => "Supersample",
        }
    }

    /// Whether this stage does anything under (clamped) `params`.
    #[must_use]
    pub fn is_enabled(self, params: &ParameterSet) -> bool {
        match self {
            Self::Sample | Self::Classify => true,
            Self::Morph => params.morph_iterations > 0,
            Self::Choke => morph::choke_passes(params.edge_choke).is_some(),
            Self::Feather => params.feather_radius > 0,
            Self::EdgePrecision => !edge::EdgePlan::from_params(params).is_noop(),
            Self::Decontaminate => params.decontamination_strength > 0.0,
            Self::Cleanup => cleanup::min_cluster_size(params) > 1,
            Self::Supersample => params.ssaa_quality > 0,
        }
    }

    /// Run one refinement stage in place.
    fn refine(self, image: &mut RgbaImage, params: &ParameterSet) -> Option<StageMetrics> {
        if !self.is_enabled(params) {
            return None;
        }
        let metrics = match self {
            Self::Sample | Self::Classify => return None,
            Self::Morph => {
                morph::morph(image, params.morph_op, params.morph_iterations);
                StageMetrics::Morph {
                    op: params.morph_op,
                    iterations: params.morph_iterations.min(morph::MAX_MORPH_ITERATIONS),
                }
            }
            Self::Choke => {
                let (op, iterations) = morph::choke_passes(params.edge_choke)?;
                morph::morph(image, op, iterations);
                StageMetrics::Choke {
                    amount: params.edge_choke,
                    op,
                    iterations,
                }
            }
            Self::Feather => {
                let method = feather::FeatherMethod::for_radius(params.feather_radius)?;
                feather::feather(image, params.feather_radius);
                StageMetrics::Feather {
                    radius: params.feather_radius,
                    method,
                }
            }
            Self::EdgePrecision => StageMetrics::EdgePrecision {
                plan: edge::apply_edge_precision(image, params),
            },
            Self::Decontaminate => StageMetrics::Decontaminate {
                strength: params.decontamination_strength,
                touched: decontaminate::decontaminate(image, params.decontamination_strength),
            },
            Self::Cleanup => {
                let min_cluster_size = cleanup::min_cluster_size(params);
                StageMetrics::Cleanup {
                    min_cluster_size,
                    stats: cleanup::remove_small_clusters(image, min_cluster_size),
                }
            }
            Self::Supersample => {
                *image = supersample::supersample(image, params.ssaa_quality);
                StageMetrics::Supersample {
                    quality: params.ssaa_quality,
                    factor: supersample::scale_factor(params.ssaa_quality),
                }
            }
        };
        Some(metrics)
    }
}

/// Cooperative cancellation, polled between stages.
pub trait Cancellation {
    /// True once the run should stop.
    fn is_cancelled(&self) -> bool;
}

/// A [`Cancellation`] that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

fn checkpoint(cancel: &impl Cancellation, next: Stage) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        debug!(stage = next.label(), "run cancelled before stage");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

/// Digest of a raster's dimensions and bytes.
#[must_use]
pub fn source_digest(source: &RgbaImage) -> u64 {
    let mut hasher = SipHasher13::new();
    source.dimensions().hash(&mut hasher);
    source.as_raw().hash(&mut hasher);
    hasher.finish()
}

/// Identity of a keyed base: the source digest plus the heavy parameters
/// (tolerance and chroma mode) after clamping.
#[must_use]
pub fn heavy_fingerprint(source_digest: u64, params: &ParameterSet) -> u64 {
    let params = params.clamped();
    let mut hasher = SipHasher13::new();
    source_digest.hash(&mut hasher);
    params.tolerance.to_bits().hash(&mut hasher);
    params.chroma.hash(&mut hasher);
    hasher.finish()
}

/// Output of the heavy tier: the keyed raster and the color it was keyed
/// against.
#[derive(Debug, Clone)]
pub struct CachedBase {
    keyed: RgbaImage,
    chroma: ChromaColor,
    fingerprint: u64,
}

impl CachedBase {
    /// The classified raster, before any refinement.
    #[must_use]
    pub const fn keyed(&self) -> &RgbaImage {
        &self.keyed
    }

    /// The key color used.
    #[must_use]
    pub const fn chroma(&self) -> ChromaColor {
        self.chroma
    }

    /// See [`heavy_fingerprint`].
    #[must_use]
    pub const fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// `(width, height)` of the keyed raster.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.keyed.dimensions()
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Refined raster.
    pub raster: RgbaImage,
    /// Key color used.
    pub used_chroma: ChromaColor,
    /// The fresh base, present only for heavy runs.
    pub base: Option<CachedBase>,
    /// Per-stage diagnostics.
    pub diagnostics: PipelineDiagnostics,
}

fn timed<C: Clock, T>(
    clock: &C,
    stage: Stage,
    stages: &mut Vec<StageDiagnostics>,
    f: impl FnOnce() -> (T, StageMetrics),
) -> T {
    let start = clock.now();
    let (value, metrics) = f();
    let duration = clock.elapsed(&start);
    trace!(stage = stage.label(), ?duration, "stage complete");
    stages.push(StageDiagnostics {
        stage,
        duration,
        metrics,
    });
    value
}

fn key_into<C: Clock>(
    source: &RgbaImage,
    params: &ParameterSet,
    cancel: &impl Cancellation,
    clock: &C,
    stages: &mut Vec<StageDiagnostics>,
) -> Result<CachedBase, PipelineError> {
    raster::validate(source)?;

    checkpoint(cancel, Stage::Sample)?;
    let chroma = timed(clock, Stage::Sample, stages, || {
        let chroma = sample::resolve_chroma(params.chroma, source);
        let explicit = params.chroma.explicit().is_some();
        (chroma, StageMetrics::Sample { chroma, explicit })
    });

    checkpoint(cancel, Stage::Classify)?;
    let keyed = timed(clock, Stage::Classify, stages, || {
        let mut keyed = source.clone();
        classify::key_alpha(&mut keyed, chroma, params.tolerance);
        let alpha = AlphaCounts::of(&keyed);
        (
            keyed,
            StageMetrics::Classify {
                tolerance: params.tolerance,
                alpha,
            },
        )
    });

    Ok(CachedBase {
        keyed,
        chroma,
        fingerprint: heavy_fingerprint(source_digest(source), params),
    })
}

fn refine_into<C: Clock>(
    base: &CachedBase,
    params: &ParameterSet,
    cancel: &impl Cancellation,
    clock: &C,
    stages: &mut Vec<StageDiagnostics>,
) -> Result<RgbaImage, PipelineError> {
    let mut image = base.keyed.clone();
    for stage in Stage::REFINE {
        if !stage.is_enabled(params) {
            continue;
        }
        checkpoint(cancel, stage)?;
        let start = clock.now();
        if let Some(metrics) = stage.refine(&mut image, params) {
            let duration = clock.elapsed(&start);
            trace!(stage = stage.label(), ?duration, "stage complete");
            stages.push(StageDiagnostics {
                stage,
                duration,
                metrics,
            });
        }
    }
    Ok(image)
}

fn finish(
    path: ChangeClass,
    raster: RgbaImage,
    chroma: ChromaColor,
    base: Option<CachedBase>,
    stages: Vec<StageDiagnostics>,
    total_duration: std::time::Duration,
) -> RunOutput {
    let (image_width, image_height) = raster.dimensions();
    let summary = PipelineSummary {
        image_width,
        image_height,
        pixel_count: u64::from(image_width) * u64::from(image_height),
        used_chroma: chroma,
        alpha: AlphaCounts::of(&raster),
    };
    debug!(
        %path,
        width = image_width,
        height = image_height,
        stages = stages.len(),
        ?total_duration,
        "pipeline run complete"
    );
    RunOutput {
        raster,
        used_chroma: chroma,
        base,
        diagnostics: PipelineDiagnostics {
            path,
            stages,
            total_duration,
            summary,
        },
    }
}

/// Key `source` against the color `params` selects.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] for a zero-area source.
pub fn key(source: &RgbaImage, params: &ParameterSet) -> Result<CachedBase, PipelineError> {
    let params = params.clamped();
    key_into(
        source,
        &params,
        &NeverCancel,
        &crate::diagnostics::WebClock,
        &mut Vec::new(),
    )
}

/// Run the refinement stages on a cached base.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if `cancel` fires between stages.
pub fn refine(
    base: &CachedBase,
    params: &ParameterSet,
    cancel: &impl Cancellation,
) -> Result<RgbaImage, PipelineError> {
    let params = params.clamped();
    refine_into(
        base,
        &params,
        cancel,
        &crate::diagnostics::WebClock,
        &mut Vec::new(),
    )
}

/// Heavy tier: sample, classify, then refine.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] for a zero-area source, or
/// [`PipelineError::Cancelled`] if `cancel` fires between stages.
pub fn run_heavy<C: Clock>(
    source: &RgbaImage,
    params: &ParameterSet,
    cancel: &impl Cancellation,
    clock: &C,
) -> Result<RunOutput, PipelineError> {
    let params = params.clamped();
    let start = clock.now();
    let mut stages = Vec::new();
    let base = key_into(source, &params, cancel, clock, &mut stages)?;
    let raster = refine_into(&base, &params, cancel, clock, &mut stages)?;
    let chroma = base.chroma;
    Ok(finish(
        ChangeClass::Heavy,
        raster,
        chroma,
        Some(base),
        stages,
        clock.elapsed(&start),
    ))
}

/// Light tier: refine an existing base.
///
/// # Errors
///
/// Returns [`PipelineError::Cancelled`] if `cancel` fires between stages.
pub fn run_light<C: Clock>(
    base: &CachedBase,
    params: &ParameterSet,
    cancel: &impl Cancellation,
    clock: &C,
) -> Result<RunOutput, PipelineError> {
    let params = params.clamped();
    let start = clock.now();
    let mut stages = Vec::new();
    let raster = refine_into(base, &params, cancel, clock, &mut stages)?;
    Ok(finish(
        ChangeClass::Light,
        raster,
        base.chroma,
        None,
        stages,
        clock.elapsed(&start),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use image::Rgba;

    use super::*;
    use crate::diagnostics::WebClock;
    use crate::types::{ChromaMode, ChromaPreset};

    /// Magenta canvas with a red square in the middle.
    fn scene() -> RgbaImage {
        RgbaImage::from_fn(40, 40, |x, y| {
            if (10..30).contains(&x) && (10..30).contains(&y) {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([255, 0, 255, 255])
            }
        })
    }

    /// Fires after a fixed number of polls.
    struct CancelAfter(Cell<u32>);

    impl Cancellation for CancelAfter {
        fn is_cancelled(&self) -> bool {
            let left = self.0.get();
            if left == 0 {
                return true;
            }
            self.0.set(left - 1);
            false
        }
    }

    #[test]
    fn refine_order_is_fixed() {
        assert_eq!(Stage::REFINE[0], Stage::Morph);
        assert_eq!(Stage::REFINE[6], Stage::Supersample);
    }

    #[test]
    fn default_params_enable_only_heavy_stages() {
        let params = ParameterSet::default();
        for stage in Stage::REFINE {
            assert!(!stage.is_enabled(&params), "{stage:?}");
        }
        for stage in Stage::HEAVY {
            assert!(stage.is_enabled(&params));
        }
    }

    #[test]
    fn heavy_run_keys_background() {
        let out = run_heavy(&scene(), &ParameterSet::default(), &NeverCancel, &WebClock).unwrap();
        assert_eq!(out.used_chroma, ChromaColor::MAGENTA);
        assert_eq!(out.raster.get_pixel(0, 0)[3], 0);
        assert_eq!(*out.raster.get_pixel(20, 20), Rgba([255, 0, 0, 255]));
        assert!(out.base.is_some());
        let names: Vec<_> = out.diagnostics.stages.iter().map(|s| s.stage).collect();
        assert_eq!(names, vec![Stage::Sample, Stage::Classify]);
    }

    #[test]
    fn light_run_matches_heavy_output() {
        let params = ParameterSet {
            feather_radius: 2,
            decontamination_strength: 5.0,
            ..ParameterSet::default()
        };
        let heavy = run_heavy(&scene(), &params, &NeverCancel, &WebClock).unwrap();
        let base = heavy.base.unwrap();
        let light = run_light(&base, &params, &NeverCancel, &WebClock).unwrap();
        assert_eq!(light.raster, heavy.raster);
        assert!(light.base.is_none());
        assert_eq!(light.diagnostics.path, ChangeClass::Light);
    }

    #[test]
    fn cancellation_between_stages() {
        let params = ParameterSet {
            feather_radius: 2,
            ..ParameterSet::default()
        };
        // Sample and Classify pass, Feather is refused.
        let cancel = CancelAfter(Cell::new(2));
        let err = run_heavy(&scene(), &params, &cancel, &WebClock).unwrap_err();
        assert_eq!(err, PipelineError::Cancelled);
    }

    #[test]
    fn invalid_geometry_is_reported() {
        let err = key(&RgbaImage::new(0, 3), &ParameterSet::default()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidGeometry { .. }));
    }

    #[test]
    fn fingerprint_tracks_heavy_params_only() {
        let digest = source_digest(&scene());
        let params = ParameterSet::default();
        let light_change = ParameterSet {
            feather_radius: 9,
            ..params.clone()
        };
        let heavy_change = ParameterSet {
            chroma: ChromaMode::Named(ChromaPreset::Green),
            ..params.clone()
        };
        assert_eq!(
            heavy_fingerprint(digest, &params),
            heavy_fingerprint(digest, &light_change)
        );
        assert_ne!(
            heavy_fingerprint(digest, &params),
            heavy_fingerprint(digest, &heavy_change)
        );
        assert_ne!(digest, source_digest(&RgbaImage::new(40, 40)));
    }

    #[test]
    fn base_fingerprint_matches_helper() {
        let params = ParameterSet::default();
        let base = key(&scene(), &params).unwrap();
        assert_eq!(
            base.fingerprint(),
            heavy_fingerprint(source_digest(&scene()), &params)
        );
    }

    #[test]
    fn refine_does_not_touch_base() {
        let base = key(&scene(), &ParameterSet::default()).unwrap();
        let before = base.keyed().clone();
        let params = ParameterSet {
            feather_radius: 3,
            edge_choke: 2.0,
            ..ParameterSet::default()
        };
        let _ = refine(&base, &params, &NeverCancel).unwrap();
        assert_eq!(base.keyed(), &before);
    }
}

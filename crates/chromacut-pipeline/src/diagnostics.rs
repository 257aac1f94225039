//! Pipeline diagnostics: timing and per-stage metrics.
//!
//! Every run through [`run_heavy`](crate::pipeline::run_heavy) or
//! [`run_light`](crate::pipeline::run_light) collects these alongside the
//! output raster. Stages that are disabled by the current parameters are
//! skipped and do not appear in [`PipelineDiagnostics::stages`].
//!
//! Timestamps come from a [`Clock`], so callers choose the time source.
//! [`WebClock`] uses the `web-time` crate, which is `performance.now()` on
//! WASM and [`std::time::Instant`] on native.
//!
//! Durations are serialized as fractional seconds (`f64`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cleanup::CleanupStats;
use crate::edge::EdgePlan;
use crate::feather::FeatherMethod;
use crate::pipeline::Stage;
use crate::raster::AlphaCounts;
use crate::types::{ChangeClass, ChromaColor, MorphOp};

/// Serde support for `std::time::Duration` as fractional seconds.
pub mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    ///
    /// # Errors
    ///
    /// Fails on negative, non-finite, or out-of-range values.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Opaque timestamp.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] backed by [`web_time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WebClock;

impl Clock for WebClock {
    type Instant = web_time::Instant;

    fn now(&self) -> web_time::Instant {
        web_time::Instant::now()
    }

    fn elapsed(&self, since: &web_time::Instant) -> Duration {
        since.elapsed()
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Which tier ran: heavy starts from the source, light from the
    /// cached keyed base.
    pub path: ChangeClass,
    /// Executed stages, in order.
    pub stages: Vec<StageDiagnostics>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary of the output.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Which stage this was.
    pub stage: Stage,
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Key color resolution.
    Sample {
        /// Color that will be keyed.
        chroma: ChromaColor,
        /// True when the color came from the parameters rather than
        /// detection.
        explicit: bool,
    },
    /// Chroma classification.
    Classify {
        /// Tolerance used.
        tolerance: f32,
        /// Alpha buckets after keying.
        alpha: AlphaCounts,
    },
    /// General morphology.
    Morph {
        /// Direction.
        op: MorphOp,
        /// Passes applied.
        iterations: u32,
    },
    /// Signed choke.
    Choke {
        /// Requested amount.
        amount: f32,
        /// Direction chosen from the sign.
        op: MorphOp,
        /// Passes applied.
        iterations: u32,
    },
    /// Feathering.
    Feather {
        /// Radius in pixels.
        radius: u32,
        /// Blur used for that radius.
        method: FeatherMethod,
    },
    /// Edge precision.
    EdgePrecision {
        /// Resolved sub-pass settings.
        plan: EdgePlan,
    },
    /// Color decontamination.
    Decontaminate {
        /// Strength used.
        strength: f32,
        /// Pixels whose color was adjusted.
        touched: u64,
    },
    /// Artifact cleanup.
    Cleanup {
        /// Smallest component that survives.
        min_cluster_size: u32,
        /// Component statistics.
        stats: CleanupStats,
    },
    /// Supersampling.
    Supersample {
        /// Quality level.
        quality: u32,
        /// Scale factor for that level.
        factor: f32,
    },
}

/// High-level summary of the output raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Width in pixels.
    pub image_width: u32,
    /// Height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Key color used.
    pub used_chroma: ChromaColor,
    /// Alpha buckets of the output.
    pub alpha: AlphaCounts,
}

impl PipelineDiagnostics {
    /// Duration of `stage`, if it ran.
    #[must_use]
    pub fn stage_duration(&self, stage: Stage) -> Option<Duration> {
        self.stages
            .iter()
            .find(|d| d.stage == stage)
            .map(|d| d.duration)
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Path: {}  |  Chroma: {}",
            self.path, self.summary.used_chroma
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<20} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for diag in &self.stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let name = diag.stage.label();
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<20} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        let alpha = &self.summary.alpha;
        lines.push(String::new());
        lines.push(format!(
            "Transparent: {}  |  Partial: {}  |  Opaque: {}",
            alpha.transparent, alpha.partial, alpha.opaque,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
pub fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Sample { chroma, explicit } => {
            let source = if *explicit { "explicit" } else { "detected" };
            format!("{chroma} ({source})")
        }
        StageMetrics::Classify { tolerance, alpha } => format!(
            "tol={tolerance:.1} transparent={} partial={} opaque={}",
            alpha.transparent, alpha.partial, alpha.opaque,
        ),
        StageMetrics::Morph { op, iterations } => format!("{op} x{iterations}"),
        StageMetrics::Choke {
            amount,
            op,
            iterations,
        } => format!("amount={amount:.1} -> {op} x{iterations}"),
        StageMetrics::Feather { radius, method } => format!("r={radius} {method:?}"),
        StageMetrics::EdgePrecision { plan } => format!(
            "corners={} (thr={:.0}) median_r={} contrast={:.0} soften_r={}",
            plan.corner_passes,
            plan.corner_threshold,
            plan.median_radius,
            plan.contrast,
            plan.soften_radius,
        ),
        StageMetrics::Decontaminate { strength, touched } => {
            format!("strength={strength:.1} touched={touched}")
        }
        StageMetrics::Cleanup {
            min_cluster_size,
            stats,
        } => format!(
            "min={min_cluster_size} stride={} components={} removed={} ({} px)",
            stats.stride, stats.components, stats.removed_components, stats.removed_pixels,
        ),
        StageMetrics::Supersample { quality, factor } => {
            format!("level={quality} factor={factor:.1}x")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_diagnostics() -> PipelineDiagnostics {
        PipelineDiagnostics {
            path: ChangeClass::Heavy,
            stages: vec![
                StageDiagnostics {
                    stage: Stage::Sample,
                    duration: Duration::from_micros(250),
                    metrics: StageMetrics::Sample {
                        chroma: ChromaColor::MAGENTA,
                        explicit: false,
                    },
                },
                StageDiagnostics {
                    stage: Stage::Feather,
                    duration: Duration::from_millis(3),
                    metrics: StageMetrics::Feather {
                        radius: 4,
                        method: FeatherMethod::Gaussian,
                    },
                },
            ],
            total_duration: Duration::from_millis(4),
            summary: PipelineSummary {
                image_width: 10,
                image_height: 5,
                pixel_count: 50,
                used_chroma: ChromaColor::MAGENTA,
                alpha: AlphaCounts {
                    transparent: 20,
                    partial: 5,
                    opaque: 25,
                },
            },
        }
    }

    #[test]
    fn report_lists_stages_and_summary() {
        let report = sample_diagnostics().report();
        assert!(report.contains("Image: 10x5 (50 pixels)"));
        assert!(report.contains("Path: heavy"));
        assert!(report.contains("#ff00ff (detected)"));
        assert!(report.contains("r=4 Gaussian"));
        assert!(report.contains("Transparent: 20  |  Partial: 5  |  Opaque: 25"));
    }

    #[test]
    fn stage_duration_lookup() {
        let diag = sample_diagnostics();
        assert_eq!(
            diag.stage_duration(Stage::Feather),
            Some(Duration::from_millis(3))
        );
        assert_eq!(diag.stage_duration(Stage::Cleanup), None);
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample_diagnostics()).unwrap();
        let total = json["total_duration"].as_f64().unwrap();
        assert!((total - 0.004).abs() < 1e-9);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.stages.len(), 2);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut json = serde_json::to_value(sample_diagnostics()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<PipelineDiagnostics>(json).is_err());
    }

    #[test]
    fn web_clock_is_monotonic() {
        let clock = WebClock;
        let start = clock.now();
        assert!(clock.elapsed(&start) < Duration::from_secs(60));
    }
}

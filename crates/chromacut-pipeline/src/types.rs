//! Shared types for the chromacut matting pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference alpha
/// planes without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbaImage`, the raster type every stage reads and writes.
pub use image::RgbaImage;

/// A background color to be keyed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChromaColor {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl ChromaColor {
    /// Fallback key color when nothing better is known.
    pub const MAGENTA: Self = Self::new(255, 0, 255);

    /// Create a new chroma color.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Sum of the three channels (0 to 765).
    #[must_use]
    pub const fn brightness(self) -> u16 {
        self.r as u16 + self.g as u16 + self.b as u16
    }

    /// Euclidean RGB distance from this color to `(r, g, b)`.
    #[must_use]
    pub fn distance_to(self, r: u8, g: u8, b: u8) -> f32 {
        let dr = f32::from(r) - f32::from(self.r);
        let dg = f32::from(g) - f32::from(self.g);
        let db = f32::from(b) - f32::from(self.b);
        dr.mul_add(dr, dg.mul_add(dg, db * db)).sqrt()
    }

    /// Parse `#rrggbb` or `rrggbb`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the string is not six
    /// hex digits (with an optional leading `#`).
    pub fn from_hex(hex: &str) -> Result<Self, PipelineError> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PipelineError::InvalidConfig(format!(
                "expected a color like #00ff00, got {hex:?}"
            )));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16).map_err(|e| {
                PipelineError::InvalidConfig(format!("invalid hex color {hex:?}: {e}"))
            })
        };
        Ok(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl fmt::Display for ChromaColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Named backdrop colors offered as one-click presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChromaPreset {
    /// Pure green screen.
    Green,
    /// Pure blue screen.
    Blue,
    /// Magenta, the default backdrop for generated artwork.
    Magenta,
    /// Cyan.
    Cyan,
}

impl ChromaPreset {
    /// Every preset, in display order.
    pub const ALL: [Self; 4] = [Self::Green, Self::Blue, Self::Magenta, Self::Cyan];

    /// The RGB value of this preset.
    #[must_use]
    pub const fn color(self) -> ChromaColor {
        match self {
            Self::Green => ChromaColor::new(0, 255, 0),
            Self::Blue => ChromaColor::new(0, 0, 255),
            Self::Magenta => ChromaColor::MAGENTA,
            Self::Cyan => ChromaColor::new(0, 255, 255),
        }
    }

    /// Lowercase name, as accepted by [`ChromaMode::from_str`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Magenta => "magenta",
            Self::Cyan => "cyan",
        }
    }
}

impl fmt::Display for ChromaPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the key color is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChromaMode {
    /// Estimate the backdrop from the image borders.
    #[default]
    Auto,
    /// A color the user picked explicitly.
    Custom(ChromaColor),
    /// One of the [`ChromaPreset`] colors.
    Named(ChromaPreset),
}

impl ChromaMode {
    /// The explicitly supplied color, or `None` in [`ChromaMode::Auto`].
    #[must_use]
    pub const fn explicit(self) -> Option<ChromaColor> {
        match self {
            Self::Auto => None,
            Self::Custom(color) => Some(color),
            Self::Named(preset) => Some(preset.color()),
        }
    }
}

impl FromStr for ChromaMode {
    type Err = PipelineError;

    /// Accepts `auto`, a preset name, or a hex color.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "auto" {
            return Ok(Self::Auto);
        }
        if let Some(preset) = ChromaPreset::ALL.into_iter().find(|p| p.name() == lowered) {
            return Ok(Self::Named(preset));
        }
        ChromaColor::from_hex(&lowered).map(Self::Custom)
    }
}

impl fmt::Display for ChromaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Custom(color) => color.fmt(f),
            Self::Named(preset) => preset.fmt(f),
        }
    }
}

/// Direction of the general-purpose morphology pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphOp {
    /// Grow the opaque region.
    #[default]
    Dilate,
    /// Shrink the opaque region.
    Erode,
}

impl fmt::Display for MorphOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dilate => f.write_str("dilate"),
            Self::Erode => f.write_str("erode"),
        }
    }
}

/// How expensive it is to bring the output up to date after a parameter
/// edit.
///
/// Ordered so that `Light < Heavy`; combining two pending changes keeps
/// the larger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChangeClass {
    /// Only downstream refinement knobs changed; the cached keyed base
    /// can be reused.
    Light,
    /// The chroma or tolerance changed; the source must be re-sampled and
    /// re-classified.
    Heavy,
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Heavy => f.write_str("heavy"),
        }
    }
}

/// Every tunable knob of the matting pipeline.
///
/// Values outside their documented range are never rejected: every stage
/// works on [`ParameterSet::clamped`], and deserialization fills missing
/// fields from [`Default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    /// RGB distance at or below which a pixel is fully transparent (0 to 150).
    pub tolerance: f32,
    /// Direction of the general morphology pass.
    pub morph_op: MorphOp,
    /// Number of morphology passes (0 to 10).
    pub morph_iterations: u32,
    /// Alpha blur radius in pixels (0 to 64).
    pub feather_radius: u32,
    /// Signed choke: positive grows, negative shrinks (-10 to 10).
    pub edge_choke: f32,
    /// Strength of gradient-gated corner smoothing (0 to 20).
    pub corner_smoothing: f32,
    /// Gradient gate for corner smoothing (0 to 50).
    pub corner_refinement_threshold: f32,
    /// Median smoothing of semi-transparent edges (0 to 20).
    pub edge_smoothing: f32,
    /// Minimum island size kept by artifact cleanup (0 to 30).
    pub border_cleanup: u32,
    /// Artifact cleanup level; each step removes islands up to four
    /// pixels larger (0 to 5).
    pub artifact_cleanup_size: u32,
    /// Alpha contrast around the 128 pivot (0 to 200).
    pub contrast_enhancement: f32,
    /// Box-average radius for edge softening (0 to 50).
    pub edge_radius: f32,
    /// Matte-edge blend radius (0 to 50).
    pub matte_edge: f32,
    /// Color decontamination strength (0 to 20).
    pub decontamination_strength: f32,
    /// Supersampling level (0 to 4, 0 disables).
    pub ssaa_quality: u32,
    /// How the key color is chosen.
    pub chroma: ChromaMode,
}

impl ParameterSet {
    /// Default tolerance.
    pub const DEFAULT_TOLERANCE: f32 = 40.0;
    /// Default morphology operator.
    pub const DEFAULT_MORPH_OP: MorphOp = MorphOp::Dilate;
    /// Default morphology iteration count.
    pub const DEFAULT_MORPH_ITERATIONS: u32 = 0;
    /// Default feather radius.
    pub const DEFAULT_FEATHER_RADIUS: u32 = 0;
    /// Default edge choke.
    pub const DEFAULT_EDGE_CHOKE: f32 = 0.0;
    /// Default corner smoothing.
    pub const DEFAULT_CORNER_SMOOTHING: f32 = 0.0;
    /// Default corner refinement threshold.
    pub const DEFAULT_CORNER_REFINEMENT_THRESHOLD: f32 = 15.0;
    /// Default edge smoothing.
    pub const DEFAULT_EDGE_SMOOTHING: f32 = 0.0;
    /// Default border cleanup.
    pub const DEFAULT_BORDER_CLEANUP: u32 = 0;
    /// Default artifact cleanup size.
    pub const DEFAULT_ARTIFACT_CLEANUP_SIZE: u32 = 0;
    /// Default contrast enhancement.
    pub const DEFAULT_CONTRAST_ENHANCEMENT: f32 = 0.0;
    /// Default edge radius.
    pub const DEFAULT_EDGE_RADIUS: f32 = 0.0;
    /// Default matte edge.
    pub const DEFAULT_MATTE_EDGE: f32 = 0.0;
    /// Default decontamination strength.
    pub const DEFAULT_DECONTAMINATION_STRENGTH: f32 = 0.0;
    /// Default supersampling level.
    pub const DEFAULT_SSAA_QUALITY: u32 = 0;

    /// Upper bound of `tolerance`.
    pub const MAX_TOLERANCE: f32 = 150.0;
    /// Upper bound of `morph_iterations`.
    pub const MAX_MORPH_ITERATIONS: u32 = 10;
    /// Upper bound of `feather_radius`.
    pub const MAX_FEATHER_RADIUS: u32 = 64;
    /// Magnitude bound of `edge_choke`.
    pub const MAX_EDGE_CHOKE: f32 = 10.0;
    /// Upper bound of `corner_smoothing`.
    pub const MAX_CORNER_SMOOTHING: f32 = 20.0;
    /// Upper bound of `corner_refinement_threshold`.
    pub const MAX_CORNER_REFINEMENT_THRESHOLD: f32 = 50.0;
    /// Upper bound of `edge_smoothing`.
    pub const MAX_EDGE_SMOOTHING: f32 = 20.0;
    /// Upper bound of `border_cleanup`.
    pub const MAX_BORDER_CLEANUP: u32 = 30;
    /// Upper bound of `artifact_cleanup_size`.
    pub const MAX_ARTIFACT_CLEANUP_SIZE: u32 = 5;
    /// Upper bound of `contrast_enhancement`.
    pub const MAX_CONTRAST_ENHANCEMENT: f32 = 200.0;
    /// Upper bound of `edge_radius`.
    pub const MAX_EDGE_RADIUS: f32 = 50.0;
    /// Upper bound of `matte_edge`.
    pub const MAX_MATTE_EDGE: f32 = 50.0;
    /// Upper bound of `decontamination_strength`.
    pub const MAX_DECONTAMINATION_STRENGTH: f32 = 20.0;
    /// Upper bound of `ssaa_quality`.
    pub const MAX_SSAA_QUALITY: u32 = 4;

    /// A copy with every numeric field clamped to its documented range.
    ///
    /// `NaN` clamps to the lower bound.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            tolerance: clamp_f32(self.tolerance, 0.0, Self::MAX_TOLERANCE),
            morph_op: self.morph_op,
            morph_iterations: self.morph_iterations.min(Self::MAX_MORPH_ITERATIONS),
            feather_radius: self.feather_radius.min(Self::MAX_FEATHER_RADIUS),
            edge_choke: clamp_f32(self.edge_choke, -Self::MAX_EDGE_CHOKE, Self::MAX_EDGE_CHOKE),
            corner_smoothing: clamp_f32(self.corner_smoothing, 0.0, Self::MAX_CORNER_SMOOTHING),
            corner_refinement_threshold: clamp_f32(
                self.corner_refinement_threshold,
                0.0,
                Self::MAX_CORNER_REFINEMENT_THRESHOLD,
            ),
            edge_smoothing: clamp_f32(self.edge_smoothing, 0.0, Self::MAX_EDGE_SMOOTHING),
            border_cleanup: self.border_cleanup.min(Self::MAX_BORDER_CLEANUP),
            artifact_cleanup_size: self
                .artifact_cleanup_size
                .min(Self::MAX_ARTIFACT_CLEANUP_SIZE),
            contrast_enhancement: clamp_f32(
                self.contrast_enhancement,
                0.0,
                Self::MAX_CONTRAST_ENHANCEMENT,
            ),
            edge_radius: clamp_f32(self.edge_radius, 0.0, Self::MAX_EDGE_RADIUS),
            matte_edge: clamp_f32(self.matte_edge, 0.0, Self::MAX_MATTE_EDGE),
            decontamination_strength: clamp_f32(
                self.decontamination_strength,
                0.0,
                Self::MAX_DECONTAMINATION_STRENGTH,
            ),
            ssaa_quality: self.ssaa_quality.min(Self::MAX_SSAA_QUALITY),
            chroma: self.chroma,
        }
    }

    /// Classify the edit from `self` to `next`.
    ///
    /// Both sides are compared after clamping, so two inputs that clamp
    /// to the same values are no change at all. Returns `None` when
    /// nothing observable changed.
    #[must_use]
    pub fn change_class(&self, next: &Self) -> Option<ChangeClass> {
        let before = self.clamped();
        let after = next.clamped();
        if before.tolerance.to_bits() != after.tolerance.to_bits() || before.chroma != after.chroma
        {
            Some(ChangeClass::Heavy)
        } else if before == after {
            None
        } else {
            Some(ChangeClass::Light)
        }
    }
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            tolerance: Self::DEFAULT_TOLERANCE,
            morph_op: Self::DEFAULT_MORPH_OP,
            morph_iterations: Self::DEFAULT_MORPH_ITERATIONS,
            feather_radius: Self::DEFAULT_FEATHER_RADIUS,
            edge_choke: Self::DEFAULT_EDGE_CHOKE,
            corner_smoothing: Self::DEFAULT_CORNER_SMOOTHING,
            corner_refinement_threshold: Self::DEFAULT_CORNER_REFINEMENT_THRESHOLD,
            edge_smoothing: Self::DEFAULT_EDGE_SMOOTHING,
            border_cleanup: Self::DEFAULT_BORDER_CLEANUP,
            artifact_cleanup_size: Self::DEFAULT_ARTIFACT_CLEANUP_SIZE,
            contrast_enhancement: Self::DEFAULT_CONTRAST_ENHANCEMENT,
            edge_radius: Self::DEFAULT_EDGE_RADIUS,
            matte_edge: Self::DEFAULT_MATTE_EDGE,
            decontamination_strength: Self::DEFAULT_DECONTAMINATION_STRENGTH,
            ssaa_quality: Self::DEFAULT_SSAA_QUALITY,
            chroma: ChromaMode::Auto,
        }
    }
}

fn clamp_f32(value: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        min
    } else {
        value.clamp(min, max)
    }
}

/// Output of [`crate::process`].
#[derive(Debug, Clone)]
pub struct ProcessResult {
    /// The cutout, same dimensions as the source.
    pub raster: RgbaImage,
    /// The key color that was actually used.
    pub used_chroma: ChromaColor,
}

/// Errors that can occur during pipeline processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum PipelineError {
    /// The raster has zero width or height.
    #[error("raster must be non-empty, got {width}x{height}")]
    InvalidGeometry {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },

    /// A raw pixel buffer does not hold `width * height * 4` bytes.
    #[error("pixel buffer holds {actual} bytes, expected {expected}")]
    BufferLength {
        /// Required byte count.
        expected: u64,
        /// Supplied byte count.
        actual: u64,
    },

    /// A replacement raster does not match the source dimensions.
    #[error("raster dimensions mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Expected `(width, height)`.
        expected: (u32, u32),
        /// Supplied `(width, height)`.
        actual: (u32, u32),
    },

    /// Configuration could not be parsed.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The run was abandoned between stages because a newer request
    /// superseded it.
    #[error("pipeline run was cancelled")]
    Cancelled,
}

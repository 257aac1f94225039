//! Edge precision refinements on the semi-transparent band.
//!
//! Four independent passes, each a no-op at its zero setting and each
//! touching only partial-alpha pixels:
//!
//! 1. [`refine_corners`] blends low-gradient pixels toward their
//!    4-neighbour mean, leaving sharp corners alone.
//! 2. [`smooth_edges`] replaces edge alpha with a local median
//!    ([`imageproc::filter::median_filter`]).
//! 3. [`enhance_contrast`] stretches edge alpha away from the 128 pivot.
//! 4. [`soften_edges`] replaces edge alpha with a local box mean
//!    ([`imageproc::filter::box_filter`]).

use image::{GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::raster::{alpha_plane, is_partial, to_channel, write_alpha};
use crate::types::ParameterSet;

/// Floor of the corner gradient threshold.
pub const MIN_CORNER_THRESHOLD: f32 = 30.0;

/// Cap on corner refinement passes.
pub const MAX_CORNER_PASSES: u32 = 4;

/// Cap on the median radius.
pub const MAX_MEDIAN_RADIUS: u32 = 5;

/// Cap on the softening radius.
pub const MAX_SOFTEN_RADIUS: u32 = 10;

/// Alpha range eligible for corner refinement.
const CORNER_BAND: std::ops::RangeInclusive<u8> = 11..=244;

/// Weight kept by a refined pixel; the rest comes from its neighbours.
const CORNER_SELF_WEIGHT: f32 = 0.7;

/// Resolved per-pass settings for one refinement run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgePlan {
    /// Corner refinement passes (0 disables).
    pub corner_passes: u32,
    /// Gradient threshold for corner refinement.
    pub corner_threshold: f32,
    /// Median radius (0 disables).
    pub median_radius: u32,
    /// Contrast amount (0 disables).
    pub contrast: f32,
    /// Box-softening radius (0 disables).
    pub soften_radius: u32,
}

impl EdgePlan {
    /// Derive the plan from (already clamped) parameters.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_params(params: &ParameterSet) -> Self {
        let corner_passes = if params.corner_smoothing > 0.0 {
            ((params.corner_smoothing / 5.0).ceil() as u32).clamp(1, MAX_CORNER_PASSES)
        } else {
            0
        };
        Self {
            corner_passes,
            corner_threshold: corner_threshold(params.corner_refinement_threshold),
            median_radius: median_radius(params.edge_smoothing),
            contrast: params.contrast_enhancement.max(0.0),
            soften_radius: soften_radius(params.edge_radius, params.matte_edge),
        }
    }

    /// True when no pass would do anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.corner_passes == 0
            && self.median_radius == 0
            && self.contrast <= 0.0
            && self.soften_radius == 0
    }
}

/// Gradient threshold for a corner refinement setting.
#[must_use]
pub fn corner_threshold(setting: f32) -> f32 {
    (setting * 2.0).max(MIN_CORNER_THRESHOLD)
}

/// Median radius for an edge smoothing setting.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn median_radius(edge_smoothing: f32) -> u32 {
    if !edge_smoothing.is_finite() || edge_smoothing <= 0.0 {
        return 0;
    }
    ((edge_smoothing / 5.0).round() as u32).min(MAX_MEDIAN_RADIUS)
}

/// Softening radius for the larger of the two softening settings.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn soften_radius(edge_radius: f32, matte_edge: f32) -> u32 {
    let setting = edge_radius.max(matte_edge);
    if !setting.is_finite() || setting <= 0.0 {
        return 0;
    }
    ((setting / 2.0).round() as u32).min(MAX_SOFTEN_RADIUS)
}

fn corner_pass(alpha: &GrayImage, threshold: f32) -> GrayImage {
    let (width, height) = alpha.dimensions();
    let at = |x: u32, y: u32| f32::from(alpha.get_pixel(x, y)[0]);
    let mut out = alpha.clone();
    for (x, y, px) in alpha.enumerate_pixels() {
        let a = px[0];
        if !CORNER_BAND.contains(&a) {
            continue;
        }
        // Missing neighbours at the border stand in with the pixel itself.
        let left = if x > 0 { at(x - 1, y) } else { at(x, y) };
        let right = if x + 1 < width { at(x + 1, y) } else { at(x, y) };
        let up = if y > 0 { at(x, y - 1) } else { at(x, y) };
        let down = if y + 1 < height { at(x, y + 1) } else { at(x, y) };

        let gx = (right - left).abs();
        let gy = (down - up).abs();
        if gx > threshold || gy > threshold {
            continue;
        }
        let mean = (left + right + up + down) / 4.0;
        let blended = CORNER_SELF_WEIGHT.mul_add(f32::from(a), (1.0 - CORNER_SELF_WEIGHT) * mean);
        out.put_pixel(x, y, Luma([to_channel(blended)]));
    }
    out
}

/// Copy `filtered` into `alpha` at partial pixels only.
fn replace_partial(alpha: &mut GrayImage, filtered: &GrayImage) {
    for (dst, src) in alpha.pixels_mut().zip(filtered.pixels()) {
        if is_partial(dst[0]) {
            *dst = *src;
        }
    }
}

/// Corner refinement on an alpha plane.
#[must_use = "returns the refined plane"]
pub fn refine_corners_plane(alpha: &GrayImage, threshold: f32, passes: u32) -> GrayImage {
    let mut current = alpha.clone();
    for _ in 0..passes.min(MAX_CORNER_PASSES) {
        current = corner_pass(&current, threshold);
    }
    current
}

/// Blend low-gradient edge pixels toward their neighbours.
pub fn refine_corners(image: &mut RgbaImage, threshold_setting: f32, passes: u32) {
    if passes == 0 {
        return;
    }
    let refined = refine_corners_plane(
        &alpha_plane(image),
        corner_threshold(threshold_setting),
        passes,
    );
    write_alpha(image, &refined);
}

/// Median-smooth edge alpha.
pub fn smooth_edges(image: &mut RgbaImage, edge_smoothing: f32) {
    let radius = median_radius(edge_smoothing);
    if radius == 0 {
        return;
    }
    let mut alpha = alpha_plane(image);
    let median = imageproc::filter::median_filter(&alpha, radius, radius);
    replace_partial(&mut alpha, &median);
    write_alpha(image, &alpha);
}

/// Stretch edge alpha away from 128 by `1 + amount / 50`.
pub fn enhance_contrast(image: &mut RgbaImage, amount: f32) {
    if !amount.is_finite() || amount <= 0.0 {
        return;
    }
    let factor = 1.0 + amount / 50.0;
    for px in image.pixels_mut() {
        let a = px[3];
        if is_partial(a) {
            px[3] = to_channel((f32::from(a) - 128.0).mul_add(factor, 128.0));
        }
    }
}

/// Box-average edge alpha over the larger of the two radius settings.
pub fn soften_edges(image: &mut RgbaImage, edge_radius: f32, matte_edge: f32) {
    let radius = soften_radius(edge_radius, matte_edge);
    if radius == 0 {
        return;
    }
    let mut alpha = alpha_plane(image);
    let mean = imageproc::filter::box_filter(&alpha, radius, radius);
    replace_partial(&mut alpha, &mean);
    write_alpha(image, &alpha);
}

/// Run every edge precision pass that `params` enables, in order.
pub fn apply_edge_precision(image: &mut RgbaImage, params: &ParameterSet) -> EdgePlan {
    let plan = EdgePlan::from_params(params);
    refine_corners(image, params.corner_refinement_threshold, plan.corner_passes);
    smooth_edges(image, params.edge_smoothing);
    enhance_contrast(image, plan.contrast);
    soften_edges(image, params.edge_radius, params.matte_edge);
    plan
}

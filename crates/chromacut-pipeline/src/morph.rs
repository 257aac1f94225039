//! Alpha morphology on semi-transparent edges.
//!
//! Each pass replaces a partial pixel's alpha with the max (dilate) or min
//! (erode) over itself and its 4-neighbours. Fully transparent and fully
//! opaque pixels are never rewritten, so a hard binary matte passes through
//! unchanged and the cost scales with edge length rather than image area.

use image::{GrayImage, Luma, RgbaImage};

use crate::raster::{alpha_plane, is_partial, neighbors4, write_alpha};
use crate::types::MorphOp;

/// Cap on general morphology passes.
pub const MAX_MORPH_ITERATIONS: u32 = 10;

/// Cap on choke passes.
pub const MAX_CHOKE_ITERATIONS: u32 = 5;

/// One morphology pass over `alpha`, reading only the previous state.
#[must_use]
pub fn morph_step(alpha: &GrayImage, op: MorphOp) -> GrayImage {
    let (width, height) = alpha.dimensions();
    let mut out = alpha.clone();
    for (x, y, px) in alpha.enumerate_pixels() {
        let a = px[0];
        if !is_partial(a) {
            continue;
        }
        let v = neighbors4(x, y, width, height)
            .map(|(nx, ny)| alpha.get_pixel(nx, ny)[0])
            .fold(a, |acc, n| match op {
                MorphOp::Dilate => acc.max(n),
                MorphOp::Erode => acc.min(n),
            });
        out.put_pixel(x, y, Luma([v]));
    }
    out
}

/// Apply `iterations` passes of `op` (capped at [`MAX_MORPH_ITERATIONS`]).
pub fn morph(image: &mut RgbaImage, op: MorphOp, iterations: u32) {
    let iterations = iterations.min(MAX_MORPH_ITERATIONS);
    if iterations == 0 {
        return;
    }
    let mut alpha = alpha_plane(image);
    for _ in 0..iterations {
        alpha = morph_step(&alpha, op);
    }
    write_alpha(image, &alpha);
}

/// Number of passes and direction a signed choke amount maps to.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn choke_passes(amount: f32) -> Option<(MorphOp, u32)> {
    if !amount.is_finite() {
        return None;
    }
    let passes = (amount.abs().round() as u32).min(MAX_CHOKE_ITERATIONS);
    if passes == 0 {
        return None;
    }
    let op = if amount > 0.0 {
        MorphOp::Dilate
    } else {
        MorphOp::Erode
    };
    Some((op, passes))
}

/// Signed choke: positive grows, negative shrinks.
pub fn choke(image: &mut RgbaImage, amount: f32) {
    if let Some((op, passes)) = choke_passes(amount) {
        morph(image, op, passes);
    }
}

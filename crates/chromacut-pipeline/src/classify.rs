//! Per-pixel chroma classification.
//!
//! Distance from the key color decides alpha: at or under the tolerance the
//! pixel is keyed out, inside the soft band above it alpha ramps linearly,
//! and beyond the band the pixel keeps its alpha. Classification only ever
//! lowers alpha.

use image::RgbaImage;

use crate::raster::to_channel;
use crate::types::ChromaColor;

/// Width of the linear ramp above the tolerance, in RGB distance units.
pub const SOFT_BAND: f32 = 30.0;

/// Alpha for one pixel whose color is `distance` away from the key.
#[must_use]
pub fn keyed_alpha(distance: f32, tolerance: f32, alpha: u8) -> u8 {
    if distance <= tolerance {
        0
    } else if distance <= tolerance + SOFT_BAND {
        let ramp = (distance - tolerance) / SOFT_BAND;
        to_channel(ramp * f32::from(alpha)).min(alpha)
    } else {
        alpha
    }
}

/// Key `image` in place against `chroma`.
pub fn key_alpha(image: &mut RgbaImage, chroma: ChromaColor, tolerance: f32) {
    for px in image.pixels_mut() {
        let distance = chroma.distance_to(px[0], px[1], px[2]);
        px[3] = keyed_alpha(distance, tolerance, px[3]);
    }
}

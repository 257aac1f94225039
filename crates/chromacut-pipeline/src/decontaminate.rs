//! Color decontamination of edge pixels.
//!
//! Semi-transparent pixels below [`ALPHA_CEILING`] carry a tint of the
//! backdrop. Each is pulled toward its own channel mean (gray) by
//! `min(1, strength / 10 * (1 - alpha / 255))`, so the most transparent
//! pixels are desaturated the most. Alpha is never changed.

use image::RgbaImage;

use crate::raster::to_channel;

/// Pixels at or above this alpha are left alone.
pub const ALPHA_CEILING: u8 = 200;

/// Desaturation factor for one pixel, or `None` if it is out of range.
#[must_use]
pub fn blend_factor(alpha: u8, strength: f32) -> Option<f32> {
    if alpha == 0 || alpha >= ALPHA_CEILING || !strength.is_finite() || strength <= 0.0 {
        return None;
    }
    let scaled = strength / 10.0;
    Some((scaled * (1.0 - f32::from(alpha) / 255.0)).min(1.0))
}

/// Desaturate tinted edge pixels in place. Returns how many were touched.
pub fn decontaminate(image: &mut RgbaImage, strength: f32) -> u64 {
    let mut touched = 0;
    for px in image.pixels_mut() {
        let Some(factor) = blend_factor(px[3], strength) else {
            continue;
        };
        let gray = (f32::from(px[0]) + f32::from(px[1]) + f32::from(px[2])) / 3.0;
        for channel in &mut px.0[..3] {
            let v = f32::from(*channel);
            *channel = to_channel((gray - v).mul_add(factor, v));
        }
        touched += 1;
    }
    touched
}

//! Supersampled anti-aliasing of the final matte.
//!
//! The raster is upscaled, re-rendered with a light Gaussian at the higher
//! resolution, and downscaled back to the original size. Every step works
//! on premultiplied color, so the keyed-out backdrop still present under
//! alpha 0 cannot bleed into edge pixels and edge color keeps the hue and
//! brightness of the subject. Resampling residue below [`ALPHA_FLOOR`] is
//! cleared afterwards.

use image::RgbaImage;
use image::imageops::{self, FilterType};

use crate::raster::to_channel;

/// Resample filter used going up.
pub const UPSCALE_FILTER: FilterType = FilterType::CatmullRom;

/// Resample filter used coming back down.
pub const DOWNSCALE_FILTER: FilterType = FilterType::Lanczos3;

/// Alpha below this after the downscale is treated as fully transparent.
pub const ALPHA_FLOOR: u8 = 8;

/// Scale factor for a quality level. Level 0 disables supersampling.
#[must_use]
pub const fn scale_factor(quality: u32) -> f32 {
    match quality {
        0 => 1.0,
        1 => 1.5,
        2 => 2.0,
        3 => 3.0,
        _ => 4.0,
    }
}

/// Sigma of the re-render at `factor`.
#[must_use]
pub fn render_sigma(factor: f32) -> f32 {
    0.5 * factor
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn scaled(len: u32, factor: f32) -> u32 {
    ((len as f32 * factor).round() as u32).max(1)
}

fn premultiply(image: &mut RgbaImage) {
    for px in image.pixels_mut() {
        let a = f32::from(px[3]) / 255.0;
        for channel in &mut px.0[..3] {
            *channel = to_channel(f32::from(*channel) * a);
        }
    }
}

fn unpremultiply(image: &mut RgbaImage) {
    for px in image.pixels_mut() {
        let a = px[3];
        if a == 0 {
            continue;
        }
        let scale = 255.0 / f32::from(a);
        for channel in &mut px.0[..3] {
            *channel = to_channel(f32::from(*channel) * scale);
        }
    }
}

/// Supersample `image` at `quality`. Level 0 returns an identical copy.
#[must_use = "returns the anti-aliased raster"]
pub fn supersample(image: &RgbaImage, quality: u32) -> RgbaImage {
    if quality == 0 {
        return image.clone();
    }
    let factor = scale_factor(quality);
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let mut working = image.clone();
    premultiply(&mut working);

    let up = imageops::resize(
        &working,
        scaled(width, factor),
        scaled(height, factor),
        UPSCALE_FILTER,
    );
    let rendered = imageproc::filter::gaussian_blur_f32(&up, render_sigma(factor));

    let mut down = imageops::resize(&rendered, width, height, DOWNSCALE_FILTER);
    for px in down.pixels_mut() {
        if px[3] < ALPHA_FLOOR {
            px.0 = [0; 4];
            continue;
        }
        // Keep premultiplied color within its alpha after the resample ringing.
        let a = px[3];
        for channel in &mut px.0[..3] {
            *channel = (*channel).min(a);
        }
    }
    unpremultiply(&mut down);
    down
}

//! Raster construction, validation and alpha-plane access.
//!
//! Every stage works on an [`RgbaImage`]: 8-bit straight (non-premultiplied)
//! RGBA in row-major order. Stages that need to read a neighbourhood while
//! writing pull the alpha channel out into a [`GrayImage`] snapshot, compute
//! a new plane, and write it back with [`write_alpha`].

use image::{GrayImage, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Reject rasters with zero width or height.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] for a zero-area raster.
pub fn validate(image: &RgbaImage) -> Result<(), PipelineError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidGeometry { width, height });
    }
    Ok(())
}

/// Wrap a raw RGBA byte buffer as a raster.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidGeometry`] for zero dimensions, or
/// [`PipelineError::BufferLength`] when `pixels` is not exactly
/// `width * height * 4` bytes long.
pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<RgbaImage, PipelineError> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidGeometry { width, height });
    }
    let expected = u64::from(width) * u64::from(height) * 4;
    let actual = pixels.len() as u64;
    if actual != expected {
        return Err(PipelineError::BufferLength { expected, actual });
    }
    RgbaImage::from_raw(width, height, pixels)
        .ok_or(PipelineError::BufferLength { expected, actual })
}

/// Copy the alpha channel into its own single-channel plane.
#[must_use]
pub fn alpha_plane(image: &RgbaImage) -> GrayImage {
    let (width, height) = image.dimensions();
    GrayImage::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y)[3]]))
}

/// Overwrite the alpha channel of `image` from `alpha`.
///
/// Both must have the same dimensions; color channels are untouched.
pub fn write_alpha(image: &mut RgbaImage, alpha: &GrayImage) {
    debug_assert_eq!(image.dimensions(), alpha.dimensions());
    for (px, a) in image.pixels_mut().zip(alpha.pixels()) {
        px[3] = a[0];
    }
}

/// True for alpha strictly between fully transparent and fully opaque.
#[must_use]
pub const fn is_partial(alpha: u8) -> bool {
    alpha > 0 && alpha < u8::MAX
}

/// Round and saturate a floating-point channel value into `0..=255`.
///
/// `NaN` maps to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_channel(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// In-bounds 4-neighbours of `(x, y)` in a `width x height` grid.
pub(crate) fn neighbors4(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    let left = x.checked_sub(1).map(|nx| (nx, y));
    let right = (x + 1 < width).then(|| (x + 1, y));
    let up = y.checked_sub(1).map(|ny| (x, ny));
    let down = (y + 1 < height).then(|| (x, y + 1));
    [left, right, up, down].into_iter().flatten()
}

/// Alpha histogram collapsed to three buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlphaCounts {
    /// Pixels with alpha 0.
    pub transparent: u64,
    /// Pixels with alpha in `1..=254`.
    pub partial: u64,
    /// Pixels with alpha 255.
    pub opaque: u64,
}

impl AlphaCounts {
    /// Count the alpha buckets of `image`.
    #[must_use]
    pub fn of(image: &RgbaImage) -> Self {
        image.pixels().fold(Self::default(), |mut acc, px| {
            match px[3] {
                0 => acc.transparent += 1,
                u8::MAX => acc.opaque += 1,
                _ => acc.partial += 1,
            }
            acc
        })
    }

    /// Total number of pixels counted.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.transparent + self.partial + self.opaque
    }
}

//! Alpha feathering.
//!
//! Small radii use an exact separable Gaussian with `sigma = radius / 3`,
//! renormalized over the in-bounds taps so uniform regions stay uniform
//! right up to the border. Radii above [`BOX_THRESHOLD`] switch to
//! [`imageproc::filter::box_filter`], whose cost does not grow with the
//! radius and which replicates edge pixels past the border.

use image::{GrayImage, RgbaImage};

use crate::raster::{alpha_plane, to_channel, write_alpha};

/// Largest radius handled by the exact Gaussian.
pub const BOX_THRESHOLD: u32 = 15;

/// Cap on the feather radius.
pub const MAX_FEATHER_RADIUS: u32 = 64;

/// Which blur a given radius selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FeatherMethod {
    /// Exact separable Gaussian.
    Gaussian,
    /// Sliding-window box average.
    Box,
}

impl FeatherMethod {
    /// The method used for `radius`, or `None` when feathering is off.
    #[must_use]
    pub const fn for_radius(radius: u32) -> Option<Self> {
        match radius {
            0 => None,
            r if r <= BOX_THRESHOLD => Some(Self::Gaussian),
            _ => Some(Self::Box),
        }
    }
}

/// Normalized 1-D Gaussian weights for `radius`, length `2 * radius + 1`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_kernel(radius: u32) -> Vec<f32> {
    let sigma = (radius as f32 / 3.0).max(f32::EPSILON);
    let denom = 2.0 * sigma * sigma;
    let r = i64::from(radius);
    let mut kernel: Vec<f32> = (-r..=r)
        .map(|i| {
            let d = i as f32;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Blur `src` into `dst` with `kernel`, dropping out-of-range taps and
/// renormalizing by the weight that remained.
fn gaussian_line(src: &[f32], dst: &mut [f32], kernel: &[f32]) {
    let radius = kernel.len() / 2;
    let len = src.len();
    for (i, out) in dst.iter_mut().enumerate() {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(len - 1);
        let mut acc = 0.0;
        let mut weight = 0.0;
        for (j, &v) in src.iter().enumerate().take(hi + 1).skip(lo) {
            let w = kernel[j + radius - i];
            acc += v * w;
            weight += w;
        }
        *out = acc / weight;
    }
}

/// Run `line` over every row, then every column, of a `width x height`
/// plane stored row-major.
fn separable(
    plane: &mut [f32],
    width: usize,
    height: usize,
    mut line: impl FnMut(&[f32], &mut [f32]),
) {
    let mut row_out = vec![0.0; width];
    for row in plane.chunks_exact_mut(width) {
        line(row, &mut row_out);
        row.copy_from_slice(&row_out);
    }
    let mut column = vec![0.0; height];
    let mut column_out = vec![0.0; height];
    for x in 0..width {
        for (y, v) in column.iter_mut().enumerate() {
            *v = plane[y * width + x];
        }
        line(&column, &mut column_out);
        for (y, &v) in column_out.iter().enumerate() {
            plane[y * width + x] = v;
        }
    }
}

/// Blur an alpha plane with the method `radius` selects.
#[must_use]
pub fn feather_plane(alpha: &GrayImage, radius: u32) -> GrayImage {
    let radius = radius.min(MAX_FEATHER_RADIUS);
    let Some(method) = FeatherMethod::for_radius(radius) else {
        return alpha.clone();
    };
    let (width, height) = alpha.dimensions();
    if width == 0 || height == 0 {
        return alpha.clone();
    }
    if method == FeatherMethod::Box {
        return imageproc::filter::box_filter(alpha, radius, radius);
    }
    let mut plane: Vec<f32> = alpha.as_raw().iter().map(|&a| f32::from(a)).collect();
    let kernel = gaussian_kernel(radius);
    separable(
        &mut plane,
        width as usize,
        height as usize,
        |src, dst| gaussian_line(src, dst, &kernel),
    );
    let mut out = alpha.clone();
    for (dst, &v) in out.iter_mut().zip(&plane) {
        *dst = to_channel(v);
    }
    out
}

/// Feather the alpha channel of `image` in place.
pub fn feather(image: &mut RgbaImage, radius: u32) {
    if FeatherMethod::for_radius(radius.min(MAX_FEATHER_RADIUS)).is_none() {
        return;
    }
    let blurred = feather_plane(&alpha_plane(image), radius);
    write_alpha(image, &blurred);
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgba};

    use super::*;

    fn step_image() -> RgbaImage {
        RgbaImage::from_fn(40, 20, |x, _| Rgba([9, 9, 9, if x < 20 { 0 } else { 255 }]))
    }

    #[test]
    fn radius_zero_is_identity() {
        let img = step_image();
        let mut out = img.clone();
        feather(&mut out, 0);
        assert_eq!(out, img);
    }

    #[test]
    fn method_threshold() {
        assert_eq!(FeatherMethod::for_radius(0), None);
        assert_eq!(FeatherMethod::for_radius(15), Some(FeatherMethod::Gaussian));
        assert_eq!(FeatherMethod::for_radius(16), Some(FeatherMethod::Box));
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(6);
        assert_eq!(kernel.len(), 13);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!((kernel[0] - kernel[12]).abs() < 1e-7);
        assert!(kernel[6] > kernel[5]);
    }

    #[test]
    fn uniform_alpha_is_preserved_at_borders() {
        for radius in [3, 40] {
            let plane = GrayImage::from_pixel(30, 12, Luma([200]));
            let out = feather_plane(&plane, radius);
            assert!(out.pixels().all(|p| p[0] == 200), "radius {radius}");
        }
    }

    #[test]
    fn gaussian_softens_a_hard_step() {
        let mut img = step_image();
        feather(&mut img, 4);
        let left = img.get_pixel(19, 10)[3];
        let right = img.get_pixel(20, 10)[3];
        assert!(left > 0 && left < 128, "left {left}");
        assert!(right > 128 && right < 255, "right {right}");
        assert_eq!(img.get_pixel(0, 10)[3], 0);
        assert_eq!(img.get_pixel(39, 10)[3], 255);
        // Color channels are untouched.
        assert_eq!(img.get_pixel(19, 10)[0], 9);
    }

    #[test]
    fn box_blur_is_monotone_across_a_step() {
        let mut img = step_image();
        feather(&mut img, 20);
        let row: Vec<u8> = (0..40).map(|x| img.get_pixel(x, 5)[3]).collect();
        assert!(row.windows(2).all(|w| w[0] <= w[1]), "{row:?}");
        assert!(row[19] > 0 && row[20] < 255);
    }

    #[test]
    fn box_blur_averages_the_window() {
        let mut img = step_image();
        feather(&mut img, 20);
        // Window [0, 40] on a 40 wide step: 20 zeros, 21 samples at 255
        // with the last one replicated from the border.
        let mid = img.get_pixel(20, 10)[3];
        assert!((128..=133).contains(&mid), "mid {mid}");
        assert_eq!(img.get_pixel(20, 10)[0], 9);
    }
}

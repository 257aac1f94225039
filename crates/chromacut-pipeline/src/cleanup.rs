//! Artifact cleanup: drop small disconnected islands of visible pixels.
//!
//! Components are 4-connected over pixels with alpha above zero and are
//! explored breadth-first from a work queue. On very large rasters only
//! every `stride`-th row and column seeds a search; a component reached
//! from any seed is still measured in full, but islands that contain no
//! seed pixel survive.

use std::collections::VecDeque;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::ParameterSet;

/// Pixel count up to which every pixel is a seed.
pub const FULL_SCAN_LIMIT: u64 = 1_000_000;

/// Pixel count up to which every second pixel is a seed.
pub const HALF_SCAN_LIMIT: u64 = 4_000_000;

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Seed stride that was used.
    pub stride: u32,
    /// Components discovered.
    pub components: u64,
    /// Components cleared for being too small.
    pub removed_components: u64,
    /// Pixels cleared.
    pub removed_pixels: u64,
}

/// Smallest component size that survives for `params`.
///
/// The larger of `border_cleanup` and four times `artifact_cleanup_size`.
#[must_use]
pub fn min_cluster_size(params: &ParameterSet) -> u32 {
    params
        .border_cleanup
        .max(params.artifact_cleanup_size.saturating_mul(4))
}

/// Seed stride for a raster of `pixel_count` pixels.
#[must_use]
pub const fn stride_for(pixel_count: u64) -> u32 {
    if pixel_count <= FULL_SCAN_LIMIT {
        1
    } else if pixel_count <= HALF_SCAN_LIMIT {
        2
    } else {
        3
    }
}

/// Clear every component with fewer than `min_size` pixels.
///
/// A `min_size` of 0 or 1 can never remove anything and returns
/// immediately.
pub fn remove_small_clusters(image: &mut RgbaImage, min_size: u32) -> CleanupStats {
    let (width, height) = image.dimensions();
    let pixel_count = u64::from(width) * u64::from(height);
    let stride = stride_for(pixel_count);
    let mut stats = CleanupStats {
        stride,
        ..CleanupStats::default()
    };
    if min_size <= 1 || pixel_count == 0 {
        return stats;
    }

    let (w, h) = (width as usize, height as usize);
    let step = stride as usize;
    let min_size = min_size as usize;
    let mut visited = vec![false; w * h];
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for sy in (0..h).step_by(step) {
        for sx in (0..w).step_by(step) {
            let seed = sy * w + sx;
            if visited[seed] || alpha_at(image, w, seed) == 0 {
                continue;
            }
            visited[seed] = true;
            queue.push_back(seed);
            component.clear();

            // Each pixel enters the queue at most once, so the walk is
            // bounded by the raster size.
            while let Some(idx) = queue.pop_front() {
                component.push(idx);
                let (x, y) = (idx % w, idx / w);
                let mut visit = |n: usize| {
                    if !visited[n] && alpha_at(image, w, n) > 0 {
                        visited[n] = true;
                        queue.push_back(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < w {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < h {
                    visit(idx + w);
                }
            }

            stats.components += 1;
            if component.len() < min_size {
                for &idx in &component {
                    set_alpha(image, w, idx, 0);
                }
                stats.removed_components += 1;
                stats.removed_pixels += component.len() as u64;
            }
        }
    }

    debug!(
        stride,
        components = stats.components,
        removed = stats.removed_components,
        removed_pixels = stats.removed_pixels,
        "artifact cleanup"
    );
    stats
}

#[allow(clippy::cast_possible_truncation)]
fn alpha_at(image: &RgbaImage, width: usize, idx: usize) -> u8 {
    image.get_pixel((idx % width) as u32, (idx / width) as u32)[3]
}

#[allow(clippy::cast_possible_truncation)]
fn set_alpha(image: &mut RgbaImage, width: usize, idx: usize, alpha: u8) {
    image.get_pixel_mut((idx % width) as u32, (idx / width) as u32)[3] = alpha;
}

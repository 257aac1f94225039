//! Chroma detection: estimate the backdrop color from the image border.
//!
//! Eight candidate regions are probed in priority order: the four edge
//! midpoints first, then the four corners. Each probe averages a small box
//! clipped to the image. The first average whose brightness falls inside
//! [`MIN_BRIGHTNESS`]..=[`MAX_BRIGHTNESS`] wins; near-black and near-white
//! borders are usually vignettes or paper, not a backdrop.

use image::RgbaImage;
use tracing::{debug, warn};

use crate::types::{ChromaColor, ChromaMode};

/// Half-size of the probe box (a 5x5 box before clipping).
pub const BOX_RADIUS: u32 = 2;

/// Darkest acceptable candidate (sum of channels).
pub const MIN_BRIGHTNESS: u16 = 50;

/// Brightest acceptable candidate (sum of channels).
pub const MAX_BRIGHTNESS: u16 = 700;

/// Where a candidate box is centred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePoint {
    /// Middle of the top edge.
    TopCenter,
    /// Middle of the bottom edge.
    BottomCenter,
    /// Middle of the left edge.
    LeftCenter,
    /// Middle of the right edge.
    RightCenter,
    /// Top-left corner.
    TopLeft,
    /// Top-right corner.
    TopRight,
    /// Bottom-left corner.
    BottomLeft,
    /// Bottom-right corner.
    BottomRight,
}

impl SamplePoint {
    /// Probe order: edge midpoints before corners.
    pub const PRIORITY: [Self; 8] = [
        Self::TopCenter,
        Self::BottomCenter,
        Self::LeftCenter,
        Self::RightCenter,
        Self::TopLeft,
        Self::TopRight,
        Self::BottomLeft,
        Self::BottomRight,
    ];

    /// Pixel coordinate of the box centre in a `width x height` image.
    #[must_use]
    pub const fn position(self, width: u32, height: u32) -> (u32, u32) {
        let right = width.saturating_sub(1);
        let bottom = height.saturating_sub(1);
        match self {
            Self::TopCenter => (width / 2, 0),
            Self::BottomCenter => (width / 2, bottom),
            Self::LeftCenter => (0, height / 2),
            Self::RightCenter => (right, height / 2),
            Self::TopLeft => (0, 0),
            Self::TopRight => (right, 0),
            Self::BottomLeft => (0, bottom),
            Self::BottomRight => (right, bottom),
        }
    }
}

/// Why automatic detection produced nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SampleError {
    /// The raster has no pixels to read.
    #[error("cannot sample an empty raster")]
    Empty,
    /// Every candidate was too dark or too bright.
    #[error("no border region passed the brightness filter")]
    NoCandidate,
}

/// Average color of the box of half-size `radius` around `(cx, cy)`,
/// clipped to the image. `None` if the centre lies outside the image.
#[must_use]
pub fn sample_box(image: &RgbaImage, cx: u32, cy: u32, radius: u32) -> Option<ChromaColor> {
    let (width, height) = image.dimensions();
    if cx >= width || cy >= height {
        return None;
    }
    let x0 = cx.saturating_sub(radius);
    let y0 = cy.saturating_sub(radius);
    let x1 = cx.saturating_add(radius).min(width - 1);
    let y1 = cy.saturating_add(radius).min(height - 1);

    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let px = image.get_pixel(x, y);
            for (sum, &channel) in sums.iter_mut().zip(&px.0[..3]) {
                *sum += u64::from(channel);
            }
            count += 1;
        }
    }
    // count >= 1 since the centre is in bounds.
    let avg = |sum: u64| u8::try_from((sum + count / 2) / count).unwrap_or(u8::MAX);
    Some(ChromaColor::new(avg(sums[0]), avg(sums[1]), avg(sums[2])))
}

/// Estimate the backdrop color from the image border.
///
/// # Errors
///
/// Returns [`SampleError::Empty`] for a zero-area raster and
/// [`SampleError::NoCandidate`] when every probe fails the brightness
/// filter.
pub fn detect_chroma(image: &RgbaImage) -> Result<ChromaColor, SampleError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SampleError::Empty);
    }
    for point in SamplePoint::PRIORITY {
        let (cx, cy) = point.position(width, height);
        let Some(color) = sample_box(image, cx, cy, BOX_RADIUS) else {
            continue;
        };
        let brightness = color.brightness();
        if (MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&brightness) {
            debug!(?point, %color, brightness, "chroma candidate accepted");
            return Ok(color);
        }
        debug!(?point, %color, brightness, "chroma candidate rejected");
    }
    Err(SampleError::NoCandidate)
}

/// The key color for `mode`: the explicit color if one was given,
/// otherwise the detected one, falling back to magenta when detection
/// fails.
#[must_use]
pub fn resolve_chroma(mode: ChromaMode, image: &RgbaImage) -> ChromaColor {
    if let Some(color) = mode.explicit() {
        return color;
    }
    detect_chroma(image).unwrap_or_else(|e| {
        warn!(error = %e, fallback = %ChromaColor::MAGENTA, "chroma detection failed");
        ChromaColor::MAGENTA
    })
}

/// Eyedropper: the 3x3 average around `(x, y)`, or `None` outside the
/// image.
#[must_use]
pub fn pick_chroma(image: &RgbaImage, x: u32, y: u32) -> Option<ChromaColor> {
    sample_box(image, x, y, 1)
}

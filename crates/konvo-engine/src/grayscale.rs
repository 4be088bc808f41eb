//! RGBA-to-luminance preprocessing.
//!
//! Every run starts by collapsing its [`ImageBuffer`] into a
//! single-channel floating-point [`LuminanceBuffer`]. The convolution
//! loop samples only this buffer, never the original bytes.

use crate::types::{Dimensions, ImageBuffer};

/// Luminance weight of the red channel.
pub const RED_WEIGHT: f64 = 0.299;
/// Luminance weight of the green channel.
pub const GREEN_WEIGHT: f64 = 0.587;
/// Luminance weight of the blue channel.
pub const BLUE_WEIGHT: f64 = 0.114;

/// One `f32` luminance value per pixel, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct LuminanceBuffer {
    dimensions: Dimensions,
    values: Vec<f32>,
}

impl LuminanceBuffer {
    /// Dimensions of the source image.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// All luminance values in row-major order.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Luminance at `(x, y)`, with both coordinates clamped into the
    /// image. This is the edge-replication sampling policy: anything
    /// outside the image reads the nearest border pixel.
    #[must_use]
    pub fn sample_clamped(&self, x: i64, y: i64) -> f32 {
        let max_x = i64::from(self.dimensions.width) - 1;
        let max_y = i64::from(self.dimensions.height) - 1;
        let sx = u32::try_from(x.clamp(0, max_x)).unwrap_or_default();
        let sy = u32::try_from(y.clamp(0, max_y)).unwrap_or_default();
        self.values
            .get(self.dimensions.index(sx, sy))
            .copied()
            .unwrap_or_default()
    }
}

/// Luminance of a single RGB triple: `0.299*R + 0.587*G + 0.114*B`.
///
/// Evaluated in `f64` left to right and stored as `f32`, so results are
/// reproducible bit for bit.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::suboptimal_flops)]
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    (RED_WEIGHT * f64::from(r) + GREEN_WEIGHT * f64::from(g) + BLUE_WEIGHT * f64::from(b)) as f32
}

/// Convert an RGBA image into its luminance buffer. Alpha is ignored.
#[must_use = "returns the luminance buffer"]
pub fn to_luminance(image: &ImageBuffer) -> LuminanceBuffer {
    let values = image
        .pixels()
        .map(|px| luminance(px[0], px[1], px[2]))
        .collect();

    LuminanceBuffer {
        dimensions: image.dimensions(),
        values,
    }
}

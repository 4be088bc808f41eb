//! Caller-side result image assembled from progress events.
//!
//! [`ResultRaster`] plays the role of the result canvas: it starts fully
//! transparent and each [`Progress`] paints one opaque gray pixel, so a
//! partially finished run shows exactly the pixels processed so far.

use crate::protocol::Progress;
use crate::types::{Dimensions, RgbaImage};

/// RGBA image filled in pixel by pixel from a run's progress events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRaster {
    image: RgbaImage,
    processed: u64,
}

impl ResultRaster {
    /// A transparent raster of the given size.
    #[must_use]
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            image: RgbaImage::new(dimensions.width, dimensions.height),
            processed: 0,
        }
    }

    /// Paint one progress event: the value goes to R, G and B, alpha is
    /// set to 255.
    ///
    /// Returns `false` (and changes nothing) if the coordinate lies
    /// outside the raster.
    pub fn apply(&mut self, progress: &Progress) -> bool {
        let Some(pixel) = self.image.get_pixel_mut_checked(progress.x, progress.y) else {
            return false;
        };
        let v = progress.value;
        pixel.0 = [v, v, v, u8::MAX];
        self.processed += 1;
        true
    }

    /// Number of progress events applied since creation.
    #[must_use]
    pub const fn processed(&self) -> u64 {
        self.processed
    }

    /// Total pixel count.
    #[must_use]
    pub fn total(&self) -> u64 {
        u64::from(self.image.width()) * u64::from(self.image.height())
    }

    /// Fraction of pixels painted, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.processed.min(total) as f64 / total as f64,
        }
    }

    /// The image painted so far.
    #[must_use]
    pub const fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Consume the raster, returning its image.
    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

//! Shared types for the konvo convolution engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Re-export `RgbaImage` so downstream crates can hand decoded images to
/// the engine without depending on `image` directly.
pub use image::RgbaImage;

/// Number of bytes per RGBA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Total pixel count (`width * height`).
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Linear pixel index of `(x, y)` in row-major order.
    #[must_use]
    pub const fn index(self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// An RGBA8 pixel buffer submitted to a convolution run.
///
/// The buffer is validated on construction: both dimensions are
/// non-zero and `data.len() == width * height * 4`. A value of this
/// type therefore always satisfies the preprocessing precondition, and
/// it cannot be mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawImage", into = "RawImage")]
pub struct ImageBuffer {
    dimensions: Dimensions,
    data: Vec<u8>,
}

/// Unvalidated wire form of [`ImageBuffer`].
#[derive(Serialize, Deserialize)]
struct RawImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ImageBuffer {
    /// Build an image buffer from raw RGBA bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidDimensions`] if either dimension is
    /// zero, [`EngineError::DimensionsOverflow`] if the byte length does
    /// not fit in `usize`, and [`EngineError::BufferLength`] if `data`
    /// does not hold exactly four bytes per pixel.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::InvalidDimensions { width, height });
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(BYTES_PER_PIXEL))
            .ok_or(EngineError::DimensionsOverflow { width, height })?;
        if data.len() != expected {
            return Err(EngineError::BufferLength {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            dimensions: Dimensions { width, height },
            data,
        })
    }

    /// Image dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.dimensions.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// The raw RGBA bytes, four per pixel in row-major order.
    #[must_use]
    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    /// Iterate over `[r, g, b, a]` pixels in row-major order.
    pub fn pixels(&self) -> impl ExactSizeIterator<Item = &[u8]> {
        self.data.chunks_exact(BYTES_PER_PIXEL)
    }
}

impl TryFrom<RawImage> for ImageBuffer {
    type Error = EngineError;

    fn try_from(raw: RawImage) -> Result<Self, Self::Error> {
        Self::new(raw.width, raw.height, raw.data)
    }
}

impl From<ImageBuffer> for RawImage {
    fn from(image: ImageBuffer) -> Self {
        Self {
            width: image.dimensions.width,
            height: image.dimensions.height,
            data: image.data,
        }
    }
}

impl TryFrom<&RgbaImage> for ImageBuffer {
    type Error = EngineError;

    /// Copy a decoded `image` RGBA buffer. Fails only for empty images.
    fn try_from(image: &RgbaImage) -> Result<Self, Self::Error> {
        Self::new(image.width(), image.height(), image.as_raw().clone())
    }
}

/// Per-run processing options.
///
/// On the wire the delay field is called `delay` (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Divide each accumulated value by the kernel's weight sum (unless
    /// that sum is zero).
    pub normalize: bool,

    /// Pause between consecutive pixels, in milliseconds. Zero disables
    /// the delay entirely.
    #[serde(rename = "delay")]
    pub delay_ms: u64,
}

impl RunConfig {
    /// Default for [`normalize`](Self::normalize).
    pub const DEFAULT_NORMALIZE: bool = true;

    /// Default for [`delay_ms`](Self::delay_ms).
    pub const DEFAULT_DELAY_MS: u64 = 0;

    /// The inter-pixel delay as a [`Duration`].
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            normalize: Self::DEFAULT_NORMALIZE,
            delay_ms: Self::DEFAULT_DELAY_MS,
        }
    }
}

/// Errors produced by the konvo engine.
///
/// Cancelling a run is not an error; it is reported through
/// [`Event::Cancelled`](crate::Event::Cancelled).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum EngineError {
    /// Width or height is zero.
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// `width * height * 4` does not fit in memory addressing.
    #[error("image dimensions {width}x{height} overflow the buffer size")]
    DimensionsOverflow { width: u32, height: u32 },

    /// The RGBA byte buffer has the wrong length for its dimensions.
    #[error("image buffer holds {actual} bytes, expected {expected}")]
    BufferLength { expected: usize, actual: usize },

    /// A kernel did not contain exactly nine weights.
    #[error("kernel must have 9 weights, got {0}")]
    KernelLength(usize),

    /// A start command arrived while a run was still active.
    #[error("a convolution run is already in progress")]
    RunInProgress,

    /// A wire message could not be decoded or encoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The engine's dispatcher has shut down.
    #[error("engine has stopped")]
    EngineStopped,

    /// A worker thread could not be spawned.
    #[error("failed to spawn engine thread: {0}")]
    Spawn(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

//! 3x3 convolution kernels and the built-in presets.
//!
//! A [`Kernel`] is nine weights in row-major order: index
//! `(ky + 1) * 3 + (kx + 1)` holds the weight for the spatial offset
//! `(kx, ky)` with both offsets in `-1..=1`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::EngineError;

/// Side length of the convolution window.
pub const KERNEL_SIZE: usize = 3;

/// Number of weights in a kernel.
pub const KERNEL_LEN: usize = KERNEL_SIZE * KERNEL_SIZE;

/// A 3x3 convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Kernel([f64; KERNEL_LEN]);

impl Kernel {
    /// Create a kernel from nine row-major weights.
    #[must_use]
    pub const fn new(weights: [f64; KERNEL_LEN]) -> Self {
        Self(weights)
    }

    /// Weight for the spatial offset `(kx, ky)`, both in `-1..=1`.
    ///
    /// Offsets outside that range are clamped onto the window edge.
    #[must_use]
    pub fn weight(&self, kx: i32, ky: i32) -> f64 {
        let col = usize::try_from(kx.clamp(-1, 1) + 1).unwrap_or_default();
        let row = usize::try_from(ky.clamp(-1, 1) + 1).unwrap_or_default();
        self.0[row * KERNEL_SIZE + col]
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Value every accumulated sum is divided by.
    ///
    /// With `normalize` set this is the weight sum, unless the sum is
    /// zero (edge-detection kernels), in which case it is 1.
    #[must_use]
    pub fn divisor(&self, normalize: bool) -> f64 {
        let sum = self.sum();
        if normalize && sum != 0.0 { sum } else { 1.0 }
    }
}

impl Default for Kernel {
    fn default() -> Self {
        KernelPreset::Identity.kernel()
    }
}

impl TryFrom<&[f64]> for Kernel {
    type Error = EngineError;

    fn try_from(weights: &[f64]) -> Result<Self, Self::Error> {
        <[f64; KERNEL_LEN]>::try_from(weights)
            .map(Self)
            .map_err(|_| EngineError::KernelLength(weights.len()))
    }
}

impl TryFrom<Vec<f64>> for Kernel {
    type Error = EngineError;

    fn try_from(weights: Vec<f64>) -> Result<Self, Self::Error> {
        Self::try_from(weights.as_slice())
    }
}

impl From<Kernel> for Vec<f64> {
    fn from(kernel: Kernel) -> Self {
        kernel.0.to_vec()
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (row, weights) in self.0.chunks_exact(KERNEL_SIZE).enumerate() {
            if row > 0 {
                f.write_str(" / ")?;
            }
            write!(f, "{} {} {}", weights[0], weights[1], weights[2])?;
        }
        Ok(())
    }
}

/// Named kernels offered by the front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelPreset {
    /// Leaves the grayscale image unchanged.
    #[default]
    Identity,
    /// Emphasises local contrast.
    Sharpen,
    /// Diagonal edge detector (weights sum to zero).
    Edge,
    /// Box blur over the 3x3 neighbourhood.
    Blur,
}

impl KernelPreset {
    /// Every preset, in display order.
    pub const ALL: [Self; 4] = [Self::Identity, Self::Sharpen, Self::Edge, Self::Blur];

    /// Lowercase preset name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Sharpen => "sharpen",
            Self::Edge => "edge",
            Self::Blur => "blur",
        }
    }

    /// The preset's weights.
    #[must_use]
    pub const fn kernel(self) -> Kernel {
        Kernel::new(match self {
            Self::Identity => [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            Self::Sharpen => [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0],
            Self::Edge => [1.0, 0.0, -1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0],
            Self::Blur => [1.0; KERNEL_LEN],
        })
    }
}

impl fmt::Display for KernelPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown kernel preset '{s}'"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn wrong_length_is_rejected() {
        let result = Kernel::try_from(vec![1.0; 8]);
        assert_eq!(result, Err(EngineError::KernelLength(8)));
    }

    #[test]
    fn weight_lookup_matches_row_major_layout() {
        let kernel = Kernel::new([1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(kernel.weight(-1, -1), 1.0);
        assert_eq!(kernel.weight(1, -1), 3.0);
        assert_eq!(kernel.weight(0, 0), 5.0);
        assert_eq!(kernel.weight(-1, 1), 7.0);
        assert_eq!(kernel.weight(1, 1), 9.0);
    }

    #[test]
    fn divisor_uses_sum_only_when_normalizing() {
        let blur = KernelPreset::Blur.kernel();
        assert_eq!(blur.divisor(true), 9.0);
        assert_eq!(blur.divisor(false), 1.0);
    }

    #[test]
    fn zero_sum_kernel_divides_by_one() {
        let edge = KernelPreset::Edge.kernel();
        assert_eq!(edge.sum(), 0.0);
        assert_eq!(edge.divisor(true), 1.0);
    }

    #[test]
    fn presets_parse_by_name() {
        for preset in KernelPreset::ALL {
            assert_eq!(preset.name().parse::<KernelPreset>().unwrap(), preset);
        }
        assert_eq!("  Sharpen ".parse::<KernelPreset>().unwrap(), KernelPreset::Sharpen);
        assert!("emboss".parse::<KernelPreset>().is_err());
    }

    #[test]
    fn kernel_deserializes_from_json_array() {
        let kernel: Kernel = serde_json::from_str("[0,-1,0,-1,5,-1,0,-1,0]").unwrap();
        assert_eq!(kernel, KernelPreset::Sharpen.kernel());
        assert!(serde_json::from_str::<Kernel>("[1,2,3]").is_err());
    }
}

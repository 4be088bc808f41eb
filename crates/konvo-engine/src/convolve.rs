//! Per-pixel 3x3 convolution over a luminance buffer.
//!
//! [`convolve_pixel`] is the only place the output formula lives; the
//! scheduled run loop and the one-shot [`convolve_image`] both call it.

use crate::grayscale::{LuminanceBuffer, to_luminance};
use crate::kernel::Kernel;
use crate::types::{ImageBuffer, RunConfig};

/// Convolve the 3x3 neighbourhood centred on `(x, y)`.
///
/// Neighbours outside the image are read from the nearest edge pixel.
/// Products are accumulated in `f64` with `ky` as the outer loop and
/// `kx` as the inner one, divided by `divisor`, rounded to the nearest
/// integer and clamped to `0..=255`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn convolve_pixel(luma: &LuminanceBuffer, kernel: &Kernel, divisor: f64, x: u32, y: u32) -> u8 {
    let mut acc = 0.0_f64;
    for ky in -1..=1 {
        for kx in -1..=1 {
            let sample =
                luma.sample_clamped(i64::from(x) + i64::from(kx), i64::from(y) + i64::from(ky));
            acc += f64::from(sample) * kernel.weight(kx, ky);
        }
    }

    // Negative halves round differently from other conventions, but
    // every negative result clamps to 0 anyway.
    (acc / divisor).round().clamp(0.0, 255.0) as u8
}

/// Convolve every pixel of `image` in one call, without run control.
///
/// Returns one output luminance per pixel in row-major order. Produces
/// exactly the values a scheduled run would stream.
#[must_use = "returns the convolved luminance values"]
pub fn convolve_image(image: &ImageBuffer, kernel: &Kernel, config: &RunConfig) -> Vec<u8> {
    let luma = to_luminance(image);
    let divisor = kernel.divisor(config.normalize);
    let dims = image.dimensions();

    (0..dims.height)
        .flat_map(|y| (0..dims.width).map(move |x| (x, y)))
        .map(|(x, y)| convolve_pixel(&luma, kernel, divisor, x, y))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::kernel::KernelPreset;

    /// The 2x2 gray image used throughout: luminance [[100, 0], [50, 200]].
    fn two_by_two() -> ImageBuffer {
        let data = [100u8, 0, 50, 200]
            .iter()
            .flat_map(|&v| [v, v, v, 255])
            .collect();
        ImageBuffer::new(2, 2, data).unwrap()
    }

    #[test]
    fn identity_reproduces_grayscale() {
        let out = convolve_image(
            &two_by_two(),
            &KernelPreset::Identity.kernel(),
            &RunConfig::default(),
        );
        assert_eq!(out, vec![100, 0, 50, 200]);
    }

    #[test]
    fn box_blur_averages_clamped_neighbourhood() {
        let out = convolve_image(
            &two_by_two(),
            &KernelPreset::Blur.kernel(),
            &RunConfig::default(),
        );
        // (0,0): 700/9, (1,0): 650/9, (0,1): 800/9, (1,1): 1000/9
        assert_eq!(out, vec![78, 72, 89, 111]);
    }

    #[test]
    fn unnormalized_blur_saturates() {
        let config = RunConfig {
            normalize: false,
            ..RunConfig::default()
        };
        let out = convolve_image(&two_by_two(), &KernelPreset::Blur.kernel(), &config);
        assert_eq!(out, vec![255; 4]);
    }

    #[test]
    fn negative_results_clamp_to_zero() {
        let negate = Kernel::new([0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0]);
        let config = RunConfig {
            normalize: false,
            ..RunConfig::default()
        };
        let out = convolve_image(&two_by_two(), &negate, &config);
        assert_eq!(out, vec![0; 4]);
    }

    #[test]
    fn negative_weight_sum_still_normalizes() {
        // Sum is -1, so dividing by it restores the sign.
        let negate = Kernel::new([0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0]);
        let out = convolve_image(&two_by_two(), &negate, &RunConfig::default());
        assert_eq!(out, vec![100, 0, 50, 200]);
    }

    #[test]
    fn edge_kernel_on_uniform_image_is_zero() {
        let data = vec![90; 5 * 4 * 4];
        let image = ImageBuffer::new(5, 4, data).unwrap();
        let out = convolve_image(&image, &KernelPreset::Edge.kernel(), &RunConfig::default());
        assert!(out.iter().all(|&v| v == 0), "got {out:?}");
    }

    #[test]
    fn single_pixel_image_samples_itself() {
        let image = ImageBuffer::new(1, 1, vec![120, 120, 120, 255]).unwrap();
        let out = convolve_image(&image, &KernelPreset::Blur.kernel(), &RunConfig::default());
        assert_eq!(out, vec![120]);
    }

    #[test]
    fn sharpen_matches_hand_computed_value() {
        // 3x3 image with a bright centre. Centre: 5*200 - 4*100 = 600,
        // which clamps to 255.
        let levels = [100u8, 100, 100, 100, 200, 100, 100, 100, 100];
        let data = levels.iter().flat_map(|&v| [v, v, v, 255]).collect();
        let image = ImageBuffer::new(3, 3, data).unwrap();
        let out = convolve_image(
            &image,
            &KernelPreset::Sharpen.kernel(),
            &RunConfig::default(),
        );
        assert_eq!(out[4], 255);
        // Top-left: up and left replicate itself (100 each), right 100, down 100.
        assert_eq!(out[0], 100);
        // Top-middle: up replicates (100), left 100, right 100, down 200.
        assert_eq!(out[1], 0);
    }
}

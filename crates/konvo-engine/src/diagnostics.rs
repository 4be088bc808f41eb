//! Run diagnostics: timing and counts for a single convolution run.
//!
//! Every call to [`Run::execute`](crate::run::Run::execute) returns a
//! [`RunSummary`], and the engine logs it when a run ends.
//!
//! Timestamps are captured via the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` on native.
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::RunOutcome;
use crate::types::Dimensions;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Size of the processed image.
    pub dimensions: Dimensions,
    /// Number of progress events emitted.
    pub pixels_processed: u64,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Time spent building the luminance buffer (seconds).
    #[serde(with = "duration_serde")]
    pub luminance_duration: Duration,
    /// Wall-clock duration of the whole run, including pauses and
    /// inter-pixel delays (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

impl RunSummary {
    /// Total pixel count of the image.
    #[must_use]
    pub const fn total_pixels(&self) -> u64 {
        self.dimensions.pixel_count()
    }

    /// Fraction of pixels processed, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn completion(&self) -> f64 {
        let total = self.total_pixels();
        if total == 0 {
            return 0.0;
        }
        self.pixels_processed as f64 / total as f64
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {}/{} pixels ({:.1}%) of {}x{} in {:.3}ms (luminance {:.3}ms)",
            self.outcome,
            self.pixels_processed,
            self.total_pixels(),
            self.completion() * 100.0,
            self.dimensions.width,
            self.dimensions.height,
            self.total_duration.as_secs_f64() * 1000.0,
            self.luminance_duration.as_secs_f64() * 1000.0,
        )
    }
}

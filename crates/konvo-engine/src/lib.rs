//! konvo-engine: pausable, cancellable pixel-by-pixel convolution (sans-IO).
//!
//! Applies a 3x3 kernel to the luminance of an RGBA image one pixel at a
//! time, streaming each result as it is produced:
//! RGBA buffer -> luminance -> per-pixel convolution -> progress events.
//!
//! A run can be paused, resumed and cancelled while it is in flight.
//! Callers either drive a [`Run`] synchronously with their own
//! [`EventSink`], or use the threaded [`Engine`], which accepts
//! [`Command`]s and produces [`Event`]s over channels.
//!
//! This crate does no file or network I/O; decoding image files and
//! displaying results live in the front ends.

pub mod control;
pub mod convolve;
pub mod diagnostics;
pub mod engine;
pub mod grayscale;
pub mod kernel;
pub mod protocol;
pub mod raster;
pub mod run;
pub mod types;

pub use control::{RunControl, RunOutcome, RunState};
pub use diagnostics::RunSummary;
pub use engine::{Commander, Engine};
pub use kernel::{Kernel, KernelPreset};
pub use protocol::{Command, Event, Progress, StartRequest};
pub use raster::ResultRaster;
pub use run::{EventSink, Run};
pub use types::{Dimensions, EngineError, ImageBuffer, RgbaImage, RunConfig};

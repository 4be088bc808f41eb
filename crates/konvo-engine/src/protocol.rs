//! Messages exchanged between a caller and the engine.
//!
//! Both directions use tagged records. On the wire each message is one
//! JSON object whose `type` field names the variant:
//!
//! ```text
//! -> {"type":"start","image":{"width":2,"height":2,"data":[...]},
//!     "kernel":[0,0,0,0,1,0,0,0,0],"normalize":true,"delay":0}
//! -> {"type":"pause"}   {"type":"resume"}   {"type":"reset"}
//! <- {"type":"progress","idx":0,"x":0,"y":0,"value":100}
//! <- {"type":"done"}    {"type":"cancelled"}
//! <- {"type":"failed","error":{"KernelLength":8}}
//! ```

use serde::{Deserialize, Serialize};

use crate::kernel::Kernel;
use crate::types::{BYTES_PER_PIXEL, Dimensions, EngineError, ImageBuffer, RunConfig};

/// Everything a run needs, supplied with the `start` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Source pixels. Read-only for the lifetime of the run.
    pub image: ImageBuffer,
    /// Convolution weights.
    pub kernel: Kernel,
    /// Normalisation and pacing.
    #[serde(flatten)]
    pub config: RunConfig,
}

impl StartRequest {
    /// Bundle a run's inputs.
    #[must_use]
    pub const fn new(image: ImageBuffer, kernel: Kernel, config: RunConfig) -> Self {
        Self {
            image,
            kernel,
            config,
        }
    }
}

/// Caller-to-engine message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
    /// Begin a new run.
    Start(StartRequest),
    /// Suspend the active run at its next checkpoint.
    Pause,
    /// Continue a paused run.
    Resume,
    /// Cancel the active run.
    Reset,
}

/// One fully processed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Byte offset of the pixel in an RGBA buffer: `(y * width + x) * 4`.
    pub idx: usize,
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
    /// Output luminance.
    pub value: u8,
}

impl Progress {
    /// Describe pixel `(x, y)` of an image with the given dimensions.
    #[must_use]
    pub const fn new(dimensions: Dimensions, x: u32, y: u32, value: u8) -> Self {
        Self {
            idx: dimensions.index(x, y) * BYTES_PER_PIXEL,
            x,
            y,
            value,
        }
    }
}

/// Engine-to-caller message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    /// A pixel was processed. Always delivered in row-major order.
    Progress(Progress),
    /// The run processed every pixel. Last event of its run.
    Done,
    /// The run was reset. Last event of its run.
    Cancelled,
    /// A command could not be carried out. Does not end any run.
    Failed {
        /// What went wrong.
        error: EngineError,
    },
}

impl Event {
    /// Whether this event ends a run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// Parse one wire command.
///
/// Validation of the image buffer and kernel happens during parsing, so
/// a malformed `start` surfaces here instead of inside a run.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] describing the first problem found.
pub fn decode_command(json: &str) -> Result<Command, EngineError> {
    Ok(serde_json::from_str(json)?)
}

/// Serialize one event as a single-line JSON object.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] if serialization fails.
pub fn encode_event(event: &Event) -> Result<String, EngineError> {
    Ok(serde_json::to_string(event)?)
}

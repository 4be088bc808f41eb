//! The per-pixel run loop.
//!
//! A [`Run`] owns one start request and drives it to a terminal event:
//! build the luminance buffer, then for every pixel in row-major order
//! pass a checkpoint, convolve, emit progress, and sleep for the
//! configured delay. Events leave through an [`EventSink`], which is how
//! the same loop serves the threaded [`Engine`](crate::Engine) and
//! synchronous callers.

use std::sync::mpsc;
use std::thread;

use web_time::Instant;

use crate::control::{Checkpoint, RunControl, RunOutcome};
use crate::convolve::convolve_pixel;
use crate::diagnostics::RunSummary;
use crate::grayscale::to_luminance;
use crate::protocol::{Event, Progress, StartRequest};
use crate::types::EngineError;

/// Destination for the events of a run.
pub trait EventSink {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EngineStopped`] if nobody is listening any
    /// more. The run treats that as a cancellation.
    fn emit(&mut self, event: Event) -> Result<(), EngineError>;
}

impl EventSink for Vec<Event> {
    fn emit(&mut self, event: Event) -> Result<(), EngineError> {
        self.push(event);
        Ok(())
    }
}

impl EventSink for mpsc::Sender<Event> {
    fn emit(&mut self, event: Event) -> Result<(), EngineError> {
        self.send(event).map_err(|_| EngineError::EngineStopped)
    }
}

/// A single convolution run.
#[derive(Debug, Clone)]
pub struct Run {
    request: StartRequest,
}

impl Run {
    /// Prepare a run. Nothing is computed until [`execute`](Self::execute).
    #[must_use]
    pub const fn new(request: StartRequest) -> Self {
        Self { request }
    }

    /// Process every pixel, streaming events into `sink`.
    ///
    /// `control` must already be in the running state (see
    /// [`RunControl::begin`]); it is left in a terminal state on return.
    /// The last event sent to `sink` is always [`Event::Done`] or
    /// [`Event::Cancelled`], matching the summary's outcome.
    #[tracing::instrument(
        name = "run",
        skip_all,
        fields(width = self.request.image.width(), height = self.request.image.height()),
    )]
    pub fn execute<S: EventSink + ?Sized>(self, control: &RunControl, sink: &mut S) -> RunSummary {
        let started = Instant::now();
        let StartRequest {
            image,
            kernel,
            config,
        } = self.request;

        let luma = to_luminance(&image);
        let luminance_duration = started.elapsed();
        drop(image);

        let dims = luma.dimensions();
        let divisor = kernel.divisor(config.normalize);
        let delay = config.delay();
        let mut processed = 0_u64;

        'raster: for y in 0..dims.height {
            for x in 0..dims.width {
                if control.checkpoint() == Checkpoint::Cancel {
                    break 'raster;
                }

                let value = convolve_pixel(&luma, &kernel, divisor, x, y);
                if sink.emit(Event::Progress(Progress::new(dims, x, y, value))).is_err() {
                    tracing::warn!(x, y, "event receiver dropped; cancelling run");
                    control.cancel();
                    break 'raster;
                }
                processed += 1;

                // Not interruptible: pause and reset take effect at the
                // checkpoint after the delay.
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }

        let outcome = control.finish();
        let terminal = match outcome {
            RunOutcome::Completed => Event::Done,
            RunOutcome::Cancelled => Event::Cancelled,
        };
        if sink.emit(terminal).is_err() {
            tracing::debug!(?outcome, "terminal event not delivered");
        }

        let summary = RunSummary {
            dimensions: dims,
            pixels_processed: processed,
            outcome,
            luminance_duration,
            total_duration: started.elapsed(),
        };
        tracing::info!(%summary, "run finished");
        summary
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::control::RunState;
    use crate::convolve::convolve_image;
    use crate::kernel::{Kernel, KernelPreset};
    use crate::types::{ImageBuffer, RunConfig};

    fn gradient(width: u32, height: u32) -> ImageBuffer {
        let data = (0..width * height)
            .flat_map(|i| {
                #[allow(clippy::cast_possible_truncation)]
                let v = (i * 37 % 256) as u8;
                [v, v.wrapping_mul(3), v / 2, 255]
            })
            .collect();
        ImageBuffer::new(width, height, data).unwrap()
    }

    fn request(image: ImageBuffer, kernel: Kernel) -> StartRequest {
        StartRequest::new(image, kernel, RunConfig::default())
    }

    fn run_to_end(request: StartRequest) -> (Vec<Event>, RunSummary) {
        let control = RunControl::new();
        control.begin().unwrap();
        let mut events = Vec::new();
        let summary = Run::new(request).execute(&control, &mut events);
        (events, summary)
    }

    fn progress(events: &[Event]) -> Vec<Progress> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    /// Sink that requests cancellation once it has seen `after` progress
    /// events.
    struct CancelAfter<'a> {
        control: &'a RunControl,
        after: usize,
        events: Vec<Event>,
    }

    impl EventSink for CancelAfter<'_> {
        fn emit(&mut self, event: Event) -> Result<(), EngineError> {
            self.events.push(event);
            if progress(&self.events).len() == self.after {
                self.control.cancel();
            }
            Ok(())
        }
    }

    /// Sink whose receiver has gone away.
    struct Closed;

    impl EventSink for Closed {
        fn emit(&mut self, _event: Event) -> Result<(), EngineError> {
            Err(EngineError::EngineStopped)
        }
    }

    #[test]
    fn two_by_two_identity_scenario() {
        let data = [100u8, 0, 50, 200]
            .iter()
            .flat_map(|&v| [v, v, v, 255])
            .collect();
        let image = ImageBuffer::new(2, 2, data).unwrap();
        let (events, summary) = run_to_end(request(image, KernelPreset::Identity.kernel()));

        let dims = summary.dimensions;
        assert_eq!(
            events,
            vec![
                Event::Progress(Progress::new(dims, 0, 0, 100)),
                Event::Progress(Progress::new(dims, 1, 0, 0)),
                Event::Progress(Progress::new(dims, 0, 1, 50)),
                Event::Progress(Progress::new(dims, 1, 1, 200)),
                Event::Done,
            ],
        );
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(summary.pixels_processed, 4);
    }

    #[test]
    fn completed_run_covers_every_pixel_in_raster_order() {
        let (events, summary) = run_to_end(request(gradient(7, 5), KernelPreset::Sharpen.kernel()));
        let pixels = progress(&events);

        assert_eq!(pixels.len(), 35);
        assert_eq!(events.last(), Some(&Event::Done));
        for (i, p) in pixels.iter().enumerate() {
            let i = u32::try_from(i).unwrap();
            assert_eq!((p.x, p.y), (i % 7, i / 7), "event {i} out of order");
            assert_eq!(p.idx, i as usize * 4);
        }
        assert_eq!(summary.pixels_processed, 35);
    }

    #[test]
    fn streamed_values_match_one_shot_convolution() {
        let image = gradient(9, 6);
        let kernel = KernelPreset::Edge.kernel();
        let expected = convolve_image(&image, &kernel, &RunConfig::default());
        let (events, _) = run_to_end(request(image, kernel));
        let values: Vec<u8> = progress(&events).iter().map(|p| p.value).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn cancellation_stops_at_the_next_pixel() {
        let control = RunControl::new();
        control.begin().unwrap();
        let mut sink = CancelAfter {
            control: &control,
            after: 5,
            events: Vec::new(),
        };
        let summary = Run::new(request(gradient(4, 4), KernelPreset::Blur.kernel()))
            .execute(&control, &mut sink);

        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.pixels_processed, 5);
        assert_eq!(progress(&sink.events).len(), 5);
        assert_eq!(sink.events.last(), Some(&Event::Cancelled));
        assert!(!sink.events.contains(&Event::Done));
        assert_eq!(control.state(), RunState::Cancelled);
    }

    #[test]
    fn cancel_during_last_pixel_reports_cancelled() {
        let control = RunControl::new();
        control.begin().unwrap();
        let mut sink = CancelAfter {
            control: &control,
            after: 4,
            events: Vec::new(),
        };
        let summary = Run::new(request(gradient(2, 2), KernelPreset::Identity.kernel()))
            .execute(&control, &mut sink);

        assert_eq!(summary.pixels_processed, 4);
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(sink.events.last(), Some(&Event::Cancelled));
    }

    #[test]
    fn closed_sink_cancels_the_run() {
        let control = RunControl::new();
        control.begin().unwrap();
        let summary = Run::new(request(gradient(3, 3), KernelPreset::Identity.kernel()))
            .execute(&control, &mut Closed);
        assert_eq!(summary.outcome, RunOutcome::Cancelled);
        assert_eq!(summary.pixels_processed, 0);
    }

    #[test]
    fn restarting_begins_again_at_origin() {
        let control = RunControl::new();
        control.begin().unwrap();
        let mut sink = CancelAfter {
            control: &control,
            after: 2,
            events: Vec::new(),
        };
        Run::new(request(gradient(3, 3), KernelPreset::Identity.kernel()))
            .execute(&control, &mut sink);

        control.begin().unwrap();
        let mut events = Vec::new();
        let summary = Run::new(request(gradient(3, 3), KernelPreset::Identity.kernel()))
            .execute(&control, &mut events);
        let pixels = progress(&events);
        assert_eq!((pixels[0].x, pixels[0].y), (0, 0));
        assert_eq!(pixels.len(), 9);
        assert_eq!(summary.outcome, RunOutcome::Completed);
    }
}

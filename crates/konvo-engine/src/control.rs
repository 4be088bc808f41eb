//! Run state shared between the caller's commands and the run loop.
//!
//! [`RunControl`] is the only mutable state that crosses threads. The
//! dispatcher mutates it in response to commands; the run loop reads it
//! at its checkpoints. A [`Condvar`] wakes a paused loop as soon as the
//! run is resumed or cancelled, so pausing costs no CPU.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::types::EngineError;

/// Lifecycle state of the engine's current (or most recent) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunState {
    /// No run has been started yet.
    #[default]
    Idle,
    /// The raster loop is processing pixels.
    Running,
    /// A pause was requested; the loop blocks at its next checkpoint.
    Paused,
    /// A reset was requested; the loop stops at its next checkpoint.
    Cancelling,
    /// The last run processed every pixel.
    Completed,
    /// The last run was stopped by a reset.
    Cancelled,
}

impl RunState {
    /// Whether a run is in flight (running, paused or winding down).
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Cancelling)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunOutcome {
    /// All pixels were processed.
    Completed,
    /// The run was reset before finishing.
    Cancelled,
}

/// Verdict of a single [`RunControl::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Keep processing.
    Continue,
    /// Stop the run now.
    Cancel,
}

/// Pause/cancel state for one engine instance.
#[derive(Debug, Default)]
pub struct RunControl {
    state: Mutex<RunState>,
    wake: Condvar,
}

impl RunControl {
    /// Create a control in the [`RunState::Idle`] state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        *self.lock()
    }

    /// Start a new run, clearing any pause or cancel left over from the
    /// previous one.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RunInProgress`] if a run is still active.
    pub fn begin(&self) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.is_active() {
            return Err(EngineError::RunInProgress);
        }
        *state = RunState::Running;
        tracing::debug!("run started");
        Ok(())
    }

    /// Request a pause. Returns `false` if no run is running.
    pub fn pause(&self) -> bool {
        self.transition(RunState::Running, RunState::Paused)
    }

    /// Resume a paused run. Returns `false` if the run was not paused.
    pub fn resume(&self) -> bool {
        self.transition(RunState::Paused, RunState::Running)
    }

    /// Request cancellation of the active run, releasing it from any
    /// pause. Returns `false` if there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let mut state = self.lock();
        match *state {
            RunState::Running | RunState::Paused => {
                *state = RunState::Cancelling;
                drop(state);
                self.wake.notify_all();
                tracing::debug!("cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Evaluate pause and cancel before the loop does more work.
    ///
    /// Returns [`Checkpoint::Cancel`] right away if cancellation was
    /// requested. Otherwise blocks for as long as the run is paused, then
    /// re-checks cancellation, so a reset sent during a pause is honoured
    /// before any further sampling.
    pub fn checkpoint(&self) -> Checkpoint {
        let state = self.lock();
        let state = self
            .wake
            .wait_while(state, |s| *s == RunState::Paused)
            .unwrap_or_else(PoisonError::into_inner);

        if *state == RunState::Cancelling {
            Checkpoint::Cancel
        } else {
            Checkpoint::Continue
        }
    }

    /// Move the active run into its terminal state.
    ///
    /// The final cancellation check and the transition happen under one
    /// lock, so a reset that lands after the last pixel still ends the
    /// run as [`RunOutcome::Cancelled`].
    pub fn finish(&self) -> RunOutcome {
        let mut state = self.lock();
        let outcome = if *state == RunState::Cancelling {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };
        *state = match outcome {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Cancelled => RunState::Cancelled,
        };
        drop(state);
        self.wake.notify_all();
        outcome
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        let mut state = self.lock();
        if *state != from {
            tracing::debug!(?from, ?to, current = ?*state, "ignoring state transition");
            return false;
        }
        *state = to;
        drop(state);
        self.wake.notify_all();
        tracing::debug!(?to, "run state changed");
        true
    }

    /// The state is a plain enum, so a poisoned lock still holds a
    /// usable value.
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

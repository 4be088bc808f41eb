//! Threaded engine: a command dispatcher plus one worker thread per run.
//!
//! The caller talks to the engine only through messages. [`Command`]s go
//! in over one channel and are handled by a dispatcher thread, which
//! updates the shared [`RunControl`] and spawns the worker for each
//! accepted `start`. [`Event`]s come back over a second channel in the
//! order the worker produced them.
//!
//! ```no_run
//! # use konvo_engine::{Command, Engine, Event, EngineError, ImageBuffer, KernelPreset,
//! #     RunConfig, StartRequest};
//! # fn demo(image: ImageBuffer) -> Result<(), EngineError> {
//! let engine = Engine::spawn()?;
//! engine.send(Command::Start(StartRequest::new(
//!     image,
//!     KernelPreset::Blur.kernel(),
//!     RunConfig::default(),
//! )))?;
//! for event in engine.events() {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use crate::control::{RunControl, RunState};
use crate::protocol::{Command, Event, StartRequest};
use crate::run::Run;
use crate::types::EngineError;

/// What the dispatcher receives.
enum Message {
    Command(Command),
    Shutdown,
}

/// Cloneable handle for sending commands to an [`Engine`] from any
/// thread.
#[derive(Debug, Clone)]
pub struct Commander {
    tx: Sender<Message>,
}

impl Commander {
    /// Send a command to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EngineStopped`] if the engine has shut down.
    pub fn send(&self, command: Command) -> Result<(), EngineError> {
        self.tx
            .send(Message::Command(command))
            .map_err(|_| EngineError::EngineStopped)
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Command(Command::Start(_)) => f.write_str("Start"),
            Self::Command(command) => write!(f, "{command:?}"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// A running convolution engine.
///
/// Dropping the engine cancels any active run and joins its threads.
#[derive(Debug)]
pub struct Engine {
    commander: Commander,
    events: Receiver<Event>,
    control: Arc<RunControl>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start the dispatcher thread.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the thread cannot be created.
    pub fn spawn() -> Result<Self, EngineError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();
        let control = Arc::new(RunControl::new());

        let dispatcher = {
            let control = Arc::clone(&control);
            thread::Builder::new()
                .name("konvo-dispatch".into())
                .spawn(move || dispatch(&command_rx, &control, &event_tx))
                .map_err(|e| EngineError::Spawn(e.to_string()))?
        };

        Ok(Self {
            commander: Commander { tx: command_tx },
            events: event_rx,
            control,
            dispatcher: Some(dispatcher),
        })
    }

    /// Send a command to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EngineStopped`] if the dispatcher is gone.
    pub fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commander.send(command)
    }

    /// A cloneable command sender for use from other threads.
    #[must_use]
    pub fn commander(&self) -> Commander {
        self.commander.clone()
    }

    /// The event stream. Events of one run arrive in row-major order
    /// and end with [`Event::Done`] or [`Event::Cancelled`].
    #[must_use]
    pub const fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.control.cancel();
        let _ = self.commander.tx.send(Message::Shutdown);
        if let Some(dispatcher) = self.dispatcher.take()
            && dispatcher.join().is_err()
        {
            tracing::error!("engine dispatcher panicked");
        }
    }
}

/// Dispatcher loop: apply commands until shutdown or until every
/// [`Commander`] is gone.
fn dispatch(commands: &Receiver<Message>, control: &Arc<RunControl>, events: &Sender<Event>) {
    let mut worker: Option<JoinHandle<()>> = None;

    for message in commands {
        tracing::trace!(?message, "dispatching");
        match message {
            Message::Command(Command::Start(request)) => {
                if let Err(error) = control.begin() {
                    tracing::warn!(%error, "start rejected");
                    let _ = events.send(Event::Failed { error });
                    continue;
                }
                // The previous run has already reached a terminal state;
                // joining it keeps its last event ahead of the new run's.
                join_worker(worker.take());
                match spawn_worker(request, control, events) {
                    Ok(handle) => worker = Some(handle),
                    Err(error) => {
                        control.cancel();
                        control.finish();
                        tracing::error!(%error, "could not start run");
                        let _ = events.send(Event::Failed { error });
                    }
                }
            }
            Message::Command(Command::Pause) => {
                control.pause();
            }
            Message::Command(Command::Resume) => {
                control.resume();
            }
            Message::Command(Command::Reset) => {
                control.cancel();
            }
            Message::Shutdown => break,
        }
    }

    control.cancel();
    join_worker(worker);
    tracing::debug!("dispatcher stopped");
}

fn spawn_worker(
    request: StartRequest,
    control: &Arc<RunControl>,
    events: &Sender<Event>,
) -> Result<JoinHandle<()>, EngineError> {
    let control = Arc::clone(control);
    let mut events = events.clone();
    thread::Builder::new()
        .name("konvo-run".into())
        .spawn(move || {
            Run::new(request).execute(&control, &mut events);
        })
        .map_err(|e| EngineError::Spawn(e.to_string()))
}

fn join_worker(worker: Option<JoinHandle<()>>) {
    if let Some(handle) = worker
        && handle.join().is_err()
    {
        tracing::error!("run thread panicked");
    }
}

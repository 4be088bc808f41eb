//! JSON-lines bridge between stdin/stdout and the engine.
//!
//! Each stdin line is decoded as one [`Command`]; each engine [`Event`]
//! is written to stdout as one JSON line. Lines that fail to decode are
//! answered with a `failed` event and otherwise ignored.
//!
//! At end of input the bridge keeps forwarding events until every start
//! it passed on has been answered. A run left paused at that point can
//! never be resumed, so it is reset.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use konvo_engine::protocol::{decode_command, encode_event};
use konvo_engine::{Command, Commander, Engine, EngineError, Event, RunState};

/// How often the event loop checks whether input has ended.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Run the bridge on stdin/stdout until stdin closes and all accepted
/// runs have ended.
pub fn serve() -> Result<(), String> {
    bridge(BufReader::new(io::stdin()), io::stdout())
}

/// Run the bridge over any line source and event sink.
fn bridge<R, W>(input: R, output: W) -> Result<(), String>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let engine = Engine::spawn().map_err(|e| format!("Engine error: {e}"))?;
    let output = Arc::new(Mutex::new(output));
    let starts_sent = Arc::new(AtomicUsize::new(0));
    let reader = spawn_reader(
        input,
        engine.commander(),
        Arc::clone(&starts_sent),
        Arc::clone(&output),
    );

    let mut starts_answered = 0_usize;
    let mut reset_sent = false;
    loop {
        match engine.events().recv_timeout(IDLE_POLL) {
            Ok(event) => {
                if answers_start(&event) {
                    starts_answered += 1;
                }
                write_event(&output, &event)?;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !reader.is_finished() {
                    continue;
                }
                if starts_answered >= starts_sent.load(Ordering::Acquire) {
                    break;
                }
                if engine.state() == RunState::Paused && !reset_sent {
                    tracing::debug!("input closed while paused; resetting run");
                    reset_sent = true;
                    engine
                        .send(Command::Reset)
                        .map_err(|e| format!("Engine error: {e}"))?;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if reader.join().is_err() {
        return Err("input reader panicked".into());
    }
    Ok(())
}

/// Whether `event` settles one previously sent `start`: either the run
/// ended, or the start was refused.
const fn answers_start(event: &Event) -> bool {
    matches!(
        event,
        Event::Done
            | Event::Cancelled
            | Event::Failed {
                error: EngineError::RunInProgress | EngineError::Spawn(_)
            }
    )
}

fn spawn_reader<R, W>(
    input: R,
    commander: Commander,
    starts_sent: Arc<AtomicUsize>,
    output: Arc<Mutex<W>>,
) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "input read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let command = match decode_command(&line) {
                Ok(command) => command,
                Err(error) => {
                    tracing::debug!(%error, "undecodable command");
                    if write_event(&output, &Event::Failed { error }).is_err() {
                        break;
                    }
                    continue;
                }
            };

            let is_start = matches!(command, Command::Start(_));
            if is_start {
                starts_sent.fetch_add(1, Ordering::AcqRel);
            }
            if commander.send(command).is_err() {
                if is_start {
                    starts_sent.fetch_sub(1, Ordering::AcqRel);
                }
                break;
            }
        }
    })
}

/// Write one event as a JSON line and flush, so a consumer on the other
/// end of a pipe sees progress as it happens.
fn write_event<W: Write>(output: &Mutex<W>, event: &Event) -> Result<(), String> {
    let json = encode_event(event).map_err(|e| e.to_string())?;
    let mut out = output.lock().unwrap_or_else(PoisonError::into_inner);
    writeln!(out, "{json}")
        .and_then(|()| out.flush())
        .map_err(|e| format!("Error writing output: {e}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use konvo_engine::{ImageBuffer, KernelPreset, Progress, RunConfig, StartRequest};

    /// Output sink the test keeps a handle to after the bridge returns.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn events(&self) -> Vec<Event> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    fn start_line(size: u32, delay_ms: u64) -> String {
        let image = ImageBuffer::new(size, size, vec![128; (size * size * 4) as usize]).unwrap();
        let request = StartRequest::new(
            image,
            KernelPreset::Identity.kernel(),
            RunConfig {
                normalize: true,
                delay_ms,
            },
        );
        serde_json::to_string(&Command::Start(request)).unwrap()
    }

    fn command_line(command: &Command) -> String {
        serde_json::to_string(command).unwrap()
    }

    fn run_bridge(lines: &[String]) -> Vec<Event> {
        let output = Captured::default();
        bridge(Cursor::new(lines.join("\n")), output.clone()).unwrap();
        output.events()
    }

    fn count(events: &[Event], wanted: &Event) -> usize {
        events.iter().filter(|e| *e == wanted).count()
    }

    #[test]
    fn undecodable_line_is_answered_with_failed() {
        let events = run_bridge(&[String::new(), "garbage".into()]);
        assert_eq!(events.len(), 1, "{events:?}");
        assert!(
            matches!(
                &events[0],
                Event::Failed {
                    error: EngineError::Protocol(_)
                }
            ),
            "{events:?}",
        );
    }

    #[test]
    fn run_finishes_after_input_ends() {
        let events = run_bridge(&[start_line(3, 5)]);
        let progress = events
            .iter()
            .filter(|e| matches!(e, Event::Progress(_)))
            .count();
        assert_eq!(progress, 9);
        assert_eq!(events.last(), Some(&Event::Done));
    }

    #[test]
    fn paused_run_is_reset_when_input_ends() {
        let events = run_bridge(&[start_line(5, 20), command_line(&Command::Pause)]);
        assert_eq!(events.last(), Some(&Event::Cancelled));
        assert_eq!(count(&events, &Event::Done), 0);
        assert!(events.len() < 26, "{events:?}");
    }

    #[test]
    fn rejected_start_counts_as_answered() {
        let events = run_bridge(&[start_line(4, 5), start_line(2, 0)]);
        let rejected = Event::Failed {
            error: EngineError::RunInProgress,
        };
        assert_eq!(count(&events, &rejected), 1, "{events:?}");
        assert_eq!(count(&events, &Event::Done), 1, "{events:?}");
        assert_eq!(events.last(), Some(&Event::Done));
    }

    #[test]
    fn terminal_events_answer_starts() {
        assert!(answers_start(&Event::Done));
        assert!(answers_start(&Event::Cancelled));
        assert!(answers_start(&Event::Failed {
            error: EngineError::RunInProgress
        }));
    }

    #[test]
    fn other_events_do_not_answer_starts() {
        let dims = konvo_engine::Dimensions { width: 1, height: 1 };
        assert!(!answers_start(&Event::Progress(Progress::new(dims, 0, 0, 1))));
        assert!(!answers_start(&Event::Failed {
            error: EngineError::Protocol("bad".into())
        }));
    }
}

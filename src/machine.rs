//! Session state machine driving one booth.
//!
//! [`transition`] is the pure transition table. [`PhotoBooth`] feeds it
//! events and runs the entry action of every state it commits to; entry
//! actions are the only place where feedback and hardware side effects
//! happen.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::camera::{CameraDriver, CameraSession};
use crate::config::{Configuration, PrintingConfig};
use crate::error::{ConfigurationError, InvalidTransition};
use crate::events::CaptureSet;
use crate::platform::indicator::{BlinkPattern, Indicator};
use crate::platform::printer::{PrintJob, Printer};
use crate::platform::trigger::Trigger;
use crate::processing::CaptureProcessor;
use crate::tasks::capture::capture_sequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Initialization,
    Waiting,
    Capturing,
    Processing,
    Printing,
    /// Terminal for the current cycle; recovers to `Waiting`.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Initialized,
    RegisteredInput { pressed: bool },
    Captured(CaptureSet),
    CaptureFailed,
    Processed(PathBuf),
    Printed,
    Recovered,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::RegisteredInput { .. } => "registered-input",
            Self::Captured(_) => "captured",
            Self::CaptureFailed => "capture-failed",
            Self::Processed(_) => "processed",
            Self::Printed => "printed",
            Self::Recovered => "recovered",
        }
    }
}

pub fn transition(state: State, event: &Event) -> Result<State, InvalidTransition> {
    use State::*;
    let next = match (state, event) {
        (Initialization, Event::Initialized) => Waiting,
        (Waiting, Event::RegisteredInput { pressed: true }) => Capturing,
        (Waiting, Event::RegisteredInput { pressed: false }) => Waiting,
        (Capturing, Event::Captured(_)) => Processing,
        (Capturing, Event::CaptureFailed) => Failed,
        (Processing, Event::Processed(_)) => Printing,
        (Printing, Event::Printed) => Waiting,
        (Failed, Event::Recovered) => Waiting,
        _ => return Err(InvalidTransition::new(state, event)),
    };
    Ok(next)
}

/// Data of the running trigger-to-print cycle; cleared on entering `Waiting`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Session {
    pub captures: Option<CaptureSet>,
    pub artifact: Option<PathBuf>,
}

/// How a completed cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cycle {
    Printed(PathBuf),
    Failed,
}

/// Hardware collaborators of the booth.
pub struct Peripherals {
    pub camera: Box<dyn CameraDriver>,
    pub indicator: Box<dyn Indicator>,
    pub printer: Box<dyn Printer>,
    pub trigger: Box<dyn Trigger>,
}

pub struct PhotoBooth {
    state: State,
    session: Session,
    camera: CameraSession,
    processor: Arc<CaptureProcessor>,
    indicator: Box<dyn Indicator>,
    printer: Box<dyn Printer>,
    trigger: Box<dyn Trigger>,
    capture_count: usize,
    delay: Duration,
    capture_directory: PathBuf,
    output_directory: PathBuf,
    output_extension: String,
    printing: PrintingConfig,
}

impl PhotoBooth {
    /// Resolves the template, capture count and filters before any hardware
    /// is touched.
    pub fn new(cfg: &Configuration, peripherals: Peripherals) -> Result<Self, ConfigurationError> {
        let processor = CaptureProcessor::from_config(&cfg.processing)?;
        let capture_count = cfg.camera.effective_capture_count(processor.template())?;
        Ok(Self {
            state: State::Initialization,
            session: Session::default(),
            camera: CameraSession::new(peripherals.camera, &cfg.camera.output_directory),
            processor: Arc::new(processor),
            indicator: peripherals.indicator,
            printer: peripherals.printer,
            trigger: peripherals.trigger,
            capture_count,
            delay: cfg.camera.delay,
            capture_directory: cfg.camera.output_directory.clone(),
            output_directory: cfg.processing.output_directory.clone(),
            output_extension: cfg.processing.output_extension.clone(),
            printing: cfg.printing.clone(),
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn capture_count(&self) -> usize {
        self.capture_count
    }

    /// Runs cycles until cancelled or the trigger source closes.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        while self.drive(&cancel).await?.is_some() {}
        Ok(())
    }

    /// Runs a single trigger-to-print cycle. `None` when cancelled or the
    /// trigger closed before a cycle completed.
    pub async fn run_once(&mut self, cancel: CancellationToken) -> Result<Option<Cycle>> {
        self.drive(&cancel).await
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Result<Option<Cycle>> {
        let mut pending = match self.state {
            State::Initialization => self.enter(State::Initialization).await?,
            _ => None,
        };
        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => match self.wait_for_input(cancel).await {
                    Some(event) => event,
                    None => return Ok(None),
                },
            };

            let previous = self.state;
            let next = transition(previous, &event)?;
            debug!(from = ?previous, to = ?next, event = event.name(), "transition");
            let completed = match &event {
                Event::Printed => self.session.artifact.clone().map(Cycle::Printed),
                Event::Recovered => Some(Cycle::Failed),
                _ => None,
            };
            self.absorb(event);
            self.state = next;

            if previous == next {
                continue;
            }
            pending = self.enter(previous).await?;
            if completed.is_some() {
                return Ok(completed);
            }
        }
    }

    async fn wait_for_input(&mut self, cancel: &CancellationToken) -> Option<Event> {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancellation requested; leaving the waiting state");
                None
            }
            input = self.trigger.next_input() => match input {
                Some(pressed) => Some(Event::RegisteredInput { pressed }),
                None => {
                    info!("trigger source closed");
                    None
                }
            },
        }
    }

    fn absorb(&mut self, event: Event) {
        match event {
            Event::Captured(captures) => self.session.captures = Some(captures),
            Event::Processed(artifact) => self.session.artifact = Some(artifact),
            _ => {}
        }
    }

    /// Entry action of the current state. Returns the event it produces, or
    /// `None` when the state waits for the trigger.
    async fn enter(&mut self, previous: State) -> Result<Option<Event>> {
        info!(state = ?self.state, "entering state");
        match self.state {
            State::Initialization => {
                for dir in [&self.capture_directory, &self.output_directory] {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .with_context(|| format!("failed to create {}", dir.display()))?;
                }
                Ok(Some(Event::Initialized))
            }
            State::Waiting => {
                self.session = Session::default();
                if previous == State::Initialization {
                    self.indicator.blink(BlinkPattern::IDLE);
                } else {
                    self.indicator.off();
                    // presses made during the cycle do not start the next one
                    self.trigger.discard_pending();
                }
                info!("ready; waiting for the trigger");
                Ok(None)
            }
            State::Capturing => {
                let result = capture_sequence(
                    &mut self.camera,
                    self.indicator.as_mut(),
                    self.capture_count,
                    self.delay,
                )
                .await;
                Ok(Some(match result {
                    Ok(captures) => Event::Captured(captures),
                    Err(err) => {
                        error!("capture failed: {err}");
                        Event::CaptureFailed
                    }
                }))
            }
            State::Processing => {
                let captures = self
                    .session
                    .captures
                    .clone()
                    .context("processing entered without a capture set")?;
                let output = self.output_path(&captures.directory);
                let processor = Arc::clone(&self.processor);
                let target = output.clone();
                tokio::task::spawn_blocking(move || processor.process(&captures.files, &target))
                    .await
                    .context("processing task panicked")?
                    .context("failed to process captures")?;
                info!(output = %output.display(), "montage ready");
                Ok(Some(Event::Processed(output)))
            }
            State::Printing => {
                let artifact = self
                    .session
                    .artifact
                    .clone()
                    .context("printing entered without an artifact")?;
                self.print(&artifact).await;
                if !self.printing.post_print_delay.is_zero() {
                    tokio::time::sleep(self.printing.post_print_delay).await;
                }
                Ok(Some(Event::Printed))
            }
            State::Failed => {
                let pattern = BlinkPattern::FAULT;
                self.indicator.blink(pattern);
                if let Some(length) = pattern.length() {
                    tokio::time::sleep(length).await;
                }
                Ok(Some(Event::Recovered))
            }
        }
    }

    async fn print(&self, artifact: &Path) {
        if !self.printing.enabled {
            info!(path = %artifact.display(), "printing disabled; skipping");
            return;
        }
        let job = PrintJob::from(&self.printing);
        if let Err(err) = self.printer.print(artifact, &job).await {
            warn!("print failed, montage kept at {}: {err}", artifact.display());
        }
    }

    fn output_path(&self, capture_directory: &Path) -> PathBuf {
        let stem = capture_directory
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string());
        self.output_directory
            .join(format!("{stem}.{}", self.output_extension.trim_start_matches('.')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured() -> Event {
        Event::Captured(CaptureSet {
            directory: PathBuf::from("/tmp/session"),
            files: Vec::new(),
        })
    }

    #[test]
    fn follows_the_cycle() {
        let steps = [
            (State::Initialization, Event::Initialized, State::Waiting),
            (
                State::Waiting,
                Event::RegisteredInput { pressed: true },
                State::Capturing,
            ),
            (State::Capturing, captured(), State::Processing),
            (
                State::Processing,
                Event::Processed(PathBuf::from("a.jpg")),
                State::Printing,
            ),
            (State::Printing, Event::Printed, State::Waiting),
        ];
        for (from, event, to) in steps {
            assert_eq!(transition(from, &event).unwrap(), to, "{from:?} on {event:?}");
        }
    }

    #[test]
    fn unpressed_input_keeps_waiting() {
        assert_eq!(
            transition(State::Waiting, &Event::RegisteredInput { pressed: false }).unwrap(),
            State::Waiting
        );
    }

    #[test]
    fn failure_recovers_to_waiting() {
        assert_eq!(
            transition(State::Capturing, &Event::CaptureFailed).unwrap(),
            State::Failed
        );
        assert_eq!(
            transition(State::Failed, &Event::Recovered).unwrap(),
            State::Waiting
        );
    }

    #[test]
    fn rejects_events_out_of_order() {
        let err = transition(State::Waiting, &captured()).unwrap_err();
        assert_eq!(err.state, State::Waiting);
        assert_eq!(err.event, "captured");
        assert!(transition(State::Processing, &Event::CaptureFailed).is_err());
        assert!(transition(State::Failed, &Event::RegisteredInput { pressed: true }).is_err());
        assert!(transition(State::Initialization, &Event::Printed).is_err());
    }
}

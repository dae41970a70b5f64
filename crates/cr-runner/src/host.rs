//! Background host: runs one optimization at a time on a worker thread and
//! talks to its owner through tagged command/event messages.
//!
//! Commands arrive as [`HostCommand`]s; the host answers with a stream of
//! [`HostEvent`]s on the channel returned by [`OptimizationHost::events`].
//! Every run ends with exactly one `done` or `error` event, and all of its
//! `progress` events are delivered before that terminal event.

use std::io::{BufRead, Write};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cr_optimizer::{CancellationToken, Progress, RunControl};
use cr_types::{internal_error, CrError, CrResult, EvaluationRecord, SearchResult, SearchSpace};

use crate::runner::{run_optimization_with, RunParams};

/// Inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostCommand {
    Start {
        payload: RunParams,
        /// Custom search space; the process defaults apply when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<SearchSpace>,
    },
    Cancel,
}

impl HostCommand {
    pub fn from_json(line: &str) -> CrResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HostEvent {
    Progress {
        evaluation: usize,
        budget: usize,
        best: EvaluationRecord,
    },
    Done {
        result: Box<SearchResult>,
    },
    Error {
        message: String,
        cancelled: bool,
        #[serde(rename = "partialHistory", default)]
        partial_history: Vec<EvaluationRecord>,
    },
}

impl HostEvent {
    pub fn to_json(&self) -> CrResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            cancelled: false,
            partial_history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

impl From<Progress> for HostEvent {
    fn from(p: Progress) -> Self {
        Self::Progress {
            evaluation: p.evaluation,
            budget: p.budget,
            best: p.best,
        }
    }
}

impl From<CrError> for HostEvent {
    fn from(err: CrError) -> Self {
        let message = err.to_string();
        match err {
            CrError::Cancelled {
                partial_history, ..
            } => Self::Error {
                message,
                cancelled: true,
                partial_history,
            },
            _ => Self::rejected(message),
        }
    }
}

struct ActiveRun {
    token: CancellationToken,
    worker: JoinHandle<()>,
}

/// Owns the worker thread of the current run and the outbound event channel.
pub struct OptimizationHost {
    events_tx: Sender<HostEvent>,
    events_rx: Receiver<HostEvent>,
    active: Option<ActiveRun>,
}

impl Default for OptimizationHost {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizationHost {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            events_tx,
            events_rx,
            active: None,
        }
    }

    /// Receiver for every event the host emits.
    pub fn events(&self) -> &Receiver<HostEvent> {
        &self.events_rx
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| !run.worker.is_finished())
    }

    pub fn handle(&mut self, command: HostCommand) -> CrResult<()> {
        match command {
            HostCommand::Start { payload, bounds } => self.start(payload, bounds),
            HostCommand::Cancel => {
                self.cancel();
                Ok(())
            }
        }
    }

    /// Launch a run in the background. A start while another run is active is
    /// answered with an error event and leaves the active run untouched.
    pub fn start(&mut self, params: RunParams, bounds: Option<SearchSpace>) -> CrResult<()> {
        if self.is_running() {
            warn!("start rejected: a run is already active");
            self.emit(HostEvent::rejected("an optimization run is already active"));
            return Ok(());
        }
        self.reap();

        let token = CancellationToken::new();
        let (progress_tx, progress_rx) = unbounded::<Progress>();
        let control = RunControl::new()
            .with_cancellation(token.clone())
            .with_progress(progress_tx);

        let forward_tx = self.events_tx.clone();
        let forwarder = thread::Builder::new()
            .name("crucible-progress".into())
            .spawn(move || {
                for progress in progress_rx {
                    if forward_tx.send(progress.into()).is_err() {
                        break;
                    }
                }
            })?;

        let events_tx = self.events_tx.clone();
        let worker = thread::Builder::new()
            .name("crucible-run".into())
            .spawn(move || {
                let outcome = run_optimization_with(&params, bounds, &control);
                // Closing the progress sender lets the forwarder drain and exit.
                drop(control);
                if forwarder.join().is_err() {
                    warn!("progress forwarder panicked");
                }
                let event = match outcome {
                    Ok(result) => HostEvent::Done {
                        result: Box::new(result),
                    },
                    Err(e) => HostEvent::from(e),
                };
                let _ = events_tx.send(event);
            })?;

        info!("optimization run started");
        self.active = Some(ActiveRun { token, worker });
        Ok(())
    }

    /// Ask the active run to stop after its current evaluation.
    pub fn cancel(&mut self) {
        match &self.active {
            Some(run) if !run.worker.is_finished() => {
                info!("cancelling optimization run");
                run.token.cancel();
            }
            _ => debug!("cancel ignored: no active run"),
        }
    }

    /// Block until the active run, if any, has emitted its terminal event.
    pub fn wait(&mut self) {
        self.reap();
    }

    fn reap(&mut self) {
        if let Some(run) = self.active.take() {
            if run.worker.join().is_err() {
                warn!("optimization worker panicked");
                self.emit(HostEvent::rejected("optimization worker panicked"));
            }
        }
    }

    fn emit(&self, event: HostEvent) {
        // The host holds its own receiver, so this only fails after teardown.
        let _ = self.events_tx.send(event);
    }
}

impl Drop for OptimizationHost {
    fn drop(&mut self) {
        if let Some(run) = &self.active {
            run.token.cancel();
        }
        self.reap();
    }
}

/// Drive a host from JSON-lines commands on `input`, writing one event per
/// line to `output`. Malformed lines are logged and skipped. At end of input
/// the active run finishes before the event stream closes; the writer is
/// handed back once every event has been written.
pub fn serve<R, W>(input: R, output: W) -> CrResult<W>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let mut host = OptimizationHost::new();
    let events = host.events().clone();
    let printer = thread::Builder::new()
        .name("crucible-events".into())
        .spawn(move || -> CrResult<W> {
            let mut output = output;
            for event in events {
                writeln!(output, "{}", event.to_json()?)?;
                output.flush()?;
            }
            Ok(output)
        })?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match HostCommand::from_json(&line) {
            Ok(command) => host.handle(command)?,
            Err(e) => warn!(error = %e, "ignoring malformed command"),
        }
    }

    host.wait();
    drop(host);
    printer
        .join()
        .map_err(|_| internal_error!("event printer panicked"))?
}

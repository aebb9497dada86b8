use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use super::error::{ErrorKind, MergeError, Outcome};
use super::job::{CancelToken, JobOptions, execute};
use super::request::ValidatedRequest;
use crate::engine::EngineStatus;
use crate::engine::runner::{EngineRunner, ProcessRunner};

/// Notification sent from the worker to the owner of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Progress(u8),
    /// Something the owner should show, without affecting the outcome.
    Warning(String),
    /// Always the last event of a job, sent exactly once.
    Finished(Outcome),
}

/// The owner's view of one merge running on its own worker thread.
///
/// The worker only talks to the handle through a channel; progress and
/// outcome are updated when the owner drains it with [`poll`](Self::poll) or
/// blocks on [`wait`](Self::wait).
pub struct MergeJobHandle {
    request: ValidatedRequest,
    progress: u8,
    outcome: Outcome,
    cancel: CancelToken,
    events: Receiver<JobEvent>,
    worker: Option<JoinHandle<()>>,
}

/// Start a merge using the located engine.
pub fn submit(
    request: ValidatedRequest,
    engine: &EngineStatus,
    options: JobOptions,
) -> Result<MergeJobHandle, MergeError> {
    let binary = engine
        .binary()
        .ok_or_else(|| MergeError::EngineUnavailable(engine.diagnostic()))?;
    Ok(submit_with(
        request,
        Box::new(ProcessRunner::new(binary)),
        options,
    ))
}

pub fn submit_with(
    request: ValidatedRequest,
    runner: Box<dyn EngineRunner>,
    options: JobOptions,
) -> MergeJobHandle {
    let (tx, events) = mpsc::channel();
    let cancel = CancelToken::new();

    let worker_request = request.clone();
    let worker_cancel = cancel.clone();
    let worker = thread::spawn(move || {
        let progress_tx = tx.clone();
        let warning_tx = tx.clone();
        let outcome = execute(
            &worker_request,
            runner.as_ref(),
            &options,
            &mut |percent: u8| {
                let _ = progress_tx.send(JobEvent::Progress(percent));
            },
            &mut |message: String| {
                let _ = warning_tx.send(JobEvent::Warning(message));
            },
            &worker_cancel,
        );
        let _ = tx.send(JobEvent::Finished(outcome));
    });

    MergeJobHandle {
        request,
        progress: 0,
        outcome: Outcome::Pending,
        cancel,
        events,
        worker: Some(worker),
    }
}

impl MergeJobHandle {
    pub fn request(&self) -> &ValidatedRequest {
        &self.request
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_terminal()
    }

    /// Ask the worker to stop. No-op once the outcome is known.
    pub fn cancel(&self) {
        if !self.is_finished() {
            self.cancel.cancel();
        }
    }

    /// Drain pending notifications without blocking, in the order sent.
    pub fn poll(&mut self) -> Vec<JobEvent> {
        let mut received = Vec::new();
        while !self.is_finished() {
            match self.events.try_recv() {
                Ok(event) => {
                    self.apply(&event);
                    received.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    received.push(self.worker_vanished());
                }
            }
        }
        received
    }

    /// Block until the job reaches its terminal outcome.
    pub fn wait(&mut self) -> &Outcome {
        while !self.is_finished() {
            match self.events.recv() {
                Ok(event) => self.apply(&event),
                Err(_) => {
                    self.worker_vanished();
                }
            }
        }
        &self.outcome
    }

    fn apply(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Progress(percent) => self.progress = self.progress.max(*percent),
            JobEvent::Warning(_) => {}
            JobEvent::Finished(outcome) => {
                self.outcome = outcome.clone();
                if let Some(worker) = self.worker.take() {
                    let _ = worker.join();
                }
            }
        }
    }

    /// The worker hung up without a terminal event, which only happens if it panicked.
    fn worker_vanished(&mut self) -> JobEvent {
        let event = JobEvent::Finished(Outcome::Failed {
            kind: ErrorKind::EngineExecutionFailed,
            detail: "The merge worker stopped unexpectedly".to_string(),
        });
        self.apply(&event);
        event
    }
}

impl Drop for MergeJobHandle {
    fn drop(&mut self) {
        // An abandoned job should not keep ffmpeg running.
        self.cancel();
    }
}

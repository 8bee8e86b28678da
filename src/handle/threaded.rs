use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use ignore_result::Ignore;
use log::{debug, warn};
use tokio::sync::mpsc;

use super::driver::Step;
use super::errors::{DigestError, ErrorKind, Result};
use super::{Scheduler, Shared};

/// Completed result awaiting delivery in caller's runtime.
pub(crate) enum Dispatch {
    Feed(Bytes, Result<()>),
    Digest(Result<Bytes>),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
enum Command {
    #[strum(serialize = "a")]
    Available,
    #[strum(serialize = "c")]
    Cancel,
}

enum Feedback {
    Dispatch,
    Finished,
}

struct Worker {
    commands: mpsc::UnboundedSender<Command>,
    feedback: mpsc::UnboundedSender<Feedback>,
    cancelled: Arc<AtomicBool>,
}

impl Worker {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("worker gone, drop command {}", command);
        }
    }
}

/// Dedicated worker thread per handle.
///
/// Backend calls happen in worker thread, their results are queued and relayed to a feedback
/// task in caller's runtime which invokes callbacks.
#[derive(Default)]
pub(crate) struct ThreadedScheduler {
    worker: Option<Worker>,
    dispatches: Vec<Dispatch>,
}

impl ThreadedScheduler {
    pub fn start(&mut self, shared: &Arc<Shared>, refcnt: &mut u32) -> Result<()> {
        if let Some(worker) = &self.worker {
            worker.send(Command::Available);
            return Ok(());
        }
        let (commands, receiver) = mpsc::unbounded_channel();
        let (feedback, feedback_receiver) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker = Worker { commands, feedback: feedback.clone(), cancelled: cancelled.clone() };
        let handle = shared.clone();
        thread::Builder::new()
            .name(format!("digest-worker-{}", shared.id))
            .spawn(move || run_worker(handle, receiver, feedback, cancelled))
            .map_err(|e| DigestError::new(ErrorKind::OutOfResources).cause_by(e))?;
        // Reference owned by worker thread, released after it finished.
        *refcnt += 1;
        shared.runtime.spawn(relay_feedback(RelayLifetime::new(shared.clone()), feedback_receiver));
        worker.send(Command::Available);
        self.worker = Some(worker);
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(worker) = &self.worker {
            worker.cancelled.store(true, Ordering::Release);
            worker.send(Command::Cancel);
        }
    }

    pub fn dispatch(&mut self, dispatch: Dispatch) {
        self.dispatches.push(dispatch);
        if let Some(worker) = &self.worker {
            worker.feedback.send(Feedback::Dispatch).ignore();
        }
    }

    pub fn take_dispatches(&mut self) -> Vec<Dispatch> {
        std::mem::take(&mut self.dispatches)
    }

    #[cfg(test)]
    pub fn undelivered(&self) -> usize {
        self.dispatches.len()
    }
}

struct FinishGuard(mpsc::UnboundedSender<Feedback>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.send(Feedback::Finished).ignore();
    }
}

fn run_worker(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    feedback: mpsc::UnboundedSender<Feedback>,
    cancelled: Arc<AtomicBool>,
) {
    let _finish = FinishGuard(feedback);
    debug!("handle {} worker started", shared.id);
    let is_cancelled = || cancelled.load(Ordering::Acquire);
    while let Some(Command::Available) = commands.blocking_recv() {
        while !is_cancelled() && shared.has_pending() {
            match shared.feed_blob() {
                Step::Retry => thread::yield_now(),
                Step::Failed => break,
                Step::Idle | Step::Partial | Step::Completed => {},
            }
        }
        while !is_cancelled() && shared.is_receiving() {
            match shared.receive_digest() {
                Step::Retry => thread::yield_now(),
                Step::Idle | Step::Failed => break,
                Step::Partial | Step::Completed => {},
            }
        }
    }
    debug!("handle {} worker finished", shared.id);
}

/// Relay side of worker lifetime. Stops the worker if the relay task is dropped before worker
/// finished, which happens when caller's runtime shuts down.
struct RelayLifetime {
    shared: Arc<Shared>,
    finished: bool,
}

impl RelayLifetime {
    fn new(shared: Arc<Shared>) -> Self {
        RelayLifetime { shared, finished: false }
    }
}

impl Drop for RelayLifetime {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(
            "handle {} lost its runtime before worker finished, backend cleanup and context free are skipped",
            self.shared.id
        );
        self.shared.stop();
    }
}

async fn relay_feedback(mut lifetime: RelayLifetime, mut feedback: mpsc::UnboundedReceiver<Feedback>) {
    while let Some(Feedback::Dispatch) = feedback.recv().await {
        lifetime.shared.relay_dispatches();
    }
    lifetime.finished = true;
    lifetime.shared.worker_finished();
}

impl Shared {
    fn relay_dispatches(self: &Arc<Self>) {
        let dispatches = match &mut self.state().scheduler {
            Scheduler::Threaded(scheduler) => scheduler.take_dispatches(),
            Scheduler::Cooperative(_) => return,
        };
        if dispatches.is_empty() {
            return;
        }
        self.ref_();
        for dispatch in dispatches {
            if !self.is_deleted() {
                self.deliver(dispatch);
            } else if let Dispatch::Feed(input, _) = dispatch {
                self.notify_feed_done(input, Err(DigestError::new(ErrorKind::Cancelled)));
            }
        }
        self.unref();
    }

    fn worker_finished(self: &Arc<Self>) {
        if let Scheduler::Threaded(scheduler) = &mut self.state().scheduler {
            scheduler.worker = None;
        }
        self.relay_dispatches();
        self.unref();
    }
}

//! # Async queue workers.
//!
//! Each worker loops over the shared bounded queue: a [`Envelope::Work`]
//! entry runs the central handle path and settles its completion, a
//! [`Envelope::Stop`] entry makes the worker exit and acknowledge on the
//! close channel. `Stop` entries are emitted only by the shutdown drain,
//! one per worker still alive.
//!
//! A panicking handler is contained here: the panic is caught, the
//! completion fails with
//! [`BusError::HandlerPanicked`](crate::BusError::HandlerPanicked), and
//! the worker keeps serving.

use std::any::Any;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::bus::Core;
use crate::command::CommandRef;
use crate::completion::Completion;
use crate::error::BusError;
use crate::handler::{Handler, Outcome};

/// One unit of queued work: the resolved handler, the command, and the
/// completion to settle.
pub(crate) struct Job {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) command: CommandRef,
    pub(crate) completion: Arc<Completion>,
}

/// Element of the async queue.
pub(crate) enum Envelope {
    Work(Job),
    Stop,
}

/// Receiver end of the async queue, shared by the pool.
///
/// The lock is held only across the `recv`, never across handler
/// execution.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Envelope>>>;

pub(crate) async fn run(
    id: usize,
    core: Arc<Core>,
    queue: SharedReceiver,
    closed: mpsc::Sender<bool>,
) {
    trace!(worker = id, "worker started");
    loop {
        let envelope = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        match envelope {
            Some(Envelope::Work(job)) => match guarded(&core, &job).await {
                Ok(data) => job.completion.succeed(data),
                Err(err) => job.completion.fail(err),
            },
            Some(Envelope::Stop) | None => break,
        }
    }
    trace!(worker = id, "worker stopped");
    let _ = closed.send(true).await;
}

/// Runs the central handle path with panic containment.
async fn guarded(core: &Core, job: &Job) -> Outcome {
    let invocation = core.execute(&job.handler, job.command.clone());
    match std::panic::AssertUnwindSafe(invocation).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let err = BusError::HandlerPanicked(panic_message(&panic)).shared();
            core.fan_out(Some(&job.command), &err).await;
            Err(err)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(inner) = panic.downcast_ref::<Box<dyn Any + Send>>() {
        eprintln!(
            "DEBUG inner is_str={} is_string={}",
            inner.is::<&str>(),
            inner.is::<String>(),
        );
    }
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

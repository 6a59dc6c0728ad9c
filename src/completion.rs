//! # One-shot completion for async submissions.
//!
//! [`Completion`] is the object handed back by
//! [`Bus::handle_async`](crate::Bus::handle_async): pending at
//! construction, done once a worker settles it. It supports two
//! notification styles, usable together:
//!
//! - [`wait`](Completion::wait) suspends until the outcome is recorded;
//!   any number of tasks may wait and all observe the same final outcome.
//! - [`set_listener`](Completion::set_listener) registers at most one
//!   callback, invoked exactly once: at the done transition if registered
//!   before it, inline on the registering thread if registered after.
//!
//! The first of `succeed`/`fail` wins; later settle calls are no-ops. One
//! mutex guards the outcome and the listener slot together, so the
//! listener race (registration concurrent with the done transition)
//! resolves to exactly one invocation on whichever side observes the
//! other first.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::DynError;
use crate::handler::{Data, Outcome};

type Listener = Box<dyn FnOnce(Outcome) + Send + 'static>;

#[derive(Default)]
struct State {
    outcome: Option<Outcome>,
    listener: Option<Listener>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("outcome", &self.outcome)
            .field("listener", &self.listener.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// One-shot result holder for a single async submission.
#[derive(Debug)]
pub struct Completion {
    state: Mutex<State>,
    done: Notify,
}

impl Completion {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            done: Notify::new(),
        }
    }

    /// Returns whether the completion has been settled.
    pub fn is_done(&self) -> bool {
        self.lock().outcome.is_some()
    }

    /// Suspends until the completion is settled, then returns the final
    /// outcome. Returns immediately when already done. Every caller
    /// observes the same outcome.
    pub async fn wait(&self) -> Outcome {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(outcome) = self.lock().outcome.clone() {
                return outcome;
            }
            notified.await;
        }
    }

    /// Registers the completion's listener.
    ///
    /// If the completion is already done, `f` runs inline on the calling
    /// thread before this returns. Otherwise it runs exactly once at the
    /// done transition. At most one listener is live; registering again
    /// before the first has fired replaces it.
    pub fn set_listener(&self, f: impl FnOnce(Outcome) + Send + 'static) {
        let outcome = {
            let mut state = self.lock();
            match state.outcome.clone() {
                Some(outcome) => outcome,
                None => {
                    state.listener = Some(Box::new(f));
                    return;
                }
            }
        };
        f(outcome);
    }

    pub(crate) fn succeed(&self, data: Option<Data>) {
        self.settle(Ok(data));
    }

    pub(crate) fn fail(&self, err: DynError) {
        self.settle(Err(err));
    }

    fn settle(&self, outcome: Outcome) {
        let listener = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            state.listener.take()
        };
        self.done.notify_waiters();
        if let Some(listener) = listener {
            listener(outcome);
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

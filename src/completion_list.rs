//! # Aggregation over multiple completions.
//!
//! [`CompletionList`] collects the completions of one batch submission
//! ([`Bus::handle_async_list`](crate::Bus::handle_async_list)) and offers
//! two consumption styles:
//!
//! - [`join`](CompletionList::join): wait for everything, get one result
//!   per completion in the list's original order.
//! - [`arrivals`](CompletionList::arrivals): a channel yielding results
//!   in the order they complete, each tagged with its original position.
//!
//! Positions are fixed at the moment iteration starts; pushing more
//! completions after that is outside the contract and its arrivals would
//! be lost.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::completion::Completion;
use crate::error::BusError;
use crate::handler::Outcome;

/// One result delivered by [`CompletionList::arrivals`], tagged with the
/// completion's position in the list.
#[derive(Debug)]
pub struct Arrival {
    pub index: usize,
    pub outcome: Outcome,
}

/// Ordered aggregator over N completions.
#[derive(Default, Debug)]
pub struct CompletionList {
    completions: Vec<Arc<Completion>>,
}

impl CompletionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a completion. Only valid before iteration starts.
    pub fn push(&mut self, completion: Arc<Completion>) {
        self.completions.push(completion);
    }

    pub fn len(&self) -> usize {
        self.completions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }

    /// Waits for every completion and returns their outcomes indexed by
    /// original position: `results[i]` belongs to the i-th completion
    /// pushed. Returns [`BusError::EmptyAwaitList`] on an empty list.
    pub async fn join(&self) -> Result<Vec<Outcome>, BusError> {
        let mut arrivals = self.arrivals()?;
        let mut results: Vec<Outcome> = vec![Ok(None); self.completions.len()];
        while let Some(arrival) = arrivals.recv().await {
            results[arrival.index] = arrival.outcome;
        }
        Ok(results)
    }

    /// Returns a channel delivering outcomes in arrival order.
    ///
    /// The channel is buffered to the list's length and closes after the
    /// last arrival. Completions that are already done deliver
    /// synchronously during this call and therefore appear first.
    /// Returns [`BusError::EmptyAwaitList`] on an empty list.
    pub fn arrivals(&self) -> Result<mpsc::Receiver<Arrival>, BusError> {
        if self.completions.is_empty() {
            return Err(BusError::EmptyAwaitList);
        }
        let (tx, rx) = mpsc::channel(self.completions.len());
        for (index, completion) in self.completions.iter().enumerate() {
            let tx = tx.clone();
            completion.set_listener(move |outcome| {
                // Capacity equals the listener count, so this cannot be
                // full; the sender drops with the closure, and the channel
                // closes once the last listener has fired.
                let _ = tx.try_send(Arrival { index, outcome });
            });
        }
        Ok(rx)
    }
}

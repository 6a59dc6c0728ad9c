//! # Schedule processor.
//!
//! A dedicated task owning the set of scheduled commands. After every
//! mutation (add, remove, a schedule firing) it recomputes the next
//! wakeup as the minimum `following()` across entries and sleeps until
//! then, or for an hour when there is nothing to wait for. Due commands
//! are pushed straight onto the bus's async queue with a throwaway
//! completion; they were validated and resolved at
//! [`Bus::schedule`](crate::Bus::schedule) time, and the handler set is
//! frozen after initialization, so no re-validation happens here.
//!
//! The entries map and the sleep computation live under one lock. The
//! queue send inside the scan may suspend while holding it; producers
//! into this lock never require queue capacity themselves, so the loop
//! stays deadlock-free as long as the workers keep draining.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::select;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::CommandRef;
use crate::completion::Completion;
use crate::handler::Handler;
use crate::latch::Flag;
use crate::schedule::Schedule;
use crate::worker::{Envelope, Job};

/// Sleep horizon when no entry has a computed trigger instant.
const IDLE_SLEEP: Duration = Duration::from_secs(60 * 60);

/// A command bound to its resolved handler and its schedule.
pub(crate) struct ScheduledCommand {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) command: CommandRef,
    pub(crate) schedule: Box<dyn Schedule>,
}

/// Handle to the processor task.
pub(crate) struct ScheduleProcessor {
    inner: Arc<Inner>,
}

struct Inner {
    entries: Mutex<HashMap<Uuid, ScheduledCommand>>,
    trigger: Notify,
    shutting_down: Flag,
    queue: mpsc::Sender<Envelope>,
}

impl ScheduleProcessor {
    /// Spawns the processor task feeding the given queue.
    pub(crate) fn spawn(queue: mpsc::Sender<Envelope>) -> Self {
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            trigger: Notify::new(),
            shutting_down: Flag::new(),
            queue,
        });
        tokio::spawn(Inner::process(inner.clone()));
        Self { inner }
    }

    /// Registers an entry under a fresh key and wakes the loop.
    pub(crate) async fn add(&self, entry: ScheduledCommand) -> Uuid {
        let key = Uuid::new_v4();
        self.inner.entries.lock().await.insert(key, entry);
        self.inner.trigger.notify_one();
        key
    }

    /// Removes entries; unknown keys are ignored.
    pub(crate) async fn remove(&self, keys: &[Uuid]) {
        {
            let mut entries = self.inner.entries.lock().await;
            for key in keys {
                entries.remove(key);
            }
        }
        self.inner.trigger.notify_one();
    }

    /// Stops the loop. Entries still registered are dropped with it.
    pub(crate) fn shutdown(&self) {
        if self.inner.shutting_down.raise() {
            self.inner.trigger.notify_one();
        }
    }
}

impl Inner {
    async fn process(self: Arc<Self>) {
        while !self.shutting_down.is_raised() {
            let sleep_for = self.scan().await;
            select! {
                _ = time::sleep(sleep_for) => {}
                _ = self.trigger.notified() => {}
            }
        }
        debug!("schedule processor stopped");
    }

    /// Fires every due entry and returns how long to sleep until the
    /// next trigger instant.
    async fn scan(&self) -> Duration {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut sleep_until: Option<Instant> = None;
        let mut exhausted: Vec<Uuid> = Vec::new();

        for (key, entry) in entries.iter_mut() {
            let mut following = entry.schedule.following();
            if following.is_none() {
                // Freshly added schedule: prime the cursor.
                let _ = entry.schedule.next();
                following = entry.schedule.following();
            }

            if following.map_or(true, |at| now >= at) {
                self.dispatch(entry.handler.clone(), entry.command.clone())
                    .await;
                if entry.schedule.next().is_err() {
                    exhausted.push(*key);
                    continue;
                }
                following = entry.schedule.following();
            }

            if let Some(at) = following {
                sleep_until = Some(match sleep_until {
                    Some(earliest) if earliest <= at => earliest,
                    _ => at,
                });
            }
        }

        for key in &exhausted {
            entries.remove(key);
            debug!(%key, "schedule exhausted, entry removed");
        }

        if entries.is_empty() {
            return IDLE_SLEEP;
        }
        match sleep_until {
            Some(at) => at.saturating_duration_since(now),
            None => IDLE_SLEEP,
        }
    }

    async fn dispatch(&self, handler: Arc<dyn Handler>, command: CommandRef) {
        let identifier = command.identifier();
        let job = Job {
            handler,
            command,
            completion: Arc::new(Completion::new()),
        };
        if self.queue.send(Envelope::Work(job)).await.is_err() {
            warn!(
                command = %identifier,
                "async queue closed, dropping scheduled command"
            );
        }
    }
}

//! # The command bus.
//!
//! [`Bus`] is the top-level component: it owns the configuration, the
//! handler registry, the worker pool, the bounded async queue, and the
//! schedule processor.
//!
//! # Lifecycle
//!
//! ```text
//!   new ──► UNINIT ──initialize──► RUNNING ──shutdown──► DRAINING ──drain complete──► UNINIT
//! ```
//!
//! Entry points validate before any side effect: a missing command,
//! an uninitialized bus, a draining bus, or an unregistered identifier
//! fail with the matching [`BusError`] sentinel, and every such error is
//! copied to the registered error sinks before it is returned.
//!
//! After a completed drain the bus is uninitialized again and may be
//! re-initialized with a fresh handler list; registrations, the frozen
//! middleware, and scheduled entries do not survive the drain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::closure::{ClosureHandler, CLOSURE_IDENTIFIER};
use crate::command::{CommandRef, Identifier};
use crate::completion::Completion;
use crate::completion_list::CompletionList;
use crate::config::Config;
use crate::error::{BusError, DynError};
use crate::handler::{Handler, Outcome};
use crate::latch::{Counter, Flag};
use crate::middleware::{Middleware, Next};
use crate::processor::{ScheduleProcessor, ScheduledCommand};
use crate::schedule::Schedule;
use crate::sink::ErrorSink;
use crate::worker::{self, Envelope, Job};

/// Pre-initialization staging area. Frozen into [`Core`] by
/// [`Bus::initialize`]; the setters no-op once the bus is initialized.
struct Settings {
    config: Config,
    sinks: Vec<Arc<dyn ErrorSink>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

/// Everything built at `initialize` and torn down by the drain: the
/// frozen registry and middleware, the queue producer, and the schedule
/// processor. Workers hold their own `Arc<Core>`, so the queue stays
/// open until the last of them exits.
pub(crate) struct Core {
    registry: HashMap<Identifier, Arc<dyn Handler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    sinks: Vec<Arc<dyn ErrorSink>>,
    queue: mpsc::Sender<Envelope>,
    processor: ScheduleProcessor,
}

impl Core {
    /// Central handle path: the middleware chain down to the handler,
    /// with error fan-out to the sinks.
    pub(crate) async fn execute(&self, handler: &Arc<dyn Handler>, cmd: CommandRef) -> Outcome {
        let outcome = Next::new(&self.middleware, handler.as_ref())
            .run(cmd.clone())
            .await;
        if let Err(err) = &outcome {
            self.fan_out(Some(&cmd), err).await;
        }
        outcome
    }

    pub(crate) async fn fan_out(&self, cmd: Option<&CommandRef>, err: &DynError) {
        for sink in &self.sinks {
            sink.handle(cmd, err).await;
        }
    }
}

struct BusInner {
    settings: RwLock<Settings>,
    initialized: Flag,
    shutting_down: Flag,
    workers: Counter,
    core: RwLock<Option<Arc<Core>>>,
    closed: Mutex<Option<mpsc::Receiver<bool>>>,
}

/// # In-process command bus.
///
/// Cheaply cloneable handle; clones share one bus. Construct with
/// [`Bus::new`], tune with the setters, then call
/// [`initialize`](Bus::initialize) with the handler list. See the crate
/// docs for a complete example.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Creates an uninitialized bus with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates an uninitialized bus with the given [`Config`].
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(BusInner {
                settings: RwLock::new(Settings {
                    config,
                    sinks: Vec::new(),
                    middleware: Vec::new(),
                }),
                initialized: Flag::new(),
                shutting_down: Flag::new(),
                workers: Counter::new(),
                core: RwLock::new(None),
                closed: Mutex::new(None),
            }),
        }
    }

    /// Returns whether [`initialize`](Bus::initialize) has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.is_raised()
    }

    /// Returns whether a shutdown drain is in progress.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.is_raised()
    }

    /// Sets the worker pool size. Defaults to the available hardware
    /// parallelism. No-op once the bus is initialized.
    pub fn set_worker_pool_size(&self, size: usize) {
        if !self.is_initialized() {
            self.settings_mut().config.worker_pool_size = size;
        }
    }

    /// Sets the async queue capacity. Defaults to 100. No-op once the
    /// bus is initialized.
    pub fn set_queue_buffer(&self, buffer: usize) {
        if !self.is_initialized() {
            self.settings_mut().config.queue_buffer = buffer;
        }
    }

    /// Sets the error sinks receiving every error surfaced by the bus.
    /// No-op once the bus is initialized.
    pub fn set_error_sinks(&self, sinks: Vec<Arc<dyn ErrorSink>>) {
        if !self.is_initialized() {
            self.settings_mut().sinks = sinks;
        }
    }

    /// Sets the middleware chain, outermost first. The order is frozen
    /// at initialization and preserved exactly. No-op once the bus is
    /// initialized.
    pub fn set_middleware(&self, middleware: Vec<Arc<dyn Middleware>>) {
        if !self.is_initialized() {
            self.settings_mut().middleware = middleware;
        }
    }

    /// Initializes the bus: registers the handlers, freezes the
    /// configuration, allocates the bounded queue, and spawns the worker
    /// pool and the schedule processor.
    ///
    /// Returns [`BusError::DuplicateHandler`] if two handlers declare the
    /// same identifier; the bus stays uninitialized and a corrected call
    /// may follow. Re-invocation after success is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initialize(&self, handlers: Vec<Arc<dyn Handler>>) -> Result<(), BusError> {
        if !self.inner.initialized.raise() {
            return Ok(());
        }

        let mut registry: HashMap<Identifier, Arc<dyn Handler>> =
            HashMap::with_capacity(handlers.len() + 1);
        for handler in handlers {
            let id = handler.handles();
            if registry.insert(id.clone(), handler).is_some() {
                self.inner.initialized.lower();
                return Err(BusError::DuplicateHandler(id));
            }
        }
        registry
            .entry(CLOSURE_IDENTIFIER)
            .or_insert_with(|| Arc::new(ClosureHandler));

        let (config, middleware, sinks) = {
            let settings = self.settings();
            (
                settings.config.clone(),
                settings.middleware.clone(),
                settings.sinks.clone(),
            )
        };
        let pool = config.worker_pool_size.max(1);
        let buffer = config.queue_buffer.max(1);

        let (queue_tx, queue_rx) = mpsc::channel(buffer);
        let (closed_tx, closed_rx) = mpsc::channel(pool);
        let processor = ScheduleProcessor::spawn(queue_tx.clone());
        let core = Arc::new(Core {
            registry,
            middleware,
            sinks,
            queue: queue_tx,
            processor,
        });

        let shared_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for id in 0..pool {
            self.inner.workers.increment();
            tokio::spawn(worker::run(
                id,
                core.clone(),
                shared_rx.clone(),
                closed_tx.clone(),
            ));
        }

        *lock_write(&self.inner.core) = Some(core);
        *lock_mutex(&self.inner.closed) = Some(closed_rx);
        debug!(workers = pool, buffer, "bus initialized");
        Ok(())
    }

    /// Handles the command on the caller's task and returns the outcome.
    pub async fn handle(&self, cmd: impl Into<Option<CommandRef>>) -> Outcome {
        let (core, handler, cmd) = self.resolve(cmd.into()).await?;
        core.execute(&handler, cmd).await
    }

    /// Submits the command to the worker pool and returns its pending
    /// [`Completion`].
    ///
    /// Suspends while the async queue is full; that backpressure is
    /// intentional.
    pub async fn handle_async(
        &self,
        cmd: impl Into<Option<CommandRef>>,
    ) -> Result<Arc<Completion>, DynError> {
        let (core, handler, cmd) = self.resolve(cmd.into()).await?;
        self.enqueue(&core, handler, cmd).await
    }

    /// Submits a batch. Every command is validated and resolved before
    /// any is enqueued: the first invalid command fails the whole call
    /// with nothing submitted. Once all pass, they are enqueued in the
    /// given order.
    pub async fn handle_async_list(
        &self,
        cmds: Vec<CommandRef>,
    ) -> Result<CompletionList, DynError> {
        let mut resolved = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            resolved.push(self.resolve(Some(cmd)).await?);
        }

        let mut list = CompletionList::new();
        for (core, handler, cmd) in resolved {
            list.push(self.enqueue(&core, handler, cmd).await?);
        }
        Ok(list)
    }

    /// Registers the command for deferred/repeating submission and
    /// returns the key to remove it with.
    pub async fn schedule(
        &self,
        cmd: impl Into<Option<CommandRef>>,
        schedule: impl Schedule + 'static,
    ) -> Result<Uuid, DynError> {
        let (core, handler, cmd) = self.resolve(cmd.into()).await?;
        let key = core
            .processor
            .add(ScheduledCommand {
                handler,
                command: cmd,
                schedule: Box::new(schedule),
            })
            .await;
        Ok(key)
    }

    /// Removes scheduled entries; unknown keys are ignored.
    pub async fn remove_scheduled(&self, keys: &[Uuid]) {
        let core = lock_read(&self.inner.core).clone();
        if let Some(core) = core {
            core.processor.remove(keys).await;
        }
    }

    /// Starts the shutdown drain; returns immediately.
    ///
    /// The drain retires the workers one by one, stops the schedule
    /// processor, and finally returns the bus to the uninitialized
    /// state. Entry points fail with [`BusError::ShuttingDown`] until the
    /// drain completes. Subsequent calls are no-ops.
    pub fn shutdown(&self) {
        if !self.inner.shutting_down.raise() {
            return;
        }

        let core = lock_read(&self.inner.core).clone();
        let Some(core) = core else {
            // Nothing was ever initialized; just release the latch.
            self.inner.shutting_down.lower();
            return;
        };
        let closed = lock_mutex(&self.inner.closed).take();
        let inner = self.inner.clone();
        tokio::spawn(drain(inner, core, closed));
    }

    /// Validates the submission and resolves its handler, fanning every
    /// failure out to the error sinks before surfacing it.
    async fn resolve(
        &self,
        cmd: Option<CommandRef>,
    ) -> Result<(Arc<Core>, Arc<dyn Handler>, CommandRef), DynError> {
        let Some(cmd) = cmd else {
            return Err(self.reject(None, BusError::InvalidCommand).await);
        };
        if !self.is_initialized() {
            return Err(self.reject(Some(&cmd), BusError::NotInitialized).await);
        }
        if self.is_shutting_down() {
            return Err(self.reject(Some(&cmd), BusError::ShuttingDown).await);
        }
        let core = lock_read(&self.inner.core).clone();
        let Some(core) = core else {
            // Initialization is still mid-flight on another task.
            return Err(self.reject(Some(&cmd), BusError::NotInitialized).await);
        };
        let id = cmd.identifier();
        match core.registry.get(&id).cloned() {
            Some(handler) => Ok((core, handler, cmd)),
            None => Err(self.reject(Some(&cmd), BusError::HandlerNotFound(id)).await),
        }
    }

    async fn enqueue(
        &self,
        core: &Arc<Core>,
        handler: Arc<dyn Handler>,
        cmd: CommandRef,
    ) -> Result<Arc<Completion>, DynError> {
        let completion = Arc::new(Completion::new());
        let job = Job {
            handler,
            command: cmd.clone(),
            completion: completion.clone(),
        };
        if core.queue.send(Envelope::Work(job)).await.is_err() {
            // The drain won the race after validation passed.
            return Err(self.reject(Some(&cmd), BusError::ShuttingDown).await);
        }
        Ok(completion)
    }

    async fn reject(&self, cmd: Option<&CommandRef>, err: BusError) -> DynError {
        debug!(error = err.as_label(), "command rejected");
        let err = err.shared();
        let sinks = self.settings().sinks.clone();
        for sink in &sinks {
            sink.handle(cmd, &err).await;
        }
        err
    }

    fn settings(&self) -> std::sync::RwLockReadGuard<'_, Settings> {
        self.inner
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn settings_mut(&self) -> std::sync::RwLockWriteGuard<'_, Settings> {
        self.inner
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Retires the pool one worker at a time: one `Stop` envelope, one
/// acknowledgement, one census decrement. Then stops the schedule
/// processor, drops the core (closing the queue), and lowers both
/// lifecycle latches so the bus can be initialized again.
async fn drain(inner: Arc<BusInner>, core: Arc<Core>, closed: Option<mpsc::Receiver<bool>>) {
    if let Some(mut closed) = closed {
        while inner.workers.get() > 0 {
            if core.queue.send(Envelope::Stop).await.is_err() {
                break;
            }
            if closed.recv().await.is_none() {
                break;
            }
            inner.workers.decrement();
        }
    }
    core.processor.shutdown();
    *lock_write(&inner.core) = None;
    inner.initialized.lower();
    inner.shutting_down.lower();
    debug!("bus drained");
}

fn lock_read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn lock_write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock_mutex<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

//! End-to-end tests driving the bus through its public surface:
//! validation and routing, async dispatch with backpressure, middleware
//! ordering, closure commands, batch aggregation, scheduling, and the
//! shutdown drain.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cmdbus::{
    data, Bus, BusError, ClosureCommand, Command, CommandRef, DynError, ErrorSink, Handler,
    Identifier, Middleware, Next, Outcome, Schedule, CLOSURE_IDENTIFIER,
};

const CMD_A: Identifier = Identifier::from_static("cmd-a");
const CMD_B: Identifier = Identifier::from_static("cmd-b");
const CMD_SLOW: Identifier = Identifier::from_static("cmd-slow");
const CMD_FAIL: Identifier = Identifier::from_static("cmd-fail");
const CMD_TICK: Identifier = Identifier::from_static("cmd-tick");
const CMD_PANIC: Identifier = Identifier::from_static("cmd-panic");

// ---- Commands ----

macro_rules! test_command {
    ($name:ident, $id:expr) => {
        struct $name;

        impl Command for $name {
            fn identifier(&self) -> Identifier {
                $id
            }
        }
    };
}

test_command!(CmdA, CMD_A);
test_command!(CmdB, CMD_B);
test_command!(SlowCmd, CMD_SLOW);
test_command!(FailCmd, CMD_FAIL);
test_command!(TickCmd, CMD_TICK);
test_command!(PanicCmd, CMD_PANIC);
test_command!(FakeClosure, CLOSURE_IDENTIFIER);

fn cmd<C: Command>(command: C) -> CommandRef {
    Arc::new(command)
}

// ---- Errors ----

#[derive(Debug)]
struct TestError(&'static str);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for TestError {}

// ---- Handlers ----

/// Acknowledges without data.
struct AckHandler {
    id: Identifier,
}

#[async_trait]
impl Handler for AckHandler {
    fn handles(&self) -> Identifier {
        self.id.clone()
    }

    async fn handle(&self, _cmd: CommandRef) -> Outcome {
        Ok(None)
    }
}

/// Replies with a fixed payload.
struct ReplyHandler {
    id: Identifier,
    reply: &'static str,
}

#[async_trait]
impl Handler for ReplyHandler {
    fn handles(&self) -> Identifier {
        self.id.clone()
    }

    async fn handle(&self, _cmd: CommandRef) -> Outcome {
        Ok(Some(data(self.reply)))
    }
}

/// Sleeps before acknowledging.
struct SlowHandler {
    delay: Duration,
}

#[async_trait]
impl Handler for SlowHandler {
    fn handles(&self) -> Identifier {
        CMD_SLOW
    }

    async fn handle(&self, _cmd: CommandRef) -> Outcome {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

struct FailHandler;

#[async_trait]
impl Handler for FailHandler {
    fn handles(&self) -> Identifier {
        CMD_FAIL
    }

    async fn handle(&self, _cmd: CommandRef) -> Outcome {
        Err(Arc::new(TestError("command failed")))
    }
}

/// Counts invocations.
struct CountingHandler {
    count: Arc<AtomicU32>,
}

#[async_trait]
impl Handler for CountingHandler {
    fn handles(&self) -> Identifier {
        CMD_TICK
    }

    async fn handle(&self, _cmd: CommandRef) -> Outcome {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

struct PanicHandler;

#[async_trait]
impl Handler for PanicHandler {
    fn handles(&self) -> Identifier {
        CMD_PANIC
    }

    async fn handle(&self, _cmd: CommandRef) -> Outcome {
        panic!("boom");
    }
}

// ---- Sinks ----

#[derive(Default)]
struct StoreSink {
    seen: Mutex<Vec<(Option<Identifier>, DynError)>>,
}

impl StoreSink {
    fn errors(&self) -> Vec<(Option<Identifier>, DynError)> {
        self.seen.lock().unwrap().clone()
    }

    fn labels(&self) -> Vec<&'static str> {
        self.errors()
            .iter()
            .map(|(_, err)| {
                err.downcast_ref::<BusError>()
                    .map(BusError::as_label)
                    .unwrap_or("handler_error")
            })
            .collect()
    }
}

#[async_trait]
impl ErrorSink for StoreSink {
    async fn handle(&self, cmd: Option<&CommandRef>, err: &DynError) {
        self.seen
            .lock()
            .unwrap()
            .push((cmd.map(|c| c.identifier()), err.clone()));
    }
}

// ---- Middleware ----

struct ChainLogger {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for ChainLogger {
    async fn handle(&self, cmd: CommandRef, next: Next<'_>) -> Outcome {
        self.log.lock().unwrap().push(format!("{}-in", self.name));
        let outcome = next.run(cmd).await;
        self.log.lock().unwrap().push(format!("{}-out", self.name));
        outcome
    }
}

/// Fails without ever calling the continuation.
struct FailBefore;

#[async_trait]
impl Middleware for FailBefore {
    async fn handle(&self, _cmd: CommandRef, _next: Next<'_>) -> Outcome {
        Err(Arc::new(TestError("inward failure")))
    }
}

/// Runs the chain below, then replaces its result with an error.
struct FailAfter;

#[async_trait]
impl Middleware for FailAfter {
    async fn handle(&self, cmd: CommandRef, next: Next<'_>) -> Outcome {
        let _ = next.run(cmd).await;
        Err(Arc::new(TestError("outward failure")))
    }
}

// ---- Schedules ----

#[derive(Debug)]
struct Exhausted;

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("schedule exhausted")
    }
}

impl std::error::Error for Exhausted {}

/// Fires once at the given instant.
struct OnceAt {
    at: Instant,
    cursor: Option<Instant>,
    spent: bool,
}

impl OnceAt {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            cursor: None,
            spent: false,
        }
    }
}

impl Schedule for OnceAt {
    fn following(&self) -> Option<Instant> {
        self.cursor
    }

    fn next(&mut self) -> Result<(), DynError> {
        if self.spent {
            return Err(Arc::new(Exhausted));
        }
        self.cursor = Some(self.at);
        self.spent = true;
        Ok(())
    }
}

/// Fires repeatedly with a fixed period, starting one period from the
/// first `next` call.
struct Every {
    period: Duration,
    cursor: Option<Instant>,
}

impl Every {
    fn new(period: Duration) -> Self {
        Self {
            period,
            cursor: None,
        }
    }
}

impl Schedule for Every {
    fn following(&self) -> Option<Instant> {
        self.cursor
    }

    fn next(&mut self) -> Result<(), DynError> {
        let base = self.cursor.unwrap_or_else(Instant::now);
        self.cursor = Some(base + self.period);
        Ok(())
    }
}

// ---- Helpers ----

async fn eventually(limit: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    probe()
}

fn sentinel(err: &DynError) -> Option<&BusError> {
    err.downcast_ref::<BusError>()
}

fn text(outcome: &Outcome) -> &'static str {
    *outcome
        .as_ref()
        .unwrap()
        .as_ref()
        .unwrap()
        .downcast_ref::<&str>()
        .unwrap()
}

// ---- Dispatch & validation ----

#[tokio::test]
async fn handle_routes_to_the_registered_handler() {
    let bus = Bus::new();
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();

    assert!(bus.handle(cmd(CmdA)).await.unwrap().is_none());

    let err = bus.handle(cmd(CmdB)).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::HandlerNotFound(CMD_B)));

    let err = bus.handle(None).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::InvalidCommand));

    bus.shutdown();
}

#[tokio::test]
async fn validation_errors_reach_the_sinks_before_initialize() {
    let bus = Bus::new();
    let sink = Arc::new(StoreSink::default());
    bus.set_error_sinks(vec![sink.clone()]);

    let err = bus.handle(cmd(CmdA)).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::NotInitialized));

    let err = bus.handle(None).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::InvalidCommand));

    assert_eq!(sink.labels(), vec!["bus_not_initialized", "invalid_command"]);
    let errors = sink.errors();
    assert_eq!(errors[0].0, Some(CMD_A));
    assert_eq!(errors[1].0, None);
}

#[tokio::test]
async fn duplicate_handlers_are_rejected_then_a_corrected_call_succeeds() {
    let bus = Bus::new();
    let err = bus
        .initialize(vec![
            Arc::new(AckHandler { id: CMD_A }) as _,
            Arc::new(ReplyHandler {
                id: CMD_B,
                reply: "ok",
            }) as _,
            Arc::new(AckHandler { id: CMD_A }) as _,
        ])
        .unwrap_err();
    assert_eq!(err, BusError::DuplicateHandler(CMD_A));
    assert!(!bus.is_initialized());

    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();
    assert!(bus.handle(cmd(CmdA)).await.unwrap().is_none());
    bus.shutdown();
}

#[tokio::test]
async fn initialize_twice_is_a_noop() {
    let bus = Bus::new();
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_B }) as _])
        .unwrap();

    // The second handler list was ignored.
    let err = bus.handle(cmd(CmdB)).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::HandlerNotFound(CMD_B)));
    bus.shutdown();
}

// ---- Async dispatch ----

#[tokio::test]
async fn async_submissions_complete_with_their_payloads() {
    let bus = Bus::new();
    bus.set_worker_pool_size(4);
    bus.initialize(vec![
        Arc::new(AckHandler { id: CMD_A }) as _,
        Arc::new(ReplyHandler {
            id: CMD_B,
            reply: "ok",
        }) as _,
    ])
    .unwrap();

    let first = bus.handle_async(cmd(CmdA)).await.unwrap();
    let second = bus.handle_async(cmd(CmdB)).await.unwrap();

    assert!(first.wait().await.unwrap().is_none());
    let outcome = second.wait().await;
    assert_eq!(text(&outcome), "ok");
    bus.shutdown();
}

#[tokio::test]
async fn handler_errors_propagate_verbatim_and_reach_the_sinks() {
    let bus = Bus::new();
    let sink = Arc::new(StoreSink::default());
    bus.set_error_sinks(vec![sink.clone()]);
    bus.initialize(vec![Arc::new(FailHandler) as _]).unwrap();

    let completion = bus.handle_async(cmd(FailCmd)).await.unwrap();
    let err = completion.wait().await.unwrap_err();
    assert_eq!(err.to_string(), "command failed");
    assert!(sentinel(&err).is_none());

    assert!(eventually(Duration::from_secs(2), || sink.errors().len() == 1).await);
    assert_eq!(sink.errors()[0].0, Some(CMD_FAIL));
    bus.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_queue_applies_backpressure() {
    let bus = Bus::new();
    bus.set_worker_pool_size(1);
    bus.set_queue_buffer(4);
    let delay = Duration::from_millis(30);
    bus.initialize(vec![Arc::new(SlowHandler { delay }) as _])
        .unwrap();

    let started = Instant::now();
    let mut completions = Vec::new();
    for _ in 0..10 {
        completions.push(bus.handle_async(cmd(SlowCmd)).await.unwrap());
    }
    // With one worker and four queue slots, the overflow submissions
    // could only proceed after handlers finished.
    assert!(started.elapsed() >= delay);

    for completion in completions {
        assert!(completion.wait().await.is_ok());
    }
    bus.shutdown();
}

// ---- Middleware ----

#[tokio::test]
async fn middleware_wraps_in_configured_order() {
    let bus = Bus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.set_middleware(vec![
        Arc::new(ChainLogger {
            name: "l1",
            log: log.clone(),
        }) as _,
        Arc::new(ChainLogger {
            name: "l2",
            log: log.clone(),
        }) as _,
    ]);
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();

    bus.handle(cmd(CmdA)).await.unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["l1-in", "l2-in", "l2-out", "l1-out"]
    );
    bus.shutdown();
}

#[tokio::test]
async fn inward_failure_short_circuits_the_handler() {
    let bus = Bus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.set_middleware(vec![
        Arc::new(ChainLogger {
            name: "l1",
            log: log.clone(),
        }) as _,
        Arc::new(FailBefore) as _,
        Arc::new(ChainLogger {
            name: "l2",
            log: log.clone(),
        }) as _,
    ]);
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();

    let err = bus.handle(cmd(CmdA)).await.unwrap_err();
    assert_eq!(err.to_string(), "inward failure");
    assert_eq!(*log.lock().unwrap(), vec!["l1-in", "l1-out"]);
    bus.shutdown();
}

#[tokio::test]
async fn outward_failure_replaces_the_result() {
    let bus = Bus::new();
    bus.set_middleware(vec![Arc::new(FailAfter) as _]);
    bus.initialize(vec![Arc::new(ReplyHandler {
        id: CMD_B,
        reply: "ok",
    }) as _])
    .unwrap();

    let err = bus.handle(cmd(CmdB)).await.unwrap_err();
    assert_eq!(err.to_string(), "outward failure");
    bus.shutdown();
}

// ---- Closure commands ----

#[tokio::test]
async fn closure_commands_run_through_the_auto_installed_handler() {
    let bus = Bus::new();
    bus.initialize(Vec::new()).unwrap();

    let completion = bus
        .handle_async(ClosureCommand::arc(|| async { Ok(Some(data("foo"))) }))
        .await
        .unwrap();
    let outcome = completion.wait().await;
    assert_eq!(text(&outcome), "foo");

    let err = bus.handle(cmd(FakeClosure)).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::InvalidClosureCommand));
    bus.shutdown();
}

#[tokio::test]
async fn a_caller_supplied_closure_handler_takes_precedence() {
    let bus = Bus::new();
    bus.initialize(vec![Arc::new(ReplyHandler {
        id: CLOSURE_IDENTIFIER,
        reply: "custom",
    }) as _])
    .unwrap();

    // Routed by identifier to the custom handler, never invoked as a
    // closure.
    let outcome = bus
        .handle(ClosureCommand::arc(|| async { Ok(Some(data("ignored"))) }))
        .await;
    assert_eq!(text(&outcome), "custom");
    bus.shutdown();
}

// ---- Batches ----

#[tokio::test]
async fn list_join_restores_positional_order() {
    let bus = Bus::new();
    bus.initialize(vec![
        Arc::new(AckHandler { id: CMD_A }) as _,
        Arc::new(ReplyHandler {
            id: CMD_B,
            reply: "ok",
        }) as _,
    ])
    .unwrap();

    let mut list = bus
        .handle_async_list(vec![
            cmd(CmdA),
            cmd(CmdB),
            ClosureCommand::arc(|| async { Ok(Some(data("bar"))) }),
        ])
        .await
        .unwrap();

    // A fourth, already-completed submission joins the batch.
    let extra = bus
        .handle_async(ClosureCommand::arc(|| async { Ok(Some(data("extra"))) }))
        .await
        .unwrap();
    extra.wait().await.unwrap();
    list.push(extra);

    let results = list.join().await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results[0].as_ref().unwrap().is_none());
    assert_eq!(text(&results[1]), "ok");
    assert_eq!(text(&results[2]), "bar");
    assert_eq!(text(&results[3]), "extra");
    bus.shutdown();
}

#[tokio::test]
async fn already_done_completions_arrive_first() {
    let bus = Bus::new();
    bus.set_worker_pool_size(2);
    bus.initialize(vec![Arc::new(SlowHandler {
        delay: Duration::from_millis(50),
    }) as _])
    .unwrap();

    let done = bus
        .handle_async(ClosureCommand::arc(|| async { Ok(Some(data("early"))) }))
        .await
        .unwrap();
    done.wait().await.unwrap();

    let slow = bus.handle_async(cmd(SlowCmd)).await.unwrap();

    let mut list = cmdbus::CompletionList::new();
    list.push(slow);
    list.push(done);

    let mut arrivals = list.arrivals().unwrap();
    let first = arrivals.recv().await.unwrap();
    assert_eq!(first.index, 1);
    assert_eq!(text(&first.outcome), "early");
    let second = arrivals.recv().await.unwrap();
    assert_eq!(second.index, 0);
    assert!(arrivals.recv().await.is_none());
    bus.shutdown();
}

#[tokio::test]
async fn an_invalid_batch_enqueues_nothing() {
    let bus = Bus::new();
    let count = Arc::new(AtomicU32::new(0));
    bus.initialize(vec![Arc::new(CountingHandler {
        count: count.clone(),
    }) as _])
    .unwrap();

    let err = bus
        .handle_async_list(vec![cmd(TickCmd), cmd(CmdB), cmd(TickCmd)])
        .await
        .unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::HandlerNotFound(CMD_B)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    bus.shutdown();
}

// ---- Scheduling ----

#[tokio::test]
async fn scheduling_requires_an_initialized_bus() {
    let bus = Bus::new();
    let err = bus.schedule(cmd(TickCmd), OnceAt::now()).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::NotInitialized));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn schedules_fire_until_removed() {
    let bus = Bus::new();
    let count = Arc::new(AtomicU32::new(0));
    bus.initialize(vec![Arc::new(CountingHandler {
        count: count.clone(),
    }) as _])
    .unwrap();

    bus.schedule(cmd(TickCmd), OnceAt::now()).await.unwrap();
    let repeating = bus
        .schedule(cmd(TickCmd), Every::new(Duration::from_millis(2)))
        .await
        .unwrap();

    assert!(
        eventually(Duration::from_secs(5), || {
            count.load(Ordering::SeqCst) >= 51
        })
        .await,
        "expected at least 51 executions, got {}",
        count.load(Ordering::SeqCst)
    );

    bus.remove_scheduled(&[repeating]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = count.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), settled);
    bus.shutdown();
}

// ---- Shutdown ----

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_drains_the_pool_and_permits_reinitialization() {
    let bus = Bus::new();
    bus.set_worker_pool_size(1337);
    bus.initialize(vec![Arc::new(SlowHandler {
        delay: Duration::from_millis(100),
    }) as _])
    .unwrap();

    // One in-flight handler while the drain begins.
    let inflight = bus.handle_async(cmd(SlowCmd)).await.unwrap();
    bus.shutdown();
    assert!(bus.is_shutting_down());

    let err = bus.handle_async(cmd(SlowCmd)).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::ShuttingDown));
    let err = bus.handle(cmd(SlowCmd)).await.unwrap_err();
    assert_eq!(sentinel(&err), Some(&BusError::ShuttingDown));

    assert!(inflight.wait().await.is_ok());
    assert!(
        eventually(Duration::from_secs(10), || {
            !bus.is_initialized() && !bus.is_shutting_down()
        })
        .await
    );

    // Registrations did not survive the drain; a fresh list applies.
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();
    assert!(bus.handle(cmd(CmdA)).await.unwrap().is_none());
    bus.shutdown();
}

#[tokio::test]
async fn a_panicking_handler_fails_its_completion_without_killing_the_worker() {
    let bus = Bus::new();
    bus.set_worker_pool_size(1);
    bus.initialize(vec![
        Arc::new(PanicHandler) as _,
        Arc::new(AckHandler { id: CMD_A }) as _,
    ])
    .unwrap();

    let completion = bus.handle_async(cmd(PanicCmd)).await.unwrap();
    let err = completion.wait().await.unwrap_err();
    assert_eq!(
        sentinel(&err),
        Some(&BusError::HandlerPanicked("boom".into()))
    );

    // The single worker survived and keeps serving.
    let completion = bus.handle_async(cmd(CmdA)).await.unwrap();
    assert!(completion.wait().await.is_ok());
    bus.shutdown();
}

// ---- Configuration freeze ----

#[tokio::test]
async fn setters_are_inert_after_initialize() {
    let bus = Bus::new();
    bus.initialize(vec![Arc::new(AckHandler { id: CMD_A }) as _])
        .unwrap();

    let sink = Arc::new(StoreSink::default());
    bus.set_error_sinks(vec![sink.clone()]);

    let _ = bus.handle(cmd(CmdB)).await.unwrap_err();
    assert!(sink.errors().is_empty());
    bus.shutdown();
}

//! # Orchestrator: the control loop.
//!
//! [`Orchestrator::run`] drives every task to a terminal bucket with at most
//! `max_concurrent` sessions creating or running at once.
//!
//! ## Architecture
//! ```text
//!                     ┌──────────── control loop (owns RunState) ────────────┐
//! shutdown rx ──────► │ select! { biased;                                    │
//! (OS / handle)       │   signal  → drain | terminate                        │
//! inbound rx ───────► │   inbound → Created | SubscribeFailed | Status | ... │
//!   ▲                 │   tick    → stall detection                          │
//!   │                 │ }                                                    │
//!   │                 └──────┬───────────────────────────────────────────────┘
//!   │                        │ spawn (off-loop)
//!   ├── creation attempts ◄──┤
//!   ├── subscriptions     ◄──┤
//!   ├── retry timers      ◄──┘
//!   └── client status pushes (StatusSink)
//! ```
//!
//! ## Lifecycle
//! ```text
//! run(tasks):
//!   spawn subscriber listener; install OS signal forwarder
//!   admit up to max_concurrent
//!   loop until pending, waiting and active are all empty
//!   forced? abandon active sessions
//!   cleanup: delete finished sessions per delete_* flags
//!            (forced: also every abandoned session, bounded by grace)
//!   publish RunFinished; flush subscribers; return RunReport
//! ```
//!
//! ## Rules
//! - Only the loop mutates run state; off-loop work reports through `Inbound`.
//! - After the first signal (or the failure limit) nothing new enters `Creating`.
//! - Late messages for tasks the loop no longer tracks are ignored; a late
//!   successful creation is deleted.

use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{SessionClient, SessionHandle, StatusSink, StatusUpdate},
    error::{RuntimeError, SessionError},
    events::{Bus, Event, EventKind},
    policies::RetryDecision,
    report::{FailedTask, FailureKind, RunReport},
    subscribers::{Subscribe, SubscriberSet},
    tasks::{Blueprint, Task},
};

use super::{
    admission::Admission,
    config::OrchestratorConfig,
    inbound::Inbound,
    monitor::{Classification, StallDetector, classify},
    runner::Attempt,
    shutdown::{OsSignals, ShutdownCoordinator, ShutdownHandle, ShutdownPhase, forward_os_signals},
    state::RunState,
};

/// Drives a set of tasks through a [`SessionClient`].
///
/// - Admits tasks in generation order, bounded by `max_concurrent`.
/// - Retries failed creations per the configured [`RetryPolicy`](crate::RetryPolicy).
/// - Classifies pushed statuses into completed / failed / re-queued.
/// - Publishes every lifecycle transition on the [`Bus`].
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use pqvisor::{Behavior, MemoryClient, Orchestrator, OrchestratorConfig, RunConfig, Blueprint};
///
/// # async fn demo(run_cfg: Arc<RunConfig>) -> Result<(), pqvisor::RuntimeError> {
/// let tasks = run_cfg.task_generator()?.generate();
/// let orch = Orchestrator::new(
///     OrchestratorConfig::from_run(&run_cfg),
///     Arc::new(MemoryClient::new(Behavior::default())),
///     Blueprint::new(Arc::clone(&run_cfg)),
///     Vec::new(),
/// );
/// let report = orch.run(tasks).await?;
/// println!("{}", report.headline());
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    cfg: OrchestratorConfig,
    client: Arc<dyn SessionClient>,
    blueprint: Blueprint,
    bus: Bus,
    subs: Vec<Arc<dyn Subscribe>>,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Orchestrator {
    /// Creates an orchestrator; nothing runs until [`run`](Self::run).
    pub fn new(
        cfg: OrchestratorConfig,
        client: Arc<dyn SessionClient>,
        blueprint: Blueprint,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(8);
        Self {
            cfg,
            client,
            blueprint,
            bus,
            subs: subscribers,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Event bus; subscribe before [`run`](Self::run) to see every event.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Handle that interrupts the run like an OS signal.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown_tx.clone())
    }

    /// Runs `tasks` to completion (or until terminated) and reports.
    ///
    /// Returns `Err` only if the loop itself fails; task failures are in the
    /// report.
    pub async fn run(self, tasks: Vec<Task>) -> Result<RunReport, RuntimeError> {
        let Orchestrator {
            cfg,
            client,
            blueprint,
            bus,
            subs,
            shutdown_tx,
            mut shutdown_rx,
        } = self;

        let listener = Listener::spawn(&bus, subs);

        if cfg.handle_os_signals {
            let signals = match OsSignals::install() {
                Ok(s) => s,
                Err(e) => {
                    listener.stop().await;
                    return Err(RuntimeError::Signal(e));
                }
            };
            tokio::spawn(forward_os_signals(signals, shutdown_tx.clone()));
        }
        drop(shutdown_tx);

        let (inbound_tx, mut inbound_rx) = mpsc::channel(cfg.inbound_capacity.max(1));
        let mut run = Run::new(cfg, client, blueprint, bus, inbound_tx, tasks);

        let forced = match run.drive(&mut shutdown_rx, &mut inbound_rx).await {
            Ok(phase) => phase == ShutdownPhase::Terminated,
            Err(e) => {
                run.token.cancel();
                listener.stop().await;
                return Err(e);
            }
        };
        drop(inbound_rx);

        let report = run.finish(forced).await;
        listener.stop().await;
        Ok(report)
    }
}

/// Forwards bus events into the subscriber set until stopped.
struct Listener {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Listener {
    fn spawn(bus: &Bus, subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(subs, bus.clone());
        let stop = CancellationToken::new();
        let token = stop.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    msg = rx.recv() => match msg {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber listener lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = token.cancelled() => {
                        loop {
                            match rx.try_recv() {
                                Ok(ev) => set.emit(&ev),
                                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                                Err(_) => break,
                            }
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        });

        Self { stop, handle }
    }

    /// Delivers what is already on the bus, then flushes every subscriber.
    async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// A session that reached a terminal status and still exists on the platform.
struct Finished {
    task: Task,
    handle: SessionHandle,
    succeeded: bool,
}

/// State of one run; lives inside [`Orchestrator::run`].
struct Run {
    cfg: OrchestratorConfig,
    client: Arc<dyn SessionClient>,
    blueprint: Blueprint,
    bus: Bus,
    inbound: mpsc::Sender<Inbound>,
    token: CancellationToken,
    admission: Admission,
    state: RunState,
    stall: StallDetector,
    shutdown: ShutdownCoordinator,
    failure_limit_reached: bool,
    failures: Vec<FailedTask>,
    finished: Vec<Finished>,
    terminated: Vec<(Task, SessionHandle)>,
}

impl Run {
    fn new(
        cfg: OrchestratorConfig,
        client: Arc<dyn SessionClient>,
        blueprint: Blueprint,
        bus: Bus,
        inbound: mpsc::Sender<Inbound>,
        tasks: Vec<Task>,
    ) -> Self {
        let state = RunState::new(tasks.len());
        let admission = Admission::new(tasks, cfg.max_concurrent_clamped());
        let stall = StallDetector::new(cfg.stall_iterations, cfg.startup_stall_iterations);
        Self {
            cfg,
            client,
            blueprint,
            bus,
            inbound,
            token: CancellationToken::new(),
            admission,
            state,
            stall,
            shutdown: ShutdownCoordinator::new(),
            failure_limit_reached: false,
            failures: Vec::new(),
            finished: Vec::new(),
            terminated: Vec::new(),
        }
    }

    /// Runs the loop until every task is terminal or the run is terminated.
    async fn drive(
        &mut self,
        shutdown_rx: &mut mpsc::Receiver<()>,
        inbound_rx: &mut mpsc::Receiver<Inbound>,
    ) -> Result<ShutdownPhase, RuntimeError> {
        self.fill();

        let period = self.cfg.tick.max(Duration::from_millis(1));
        let mut tick = time::interval_at(time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.admission.is_idle() {
            tokio::select! {
                biased;
                Some(()) = shutdown_rx.recv() => {
                    if self.on_signal() == ShutdownPhase::Terminated {
                        break;
                    }
                }
                msg = inbound_rx.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => {
                        return Err(RuntimeError::InboundClosed {
                            outstanding: self.state.total - self.state.terminal(),
                        });
                    }
                },
                _ = tick.tick() => self.on_tick(),
            }
        }
        Ok(self.shutdown.phase())
    }

    fn handle(&mut self, msg: Inbound) {
        match msg {
            Inbound::Created { task, result } => self.on_created(task, result),
            Inbound::SubscribeFailed {
                task,
                serial,
                error,
            } => self.on_subscribe_failed(task, serial, error),
            Inbound::Status(update) => self.on_status(update),
            Inbound::RetryDue { task } => {
                if self.admission.requeue_front(&task) {
                    self.stall.transition();
                }
            }
        }
        self.fill();
    }

    /// Admits pending tasks while slots are free.
    fn fill(&mut self) {
        while let Some(session) = self.admission.admit() {
            let (task, attempt) = (session.task, session.attempt());
            Attempt {
                client: Arc::clone(&self.client),
                desc: self.blueprint.describe(&task),
                attempt,
                timeout: self.cfg.creation_timeout(),
                parent: self.token.clone(),
                bus: self.bus.clone(),
                inbound: self.inbound.clone(),
            }
            .spawn();
        }
    }

    fn on_created(&mut self, task: Task, result: Result<SessionHandle, SessionError>) {
        match result {
            Ok(handle) => {
                if !self.admission.activate(&task, handle.clone()) {
                    // Task no longer tracked; nobody will watch this session.
                    self.spawn_delete(task, handle);
                    return;
                }
                self.state.created += 1;
                self.stall.transition();
                self.spawn_subscribe(task, handle);
            }
            Err(err) => {
                let Some(session) = self.admission.take(&task) else {
                    return;
                };
                self.stall.transition();
                self.creation_failed(task, session.retry_count, err);
            }
        }
    }

    fn on_subscribe_failed(&mut self, task: Task, serial: u64, error: SessionError) {
        if self.admission.task_for_serial(serial) != Some(task) {
            return;
        }
        let Some(session) = self.admission.take(&task) else {
            return;
        };
        if let Some(handle) = session.handle {
            self.spawn_delete(task, handle);
        }
        self.creation_failed(task, session.retry_count, error);
    }

    fn on_status(&mut self, update: StatusUpdate) {
        let Some(task) = self.admission.task_for_serial(update.serial) else {
            return;
        };
        self.stall.transition();

        match classify(&update.status) {
            Classification::Pending => {
                if let Some(s) = self.admission.get_mut(&task) {
                    s.last_status = Some(update.status.clone());
                }
                self.bus.publish(
                    Event::new(EventKind::StatusChanged)
                        .with_task(task)
                        .with_serial(update.serial)
                        .with_reason(update.status.as_label()),
                );
            }
            Classification::Completed => {
                let Some(session) = self.admission.take(&task) else {
                    return;
                };
                self.stall.terminal();
                self.state.completed += 1;
                if let Some(handle) = session.handle {
                    self.bus.publish(
                        Event::new(EventKind::SessionCompleted)
                            .with_task(task)
                            .with_serial(handle.serial)
                            .with_name(Arc::clone(&handle.name))
                            .with_reason(format!("ran {:.1?}", session.created_at.elapsed())),
                    );
                    self.finished.push(Finished {
                        task,
                        handle,
                        succeeded: true,
                    });
                }
            }
            Classification::FailedExecution { details } => {
                let Some(session) = self.admission.take(&task) else {
                    return;
                };
                self.stall.terminal();
                self.state.failed_execution += 1;
                if let Some(handle) = session.handle {
                    self.bus.publish(
                        Event::new(EventKind::SessionFailed)
                            .with_task(task)
                            .with_serial(handle.serial)
                            .with_name(Arc::clone(&handle.name))
                            .with_reason(details.as_str()),
                    );
                    self.finished.push(Finished {
                        task,
                        handle,
                        succeeded: false,
                    });
                }
                self.failures.push(FailedTask {
                    task,
                    kind: FailureKind::Execution,
                    reason: details,
                });
                self.check_failure_limit();
            }
            Classification::ResourceUnavailable { details } => {
                let Some(session) = self.admission.take(&task) else {
                    return;
                };
                self.bus.publish(
                    Event::new(EventKind::ResourceUnavailable)
                        .with_task(task)
                        .with_serial(update.serial)
                        .with_reason(details.as_str()),
                );
                if let Some(handle) = session.handle {
                    self.spawn_delete(task, handle);
                }
                self.creation_failed(task, session.retry_count, SessionError::fail(details));
            }
        }
    }

    /// Retries or abandons a task whose attempt did not produce a running session.
    fn creation_failed(&mut self, task: Task, retry_count: u32, err: SessionError) {
        self.state.creation_errors += 1;

        if self.shutdown.phase() != ShutdownPhase::Running {
            self.abandon(
                task,
                FailureKind::NotStarted,
                format!("shutting down after: {err}"),
            );
            return;
        }

        match self.cfg.retry.should_retry(&task, retry_count, &err) {
            RetryDecision::RetryAfter(delay) => {
                self.admission.defer(task, retry_count + 1);
                self.bus.publish(
                    Event::new(EventKind::RetryScheduled)
                        .with_task(task)
                        .with_attempt(retry_count + 2)
                        .with_delay(delay)
                        .with_reason(err.to_string()),
                );
                self.spawn_retry_timer(task, delay);
            }
            RetryDecision::Abandon => {
                let kind = if err.is_retryable() {
                    FailureKind::RetriesExhausted
                } else {
                    FailureKind::Fatal
                };
                self.state.failed_creation += 1;
                self.abandon(task, kind, err.to_string());
                self.check_failure_limit();
            }
        }
    }

    fn abandon(&mut self, task: Task, kind: FailureKind, reason: String) {
        self.state.abandoned += 1;
        self.bus.publish(
            Event::new(EventKind::TaskAbandoned)
                .with_task(task)
                .with_reason(format!("{}: {reason}", kind.as_label())),
        );
        self.failures.push(FailedTask { task, kind, reason });
    }

    fn check_failure_limit(&mut self) {
        let Some(limit) = self.cfg.failure_limit() else {
            return;
        };
        if self.failure_limit_reached || self.state.failures() < limit as usize {
            return;
        }
        self.failure_limit_reached = true;
        self.bus.publish(
            Event::new(EventKind::FailureLimitReached).with_reason(format!(
                "{} failed task(s), limit {limit}; {}",
                self.state.failures(),
                self.snapshot()
            )),
        );
        if self.shutdown.drain() {
            self.begin_drain();
        }
    }

    fn on_signal(&mut self) -> ShutdownPhase {
        let phase = self.shutdown.on_signal();
        let snapshot = self.snapshot();
        match phase {
            ShutdownPhase::Draining => {
                self.bus
                    .publish(Event::new(EventKind::ShutdownRequested).with_reason(snapshot));
                self.begin_drain();
            }
            ShutdownPhase::Terminated => {
                self.bus
                    .publish(Event::new(EventKind::ForcedTermination).with_reason(snapshot));
            }
            ShutdownPhase::Running => {}
        }
        phase
    }

    /// Stops admission and abandons every task that has not started.
    fn begin_drain(&mut self) {
        self.state.shutting_down = true;
        for task in self.admission.close() {
            self.abandon(task, FailureKind::NotStarted, "run is shutting down".into());
        }
    }

    fn on_tick(&mut self) {
        if let Some(threshold) = self.stall.tick() {
            self.state.stalls += 1;
            let phase = if self.stall.in_startup() { "startup" } else { "steady" };
            self.bus.publish(
                Event::new(EventKind::StallDetected)
                    .with_attempt(threshold)
                    .with_reason(format!(
                        "no transition for {threshold} ticks ({phase}); {}",
                        self.snapshot()
                    )),
            );
        }
    }

    fn snapshot(&self) -> String {
        self.state.snapshot(
            self.admission.pending_len() + self.admission.waiting_len(),
            self.admission.active_len(),
        )
    }

    fn spawn_subscribe(&self, task: Task, handle: SessionHandle) {
        let client = Arc::clone(&self.client);
        let inbound = self.inbound.clone();
        let sink = StatusSink::new(handle.serial, self.inbound.clone());
        tokio::spawn(async move {
            if let Err(error) = client.subscribe(&handle, sink).await {
                let _ = inbound
                    .send(Inbound::SubscribeFailed {
                        task,
                        serial: handle.serial,
                        error,
                    })
                    .await;
            }
        });
    }

    fn spawn_retry_timer(&self, task: Task, delay: Duration) {
        let token = self.token.clone();
        let inbound = self.inbound.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => {
                    let _ = inbound.send(Inbound::RetryDue { task }).await;
                }
            }
        });
    }

    fn spawn_delete(&self, task: Task, handle: SessionHandle) {
        let client = Arc::clone(&self.client);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            delete_one(client.as_ref(), &bus, task, &handle).await;
        });
    }

    /// Abandons what is still active after a forced termination.
    fn terminate_active(&mut self) {
        for session in self.admission.take_all_active() {
            let reason = match &session.handle {
                Some(h) => format!(
                    "session {h} terminated while {}",
                    session
                        .last_status
                        .as_ref()
                        .map_or("starting", |s| s.as_label())
                ),
                None => "creation interrupted".to_string(),
            };
            self.abandon(session.task, FailureKind::ForcedTermination, reason);
            if let Some(handle) = session.handle {
                self.terminated.push((session.task, handle));
            }
        }
    }

    async fn finish(mut self, forced: bool) -> RunReport {
        if forced {
            self.terminate_active();
        }
        self.token.cancel();

        let (delete_successful, delete_failed) =
            (self.cfg.delete_successful, self.cfg.delete_failed);
        let mut targets: Vec<(Task, SessionHandle)> = std::mem::take(&mut self.terminated);
        targets.extend(
            std::mem::take(&mut self.finished)
                .into_iter()
                .filter(|f| {
                    if f.succeeded {
                        delete_successful
                    } else {
                        delete_failed
                    }
                })
                .map(|f| (f.task, f.handle)),
        );
        let bound = forced.then_some(self.cfg.grace);
        let (deleted, delete_failures) = self.cleanup(targets, bound).await;

        let report = RunReport {
            state: self.state,
            interrupted: self.shutdown.interrupted(),
            forced,
            failure_limit_reached: self.failure_limit_reached,
            deleted,
            delete_failures,
            failures: self.failures,
        };
        self.bus
            .publish(Event::new(EventKind::RunFinished).with_reason(report.headline()));
        debug!(events = self.bus.published(), "run finished");
        report
    }

    /// Deletes `targets`; returns `(deleted, failed)`.
    async fn cleanup(
        &self,
        targets: Vec<(Task, SessionHandle)>,
        bound: Option<Duration>,
    ) -> (usize, usize) {
        if targets.is_empty() {
            return (0, 0);
        }
        let client = self.client.as_ref();
        let bus = &self.bus;
        let mut deleted = 0;
        let mut failed = 0;

        let mut results = stream::iter(targets)
            .map(|(task, handle)| async move { delete_one(client, bus, task, &handle).await })
            .buffer_unordered(self.cfg.cleanup_concurrency.max(1));
        let drain = async {
            while let Some(ok) = results.next().await {
                if ok {
                    deleted += 1;
                } else {
                    failed += 1;
                }
            }
        };

        match bound {
            Some(grace) => {
                if time::timeout(grace, drain).await.is_err() {
                    warn!(?grace, "cleanup did not finish within the grace period");
                }
            }
            None => drain.await,
        }
        (deleted, failed)
    }
}

/// Deletes one session and publishes the outcome.
async fn delete_one(
    client: &dyn SessionClient,
    bus: &Bus,
    task: Task,
    handle: &SessionHandle,
) -> bool {
    let base = |kind| {
        Event::new(kind)
            .with_task(task)
            .with_serial(handle.serial)
            .with_name(Arc::clone(&handle.name))
    };
    match client.delete(handle).await {
        Ok(()) => {
            bus.publish(base(EventKind::SessionDeleted));
            true
        }
        Err(e) => {
            bus.publish(base(EventKind::DeleteFailed).with_reason(e.to_string()));
            false
        }
    }
}

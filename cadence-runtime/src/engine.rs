//! Tick-driven host for the [`AutomationLoop`].
//!
//! One engine task owns the timer and the operator control channel. Task
//! execution happens on the [`WorkerActor`]; the engine only waits for its
//! reply, so ticks, status and controls stay responsive while a task runs.
//! The loop and the queue sit behind one coarse [`Mutex`] that snapshot
//! readers share with the engine.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use cadence_actors::actor::Addr;
use cadence_actors::{
    Outcome, RunContext, Task, TaskOutcome, TaskQueue, TaskReport, WorkerActor, WorkerMsg,
};
use cadence_common::{CadenceError, Region};
use cadence_drivers::{IdleAction, SafetyInterlock};
use chrono::Local;
use futures::future::OptionFuture;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::machine::{AutomationLoop, Directive, Phase, StopReason};
use crate::report;
use crate::session::TaskRecord;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick: Duration,
    pub idle_fillers: bool,
    pub idle_region: Region,
    pub status_every: Duration,
    /// Session reports go here when set.
    pub report_dir: Option<PathBuf>,
    /// Name of the task list, used in reports.
    pub task_source: String,
    /// Return from [`Engine::run`] once the loop stops. When unset the
    /// engine stays up for `reset` and `start`; an exhausted queue still
    /// ends the run.
    pub exit_on_stop: bool,
}

impl EngineConfig {
    pub fn new(idle_region: Region) -> Self {
        Self {
            tick: Duration::from_secs(1),
            idle_fillers: true,
            idle_region,
            status_every: Duration::from_secs(60),
            report_dir: None,
            task_source: "tasks".into(),
            exit_on_stop: true,
        }
    }
}

type Ack = oneshot::Sender<Result<()>>;

/// Operator commands.
pub enum Control {
    Start(Ack),
    Stop(Ack),
    ForceNow(Ack),
    Pause(Ack),
    Resume(Ack),
    /// Skip the front task (`skip_and_log`); refused while it is running.
    SkipFront(Ack),
    RevertLast(Ack),
    Reset(Ack),
}

/// Read-only view for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub stop_reason: Option<StopReason>,
    pub paused: bool,
    pub countdown_secs: Option<u64>,
    pub persona: String,
    pub batch_processed: u32,
    pub batch_threshold: u32,
    pub remaining: usize,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub fatigue: f64,
    /// Remaining tasks times the base interval, plus the current countdown.
    pub eta_secs: u64,
    pub next_task: Option<String>,
}

impl StatusSnapshot {
    pub fn line(&self) -> String {
        let countdown = self
            .countdown_secs
            .map(|s| format!(" {s}s"))
            .unwrap_or_default();
        let counts = format!(
            "left {} done {} skipped {}",
            self.remaining, self.completed, self.skipped
        );
        format!(
            "{}{}{} | persona {} | batch {}/{} | {counts} | fatigue {:.2} | eta {}m",
            self.phase,
            if self.paused { " (paused)" } else { "" },
            countdown,
            self.persona,
            self.batch_processed,
            self.batch_threshold,
            self.fatigue,
            self.eta_secs / 60,
        )
    }
}

pub struct Shared {
    pub machine: AutomationLoop,
    pub queue: TaskQueue,
}

impl Shared {
    pub fn snapshot(&self, now: Instant) -> StatusSnapshot {
        let m = &self.machine;
        let state = self.queue.state();
        let countdown = m.countdown(now);
        let base = m.settings().base_interval;
        let eta = base.saturating_mul(state.remaining.len() as u32) + countdown.unwrap_or_default();
        StatusSnapshot {
            phase: m.phase(),
            stop_reason: match m.state() {
                crate::machine::LoopState::Stopped(r) => Some(r.clone()),
                _ => None,
            },
            paused: m.is_paused(),
            countdown_secs: countdown.map(|d| d.as_secs()),
            persona: m.persona().label(),
            batch_processed: m.rhythm().processed(),
            batch_threshold: m.rhythm().threshold(),
            remaining: state.remaining.len(),
            completed: state.completed_count,
            skipped: state.skipped_count,
            failed: state.failed_count,
            fatigue: m.session().fatigue_level(),
            eta_secs: eta.as_secs(),
            next_task: self.queue.peek_next().map(|t| t.excerpt(40)),
        }
    }
}

/// Cloneable remote for the engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Control>,
    shared: Arc<Mutex<Shared>>,
}

impl EngineHandle {
    async fn send(&self, make: impl FnOnce(Ack) -> Control) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(make(ack))
            .await
            .map_err(|_| anyhow!("engine is not running"))?;
        rx.await.context("engine dropped the command")?
    }

    pub async fn start(&self) -> Result<()> {
        self.send(Control::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Control::Stop).await
    }

    pub async fn force_now(&self) -> Result<()> {
        self.send(Control::ForceNow).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Control::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(Control::Resume).await
    }

    pub async fn skip_front(&self) -> Result<()> {
        self.send(Control::SkipFront).await
    }

    pub async fn revert_last(&self) -> Result<()> {
        self.send(Control::RevertLast).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.send(Control::Reset).await
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.shared.lock().await.snapshot(Instant::now())
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub struct EngineSummary {
    pub reason: Option<StopReason>,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub remaining: usize,
    pub breaks: u32,
    pub report: Option<PathBuf>,
}

struct InFlight {
    task: Task,
    index: usize,
    rx: oneshot::Receiver<TaskReport>,
}

type IdleReply = cadence_common::Result<Option<IdleAction>>;

enum Event {
    Shutdown,
    Control(Control),
    Report(std::result::Result<TaskReport, oneshot::error::RecvError>),
    Idle(std::result::Result<IdleReply, oneshot::error::RecvError>),
    Tick,
}

pub struct Engine {
    shared: Arc<Mutex<Shared>>,
    worker: Addr<WorkerActor>,
    interlock: SafetyInterlock,
    config: EngineConfig,
    controls: mpsc::Receiver<Control>,
    run_cancel: CancellationToken,
    in_flight: Option<InFlight>,
    idle: Option<oneshot::Receiver<IdleReply>>,
    dispatched: usize,
    reported: bool,
    last_stop: Option<StopReason>,
    last_report: Option<PathBuf>,
    last_status: Option<Instant>,
}

impl Engine {
    pub fn new(
        machine: AutomationLoop,
        queue: TaskQueue,
        worker: Addr<WorkerActor>,
        interlock: SafetyInterlock,
        config: EngineConfig,
    ) -> (Self, EngineHandle) {
        let shared = Arc::new(Mutex::new(Shared { machine, queue }));
        let (tx, controls) = mpsc::channel(16);
        let engine = Self {
            shared: shared.clone(),
            worker,
            interlock,
            config,
            controls,
            run_cancel: CancellationToken::new(),
            in_flight: None,
            idle: None,
            dispatched: 0,
            reported: false,
            last_stop: None,
            last_report: None,
            last_status: None,
        };
        (engine, EngineHandle { tx, shared })
    }

    /// Drive the loop until `shutdown` fires, the queue is exhausted or, with
    /// `exit_on_stop`, the loop stops for any other reason.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<EngineSummary> {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.config.tick.as_millis() as u64, "engine.started");

        loop {
            let report_fut: OptionFuture<_> = self.in_flight.as_mut().map(|f| &mut f.rx).into();
            let idle_fut: OptionFuture<_> = self.idle.as_mut().into();
            let event = tokio::select! {
                _ = shutdown.cancelled() => Event::Shutdown,
                Some(cmd) = self.controls.recv() => Event::Control(cmd),
                Some(report) = report_fut => Event::Report(report),
                Some(idle) = idle_fut => Event::Idle(idle),
                _ = ticker.tick() => Event::Tick,
            };
            match event {
                Event::Shutdown => break,
                Event::Control(cmd) => self.on_control(cmd).await,
                Event::Report(report) => self.on_report(report).await,
                Event::Idle(reply) => self.on_idle(reply).await,
                Event::Tick => self.on_tick().await,
            }
            self.finish_if_stopped().await;
            let exhausted = self.last_stop == Some(StopReason::QueueExhausted);
            if self.reported && (self.config.exit_on_stop || exhausted) {
                break;
            }
        }
        self.shutdown().await
    }

    async fn shutdown(mut self) -> Result<EngineSummary> {
        {
            let mut shared = self.shared.lock().await;
            if shared.machine.phase() != Phase::Stopped {
                shared.machine.stop(StopReason::Requested);
            }
        }
        self.run_cancel.cancel();
        if let Some(flight) = self.in_flight.take() {
            // the worker reaches a checkpoint and replies
            let report = flight.rx.await;
            self.settle(flight.task, flight.index, report).await;
        }
        if let Some(idle) = self.idle.take() {
            let _ = idle.await;
        }
        self.finish_if_stopped().await;

        let shared = self.shared.lock().await;
        let state = shared.queue.state();
        let summary = EngineSummary {
            reason: match shared.machine.state() {
                crate::machine::LoopState::Stopped(r) => Some(r.clone()),
                _ => None,
            },
            completed: state.completed_count,
            skipped: state.skipped_count,
            failed: state.failed_count,
            remaining: state.remaining.len(),
            breaks: shared.machine.rhythm().breaks_taken(),
            report: self.last_report.clone(),
        };
        info!(
            reason = ?summary.reason,
            completed = summary.completed,
            skipped = summary.skipped,
            remaining = summary.remaining,
            "engine.finished"
        );
        Ok(summary)
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        let mut shared = self.shared.clone().lock_owned().await;
        let running = !matches!(shared.machine.phase(), Phase::Idle | Phase::Stopped);
        if running && self.interlock.is_tripped() {
            let at = self.interlock.tripped_at();
            error!(?at, "engine.interlock");
            shared.machine.stop(StopReason::Fatal("safety interlock tripped".into()));
            self.run_cancel.cancel();
            return;
        }
        match shared.machine.tick(now) {
            Some(Directive::Execute) => self.dispatch(&mut shared).await,
            Some(Directive::BreakEnded) => {
                info!(persona = %shared.machine.persona().label(), "engine.new_persona");
            }
            _ => {}
        }
        if self.last_status.is_none_or(|at| now >= at + self.config.status_every) {
            self.last_status = Some(now);
            info!(status = %shared.snapshot(now).line(), "engine.status");
        }
        if self.config.idle_fillers
            && shared.machine.phase() == Phase::Waiting
            && !shared.machine.is_paused()
            && self.in_flight.is_none()
            && self.idle.is_none()
        {
            self.send_idle(&shared).await;
        }
    }

    async fn send_idle(&mut self, shared: &Shared) {
        let (reply, rx) = oneshot::channel();
        let msg = WorkerMsg::Idle {
            safe: self.config.idle_region,
            run: self.run_context(shared),
            reply,
        };
        if self.worker.try_send(msg).is_ok() {
            self.idle = Some(rx);
        }
    }

    fn run_context(&self, shared: &Shared) -> RunContext {
        RunContext {
            persona: shared.machine.persona().clone(),
            fatigue: shared.machine.session().fatigue_multiplier(),
            cancel: self.run_cancel.clone(),
        }
    }

    /// Hand the front task to the worker, or stop when there is none.
    async fn dispatch(&mut self, shared: &mut Shared) {
        let task = match shared.queue.begin_next().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                shared.machine.stop(StopReason::QueueExhausted);
                return;
            }
            Err(e) => {
                error!(error = %e, "engine.dispatch.storage");
                shared.machine.stop(StopReason::Fatal(e.to_string()));
                return;
            }
        };
        let (reply, rx) = oneshot::channel();
        let msg = WorkerMsg::Execute {
            task: task.clone(),
            run: self.run_context(shared),
            reply,
        };
        if self.worker.send(msg).await.is_err() {
            error!("engine.worker_gone");
            shared.machine.stop(StopReason::Fatal("worker stopped".into()));
            let _ = shared.queue.release_in_progress().await;
            return;
        }
        self.dispatched += 1;
        info!(
            task_id = %task.id,
            index = self.dispatched,
            remaining = shared.queue.len(),
            "engine.dispatch"
        );
        self.in_flight = Some(InFlight {
            task,
            index: self.dispatched,
            rx,
        });
    }

    async fn on_report(
        &mut self,
        report: std::result::Result<TaskReport, oneshot::error::RecvError>,
    ) {
        if let Some(flight) = self.in_flight.take() {
            self.settle(flight.task, flight.index, report).await;
        }
    }

    /// Record a finished task in the queue, the loop and the session log.
    async fn settle(
        &mut self,
        task: Task,
        index: usize,
        report: std::result::Result<TaskReport, oneshot::error::RecvError>,
    ) {
        let now = Instant::now();
        let mut shared = self.shared.lock().await;
        let report = match report {
            Ok(r) => r,
            Err(_) => {
                error!(task_id = %task.id, "engine.worker_dropped_task");
                shared.machine.stop(StopReason::Fatal("worker dropped the task".into()));
                let _ = shared.queue.release_in_progress().await;
                return;
            }
        };
        let outcome = match &report.outcome {
            TaskOutcome::Succeeded(_) => Some(Outcome::Completed),
            TaskOutcome::Failed(_) => Some(Outcome::Failed),
            TaskOutcome::Aborted(_) | TaskOutcome::Cancelled => None,
        };
        shared.machine.session_mut().record(TaskRecord {
            index,
            excerpt: task.excerpt(60),
            outcome: match &report.outcome {
                TaskOutcome::Succeeded(_) => "completed".into(),
                TaskOutcome::Failed(_) => "failed".into(),
                TaskOutcome::Aborted(_) => "aborted".into(),
                TaskOutcome::Cancelled => "cancelled".into(),
            },
            started_at: report.started_at.with_timezone(&Local),
            finished_at: report.finished_at.with_timezone(&Local),
        });

        let Some(outcome) = outcome else {
            if let TaskOutcome::Aborted(e) = &report.outcome {
                shared.machine.stop(StopReason::Fatal(e.to_string()));
                self.run_cancel.cancel();
            }
            if let Err(e) = shared.queue.release_in_progress().await {
                warn!(error = %e, "engine.release_failed");
            }
            return;
        };

        if let Err(e) = shared.queue.pop_front(outcome).await {
            error!(error = %e, "engine.record.storage");
            shared.machine.stop(StopReason::Fatal(e.to_string()));
            self.run_cancel.cancel();
            return;
        }
        if shared.machine.phase() == Phase::Executing {
            if let Err(e) = shared.machine.task_finished(now, outcome == Outcome::Completed) {
                warn!(error = %e, "engine.task_finished");
            }
        }
        if shared.queue.is_exhausted() && shared.machine.phase() != Phase::Stopped {
            shared.machine.stop(StopReason::QueueExhausted);
        }
    }

    async fn on_idle(&mut self, reply: std::result::Result<IdleReply, oneshot::error::RecvError>) {
        self.idle = None;
        match reply {
            Ok(Ok(Some(action))) => debug!(?action, "engine.idle"),
            Ok(Ok(None)) | Err(_) => {}
            Ok(Err(CadenceError::Cancelled)) => {}
            Ok(Err(e)) if e.is_fatal() => {
                error!(error = %e, "engine.idle.fatal");
                self.shared
                    .lock()
                    .await
                    .machine
                    .stop(StopReason::Fatal(e.to_string()));
                self.run_cancel.cancel();
            }
            Ok(Err(e)) => debug!(error = %e, "engine.idle.failed"),
        }
    }

    async fn on_control(&mut self, cmd: Control) {
        let (ack, result) = match cmd {
            Control::Start(ack) => (ack, self.start().await),
            Control::Stop(ack) => {
                self.shared.lock().await.machine.stop(StopReason::Requested);
                self.run_cancel.cancel();
                (ack, Ok(()))
            }
            Control::ForceNow(ack) => (ack, self.force_now().await),
            Control::Pause(ack) => {
                let res = self.shared.lock().await.machine.pause(Instant::now());
                (ack, res.map_err(anyhow::Error::from))
            }
            Control::Resume(ack) => {
                let res = self.shared.lock().await.machine.resume(Instant::now());
                (ack, res.map_err(anyhow::Error::from))
            }
            Control::SkipFront(ack) => (ack, self.skip_front().await),
            Control::RevertLast(ack) => (ack, self.revert_last().await),
            Control::Reset(ack) => (ack, self.reset().await),
        };
        if let Err(e) = &result {
            warn!(error = %e, "engine.control.rejected");
        }
        let _ = ack.send(result);
    }

    /// Pre-flight, then `Idle -> Executing`.
    async fn start(&mut self) -> Result<()> {
        let mut shared = self.shared.clone().lock_owned().await;
        self.interlock
            .ensure_clear()
            .context("safety interlock is tripped; reset first")?;
        if shared.queue.is_exhausted() {
            return Err(CadenceError::Configuration("no tasks queued".into()).into());
        }
        let now = Instant::now();
        if shared.machine.start(now)? == Directive::Execute {
            self.dispatch(&mut shared).await;
        }
        Ok(())
    }

    async fn force_now(&mut self) -> Result<()> {
        let mut shared = self.shared.clone().lock_owned().await;
        if let Some(Directive::Execute) = shared.machine.force_now(Instant::now())? {
            self.dispatch(&mut shared).await;
        }
        Ok(())
    }

    async fn skip_front(&mut self) -> Result<()> {
        if self.in_flight.is_some() {
            anyhow::bail!("the front task is running");
        }
        let mut shared = self.shared.lock().await;
        let front = shared.queue.peek_next().map(|t| t.id).context("queue is empty")?;
        shared.queue.skip_and_log(front).await?;
        Ok(())
    }

    async fn revert_last(&mut self) -> Result<()> {
        if self.in_flight.is_some() {
            anyhow::bail!("cannot revert while a task is running");
        }
        let mut shared = self.shared.lock().await;
        shared
            .queue
            .revert_last()
            .await?
            .context("nothing to revert")?;
        Ok(())
    }

    async fn reset(&mut self) -> Result<()> {
        if self.in_flight.is_some() {
            anyhow::bail!("a task is still finishing");
        }
        let mut shared = self.shared.lock().await;
        shared.machine.reset(Instant::now())?;
        shared.queue.release_in_progress().await?;
        self.interlock.reset();
        self.run_cancel = CancellationToken::new();
        self.reported = false;
        self.last_stop = None;
        Ok(())
    }

    /// Once stopped with nothing in flight: clear exhausted state and write the report.
    async fn finish_if_stopped(&mut self) {
        if self.reported || self.in_flight.is_some() {
            return;
        }
        let shared = self.shared.lock().await;
        let reason = match shared.machine.state() {
            crate::machine::LoopState::Stopped(reason) => reason.clone(),
            _ => return,
        };
        self.reported = true;
        self.run_cancel.cancel();
        if reason == StopReason::QueueExhausted {
            if let Err(e) = shared.queue.clear().await {
                warn!(error = %e, "engine.clear_failed");
            }
        }
        if let Some(dir) = &self.config.report_dir {
            match report::write_report(dir, shared.machine.session(), &self.config.task_source)
                .await
            {
                Ok(path) => self.last_report = Some(path),
                Err(e) => warn!(error = ?e, "engine.report_failed"),
            }
        }
        info!(%reason, "engine.stopped");
        self.last_stop = Some(reason);
    }
}

//! The single background worker that plays tasks and idle fillers.
//!
//! There is exactly one of these per run and it handles one message at a
//! time, so at most one task is ever mid-execution.
use std::sync::Arc;

use anyhow::Result;
use cadence_common::{CadenceError, Region};
use cadence_drivers::{
    ActionExecutor, Checkpoint, HumanDriver, IdleAction, IdleSimulator, Persona, SafetyInterlock,
    ScreenGeometry,
};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::actor::{Actor, Context};
use crate::queue::Task;
use crate::retry::{retry_transient, RetryError, RetryPolicy};
use crate::script::{SubmitMethod, TaskScript};

/// Per-run inputs shared by every message kind.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub persona: Persona,
    pub fatigue: f64,
    pub cancel: CancellationToken,
}

pub enum WorkerMsg {
    Execute {
        task: Task,
        run: RunContext,
        reply: oneshot::Sender<TaskReport>,
    },
    /// One idle filler inside `safe`; only sent while the loop is waiting.
    Idle {
        safe: Region,
        run: RunContext,
        reply: oneshot::Sender<cadence_common::Result<Option<IdleAction>>>,
    },
}

#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded(SubmitMethod),
    /// Retries exhausted on transient errors.
    Failed(String),
    /// Interlock, storage or configuration error; the loop must stop.
    Aborted(CadenceError),
    Cancelled,
}

#[derive(Debug)]
pub struct TaskReport {
    pub task_id: Uuid,
    pub outcome: TaskOutcome,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded(_))
    }
}

pub struct WorkerActor {
    executor: Arc<dyn ActionExecutor>,
    screen: Arc<dyn ScreenGeometry>,
    interlock: SafetyInterlock,
    script: TaskScript,
    retry: RetryPolicy,
    edge_margin: f64,
    idle: IdleSimulator,
    seed: Option<u64>,
}

impl WorkerActor {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        screen: Arc<dyn ScreenGeometry>,
        interlock: SafetyInterlock,
        script: TaskScript,
    ) -> Self {
        Self {
            executor,
            screen,
            interlock,
            script,
            retry: RetryPolicy::default(),
            edge_margin: cadence_drivers::human::driver::DEFAULT_EDGE_MARGIN,
            idle: IdleSimulator::default(),
            seed: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_edge_margin(mut self, margin: f64) -> Self {
        self.edge_margin = margin;
        self
    }

    pub fn with_idle(mut self, idle: IdleSimulator) -> Self {
        self.idle = idle;
        self
    }

    /// Deterministic drivers; attempt `n` uses `seed + n`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn driver(&self, run: &RunContext, checkpoint: Checkpoint, salt: u64) -> HumanDriver {
        let driver = HumanDriver::new(
            self.executor.clone(),
            self.screen.clone(),
            checkpoint,
            run.persona.clone(),
        )
        .with_edge_margin(self.edge_margin)
        .with_fatigue(run.fatigue)
        .with_idle(self.idle);
        match self.seed {
            Some(seed) => driver.with_seed(seed.wrapping_add(salt)),
            None => driver,
        }
    }

    async fn execute(&self, task: &Task, run: &RunContext) -> (TaskOutcome, u32) {
        let checkpoint = Checkpoint::new(run.cancel.clone(), self.interlock.clone());
        let mut attempts = 0;
        let result = retry_transient(&self.retry, &checkpoint, |n| {
            attempts = n;
            let mut driver = self.driver(run, checkpoint.clone(), n as u64);
            let payload = task.payload.as_str();
            let script = self.script;
            async move { script.run(&mut driver, payload).await }
        })
        .await;
        let outcome = match result {
            Ok(method) => TaskOutcome::Succeeded(method),
            Err(RetryError::Exhausted { last, .. }) => TaskOutcome::Failed(last.to_string()),
            Err(RetryError::Aborted(CadenceError::Cancelled)) => TaskOutcome::Cancelled,
            Err(RetryError::Aborted(e)) => TaskOutcome::Aborted(e),
        };
        (outcome, attempts)
    }
}

#[async_trait::async_trait]
impl Actor for WorkerActor {
    type Msg = WorkerMsg;

    async fn handle(&mut self, msg: Self::Msg, _ctx: &mut Context<Self>) -> Result<()> {
        match msg {
            WorkerMsg::Execute { task, run, reply } => {
                let started_at = Utc::now();
                info!(
                    task_id = %task.id,
                    persona = %run.persona.label(),
                    fatigue = run.fatigue,
                    excerpt = %task.excerpt(40),
                    "worker.execute"
                );
                let (outcome, attempts) = self.execute(&task, &run).await;
                match &outcome {
                    TaskOutcome::Succeeded(method) => {
                        info!(task_id = %task.id, attempts, ?method, "worker.succeeded")
                    }
                    TaskOutcome::Failed(error) => {
                        warn!(task_id = %task.id, attempts, %error, "worker.failed")
                    }
                    TaskOutcome::Aborted(error) => {
                        warn!(task_id = %task.id, %error, "worker.aborted")
                    }
                    TaskOutcome::Cancelled => info!(task_id = %task.id, "worker.cancelled"),
                }
                let report = TaskReport {
                    task_id: task.id,
                    outcome,
                    attempts,
                    started_at,
                    finished_at: Utc::now(),
                };
                if reply.send(report).is_err() {
                    debug!("worker.execute.reply_dropped");
                }
            }
            WorkerMsg::Idle { safe, run, reply } => {
                let checkpoint = Checkpoint::new(run.cancel.clone(), self.interlock.clone());
                let salt = Utc::now().timestamp_millis() as u64;
                let mut driver = self.driver(&run, checkpoint, salt);
                let res = driver.maybe_idle(safe).await;
                if reply.send(res).is_err() {
                    debug!("worker.idle.reply_dropped");
                }
            }
        }
        Ok(())
    }
}

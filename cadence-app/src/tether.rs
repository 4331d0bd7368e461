use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_actors::system::ActorSystem;
use cadence_actors::{
    JsonFileStore, RetryPolicy, SqliteStore, StateStore, TaskQueue, TaskScript, WorkerActor,
};
use cadence_config::{CadenceConfig, StateBackend, StateConfig};
use cadence_drivers::{IdleSimulator, SafetyInterlock, SimulatedDesktop};
use cadence_runtime::{
    AutomationLoop, Engine, EngineConfig, EngineHandle, EngineSummary, LoopSettings,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const WORKER_MAILBOX: usize = 8;

/// Chance that a quiet tick while waiting turns into an idle filler.
const IDLE_FILLER_RATE: f64 = 0.05;

pub async fn open_store(state: &StateConfig) -> Result<Arc<dyn StateStore>> {
    match state.backend {
        StateBackend::Json => Ok(Arc::new(JsonFileStore::new(state.path.clone()))),
        StateBackend::Sqlite => {
            let url = state.database_url();
            let store = SqliteStore::connect(&url, state.set_id.clone())
                .await
                .with_context(|| format!("opening state database {url}"))?;
            Ok(Arc::new(store))
        }
    }
}

/// Split a task file on `separator`, dropping blank entries.
pub fn split_payloads(text: &str, separator: &str) -> Vec<String> {
    text.split(separator)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A missing task file reads as an empty list.
pub async fn read_payloads(file: &Path, separator: &str) -> Result<Vec<String>> {
    match tokio::fs::read_to_string(file).await {
        Ok(text) => Ok(split_payloads(&text, separator)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(file = %file.display(), "tasks.file_missing");
            Ok(Vec::new())
        }
        Err(e) => Err(e).with_context(|| format!("reading tasks from {}", file.display())),
    }
}

/// Everything one `run` needs, wired and not yet started.
pub struct Tether {
    system: ActorSystem,
    engine: Engine,
    handle: EngineHandle,
    desk: Arc<SimulatedDesktop>,
}

impl Tether {
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Drive the engine until it stops or `shutdown` fires, then stop the worker.
    pub async fn run(self, shutdown: CancellationToken) -> Result<EngineSummary> {
        let summary = self.engine.run(shutdown).await;
        self.system.graceful_shutdown().await?;
        tracing::info!(submitted = self.desk.submissions().len(), "tether.finished");
        summary
    }
}

/// Compose store, queue, worker and engine from configuration.
///
/// Primitives go to the in-memory desktop; a platform executor plugs in at
/// the same two trait seams. With `exit_on_stop` unset the engine outlives a
/// stop so an operator can `reset` and `start` again.
pub async fn build_from_config(
    cfg: &CadenceConfig,
    report_dir: PathBuf,
    seed: Option<u64>,
    exit_on_stop: bool,
) -> Result<Tether> {
    cfg.validate().context("configuration pre-flight")?;
    let screen = cfg.screen.bounds();
    let input = cfg.input_region()?;
    let submit = cfg.submit_region()?;
    let idle = cfg.idle_region()?;
    let table = cfg.persona_table();
    table.validate().context("persona table")?;

    let store = open_store(&cfg.state).await?;
    let payloads = read_payloads(&cfg.tasks.file, &cfg.tasks.separator).await?;
    let queue = TaskQueue::open(store.clone(), payloads)
        .await
        .with_context(|| format!("opening task state in {}", store.describe()))?;
    tracing::info!(
        store = %store.describe(),
        remaining = queue.len(),
        completed = queue.state().completed_count,
        "tether.queue_ready"
    );

    let desk = Arc::new(
        SimulatedDesktop::new(screen.width(), screen.height()).with_submit_button(submit),
    );
    let interlock = SafetyInterlock::new(screen, cfg.screen.interlock_corner);
    let bounds = screen.inset(cfg.screen.edge_margin);
    let script = TaskScript::new(input, submit, idle, bounds);
    let seed = seed.unwrap_or_else(rand::random);

    let mut worker = WorkerActor::new(desk.clone(), desk.clone(), interlock.clone(), script)
        .with_retry(RetryPolicy::new(
            cfg.schedule.max_retries,
            cfg.schedule.retry_backoff(),
        ))
        .with_edge_margin(cfg.screen.edge_margin)
        .with_seed(seed);
    if cfg.schedule.idle_fillers {
        worker = worker.with_idle(IdleSimulator::new(IDLE_FILLER_RATE));
    }

    let mut system = ActorSystem::new();
    let worker = system.spawn(worker, WORKER_MAILBOX);

    let settings = LoopSettings {
        base_interval: cfg.schedule.interval(),
        interval_floor: cfg.schedule.interval_floor(),
        jitter_ratio: cfg.schedule.jitter_ratio,
    };
    let machine = AutomationLoop::with_rng(
        settings,
        table,
        Instant::now(),
        StdRng::seed_from_u64(seed.wrapping_add(1)),
    );
    tracing::info!(seed, persona = %machine.persona().label(), "tether.persona");

    let engine_config = EngineConfig {
        tick: cfg.schedule.tick(),
        idle_fillers: cfg.schedule.idle_fillers,
        idle_region: idle,
        status_every: cfg.schedule.status_every(),
        report_dir: Some(report_dir),
        task_source: cfg.tasks.file.display().to_string(),
        exit_on_stop,
    };
    let (engine, handle) = Engine::new(machine, queue, worker, interlock, engine_config);
    Ok(Tether {
        system,
        engine,
        handle,
        desk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_are_split_and_trimmed() {
        let text = "a red fox\n|||\n\n  a blue whale |||||| \n|||last one";
        assert_eq!(
            split_payloads(text, "|||"),
            vec!["a red fox", "a blue whale", "last one"]
        );
    }

    #[tokio::test]
    async fn missing_task_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let payloads = read_payloads(&dir.path().join("nope.txt"), "|||").await.unwrap();
        assert!(payloads.is_empty());
    }
}

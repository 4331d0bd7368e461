use std::sync::Arc;
use std::time::Duration;

use cadence_actors::actor::{ActorHandle, spawn_actor};
use cadence_actors::{MemoryStore, TaskQueue, TaskScript, WorkerActor};
use cadence_common::{Point, Region};
use cadence_drivers::{CountRange, ParamRange, PersonaTable, SafetyInterlock, SimulatedDesktop};
use cadence_runtime::{
    AutomationLoop, Engine, EngineConfig, EngineHandle, EngineSummary, LoopSettings, Phase,
    StopReason,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const W: f64 = 1280.0;
const H: f64 = 800.0;

/// Steady personas: no typos, no detours, always submit with Enter.
fn table(batch: u32) -> PersonaTable {
    let never = ParamRange::new(0.0, 0.0);
    PersonaTable {
        speed_multiplier: ParamRange::new(1.0, 1.0),
        hesitation_rate: never,
        overshoot_rate: never,
        micro_correction_rate: never,
        typo_rate: never,
        caret_check_rate: never,
        distraction_rate: never,
        fatigue_rate: ParamRange::new(0.1, 0.1),
        double_click_rate: never,
        empty_click_rate: never,
        enter_submit_rate: ParamRange::new(1.0, 1.0),
        submit_hesitation_rate: never,
        gaze_rate: never,
        batch_min: batch,
        batch_max: CountRange::new(batch, batch),
        break_min_secs: ParamRange::new(60.0, 60.0),
        break_max_secs: ParamRange::new(120.0, 120.0),
    }
}

struct Harness {
    desk: Arc<SimulatedDesktop>,
    store: Arc<MemoryStore>,
    interlock: SafetyInterlock,
    handle: EngineHandle,
    shutdown: CancellationToken,
    run: JoinHandle<anyhow::Result<EngineSummary>>,
    _reports: tempfile::TempDir,
}

async fn harness(payloads: &[&str]) -> Harness {
    harness_with(payloads, true).await
}

async fn harness_with(payloads: &[&str], exit_on_stop: bool) -> Harness {
    let script = TaskScript::new(
        Region::new(200.0, 500.0, 1000.0, 600.0),
        Region::new(1050.0, 520.0, 1150.0, 580.0),
        Region::new(200.0, 100.0, 1000.0, 400.0),
        Region::screen(W, H).inset(10.0),
    );
    let desk = Arc::new(SimulatedDesktop::new(W, H).with_submit_button(script.submit));
    let interlock = SafetyInterlock::new(Region::screen(W, H), 3.0);
    let idle_region = script.idle;
    let worker =
        WorkerActor::new(desk.clone(), desk.clone(), interlock.clone(), script).with_seed(5);
    let ActorHandle { addr, .. } = spawn_actor(worker, 4);

    let store = Arc::new(MemoryStore::new());
    let queue = TaskQueue::open(store.clone(), payloads.iter().copied())
        .await
        .unwrap();
    let settings = LoopSettings {
        base_interval: Duration::from_secs(60),
        interval_floor: Duration::from_secs(30),
        jitter_ratio: 1.0,
    };
    let rng = StdRng::seed_from_u64(11);
    let machine = AutomationLoop::with_rng(settings, table(2), Instant::now(), rng);

    let reports = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::new(idle_region);
    config.idle_fillers = false;
    config.report_dir = Some(reports.path().to_path_buf());
    config.task_source = "prompts/scenes.txt".into();
    config.exit_on_stop = exit_on_stop;

    let (engine, handle) = Engine::new(machine, queue, addr, interlock.clone(), config);
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(engine.run(shutdown.clone()));
    Harness {
        desk,
        store,
        interlock,
        handle,
        shutdown,
        run,
        _reports: reports,
    }
}

async fn wait_for_completed(handle: &EngineHandle, n: u64) {
    while handle.snapshot().await.completed < n {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn queue_runs_to_exhaustion_with_one_break() {
    let h = harness(&["paint A", "paint B", "paint C"]).await;
    h.handle.start().await.unwrap();

    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.reason, Some(StopReason::QueueExhausted));
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.remaining, 0);
    assert_eq!(summary.breaks, 1);
    assert_eq!(
        h.desk.submissions(),
        vec!["paint A".to_string(), "paint B".into(), "paint C".into()]
    );
    // a finished list leaves nothing to resume
    assert!(h.store.snapshot().is_none());

    let report = std::fs::read_to_string(summary.report.unwrap()).unwrap();
    assert!(report.contains("Task #3  (completed)"));
    assert!(report.contains("Task source : prompts/scenes.txt"));
}

#[tokio::test(start_paused = true)]
async fn stop_keeps_the_rest_of_the_queue_for_resume() {
    let h = harness(&["one", "two", "three"]).await;
    h.handle.start().await.unwrap();
    wait_for_completed(&h.handle, 1).await;

    h.handle.pause().await.unwrap();
    let snap = h.handle.snapshot().await;
    assert_eq!(snap.phase, Phase::Waiting);
    assert!(snap.paused);
    assert_eq!(snap.remaining, 2);
    assert_eq!(snap.next_task.as_deref(), Some("two"));
    // two tasks at the base interval plus what is left of the countdown
    assert!(snap.eta_secs >= 120);

    // a frozen countdown never fires
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.handle.snapshot().await.completed, 1);

    h.handle.stop().await.unwrap();
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.reason, Some(StopReason::Requested));
    assert_eq!(summary.remaining, 2);

    let saved = h.store.snapshot().unwrap();
    assert_eq!(saved.completed_count, 1);
    let left: Vec<_> = saved.remaining.iter().map(|t| t.payload.as_str()).collect();
    assert_eq!(left, ["two", "three"]);
    assert!(saved.in_progress().is_none());
}

#[tokio::test(start_paused = true)]
async fn operator_can_skip_and_revert_while_waiting() {
    let h = harness(&["keep", "drop", "last"]).await;
    h.handle.start().await.unwrap();
    wait_for_completed(&h.handle, 1).await;
    h.handle.pause().await.unwrap();

    h.handle.skip_front().await.unwrap();
    let snap = h.handle.snapshot().await;
    assert_eq!(snap.skipped, 1);
    assert_eq!(snap.next_task.as_deref(), Some("last"));

    h.handle.revert_last().await.unwrap();
    assert_eq!(h.handle.snapshot().await.next_task.as_deref(), Some("drop"));

    // pausing twice is fine, forcing from a pause runs the next task
    h.handle.pause().await.unwrap();
    h.handle.force_now().await.unwrap();
    wait_for_completed(&h.handle, 2).await;
    assert_eq!(h.desk.submissions(), vec!["keep".to_string(), "drop".into()]);

    h.shutdown.cancel();
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.reason, Some(StopReason::Requested));
}

#[tokio::test(start_paused = true)]
async fn start_is_refused_while_the_interlock_is_tripped() {
    let h = harness(&["anything"]).await;
    h.interlock.trip(Point::new(1.0, 1.0));

    let err = h.handle.start().await.unwrap_err();
    assert!(err.to_string().contains("interlock"));
    assert_eq!(h.handle.snapshot().await.phase, Phase::Idle);
    assert!(h.desk.submissions().is_empty());

    h.shutdown.cancel();
    h.run.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn interlock_trip_between_tasks_stops_the_run() {
    let h = harness(&["first", "second", "third"]).await;
    h.handle.start().await.unwrap();
    wait_for_completed(&h.handle, 1).await;

    h.interlock.trip(Point::new(W - 1.0, 0.0));
    let summary = h.run.await.unwrap().unwrap();
    assert!(matches!(summary.reason, Some(StopReason::Fatal(_))));
    assert_eq!(summary.remaining, 2);
    assert_eq!(h.desk.submissions(), vec!["first".to_string()]);
    assert_eq!(h.store.snapshot().unwrap().remaining.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stopped_engine_can_be_reset_and_started_again() {
    let h = harness_with(&["north", "south", "east"], false).await;
    h.handle.start().await.unwrap();
    wait_for_completed(&h.handle, 1).await;

    h.handle.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snap = h.handle.snapshot().await;
    assert_eq!(snap.phase, Phase::Stopped);
    assert_eq!(snap.stop_reason, Some(StopReason::Requested));
    assert!(!h.run.is_finished());

    // start is only valid from idle
    assert!(h.handle.start().await.is_err());
    h.handle.reset().await.unwrap();
    let snap = h.handle.snapshot().await;
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(snap.remaining, 2);

    h.handle.start().await.unwrap();
    let summary = h.run.await.unwrap().unwrap();
    assert_eq!(summary.reason, Some(StopReason::QueueExhausted));
    assert_eq!(summary.completed, 3);
    assert_eq!(
        h.desk.submissions(),
        vec!["north".to_string(), "south".into(), "east".into()]
    );
}

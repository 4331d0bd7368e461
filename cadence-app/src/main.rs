use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_actors::TaskQueue;
use cadence_common::observability::{init_logging, log_dir};
use cadence_config::{CadenceConfig, CadenceConfigLoader, default_config_path};
use cadence_runtime::{CadenceHandle, CadenceRuntime};
use clap::{Parser, Subcommand};
mod console;
mod tether;

#[derive(Parser, Debug)]
#[command(name = "cadence", version, about = "Paced, human-like runner for long task lists")]
struct Cli {
    /// YAML configuration; defaults to ./cadence.yaml and the user config dir.
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Work through the task list until it is exhausted or stopped.
    Run {
        /// Seed for personas and motion, for reproducible rehearsals.
        #[arg(long)]
        seed: Option<u64>,
        /// Do not read operator commands from stdin.
        #[arg(long)]
        no_console: bool,
        /// Wait for `start` on the console instead of starting right away.
        #[arg(long)]
        paused: bool,
    },
    /// Show the saved queue state.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Drop the front task of the saved queue.
    Skip,
    /// Put the most recently finished or skipped task back in front.
    Revert,
    /// Forget the saved queue state.
    Clear,
    /// Validate the configuration and exit.
    Check,
}

fn load_config(explicit: Option<&Path>) -> Result<CadenceConfig> {
    let mut loader = CadenceConfigLoader::new();
    match explicit {
        Some(path) => loader = loader.with_file(path),
        None => {
            if let Some(user) = default_config_path() {
                loader = loader.with_optional_file(user);
            }
            loader = loader.with_optional_file("cadence.yaml");
        }
    }
    loader.load().context("loading configuration")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    let log_config = cfg.logging.to_log_config("cadence");
    let log_file = init_logging(log_config.clone())?;
    tracing::info!(log_file = %log_file.display(), command = ?cli.command, "app.start");

    let runtime = CadenceRuntime::build("cadence", None)?;
    let rt = runtime.handle();
    let result = runtime.block_on(dispatch(cli.command, cfg, log_dir(&log_config), rt));
    if let Err(e) = &result {
        tracing::error!(error = ?e, "app.failed");
    }
    runtime.shutdown(Duration::from_secs(2));
    result
}

async fn dispatch(
    cmd: Cmd,
    cfg: CadenceConfig,
    report_dir: PathBuf,
    rt: CadenceHandle,
) -> Result<()> {
    match cmd {
        Cmd::Run {
            seed,
            no_console,
            paused,
        } => run(cfg, report_dir, seed, !no_console, paused, rt).await,
        Cmd::Status { json } => status(&cfg, json).await,
        Cmd::Skip => edit_saved(&cfg, "skipped", |mut queue| async move {
            let front = queue.peek_next().map(|t| t.id).context("queue is empty")?;
            Ok::<_, anyhow::Error>(queue.skip_and_log(front).await?)
        })
        .await,
        Cmd::Revert => edit_saved(&cfg, "reverted", |mut queue| async move {
            Ok::<_, anyhow::Error>(queue.revert_last().await?)
        })
        .await,
        Cmd::Clear => {
            let store = tether::open_store(&cfg.state).await?;
            store.clear().await?;
            println!("cleared {}", store.describe());
            Ok(())
        }
        Cmd::Check => {
            cfg.validate().context("configuration pre-flight")?;
            cfg.persona_table().validate().context("persona table")?;
            let payloads = tether::read_payloads(&cfg.tasks.file, &cfg.tasks.separator).await?;
            println!(
                "configuration ok: {} tasks in {}",
                payloads.len(),
                cfg.tasks.file.display()
            );
            Ok(())
        }
    }
}

async fn run(
    cfg: CadenceConfig,
    report_dir: PathBuf,
    seed: Option<u64>,
    console: bool,
    paused: bool,
    rt: CadenceHandle,
) -> Result<()> {
    // operator commands need a terminal; piped or closed stdin runs unattended
    let console = console && std::io::stdin().is_terminal();
    let tether = tether::build_from_config(&cfg, report_dir, seed, !console).await?;
    let engine = tether.handle();
    let shutdown = rt.shutdown_token();
    let finished = rt.spawn(tether.run(shutdown.clone()));

    let on_signal = shutdown.clone();
    rt.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("app.ctrl_c");
            on_signal.cancel();
        }
    });

    if !paused {
        if let Err(e) = engine.start().await {
            eprintln!("not started: {e:#}");
            if !console {
                shutdown.cancel();
            }
        }
    }
    if console {
        rt.spawn(console::run(engine.clone(), shutdown.clone()));
    }

    let summary = finished.await.context("engine task panicked")??;
    shutdown.cancel();
    let reason = summary
        .reason
        .as_ref()
        .map_or_else(|| "not started".to_string(), ToString::to_string);
    println!(
        "{reason}: {} completed, {} skipped ({} failed), {} left, {} breaks",
        summary.completed, summary.skipped, summary.failed, summary.remaining, summary.breaks
    );
    if let Some(path) = &summary.report {
        println!("report: {}", path.display());
    }
    Ok(())
}

async fn status(cfg: &CadenceConfig, json: bool) -> Result<()> {
    let store = tether::open_store(&cfg.state).await?;
    let Some(state) = store.load().await? else {
        println!("no saved state in {}", store.describe());
        return Ok(());
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }
    println!("store     : {}", store.describe());
    println!("remaining : {}", state.remaining.len());
    println!(
        "done      : {} completed, {} skipped ({} failed)",
        state.completed_count, state.skipped_count, state.failed_count
    );
    if let Some(next) = state.remaining.front() {
        println!("next      : {}", next.excerpt(60));
    }
    println!("updated   : {}", state.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(())
}

/// Apply one queue edit to the saved state without running anything.
async fn edit_saved<F, Fut>(cfg: &CadenceConfig, verb: &str, edit: F) -> Result<()>
where
    F: FnOnce(TaskQueue) -> Fut,
    Fut: std::future::Future<Output = Result<Option<cadence_actors::Task>>>,
{
    let store = tether::open_store(&cfg.state).await?;
    let state = store
        .load()
        .await?
        .with_context(|| format!("no saved state in {}", store.describe()))?;
    let queue = TaskQueue::with_state(store, state);
    match edit(queue).await? {
        Some(task) => println!("{verb}: {}", task.excerpt(60)),
        None => println!("nothing {verb}"),
    }
    Ok(())
}

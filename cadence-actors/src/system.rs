//! Task tracking and shutdown signalling for the actors of one process.
//!
//! Actors subscribe to the broadcast channel for cooperative shutdown, while the
//! `JoinSet` ensures spawned tasks are awaited during teardown.
use anyhow::Result;
use tokio::{sync::broadcast, task::JoinSet};

use crate::actor::{spawn_actor_with_shutdown, Actor, ActorHandle, Addr};

#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn signal(&self) {
        let _ = self.tx.send(());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

pub struct ActorSystem {
    joinset: JoinSet<Result<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(8);
        Self {
            joinset: JoinSet::new(),
            shutdown_tx,
        }
    }

    pub fn shutdown_notifier(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    pub fn track(&mut self, fut: impl std::future::Future<Output = Result<()>> + Send + 'static) {
        self.joinset.spawn(fut);
    }

    /// Spawn an actor wired to this system's shutdown broadcast and track its task.
    pub fn spawn<A: Actor>(&mut self, actor: A, mailbox: usize) -> Addr<A> {
        let ActorHandle { addr, task } =
            spawn_actor_with_shutdown(actor, mailbox, Some(self.shutdown_notifier()));
        self.track(async move { task.await? });
        addr
    }

    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Broadcast shutdown and wait for every tracked task. The first task
    /// error (or panic) is returned after all tasks have been joined.
    pub async fn graceful_shutdown(mut self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        let mut first_err = None;
        while let Some(res) = self.joinset.join_next().await {
            let outcome = res.map_err(anyhow::Error::from).and_then(|r| r);
            if let Err(e) = outcome {
                tracing::warn!(target = "cadence-actors", error = ?e, "system.task_failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Block until CTRL-C or an internal shutdown signal, then shut down gracefully.
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_notifier();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target = "cadence-actors", "system.ctrl_c");
            }
            _ = shutdown_rx.recv() => {}
        }
        self.graceful_shutdown().await
    }
}

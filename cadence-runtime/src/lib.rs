//! Scheduling runtime for cadence: the automation loop, its rhythm and
//! session bookkeeping, the tick-driven [`Engine`](engine::Engine) and the
//! Tokio runtime wrapper the binary runs on.
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod engine;
pub mod machine;
pub mod report;
pub mod rhythm;
pub mod session;

pub use engine::{Engine, EngineConfig, EngineHandle, EngineSummary, StatusSnapshot};
pub use machine::{AutomationLoop, Directive, LoopSettings, LoopState, Phase, StopReason};

/// Multi-threaded Tokio runtime plus the token that tells everything on it to wind down.
pub struct CadenceRuntime {
    runtime: Runtime,
    shutdown: CancellationToken,
}

/// Cheap clone of the runtime handle and its shutdown token.
#[derive(Clone)]
pub struct CadenceHandle {
    inner: Handle,
    shutdown: CancellationToken,
}

impl CadenceRuntime {
    /// Build the runtime. `worker_threads` of `None` keeps Tokio's default.
    ///
    /// ```
    /// use cadence_runtime::CadenceRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = CadenceRuntime::build("cadence-doc", Some(1)).expect("runtime builds");
    /// assert_eq!(runtime.block_on(async { 6 * 7 }), 42);
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn build(thread_name: &str, worker_threads: Option<usize>) -> Result<Self> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name(thread_name);
        if let Some(workers) = worker_threads {
            builder.worker_threads(workers.max(1));
        }
        let runtime = builder
            .build()
            .with_context(|| format!("building runtime {thread_name}"))?;
        Ok(Self {
            runtime,
            shutdown: CancellationToken::new(),
        })
    }

    /// ```
    /// use cadence_runtime::CadenceRuntime;
    ///
    /// let runtime = CadenceRuntime::build("cadence-handle", Some(1)).unwrap();
    /// assert!(!runtime.handle().shutdown_token().is_cancelled());
    /// ```
    pub fn handle(&self) -> CadenceHandle {
        CadenceHandle {
            inner: self.runtime.handle().clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    /// Fire the shutdown token, then give running tasks `graceful` to finish.
    ///
    /// ```
    /// use cadence_runtime::CadenceRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = CadenceRuntime::build("cadence-shutdown", Some(1)).unwrap();
    /// let token = runtime.handle().shutdown_token();
    /// runtime.shutdown(Duration::from_millis(5));
    /// assert!(token.is_cancelled());
    /// ```
    pub fn shutdown(self, graceful: Duration) {
        self.shutdown.cancel();
        self.runtime.shutdown_timeout(graceful);
    }
}

impl CadenceHandle {
    /// ```
    /// use cadence_runtime::CadenceRuntime;
    /// use std::time::Duration;
    ///
    /// let runtime = CadenceRuntime::build("cadence-spawn", Some(1)).unwrap();
    /// let task = runtime.handle().spawn(async { "submitted" });
    /// let out = runtime.block_on(async move { task.await.unwrap() });
    /// assert_eq!(out, "submitted");
    /// runtime.shutdown(Duration::from_millis(10));
    /// ```
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.spawn(fut)
    }

    /// Token cancelled when the runtime shuts down. Engines and consoles select on it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Ask everything on the runtime to stop without tearing it down yet.
    ///
    /// ```
    /// use cadence_runtime::CadenceRuntime;
    ///
    /// let runtime = CadenceRuntime::build("cadence-request", Some(1)).unwrap();
    /// let handle = runtime.handle();
    /// handle.request_shutdown();
    /// assert!(handle.shutdown_token().is_cancelled());
    /// ```
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }
}

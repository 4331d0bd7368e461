//! Actor plumbing and durable work tracking for Cadence.
//!
//! - [`actor`] / [`system`]: bounded-mailbox actors with broadcast shutdown
//! - [`queue`]: tasks, outcomes and the persisted [`ScheduleState`]
//! - [`store`]: JSON file, SQLite and in-memory [`StateStore`]s
//! - [`retry`]: backoff for transient failures
//! - [`script`] / [`worker`]: the single worker that plays a task
pub mod actor;
pub mod queue;
pub mod retry;
pub mod script;
pub mod store;
pub mod system;
pub mod worker;

pub use queue::{HistoryEntry, Outcome, ScheduleState, Task, TaskQueue, TaskStatus};
pub use retry::{RetryError, RetryPolicy};
pub use script::{SubmitMethod, TaskScript};
pub use store::{JsonFileStore, MemoryStore, SqliteStore, StateStore};
pub use worker::{RunContext, TaskOutcome, TaskReport, WorkerActor, WorkerMsg};

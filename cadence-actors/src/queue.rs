//! Durable task queue.
//!
//! [`ScheduleState`] is the whole persisted record. [`TaskQueue`] owns one
//! and a [`StateStore`]; every mutation is applied to a copy, saved, and only
//! then committed, so a failed save leaves the in-memory queue untouched and
//! surfaces as a fatal [`CadenceError::Storage`].
//!
//! A task leaves `remaining` only once its outcome is recorded. A crash in
//! the middle of a task therefore re-attempts it on restart instead of
//! losing or duplicating it.
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use cadence_common::{CadenceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::StateStore;

/// Oldest entries are dropped beyond this many.
pub const HISTORY_CAP: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub payload: String,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            status: TaskStatus::Pending,
        }
    }

    /// First `max` characters of the payload on a single line.
    pub fn excerpt(&self, max: usize) -> String {
        let flat: String = self
            .payload
            .chars()
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        let mut out: String = flat.chars().take(max).collect();
        if flat.chars().count() > max {
            out.push_str("...");
        }
        out
    }
}

/// Terminal outcome recorded for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    /// Removed by the operator.
    Skipped,
    /// Gave up after retries. Counted in `skipped_count`.
    Failed,
}

impl Outcome {
    fn status(self) -> TaskStatus {
        match self {
            Outcome::Completed => TaskStatus::Done,
            Outcome::Skipped => TaskStatus::Skipped,
            Outcome::Failed => TaskStatus::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Completed => "completed",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub task: Task,
    pub outcome: Outcome,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub remaining: VecDeque<Task>,
    pub completed_count: u64,
    /// Operator skips plus failures.
    pub skipped_count: u64,
    /// The failed share of `skipped_count`.
    #[serde(default)]
    pub failed_count: u64,
    #[serde(default)]
    pub history: VecDeque<HistoryEntry>,
    /// How many entries of the task source this record has absorbed.
    #[serde(default)]
    pub source_cursor: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleState {
    pub fn from_payloads<I, S>(payloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        let remaining: VecDeque<Task> = payloads.into_iter().map(Task::new).collect();
        Self {
            source_cursor: remaining.len() as u64,
            remaining,
            completed_count: 0,
            skipped_count: 0,
            failed_count: 0,
            history: VecDeque::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `remaining + completed + skipped`; constant for a given task list.
    pub fn total(&self) -> u64 {
        self.remaining.len() as u64 + self.completed_count + self.skipped_count
    }

    pub fn in_progress(&self) -> Option<&Task> {
        self.remaining
            .iter()
            .find(|t| t.status == TaskStatus::InProgress)
    }

    fn record(&mut self, mut task: Task, outcome: Outcome) {
        task.status = outcome.status();
        match outcome {
            Outcome::Completed => self.completed_count += 1,
            Outcome::Skipped => self.skipped_count += 1,
            Outcome::Failed => {
                self.skipped_count += 1;
                self.failed_count += 1;
            }
        }
        self.history.push_back(HistoryEntry {
            task,
            outcome,
            at: Utc::now(),
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }
    }

    /// A task left in progress by a crash goes back to pending.
    fn recover(&mut self) -> usize {
        let mut n = 0;
        for t in self
            .remaining
            .iter_mut()
            .filter(|t| t.status == TaskStatus::InProgress)
        {
            t.status = TaskStatus::Pending;
            n += 1;
        }
        n
    }
}

pub struct TaskQueue {
    state: ScheduleState,
    store: Arc<dyn StateStore>,
}

impl TaskQueue {
    /// Resume from `store` when it holds a record, appending only the
    /// `payloads` past its source cursor; otherwise start fresh from `payloads`.
    pub async fn open<I, S>(store: Arc<dyn StateStore>, payloads: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match store.load().await? {
            Some(mut state) => {
                let recovered = state.recover();
                info!(
                    store = %store.describe(),
                    remaining = state.remaining.len(),
                    completed = state.completed_count,
                    skipped = state.skipped_count,
                    recovered,
                    "queue.resumed"
                );
                let mut queue = Self { state, store };
                queue.extend_from_source(payloads).await?;
                Ok(queue)
            }
            None => {
                let state = ScheduleState::from_payloads(payloads);
                info!(store = %store.describe(), tasks = state.remaining.len(), "queue.created");
                let queue = Self { state, store };
                queue.save().await?;
                Ok(queue)
            }
        }
    }

    /// Wrap an existing record without touching storage.
    pub fn with_state(store: Arc<dyn StateStore>, state: ScheduleState) -> Self {
        Self { state, store }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn peek_next(&self) -> Option<&Task> {
        self.state.remaining.front()
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.remaining.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.remaining.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_exhausted()
    }

    /// Mark the front task in progress and return a copy of it.
    pub async fn begin_next(&mut self) -> Result<Option<Task>> {
        if let Some(t) = self.state.in_progress() {
            return Err(CadenceError::Storage(format!(
                "task {} is already in progress",
                t.id
            )));
        }
        if self.state.remaining.is_empty() {
            return Ok(None);
        }
        let next = self
            .commit(|s| {
                let front = s.remaining.front_mut()?;
                front.status = TaskStatus::InProgress;
                Some(front.clone())
            })
            .await?;
        if let Some(t) = &next {
            debug!(task_id = %t.id, "queue.begin_next");
        }
        Ok(next)
    }

    /// Put an interrupted in-progress task back to pending, keeping its place.
    pub async fn release_in_progress(&mut self) -> Result<Option<Task>> {
        let released = self
            .commit(|s| {
                let task = s
                    .remaining
                    .iter_mut()
                    .find(|t| t.status == TaskStatus::InProgress)?;
                task.status = TaskStatus::Pending;
                Some(task.clone())
            })
            .await?;
        if let Some(t) = &released {
            debug!(task_id = %t.id, "queue.release_in_progress");
        }
        Ok(released)
    }

    /// Remove the front task and record `outcome` for it.
    pub async fn pop_front(&mut self, outcome: Outcome) -> Result<Option<Task>> {
        let popped = self
            .commit(|s| {
                let task = s.remaining.pop_front()?;
                s.record(task.clone(), outcome);
                Some(task)
            })
            .await?;
        if let Some(t) = &popped {
            info!(
                task_id = %t.id,
                %outcome,
                remaining = self.state.remaining.len(),
                completed = self.state.completed_count,
                skipped = self.state.skipped_count,
                "queue.pop_front"
            );
        }
        Ok(popped)
    }

    /// Operator skip of a queued task; returns `None` if `task_id` is not queued.
    pub async fn skip_and_log(&mut self, task_id: Uuid) -> Result<Option<Task>> {
        let skipped = self
            .commit(|s| {
                let idx = s.remaining.iter().position(|t| t.id == task_id)?;
                let task = s.remaining.remove(idx)?;
                s.record(task.clone(), Outcome::Skipped);
                Some(task)
            })
            .await?;
        match &skipped {
            Some(t) => info!(task_id = %t.id, excerpt = %t.excerpt(40), "queue.skip"),
            None => warn!(%task_id, "queue.skip.not_queued"),
        }
        Ok(skipped)
    }

    /// Undo the most recent outcome: the task returns to the front as pending
    /// and its counter is decremented. `None` when there is no history.
    pub async fn revert_last(&mut self) -> Result<Option<Task>> {
        let reverted = self
            .commit(|s| {
                let entry = s.history.pop_back()?;
                match entry.outcome {
                    Outcome::Completed => {
                        s.completed_count = s.completed_count.saturating_sub(1)
                    }
                    Outcome::Skipped => s.skipped_count = s.skipped_count.saturating_sub(1),
                    Outcome::Failed => {
                        s.skipped_count = s.skipped_count.saturating_sub(1);
                        s.failed_count = s.failed_count.saturating_sub(1);
                    }
                }
                let mut task = entry.task;
                task.status = TaskStatus::Pending;
                s.remaining.push_front(task.clone());
                Some((task, entry.outcome))
            })
            .await?;
        Ok(reverted.map(|(task, outcome)| {
            info!(task_id = %task.id, %outcome, "queue.revert_last");
            task
        }))
    }

    /// Append the source entries past `source_cursor`. The task source is
    /// read in full on every start; entries before the cursor were already
    /// queued once, whatever has happened to them since.
    pub async fn extend_from_source<I, S>(&mut self, payloads: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let cursor = self.state.source_cursor;
        let mut seen = 0u64;
        let fresh: Vec<Task> = payloads
            .into_iter()
            .inspect(|_| seen += 1)
            .skip(cursor as usize)
            .map(Task::new)
            .collect();
        if seen < cursor {
            warn!(cursor, entries = seen, "queue.source_shrank");
        }
        if fresh.is_empty() {
            return Ok(0);
        }
        let added = fresh.len();
        self.commit(move |s| {
            s.source_cursor += fresh.len() as u64;
            s.remaining.extend(fresh);
            Some(())
        })
        .await?;
        info!(added, remaining = self.state.remaining.len(), "queue.extend_from_source");
        Ok(added)
    }

    /// Replace the in-memory record with whatever storage holds.
    pub async fn load(&mut self) -> Result<bool> {
        match self.store.load().await? {
            Some(mut state) => {
                state.recover();
                self.state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn save(&self) -> Result<()> {
        self.store.save(&self.state).await
    }

    /// Drop the stored record, typically once the queue is exhausted.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await?;
        info!(store = %self.store.describe(), "queue.cleared");
        Ok(())
    }

    async fn commit<T>(
        &mut self,
        f: impl FnOnce(&mut ScheduleState) -> Option<T>,
    ) -> Result<Option<T>> {
        let mut next = self.state.clone();
        let Some(out) = f(&mut next) else {
            return Ok(None);
        };
        next.updated_at = Utc::now();
        self.store.save(&next).await?;
        self.state = next;
        Ok(Some(out))
    }
}

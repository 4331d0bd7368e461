//! Durable storage for [`ScheduleState`].
//!
//! Every backend stores the whole record and overwrites it in one step, so
//! whatever is read back on the next start is a complete record from some
//! earlier save. Failures are reported as [`CadenceError::Storage`], which
//! the automation loop treats as fatal.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use cadence_common::{CadenceError, Result};
use sqlx::{Row, SqlitePool};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::queue::ScheduleState;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when nothing has been saved yet (or it was cleared).
    async fn load(&self) -> Result<Option<ScheduleState>>;
    async fn save(&self, state: &ScheduleState) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    /// Short human-readable location for logs.
    fn describe(&self) -> String;
}

fn storage<E: std::fmt::Display>(
    what: &str,
    path: impl AsRef<Path>,
) -> impl FnOnce(E) -> CadenceError {
    let at = path.as_ref().display().to_string();
    let what = what.to_string();
    move |e| CadenceError::Storage(format!("{what} {at}: {e}"))
}

/// One pretty-printed JSON file, replaced atomically on save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<Option<ScheduleState>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage("read", &self.path)(e)),
        };
        let state: ScheduleState =
            serde_json::from_str(&contents).map_err(storage("parse", &self.path))?;
        debug!(path = %self.path.display(), remaining = state.remaining.len(), "store.json.load");
        Ok(Some(state))
    }

    async fn save(&self, state: &ScheduleState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(storage("create", dir))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        let mut file = fs::File::create(&temp).await.map_err(storage("create", &temp))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(storage("write", &temp))?;
        file.flush().await.map_err(storage("flush", &temp))?;
        file.sync_all().await.map_err(storage("sync", &temp))?;
        drop(file);
        fs::rename(&temp, &self.path)
            .await
            .map_err(storage("rename", &self.path))?;
        debug!(path = %self.path.display(), bytes = json.len(), "store.json.save");
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage("remove", &self.path)(e)),
        }
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// One row per task set in a SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
    set_id: String,
}

impl SqliteStore {
    /// Connect and create the table if needed.
    pub async fn connect(url: &str, set_id: impl Into<String>) -> Result<Self> {
        let pool = SqlitePool::connect(url)
            .await
            .map_err(|e| CadenceError::Storage(format!("connect {url}: {e}")))?;
        Self::with_pool(pool, set_id).await
    }

    pub async fn with_pool(pool: SqlitePool, set_id: impl Into<String>) -> Result<Self> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS schedule_state (
                 set_id     TEXT PRIMARY KEY,
                 body       TEXT NOT NULL,
                 updated_at TEXT NOT NULL
               )"#,
        )
        .execute(&pool)
        .await
        .map_err(sql_err)?;
        Ok(Self {
            pool,
            set_id: set_id.into(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn sql_err(e: sqlx::Error) -> CadenceError {
    CadenceError::Storage(format!("sqlite: {e}"))
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self) -> Result<Option<ScheduleState>> {
        let row = sqlx::query("SELECT body FROM schedule_state WHERE set_id = ?1")
            .bind(&self.set_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.try_get("body").map_err(sql_err)?;
        Ok(Some(serde_json::from_str(&body)?))
    }

    async fn save(&self, state: &ScheduleState) -> Result<()> {
        let body = serde_json::to_string(state)?;
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let res = sqlx::query(
            r#"INSERT INTO schedule_state (set_id, body, updated_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(set_id) DO UPDATE SET
                 body=excluded.body,
                 updated_at=excluded.updated_at"#,
        )
        .bind(&self.set_id)
        .bind(&body)
        .bind(state.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        debug!(
            set_id = %self.set_id,
            rows = res.rows_affected(),
            remaining = state.remaining.len(),
            "store.sqlite.save"
        );
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let res = sqlx::query("DELETE FROM schedule_state WHERE set_id = ?1")
            .bind(&self.set_id)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        info!(set_id = %self.set_id, rows = res.rows_affected(), "store.sqlite.clear");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.set_id)
    }
}

#[derive(Default)]
struct MemoryInner {
    state: Option<ScheduleState>,
    fail_saves: u32,
    saves: u64,
}

/// Keeps the record in memory; can be told to fail saves.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The next `n` saves fail with a storage error.
    pub fn fail_saves(&self, n: u32) {
        self.inner().fail_saves = n;
    }

    pub fn snapshot(&self) -> Option<ScheduleState> {
        self.inner().state.clone()
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> u64 {
        self.inner().saves
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Option<ScheduleState>> {
        Ok(self.snapshot())
    }

    async fn save(&self, state: &ScheduleState) -> Result<()> {
        let mut inner = self.inner();
        if inner.fail_saves > 0 {
            inner.fail_saves -= 1;
            return Err(CadenceError::Storage("injected save failure".into()));
        }
        inner.state = Some(state.clone());
        inner.saves += 1;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner().state = None;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        assert!(store.load().await.unwrap().is_none());

        let state = ScheduleState::from_payloads(["one", "two"]);
        store.save(&state).await.unwrap();
        assert!(!store.temp_path().exists());
        assert_eq!(store.load().await.unwrap().unwrap(), state);

        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_json_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CadenceError::Storage(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn sqlite_store_keeps_one_row_per_set() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("state.db").display());
        let a = SqliteStore::connect(&url, "a").await.unwrap();
        let b = SqliteStore::with_pool(a.pool().clone(), "b").await.unwrap();

        let mut state = ScheduleState::from_payloads(["x", "y"]);
        a.save(&state).await.unwrap();
        state.completed_count = 1;
        state.remaining.pop_front();
        a.save(&state).await.unwrap();

        assert_eq!(a.load().await.unwrap().unwrap(), state);
        assert!(b.load().await.unwrap().is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schedule_state")
            .fetch_one(a.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        a.clear().await.unwrap();
        assert!(a.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_injects_failures() {
        let store = MemoryStore::new();
        store.fail_saves(1);
        let state = ScheduleState::from_payloads(["x"]);
        assert!(store.save(&state).await.is_err());
        store.save(&state).await.unwrap();
        assert_eq!(store.save_count(), 1);
    }
}

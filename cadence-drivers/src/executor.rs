//! Seams to the machine being driven.
//!
//! Implementations move a real pointer or send real keys; this crate only
//! decides what to send and when.
use async_trait::async_trait;
use cadence_common::{CadenceError, Point, Region};

use crate::human::typing::Key;

/// Low-level input primitives.
///
/// Errors are treated as transient unless they wrap a [`CadenceError`], in
/// which case that classification is kept.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn move_pointer_to(&self, p: Point) -> anyhow::Result<()>;
    async fn click(&self) -> anyhow::Result<()>;
    async fn press_key(&self, key: Key) -> anyhow::Result<()>;
    async fn release_key(&self, key: Key) -> anyhow::Result<()>;
    async fn read_clipboard(&self) -> anyhow::Result<String>;
    async fn write_clipboard(&self, text: &str) -> anyhow::Result<()>;
    /// Positive scrolls down.
    async fn scroll(&self, delta: i32) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ScreenGeometry: Send + Sync {
    async fn pointer_position(&self) -> anyhow::Result<Point>;
    fn bounds(&self) -> Region;
}

/// Map an executor error onto the shared taxonomy.
pub fn classify(err: anyhow::Error) -> CadenceError {
    match err.downcast::<CadenceError>() {
        Ok(known) => known,
        Err(other) => CadenceError::Driver(other),
    }
}

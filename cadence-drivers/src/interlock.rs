//! Emergency stop and cooperative cancellation.
//!
//! Moving the pointer into any corner of the screen trips the
//! [`SafetyInterlock`]. A tripped interlock stays tripped until it is reset
//! explicitly, and every [`Checkpoint`] sharing it fails from then on.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cadence_common::{CadenceError, Point, Region, Result};
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Longest uninterrupted sleep inside [`Checkpoint::sleep`].
pub const CHECK_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SafetyInterlock {
    screen: Region,
    corner: f64,
    tripped: Arc<AtomicBool>,
    at_x: Arc<AtomicU64>,
    at_y: Arc<AtomicU64>,
}

impl SafetyInterlock {
    pub fn new(screen: Region, corner: f64) -> Self {
        Self {
            screen,
            corner,
            tripped: Arc::new(AtomicBool::new(false)),
            at_x: Arc::new(AtomicU64::new(0)),
            at_y: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether `p` lies within `corner` pixels of both a horizontal and a
    /// vertical screen edge. Points off the screen count as the nearest edge.
    pub fn in_reserved_corner(&self, p: Point) -> bool {
        let s = &self.screen;
        let near_x = p.x <= s.x1 + self.corner || p.x >= s.x2 - self.corner;
        let near_y = p.y <= s.y1 + self.corner || p.y >= s.y2 - self.corner;
        near_x && near_y
    }

    /// Trip if `p` is in a reserved corner.
    pub fn check_point(&self, p: Point) -> Result<()> {
        if self.in_reserved_corner(p) {
            self.trip(p);
            return Err(CadenceError::Interlock { x: p.x, y: p.y });
        }
        self.ensure_clear()
    }

    pub fn trip(&self, p: Point) {
        self.at_x.store(p.x.to_bits(), Ordering::SeqCst);
        self.at_y.store(p.y.to_bits(), Ordering::SeqCst);
        if !self.tripped.swap(true, Ordering::SeqCst) {
            error!(x = p.x, y = p.y, "interlock.tripped");
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Where the interlock was tripped, if it is.
    pub fn tripped_at(&self) -> Option<Point> {
        self.is_tripped().then(|| {
            Point::new(
                f64::from_bits(self.at_x.load(Ordering::SeqCst)),
                f64::from_bits(self.at_y.load(Ordering::SeqCst)),
            )
        })
    }

    pub fn ensure_clear(&self) -> Result<()> {
        match self.tripped_at() {
            Some(p) => Err(CadenceError::Interlock { x: p.x, y: p.y }),
            None => Ok(()),
        }
    }

    pub fn reset(&self) {
        self.tripped.store(false, Ordering::SeqCst);
    }
}

/// Suspension point shared by every step of a task.
///
/// ```
/// use cadence_common::{CadenceError, Point, Region};
/// use cadence_drivers::{Checkpoint, SafetyInterlock};
/// use tokio_util::sync::CancellationToken;
///
/// let interlock = SafetyInterlock::new(Region::screen(1920.0, 1080.0), 3.0);
/// let checkpoint = Checkpoint::new(CancellationToken::new(), interlock.clone());
/// assert!(checkpoint.check().is_ok());
///
/// interlock.trip(Point::new(0.0, 0.0));
/// assert!(matches!(checkpoint.check(), Err(CadenceError::Interlock { .. })));
/// ```
#[derive(Debug, Clone)]
pub struct Checkpoint {
    cancel: CancellationToken,
    interlock: SafetyInterlock,
}

impl Checkpoint {
    pub fn new(cancel: CancellationToken, interlock: SafetyInterlock) -> Self {
        Self { cancel, interlock }
    }

    pub fn interlock(&self) -> &SafetyInterlock {
        &self.interlock
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The interlock wins over a pending stop.
    pub fn check(&self) -> Result<()> {
        self.interlock.ensure_clear()?;
        if self.cancel.is_cancelled() {
            return Err(CadenceError::Cancelled);
        }
        Ok(())
    }

    /// Sleep in slices of at most [`CHECK_SLICE`], checking between slices.
    pub async fn sleep(&self, total: Duration) -> Result<()> {
        let mut remaining = total;
        loop {
            self.check()?;
            if remaining.is_zero() {
                return Ok(());
            }
            let step = remaining.min(CHECK_SLICE);
            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(step) => {}
            }
            remaining = remaining.saturating_sub(step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interlock() -> SafetyInterlock {
        SafetyInterlock::new(Region::screen(1920.0, 1080.0), 3.0)
    }

    #[test]
    fn only_corners_are_reserved() {
        let il = interlock();
        assert!(il.in_reserved_corner(Point::new(0.0, 0.0)));
        assert!(il.in_reserved_corner(Point::new(1919.0, 1079.0)));
        assert!(il.in_reserved_corner(Point::new(2.0, 1078.0)));
        assert!(!il.in_reserved_corner(Point::new(0.0, 540.0)));
        assert!(!il.in_reserved_corner(Point::new(10.0, 10.0)));
    }

    #[test]
    fn trip_is_sticky_until_reset() {
        let il = interlock();
        assert!(il.check_point(Point::new(1918.0, 1.0)).is_err());
        assert!(il.check_point(Point::new(900.0, 500.0)).is_err());
        assert_eq!(il.tripped_at(), Some(Point::new(1918.0, 1.0)));
        il.reset();
        assert!(il.check_point(Point::new(900.0, 500.0)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_stops_at_the_next_slice_after_cancel() {
        let cancel = CancellationToken::new();
        let cp = Checkpoint::new(cancel.clone(), interlock());
        let started = tokio::time::Instant::now();
        let sleeper = tokio::spawn({
            let cp = cp.clone();
            async move { cp.sleep(Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_millis(120)).await;
        cancel.cancel();
        let res = sleeper.await.unwrap();
        assert!(matches!(res, Err(CadenceError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn interlock_beats_cancellation() {
        let cancel = CancellationToken::new();
        let il = interlock();
        let cp = Checkpoint::new(cancel.clone(), il.clone());
        cancel.cancel();
        il.trip(Point::new(0.0, 0.0));
        assert!(matches!(
            cp.sleep(Duration::from_secs(1)).await,
            Err(CadenceError::Interlock { .. })
        ));
    }
}

//! Session timing, fatigue and the per-task log used for the report.
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::Instant;

/// Fatigue level never exceeds this; the slowdown multiplier tops out at `1 + FATIGUE_CAP`.
pub const FATIGUE_CAP: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub index: usize,
    pub excerpt: String,
    pub outcome: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl TaskRecord {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    started_at: DateTime<Local>,
    started: Instant,
    last_update: Instant,
    fatigue: f64,
    records: Vec<TaskRecord>,
}

impl Session {
    pub fn start(now: Instant) -> Self {
        Self {
            started_at: Local::now(),
            started: now,
            last_update: now,
            fatigue: 0.0,
            records: Vec::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Accumulate fatigue for the time since the last update at `rate_per_hour`.
    ///
    /// The level only ever grows (up to [`FATIGUE_CAP`]); a persona change
    /// alters the rate from here on, never the level already reached.
    pub fn accumulate(&mut self, now: Instant, rate_per_hour: f64) -> f64 {
        let dt = now.saturating_duration_since(self.last_update);
        self.last_update = self.last_update.max(now);
        let gained = dt.as_secs_f64() / 3600.0 * rate_per_hour.max(0.0);
        self.fatigue = (self.fatigue + gained).min(FATIGUE_CAP);
        self.fatigue
    }

    pub fn fatigue_level(&self) -> f64 {
        self.fatigue
    }

    /// Slowdown applied to motion and typing durations.
    pub fn fatigue_multiplier(&self) -> f64 {
        1.0 + self.fatigue
    }

    pub fn record(&mut self, record: TaskRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TaskRecord] {
        &self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatigue_is_monotone_and_capped() {
        let t0 = Instant::now();
        let mut s = Session::start(t0);
        let hour = Duration::from_secs(3600);

        assert!((s.accumulate(t0 + hour, 0.2) - 0.2).abs() < 1e-9);
        // a gentler persona slows growth but never lowers the level
        assert!((s.accumulate(t0 + hour * 2, 0.0) - 0.2).abs() < 1e-9);
        // an earlier instant adds nothing
        assert!((s.accumulate(t0, 0.2) - 0.2).abs() < 1e-9);
        assert_eq!(s.accumulate(t0 + hour * 10, 0.2), FATIGUE_CAP);
        assert_eq!(s.fatigue_multiplier(), 1.0 + FATIGUE_CAP);
    }

    #[test]
    fn new_session_starts_rested() {
        let s = Session::start(Instant::now());
        assert_eq!(s.fatigue_level(), 0.0);
        assert_eq!(s.fatigue_multiplier(), 1.0);
        assert!(s.records().is_empty());
    }
}

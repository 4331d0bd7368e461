//! Batch and break bookkeeping.
use std::time::Duration;

use tokio::time::Instant;

/// Counts successful tasks in the current batch and holds the break window.
///
/// Once `processed >= threshold` a break is due, and it stays due until
/// [`BioRhythm::finish_break`] runs. Nothing here lets a caller skip it.
#[derive(Debug, Clone, PartialEq)]
pub struct BioRhythm {
    processed: u32,
    threshold: u32,
    break_until: Option<Instant>,
    breaks_taken: u32,
}

impl BioRhythm {
    pub fn new(threshold: u32) -> Self {
        Self {
            processed: 0,
            threshold: threshold.max(1),
            break_until: None,
            breaks_taken: 0,
        }
    }

    pub fn processed(&self) -> u32 {
        self.processed
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn breaks_taken(&self) -> u32 {
        self.breaks_taken
    }

    /// Count one successful task. Returns whether a break is now due.
    pub fn record_success(&mut self) -> bool {
        self.processed = self.processed.saturating_add(1);
        self.break_due()
    }

    pub fn break_due(&self) -> bool {
        self.processed >= self.threshold
    }

    pub fn on_break(&self) -> bool {
        self.break_until.is_some()
    }

    pub fn start_break(&mut self, now: Instant, length: Duration) -> Instant {
        let until = now + length;
        self.break_until = Some(until);
        until
    }

    /// Time left on the current break, `None` when not on one.
    pub fn break_remaining(&self, now: Instant) -> Option<Duration> {
        self.break_until
            .map(|until| until.saturating_duration_since(now))
    }

    pub fn break_elapsed(&self, now: Instant) -> bool {
        self.break_until.is_some_and(|until| now >= until)
    }

    /// End the break and open a new batch with `threshold`.
    pub fn finish_break(&mut self, threshold: u32) {
        self.break_until = None;
        self.processed = 0;
        self.threshold = threshold.max(1);
        self.breaks_taken += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn break_becomes_due_at_the_threshold() {
        let mut r = BioRhythm::new(2);
        assert!(!r.record_success());
        assert!(r.record_success());
        assert!(r.break_due());
        // still due until the break is finished
        assert!(r.record_success());
    }

    #[test]
    fn finishing_a_break_resets_the_batch() {
        let now = Instant::now();
        let mut r = BioRhythm::new(1);
        r.record_success();
        let until = r.start_break(now, Duration::from_secs(90));
        assert_eq!(until - now, Duration::from_secs(90));
        assert_eq!(r.break_remaining(now), Some(Duration::from_secs(90)));
        assert!(!r.break_elapsed(now));
        assert!(r.break_elapsed(until));

        r.finish_break(7);
        assert_eq!(r.processed(), 0);
        assert_eq!(r.threshold(), 7);
        assert!(!r.on_break());
        assert_eq!(r.breaks_taken(), 1);
    }

    #[test]
    fn zero_threshold_is_raised_to_one() {
        assert_eq!(BioRhythm::new(0).threshold(), 1);
    }
}

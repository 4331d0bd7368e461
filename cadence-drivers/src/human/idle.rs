//! Filler behaviour for wait windows and the distraction routine that can
//! precede a task.
use std::time::Duration;

use cadence_common::{Point, Region};
use rand::Rng;

use super::motion::shake_points;

/// Chance that a single idle opportunity does anything at all.
pub const DEFAULT_IDLE_PROBABILITY: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub enum IdleAction {
    /// Drift the pointer to a nearby point inside the safe region.
    Wiggle { to: Point },
    Scroll { delta: i32 },
    /// Alt-tab away and back after `away`.
    GlanceAway { away: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Distraction {
    /// Tab forward `forward` times, then Shift+Tab back the same count.
    TabCycle { forward: u32 },
    AltTabAndBack { away: Duration },
    ConfusedScroll { deltas: Vec<i32> },
    Shake { points: Vec<Point> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleSimulator {
    probability: f64,
}

impl Default for IdleSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_PROBABILITY)
    }
}

impl IdleSimulator {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
        }
    }

    /// Usually `None`. Any pointer target lies inside `safe`.
    pub fn choose<R: Rng + ?Sized>(
        &self,
        safe: &Region,
        pointer: Point,
        rng: &mut R,
    ) -> Option<IdleAction> {
        if self.probability <= 0.0 || !rng.gen_bool(self.probability) {
            return None;
        }
        let action = match rng.gen_range(0..3) {
            0 => {
                let nearby = Point::new(
                    pointer.x + rng.gen_range(-60.0..=60.0),
                    pointer.y + rng.gen_range(-40.0..=40.0),
                );
                IdleAction::Wiggle {
                    to: safe.clamp(nearby),
                }
            }
            1 => IdleAction::Scroll {
                delta: if rng.gen_bool(0.5) { 100 } else { -100 },
            },
            _ => IdleAction::GlanceAway {
                away: Duration::from_secs_f64(rng.gen_range(0.8..=2.5)),
            },
        };
        Some(action)
    }

    /// One distraction routine, chosen uniformly. Pointer targets stay in `safe`.
    pub fn distraction<R: Rng + ?Sized>(
        &self,
        safe: &Region,
        pointer: Point,
        rng: &mut R,
    ) -> Distraction {
        match rng.gen_range(0..4) {
            0 => Distraction::TabCycle {
                forward: rng.gen_range(1..=3),
            },
            1 => Distraction::AltTabAndBack {
                away: Duration::from_secs_f64(rng.gen_range(0.5..=2.0)),
            },
            2 => {
                let count = rng.gen_range(2..=4);
                let deltas = (0..count)
                    .map(|i| {
                        let size = rng.gen_range(60..=240);
                        if i % 2 == 0 {
                            -size
                        } else {
                            size
                        }
                    })
                    .collect();
                Distraction::ConfusedScroll { deltas }
            }
            _ => {
                let center = safe.clamp(pointer);
                let points = shake_points(center, rng)
                    .into_iter()
                    .map(|p| safe.clamp(p))
                    .collect();
                Distraction::Shake { points }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn idle_is_mostly_a_no_op() {
        let sim = IdleSimulator::default();
        let safe = Region::new(400.0, 300.0, 1200.0, 700.0);
        let mut rng = StdRng::seed_from_u64(12);
        let fired = (0..5_000)
            .filter(|_| sim.choose(&safe, safe.center(), &mut rng).is_some())
            .count();
        assert!(fired > 300 && fired < 700, "fired {fired}");
    }

    #[test]
    fn pointer_targets_stay_in_the_safe_region() {
        let sim = IdleSimulator::new(1.0);
        let safe = Region::new(400.0, 300.0, 500.0, 360.0);
        let mut rng = StdRng::seed_from_u64(13);
        let edge = Point::new(401.0, 301.0);
        for _ in 0..500 {
            if let Some(IdleAction::Wiggle { to }) = sim.choose(&safe, edge, &mut rng) {
                assert!(safe.contains(to));
            }
            if let Distraction::Shake { points } = sim.distraction(&safe, edge, &mut rng) {
                assert!(points.iter().all(|p| safe.contains(*p)));
            }
        }
    }

    #[test]
    fn zero_probability_never_fires() {
        let sim = IdleSimulator::new(0.0);
        let safe = Region::new(0.0, 0.0, 10.0, 10.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..100).all(|_| sim.choose(&safe, safe.center(), &mut rng).is_none()));
    }
}

//! Pointer path planning.
//!
//! Planning is a pure function of the request, the persona and the RNG. The
//! planner never touches an executor; [`crate::HumanDriver`] plays the result.
//!
//! Paths are cubic Bezier curves between the start and the (possibly
//! overshot) target, sampled with an easing curve so the pointer accelerates
//! and settles like a hand would. Every emitted waypoint is clamped into the
//! planner's safe bounds.
use std::f64::consts::PI;
use std::time::Duration;

use cadence_common::{Point, Region};
use rand::Rng;

use super::persona::Persona;

const SAMPLES_PER_SECOND: f64 = 120.0;
const MIN_SAMPLES: usize = 20;
/// Movements shorter than this never overshoot.
const MIN_OVERSHOOT_DISTANCE: f64 = 40.0;
const HESITATION_STEP: Duration = Duration::from_millis(50);

/// Fitts's-law style duration model: `a + b * log2(distance / reference + 1)`
/// seconds, clamped to `[min_secs, max_secs]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittsModel {
    pub a: f64,
    pub b: f64,
    pub reference_size: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

impl Default for FittsModel {
    fn default() -> Self {
        Self {
            a: 0.10,
            b: 0.15,
            reference_size: 100.0,
            min_secs: 0.15,
            max_secs: 1.2,
        }
    }
}

impl FittsModel {
    pub fn base_secs(&self, distance: f64) -> f64 {
        let d = distance.max(0.0);
        let raw = self.a + self.b * (d / self.reference_size + 1.0).log2();
        raw.clamp(self.min_secs, self.max_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Easing {
    InOut,
    Out,
}

impl Easing {
    fn apply(self, t: f64) -> f64 {
        match self {
            Easing::InOut if t < 0.5 => 2.0 * t * t,
            Easing::InOut => 1.0 - (-2.0 * t + 2.0).powi(2) / 2.0,
            Easing::Out => 1.0 - (1.0 - t).powi(2),
        }
    }
}

/// One position along a path, followed by a pause of `delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub point: Point,
    pub delay: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionRequest {
    pub start: Point,
    pub end: Point,
    /// Broad sweeping approach (large input areas) rather than a precise one.
    pub wild: bool,
    /// Session fatigue multiplier, `>= 1.0`.
    pub fatigue: f64,
}

impl MotionRequest {
    pub fn new(start: Point, end: Point) -> Self {
        Self {
            start,
            end,
            wild: false,
            fatigue: 1.0,
        }
    }

    pub fn wild(mut self, wild: bool) -> Self {
        self.wild = wild;
        self
    }

    pub fn fatigue(mut self, fatigue: f64) -> Self {
        self.fatigue = fatigue;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaypointSequence {
    pub waypoints: Vec<Waypoint>,
    /// Duration of the main movement, before any correction or settling.
    pub planned: Duration,
    /// Sum of every waypoint delay.
    pub total: Duration,
    pub overshoot: bool,
    pub hesitation: bool,
}

impl WaypointSequence {
    pub fn end(&self) -> Option<Point> {
        self.waypoints.last().map(|w| w.point)
    }
}

#[derive(Debug, Clone)]
pub struct MotionPlanner {
    bounds: Region,
    model: FittsModel,
}

impl MotionPlanner {
    /// `screen` is shrunk by `edge_margin` on every side; no waypoint is ever
    /// planned outside the result.
    pub fn new(screen: Region, edge_margin: f64) -> Self {
        Self {
            bounds: screen.inset(edge_margin),
            model: FittsModel::default(),
        }
    }

    pub fn with_model(mut self, model: FittsModel) -> Self {
        self.model = model;
        self
    }

    pub fn bounds(&self) -> Region {
        self.bounds
    }

    /// Deterministic duration of the main movement. Non-decreasing in
    /// `distance` for a fixed persona and fatigue.
    pub fn target_duration(&self, distance: f64, persona: &Persona, fatigue: f64) -> Duration {
        let secs = self.model.base_secs(distance) * persona.speed_multiplier * fatigue.max(1.0);
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn plan<R: Rng + ?Sized>(
        &self,
        req: &MotionRequest,
        persona: &Persona,
        rng: &mut R,
    ) -> WaypointSequence {
        let start = self.bounds.clamp(req.start);
        let end = self.bounds.clamp(req.end);
        let distance = start.distance_to(end);
        let planned = self.target_duration(distance, persona, req.fatigue);

        let mut waypoints = Vec::new();
        let overshoot = distance >= MIN_OVERSHOOT_DISTANCE && roll(rng, persona.overshoot_rate);

        if overshoot {
            let angle = start.angle_to(end);
            let reach = rng.gen_range(20.0..=80.0);
            let vertical = if req.wild { 1.0 } else { 0.2 };
            let past = self.bounds.clamp(Point::new(
                end.x + angle.cos() * reach,
                end.y + angle.sin() * reach * vertical,
            ));
            self.curve(
                start,
                past,
                planned,
                req.wild,
                Easing::InOut,
                persona,
                rng,
                &mut waypoints,
            );
            let settle = Duration::from_secs_f64(rng.gen_range(0.1..=0.2));
            if let Some(last) = waypoints.last_mut() {
                last.delay += settle;
            }
            self.curve(
                past,
                end,
                planned.mul_f64(0.3),
                false,
                Easing::Out,
                persona,
                rng,
                &mut waypoints,
            );
        } else {
            self.curve(
                start,
                end,
                planned,
                req.wild,
                Easing::InOut,
                persona,
                rng,
                &mut waypoints,
            );
        }

        let hesitation = roll(rng, persona.hesitation_rate);
        if hesitation {
            let steps = rng.gen_range(2..=6);
            for _ in 0..steps {
                let nudge = Point::new(
                    end.x + rng.gen_range(-2.0..=2.0),
                    end.y + rng.gen_range(-1.0..=1.0),
                );
                waypoints.push(Waypoint {
                    point: self.bounds.clamp(nudge),
                    delay: HESITATION_STEP,
                });
            }
            waypoints.push(Waypoint {
                point: end,
                delay: HESITATION_STEP,
            });
        }

        let total = waypoints.iter().map(|w| w.delay).sum();
        WaypointSequence {
            waypoints,
            planned,
            total,
            overshoot,
            hesitation,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn curve<R: Rng + ?Sized>(
        &self,
        from: Point,
        to: Point,
        duration: Duration,
        wild: bool,
        easing: Easing,
        persona: &Persona,
        rng: &mut R,
        out: &mut Vec<Waypoint>,
    ) {
        let distance = from.distance_to(to);
        let spread = distance * if wild { 0.5 } else { 0.1 };
        let mut control = |t: f64| {
            let base = from.lerp(to, t);
            if spread > 0.0 {
                Point::new(
                    base.x + rng.gen_range(-spread..=spread),
                    base.y + rng.gen_range(-spread..=spread),
                )
            } else {
                base
            }
        };
        let c1 = control(1.0 / 3.0);
        let c2 = control(2.0 / 3.0);

        let steps =
            ((duration.as_secs_f64() * SAMPLES_PER_SECOND).round() as usize).max(MIN_SAMPLES);
        let delay = duration / steps as u32;
        let jitter_x = 2.0 * persona.micro_correction_rate;
        let jitter_y = 0.5 * persona.micro_correction_rate;

        for i in 1..=steps {
            let t = easing.apply(i as f64 / steps as f64);
            let mut p = bezier(from, c1, c2, to, t);
            if i < steps && jitter_x > 0.0 {
                p.x += rng.gen_range(-jitter_x..=jitter_x);
                p.y += rng.gen_range(-jitter_y..=jitter_y);
            }
            out.push(Waypoint {
                point: self.bounds.clamp(p),
                delay,
            });
        }
    }
}

fn bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);
    Point::new(
        a * p0.x + b * p1.x + c * p2.x + d * p3.x,
        a * p0.y + b * p1.y + c * p2.y + d * p3.y,
    )
}

fn roll<R: Rng + ?Sized>(rng: &mut R, p: f64) -> bool {
    p > 0.0 && rng.gen_bool(p.min(1.0))
}

/// Small loop of offsets around `center`, used for the "shake" distraction.
pub(crate) fn shake_points<R: Rng + ?Sized>(center: Point, rng: &mut R) -> Vec<Point> {
    let count = rng.gen_range(3..=6);
    let radius = rng.gen_range(6.0..=18.0);
    let phase = rng.gen_range(0.0..2.0 * PI);
    (0..count)
        .map(|i| {
            let a = phase + i as f64 * PI;
            Point::new(center.x + a.cos() * radius, center.y + a.sin() * radius * 0.5)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn planner() -> MotionPlanner {
        MotionPlanner::new(Region::screen(1920.0, 1080.0), 10.0)
    }

    #[test]
    fn path_ends_on_target_without_hesitation() {
        let mut rng = StdRng::seed_from_u64(1);
        let req = MotionRequest::new(Point::new(100.0, 100.0), Point::new(900.0, 600.0));
        let seq = planner().plan(&req, &Persona::baseline(), &mut rng);
        assert_eq!(seq.end(), Some(Point::new(900.0, 600.0)));
        assert!(!seq.overshoot && !seq.hesitation);
        assert!(seq.waypoints.len() >= MIN_SAMPLES);
    }

    #[test]
    fn overshoot_adds_a_correction() {
        let mut rng = StdRng::seed_from_u64(2);
        let persona = Persona {
            overshoot_rate: 1.0,
            ..Persona::baseline()
        };
        let req = MotionRequest::new(Point::new(100.0, 500.0), Point::new(1200.0, 500.0));
        let seq = planner().plan(&req, &persona, &mut rng);
        assert!(seq.overshoot);
        assert_eq!(seq.end(), Some(Point::new(1200.0, 500.0)));
        let furthest = seq.waypoints.iter().map(|w| w.point.x).fold(f64::MIN, f64::max);
        assert!(furthest > 1200.0);
        assert!(seq.total > seq.planned);
    }

    #[test]
    fn hesitation_stays_close_to_target() {
        let mut rng = StdRng::seed_from_u64(4);
        let persona = Persona {
            hesitation_rate: 1.0,
            ..Persona::baseline()
        };
        let target = Point::new(640.0, 480.0);
        let req = MotionRequest::new(Point::new(20.0, 20.0), target);
        let seq = planner().plan(&req, &persona, &mut rng);
        assert!(seq.hesitation);
        let tail = &seq.waypoints[seq.waypoints.len() - 3..];
        assert!(tail.iter().all(|w| w.point.distance_to(target) <= 3.0));
        assert_eq!(seq.end(), Some(target));
    }

    #[test]
    fn fatigue_slows_the_movement() {
        let p = Persona::baseline();
        let fresh = planner().target_duration(500.0, &p, 1.0);
        let tired = planner().target_duration(500.0, &p, 1.4);
        assert!(tired > fresh);
    }

    #[test]
    fn base_duration_is_clamped() {
        let model = FittsModel::default();
        assert_eq!(model.base_secs(0.0), model.min_secs);
        assert_eq!(model.base_secs(1.0e9), model.max_secs);
    }

    #[test]
    fn easing_hits_both_ends() {
        for e in [Easing::InOut, Easing::Out] {
            assert_eq!(e.apply(0.0), 0.0);
            assert!((e.apply(1.0) - 1.0).abs() < 1e-12);
        }
    }
}

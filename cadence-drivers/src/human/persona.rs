//! Randomized behavioural profiles.
//!
//! A [`Persona`] is drawn from a [`PersonaTable`] at the start of every batch
//! and replaced wholesale at the next batch boundary. Personas are never
//! persisted.
use std::fmt;
use std::time::Duration;

use cadence_common::CadenceError;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Inclusive `[min, max]` range a parameter is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.max > self.min {
            rng.gen_range(self.min..=self.max)
        } else {
            self.min
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }
}

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: u32,
    pub max: u32,
}

impl CountRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        if self.max > self.min {
            rng.gen_range(self.min..=self.max)
        } else {
            self.min
        }
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// The parameter table personas are drawn from.
///
/// Every probability is per opportunity (per character for typos, per
/// movement for overshoot, and so on). The batch size of a persona is
/// `batch_min..=max` with `max` drawn from `batch_max`; break windows work the
/// same way with seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaTable {
    /// Scales movement and typing durations; above 1.0 is slower.
    pub speed_multiplier: ParamRange,
    pub hesitation_rate: ParamRange,
    pub overshoot_rate: ParamRange,
    pub micro_correction_rate: ParamRange,
    pub typo_rate: ParamRange,
    pub caret_check_rate: ParamRange,
    pub distraction_rate: ParamRange,
    /// Fatigue gained per hour of session time.
    pub fatigue_rate: ParamRange,
    pub double_click_rate: ParamRange,
    pub empty_click_rate: ParamRange,
    pub enter_submit_rate: ParamRange,
    pub submit_hesitation_rate: ParamRange,
    pub gaze_rate: ParamRange,
    pub batch_min: u32,
    pub batch_max: CountRange,
    pub break_min_secs: ParamRange,
    pub break_max_secs: ParamRange,
}

impl Default for PersonaTable {
    fn default() -> Self {
        Self {
            speed_multiplier: ParamRange::new(0.3, 2.5),
            hesitation_rate: ParamRange::new(0.0, 0.8),
            overshoot_rate: ParamRange::new(0.0, 0.5),
            micro_correction_rate: ParamRange::new(0.0, 0.8),
            typo_rate: ParamRange::new(0.006, 0.075),
            caret_check_rate: ParamRange::new(0.005, 0.04),
            distraction_rate: ParamRange::new(0.1, 0.7),
            fatigue_rate: ParamRange::new(0.0, 0.2),
            double_click_rate: ParamRange::new(0.0, 0.1),
            empty_click_rate: ParamRange::new(0.0, 0.3),
            enter_submit_rate: ParamRange::new(0.2, 0.8),
            submit_hesitation_rate: ParamRange::new(0.2, 0.7),
            gaze_rate: ParamRange::new(0.0, 0.5),
            batch_min: 3,
            batch_max: CountRange::new(5, 12),
            break_min_secs: ParamRange::new(30.0, 300.0),
            break_max_secs: ParamRange::new(300.0, 1200.0),
        }
    }
}

impl PersonaTable {
    fn probabilities(&self) -> [(&'static str, &ParamRange); 12] {
        [
            ("hesitation_rate", &self.hesitation_rate),
            ("overshoot_rate", &self.overshoot_rate),
            ("micro_correction_rate", &self.micro_correction_rate),
            ("typo_rate", &self.typo_rate),
            ("caret_check_rate", &self.caret_check_rate),
            ("distraction_rate", &self.distraction_rate),
            ("double_click_rate", &self.double_click_rate),
            ("empty_click_rate", &self.empty_click_rate),
            ("enter_submit_rate", &self.enter_submit_rate),
            ("submit_hesitation_rate", &self.submit_hesitation_rate),
            ("gaze_rate", &self.gaze_rate),
            ("fatigue_rate", &self.fatigue_rate),
        ]
    }

    /// Reject tables that could produce unusable personas.
    pub fn validate(&self) -> cadence_common::Result<()> {
        let bad = |what: String| Err(CadenceError::Configuration(format!("persona.{what}")));

        for (name, range) in self.probabilities() {
            if !range.is_valid() || range.min < 0.0 || range.max > 1.0 {
                return bad(format!("{name} must be a range inside [0, 1]"));
            }
        }
        if !self.speed_multiplier.is_valid() || self.speed_multiplier.min <= 0.0 {
            return bad("speed_multiplier must be a positive range".into());
        }
        if self.batch_min == 0 || self.batch_max.min > self.batch_max.max {
            return bad("batch sizes must be positive and ordered".into());
        }
        if self.batch_max.min < self.batch_min {
            return bad("batch_max must not be below batch_min".into());
        }
        for (name, range) in [
            ("break_min_secs", &self.break_min_secs),
            ("break_max_secs", &self.break_max_secs),
        ] {
            if !range.is_valid() || range.min < 0.0 {
                return bad(format!("{name} must be a non-negative range"));
            }
        }
        if self.break_max_secs.min < self.break_min_secs.max {
            return bad("break_max_secs must start at or above break_min_secs".into());
        }
        Ok(())
    }

    /// Draw a persona with every parameter sampled independently.
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Persona {
        Persona {
            id: rng.gen_range(1000..=9999),
            mood: Mood::ALL.choose(rng).copied().unwrap_or(Mood::Focused),
            speed_multiplier: self.speed_multiplier.sample(rng),
            hesitation_rate: self.hesitation_rate.sample(rng),
            overshoot_rate: self.overshoot_rate.sample(rng),
            micro_correction_rate: self.micro_correction_rate.sample(rng),
            typo_rate: self.typo_rate.sample(rng),
            caret_check_rate: self.caret_check_rate.sample(rng),
            distraction_rate: self.distraction_rate.sample(rng),
            fatigue_rate: self.fatigue_rate.sample(rng),
            double_click_rate: self.double_click_rate.sample(rng),
            empty_click_rate: self.empty_click_rate.sample(rng),
            enter_submit_rate: self.enter_submit_rate.sample(rng),
            submit_hesitation_rate: self.submit_hesitation_rate.sample(rng),
            gaze_rate: self.gaze_rate.sample(rng),
            batch_size: CountRange::new(self.batch_min, self.batch_max.sample(rng)),
            break_secs: ParamRange::new(
                self.break_min_secs.sample(rng),
                self.break_max_secs.sample(rng),
            ),
        }
    }

    /// Whether every parameter of `persona` lies inside this table.
    pub fn admits(&self, p: &Persona) -> bool {
        self.speed_multiplier.contains(p.speed_multiplier)
            && self.hesitation_rate.contains(p.hesitation_rate)
            && self.overshoot_rate.contains(p.overshoot_rate)
            && self.micro_correction_rate.contains(p.micro_correction_rate)
            && self.typo_rate.contains(p.typo_rate)
            && self.caret_check_rate.contains(p.caret_check_rate)
            && self.distraction_rate.contains(p.distraction_rate)
            && self.fatigue_rate.contains(p.fatigue_rate)
            && self.double_click_rate.contains(p.double_click_rate)
            && self.empty_click_rate.contains(p.empty_click_rate)
            && self.enter_submit_rate.contains(p.enter_submit_rate)
            && self.submit_hesitation_rate.contains(p.submit_hesitation_rate)
            && self.gaze_rate.contains(p.gaze_rate)
            && p.batch_size.min == self.batch_min
            && self.batch_max.contains(p.batch_size.max)
            && self.break_min_secs.contains(p.break_secs.min)
            && self.break_max_secs.contains(p.break_secs.max)
            && (1000..=9999).contains(&p.id)
    }
}

/// Draw a fresh persona from the built-in table using the thread RNG.
pub fn generate() -> Persona {
    PersonaTable::default().generate_with(&mut rand::thread_rng())
}

/// Cosmetic label shown next to the persona id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mood {
    Focused,
    Relaxed,
    Restless,
    Sluggish,
    Hurried,
}

impl Mood {
    const ALL: [Mood; 5] = [
        Mood::Focused,
        Mood::Relaxed,
        Mood::Restless,
        Mood::Sluggish,
        Mood::Hurried,
    ];
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mood::Focused => "focused",
            Mood::Relaxed => "relaxed",
            Mood::Restless => "restless",
            Mood::Sluggish => "sluggish",
            Mood::Hurried => "hurried",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: u32,
    pub mood: Mood,
    pub speed_multiplier: f64,
    pub hesitation_rate: f64,
    pub overshoot_rate: f64,
    pub micro_correction_rate: f64,
    pub typo_rate: f64,
    pub caret_check_rate: f64,
    pub distraction_rate: f64,
    pub fatigue_rate: f64,
    pub double_click_rate: f64,
    pub empty_click_rate: f64,
    pub enter_submit_rate: f64,
    pub submit_hesitation_rate: f64,
    pub gaze_rate: f64,
    pub batch_size: CountRange,
    pub break_secs: ParamRange,
}

impl Persona {
    /// A persona with every random behaviour switched off and unit speed.
    pub fn baseline() -> Self {
        Self {
            id: 1000,
            mood: Mood::Focused,
            speed_multiplier: 1.0,
            hesitation_rate: 0.0,
            overshoot_rate: 0.0,
            micro_correction_rate: 0.0,
            typo_rate: 0.0,
            caret_check_rate: 0.0,
            distraction_rate: 0.0,
            fatigue_rate: 0.0,
            double_click_rate: 0.0,
            empty_click_rate: 0.0,
            enter_submit_rate: 1.0,
            submit_hesitation_rate: 0.0,
            gaze_rate: 0.0,
            batch_size: CountRange::new(3, 5),
            break_secs: ParamRange::new(30.0, 300.0),
        }
    }

    pub fn label(&self) -> String {
        format!("#{} ({})", self.id, self.mood)
    }

    pub fn roll_batch_threshold<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        self.batch_size.sample(rng).max(1)
    }

    pub fn roll_break<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs_f64(self.break_secs.sample(rng).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn generated_personas_stay_inside_the_table() {
        let table = PersonaTable::default();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..2_000 {
            let p = table.generate_with(&mut rng);
            assert!(table.admits(&p), "{p:?}");
            let threshold = p.roll_batch_threshold(&mut rng);
            assert!(p.batch_size.contains(threshold));
            let pause = p.roll_break(&mut rng).as_secs_f64();
            assert!(pause >= p.break_secs.min - 1e-6 && pause <= p.break_secs.max + 1e-6);
        }
    }

    #[test]
    fn consecutive_personas_differ() {
        let table = PersonaTable::default();
        let mut rng = StdRng::seed_from_u64(3);
        let a = table.generate_with(&mut rng);
        let b = table.generate_with(&mut rng);
        assert_ne!(a.speed_multiplier, b.speed_multiplier);
    }

    #[test]
    fn default_table_is_valid() {
        PersonaTable::default().validate().unwrap();
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let table = PersonaTable {
            typo_rate: ParamRange::new(0.5, 1.5),
            ..PersonaTable::default()
        };
        assert!(matches!(
            table.validate(),
            Err(CadenceError::Configuration(_))
        ));
    }

    #[test]
    fn degenerate_ranges_sample_their_minimum() {
        let table = PersonaTable {
            speed_multiplier: ParamRange::new(1.0, 1.0),
            batch_max: CountRange::new(3, 3),
            ..PersonaTable::default()
        };
        let mut rng = StdRng::seed_from_u64(5);
        let p = table.generate_with(&mut rng);
        assert_eq!(p.speed_multiplier, 1.0);
        assert_eq!(p.roll_batch_threshold(&mut rng), 3);
    }

    #[test]
    fn baseline_label_is_stable() {
        assert_eq!(Persona::baseline().label(), "#1000 (focused)");
    }
}

//! The automation loop as plain data.
//!
//! [`AutomationLoop`] knows nothing about timers, tasks or executors. The
//! engine feeds it the current [`Instant`] and the results of the work it
//! asked for; the loop answers with a [`Directive`] saying what to do next.
//!
//! ```text
//!   Idle --start--> Waiting --countdown / force--> Executing
//!                     ^  |                              |
//!                     |  +--batch threshold--> OnBreak  |
//!                     |                          |      |
//!                     +-------break elapsed------+      |
//!                     +-----------task finished---------+
//!   any --stop--> Stopped --reset--> Idle
//! ```
use std::fmt;
use std::time::Duration;

use cadence_common::MAX_JITTER_RATIO;
use cadence_drivers::{Persona, PersonaTable};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::rhythm::BioRhythm;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub base_interval: Duration,
    /// No countdown is ever shorter than this.
    pub interval_floor: Duration,
    /// Upper bound of the random extra as a fraction of `base_interval`,
    /// further scaled by the persona's speed multiplier.
    pub jitter_ratio: f64,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(180),
            interval_floor: Duration::from_secs(30),
            jitter_ratio: 1.0,
        }
    }
}

impl LoopSettings {
    /// Jitter outside `0..=MAX_JITTER_RATIO` (or not a number) is pulled back
    /// into range so that drawing an interval cannot fail.
    pub fn sanitized(mut self) -> Self {
        let jitter = self.jitter_ratio;
        if !(0.0..=MAX_JITTER_RATIO).contains(&jitter) {
            let fixed = if jitter.is_nan() {
                0.0
            } else {
                jitter.clamp(0.0, MAX_JITTER_RATIO)
            };
            warn!(jitter_ratio = jitter, fixed, "loop.settings.jitter_clamped");
            self.jitter_ratio = fixed;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Waiting,
    Executing,
    OnBreak,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::Waiting => "waiting",
            Phase::Executing => "executing",
            Phase::OnBreak => "on_break",
            Phase::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum StopReason {
    Requested,
    QueueExhausted,
    /// Interlock trip or storage failure.
    Fatal(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("stop requested"),
            StopReason::QueueExhausted => f.write_str("queue exhausted"),
            StopReason::Fatal(why) => write!(f, "fatal: {why}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    Idle,
    Waiting {
        deadline: Instant,
        /// Countdown frozen by a pause.
        frozen: Option<Duration>,
    },
    Executing,
    OnBreak {
        until: Instant,
    },
    Stopped(StopReason),
}

impl LoopState {
    pub fn phase(&self) -> Phase {
        match self {
            LoopState::Idle => Phase::Idle,
            LoopState::Waiting { .. } => Phase::Waiting,
            LoopState::Executing => Phase::Executing,
            LoopState::OnBreak { .. } => Phase::OnBreak,
            LoopState::Stopped(_) => Phase::Stopped,
        }
    }
}

/// What the host should do after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Run the front task now and report back with [`AutomationLoop::task_finished`].
    Execute,
    /// Countdown to the next task started.
    Wait(Duration),
    /// A break started; nothing runs until it elapses.
    Break(Duration),
    /// The break is over and a new persona is active.
    BreakEnded,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {command} while {from}")]
pub struct InvalidTransition {
    pub from: Phase,
    pub command: &'static str,
}

pub struct AutomationLoop {
    state: LoopState,
    settings: LoopSettings,
    table: PersonaTable,
    persona: Persona,
    personas_generated: u32,
    rhythm: BioRhythm,
    session: Session,
    rng: StdRng,
}

impl AutomationLoop {
    pub fn new(settings: LoopSettings, table: PersonaTable, now: Instant) -> Self {
        Self::with_rng(settings, table, now, StdRng::from_entropy())
    }

    pub fn with_rng(
        settings: LoopSettings,
        table: PersonaTable,
        now: Instant,
        mut rng: StdRng,
    ) -> Self {
        let settings = settings.sanitized();
        let persona = table.generate_with(&mut rng);
        let rhythm = BioRhythm::new(persona.roll_batch_threshold(&mut rng));
        Self {
            state: LoopState::Idle,
            settings,
            table,
            persona,
            personas_generated: 1,
            rhythm,
            session: Session::start(now),
            rng,
        }
    }

    pub fn state(&self) -> &LoopState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn personas_generated(&self) -> u32 {
        self.personas_generated
    }

    pub fn rhythm(&self) -> &BioRhythm {
        &self.rhythm
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, LoopState::Waiting { frozen: Some(_), .. })
    }

    /// Time left on the waiting countdown or the break.
    pub fn countdown(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            LoopState::Waiting {
                frozen: Some(left), ..
            } => Some(*left),
            LoopState::Waiting { deadline, .. } => Some(deadline.saturating_duration_since(now)),
            LoopState::OnBreak { until } => Some(until.saturating_duration_since(now)),
            _ => None,
        }
    }

    /// `base + U(0, base * speed * jitter_ratio)`, never below the floor.
    pub fn next_interval(&mut self) -> Duration {
        let base = self.settings.base_interval.as_secs_f64();
        let spread = (base * self.persona.speed_multiplier * self.settings.jitter_ratio).max(0.0);
        let extra = if spread > 0.0 {
            self.rng.gen_range(0.0..=spread)
        } else {
            0.0
        };
        Duration::from_secs_f64(base + extra).max(self.settings.interval_floor)
    }

    /// `Idle -> Waiting -> Executing` with no countdown.
    pub fn start(&mut self, now: Instant) -> Result<Directive, InvalidTransition> {
        self.expect(Phase::Idle, "start")?;
        self.go(LoopState::Waiting {
            deadline: now,
            frozen: None,
        });
        Ok(self.leave_waiting(now))
    }

    /// Advance timers. Returns a directive when a countdown or break elapsed.
    pub fn tick(&mut self, now: Instant) -> Option<Directive> {
        self.session.accumulate(now, self.persona.fatigue_rate);
        match self.state {
            LoopState::Waiting {
                deadline,
                frozen: None,
            } if now >= deadline => Some(self.leave_waiting(now)),
            LoopState::OnBreak { until } if now >= until => {
                self.end_break(now);
                Some(Directive::BreakEnded)
            }
            _ => None,
        }
    }

    /// Skip the rest of the countdown. A due break still comes first, and a
    /// running break is never cut short.
    pub fn force_now(&mut self, now: Instant) -> Result<Option<Directive>, InvalidTransition> {
        match self.state {
            LoopState::Waiting { .. } => Ok(Some(self.leave_waiting(now))),
            LoopState::OnBreak { .. } => {
                warn!(
                    remaining_secs = self.countdown(now).map(|d| d.as_secs()),
                    "loop.force_now.ignored_on_break"
                );
                Ok(None)
            }
            _ => Err(self.invalid("force")),
        }
    }

    pub fn pause(&mut self, now: Instant) -> Result<(), InvalidTransition> {
        match &mut self.state {
            LoopState::Waiting { deadline, frozen } => {
                if frozen.is_none() {
                    *frozen = Some(deadline.saturating_duration_since(now));
                    info!("loop.paused");
                }
                Ok(())
            }
            _ => Err(self.invalid("pause")),
        }
    }

    pub fn resume(&mut self, now: Instant) -> Result<(), InvalidTransition> {
        match &mut self.state {
            LoopState::Waiting { deadline, frozen } => {
                if let Some(left) = frozen.take() {
                    *deadline = now + left;
                    info!(remaining_secs = left.as_secs(), "loop.resumed");
                }
                Ok(())
            }
            _ => Err(self.invalid("resume")),
        }
    }

    /// `Executing -> Waiting`, then straight on to `OnBreak` when the batch is full.
    /// Only successes count towards the batch.
    pub fn task_finished(
        &mut self,
        now: Instant,
        success: bool,
    ) -> Result<Directive, InvalidTransition> {
        self.expect(Phase::Executing, "finish a task")?;
        if success {
            self.rhythm.record_success();
        }
        let interval = self.next_interval();
        self.go(LoopState::Waiting {
            deadline: now + interval,
            frozen: None,
        });
        if self.rhythm.break_due() {
            return Ok(self.begin_break(now));
        }
        info!(
            interval_secs = interval.as_secs(),
            processed = self.rhythm.processed(),
            threshold = self.rhythm.threshold(),
            "loop.next_countdown"
        );
        Ok(Directive::Wait(interval))
    }

    /// Any state to `Stopped`. The first reason sticks.
    pub fn stop(&mut self, reason: StopReason) {
        if let LoopState::Stopped(first) = &self.state {
            warn!(%first, ignored = %reason, "loop.stop.already_stopped");
            return;
        }
        self.go(LoopState::Stopped(reason));
    }

    /// `Stopped -> Idle` with a fresh session, persona and batch.
    pub fn reset(&mut self, now: Instant) -> Result<(), InvalidTransition> {
        self.expect(Phase::Stopped, "reset")?;
        self.session = Session::start(now);
        self.regenerate_persona();
        self.rhythm = BioRhythm::new(self.persona.roll_batch_threshold(&mut self.rng));
        self.go(LoopState::Idle);
        Ok(())
    }

    fn leave_waiting(&mut self, now: Instant) -> Directive {
        if self.rhythm.break_due() {
            return self.begin_break(now);
        }
        self.go(LoopState::Executing);
        Directive::Execute
    }

    fn begin_break(&mut self, now: Instant) -> Directive {
        let length = self.persona.roll_break(&mut self.rng);
        let until = self.rhythm.start_break(now, length);
        info!(
            break_secs = length.as_secs(),
            processed = self.rhythm.processed(),
            threshold = self.rhythm.threshold(),
            "loop.break_started"
        );
        self.go(LoopState::OnBreak { until });
        Directive::Break(length)
    }

    fn end_break(&mut self, now: Instant) {
        self.regenerate_persona();
        let threshold = self.persona.roll_batch_threshold(&mut self.rng);
        self.rhythm.finish_break(threshold);
        info!(
            persona = %self.persona.label(),
            threshold,
            "loop.break_ended"
        );
        self.go(LoopState::Waiting {
            deadline: now,
            frozen: None,
        });
    }

    fn regenerate_persona(&mut self) {
        self.persona = self.table.generate_with(&mut self.rng);
        self.personas_generated += 1;
    }

    fn go(&mut self, next: LoopState) {
        let from = self.state.phase();
        let to = next.phase();
        if from != to {
            info!(%from, %to, "loop.transition");
        }
        self.state = next;
    }

    fn expect(&self, phase: Phase, command: &'static str) -> Result<(), InvalidTransition> {
        if self.phase() == phase {
            Ok(())
        } else {
            Err(self.invalid(command))
        }
    }

    fn invalid(&self, command: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.phase(),
            command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_drivers::{CountRange, ParamRange};

    fn table(batch: u32) -> PersonaTable {
        PersonaTable {
            batch_min: batch,
            batch_max: CountRange::new(batch, batch),
            break_min_secs: ParamRange::new(60.0, 60.0),
            break_max_secs: ParamRange::new(120.0, 120.0),
            ..PersonaTable::default()
        }
    }

    fn machine(batch: u32, base: u64) -> (AutomationLoop, Instant) {
        let now = Instant::now();
        let settings = LoopSettings {
            base_interval: Duration::from_secs(base),
            interval_floor: Duration::from_secs(10),
            jitter_ratio: 1.0,
        };
        let m = AutomationLoop::with_rng(settings, table(batch), now, StdRng::seed_from_u64(4));
        (m, now)
    }

    #[test]
    fn start_executes_immediately() {
        let (mut m, now) = machine(3, 60);
        assert_eq!(m.start(now), Ok(Directive::Execute));
        assert_eq!(m.phase(), Phase::Executing);
        assert!(m.start(now).is_err());
    }

    #[test]
    fn interval_is_bounded_by_base_and_speed() {
        let (mut m, _) = machine(3, 60);
        let speed = m.persona().speed_multiplier;
        for _ in 0..500 {
            let d = m.next_interval().as_secs_f64();
            assert!(d >= 60.0);
            assert!(d <= 60.0 + 60.0 * speed + 1e-6);
        }
    }

    #[test]
    fn unusable_jitter_is_clamped_instead_of_panicking() {
        let now = Instant::now();
        for (jitter, expect) in [
            (f64::INFINITY, MAX_JITTER_RATIO),
            (f64::NAN, 0.0),
            (-3.0, 0.0),
        ] {
            let settings = LoopSettings {
                base_interval: Duration::from_secs(60),
                interval_floor: Duration::from_secs(10),
                jitter_ratio: jitter,
            };
            let mut m =
                AutomationLoop::with_rng(settings, table(3), now, StdRng::seed_from_u64(8));
            assert_eq!(m.settings().jitter_ratio, expect);
            assert!(m.next_interval() >= Duration::from_secs(60));
        }
    }

    #[test]
    fn floor_wins_over_a_short_base() {
        let (mut m, _) = machine(3, 0);
        assert_eq!(m.next_interval(), Duration::from_secs(10));
    }

    #[test]
    fn countdown_runs_out_into_execution() {
        let (mut m, now) = machine(3, 60);
        m.start(now).unwrap();
        let Directive::Wait(wait) = m.task_finished(now, true).unwrap() else {
            panic!("expected a countdown");
        };
        assert_eq!(m.tick(now + wait - Duration::from_millis(1)), None);
        assert_eq!(m.countdown(now), Some(wait));
        assert_eq!(m.tick(now + wait), Some(Directive::Execute));
    }

    #[test]
    fn pause_freezes_the_countdown() {
        let (mut m, now) = machine(3, 60);
        m.start(now).unwrap();
        let Directive::Wait(wait) = m.task_finished(now, true).unwrap() else {
            panic!("expected a countdown");
        };
        let later = now + Duration::from_secs(5);
        m.pause(later).unwrap();
        assert!(m.is_paused());
        let much_later = now + wait * 10;
        assert_eq!(m.tick(much_later), None);
        assert_eq!(m.countdown(much_later), Some(wait - Duration::from_secs(5)));

        m.resume(much_later).unwrap();
        assert_eq!(m.tick(much_later + wait - Duration::from_secs(5)), Some(Directive::Execute));
    }

    #[test]
    fn failures_do_not_fill_the_batch() {
        let (mut m, now) = machine(1, 60);
        m.start(now).unwrap();
        assert!(matches!(m.task_finished(now, false), Ok(Directive::Wait(_))));
        assert_eq!(m.rhythm().processed(), 0);
    }

    #[test]
    fn force_now_cannot_skip_a_break() {
        let (mut m, now) = machine(1, 60);
        m.start(now).unwrap();
        assert!(matches!(m.task_finished(now, true), Ok(Directive::Break(_))));
        assert_eq!(m.phase(), Phase::OnBreak);
        assert_eq!(m.force_now(now), Ok(None));
        assert_eq!(m.phase(), Phase::OnBreak);
    }

    #[test]
    fn stop_is_terminal_until_reset() {
        let (mut m, now) = machine(3, 60);
        m.start(now).unwrap();
        m.stop(StopReason::Requested);
        m.stop(StopReason::QueueExhausted);
        assert_eq!(m.state(), &LoopState::Stopped(StopReason::Requested));
        assert!(m.force_now(now).is_err());
        assert!(m.start(now).is_err());
        assert_eq!(m.tick(now + Duration::from_secs(3600)), None);

        let before = m.personas_generated();
        m.reset(now).unwrap();
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.personas_generated(), before + 1);
        assert_eq!(m.session().fatigue_level(), 0.0);
        assert_eq!(m.start(now), Ok(Directive::Execute));
    }

    #[test]
    fn batch_and_break_scenario() {
        // queue [A, B, C], batch threshold 2, base interval 60s
        let (mut m, t0) = machine(2, 60);
        assert_eq!(m.rhythm().threshold(), 2);
        let first_persona = m.persona().clone();

        // A runs immediately
        assert_eq!(m.start(t0), Ok(Directive::Execute));
        let Directive::Wait(wait) = m.task_finished(t0, true).unwrap() else {
            panic!("expected a countdown after A");
        };
        assert_eq!(m.rhythm().processed(), 1);
        assert!(wait >= Duration::from_secs(60));

        // B runs when the countdown elapses and fills the batch
        let t1 = t0 + wait;
        assert_eq!(m.tick(t1), Some(Directive::Execute));
        let Directive::Break(length) = m.task_finished(t1, true).unwrap() else {
            panic!("expected a break after B");
        };
        assert_eq!(m.rhythm().processed(), 2);
        assert_eq!(m.phase(), Phase::OnBreak);
        assert!(length >= Duration::from_secs(60) && length <= Duration::from_secs(120));

        // C cannot run during the break
        assert_eq!(m.tick(t1 + length - Duration::from_millis(1)), None);
        assert_eq!(m.force_now(t1), Ok(None));

        // break ends: new persona, fresh batch
        let t2 = t1 + length;
        assert_eq!(m.tick(t2), Some(Directive::BreakEnded));
        assert_eq!(m.rhythm().processed(), 0);
        assert_eq!(m.rhythm().threshold(), 2);
        assert_eq!(m.personas_generated(), 2);
        assert_ne!(m.persona(), &first_persona);

        // C is next
        assert_eq!(m.tick(t2), Some(Directive::Execute));
    }
}

//! Plays planned motion and keystrokes through an [`ActionExecutor`].
use std::sync::Arc;
use std::time::Duration;

use cadence_common::{CadenceError, Point, Region, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use super::idle::{Distraction, IdleAction, IdleSimulator};
use super::motion::{MotionPlanner, MotionRequest, WaypointSequence};
use super::persona::Persona;
use super::typing::{Key, KeyAction, KeyEventSequence, TypingSimulator};
use crate::executor::{classify, ActionExecutor, ScreenGeometry};
use crate::interlock::Checkpoint;

pub const DEFAULT_EDGE_MARGIN: f64 = 10.0;

/// Human-paced front end over an executor, bound to one persona.
///
/// Every primitive is preceded by a [`Checkpoint`] check, and every pointer
/// position (planned and observed) is checked against the safety interlock.
pub struct HumanDriver {
    executor: Arc<dyn ActionExecutor>,
    screen: Arc<dyn ScreenGeometry>,
    checkpoint: Checkpoint,
    planner: MotionPlanner,
    typist: TypingSimulator,
    idle: IdleSimulator,
    persona: Persona,
    fatigue: f64,
    rng: StdRng,
}

impl HumanDriver {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        screen: Arc<dyn ScreenGeometry>,
        checkpoint: Checkpoint,
        persona: Persona,
    ) -> Self {
        let planner = MotionPlanner::new(screen.bounds(), DEFAULT_EDGE_MARGIN);
        Self {
            executor,
            screen,
            checkpoint,
            planner,
            typist: TypingSimulator::new(),
            idle: IdleSimulator::default(),
            persona,
            fatigue: 1.0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_edge_margin(mut self, margin: f64) -> Self {
        self.planner = MotionPlanner::new(self.screen.bounds(), margin);
        self
    }

    /// Session fatigue multiplier applied to motion and typing.
    pub fn with_fatigue(mut self, fatigue: f64) -> Self {
        self.fatigue = fatigue.max(1.0);
        self
    }

    pub fn with_idle(mut self, idle: IdleSimulator) -> Self {
        self.idle = idle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Bernoulli draw with `p` clamped into `[0, 1]`.
    pub fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p.min(1.0))
    }

    pub async fn pointer(&self) -> Result<Point> {
        self.screen.pointer_position().await.map_err(classify)
    }

    /// Plan and play a movement from the current pointer position.
    pub async fn move_to(&mut self, target: Point, wild: bool) -> Result<WaypointSequence> {
        self.checkpoint.check()?;
        let interlock = self.checkpoint.interlock();
        if interlock.in_reserved_corner(target) {
            interlock.trip(target);
            return Err(CadenceError::Interlock {
                x: target.x,
                y: target.y,
            });
        }
        let start = self.pointer().await?;
        let request = MotionRequest::new(start, target)
            .wild(wild)
            .fatigue(self.fatigue);
        let plan = self.planner.plan(&request, &self.persona, &mut self.rng);
        debug!(
            waypoints = plan.waypoints.len(),
            planned_ms = plan.planned.as_millis() as u64,
            overshoot = plan.overshoot,
            hesitation = plan.hesitation,
            "driver.move_to"
        );
        self.play_motion(&plan).await?;
        Ok(plan)
    }

    /// Like [`Self::move_to`], with every waypoint also pulled into `area`.
    pub async fn move_within(&mut self, target: Point, area: &Region) -> Result<()> {
        self.checkpoint.check()?;
        let start = self.pointer().await?;
        let request = MotionRequest::new(start, area.clamp(target)).fatigue(self.fatigue);
        let mut plan = self.planner.plan(&request, &self.persona, &mut self.rng);
        for wp in &mut plan.waypoints {
            wp.point = area.clamp(wp.point);
        }
        self.play_motion(&plan).await
    }

    /// Move waypoint by waypoint, checking the interlock against both the
    /// planned point and the pointer position reported afterwards.
    pub async fn play_motion(&self, plan: &WaypointSequence) -> Result<()> {
        let interlock = self.checkpoint.interlock();
        for wp in &plan.waypoints {
            self.checkpoint.check()?;
            interlock.check_point(wp.point)?;
            self.executor
                .move_pointer_to(wp.point)
                .await
                .map_err(classify)?;
            let actual = self.pointer().await?;
            interlock.check_point(actual)?;
            self.checkpoint.sleep(wp.delay).await?;
        }
        Ok(())
    }

    pub async fn click(&self) -> Result<()> {
        self.checkpoint.check()?;
        self.executor.click().await.map_err(classify)
    }

    /// Click, sometimes followed by an accidental second click.
    pub async fn smart_click(&mut self) -> Result<()> {
        self.click().await?;
        if self.roll(self.persona.double_click_rate) {
            let gap = self.rng.gen_range(0.06..=0.12);
            self.pause(Duration::from_secs_f64(gap)).await?;
            self.click().await?;
        }
        Ok(())
    }

    pub async fn scroll(&self, delta: i32) -> Result<()> {
        self.checkpoint.check()?;
        self.executor.scroll(delta).await.map_err(classify)
    }

    pub async fn pause(&self, d: Duration) -> Result<()> {
        self.checkpoint.sleep(d).await
    }

    /// Uniform pause in `[lo, hi]` seconds.
    pub async fn pause_between(&mut self, lo: f64, hi: f64) -> Result<()> {
        let secs = if hi > lo {
            self.rng.gen_range(lo..=hi)
        } else {
            lo
        };
        self.pause(Duration::from_secs_f64(secs.max(0.0))).await
    }

    pub async fn type_text(&mut self, text: &str) -> Result<()> {
        let seq = self
            .typist
            .type_text(text, &self.persona, self.fatigue, &mut self.rng);
        debug!(
            chars = text.chars().count(),
            events = seq.len(),
            total_ms = seq.total().as_millis() as u64,
            "driver.type_text"
        );
        self.play_keys(&seq).await
    }

    pub async fn chord(&self, modifiers: &[Key], key: Key) -> Result<()> {
        let seq = self.typist.chord(modifiers, key);
        self.play_keys(&seq).await
    }

    pub async fn tap(&self, key: Key) -> Result<()> {
        self.chord(&[], key).await
    }

    /// Play a key sequence. Whatever is still held when playback ends, for
    /// any reason, is released before returning.
    pub async fn play_keys(&self, seq: &KeyEventSequence) -> Result<()> {
        let mut held = Vec::new();
        let outcome = self.play_keys_inner(seq, &mut held).await;
        for key in held.into_iter().rev() {
            if let Err(err) = self.executor.release_key(key).await {
                warn!(?key, error = ?err, "driver.release_failed");
            }
        }
        outcome
    }

    async fn play_keys_inner(&self, seq: &KeyEventSequence, held: &mut Vec<Key>) -> Result<()> {
        for event in &seq.events {
            self.checkpoint.check()?;
            match &event.action {
                KeyAction::Tap(key) => self.tap_raw(*key, held).await?,
                KeyAction::Press(key) => self.press_raw(*key, held).await?,
                KeyAction::Release(key) => self.release_raw(*key, held).await?,
                KeyAction::Paste(text) => self.paste(text, held).await?,
            }
            self.checkpoint.sleep(event.delay).await?;
        }
        Ok(())
    }

    async fn press_raw(&self, key: Key, held: &mut Vec<Key>) -> Result<()> {
        self.executor.press_key(key).await.map_err(classify)?;
        if !held.contains(&key) {
            held.push(key);
        }
        Ok(())
    }

    async fn release_raw(&self, key: Key, held: &mut Vec<Key>) -> Result<()> {
        self.executor.release_key(key).await.map_err(classify)?;
        held.retain(|k| *k != key);
        Ok(())
    }

    async fn tap_raw(&self, key: Key, held: &mut Vec<Key>) -> Result<()> {
        self.press_raw(key, held).await?;
        self.release_raw(key, held).await
    }

    async fn paste(&self, text: &str, held: &mut Vec<Key>) -> Result<()> {
        let previous = self.executor.read_clipboard().await.map_err(classify)?;
        self.executor
            .write_clipboard(text)
            .await
            .map_err(classify)?;
        let pasted = self.paste_chord(held).await;
        let restored = self
            .executor
            .write_clipboard(&previous)
            .await
            .map_err(classify);
        pasted.and(restored)
    }

    async fn paste_chord(&self, held: &mut Vec<Key>) -> Result<()> {
        self.press_raw(Key::Control, held).await?;
        self.tap_raw(Key::Char('v'), held).await?;
        self.release_raw(Key::Control, held).await?;
        self.checkpoint.sleep(Duration::from_millis(80)).await
    }

    /// Occasionally perform one filler action confined to `safe`.
    pub async fn maybe_idle(&mut self, safe: Region) -> Result<Option<IdleAction>> {
        self.checkpoint.check()?;
        let pointer = self.pointer().await?;
        let Some(action) = self.idle.choose(&safe, pointer, &mut self.rng) else {
            return Ok(None);
        };
        debug!(?action, "driver.idle");
        match &action {
            IdleAction::Wiggle { to } => {
                self.move_within(*to, &safe).await?;
            }
            IdleAction::Scroll { delta } => {
                self.scroll(*delta).await?;
                self.pause_between(0.3, 0.8).await?;
            }
            IdleAction::GlanceAway { away } => {
                self.chord(&[Key::Alt], Key::Tab).await?;
                self.pause(*away).await?;
                self.chord(&[Key::Alt], Key::Tab).await?;
            }
        }
        Ok(Some(action))
    }

    /// Run one distraction routine confined to `safe`.
    pub async fn distraction(&mut self, safe: Region) -> Result<Distraction> {
        let pointer = self.pointer().await?;
        let routine = self.idle.distraction(&safe, pointer, &mut self.rng);
        debug!(?routine, "driver.distraction");
        match &routine {
            Distraction::TabCycle { forward } => {
                for _ in 0..*forward {
                    self.tap(Key::Tab).await?;
                    self.pause_between(0.15, 0.4).await?;
                }
                for _ in 0..*forward {
                    self.chord(&[Key::Shift], Key::Tab).await?;
                    self.pause_between(0.15, 0.4).await?;
                }
            }
            Distraction::AltTabAndBack { away } => {
                self.chord(&[Key::Alt], Key::Tab).await?;
                self.pause(*away).await?;
                self.chord(&[Key::Alt], Key::Tab).await?;
            }
            Distraction::ConfusedScroll { deltas } => {
                for delta in deltas {
                    self.scroll(*delta).await?;
                    self.pause_between(0.2, 0.6).await?;
                }
            }
            Distraction::Shake { points } => {
                for p in points {
                    self.move_within(*p, &safe).await?;
                }
            }
        }
        self.pause_between(0.3, 0.9).await?;
        Ok(routine)
    }
}

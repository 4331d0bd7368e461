//! Keystroke cadence.
//!
//! [`TypingSimulator::type_text`] turns a payload into a [`KeyEventSequence`]:
//! the exact presses, releases and pauses a person would produce, typos and
//! their corrections included. The sequence never ends with a modifier held.
use std::f64::consts::PI;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::keyboard;
use super::persona::Persona;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// A printable ASCII character other than space.
    Char(char),
    Space,
    Enter,
    Backspace,
    Tab,
    Escape,
    Shift,
    Control,
    Alt,
    Home,
    End,
    Left,
    Right,
    Up,
    Down,
}

impl Key {
    /// Key that types `c`, if it can be typed directly.
    pub fn for_char(c: char) -> Option<Key> {
        match c {
            ' ' => Some(Key::Space),
            '\t' => Some(Key::Tab),
            c if c.is_ascii_graphic() => Some(Key::Char(c)),
            _ => None,
        }
    }

    pub fn is_modifier(&self) -> bool {
        matches!(self, Key::Shift | Key::Control | Key::Alt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub alt: bool,
}

impl Modifiers {
    pub fn is_empty(&self) -> bool {
        !(self.shift || self.control || self.alt)
    }

    fn set(&mut self, key: Key, down: bool) {
        match key {
            Key::Shift => self.shift = down,
            Key::Control => self.control = down,
            Key::Alt => self.alt = down,
            _ => {}
        }
    }

    pub fn held(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        if self.shift {
            keys.push(Key::Shift);
        }
        if self.control {
            keys.push(Key::Control);
        }
        if self.alt {
            keys.push(Key::Alt);
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    /// Press and release.
    Tap(Key),
    Press(Key),
    Release(Key),
    /// Insert text through the clipboard with a Ctrl+V chord, restoring the
    /// previous clipboard contents afterwards.
    Paste(String),
}

/// One action, the modifier state after it, and the pause that follows it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    pub action: KeyAction,
    pub delay: Duration,
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyEventSequence {
    pub events: Vec<KeyEvent>,
}

impl KeyEventSequence {
    pub fn total(&self) -> Duration {
        self.events.iter().map(|e| e.delay).sum()
    }

    /// Modifier state after the last event.
    pub fn held_at_end(&self) -> Modifiers {
        self.events.last().map(|e| e.modifiers).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[derive(Default)]
struct SequenceBuilder {
    events: Vec<KeyEvent>,
    held: Modifiers,
}

impl SequenceBuilder {
    fn push(&mut self, action: KeyAction, delay: Duration) {
        match &action {
            KeyAction::Press(k) => self.held.set(*k, true),
            KeyAction::Release(k) => self.held.set(*k, false),
            _ => {}
        }
        self.events.push(KeyEvent {
            action,
            delay,
            modifiers: self.held,
        });
    }

    fn tap(&mut self, key: Key, delay: Duration) {
        self.push(KeyAction::Tap(key), delay);
    }

    fn chord(&mut self, modifiers: &[Key], key: Key, delay: Duration) {
        for m in modifiers {
            self.push(KeyAction::Press(*m), Duration::from_millis(30));
        }
        self.push(KeyAction::Tap(key), Duration::from_millis(40));
        for m in modifiers.iter().rev() {
            self.push(KeyAction::Release(*m), Duration::ZERO);
        }
        self.pause(delay);
    }

    /// Extend the pause after the most recent event.
    fn pause(&mut self, extra: Duration) {
        if let Some(last) = self.events.last_mut() {
            last.delay += extra;
        }
    }

    fn finish(mut self) -> KeyEventSequence {
        for key in self.held.held() {
            self.push(KeyAction::Release(key), Duration::ZERO);
        }
        KeyEventSequence {
            events: self.events,
        }
    }
}

/// Probability a typo is noticed on the spot rather than a few keys later.
const IMMEDIATE_NOTICE: f64 = 0.7;
/// Probability a typo is a multi-key slip.
const RAGE_TYPO: f64 = 0.2;
const THINKING_PAUSE: f64 = 0.005;
const WORD_PAUSE: f64 = 0.2;
/// Characters typed before a caret review may happen.
const CARET_CHECK_AFTER: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct TypingSimulator;

impl TypingSimulator {
    pub fn new() -> Self {
        Self
    }

    /// A single chord such as Ctrl+A, with every modifier released afterwards.
    pub fn chord(&self, modifiers: &[Key], key: Key) -> KeyEventSequence {
        let mut b = SequenceBuilder::default();
        b.chord(modifiers, key, Duration::from_millis(60));
        b.finish()
    }

    pub fn type_text<R: Rng + ?Sized>(
        &self,
        text: &str,
        persona: &Persona,
        fatigue: f64,
        rng: &mut R,
    ) -> KeyEventSequence {
        let mut b = SequenceBuilder::default();
        for m in [Key::Shift, Key::Control, Key::Alt] {
            b.push(KeyAction::Release(m), Duration::ZERO);
        }

        let scale = persona.speed_multiplier * fatigue.max(1.0);
        let phase = rng.gen_range(0.0..2.0 * PI);
        let chars: Vec<char> = text.chars().collect();
        let mut caret_checked = false;
        let mut typed = 0usize;
        let mut i = 0usize;

        while i < chars.len() {
            let c = chars[i];
            let flow = flow_delay(i, phase, rng).mul_f64(scale);

            if c == '\n' || c == '\r' {
                if c == '\r' && chars.get(i + 1) == Some(&'\n') {
                    i += 1;
                }
                b.chord(&[Key::Shift], Key::Enter, flow);
                i += 1;
                continue;
            }

            let Some(key) = Key::for_char(c) else {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n' || ch == '\r' || Key::for_char(ch).is_some())
                    .map_or(chars.len(), |n| i + n);
                let run: String = chars[i..end].iter().collect();
                b.push(KeyAction::Paste(run), flow + secs(rng, 0.1, 0.3));
                typed += end - i;
                i = end;
                continue;
            };

            if persona.typo_rate > 0.0 && rng.gen_bool(persona.typo_rate.min(1.0)) {
                self.typo(&mut b, &chars, i, scale, rng);
            }

            b.tap(key, flow);
            typed += 1;

            if key == Key::Space && rng.gen_bool(WORD_PAUSE) {
                b.pause(secs(rng, 0.05, 0.15).mul_f64(scale));
            }
            if rng.gen_bool(THINKING_PAUSE) {
                b.pause(secs(rng, 0.3, 0.6));
            }
            if !caret_checked
                && typed >= CARET_CHECK_AFTER
                && persona.caret_check_rate > 0.0
                && rng.gen_bool(persona.caret_check_rate.min(1.0))
            {
                caret_checked = true;
                caret_review(&mut b, rng);
            }
            i += 1;
        }

        b.finish()
    }

    /// Emit wrong keys for `chars[i]` and their correction. The correct key
    /// itself is typed by the caller afterwards.
    fn typo<R: Rng + ?Sized>(
        &self,
        b: &mut SequenceBuilder,
        chars: &[char],
        i: usize,
        scale: f64,
        rng: &mut R,
    ) {
        let Some(first) = keyboard::random_neighbour(chars[i], rng) else {
            return;
        };

        let mut wrong = vec![Key::Char(first)];
        if rng.gen_bool(IMMEDIATE_NOTICE) {
            if rng.gen_bool(RAGE_TYPO) {
                let extra = rng.gen_range(1..=3);
                let mut prev = first;
                for _ in 0..extra {
                    match keyboard::random_neighbour(prev, rng) {
                        Some(next) => {
                            wrong.push(Key::Char(next));
                            prev = next;
                        }
                        None => break,
                    }
                }
            }
        } else {
            // keep typing a little before noticing
            let ahead = rng.gen_range(1..=2);
            for &c in chars.iter().skip(i + 1).take(ahead) {
                match Key::for_char(c) {
                    Some(key) => wrong.push(key),
                    None => break,
                }
            }
        }

        for key in &wrong {
            b.tap(*key, secs(rng, 0.03, 0.08).mul_f64(scale));
        }
        b.pause(secs(rng, 0.1, 0.3));
        for _ in 0..wrong.len() {
            b.tap(Key::Backspace, secs(rng, 0.04, 0.09).mul_f64(scale));
        }
    }
}

/// Look back at what was typed, then jump the caret to the very end.
fn caret_review<R: Rng + ?Sized>(b: &mut SequenceBuilder, rng: &mut R) {
    let steps = rng.gen_range(2..=8);
    for _ in 0..steps {
        b.tap(Key::Left, secs(rng, 0.03, 0.07));
    }
    b.pause(secs(rng, 0.3, 0.8));
    b.tap(Key::End, secs(rng, 0.05, 0.1));
    b.tap(Key::Down, secs(rng, 0.05, 0.1));
    b.chord(&[Key::Control], Key::End, secs(rng, 0.1, 0.2));
}

/// Smoothly varying base delay with a little independent noise.
fn flow_delay<R: Rng + ?Sized>(i: usize, phase: f64, rng: &mut R) -> Duration {
    let wave = (i as f64 * 0.3 + phase).sin();
    let noise = rng.gen_range(-0.005..=0.005);
    Duration::from_secs_f64((0.025 - wave * 0.015 + noise).max(0.005))
}

fn secs<R: Rng + ?Sized>(rng: &mut R, lo: f64, hi: f64) -> Duration {
    Duration::from_secs_f64(rng.gen_range(lo..=hi))
}

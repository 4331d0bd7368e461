//! In-memory desktop used for dry runs and tests.
//!
//! [`SimulatedDesktop`] implements both [`ActionExecutor`] and
//! [`ScreenGeometry`]. It records every primitive, models a single focused
//! text field (typing, Ctrl+A, Ctrl+V, Backspace, Enter to submit) and can be
//! told to fail or to have its pointer yanked away.
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use cadence_common::{CadenceError, Point, Region};

use crate::executor::{ActionExecutor, ScreenGeometry};
use crate::human::typing::Key;

#[derive(Debug, Clone, PartialEq)]
pub enum DesktopEvent {
    Move(Point),
    Click(Point),
    Press(Key),
    Release(Key),
    Scroll(i32),
    ClipboardWrite(String),
}

#[derive(Debug, Default)]
struct DesktopState {
    pointer: Point,
    events: Vec<DesktopEvent>,
    held: Vec<Key>,
    clipboard: String,
    field: String,
    selected_all: bool,
    submissions: Vec<String>,
    moves: usize,
    failures_left: u32,
    fail_on_key: Option<Key>,
    fling: Option<(usize, Point)>,
}

impl DesktopState {
    fn take_failure(&mut self, what: &str) -> anyhow::Result<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(CadenceError::Transient(format!("{what} did not register")).into());
        }
        Ok(())
    }

    fn insert(&mut self, text: &str) {
        if self.selected_all {
            self.field.clear();
            self.selected_all = false;
        }
        self.field.push_str(text);
    }

    /// An empty field does not submit, like a disabled send button.
    fn submit(&mut self) {
        self.selected_all = false;
        if self.field.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.field);
        self.submissions.push(text);
    }

    fn apply_press(&mut self, key: Key) {
        let control = self.held.contains(&Key::Control);
        let shift = self.held.contains(&Key::Shift);
        let alt = self.held.contains(&Key::Alt);
        match key {
            Key::Char('a') | Key::Char('A') if control => self.selected_all = true,
            Key::Char('v') | Key::Char('V') if control => {
                let clip = self.clipboard.clone();
                self.insert(&clip);
            }
            Key::Char(_) if control || alt => {}
            Key::Char(c) => self.insert(&c.to_string()),
            Key::Space => self.insert(" "),
            Key::Enter if shift => self.insert("\n"),
            Key::Enter => self.submit(),
            Key::Backspace => {
                if self.selected_all {
                    self.field.clear();
                    self.selected_all = false;
                } else {
                    self.field.pop();
                }
            }
            Key::Home | Key::End | Key::Left | Key::Right | Key::Up | Key::Down => {
                self.selected_all = false;
            }
            Key::Tab | Key::Escape | Key::Shift | Key::Control | Key::Alt => {}
        }
    }
}

pub struct SimulatedDesktop {
    bounds: Region,
    submit_button: Option<Region>,
    state: Mutex<DesktopState>,
}

impl SimulatedDesktop {
    /// A desktop of `width` x `height` pixels with the pointer in the middle.
    pub fn new(width: f64, height: f64) -> Self {
        let bounds = Region::screen(width, height);
        let state = DesktopState {
            pointer: bounds.center(),
            ..DesktopState::default()
        };
        Self {
            bounds,
            submit_button: None,
            state: Mutex::new(state),
        }
    }

    /// Clicking inside `region` submits the field.
    pub fn with_submit_button(mut self, region: Region) -> Self {
        self.submit_button = Some(region);
        self
    }

    fn state(&self) -> MutexGuard<'_, DesktopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` pointer, click or key-press primitives fail transiently.
    pub fn fail_next(&self, n: u32) {
        self.state().failures_left = n;
    }

    /// The next press of `key` fails transiently.
    pub fn fail_on_key(&self, key: Key) {
        self.state().fail_on_key = Some(key);
    }

    /// After `moves` further pointer moves the pointer jumps to `to`, as if
    /// the operator grabbed the mouse.
    pub fn fling_after(&self, moves: usize, to: Point) {
        let mut st = self.state();
        let at = st.moves + moves;
        st.fling = Some((at, to));
    }

    pub fn events(&self) -> Vec<DesktopEvent> {
        self.state().events.clone()
    }

    pub fn held_keys(&self) -> Vec<Key> {
        self.state().held.clone()
    }

    pub fn pointer(&self) -> Point {
        self.state().pointer
    }

    pub fn field_text(&self) -> String {
        self.state().field.clone()
    }

    pub fn set_field_text(&self, text: &str) {
        self.state().field = text.to_string();
    }

    pub fn submissions(&self) -> Vec<String> {
        self.state().submissions.clone()
    }

    pub fn clipboard(&self) -> String {
        self.state().clipboard.clone()
    }

    pub fn move_count(&self) -> usize {
        self.state().moves
    }

    pub fn click_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| matches!(e, DesktopEvent::Click(_)))
            .count()
    }
}

#[async_trait]
impl ActionExecutor for SimulatedDesktop {
    async fn move_pointer_to(&self, p: Point) -> anyhow::Result<()> {
        let mut st = self.state();
        st.take_failure("pointer move")?;
        st.moves += 1;
        let landed = self.bounds.clamp(p);
        st.pointer = landed;
        st.events.push(DesktopEvent::Move(landed));
        if let Some((at, to)) = st.fling {
            if st.moves >= at {
                st.pointer = to;
                st.fling = None;
            }
        }
        Ok(())
    }

    async fn click(&self) -> anyhow::Result<()> {
        let mut st = self.state();
        st.take_failure("click")?;
        let at = st.pointer;
        st.events.push(DesktopEvent::Click(at));
        st.selected_all = false;
        if self.submit_button.is_some_and(|b| b.contains(at)) {
            st.submit();
        }
        Ok(())
    }

    async fn press_key(&self, key: Key) -> anyhow::Result<()> {
        let mut st = self.state();
        if st.fail_on_key == Some(key) {
            st.fail_on_key = None;
            return Err(CadenceError::Transient(format!("{key:?} stuck")).into());
        }
        st.take_failure("key press")?;
        st.events.push(DesktopEvent::Press(key));
        st.apply_press(key);
        if !st.held.contains(&key) {
            st.held.push(key);
        }
        Ok(())
    }

    async fn release_key(&self, key: Key) -> anyhow::Result<()> {
        let mut st = self.state();
        st.events.push(DesktopEvent::Release(key));
        st.held.retain(|k| *k != key);
        Ok(())
    }

    async fn read_clipboard(&self) -> anyhow::Result<String> {
        Ok(self.state().clipboard.clone())
    }

    async fn write_clipboard(&self, text: &str) -> anyhow::Result<()> {
        let mut st = self.state();
        st.clipboard = text.to_string();
        st.events.push(DesktopEvent::ClipboardWrite(text.to_string()));
        Ok(())
    }

    async fn scroll(&self, delta: i32) -> anyhow::Result<()> {
        self.state().events.push(DesktopEvent::Scroll(delta));
        Ok(())
    }
}

#[async_trait]
impl ScreenGeometry for SimulatedDesktop {
    async fn pointer_position(&self) -> anyhow::Result<Point> {
        Ok(self.state().pointer)
    }

    fn bounds(&self) -> Region {
        self.bounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn field_model_follows_shortcuts() {
        let desk = SimulatedDesktop::new(800.0, 600.0);
        desk.set_field_text("stale draft");
        desk.press_key(Key::Control).await.unwrap();
        desk.press_key(Key::Char('a')).await.unwrap();
        desk.release_key(Key::Char('a')).await.unwrap();
        desk.release_key(Key::Control).await.unwrap();
        desk.press_key(Key::Backspace).await.unwrap();
        assert_eq!(desk.field_text(), "");

        desk.write_clipboard("pasted").await.unwrap();
        desk.press_key(Key::Control).await.unwrap();
        desk.press_key(Key::Char('v')).await.unwrap();
        desk.release_key(Key::Control).await.unwrap();
        desk.press_key(Key::Enter).await.unwrap();
        assert_eq!(desk.submissions(), vec!["pasted".to_string()]);
        // raw presses above were never released
        assert_eq!(
            desk.held_keys(),
            vec![Key::Backspace, Key::Char('v'), Key::Enter]
        );
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let desk = SimulatedDesktop::new(800.0, 600.0);
        desk.fail_next(1);
        let err = desk.click().await.unwrap_err();
        assert!(crate::executor::classify(err).is_transient());
        assert!(desk.click().await.is_ok());
    }

    #[tokio::test]
    async fn clicking_the_submit_button_submits() {
        let desk = SimulatedDesktop::new(800.0, 600.0).with_submit_button(Region::new(
            700.0, 500.0, 760.0, 540.0,
        ));
        desk.set_field_text("hello");
        desk.move_pointer_to(Point::new(720.0, 520.0)).await.unwrap();
        desk.click().await.unwrap();
        assert_eq!(desk.submissions(), vec!["hello".to_string()]);
    }
}

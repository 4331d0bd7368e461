//! The steps of one task: focus the input, clear it, type, submit.
use std::time::Duration;

use cadence_common::{Point, Region, Result};
use cadence_drivers::{HumanDriver, Key};
use rand::Rng;
use tracing::debug;

/// Reading speed at unit persona speed, in words per minute.
const READING_WPM: f64 = 200.0;
const MIN_READING_PAUSE: Duration = Duration::from_millis(500);

/// Screen areas a task touches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskScript {
    pub input: Region,
    pub submit: Region,
    /// Where fillers and empty clicks may land.
    pub idle: Region,
    /// Usable screen area; stray movements are kept inside it.
    pub bounds: Region,
}

/// How the payload was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMethod {
    Enter,
    Click,
}

impl TaskScript {
    pub fn new(input: Region, submit: Region, idle: Region, bounds: Region) -> Self {
        Self {
            input,
            submit,
            idle,
            bounds,
        }
    }

    /// Play the whole task through `driver`. Each step goes through the
    /// driver's checkpoint, so a stop or interlock trip ends it early.
    pub async fn run(&self, driver: &mut HumanDriver, payload: &str) -> Result<SubmitMethod> {
        if driver.roll(driver.persona().distraction_rate) {
            driver.distraction(self.idle).await?;
        }

        let focus = self.input.inset(4.0).random_point(driver.rng());
        driver.move_to(focus, true).await?;
        driver.smart_click().await?;
        driver.pause_between(0.15, 0.4).await?;

        driver.chord(&[Key::Control], Key::Char('a')).await?;
        driver.pause_between(0.05, 0.15).await?;
        driver.tap(Key::Backspace).await?;

        if driver.roll(driver.persona().empty_click_rate) {
            self.empty_click(driver, focus).await?;
        }
        if driver.roll(driver.persona().gaze_rate) {
            self.gaze(driver).await?;
        }

        driver.type_text(payload).await?;
        driver.pause(reading_pause(payload, driver.persona().speed_multiplier)).await?;

        let method = if driver.roll(driver.persona().enter_submit_rate) {
            driver.tap(Key::Enter).await?;
            SubmitMethod::Enter
        } else {
            self.click_submit(driver).await?;
            SubmitMethod::Click
        };
        debug!(?method, chars = payload.chars().count(), "script.submitted");
        Ok(method)
    }

    /// Click somewhere harmless, then come back and refocus the input.
    async fn empty_click(&self, driver: &mut HumanDriver, focus: Point) -> Result<()> {
        let stray = self.idle.random_point(driver.rng());
        driver.move_within(stray, &self.idle).await?;
        driver.click().await?;
        driver.pause_between(0.3, 0.9).await?;
        driver.move_to(focus, false).await?;
        driver.click().await
    }

    /// Scroll down a little to look at something, then back up.
    async fn gaze(&self, driver: &mut HumanDriver) -> Result<()> {
        let notches = driver.rng().gen_range(1..=3);
        driver.scroll(notches * 100).await?;
        driver.pause_between(0.8, 2.0).await?;
        driver.scroll(-notches * 100).await?;
        driver.pause_between(0.2, 0.5).await
    }

    async fn click_submit(&self, driver: &mut HumanDriver) -> Result<()> {
        let target = self.submit.random_point_in_ellipse(driver.rng());
        if driver.roll(driver.persona().submit_hesitation_rate) {
            let rng = driver.rng();
            let near = Point::new(
                target.x + rng.gen_range(-40.0..=40.0),
                target.y + rng.gen_range(15.0..=40.0),
            );
            let drift = Point::new(
                near.x + rng.gen_range(-60.0..=60.0),
                near.y + rng.gen_range(20.0..=60.0),
            );
            driver.move_within(near, &self.bounds).await?;
            driver.pause_between(0.3, 0.8).await?;
            driver.move_within(drift, &self.bounds).await?;
            driver.pause_between(0.2, 0.6).await?;
        }
        driver.move_to(target, false).await?;
        driver.pause_between(0.05, 0.2).await?;
        driver.smart_click().await
    }
}

/// Time to re-read `payload` before sending it.
pub fn reading_pause(payload: &str, speed_multiplier: f64) -> Duration {
    let words = payload.split_whitespace().count() as f64;
    let wpm = READING_WPM / speed_multiplier.max(0.1);
    Duration::from_secs_f64(words / wpm * 60.0).max(MIN_READING_PAUSE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_pause_scales_with_words_and_speed() {
        let text = "one two three four five six seven eight nine ten ".repeat(10);
        assert_eq!(reading_pause(&text, 1.0), Duration::from_secs(30));
        assert_eq!(reading_pause(&text, 2.0), Duration::from_secs(60));
        assert_eq!(reading_pause("hi", 1.0), MIN_READING_PAUSE);
    }
}

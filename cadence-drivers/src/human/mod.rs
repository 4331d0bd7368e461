//! Human-likeness engine: personas, motion, typing and idle behaviour.
pub mod driver;
pub mod idle;
pub mod keyboard;
pub mod motion;
pub mod persona;
pub mod typing;

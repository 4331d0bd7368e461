//! Human-likeness engine for input automation.
//!
//! This crate decides *what* a person would do with a mouse and keyboard and
//! *when*; the actual primitives are delegated to an [`ActionExecutor`].
//!
//! - [`human::persona`]: randomized behavioural profiles ([`Persona`])
//! - [`human::motion`]: Bezier pointer paths timed by a Fitts's-law model
//! - [`human::typing`]: keystroke cadence with typos and corrections
//! - [`human::idle`]: filler actions and distraction routines
//! - [`human::driver::HumanDriver`]: plays plans through an executor
//! - [`interlock`]: corner emergency stop and cooperative checkpoints
//! - [`dry_run::SimulatedDesktop`]: in-memory executor for dry runs and tests
//!
//! ```
//! use cadence_common::{Point, Region};
//! use cadence_drivers::{MotionPlanner, MotionRequest, Persona};
//! use rand::SeedableRng;
//!
//! let screen = Region::screen(1920.0, 1080.0);
//! let planner = MotionPlanner::new(screen, 10.0);
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//!
//! let req = MotionRequest::new(Point::new(5.0, 5.0), Point::new(1915.0, 1075.0));
//! let plan = planner.plan(&req, &Persona::baseline(), &mut rng);
//! assert!(plan.waypoints.iter().all(|w| planner.bounds().contains(w.point)));
//! ```
pub mod dry_run;
pub mod executor;
pub mod human;
pub mod interlock;

pub use dry_run::{DesktopEvent, SimulatedDesktop};
pub use executor::{ActionExecutor, ScreenGeometry};
pub use human::driver::HumanDriver;
pub use human::idle::{Distraction, IdleAction, IdleSimulator};
pub use human::motion::{FittsModel, MotionPlanner, MotionRequest, Waypoint, WaypointSequence};
pub use human::persona::{generate, CountRange, Mood, ParamRange, Persona, PersonaTable};
pub use human::typing::{Key, KeyAction, KeyEvent, KeyEventSequence, Modifiers, TypingSimulator};
pub use interlock::{Checkpoint, SafetyInterlock};

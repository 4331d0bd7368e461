//! Common types and utilities shared across Cadence crates.
//!
//! This crate defines the error taxonomy, screen geometry value types and
//! observability helpers used throughout the Cadence workspace. It is
//! intentionally lightweight so that every crate can depend on it without
//! pulling in the async runtime.
//!
//! # Overview
//!
//! - [`CadenceError`] and [`Result`]: shared error handling
//! - [`geometry`]: [`Point`] and [`Region`] in screen pixels
//! - [`observability`]: centralised tracing/logging initialisation
//!
//! # Examples
//!
//! Classifying errors the way the automation loop does:
//!
//! ```rust
//! use cadence_common::CadenceError;
//!
//! let err = CadenceError::Transient("submit button not found".into());
//! assert!(err.is_transient());
//! assert!(!err.is_fatal());
//!
//! let err = CadenceError::Interlock { x: 0.0, y: 0.0 };
//! assert!(err.is_fatal());
//! ```
pub mod geometry;
pub mod observability;

pub use geometry::{Point, Region};

/// Largest accepted jitter on the waiting countdown, as a multiple of the
/// base interval.
pub const MAX_JITTER_RATIO: f64 = 10.0;

/// Error types used across the Cadence system.
///
/// The variants follow three handling classes: transient failures are
/// retried in place, fatal failures halt the automation loop, and
/// configuration failures refuse to start it at all.
#[derive(thiserror::Error, Debug)]
pub enum CadenceError {
    /// A single action failed or a target was temporarily unavailable.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The pointer reached a reserved corner of the screen.
    #[error("Safety interlock tripped at ({x:.0}, {y:.0})")]
    Interlock { x: f64, y: f64 },

    /// Durable storage could not be read or written.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A required target or region was never established.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stop was requested and observed at a checkpoint.
    #[error("Cancelled at checkpoint")]
    Cancelled,

    /// An action executor reported an error it did not classify.
    #[error("Driver error: {0}")]
    Driver(#[from] anyhow::Error),
}

impl CadenceError {
    /// Errors that halt the loop until an explicit restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Interlock { .. } | Self::Storage(_))
    }

    /// Errors that are retried with backoff while the task stays queued.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Driver(_))
    }
}

impl From<serde_json::Error> for CadenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Convenient alias for results that use [`CadenceError`].
pub type Result<T> = std::result::Result<T, CadenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_disjoint() {
        let all = [
            CadenceError::Transient("x".into()),
            CadenceError::Interlock { x: 1.0, y: 1.0 },
            CadenceError::Storage("disk full".into()),
            CadenceError::Configuration("no input region".into()),
            CadenceError::Cancelled,
            CadenceError::Driver(anyhow::anyhow!("boom")),
        ];
        for err in &all {
            assert!(!(err.is_fatal() && err.is_transient()), "{err}");
        }
        assert!(!CadenceError::Cancelled.is_fatal());
        assert!(!CadenceError::Configuration(String::new()).is_transient());
    }
}

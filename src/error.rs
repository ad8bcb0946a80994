//! Recoverable errors: values a fallible constructor can return before a simulation is running.
//!
//! Once [`crate::simulation::Simulation::run`] is underway a stricter contract takes over and
//! unrecoverable misuse goes through [`crate::fatal`] instead — this type is for
//! call sites that genuinely have a caller able to handle failure (building up registration
//! data, parsing configuration), not for driver-loop invariant violations.

use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An error that originates in this crate.
    #[error("{0}")]
    General(String),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the solver crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SolverError>;

/// Fatal solver failures.
///
/// Non-convergence of the conjugate gradient or of the outer iteration is
/// advisory and surfaces as a warning plus a status field in the returned
/// report, never as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tetrahedron {0} is degenerate: its corners span no volume")]
    DegenerateTetrahedron(usize),

    #[error("non-finite {quantity} at index {index}")]
    NumericFailure {
        quantity: &'static str,
        index: usize,
    },
}

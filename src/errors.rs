//! Error types for the ensemble sampler.
//!
//! Two layers exist. [`EvalError`] is what an objective function hands back when it
//! cannot score a parameter vector; the sampler decides whether that is recoverable.
//! [`Error`] is what the sampler itself reports to the caller.

use thiserror::Error;

use crate::sampler::Status;

/// Failure reported by an objective function.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// The objective cannot be evaluated at this point (e.g. a domain error in a
    /// transcendental function). Scored as `-inf`, the proposal is rejected and
    /// the run continues.
    #[error("domain error: {0}")]
    Domain(String),

    /// The objective is broken in a way that retrying elsewhere will not fix.
    /// Aborts the run.
    #[error("fatal objective error: {0}")]
    Fatal(String),
}

/// Sampler error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid run configuration or initial positions.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Non-recoverable failure while scoring a walker's position.
    #[error("objective failed for walker {walker}: {message}")]
    EvaluationFatal { walker: usize, message: String },

    /// Every walker sits at `-inf` log-probability.
    #[error("all walkers have -inf log-probability at iteration {iteration}")]
    DegenerateEnsemble { iteration: usize },

    /// More evaluations timed out than the configured limit allows.
    #[error("{count} evaluations timed out, exceeding the limit of {limit}")]
    TimeoutLimitExceeded { count: usize, limit: usize },

    /// A lifecycle method was called in the wrong state.
    #[error("sampler is {status:?}, expected {expected}")]
    InvalidState {
        status: Status,
        expected: &'static str,
    },

    /// The chain is too short for a reliable autocorrelation estimate.
    #[error(
        "the chain is shorter than {tol} times the integrated autocorrelation time \
         for {n_params} parameter(s); N/{tol} = {limit:.1}, tau estimate: {tau:?}"
    )]
    ChainTooShort {
        tau: Vec<f64>,
        n_params: usize,
        tol: f64,
        limit: f64,
    },

    /// Array shape mismatch.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

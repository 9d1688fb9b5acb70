//! Affine-invariant ensemble MCMC (Goodman & Weare 2010 stretch move).
//!
//! Build a [`RunConfiguration`], wrap the log-posterior in an [`Objective`] or
//! [`PlainDensity`], and drive an [`EnsembleSampler`].

pub mod chain;
pub mod config;
pub mod ensemble;
pub mod errors;
pub mod objective;
mod parallel;
pub mod sampler;
pub mod stats;
pub mod stretch;

pub use chain::ChainHistory;
pub use config::RunConfiguration;
pub use ensemble::{gaussian_ball, EnsembleSnapshot, WalkerEnsemble};
pub use errors::{Error, EvalError, Result};
pub use objective::{LogPosterior, Objective, PlainDensity};
pub use sampler::{EnsembleSampler, Samples, Status, StopHandle};

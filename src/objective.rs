/*!
Objective functions and the evaluator that shields the sampler from them.

The sampler only ever sees a log-posterior: a function from a parameter vector to
a real number (or `-inf` outside the support). Anything implementing
[`LogPosterior`] qualifies. Two adapters cover the common cases:

- [`Objective`] pairs a fallible function with fixed auxiliary arguments (observed
  data, noise levels, ...), the way a model is usually written.
- [`PlainDensity`] wraps an infallible closure.

# Examples

```rust
use stretch_mcmc::errors::EvalError;
use stretch_mcmc::objective::{LogPosterior, Objective, PlainDensity};

// log N(x | mu, 1) with mu passed as auxiliary argument
let shifted = Objective::new(
    |theta: &[f64], mu: &f64| -> Result<f64, EvalError> { Ok(-0.5 * (theta[0] - mu).powi(2)) },
    3.0,
);
assert_eq!(shifted.log_prob(&[3.0]), Ok(0.0));

let standard = PlainDensity(|theta: &[f64]| -0.5 * theta[0] * theta[0]);
assert_eq!(standard.log_prob(&[0.0]), Ok(0.0));
```
*/

use std::time::{Duration, Instant};

use crate::errors::{Error, EvalError, Result};

/// An unnormalized log-posterior density.
///
/// Return `Ok(f64::NEG_INFINITY)` outside the support, [`EvalError::Domain`] when the
/// point cannot be scored but the run should go on, and [`EvalError::Fatal`] when
/// the run must stop.
pub trait LogPosterior: Sync {
    fn log_prob(&self, theta: &[f64]) -> std::result::Result<f64, EvalError>;
}

/// A log-posterior function together with its fixed auxiliary arguments.
#[derive(Debug, Clone)]
pub struct Objective<F, A = ()> {
    func: F,
    args: A,
}

impl<F, A> Objective<F, A>
where
    F: Fn(&[f64], &A) -> std::result::Result<f64, EvalError> + Sync,
    A: Sync,
{
    pub fn new(func: F, args: A) -> Self {
        Self { func, args }
    }

    /// The auxiliary arguments handed to every call.
    pub fn args(&self) -> &A {
        &self.args
    }
}

impl<F, A> LogPosterior for Objective<F, A>
where
    F: Fn(&[f64], &A) -> std::result::Result<f64, EvalError> + Sync,
    A: Sync,
{
    fn log_prob(&self, theta: &[f64]) -> std::result::Result<f64, EvalError> {
        (self.func)(theta, &self.args)
    }
}

/// Adapter for an infallible log-density closure.
#[derive(Debug, Clone, Copy)]
pub struct PlainDensity<F>(pub F);

impl<F> LogPosterior for PlainDensity<F>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    fn log_prob(&self, theta: &[f64]) -> std::result::Result<f64, EvalError> {
        Ok((self.0)(theta))
    }
}

/// How an evaluation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The objective returned a value (possibly `-inf`).
    Scored,
    /// The objective reported a recoverable domain error; scored `-inf`.
    DomainError,
    /// The call ran longer than the configured budget; scored `-inf`.
    TimedOut,
}

/// A scored position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub log_prob: f64,
    pub outcome: Outcome,
}

impl Evaluation {
    fn rejected(outcome: Outcome) -> Self {
        Self {
            log_prob: f64::NEG_INFINITY,
            outcome,
        }
    }
}

/// Applies a [`LogPosterior`] to parameter vectors and classifies what comes back.
///
/// Recoverable failures (domain errors, timeouts) become `-inf`. Malformed input
/// (wrong length, non-finite coordinates), malformed output (`NaN`, `+inf`) and
/// [`EvalError::Fatal`] become [`Error::EvaluationFatal`].
#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator<T> {
    objective: T,
    n_dim: usize,
    timeout: Option<Duration>,
}

impl<T: LogPosterior> ObjectiveEvaluator<T> {
    pub fn new(objective: T, n_dim: usize, timeout: Option<Duration>) -> Self {
        Self {
            objective,
            n_dim,
            timeout,
        }
    }

    pub fn objective(&self) -> &T {
        &self.objective
    }

    pub fn n_dim(&self) -> usize {
        self.n_dim
    }

    /// Scores `theta` on behalf of `walker` (the id only labels errors).
    pub fn evaluate(&self, walker: usize, theta: &[f64]) -> Result<Evaluation> {
        let fatal = |message: String| Error::EvaluationFatal { walker, message };

        if theta.len() != self.n_dim {
            return Err(fatal(format!(
                "parameter vector has length {}, expected {}",
                theta.len(),
                self.n_dim
            )));
        }
        if let Some(idx) = theta.iter().position(|v| !v.is_finite()) {
            return Err(fatal(format!(
                "parameter {idx} is not finite ({})",
                theta[idx]
            )));
        }

        let start = Instant::now();
        let result = self.objective.log_prob(theta);
        let elapsed = start.elapsed();

        if let Some(timeout) = self.timeout {
            if elapsed > timeout {
                log::warn!(
                    "evaluation for walker {walker} took {elapsed:?}, budget is {timeout:?}; rejecting"
                );
                return Ok(Evaluation::rejected(Outcome::TimedOut));
            }
        }

        match result {
            Ok(lp) if lp.is_nan() => Err(fatal("objective returned NaN".into())),
            Ok(lp) if lp == f64::INFINITY => Err(fatal("objective returned +inf".into())),
            Ok(log_prob) => Ok(Evaluation {
                log_prob,
                outcome: Outcome::Scored,
            }),
            Err(EvalError::Domain(msg)) => {
                log::trace!("domain error for walker {walker}: {msg}");
                Ok(Evaluation::rejected(Outcome::DomainError))
            }
            Err(EvalError::Fatal(msg)) => Err(fatal(msg)),
        }
    }
}

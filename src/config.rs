/*!
Run configuration for the [`EnsembleSampler`](crate::sampler::EnsembleSampler).

Every option the sampler understands lives in [`RunConfiguration`]. The struct is
built with consuming `set_*` methods and validated once, when the sampler is
constructed. After that the sampler only reads it.

# Examples

```rust
use stretch_mcmc::config::RunConfiguration;

let config = RunConfiguration::new(50, 2)
    .set_seed(42)
    .set_n_iterations(2_000)
    .set_burn_in(500)
    .set_thin(5);
assert!(config.validate().is_ok());
assert_eq!(config.stretch_scale, 2.0);
```
*/

use std::time::Duration;

use crate::errors::{Error, Result};

/// Stretch scale recommended by Goodman & Weare (2010).
pub const DEFAULT_STRETCH_SCALE: f64 = 2.0;

/// All options of one sampling run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    /// Number of walkers. Must be even and at least 2; `>= 2 * n_dim` is recommended.
    pub n_walkers: usize,
    /// Dimension of the parameter space.
    pub n_dim: usize,
    /// Stretch scale `a` of the proposal, `z` lives in `[1/a, a]`. Must exceed 1.
    pub stretch_scale: f64,
    /// Number of iterations a run performs (across pauses).
    pub n_iterations: usize,
    /// Stored iterations dropped by default read-outs.
    pub burn_in: usize,
    /// Store only every `thin`-th iteration.
    pub thin: usize,
    /// Seed of the per-walker random streams. Drawn from the thread RNG when `None`.
    pub seed: Option<u64>,
    /// Number of workers evaluating proposals: 1 runs serially, 0 uses one worker per core.
    pub parallelism: usize,
    /// Wall-clock budget of a single objective call. Over-budget calls score `-inf`.
    pub evaluation_timeout: Option<Duration>,
    /// Fail the run once more than this many evaluations timed out.
    pub max_timeouts: Option<usize>,
    /// Keep a trace of every proposal (stretch factor, draws, decision).
    pub record_proposals: bool,
}

impl RunConfiguration {
    /// Creates a configuration with defaults for everything except the ensemble shape.
    pub fn new(n_walkers: usize, n_dim: usize) -> Self {
        Self {
            n_walkers,
            n_dim,
            stretch_scale: DEFAULT_STRETCH_SCALE,
            n_iterations: 1_000,
            burn_in: 0,
            thin: 1,
            seed: None,
            parallelism: 1,
            evaluation_timeout: None,
            max_timeouts: None,
            record_proposals: false,
        }
    }

    pub fn set_stretch_scale(mut self, a: f64) -> Self {
        self.stretch_scale = a;
        self
    }

    pub fn set_n_iterations(mut self, n_iterations: usize) -> Self {
        self.n_iterations = n_iterations;
        self
    }

    pub fn set_burn_in(mut self, burn_in: usize) -> Self {
        self.burn_in = burn_in;
        self
    }

    pub fn set_thin(mut self, thin: usize) -> Self {
        self.thin = thin;
        self
    }

    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn set_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers;
        self
    }

    pub fn set_evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = Some(timeout);
        self
    }

    pub fn set_max_timeouts(mut self, limit: usize) -> Self {
        self.max_timeouts = Some(limit);
        self
    }

    pub fn set_record_proposals(mut self, record: bool) -> Self {
        self.record_proposals = record;
        self
    }

    /// Checks every option, returning [`Error::Configuration`] for the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.n_walkers < 2 {
            return Err(Error::Configuration(format!(
                "at least 2 walkers are required, got {}",
                self.n_walkers
            )));
        }
        if self.n_walkers % 2 != 0 {
            return Err(Error::Configuration(format!(
                "the number of walkers must be even, got {}",
                self.n_walkers
            )));
        }
        if self.n_dim < 1 {
            return Err(Error::Configuration(
                "the parameter space needs at least one dimension".into(),
            ));
        }
        if !(self.stretch_scale.is_finite() && self.stretch_scale > 1.0) {
            return Err(Error::Configuration(format!(
                "stretch scale must be a finite number > 1, got {}",
                self.stretch_scale
            )));
        }
        if self.thin < 1 {
            return Err(Error::Configuration("thinning stride must be >= 1".into()));
        }
        if let Some(timeout) = self.evaluation_timeout {
            if timeout.is_zero() {
                return Err(Error::Configuration(
                    "evaluation timeout must be positive".into(),
                ));
            }
        }
        if self.n_walkers < 2 * self.n_dim {
            log::warn!(
                "{} walkers for {} dimensions; at least {} are recommended",
                self.n_walkers,
                self.n_dim,
                2 * self.n_dim
            );
        }
        Ok(())
    }
}

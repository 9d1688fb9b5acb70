/*!
# Stretch move

The affine-invariant "stretch move" of Goodman & Weare (2010). A walker `X_k` is
moved along the line through a randomly chosen walker `X_j` of the complementary
half:

```text
X' = X_j + z (X_k - X_j),      g(z) ∝ 1/√z  on  [1/a, a]
```

and the move is accepted with probability

```text
min(1, z^(D-1) · exp(log p(X') - log p(X_k)))
```

The `z^(D-1)` factor is the Jacobian of the stretch; leaving it out breaks
detailed balance.

Each walker draws from its own random stream, in a fixed order: the complementary
walker, the stretch factor, then the acceptance uniform. The acceptance uniform is
drawn even when the outcome is already decided, so every walker consumes the same
number of draws per half-step.
*/

use ndarray::{Array1, ArrayView1};
use rand::rngs::SmallRng;
use rand::Rng;

use crate::ensemble::{Half, WalkerEnsemble};
use crate::errors::{Error, Result};
use crate::objective::{Evaluation, LogPosterior, ObjectiveEvaluator};
use crate::parallel::Executor;

/// Stretch move with scale parameter `a`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self {
            a: crate::config::DEFAULT_STRETCH_SCALE,
        }
    }
}

impl StretchMove {
    /// Creates a stretch move; `a` must be finite and greater than 1.
    pub fn new(a: f64) -> Result<Self> {
        if !(a.is_finite() && a > 1.0) {
            return Err(Error::Configuration(format!(
                "stretch scale must be a finite number > 1, got {a}"
            )));
        }
        Ok(Self { a })
    }

    pub fn scale(&self) -> f64 {
        self.a
    }

    /// Draws a stretch factor from `g(z) ∝ 1/√z` on `[1/a, a]`.
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.gen();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// `X_j + z (X_k - X_j)`.
    pub fn propose(&self, current: ArrayView1<f64>, other: ArrayView1<f64>, z: f64) -> Array1<f64> {
        &other + &((&current - &other) * z)
    }

    /// Log of the Metropolis–Hastings ratio `z^(D-1) · p(X') / p(X_k)`.
    pub fn log_acceptance(&self, z: f64, n_dim: usize, log_prob_old: f64, log_prob_new: f64) -> f64 {
        (n_dim as f64 - 1.0) * z.ln() + (log_prob_new - log_prob_old)
    }

    /// Accept/reject rule for a uniform draw `u` in `[0, 1)`.
    ///
    /// A proposal without finite log-probability is never accepted. A walker stuck
    /// at `-inf` accepts any finite proposal. Otherwise accept iff `u <= min(1, ratio)`.
    pub fn accepts(&self, z: f64, n_dim: usize, log_prob_old: f64, log_prob_new: f64, u: f64) -> bool {
        if !log_prob_new.is_finite() {
            return false;
        }
        if log_prob_old == f64::NEG_INFINITY {
            return true;
        }
        u.ln() <= self.log_acceptance(z, n_dim, log_prob_old, log_prob_new)
    }
}

/// A candidate position for one walker.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub walker_id: usize,
    /// The complementary walker the move stretched towards.
    pub complement_id: usize,
    pub position: Array1<f64>,
    pub z: f64,
}

/// Everything that happened to one walker during a half-step.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveOutcome {
    pub proposal: Proposal,
    pub evaluation: Evaluation,
    pub log_prob_current: f64,
    /// The acceptance uniform.
    pub u: f64,
    pub accepted: bool,
}

/// Proposes, scores and decides a move for every walker of `half`.
///
/// Reads only the frozen ensemble and writes nothing; the caller applies the
/// outcomes. `rngs` are the random streams of the walkers in `half`, in order.
/// On a fatal evaluation error the error of the lowest walker id is returned.
pub(crate) fn advance_half<T: LogPosterior>(
    stretch: &StretchMove,
    evaluator: &ObjectiveEvaluator<T>,
    ensemble: &WalkerEnsemble,
    half: Half,
    rngs: &mut [SmallRng],
    executor: &Executor,
) -> Result<Vec<MoveOutcome>> {
    let active = ensemble.range(half);
    let complement = ensemble.range(half.complement());
    debug_assert_eq!(rngs.len(), active.len());

    let n_dim = ensemble.n_dim();

    executor
        .map_walkers(rngs, |offset, rng| -> Result<MoveOutcome> {
            let walker_id = active.start + offset;
            let complement_id = rng.gen_range(complement.clone());
            let z = stretch.sample_z(rng);

            let position = stretch.propose(
                ensemble.position(walker_id),
                ensemble.position(complement_id),
                z,
            );
            let evaluation = match position.as_slice() {
                Some(theta) => evaluator.evaluate(walker_id, theta),
                None => evaluator.evaluate(walker_id, &position.to_vec()),
            };

            let u: f64 = rng.gen();
            let evaluation = evaluation?;
            let log_prob_current = ensemble.log_prob(walker_id);
            let accepted = stretch.accepts(z, n_dim, log_prob_current, evaluation.log_prob, u);

            Ok(MoveOutcome {
                proposal: Proposal {
                    walker_id,
                    complement_id,
                    position,
                    z,
                },
                evaluation,
                log_prob_current,
                u,
                accepted,
            })
        })
        .into_iter()
        .collect()
}

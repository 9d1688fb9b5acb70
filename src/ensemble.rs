/*!
# Walker ensemble

The ensemble holds the current position and log-probability of every walker.
Positions form an `n_walkers × n_dim` matrix; row `i` belongs to walker `i`.

The walkers are split once into two halves: [`Half::First`] owns walkers
`0..n/2`, [`Half::Second`] the rest. The split never changes during a run; only
the roles (which half moves, which half provides the complementary walkers)
alternate between the two half-steps of an iteration.

Initial positions usually come from a small Gaussian ball around a best guess,
see [`gaussian_ball`].
*/

use std::ops::Range;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::errors::{Error, Result};

/// One of the two fixed halves of the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    First,
    Second,
}

impl Half {
    pub fn complement(self) -> Half {
        match self {
            Half::First => Half::Second,
            Half::Second => Half::First,
        }
    }
}

/// A read-only view of a single walker.
#[derive(Debug, Clone)]
pub struct Walker<'a> {
    pub id: usize,
    pub position: ArrayView1<'a, f64>,
    pub log_prob: f64,
}

/// The state of all walkers at one iteration, as handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSnapshot {
    /// Zero-based index of the iteration that produced this state.
    pub iteration: usize,
    /// Walker positions, shape `(n_walkers, n_dim)`.
    pub positions: Array2<f64>,
    /// Log-probabilities at `positions`, shape `(n_walkers,)`.
    pub log_probs: Array1<f64>,
}

impl EnsembleSnapshot {
    pub fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_dim(&self) -> usize {
        self.positions.ncols()
    }
}

/// Positions and log-probabilities of an even number of interacting walkers.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkerEnsemble {
    positions: Array2<f64>,
    log_probs: Array1<f64>,
    version: u64,
}

impl WalkerEnsemble {
    /// Builds an ensemble from positions `(n_walkers, n_dim)` and their log-probabilities.
    pub fn new(positions: Array2<f64>, log_probs: Array1<f64>) -> Result<Self> {
        let (n_walkers, n_dim) = positions.dim();
        if n_walkers < 2 || n_walkers % 2 != 0 {
            return Err(Error::Configuration(format!(
                "an ensemble needs an even number of walkers >= 2, got {n_walkers}"
            )));
        }
        if n_dim == 0 {
            return Err(Error::Configuration(
                "walker positions have zero dimensions".into(),
            ));
        }
        if log_probs.len() != n_walkers {
            return Err(Error::Configuration(format!(
                "{} log-probabilities for {} walkers",
                log_probs.len(),
                n_walkers
            )));
        }

        Ok(Self {
            // Rows must be contiguous so they can be handed out as slices.
            positions: positions.as_standard_layout().into_owned(),
            log_probs,
            version: 0,
        })
    }

    pub fn n_walkers(&self) -> usize {
        self.positions.nrows()
    }

    pub fn n_dim(&self) -> usize {
        self.positions.ncols()
    }

    /// Number of walkers per half.
    pub fn half_size(&self) -> usize {
        self.n_walkers() / 2
    }

    /// Walker ids belonging to `half`.
    pub fn range(&self, half: Half) -> Range<usize> {
        let h = self.half_size();
        match half {
            Half::First => 0..h,
            Half::Second => h..2 * h,
        }
    }

    /// Number of applied half-steps since construction.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn positions(&self) -> ArrayView2<'_, f64> {
        self.positions.view()
    }

    pub fn log_probs(&self) -> ArrayView1<'_, f64> {
        self.log_probs.view()
    }

    pub fn position(&self, id: usize) -> ArrayView1<'_, f64> {
        self.positions.row(id)
    }

    pub fn log_prob(&self, id: usize) -> f64 {
        self.log_probs[id]
    }

    pub fn walker(&self, id: usize) -> Option<Walker<'_>> {
        (id < self.n_walkers()).then(|| Walker {
            id,
            position: self.positions.row(id),
            log_prob: self.log_probs[id],
        })
    }

    pub fn walkers(&self) -> impl Iterator<Item = Walker<'_>> + '_ {
        (0..self.n_walkers()).map(move |id| Walker {
            id,
            position: self.positions.row(id),
            log_prob: self.log_probs[id],
        })
    }

    /// `true` when no walker has a finite log-probability.
    pub fn is_degenerate(&self) -> bool {
        self.log_probs.iter().all(|lp| *lp == f64::NEG_INFINITY)
    }

    pub fn snapshot(&self, iteration: usize) -> EnsembleSnapshot {
        EnsembleSnapshot {
            iteration,
            positions: self.positions.clone(),
            log_probs: self.log_probs.clone(),
        }
    }

    /// Moves walker `id` to an accepted proposal.
    pub(crate) fn accept(&mut self, id: usize, position: ArrayView1<f64>, log_prob: f64) {
        self.positions.row_mut(id).assign(&position);
        self.log_probs[id] = log_prob;
    }

    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// Scatters `n_walkers` starting positions around `center`.
///
/// Each coordinate gets independent `N(0, spread²)` noise, the usual way to start an
/// ensemble near a maximum-likelihood guess.
///
/// # Examples
///
/// ```rust
/// use rand::{rngs::SmallRng, SeedableRng};
/// use stretch_mcmc::ensemble::gaussian_ball;
///
/// let mut rng = SmallRng::seed_from_u64(42);
/// let p0 = gaussian_ball(&[1.0, -2.0], 1e-4, 32, &mut rng).unwrap();
/// assert_eq!(p0.dim(), (32, 2));
/// ```
pub fn gaussian_ball<R: Rng + ?Sized>(
    center: &[f64],
    spread: f64,
    n_walkers: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    if !spread.is_finite() || spread < 0.0 {
        return Err(Error::Configuration(format!(
            "invalid spread {spread} for the initial ball: must be finite and >= 0"
        )));
    }
    let normal = Normal::new(0.0, spread).map_err(|e| {
        Error::Configuration(format!("invalid spread {spread} for the initial ball: {e}"))
    })?;
    let n_dim = center.len();
    Ok(Array2::from_shape_fn((n_walkers, n_dim), |(_, j)| {
        center[j] + normal.sample(rng)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rand::{rngs::SmallRng, SeedableRng};

    fn small_ensemble() -> WalkerEnsemble {
        WalkerEnsemble::new(
            arr2(&[[0.0, 1.0], [2.0, 3.0], [4.0, 5.0], [6.0, 7.0]]),
            arr1(&[-1.0, -2.0, f64::NEG_INFINITY, -4.0]),
        )
        .unwrap()
    }

    #[test]
    fn test_halves_partition_the_walkers() {
        let ens = small_ensemble();
        assert_eq!(ens.range(Half::First), 0..2);
        assert_eq!(ens.range(Half::Second), 2..4);
        assert_eq!(Half::First.complement(), Half::Second);
        assert_eq!(Half::Second.complement(), Half::First);
    }

    #[test]
    fn test_rejects_odd_walker_counts_and_mismatched_log_probs() {
        assert!(WalkerEnsemble::new(Array2::zeros((3, 2)), Array1::zeros(3)).is_err());
        assert!(WalkerEnsemble::new(Array2::zeros((4, 2)), Array1::zeros(3)).is_err());
        assert!(WalkerEnsemble::new(Array2::zeros((4, 0)), Array1::zeros(4)).is_err());
    }

    #[test]
    fn test_walker_views() {
        let ens = small_ensemble();
        let w = ens.walker(1).unwrap();
        assert_eq!(w.id, 1);
        assert_eq!(w.position, arr1(&[2.0, 3.0]));
        assert_eq!(w.log_prob, -2.0);
        assert!(ens.walker(4).is_none());
        assert_eq!(ens.walkers().count(), 4);
    }

    #[test]
    fn test_accept_replaces_a_single_slot() {
        let mut ens = small_ensemble();
        ens.accept(2, arr1(&[9.0, 9.0]).view(), -0.5);
        ens.bump_version();

        assert_eq!(ens.position(2), arr1(&[9.0, 9.0]));
        assert_eq!(ens.log_prob(2), -0.5);
        assert_eq!(ens.position(3), arr1(&[6.0, 7.0]));
        assert_eq!(ens.version(), 1);
    }

    #[test]
    fn test_degenerate_only_when_every_walker_is_negative_infinity() {
        let ens = small_ensemble();
        assert!(!ens.is_degenerate());

        let dead =
            WalkerEnsemble::new(Array2::zeros((2, 1)), Array1::from_elem(2, f64::NEG_INFINITY))
                .unwrap();
        assert!(dead.is_degenerate());
    }

    #[test]
    fn test_snapshot_copies_state() {
        let ens = small_ensemble();
        let snap = ens.snapshot(5);
        assert_eq!(snap.iteration, 5);
        assert_eq!(snap.n_walkers(), 4);
        assert_eq!(snap.n_dim(), 2);
        assert_eq!(snap.positions, ens.positions());
    }

    #[test]
    fn test_transposed_input_is_stored_row_major() {
        let positions = arr2(&[[0.0, 2.0], [1.0, 3.0]]).reversed_axes();
        let ens = WalkerEnsemble::new(positions, Array1::zeros(2)).unwrap();
        assert_eq!(ens.position(0).as_slice(), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn test_ball_is_centered() {
        let mut rng = SmallRng::seed_from_u64(7);
        let ball = gaussian_ball(&[10.0, -3.0], 0.01, 200, &mut rng).unwrap();
        let mean = ball.mean_axis(ndarray::Axis(0)).unwrap();
        approx::assert_abs_diff_eq!(mean[0], 10.0, epsilon = 0.01);
        approx::assert_abs_diff_eq!(mean[1], -3.0, epsilon = 0.01);

    }

    #[test]
    fn test_ball_rejects_invalid_spread() {
        let mut rng = SmallRng::seed_from_u64(7);
        for spread in [-1.0, -1e-12, f64::NAN, f64::INFINITY] {
            assert!(
                matches!(
                    gaussian_ball(&[0.0], spread, 4, &mut rng),
                    Err(Error::Configuration(_))
                ),
                "{spread}"
            );
        }
        let point = gaussian_ball(&[3.0, 4.0], 0.0, 4, &mut rng).unwrap();
        assert!(point.rows().into_iter().all(|r| r == arr1(&[3.0, 4.0])));
    }
}

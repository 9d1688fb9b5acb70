/*!
# Chain history

[`ChainHistory`] accumulates ensemble snapshots into an append-only record:

- positions, shape `(stored_iteration, walker, parameter)`,
- log-probabilities, shape `(stored_iteration, walker)`.

Thinning happens when recording: with stride `k` only iterations `k-1, 2k-1, ...`
are kept, so `n` iterations leave exactly `floor(n / k)` stored iterations.
Burn-in and any further thinning are applied when reading, so the stored history is
never modified by a query.

# Examples

```rust
use ndarray::{arr1, arr2};
use stretch_mcmc::chain::ChainHistory;
use stretch_mcmc::ensemble::EnsembleSnapshot;

let mut chain = ChainHistory::new(2, 1, 2);
for i in 0..6 {
    let snapshot = EnsembleSnapshot {
        iteration: i,
        positions: arr2(&[[i as f64], [-(i as f64)]]),
        log_probs: arr1(&[0.0, 0.0]),
    };
    chain.record(&snapshot).unwrap();
}
assert_eq!(chain.len(), 3);
// drop the first stored iteration, keep the rest
assert_eq!(chain.flat_samples(1, 1).nrows(), 4);
```
*/

use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3, Axis, ErrorKind, ShapeError};
use ndarray_stats::QuantileExt;

use crate::ensemble::EnsembleSnapshot;
use crate::errors::{Error, Result};

/// Append-only record of walker positions and log-probabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainHistory {
    positions: Array3<f64>,
    log_probs: Array2<f64>,
    /// Source iteration of every stored slice.
    iterations: Vec<usize>,
    thin: usize,
    n_offered: usize,
}

impl ChainHistory {
    /// An empty history for `n_walkers` walkers in `n_dim` dimensions.
    ///
    /// A `thin` of 0 is treated as 1.
    pub fn new(n_walkers: usize, n_dim: usize, thin: usize) -> Self {
        Self {
            positions: Array3::zeros((0, n_walkers, n_dim)),
            log_probs: Array2::zeros((0, n_walkers)),
            iterations: Vec::new(),
            thin: thin.max(1),
            n_offered: 0,
        }
    }

    /// Offers the snapshot of a finished iteration.
    ///
    /// Returns `true` if it was stored, `false` if thinning skipped it.
    pub fn record(&mut self, snapshot: &EnsembleSnapshot) -> Result<bool> {
        let (_, n_walkers, n_dim) = self.positions.dim();
        if snapshot.positions.dim() != (n_walkers, n_dim) || snapshot.log_probs.len() != n_walkers
        {
            log::error!(
                "snapshot of shape {:?} cannot be stored in a history of {} walkers x {} parameters",
                snapshot.positions.dim(),
                n_walkers,
                n_dim
            );
            return Err(Error::Shape(ShapeError::from_kind(ErrorKind::IncompatibleShape)));
        }

        self.n_offered += 1;
        if (snapshot.iteration + 1) % self.thin != 0 {
            return Ok(false);
        }

        self.positions.push(Axis(0), snapshot.positions.view())?;
        self.log_probs.push(Axis(0), snapshot.log_probs.view())?;
        self.iterations.push(snapshot.iteration);
        Ok(true)
    }

    /// Number of stored iterations.
    pub fn len(&self) -> usize {
        self.iterations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.iterations.is_empty()
    }

    /// Number of snapshots offered, stored or not.
    pub fn n_offered(&self) -> usize {
        self.n_offered
    }

    pub fn thin(&self) -> usize {
        self.thin
    }

    pub fn n_walkers(&self) -> usize {
        self.positions.len_of(Axis(1))
    }

    pub fn n_dim(&self) -> usize {
        self.positions.len_of(Axis(2))
    }

    /// Source iteration index of each stored slice.
    pub fn iterations(&self) -> &[usize] {
        &self.iterations
    }

    /// All stored positions, `(stored_iteration, walker, parameter)`.
    pub fn positions(&self) -> ArrayView3<'_, f64> {
        self.positions.view()
    }

    /// All stored log-probabilities, `(stored_iteration, walker)`.
    pub fn log_probs(&self) -> ArrayView2<'_, f64> {
        self.log_probs.view()
    }

    /// Value of parameter `param` of walker `walker` in stored iteration `stored`.
    pub fn get(&self, walker: usize, param: usize, stored: usize) -> Option<f64> {
        self.positions.get((stored, walker, param)).copied()
    }

    /// Stored positions after dropping `discard` stored iterations and keeping every
    /// `thin`-th of the rest, `(iteration, walker, parameter)`.
    pub fn chain(&self, discard: usize, thin: usize) -> Array3<f64> {
        let start = discard.min(self.len());
        let step = thin.max(1) as isize;
        self.positions.slice(s![start..;step, .., ..]).to_owned()
    }

    /// Log-probabilities matching [`chain`](Self::chain), `(iteration, walker)`.
    pub fn log_prob_chain(&self, discard: usize, thin: usize) -> Array2<f64> {
        let start = discard.min(self.len());
        let step = thin.max(1) as isize;
        self.log_probs.slice(s![start..;step, ..]).to_owned()
    }

    /// Pools all retained positions into one sample matrix, one row per
    /// (iteration, walker) pair. Walker identity is not kept.
    pub fn flat_samples(&self, discard: usize, thin: usize) -> Array2<f64> {
        let kept = self.chain(discard, thin);
        let (n_iter, n_walkers, n_dim) = kept.dim();

        let mut flat = Array2::zeros((n_iter * n_walkers, n_dim));
        for (i, slice) in kept.outer_iter().enumerate() {
            for (j, walker) in slice.outer_iter().enumerate() {
                flat.row_mut(i * n_walkers + j).assign(&walker);
            }
        }
        flat
    }

    /// Log-probabilities in the row order of [`flat_samples`](Self::flat_samples).
    pub fn flat_log_probs(&self, discard: usize, thin: usize) -> Array1<f64> {
        self.log_prob_chain(discard, thin).iter().copied().collect()
    }

    /// The stored position with the highest log-probability and that log-probability.
    pub fn max_log_prob_sample(&self) -> Option<(Array1<f64>, f64)> {
        let (it, walker) = self.log_probs.argmax_skipnan().ok()?;
        Some((
            self.positions.slice(s![it, walker, ..]).to_owned(),
            self.log_probs[(it, walker)],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn snapshot(iteration: usize, base: f64) -> EnsembleSnapshot {
        EnsembleSnapshot {
            iteration,
            positions: arr2(&[[base, base + 0.5], [-base, -base - 0.5]]),
            log_probs: arr1(&[-base, -2.0 * base]),
        }
    }

    #[test]
    fn test_records_every_iteration_without_thinning() {
        let mut chain = ChainHistory::new(2, 2, 1);
        assert!(chain.is_empty());
        for i in 0..5 {
            assert!(chain.record(&snapshot(i, i as f64)).unwrap());
        }
        assert_eq!(chain.len(), 5);
        assert_eq!(chain.n_offered(), 5);
        assert_eq!(chain.positions().dim(), (5, 2, 2));
        assert_eq!(chain.log_probs().dim(), (5, 2));
        assert_eq!(chain.get(1, 1, 3), Some(-3.5));
        assert_eq!(chain.get(0, 0, 5), None);
    }

    #[test]
    fn test_thinning_keeps_floor_n_over_k() {
        for (n, k) in [(10, 3), (1000, 7), (5, 5), (4, 5), (12, 1)] {
            let mut chain = ChainHistory::new(2, 2, k);
            for i in 0..n {
                let stored = chain.record(&snapshot(i, 0.0)).unwrap();
                assert_eq!(stored, (i + 1) % k == 0);
            }
            assert_eq!(chain.len(), n / k, "n = {n}, k = {k}");
            assert_eq!(chain.n_offered(), n);
        }
    }

    #[test]
    fn test_stored_iterations_are_tracked() {
        let mut chain = ChainHistory::new(2, 2, 3);
        for i in 0..10 {
            chain.record(&snapshot(i, i as f64)).unwrap();
        }
        assert_eq!(chain.iterations(), &[2, 5, 8]);
        assert_eq!(chain.get(0, 0, 1), Some(5.0));
    }

    #[test]
    fn test_rejects_snapshots_of_the_wrong_shape() {
        let mut chain = ChainHistory::new(4, 2, 1);
        assert!(matches!(
            chain.record(&snapshot(0, 1.0)),
            Err(Error::Shape(_))
        ));
        assert_eq!(chain.n_offered(), 0);
    }

    #[test]
    fn test_flat_samples_trim_and_thin() {
        let mut chain = ChainHistory::new(2, 2, 1);
        for i in 0..6 {
            chain.record(&snapshot(i, i as f64)).unwrap();
        }

        let flat = chain.flat_samples(2, 1);
        assert_eq!(flat.dim(), (8, 2));
        assert_eq!(flat.row(0), arr1(&[2.0, 2.5]));
        assert_eq!(flat.row(1), arr1(&[-2.0, -2.5]));
        assert_eq!(flat.row(7), arr1(&[-5.0, -5.5]));

        let thinned = chain.flat_samples(1, 2);
        // stored iterations 1, 3, 5
        assert_eq!(thinned.nrows(), 6);
        assert_eq!(thinned.row(2), arr1(&[3.0, 3.5]));

        let lps = chain.flat_log_probs(2, 1);
        assert_eq!(lps.len(), 8);
        assert_eq!(lps[0], -2.0);
        assert_eq!(lps[1], -4.0);
    }

    #[test]
    fn test_discarding_everything_leaves_an_empty_pool() {
        let mut chain = ChainHistory::new(2, 2, 1);
        for i in 0..3 {
            chain.record(&snapshot(i, 1.0)).unwrap();
        }
        assert_eq!(chain.flat_samples(3, 1).dim(), (0, 2));
        assert_eq!(chain.flat_samples(100, 1).dim(), (0, 2));
        assert_eq!(chain.flat_log_probs(100, 1).len(), 0);
    }

    #[test]
    fn test_flattening_is_idempotent() {
        let mut chain = ChainHistory::new(2, 2, 1);
        for i in 0..4 {
            chain.record(&snapshot(i, i as f64 * 0.1)).unwrap();
        }
        assert_eq!(chain.flat_samples(1, 1), chain.flat_samples(1, 1));
        assert_eq!(chain.chain(1, 2), chain.chain(1, 2));
    }

    #[test]
    fn test_finds_the_map_sample() {
        let mut chain = ChainHistory::new(2, 2, 1);
        assert!(chain.max_log_prob_sample().is_none());
        for (i, base) in [3.0, 0.5, 2.0].into_iter().enumerate() {
            chain.record(&snapshot(i, base)).unwrap();
        }
        let (pos, lp) = chain.max_log_prob_sample().unwrap();
        assert_eq!(lp, -0.5);
        assert_eq!(pos, arr1(&[0.5, 1.0]));
    }
}

//! Serial or thread-pool execution of per-walker work.

use rand::rngs::SmallRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::errors::{Error, Result};

/// Runs one closure per walker of a half-ensemble.
///
/// Each invocation gets the walker's offset inside the half and exclusive access to
/// that walker's random stream. Results come back in walker order regardless of how
/// the work was scheduled.
#[derive(Debug)]
pub(crate) enum Executor {
    Serial,
    Pool(ThreadPool),
}

impl Executor {
    /// `workers == 1` runs inline; any other value builds a dedicated pool
    /// (0 lets rayon pick one thread per core).
    pub(crate) fn new(workers: usize) -> Result<Self> {
        if workers == 1 {
            return Ok(Executor::Serial);
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("stretch-mcmc-{i}"))
            .build()
            .map_err(|e| Error::Configuration(format!("cannot start worker pool: {e}")))?;
        Ok(Executor::Pool(pool))
    }

    pub(crate) fn workers(&self) -> usize {
        match self {
            Executor::Serial => 1,
            Executor::Pool(pool) => pool.current_num_threads(),
        }
    }

    pub(crate) fn map_walkers<F, R>(&self, rngs: &mut [SmallRng], f: F) -> Vec<R>
    where
        F: Fn(usize, &mut SmallRng) -> R + Sync + Send,
        R: Send,
    {
        match self {
            Executor::Serial => rngs
                .iter_mut()
                .enumerate()
                .map(|(k, rng)| f(k, rng))
                .collect(),
            Executor::Pool(pool) => pool.install(|| {
                rngs.par_iter_mut()
                    .enumerate()
                    .map(|(k, rng)| f(k, rng))
                    .collect()
            }),
        }
    }

    /// Same as [`map_walkers`](Self::map_walkers) for work that needs no randomness.
    pub(crate) fn map_indices<F, R>(&self, n: usize, f: F) -> Vec<R>
    where
        F: Fn(usize) -> R + Sync + Send,
        R: Send,
    {
        match self {
            Executor::Serial => (0..n).map(f).collect(),
            Executor::Pool(pool) => pool.install(|| (0..n).into_par_iter().map(f).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn streams(n: usize) -> Vec<SmallRng> {
        (0..n as u64).map(SmallRng::seed_from_u64).collect()
    }

    #[test]
    fn test_pool_and_serial_agree() {
        let serial = Executor::new(1).unwrap();
        let pool = Executor::new(4).unwrap();
        assert_eq!(serial.workers(), 1);
        assert_eq!(pool.workers(), 4);

        let draw = |k: usize, rng: &mut SmallRng| (k, rng.gen::<u64>());
        let a = serial.map_walkers(&mut streams(16), draw);
        let b = pool.map_walkers(&mut streams(16), draw);
        assert_eq!(a, b);
        assert!(a.iter().enumerate().all(|(i, (k, _))| i == *k));
    }

    #[test]
    fn test_indices_keep_order() {
        let pool = Executor::new(3).unwrap();
        let squares = pool.map_indices(10, |i| i * i);
        assert_eq!(squares, (0..10).map(|i| i * i).collect::<Vec<_>>());
    }
}

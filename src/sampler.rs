/*!
# Ensemble sampler

[`EnsembleSampler`] drives the stretch move over an ensemble of walkers. Each
iteration moves the first half of the walkers against the second, then the second
against the (already updated) first, records the resulting state in the
[`ChainHistory`] and hands out a snapshot.

Sampling is lazy: [`EnsembleSampler::run`] returns an iterator and no iteration is
performed until the iterator is advanced. The sampler moves through

```text
Uninitialized -> Ready -> Running -> Paused | Completed | Failed
                             ^          |
                             +----------+  resume()
```

A pause is requested through a [`StopHandle`] (or by dropping the iterator) and
takes effect at the next iteration boundary. A failed run keeps the history it
produced up to the failure.

# Examples

```rust
use ndarray::Array2;
use stretch_mcmc::config::RunConfiguration;
use stretch_mcmc::objective::PlainDensity;
use stretch_mcmc::sampler::{EnsembleSampler, Status};

let config = RunConfiguration::new(8, 2).set_seed(42).set_n_iterations(50);
let target = PlainDensity(|x: &[f64]| -0.5 * x.iter().map(|v| v * v).sum::<f64>());
let mut sampler = EnsembleSampler::new(target, config).unwrap();

let p0 = Array2::from_shape_fn((8, 2), |(i, j)| 0.1 * ((3 * i + 5 * j) as f64).sin());
for snapshot in sampler.run(p0).unwrap() {
    let snapshot = snapshot.unwrap();
    assert_eq!(snapshot.positions.dim(), (8, 2));
}
assert_eq!(sampler.status(), Status::Completed);
assert_eq!(sampler.flattened_samples(10, 1).dim(), (40 * 8, 2));
```
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::chain::ChainHistory;
use crate::config::RunConfiguration;
use crate::ensemble::{EnsembleSnapshot, Half, WalkerEnsemble};
use crate::errors::{Error, Result};
use crate::objective::{Evaluation, LogPosterior, ObjectiveEvaluator, Outcome};
use crate::parallel::Executor;
use crate::stats::{integrated_time, DEFAULT_TOLERANCE, DEFAULT_WINDOW};
use crate::stretch::{advance_half, MoveOutcome, StretchMove};

/// Lifecycle state of an [`EnsembleSampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Uninitialized,
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Requests a pause of a running sampler from anywhere, including other threads.
///
/// The request is honored at the next iteration boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One proposal and the decision taken on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRecord {
    pub iteration: usize,
    pub walker_id: usize,
    pub complement_id: usize,
    pub z: f64,
    pub log_prob_current: f64,
    pub log_prob_proposed: f64,
    /// Uniform draw compared against the acceptance ratio.
    pub u: f64,
    pub accepted: bool,
    pub outcome: Outcome,
}

impl ProposalRecord {
    fn new(iteration: usize, out: &MoveOutcome) -> Self {
        Self {
            iteration,
            walker_id: out.proposal.walker_id,
            complement_id: out.proposal.complement_id,
            z: out.proposal.z,
            log_prob_current: out.log_prob_current,
            log_prob_proposed: out.evaluation.log_prob,
            u: out.u,
            accepted: out.accepted,
            outcome: out.evaluation.outcome,
        }
    }
}

/// Affine-invariant ensemble sampler.
#[derive(Debug)]
pub struct EnsembleSampler<T> {
    config: RunConfiguration,
    evaluator: ObjectiveEvaluator<T>,
    stretch: StretchMove,
    executor: Executor,
    seed: u64,
    rngs: Vec<SmallRng>,
    ensemble: Option<WalkerEnsemble>,
    last: Option<EnsembleSnapshot>,
    chain: ChainHistory,
    status: Status,
    iterations_done: usize,
    n_proposed: Vec<usize>,
    n_accepted: Vec<usize>,
    n_timeouts: Vec<usize>,
    n_domain_errors: Vec<usize>,
    proposals: Vec<ProposalRecord>,
    stop: StopHandle,
}

impl<T: LogPosterior> EnsembleSampler<T> {
    /// Validates `config` and builds a sampler for `objective`.
    pub fn new(objective: T, config: RunConfiguration) -> Result<Self> {
        config.validate()?;
        let stretch = StretchMove::new(config.stretch_scale)?;
        let executor = Executor::new(config.parallelism)?;
        let seed = config.seed.unwrap_or_else(|| rand::thread_rng().gen());
        let (n_walkers, n_dim) = (config.n_walkers, config.n_dim);

        Ok(Self {
            evaluator: ObjectiveEvaluator::new(objective, n_dim, config.evaluation_timeout),
            stretch,
            executor,
            seed,
            rngs: walker_streams(seed, n_walkers),
            ensemble: None,
            last: None,
            chain: ChainHistory::new(n_walkers, n_dim, config.thin),
            status: Status::Uninitialized,
            iterations_done: 0,
            n_proposed: vec![0; n_walkers],
            n_accepted: vec![0; n_walkers],
            n_timeouts: vec![0; n_walkers],
            n_domain_errors: vec![0; n_walkers],
            proposals: Vec::new(),
            stop: StopHandle::default(),
            config,
        })
    }

    /// Scores `positions` (`n_walkers × n_dim`) and makes them the starting ensemble.
    ///
    /// Clears any previous history. If no walker has a finite log-probability the
    /// sampler fails with [`Error::DegenerateEnsemble`].
    pub fn initialize(&mut self, positions: Array2<f64>) -> Result<()> {
        self.check_initial_positions(&positions)?;
        let positions = positions.as_standard_layout().into_owned();
        self.clear();

        let evaluator = &self.evaluator;
        let rows = &positions;
        let results = self.executor.map_indices(rows.nrows(), |i| {
            let row = rows.row(i);
            match row.as_slice() {
                Some(theta) => evaluator.evaluate(i, theta),
                None => evaluator.evaluate(i, &row.to_vec()),
            }
        });
        let evaluations = match results.into_iter().collect::<Result<Vec<Evaluation>>>() {
            Ok(evaluations) => evaluations,
            Err(e) => return Err(self.fail(e)),
        };

        for (id, evaluation) in evaluations.iter().enumerate() {
            self.count_outcome(id, evaluation.outcome);
        }
        if let Err(e) = self.check_timeout_limit() {
            return Err(self.fail(e));
        }

        let log_probs: Array1<f64> = evaluations.iter().map(|e| e.log_prob).collect();
        self.start_from(WalkerEnsemble::new(positions, log_probs)?)
    }

    /// Starts from a previously produced snapshot without re-scoring it.
    pub fn initialize_from_snapshot(&mut self, snapshot: &EnsembleSnapshot) -> Result<()> {
        self.check_initial_positions(&snapshot.positions)?;
        if let Some(lp) = snapshot
            .log_probs
            .iter()
            .find(|lp| lp.is_nan() || **lp == f64::INFINITY)
        {
            return Err(Error::Configuration(format!(
                "snapshot carries an invalid log-probability ({lp})"
            )));
        }
        let ensemble = WalkerEnsemble::new(snapshot.positions.clone(), snapshot.log_probs.clone())?;
        self.clear();
        self.start_from(ensemble)
    }

    /// Starts (or continues, after a pause) sampling.
    ///
    /// Returns a lazy iterator; each item is the state after one iteration. The run
    /// ends after `n_iterations` iterations in total, counted across pauses.
    pub fn sample(&mut self) -> Result<Samples<'_, T>> {
        match self.status {
            Status::Ready => log::info!(
                "sampling {} iterations with {} walkers in {} dimensions ({} worker(s), seed {})",
                self.config.n_iterations,
                self.config.n_walkers,
                self.config.n_dim,
                self.executor.workers(),
                self.seed
            ),
            Status::Paused => log::debug!("resuming at iteration {}", self.iterations_done),
            status => {
                return Err(Error::InvalidState {
                    status,
                    expected: "Ready or Paused",
                })
            }
        }
        self.stop.clear();
        self.status = Status::Running;
        Ok(Samples { sampler: self })
    }

    /// [`initialize`](Self::initialize) followed by [`sample`](Self::sample).
    pub fn run(&mut self, positions: Array2<f64>) -> Result<Samples<'_, T>> {
        self.initialize(positions)?;
        self.sample()
    }

    /// Continues a paused run.
    pub fn resume(&mut self) -> Result<Samples<'_, T>> {
        if self.status != Status::Paused {
            return Err(Error::InvalidState {
                status: self.status,
                expected: "Paused",
            });
        }
        self.sample()
    }

    /// Runs to completion (or until paused) and returns the final state.
    ///
    /// With zero iterations configured the initial state is returned.
    pub fn run_mcmc(&mut self, positions: Array2<f64>) -> Result<EnsembleSnapshot> {
        for snapshot in self.run(positions)? {
            snapshot?;
        }
        self.final_snapshot()
    }

    /// Same as [`run_mcmc`](Self::run_mcmc), drawing a progress bar on the terminal.
    pub fn run_with_progress(&mut self, positions: Array2<f64>) -> Result<EnsembleSnapshot> {
        let pb = ProgressBar::new(self.config.n_iterations as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_prefix("Stretch");

        let mut samples = self.run(positions)?;
        while let Some(snapshot) = samples.next() {
            if let Err(e) = snapshot {
                pb.abandon_with_message("Failed");
                return Err(e);
            }
            pb.inc(1);
            pb.set_message(format!(
                "p(accept)≈{:.2}",
                samples.sampler().mean_acceptance_fraction()
            ));
        }
        drop(samples);

        pb.finish_with_message("Done!");
        self.final_snapshot()
    }

    /// Forgets the ensemble, history and counters. The sampler must be initialized again.
    pub fn reset(&mut self) {
        self.clear();
        self.ensemble = None;
        self.status = Status::Uninitialized;
    }

    /// Performs one full iteration: both half-steps, bookkeeping and recording.
    ///
    /// If the iteration fails, the ensemble, move counters and proposal log are put
    /// back to the last recorded state. Timeout and domain-error counts keep every
    /// evaluation that took place.
    fn iterate(&mut self) -> Result<EnsembleSnapshot> {
        let iteration = self.iterations_done;
        let checkpoint = (
            self.ensemble.clone(),
            self.n_proposed.clone(),
            self.n_accepted.clone(),
            self.proposals.len(),
        );

        if let Err(e) = self.advance(iteration) {
            let (ensemble, n_proposed, n_accepted, n_records) = checkpoint;
            self.ensemble = ensemble;
            self.n_proposed = n_proposed;
            self.n_accepted = n_accepted;
            self.proposals.truncate(n_records);
            return Err(e);
        }

        let status = self.status;
        let ensemble = self.ensemble.as_ref().ok_or(Error::InvalidState {
            status,
            expected: "an initialized ensemble",
        })?;
        let snapshot = ensemble.snapshot(iteration);
        self.chain.record(&snapshot)?;
        self.iterations_done += 1;
        self.last = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Moves the first half against the second, then the second against the first.
    fn advance(&mut self, iteration: usize) -> Result<()> {
        let status = self.status;
        let ensemble = self.ensemble.as_mut().ok_or(Error::InvalidState {
            status,
            expected: "an initialized ensemble",
        })?;

        for half in [Half::First, Half::Second] {
            let active = ensemble.range(half);
            let outcomes = advance_half(
                &self.stretch,
                &self.evaluator,
                ensemble,
                half,
                &mut self.rngs[active],
                &self.executor,
            )?;

            for out in &outcomes {
                let id = out.proposal.walker_id;
                match out.evaluation.outcome {
                    Outcome::TimedOut => self.n_timeouts[id] += 1,
                    Outcome::DomainError => self.n_domain_errors[id] += 1,
                    Outcome::Scored => {}
                }
            }
            let count: usize = self.n_timeouts.iter().sum();
            if let Some(limit) = self.config.max_timeouts {
                if count > limit {
                    return Err(Error::TimeoutLimitExceeded { count, limit });
                }
            }

            for out in &outcomes {
                let id = out.proposal.walker_id;
                self.n_proposed[id] += 1;
                if out.accepted {
                    ensemble.accept(id, out.proposal.position.view(), out.evaluation.log_prob);
                    self.n_accepted[id] += 1;
                }
                if self.config.record_proposals {
                    self.proposals.push(ProposalRecord::new(iteration, out));
                }
            }
            ensemble.bump_version();
        }

        if ensemble.is_degenerate() {
            return Err(Error::DegenerateEnsemble { iteration });
        }
        Ok(())
    }

    fn check_initial_positions(&self, positions: &Array2<f64>) -> Result<()> {
        let expected = (self.config.n_walkers, self.config.n_dim);
        if positions.dim() != expected {
            return Err(Error::Configuration(format!(
                "initial positions have shape {:?}, expected {:?}",
                positions.dim(),
                expected
            )));
        }
        if positions.iter().any(|v| !v.is_finite()) {
            return Err(Error::Configuration(
                "initial positions contain non-finite values".into(),
            ));
        }
        Ok(())
    }

    fn start_from(&mut self, ensemble: WalkerEnsemble) -> Result<()> {
        let degenerate = ensemble.is_degenerate();
        self.ensemble = Some(ensemble);
        if degenerate {
            return Err(self.fail(Error::DegenerateEnsemble { iteration: 0 }));
        }
        self.status = Status::Ready;
        log::debug!(
            "initialized {} walkers in {} dimensions",
            self.config.n_walkers,
            self.config.n_dim
        );
        Ok(())
    }

    fn clear(&mut self) {
        let (n_walkers, n_dim) = (self.config.n_walkers, self.config.n_dim);
        self.rngs = walker_streams(self.seed, n_walkers);
        self.chain = ChainHistory::new(n_walkers, n_dim, self.config.thin);
        self.last = None;
        self.iterations_done = 0;
        self.n_proposed = vec![0; n_walkers];
        self.n_accepted = vec![0; n_walkers];
        self.n_timeouts = vec![0; n_walkers];
        self.n_domain_errors = vec![0; n_walkers];
        self.proposals.clear();
        self.stop.clear();
    }

    fn count_outcome(&mut self, id: usize, outcome: Outcome) {
        match outcome {
            Outcome::TimedOut => self.n_timeouts[id] += 1,
            Outcome::DomainError => self.n_domain_errors[id] += 1,
            Outcome::Scored => {}
        }
    }

    fn check_timeout_limit(&self) -> Result<()> {
        let count: usize = self.n_timeouts.iter().sum();
        match self.config.max_timeouts {
            Some(limit) if count > limit => Err(Error::TimeoutLimitExceeded { count, limit }),
            _ => Ok(()),
        }
    }

    fn fail(&mut self, err: Error) -> Error {
        self.status = Status::Failed;
        log::error!(
            "sampling failed after {} iteration(s): {err}",
            self.iterations_done
        );
        err
    }

    fn final_snapshot(&self) -> Result<EnsembleSnapshot> {
        if let Some(last) = &self.last {
            return Ok(last.clone());
        }
        self.ensemble
            .as_ref()
            .map(|e| e.snapshot(0))
            .ok_or(Error::InvalidState {
                status: self.status,
                expected: "an initialized ensemble",
            })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Seed of walker 0's random stream; walker `i` uses `seed + i`.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of completed iterations.
    pub fn iteration(&self) -> usize {
        self.iterations_done
    }

    /// A handle that pauses this sampler at the next iteration boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// The current ensemble, if initialized.
    pub fn ensemble(&self) -> Option<&WalkerEnsemble> {
        self.ensemble.as_ref()
    }

    /// State after the most recent completed iteration.
    pub fn last_snapshot(&self) -> Option<&EnsembleSnapshot> {
        self.last.as_ref()
    }

    pub fn chain(&self) -> &ChainHistory {
        &self.chain
    }

    /// Recorded proposals; empty unless `record_proposals` is set.
    pub fn proposal_log(&self) -> &[ProposalRecord] {
        &self.proposals
    }

    /// Pooled samples after dropping `burn_in` stored iterations and keeping every
    /// `thin`-th of the rest. One row per (iteration, walker).
    pub fn flattened_samples(&self, burn_in: usize, thin: usize) -> Array2<f64> {
        self.chain.flat_samples(burn_in, thin)
    }

    /// [`flattened_samples`](Self::flattened_samples) with the configured burn-in.
    pub fn flat_samples(&self) -> Array2<f64> {
        self.chain.flat_samples(self.config.burn_in, 1)
    }

    /// Log-probabilities in the row order of [`flattened_samples`](Self::flattened_samples).
    pub fn flattened_log_probs(&self, burn_in: usize, thin: usize) -> Array1<f64> {
        self.chain.flat_log_probs(burn_in, thin)
    }

    /// Fraction of accepted proposals per walker. Zero before the first iteration.
    pub fn acceptance_fraction(&self) -> Array1<f64> {
        self.n_accepted
            .iter()
            .zip(&self.n_proposed)
            .map(|(&acc, &prop)| {
                if prop == 0 {
                    0.0
                } else {
                    acc as f64 / prop as f64
                }
            })
            .collect()
    }

    fn mean_acceptance_fraction(&self) -> f64 {
        let proposed: usize = self.n_proposed.iter().sum();
        if proposed == 0 {
            return 0.0;
        }
        self.n_accepted.iter().sum::<usize>() as f64 / proposed as f64
    }

    /// Timed-out evaluations per walker, including the initial scoring.
    pub fn timeout_counts(&self) -> &[usize] {
        &self.n_timeouts
    }

    /// Evaluations per walker that ended in a domain error.
    pub fn domain_error_counts(&self) -> &[usize] {
        &self.n_domain_errors
    }

    /// Integrated autocorrelation time per parameter, see [`integrated_time`].
    pub fn autocorr_time(&self, discard: usize, thin: usize, quiet: bool) -> Result<Array1<f64>> {
        let samples = self.chain.chain(discard, thin);
        integrated_time(samples.view(), DEFAULT_WINDOW, DEFAULT_TOLERANCE, quiet)
    }
}

fn walker_streams(seed: u64, n_walkers: usize) -> Vec<SmallRng> {
    (0..n_walkers as u64)
        .map(|i| SmallRng::seed_from_u64(seed.wrapping_add(i)))
        .collect()
}

/// Lazy iterator over the iterations of a run, returned by [`EnsembleSampler::run`].
///
/// Dropping it before the run ends pauses the sampler.
#[derive(Debug)]
pub struct Samples<'a, T: LogPosterior> {
    sampler: &'a mut EnsembleSampler<T>,
}

impl<T: LogPosterior> Samples<'_, T> {
    /// The sampler being driven, for progress queries between iterations.
    pub fn sampler(&self) -> &EnsembleSampler<T> {
        self.sampler
    }
}

impl<T: LogPosterior> Iterator for Samples<'_, T> {
    type Item = Result<EnsembleSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        let sampler = &mut *self.sampler;
        if sampler.status != Status::Running {
            return None;
        }
        if sampler.iterations_done >= sampler.config.n_iterations {
            sampler.status = Status::Completed;
            return None;
        }
        if sampler.stop.is_stop_requested() {
            sampler.stop.clear();
            sampler.status = Status::Paused;
            log::debug!("paused after {} iteration(s)", sampler.iterations_done);
            return None;
        }

        match sampler.iterate() {
            Ok(snapshot) => {
                if sampler.iterations_done == sampler.config.n_iterations {
                    sampler.status = Status::Completed;
                    log::info!(
                        "completed {} iterations, mean acceptance fraction {:.3}",
                        sampler.iterations_done,
                        sampler.mean_acceptance_fraction()
                    );
                }
                Some(Ok(snapshot))
            }
            Err(e) => Some(Err(sampler.fail(e))),
        }
    }
}

impl<T: LogPosterior> Drop for Samples<'_, T> {
    fn drop(&mut self) {
        if self.sampler.status == Status::Running {
            self.sampler.status = Status::Paused;
            log::debug!(
                "sampling interrupted after {} iteration(s)",
                self.sampler.iterations_done
            );
        }
    }
}

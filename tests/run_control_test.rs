//! Reproducibility, pausing and read-out tests of the ensemble sampler.

use ndarray::Array2;
use rand::{rngs::SmallRng, SeedableRng};
use stretch_mcmc::objective::PlainDensity;
use stretch_mcmc::{gaussian_ball, EnsembleSampler, Error, RunConfiguration, Status};

type Density = PlainDensity<fn(&[f64]) -> f64>;

fn rosenbrock(x: &[f64]) -> f64 {
    -(100.0 * (x[1] - x[0] * x[0]).powi(2) + (1.0 - x[0]).powi(2)) / 20.0
}

fn sampler(config: RunConfiguration) -> EnsembleSampler<Density> {
    EnsembleSampler::new(PlainDensity(rosenbrock as fn(&[f64]) -> f64), config).unwrap()
}

fn initial(n_walkers: usize) -> Array2<f64> {
    let mut rng = SmallRng::seed_from_u64(0);
    gaussian_ball(&[1.0, 1.0], 1e-2, n_walkers, &mut rng).unwrap()
}

#[test]
fn test_same_seed_same_history() {
    let config = RunConfiguration::new(16, 2).set_seed(42).set_n_iterations(200);
    let mut a = sampler(config.clone());
    let mut b = sampler(config);
    a.run_mcmc(initial(16)).unwrap();
    b.run_mcmc(initial(16)).unwrap();

    assert_eq!(a.chain(), b.chain());
    assert_eq!(a.acceptance_fraction(), b.acceptance_fraction());
}

#[test]
fn test_different_seeds_diverge() {
    let mut a = sampler(RunConfiguration::new(16, 2).set_seed(1).set_n_iterations(50));
    let mut b = sampler(RunConfiguration::new(16, 2).set_seed(2).set_n_iterations(50));
    a.run_mcmc(initial(16)).unwrap();
    b.run_mcmc(initial(16)).unwrap();
    assert_ne!(a.chain().positions(), b.chain().positions());
}

#[test]
fn test_worker_count_does_not_change_the_history() {
    let config = RunConfiguration::new(32, 2).set_seed(7).set_n_iterations(150);
    let mut serial = sampler(config.clone().set_parallelism(1));
    let mut pooled = sampler(config.clone().set_parallelism(4));
    let mut all_cores = sampler(config.set_parallelism(0));

    let last_serial = serial.run_mcmc(initial(32)).unwrap();
    let last_pooled = pooled.run_mcmc(initial(32)).unwrap();
    all_cores.run_mcmc(initial(32)).unwrap();

    assert_eq!(last_serial, last_pooled);
    assert_eq!(serial.chain(), pooled.chain());
    assert_eq!(serial.chain(), all_cores.chain());
}

#[test]
fn test_pause_and_resume_match_an_uninterrupted_run() {
    let config = RunConfiguration::new(16, 2).set_seed(11).set_n_iterations(100);

    let mut straight = sampler(config.clone());
    straight.run_mcmc(initial(16)).unwrap();

    let mut paused = sampler(config);
    let handle = paused.stop_handle();
    for (i, snapshot) in paused.run(initial(16)).unwrap().enumerate() {
        snapshot.unwrap();
        if i == 19 {
            handle.request_stop();
        }
    }
    assert_eq!(paused.status(), Status::Paused);
    assert_eq!(paused.iteration(), 20);

    // a second pause, this time by dropping the iterator
    let taken = paused.resume().unwrap().take(17).count();
    assert_eq!(taken, 17);
    assert_eq!(paused.status(), Status::Paused);

    for snapshot in paused.resume().unwrap() {
        snapshot.unwrap();
    }
    assert_eq!(paused.status(), Status::Completed);
    assert_eq!(paused.iteration(), 100);
    assert_eq!(paused.chain(), straight.chain());
    assert_eq!(paused.acceptance_fraction(), straight.acceptance_fraction());
}

#[test]
fn test_thinning_stores_floor_n_over_k() {
    for (n, k) in [(1000, 7), (100, 10), (99, 10), (10, 20)] {
        let mut s = sampler(
            RunConfiguration::new(8, 2)
                .set_seed(5)
                .set_n_iterations(n)
                .set_thin(k),
        );
        s.run_mcmc(initial(8)).unwrap();
        assert_eq!(s.chain().len(), n / k, "n = {n}, k = {k}");
        assert_eq!(s.flattened_samples(0, 1).nrows(), (n / k) * 8);
    }
}

#[test]
fn test_burn_in_trims_stored_iterations() {
    let mut s = sampler(
        RunConfiguration::new(8, 2)
            .set_seed(5)
            .set_n_iterations(100)
            .set_thin(2)
            .set_burn_in(10),
    );
    s.run_mcmc(initial(8)).unwrap();
    assert_eq!(s.chain().len(), 50);
    assert_eq!(s.flat_samples().nrows(), 40 * 8);
    assert_eq!(s.flattened_samples(10, 4).nrows(), 10 * 8);
    assert_eq!(s.flattened_log_probs(10, 4).len(), 10 * 8);
}

#[test]
fn test_flattening_is_idempotent() {
    let mut s = sampler(RunConfiguration::new(8, 2).set_seed(5).set_n_iterations(60));
    s.run_mcmc(initial(8)).unwrap();
    let first = s.flattened_samples(10, 3);
    let second = s.flattened_samples(10, 3);
    assert_eq!(first, second);
    assert_eq!(s.chain().len(), 60);
}

#[test]
fn test_snapshots_agree_with_the_history() {
    let mut s = sampler(RunConfiguration::new(8, 2).set_seed(9).set_n_iterations(30));
    let snapshots: Vec<_> = s
        .run(initial(8))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let positions = s.chain().positions();
    for (i, snap) in snapshots.iter().enumerate() {
        assert_eq!(snap.iteration, i);
        assert_eq!(snap.positions, positions.index_axis(ndarray::Axis(0), i));
        assert_eq!(snap.log_probs, s.chain().log_probs().row(i));
    }
    let (map, lp) = s.chain().max_log_prob_sample().unwrap();
    assert!(s.chain().log_probs().iter().all(|&v| v <= lp));
    assert_eq!(map.len(), 2);
}

#[test]
fn test_configuration_is_checked_at_construction() {
    for n_walkers in [0, 1, 3, 49] {
        let res = EnsembleSampler::new(
            PlainDensity(rosenbrock as fn(&[f64]) -> f64),
            RunConfiguration::new(n_walkers, 2),
        );
        assert!(matches!(res, Err(Error::Configuration(_))), "{n_walkers}");
    }
    assert!(EnsembleSampler::new(
        PlainDensity(rosenbrock as fn(&[f64]) -> f64),
        RunConfiguration::new(50, 2)
    )
    .is_ok());
}

#[test]
fn test_resume_needs_a_paused_run() {
    let mut s = sampler(RunConfiguration::new(8, 2).set_seed(9).set_n_iterations(5));
    assert!(matches!(
        s.resume(),
        Err(Error::InvalidState {
            status: Status::Uninitialized,
            ..
        })
    ));
    s.run_mcmc(initial(8)).unwrap();
    assert!(matches!(
        s.resume(),
        Err(Error::InvalidState {
            status: Status::Completed,
            ..
        })
    ));

    // a fresh initialization starts over
    s.initialize(initial(8)).unwrap();
    assert_eq!(s.status(), Status::Ready);
    assert!(s.chain().is_empty());
    assert_eq!(s.sample().unwrap().count(), 5);
}

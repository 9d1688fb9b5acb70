//! Fits a straight line `y = m x + b` to noisy synthetic data.
//!
//! Each parameter has its own flat prior range; outside of it the log-posterior is
//! `-inf`. Run with `cargo run --release --example linear_fit`.

use ndarray::Axis;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use stretch_mcmc::errors::EvalError;
use stretch_mcmc::{gaussian_ball, EnsembleSampler, Objective, RunConfiguration};

/// Observed points with a known noise level.
struct LineData {
    x: Vec<f64>,
    y: Vec<f64>,
    sigma: f64,
}

/// Independent flat priors per parameter.
const PRIOR_RANGES: [(f64, f64); 2] = [(-5.0, 5.0), (-10.0, 10.0)];

fn log_prior(theta: &[f64]) -> f64 {
    let inside = theta
        .iter()
        .zip(PRIOR_RANGES.iter())
        .all(|(v, (lo, hi))| lo < v && v < hi);
    if inside {
        0.0
    } else {
        f64::NEG_INFINITY
    }
}

fn log_posterior(theta: &[f64], data: &LineData) -> Result<f64, EvalError> {
    let lp = log_prior(theta);
    if !lp.is_finite() {
        return Ok(lp);
    }
    let (m, b) = (theta[0], theta[1]);
    let chi2: f64 = data
        .x
        .iter()
        .zip(&data.y)
        .map(|(x, y)| ((y - (m * x + b)) / data.sigma).powi(2))
        .sum();
    Ok(lp - 0.5 * chi2)
}

fn percentile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    const SEED: u64 = 42;
    let (m_true, b_true, sigma) = (-0.9594, 4.294, 0.5);

    let mut rng = SmallRng::seed_from_u64(SEED);
    let noise = Normal::new(0.0, sigma)?;
    let mut x: Vec<f64> = (0..50).map(|_| rng.gen_range(0.0..10.0)).collect();
    x.sort_by(|a, b| a.total_cmp(b));
    let y: Vec<f64> = x
        .iter()
        .map(|xi| m_true * xi + b_true + noise.sample(&mut rng))
        .collect();
    let data = LineData { x, y, sigma };

    let n_walkers = 32;
    let config = RunConfiguration::new(n_walkers, 2)
        .set_seed(SEED)
        .set_n_iterations(5_000)
        .set_burn_in(1_000)
        .set_thin(5)
        .set_parallelism(0);
    let mut sampler = EnsembleSampler::new(Objective::new(log_posterior, data), config)?;

    let p0 = gaussian_ball(&[-1.0, 4.0], 1e-3, n_walkers, &mut rng)?;
    sampler.run_with_progress(p0)?;

    let acc = sampler.acceptance_fraction();
    println!("Mean acceptance fraction: {:.3}", acc.mean().unwrap_or(0.0));
    match sampler.autocorr_time(0, 1, true) {
        Ok(tau) => println!("Autocorrelation time (stored iterations): {tau:.1}"),
        Err(e) => println!("Autocorrelation time unavailable: {e}"),
    }

    // burn-in is counted in stored iterations
    let samples = sampler.flattened_samples(1_000 / 5, 1);
    println!("{} samples after burn-in", samples.nrows());

    for (name, (col, truth)) in ["m", "b"]
        .iter()
        .zip(samples.axis_iter(Axis(1)).zip([m_true, b_true]))
    {
        let mut values = col.to_vec();
        values.sort_by(|a, b| a.total_cmp(b));
        let (lo, mid, hi) = (
            percentile(&values, 0.16),
            percentile(&values, 0.5),
            percentile(&values, 0.84),
        );
        println!(
            "{name} = {mid:.3} +{:.3} -{:.3} (true {truth})",
            hi - mid,
            mid - lo
        );
    }

    if let Some((best, lp)) = sampler.chain().max_log_prob_sample() {
        println!("MAP sample {best:.3} with log-probability {lp:.3}");
    }
    Ok(())
}

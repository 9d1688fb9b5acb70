//! Autocorrelation diagnostics for ensemble chains.
//!
//! The integrated autocorrelation time `τ` estimates how many iterations separate two
//! effectively independent samples of one walker. Following Goodman & Weare (2010),
//! the normalized autocorrelation function is averaged over walkers before it is
//! summed, and the sum is truncated with Sokal's automatic window: the smallest lag
//! `M` with `M >= c · τ(M)`.

use ndarray::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::errors::{Error, Result};

/// Default window constant of [`integrated_time`].
pub const DEFAULT_WINDOW: f64 = 5.0;

/// Default minimum chain length, in multiples of `τ`.
pub const DEFAULT_TOLERANCE: f64 = 50.0;

/// Normalized autocorrelation function of a 1-D series, computed by FFT.
///
/// Lag 0 is always 1. A constant series has no defined normalization; it yields
/// `[1, 0, 0, ...]`.
pub fn autocorr_function(x: ArrayView1<f64>) -> Array1<f64> {
    let n = x.len();
    if n == 0 {
        return Array1::zeros(0);
    }

    let padded = 2 * n.next_power_of_two();
    let mean = x.sum() / n as f64;

    let mut buf: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v - mean, 0.0)).collect();
    buf.resize(padded, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(padded).process(&mut buf);
    for v in buf.iter_mut() {
        *v *= v.conj();
    }
    planner.plan_fft_inverse(padded).process(&mut buf);

    let acf: Array1<f64> = buf.iter().take(n).map(|c| c.re).collect();
    let norm = acf[0];
    if norm <= 0.0 || !norm.is_finite() {
        let mut flat = Array1::zeros(n);
        flat[0] = 1.0;
        return flat;
    }
    acf / norm
}

/// Smallest lag `m` with `m >= c · taus[m]`, or the last lag if none qualifies.
pub fn auto_window(taus: ArrayView1<f64>, c: f64) -> usize {
    taus.iter()
        .enumerate()
        .position(|(m, &tau)| m as f64 >= c * tau)
        .unwrap_or_else(|| taus.len().saturating_sub(1))
}

/// Integrated autocorrelation time of every parameter.
///
/// `samples` has shape `(iteration, walker, parameter)`, as returned by
/// [`ChainHistory::chain`](crate::chain::ChainHistory::chain). `c` is the window
/// constant. The estimate is only trusted when the chain has at least `tol · τ`
/// iterations; shorter chains yield [`Error::ChainTooShort`], or, with `quiet`, a
/// logged warning and the estimate anyway.
///
/// # Examples
///
/// ```rust
/// use ndarray::Array3;
/// use stretch_mcmc::stats::integrated_time;
///
/// // white noise: every lag beyond zero is uncorrelated
/// let samples = Array3::from_shape_fn((2000, 4, 1), |(i, w, _)| {
///     (((i * 7919 + w * 104_729) % 1013) as f64).sin()
/// });
/// let tau = integrated_time(samples.view(), 5.0, 10.0, true).unwrap();
/// assert_eq!(tau.len(), 1);
/// ```
pub fn integrated_time(
    samples: ArrayView3<f64>,
    c: f64,
    tol: f64,
    quiet: bool,
) -> Result<Array1<f64>> {
    let (n_iter, n_walkers, n_params) = samples.dim();
    if n_iter == 0 || n_walkers == 0 {
        return Err(Error::Configuration(
            "cannot estimate autocorrelation of an empty chain".into(),
        ));
    }

    let mut tau = Array1::zeros(n_params);
    for p in 0..n_params {
        let mut mean_acf = Array1::<f64>::zeros(n_iter);
        for w in 0..n_walkers {
            mean_acf += &autocorr_function(samples.slice(s![.., w, p]));
        }
        mean_acf /= n_walkers as f64;

        let mut running = 0.0;
        let taus: Array1<f64> = mean_acf
            .iter()
            .map(|&rho| {
                running += rho;
                2.0 * running - 1.0
            })
            .collect();
        tau[p] = taus[auto_window(taus.view(), c)];
    }

    let limit = n_iter as f64 / tol;
    if tau.iter().any(|&t| t > limit) {
        let err = Error::ChainTooShort {
            tau: tau.to_vec(),
            n_params,
            tol,
            limit,
        };
        if !quiet {
            return Err(err);
        }
        log::warn!("{err}");
    }
    Ok(tau)
}

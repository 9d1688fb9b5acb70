use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::SmallRng, SeedableRng};
use std::hint::black_box;
use stretch_mcmc::objective::PlainDensity;
use stretch_mcmc::{gaussian_ball, EnsembleSampler, RunConfiguration};

const N_DIM: usize = 5;
const N_WALKERS: usize = 64;

fn gaussian_5d(x: &[f64]) -> f64 {
    -0.5 * x
        .iter()
        .enumerate()
        .map(|(i, v)| v * v / (i + 1) as f64)
        .sum::<f64>()
}

fn bench_workers(c: &mut Criterion) {
    let mut group = c.benchmark_group("stretch_5d");
    group.sample_size(20);

    for workers in [1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &w| {
            b.iter(|| {
                let config = RunConfiguration::new(N_WALKERS, N_DIM)
                    .set_seed(42)
                    .set_n_iterations(200)
                    .set_parallelism(w);
                let mut sampler =
                    EnsembleSampler::new(PlainDensity(gaussian_5d as fn(&[f64]) -> f64), config)
                        .unwrap();
                let mut rng = SmallRng::seed_from_u64(0);
                let p0 = gaussian_ball(&[0.0; N_DIM], 0.1, N_WALKERS, &mut rng).unwrap();
                black_box(sampler.run_mcmc(p0).unwrap())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_workers);
criterion_main!(benches);

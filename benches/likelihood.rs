use criterion::{black_box, criterion_group, criterion_main, Criterion};
use phylorate::{CoalescenceTimes, GrowthParams, LogisticModel};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn log_likelihood_benchmark(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(1u64);
    let clone_age = 40.0;
    let rate = 0.5;
    let mut times: Vec<f64> = (0..99)
        .map(|_| {
            let u: f64 = rng.gen();
            clone_age + (1.0 - u).ln() / rate
        })
        .filter(|&t| t > 0.0)
        .collect();
    times.sort_unstable_by(|a, b| b.partial_cmp(a).unwrap());
    times.push(0.0);
    let model = LogisticModel::from(CoalescenceTimes::new(times));
    let params = GrowthParams { s: 0.5, tm: 5.0, log_n: 5.0 };

    let mut group = c.benchmark_group("log_likelihood");
    group.bench_function("100 tips", |b| {
        b.iter(|| black_box(&model).log_likelihood(black_box(&params)))
    });
    group.finish();
}

criterion_group!(benches, log_likelihood_benchmark);
criterion_main!(benches);

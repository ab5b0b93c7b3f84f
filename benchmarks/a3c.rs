use a3c::{env::Catch, Architecture, Config, LearningRate, A3C};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, PlottingBackend};
use tch::Device;

const MAX_STEP_COUNT: usize = 200_000;
const EVAL_INTERVAL: usize = 1000;

const TARGET_AVG_RETURN: f32 = 0.8;

fn a3c_cpu(c: &mut Criterion) {
    c.bench_function("A3C/CPU", |b| {
        b.iter_batched(
            || {
                let config = Config::default()
                    .device(Device::Cpu)
                    .architecture(Architecture::Nips)
                    .history_len(2);

                A3C::builder()
                    .env(Catch::<20>::new())
                    .config(config)
                    .learning_rate(LearningRate::Constant(1e-3))
                    .t_max(5)
                    .num_threads(4)
                    .build()
                    .unwrap()
            },
            |mut a3c| loop {
                a3c.train(EVAL_INTERVAL).unwrap();

                if a3c.evaluate_avg_return().unwrap() >= TARGET_AVG_RETURN {
                    break;
                }

                assert!(
                    a3c.global_step() < MAX_STEP_COUNT,
                    "Failed to reach target average return"
                );
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(10)
        .plotting_backend(PlottingBackend::None);
    targets = a3c_cpu
}
criterion_main!(benches);

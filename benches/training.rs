//! Forward pass and training benchmarks.
//!
//! # Methodology
//!
//! **Model recreation per batch size**: every batch size gets a freshly built
//! model from the same seed, so all runs start from identical weights.
//!
//! **Throughput metric**: `Elements` = `batch_size * input_dim`, the number of
//! input values processed per call.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nnkit::config::{LayerSpec, ModelConfig, OptimizerKind, TrainConfig};
use nnkit::train::{fit, CancellationToken, Dataset};
use nnkit::{ActivationKind, Model, Tensor};
use rand::{rngs::StdRng, Rng, SeedableRng};

const INPUT_DIM: usize = 64;
const CLASSES: usize = 10;

fn build_model(optimizer: OptimizerKind) -> Model {
    ModelConfig {
        layers: vec![
            LayerSpec::new(128, ActivationKind::Relu),
            LayerSpec::new(64, ActivationKind::Relu),
            LayerSpec::softmax(CLASSES),
        ],
        optimizer,
        learning_rate: 0.01,
        init_seed: Some(42),
        ..Default::default()
    }
    .build()
    .unwrap()
}

/// Inputs in `[-1, 1)` and class-index targets.
fn make_batch(batch: usize, seed: u64) -> (Tensor, Tensor) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<f32> = (0..batch * INPUT_DIM)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    let y: Vec<f32> = (0..batch)
        .map(|_| rng.gen_range(0..CLASSES) as f32)
        .collect();
    (
        Tensor::from_vec(vec![batch, INPUT_DIM], x).unwrap(),
        Tensor::from_vec(vec![batch, 1], y).unwrap(),
    )
}

fn bench_forward(c: &mut Criterion) {
    let batch_sizes = [1_usize, 16, 64, 256];
    let mut group = c.benchmark_group("forward");

    for &batch in &batch_sizes {
        let mut model = build_model(OptimizerKind::Sgd);
        let (x, _) = make_batch(batch, 123);

        group.throughput(Throughput::Elements((batch * INPUT_DIM) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, _| {
            b.iter(|| model.forward(black_box(&x)).unwrap());
        });
    }

    group.finish();
}

fn bench_train_step(c: &mut Criterion) {
    let batch_sizes = [1_usize, 16, 64, 256];
    let mut group = c.benchmark_group("train_step");

    for optimizer in [OptimizerKind::Sgd, OptimizerKind::Adam] {
        for &batch in &batch_sizes {
            let mut model = build_model(optimizer);
            let (x, y) = make_batch(batch, 321);

            group.throughput(Throughput::Elements((batch * INPUT_DIM) as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{optimizer:?}").to_lowercase(), batch),
                &batch,
                |b, _| {
                    b.iter(|| model.train_step(black_box(&x), black_box(&y)).unwrap());
                },
            );
        }
    }

    group.finish();
}

fn bench_fit_epoch(c: &mut Criterion) {
    let (x, y) = make_batch(1024, 99);
    let data = Dataset::new(x, y).unwrap();
    let token = CancellationToken::new();
    let config = TrainConfig {
        epochs: 1,
        batch_size: 64,
        shuffle_seed: Some(5),
    };

    let mut group = c.benchmark_group("fit");
    group.sample_size(20);
    group.throughput(Throughput::Elements((data.len() * INPUT_DIM) as u64));
    group.bench_function("epoch_1024x64", |b| {
        let mut model = build_model(OptimizerKind::Adam);
        b.iter(|| fit(&mut model, black_box(&data), &config, &token, None).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_forward, bench_train_step, bench_fit_epoch);
criterion_main!(benches);

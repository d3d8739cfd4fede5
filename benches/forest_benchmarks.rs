use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::Array2;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;
use tsad_rs::detection::{AnomalyDetector, FeatureAttributor, ForestParams, IsolationForest};

/// Isolation Forest ベンチマーク
///
/// 学習・スコア計算・寄与度計算のコストを行数と特徴量数ごとに測定します。

fn sample_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).unwrap();
    Array2::from_shape_simple_fn((rows, cols), || normal.sample(&mut rng))
}

fn bench_forest_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("forest_fit");

    for rows in [500, 2000, 8000].iter() {
        let data = sample_matrix(*rows, 10, 1);
        group.throughput(Throughput::Elements(*rows as u64));

        group.bench_with_input(BenchmarkId::from_parameter(rows), &data, |b, data| {
            let forest = IsolationForest::new(ForestParams::default());
            b.iter(|| forest.fit(black_box(data.view())).unwrap());
        });
    }

    group.finish();
}

fn bench_forest_score(c: &mut Criterion) {
    let training = sample_matrix(2000, 10, 2);
    let model = IsolationForest::new(ForestParams::default())
        .fit(training.view())
        .unwrap();

    let mut group = c.benchmark_group("forest_score");
    for rows in [100, 1000, 10000].iter() {
        let data = sample_matrix(*rows, 10, 3);
        group.throughput(Throughput::Elements(*rows as u64));

        group.bench_with_input(BenchmarkId::from_parameter(rows), &data, |b, data| {
            b.iter(|| model.decision_function(black_box(data.view())).unwrap());
        });
    }
    group.finish();
}

fn bench_attribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("attribution");
    group.sample_size(20);

    for features in [5, 20, 50].iter() {
        let training = sample_matrix(1000, *features, 4);
        let data = sample_matrix(500, *features, 5);
        let mut detector = AnomalyDetector::new(ForestParams::default());
        detector.train(training.view()).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(features), &data, |b, data| {
            b.iter(|| {
                FeatureAttributor::new()
                    .attribute(&detector, black_box(data.view()))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_forest_fit,
    bench_forest_score,
    bench_attribution
);
criterion_main!(benches);

//! Per-frame latency benchmarks

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stratum_beat::features::FeatureExtractor;
use stratum_beat::tracking::ParticleCascade;
use stratum_beat::{Activation, EmissionModel, EmissionParams, EmissionShape, Tracker, TrackerConfig};

const HOP: usize = 441;

fn signal(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / 22050.0).sin() * 0.5)
        .collect()
}

fn bench_feature_frame(c: &mut Criterion) {
    let config = TrackerConfig::default();
    let mut extractor = FeatureExtractor::new(&config.features).unwrap();
    let hop = signal(HOP);
    extractor.push(&signal(2048));

    c.bench_function("feature_frame", |b| {
        b.iter(|| {
            extractor.push_with(black_box(&hop), |f| {
                black_box(f);
            })
        });
    });
}

fn bench_emission_frame(c: &mut Criterion) {
    let mut model = EmissionModel::new(Arc::new(EmissionParams::zeros(EmissionShape::default())));
    let mut state = model.initial_state();
    let feature = vec![0.1f32; model.input_dim()];

    c.bench_function("emission_frame", |b| {
        b.iter(|| model.infer_in_place(black_box(&feature), &mut state));
    });
}

fn bench_cascade_frame(c: &mut Criterion) {
    let config = TrackerConfig::default();
    let mut cascade = ParticleCascade::new(&config.filter, config.fps()).unwrap();
    let mut t = 0u64;

    c.bench_function("cascade_frame", |b| {
        b.iter(|| {
            let beat = if t % 25 == 0 { 0.9 } else { 0.1 };
            t += 1;
            cascade.process(black_box(&Activation {
                beat,
                downbeat: 0.1,
                none: 1.0 - beat - 0.1,
            }))
        });
    });
}

fn bench_session_10s(c: &mut Criterion) {
    let params = Arc::new(EmissionParams::zeros(EmissionShape::default()));
    let samples = signal(22050 * 10);

    c.bench_function("session_10s", |b| {
        b.iter(|| {
            let mut tracker = Tracker::new(TrackerConfig::default(), params.clone()).unwrap();
            tracker.step(black_box(&samples));
            tracker.finish()
        });
    });
}

criterion_group!(
    benches,
    bench_feature_frame,
    bench_emission_frame,
    bench_cascade_frame,
    bench_session_10s
);
criterion_main!(benches);

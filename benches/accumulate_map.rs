use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use skycoadd::calibration::CalibrationRecord;
use skycoadd::coadder::accumulate::{segment_contribution, MapAccumulator};
use skycoadd::healpix::Pixelization;
use skycoadd::mask::Mask;
use skycoadd::segments::{MaskedSegment, Segment};

/// Random scan of `samples` pixels, masked, with its calibration.
fn make_masked(
    rng: &mut StdRng,
    id: usize,
    npix: usize,
    samples: usize,
    mask: &Mask,
) -> (MaskedSegment, CalibrationRecord) {
    let start = rng.random_range(0..npix);
    let pixels: Vec<usize> = (0..samples).map(|k| (start + k) % npix).collect();
    let template: Vec<f64> = (0..samples).map(|_| rng.random_range(10.0..400.0)).collect();
    let gain = rng.random_range(0.8..1.2);
    let offset = rng.random_range(-5.0..5.0);
    let raw = template
        .iter()
        .map(|t| gain * t + offset + rng.random_range(0.0..2.0))
        .collect();
    let segment = Segment::new(id, raw, vec![0.5; samples], pixels, vec![]).unwrap();
    let masked = segment.apply_mask(&template, mask).unwrap();
    let record = CalibrationRecord {
        segment: id,
        gain,
        offset,
        orbit_size: masked.len(),
        timestamp: None,
    };
    (masked, record)
}

/// 150 segments of 20k samples on an nside-256 map, the production scale.
fn bench_full_iteration(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xABBA);
    let pixelization = Pixelization::new(256);
    let npix = pixelization.npix();
    let mask = Mask::build(&pixelization, &vec![0.0; npix]).unwrap();
    let segments: Vec<_> = (0..150)
        .map(|id| make_masked(&mut rng, id, npix, 20_000, &mask))
        .collect();

    c.bench_function("accumulate_map/150_segments_nside256", |b| {
        b.iter_batched(
            || MapAccumulator::new(npix),
            |mut accumulator| {
                for (masked, record) in &segments {
                    if let Some(contribution) = segment_contribution(masked, record) {
                        accumulator.add(&contribution).unwrap();
                    }
                }
                black_box(accumulator.normalize());
            },
            BatchSize::LargeInput,
        )
    });
}

/// Contribution building alone, one segment.
fn bench_contribution(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xD00D);
    let pixelization = Pixelization::new(256);
    let npix = pixelization.npix();
    let mask = Mask::empty(npix);
    let (masked, record) = make_masked(&mut rng, 0, npix, 20_000, &mask);

    c.bench_function("accumulate_map/segment_contribution_20k", |b| {
        b.iter(|| black_box(segment_contribution(black_box(&masked), black_box(&record))))
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = bench_full_iteration, bench_contribution
);
criterion_main!(benches);

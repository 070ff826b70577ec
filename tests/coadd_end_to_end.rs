mod common;

use approx::assert_abs_diff_eq;
use common::{memory_sources, noisy_memory_sources, SyntheticSegment};
use skycoadd::calibration::archive::{CalibrationArchive, MemoryCalibrationArchive};
use skycoadd::coadder::{CalibrationSource, CoaddParams, Coadder};
use skycoadd::healpix::Pixelization;
use skycoadd::mask::Mask;
use skycoadd::skymap::{MapKey, MemoryMapStore};
use skycoadd::smoothing::moving_average::{BoundaryPolicy, MovingAverageParams};
use skycoadd::smoothing::SmoothingStrategy;

/// Three disjoint 5-pixel segments: A exact, B scaled and shifted, C with zero uncertainties.
fn three_segments(template: Vec<f64>) -> Vec<SyntheticSegment> {
    vec![
        SyntheticSegment::new(0, (0..5).collect(), template.clone()),
        SyntheticSegment::new(1, (5..10).collect(), template.clone()).calibration(2.0, 3.0),
        SyntheticSegment::new(2, (10..15).collect(), template).uncertainty(0.0),
    ]
}

#[test]
fn test_constant_template_scenario() {
    let pixelization = Pixelization::new(2);
    let mask = Mask::empty(pixelization.npix());
    let (segments, templates) = memory_sources(pixelization.npix(), &three_segments(vec![1.0; 5]));
    let mut store = MemoryMapStore::new();
    let mut archive = MemoryCalibrationArchive::new();

    let params = CoaddParams::builder().num_segments(3).iterations(1).build().unwrap();
    let outcome = Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive)
        .run()
        .unwrap();

    let table = outcome.history.latest().unwrap();
    let a = table.get(0).unwrap();
    assert_abs_diff_eq!(a.gain, 1.0, epsilon = 1e-3);
    assert_abs_diff_eq!(a.offset, 0.0, epsilon = 1e-3);

    // a constant template only constrains gain + offset
    let b = table.get(1).unwrap();
    assert_abs_diff_eq!(b.gain + b.offset, 5.0, epsilon = 5e-3);
    assert_eq!(b.orbit_size, 5);

    let map = &outcome.final_map;
    for pixel in 0..10 {
        assert_abs_diff_eq!(map.value(pixel), 0.0, epsilon = 5e-3);
        assert!(map.uncertainties()[pixel] > 0.0);
    }
    for pixel in 10..pixelization.npix() {
        assert_eq!(map.value(pixel), 0.0);
        assert_eq!(map.uncertainties()[pixel], 0.0);
    }
    assert_eq!(store.get(&MapKey::new(3, 0)), Some(map));
}

#[test]
fn test_varying_template_recovers_calibration() {
    let pixelization = Pixelization::new(2);
    let mask = Mask::empty(pixelization.npix());
    let template = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let (segments, templates) = memory_sources(pixelization.npix(), &three_segments(template));
    let mut store = MemoryMapStore::new();
    let mut archive = MemoryCalibrationArchive::new();

    let params = CoaddParams::builder().num_segments(3).iterations(1).build().unwrap();
    let outcome = Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive)
        .run()
        .unwrap();

    let b = *outcome.history.latest().unwrap().get(1).unwrap();
    assert_abs_diff_eq!(b.gain, 2.0, epsilon = 5e-3);
    assert_abs_diff_eq!(b.offset, 3.0, epsilon = 5e-3);
    for pixel in 0..15 {
        assert_abs_diff_eq!(outcome.final_map.value(pixel), 0.0, epsilon = 5e-3);
    }
}

#[test]
fn test_masked_pixels_are_left_out() {
    // nside 1: pixels 4..8 form the equatorial ring, inside the galactic band
    let pixelization = Pixelization::new(1);
    let mask = Mask::build(&pixelization, &vec![0.0; pixelization.npix()]).unwrap();
    let segment = SyntheticSegment::new(0, (2..8).collect(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
        .calibration(1.5, 0.5);
    let (segments, templates) = memory_sources(pixelization.npix(), &[segment]);
    let mut store = MemoryMapStore::new();
    let mut archive = MemoryCalibrationArchive::new();

    let params = CoaddParams::builder().num_segments(1).iterations(1).build().unwrap();
    let outcome = Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive)
        .run()
        .unwrap();

    let record = outcome.history.latest().unwrap().get(0).copied().unwrap();
    assert_eq!(record.orbit_size, 2);
    let map = &outcome.final_map;
    assert!(map.uncertainties()[2] > 0.0);
    assert!(map.uncertainties()[3] > 0.0);
    for pixel in 4..8 {
        assert_eq!(map.uncertainties()[pixel], 0.0);
    }
}

#[test]
fn test_iterations_are_archived_and_stored() {
    let pixelization = Pixelization::new(2);
    let mask = Mask::empty(pixelization.npix());
    let synthetic: Vec<SyntheticSegment> = (0..4)
        .map(|id| {
            let pixels: Vec<usize> = (id * 8..id * 8 + 8).collect();
            let template: Vec<f64> = (0..8).map(|k| 1.0 + 0.5 * k as f64).collect();
            SyntheticSegment::new(id, pixels, template).calibration(1.0 + 0.1 * id as f64, 0.2)
        })
        .collect();
    let (segments, templates) =
        noisy_memory_sources(pixelization.npix(), &synthetic, 0.01, 0xC0FFEE);
    let mut store = MemoryMapStore::new();
    let mut archive = MemoryCalibrationArchive::new();

    let params = CoaddParams::builder()
        .num_segments(4)
        .iterations(3)
        .band(4)
        .build()
        .unwrap();
    let outcome = Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive)
        .run()
        .unwrap();

    assert_eq!(outcome.history.len(), 3);
    assert_eq!(archive.len(), 3);
    assert_eq!(store.len(), 3);
    for iteration in 0..3 {
        assert!(store.get(&MapKey::new(4, iteration)).is_some());
        assert_eq!(
            archive.load_iteration(iteration).unwrap(),
            *outcome.history.iteration(iteration).unwrap()
        );
    }

    let evolution = outcome.history.segment_evolution(3);
    assert_eq!(evolution.len(), 3);
    for (iteration, point) in evolution.iter().enumerate() {
        assert_eq!(point.iteration, iteration);
        assert_abs_diff_eq!(point.gain, 1.3, epsilon = 0.05);
        assert_abs_diff_eq!(point.offset, 0.2, epsilon = 0.1);
    }
    assert_eq!(
        outcome.final_map,
        *store.get(&MapKey::new(4, 2)).unwrap()
    );
}

#[test]
fn test_moving_average_each_iteration() {
    let pixelization = Pixelization::new(2);
    let mask = Mask::empty(pixelization.npix());
    let template = vec![1.0, 2.0, 3.0, 4.0];
    let synthetic: Vec<SyntheticSegment> = (0..3)
        .map(|id| {
            SyntheticSegment::new(id, (id * 4..id * 4 + 4).collect(), template.clone())
                .calibration(1.0 + id as f64, 0.0)
        })
        .collect();
    let (segments, templates) = memory_sources(pixelization.npix(), &synthetic);
    let mut store = MemoryMapStore::new();
    let mut archive = MemoryCalibrationArchive::new();

    let strategy = SmoothingStrategy::MovingAverage(MovingAverageParams {
        window: 2,
        boundary: BoundaryPolicy::Clamp,
    });
    let params = CoaddParams::builder()
        .num_segments(3)
        .iterations(1)
        .calibration_source(CalibrationSource::SmoothedEachIteration(strategy))
        .build()
        .unwrap();
    let outcome = Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive)
        .run()
        .unwrap();

    // equal orbit sizes: plain means of the fitted gains 1, 2, 3 over a ±1 window
    let gains = archive.load_iteration(0).unwrap().gains();
    assert_abs_diff_eq!(gains[0], 1.5, epsilon = 5e-3);
    assert_abs_diff_eq!(gains[1], 2.0, epsilon = 5e-3);
    assert_abs_diff_eq!(gains[2], 2.5, epsilon = 5e-3);
    assert_eq!(outcome.history.latest().unwrap().gains(), gains);
}

#[test]
fn test_empty_universe_gives_zero_maps() {
    let pixelization = Pixelization::new(1);
    let mask = Mask::empty(pixelization.npix());
    let (segments, templates) = memory_sources(pixelization.npix(), &[]);
    let mut store = MemoryMapStore::new();
    let mut archive = MemoryCalibrationArchive::new();

    let params = CoaddParams::builder().num_segments(0).iterations(2).build().unwrap();
    let outcome = Coadder::new(params, &mask, &segments, &templates, &mut store, &mut archive)
        .run()
        .unwrap();

    assert_eq!(outcome.history.len(), 2);
    assert!(outcome.history.latest().unwrap().is_empty());
    assert_eq!(outcome.final_map.covered_pixels(), 0);
    assert_eq!(store.len(), 2);
}

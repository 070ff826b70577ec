#![allow(dead_code)]

use camino::Utf8Path;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use skycoadd::constants::{PixelIndex, SegmentId, MJD};
use skycoadd::segments::{MemorySegmentSource, MemoryTemplateSource, Segment};

/// Synthetic segment observed as `gain · template + offset`.
pub struct SyntheticSegment {
    pub id: SegmentId,
    pub pixels: Vec<PixelIndex>,
    pub template: Vec<f64>,
    pub gain: f64,
    pub offset: f64,
    pub uncertainty: f64,
    pub timestamp: Option<MJD>,
}

impl SyntheticSegment {
    pub fn new(id: SegmentId, pixels: Vec<PixelIndex>, template: Vec<f64>) -> Self {
        SyntheticSegment {
            id,
            pixels,
            template,
            gain: 1.0,
            offset: 0.0,
            uncertainty: 0.1,
            timestamp: None,
        }
    }

    pub fn calibration(mut self, gain: f64, offset: f64) -> Self {
        self.gain = gain;
        self.offset = offset;
        self
    }

    pub fn uncertainty(mut self, uncertainty: f64) -> Self {
        self.uncertainty = uncertainty;
        self
    }

    pub fn timestamp(mut self, time: MJD) -> Self {
        self.timestamp = Some(time);
        self
    }

    pub fn raw(&self) -> Vec<f64> {
        self.template
            .iter()
            .map(|t| self.gain * t + self.offset)
            .collect()
    }

    pub fn to_segment(&self, raw: Vec<f64>) -> Segment {
        let timestamps = self
            .timestamp
            .map(|t| vec![t; self.pixels.len()])
            .unwrap_or_default();
        Segment::new(
            self.id,
            raw,
            vec![self.uncertainty; self.pixels.len()],
            self.pixels.clone(),
            timestamps,
        )
        .unwrap()
    }
}

/// In-memory segment and template sources for noiseless synthetic segments.
pub fn memory_sources(
    npix: usize,
    synthetic: &[SyntheticSegment],
) -> (MemorySegmentSource, MemoryTemplateSource) {
    let mut templates = MemoryTemplateSource::new(npix);
    let segments = synthetic
        .iter()
        .map(|s| {
            let segment = s.to_segment(s.raw());
            templates.insert_aligned(&segment, &s.template).unwrap();
            segment
        })
        .collect();
    (segments, templates)
}

/// Same as [`memory_sources`] with Gaussian noise of standard deviation `sigma` on the raw
/// values.
pub fn noisy_memory_sources(
    npix: usize,
    synthetic: &[SyntheticSegment],
    sigma: f64,
    seed: u64,
) -> (MemorySegmentSource, MemoryTemplateSource) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sigma).unwrap();
    let mut templates = MemoryTemplateSource::new(npix);
    let segments = synthetic
        .iter()
        .map(|s| {
            let raw = s
                .raw()
                .into_iter()
                .map(|v| v + noise.sample(&mut rng))
                .collect();
            let segment = s.to_segment(raw);
            templates.insert_aligned(&segment, &s.template).unwrap();
            segment
        })
        .collect();
    (segments, templates)
}

/// Write a segment table in the layout read by `CsvSegmentSource`.
pub fn write_segment_csv(path: &Utf8Path, segment: &SyntheticSegment) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer
        .write_record(["pixel_value", "pixel_unc", "hp_pixel_index", "pixel_mjd"])
        .unwrap();
    for (&pixel, raw) in segment.pixels.iter().zip(segment.raw()) {
        let mjd = segment.timestamp.map(|t| t.to_string()).unwrap_or_default();
        writer
            .write_record([
                raw.to_string(),
                segment.uncertainty.to_string(),
                pixel.to_string(),
                mjd,
            ])
            .unwrap();
    }
    writer.flush().unwrap();
}

/// Write a dense map table (`pixel_index,value`) holding only the given pixels.
pub fn write_sparse_map_csv(path: &Utf8Path, entries: &[(PixelIndex, f64)]) {
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(["pixel_index", "value"]).unwrap();
    for (pixel, value) in entries {
        writer
            .write_record([pixel.to_string(), value.to_string()])
            .unwrap();
    }
    writer.flush().unwrap();
}

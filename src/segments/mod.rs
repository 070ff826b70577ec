//! # Segments: scan passes, reference templates, and masking
//!
//! A **segment** (orbit) is one contiguous scan pass: an ordered batch of samples, each with a
//! measured pixel value, its standard error (zero meaning *invalid*), the HEALPix pixel it
//! falls in, and optionally its acquisition time. Segments are read-only inputs; every stage of
//! the pipeline works on derived copies ([`MaskedSegment`]).
//!
//! ## Collaborators
//! -----------------
//! * [`SegmentSource`] – loads a [`Segment`] by identifier.
//! * [`TemplateSource`] – returns the reference (zodiacal-light) template value at each of a
//!   segment's pixels.
//!
//! Implementations:
//! * [`csv_reader::CsvSegmentSource`] / [`csv_reader::CsvTemplateSource`] – file based.
//! * [`MemorySegmentSource`] / [`MemoryTemplateSource`] – in memory.
//!
//! ## Template consistency
//! -----------------
//! The pixel index set of a segment and that of its template must coincide. [`extract_template`]
//! reports two kinds of mismatch as warnings (zeros inside the segment, non-zero values outside
//! it) and returns the values at the requested pixels regardless, so processing continues on
//! whatever overlap exists.
pub mod csv_reader;

use std::collections::HashMap;

use itertools::izip;
use tracing::warn;

use crate::{
    coadd_errors::CoaddError,
    constants::{PixelIndex, SegmentId, MJD},
    mask::Mask,
};

/// One scan pass, stored column-wise.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    values: Vec<f64>,
    uncertainties: Vec<f64>,
    pixels: Vec<PixelIndex>,
    timestamps: Vec<MJD>,
}

impl Segment {
    /// Build a segment from its columns.
    ///
    /// Arguments
    /// -----------------
    /// * `id`: segment identifier.
    /// * `values`: measured pixel values.
    /// * `uncertainties`: standard errors, same length as `values`.
    /// * `pixels`: pixel indices, same length as `values`.
    /// * `timestamps`: per-sample MJD, either empty or the same length as `values`.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::SampleLengthMismatch)` if the columns disagree in length.
    pub fn new(
        id: SegmentId,
        values: Vec<f64>,
        uncertainties: Vec<f64>,
        pixels: Vec<PixelIndex>,
        timestamps: Vec<MJD>,
    ) -> Result<Self, CoaddError> {
        let n = values.len();
        let check = |what: &'static str, found: usize| {
            if found == n {
                Ok(())
            } else {
                Err(CoaddError::SampleLengthMismatch {
                    segment: id,
                    what,
                    expected: n,
                    found,
                })
            }
        };
        check("uncertainties", uncertainties.len())?;
        check("pixels", pixels.len())?;
        if !timestamps.is_empty() {
            check("timestamps", timestamps.len())?;
        }

        Ok(Segment {
            id,
            values,
            uncertainties,
            pixels,
            timestamps,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn uncertainties(&self) -> &[f64] {
        &self.uncertainties
    }

    pub fn pixels(&self) -> &[PixelIndex] {
        &self.pixels
    }

    pub fn timestamps(&self) -> &[MJD] {
        &self.timestamps
    }

    /// `true` when every uncertainty is zero (or the segment is empty).
    pub fn all_uncertainties_zero(&self) -> bool {
        self.uncertainties.iter().all(|&u| u == 0.0)
    }

    /// Median sample timestamp, the segment's position on the time axis.
    ///
    /// For an even count the two central values are averaged. `None` without timestamps.
    pub fn representative_timestamp(&self) -> Option<MJD> {
        median(&self.timestamps)
    }

    /// Drop every sample whose pixel is excluded by `mask`.
    ///
    /// Arguments
    /// -----------------
    /// * `template`: template value per sample, aligned with this segment.
    /// * `mask`: the run's combined exclusion mask.
    ///
    /// Return
    /// ----------
    /// * The masked copy, or `Err(CoaddError::SampleLengthMismatch)` if `template` is not
    ///   aligned with the samples.
    pub fn apply_mask(&self, template: &[f64], mask: &Mask) -> Result<MaskedSegment, CoaddError> {
        if template.len() != self.len() {
            return Err(CoaddError::SampleLengthMismatch {
                segment: self.id,
                what: "template",
                expected: self.len(),
                found: template.len(),
            });
        }

        let mut masked = MaskedSegment {
            id: self.id,
            values: Vec::with_capacity(self.len()),
            uncertainties: Vec::with_capacity(self.len()),
            pixels: Vec::with_capacity(self.len()),
            template: Vec::with_capacity(self.len()),
            all_uncertainties_zero: self.all_uncertainties_zero(),
            timestamp: self.representative_timestamp(),
        };

        for (&value, &unc, &pixel, &tmpl) in
            izip!(&self.values, &self.uncertainties, &self.pixels, template)
        {
            if mask.is_excluded(pixel) {
                continue;
            }
            masked.values.push(value);
            masked.uncertainties.push(unc);
            masked.pixels.push(pixel);
            masked.template.push(tmpl);
        }
        Ok(masked)
    }
}

/// Masked working copy of a segment, aligned with its masked template.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedSegment {
    pub id: SegmentId,
    pub values: Vec<f64>,
    pub uncertainties: Vec<f64>,
    pub pixels: Vec<PixelIndex>,
    pub template: Vec<f64>,
    /// Computed on the unmasked uncertainties.
    pub all_uncertainties_zero: bool,
    pub timestamp: Option<MJD>,
}

impl MaskedSegment {
    /// Post-mask sample count ("orbit size").
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Remove an estimate of the non-template signal already absorbed by the previous map.
    ///
    /// Each sample loses `previous_map[pixel] · previous_gain`, which leaves the template
    /// component for the next calibration fit.
    pub fn subtract_previous_map(&self, previous_map: &[f64], previous_gain: f64) -> Vec<f64> {
        self.values
            .iter()
            .zip(&self.pixels)
            .map(|(&v, &p)| v - previous_map[p] * previous_gain)
            .collect()
    }
}

/// Loads segments by identifier.
pub trait SegmentSource: Sync {
    fn load_segment(&self, id: SegmentId) -> Result<Segment, CoaddError>;
}

/// Returns the template value at each requested pixel of a segment.
pub trait TemplateSource: Sync {
    fn load_template(&self, id: SegmentId, pixels: &[PixelIndex]) -> Result<Vec<f64>, CoaddError>;
}

/// Pick the values of a per-segment template map at the segment's pixels.
///
/// Arguments
/// -----------------
/// * `id`: segment identifier, used in diagnostics.
/// * `template_map`: dense full-sky template for this segment (zero outside the scan).
/// * `pixels`: the segment's pixel indices.
///
/// Return
/// ----------
/// * The template value per pixel, in the order of `pixels`.
/// * `Err(CoaddError::PixelOutOfRange)` if a pixel is outside `template_map`.
///
/// Mismatches are logged, never fatal:
/// * a zero value at a segment pixel ⇒ "zeros in template";
/// * otherwise, a non-zero value at a pixel not in the segment ⇒ "non-zeros outside segment".
pub fn extract_template(
    id: SegmentId,
    template_map: &[f64],
    pixels: &[PixelIndex],
) -> Result<Vec<f64>, CoaddError> {
    let npix = template_map.len();
    let mut in_segment = vec![false; npix];
    let mut values = Vec::with_capacity(pixels.len());

    for &pixel in pixels {
        let value = *template_map.get(pixel).ok_or(CoaddError::PixelOutOfRange {
            segment: id,
            pixel,
            npix,
        })?;
        in_segment[pixel] = true;
        values.push(value);
    }

    if values.iter().any(|&v| v == 0.0) {
        warn!("Segment {id} mismatch with template: zeros in template at segment pixels");
    } else if template_map
        .iter()
        .zip(&in_segment)
        .any(|(&v, &inside)| !inside && v != 0.0)
    {
        warn!("Segment {id} mismatch with template: non-zeros outside segment pixels");
    }

    Ok(values)
}

/// Median of a slice, averaging the two central values for even lengths.
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    }
}

/// [`SegmentSource`] over segments held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentSource {
    segments: HashMap<SegmentId, Segment>,
}

impl MemorySegmentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, segment: Segment) {
        self.segments.insert(segment.id, segment);
    }
}

impl FromIterator<Segment> for MemorySegmentSource {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        let mut source = MemorySegmentSource::new();
        for segment in iter {
            source.insert(segment);
        }
        source
    }
}

impl SegmentSource for MemorySegmentSource {
    fn load_segment(&self, id: SegmentId) -> Result<Segment, CoaddError> {
        self.segments
            .get(&id)
            .cloned()
            .ok_or_else(|| CoaddError::SegmentNotFound {
                id,
                path: "<memory>".into(),
            })
    }
}

/// [`TemplateSource`] over dense per-segment template maps held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTemplateSource {
    npix: usize,
    maps: HashMap<SegmentId, Vec<f64>>,
}

impl MemoryTemplateSource {
    pub fn new(npix: usize) -> Self {
        MemoryTemplateSource {
            npix,
            maps: HashMap::new(),
        }
    }

    /// Register a dense template map for segment `id`.
    pub fn insert_map(&mut self, id: SegmentId, map: Vec<f64>) -> Result<(), CoaddError> {
        if map.len() != self.npix {
            return Err(CoaddError::MapSizeMismatch {
                expected: self.npix,
                found: map.len(),
            });
        }
        self.maps.insert(id, map);
        Ok(())
    }

    /// Register a template given as one value per sample of `segment`.
    pub fn insert_aligned(&mut self, segment: &Segment, values: &[f64]) -> Result<(), CoaddError> {
        if values.len() != segment.len() {
            return Err(CoaddError::SampleLengthMismatch {
                segment: segment.id,
                what: "template",
                expected: segment.len(),
                found: values.len(),
            });
        }
        let mut map = vec![0.0; self.npix];
        for (&pixel, &value) in segment.pixels().iter().zip(values) {
            let slot = map.get_mut(pixel).ok_or(CoaddError::PixelOutOfRange {
                segment: segment.id,
                pixel,
                npix: self.npix,
            })?;
            *slot = value;
        }
        self.insert_map(segment.id, map)
    }
}

impl TemplateSource for MemoryTemplateSource {
    fn load_template(&self, id: SegmentId, pixels: &[PixelIndex]) -> Result<Vec<f64>, CoaddError> {
        let map = self
            .maps
            .get(&id)
            .ok_or_else(|| CoaddError::TemplateNotFound {
                id,
                path: "<memory>".into(),
            })?;
        extract_template(id, map, pixels)
    }
}

#[cfg(test)]
mod segments_tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    /// In-memory sink for formatted log lines.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a local subscriber and return what it logged.
    fn logs_of<R>(f: impl FnOnce() -> R) -> (R, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let logged = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        (result, logged)
    }

    fn segment() -> Segment {
        Segment::new(
            4,
            vec![1.0, 2.0, 3.0, 4.0],
            vec![0.1, 0.2, 0.3, 0.4],
            vec![0, 5, 1, 2],
            vec![55210.0, 55210.5, 55211.0, 55213.0],
        )
        .unwrap()
    }

    #[test]
    fn test_length_mismatch() {
        let err = Segment::new(1, vec![1.0, 2.0], vec![0.1], vec![0, 1], vec![]).unwrap_err();
        assert_eq!(
            err,
            CoaddError::SampleLengthMismatch {
                segment: 1,
                what: "uncertainties",
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_representative_timestamp() {
        assert_eq!(segment().representative_timestamp(), Some(55210.75));
        let no_time = Segment::new(2, vec![1.0], vec![1.0], vec![0], vec![]).unwrap();
        assert_eq!(no_time.representative_timestamp(), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn test_apply_mask_drops_excluded_pixels() {
        let pixelization = crate::healpix::Pixelization::new(1);
        // pixel 5 lies in the galactic band
        let mask = Mask::build(&pixelization, &[0.0; 12]).unwrap();
        let seg = segment();
        let masked = seg.apply_mask(&[10.0, 20.0, 30.0, 40.0], &mask).unwrap();

        assert_eq!(masked.values, vec![1.0, 3.0, 4.0]);
        assert_eq!(masked.uncertainties, vec![0.1, 0.3, 0.4]);
        assert_eq!(masked.pixels, vec![0, 1, 2]);
        assert_eq!(masked.template, vec![10.0, 30.0, 40.0]);
        assert_eq!(masked.len(), 3);
        assert!(!masked.all_uncertainties_zero);
    }

    #[test]
    fn test_subtract_previous_map() {
        let masked = MaskedSegment {
            id: 0,
            values: vec![5.0, 6.0],
            uncertainties: vec![1.0, 1.0],
            pixels: vec![2, 0],
            template: vec![1.0, 1.0],
            all_uncertainties_zero: false,
            timestamp: None,
        };
        let previous = vec![1.0, 0.0, 0.5];
        assert_eq!(masked.subtract_previous_map(&previous, 2.0), vec![4.0, 4.0]);
    }

    #[test]
    fn test_extract_template_warns_on_zeros_inside() {
        // pixel 0 is zero inside the segment, pixel 3 is non-zero outside it
        let map = vec![0.0, 2.0, 3.0, 7.0];
        let (values, logged) = logs_of(|| extract_template(9, &map, &[0, 1, 2]));
        assert_eq!(values.unwrap(), vec![0.0, 2.0, 3.0]);
        assert!(logged.contains("WARN"));
        assert!(logged.contains("Segment 9 mismatch with template: zeros in template"));
        assert!(!logged.contains("non-zeros outside segment"));
    }

    #[test]
    fn test_extract_template_warns_on_values_outside() {
        let map = vec![1.0, 2.0, 3.0, 7.0];
        let (values, logged) = logs_of(|| extract_template(9, &map, &[0, 1, 2]));
        assert_eq!(values.unwrap(), vec![1.0, 2.0, 3.0]);
        assert!(logged.contains("Segment 9 mismatch with template: non-zeros outside segment"));
        assert!(!logged.contains("zeros in template"));
    }

    #[test]
    fn test_extract_template_clean_is_silent() {
        let map = vec![1.0, 2.0, 3.0, 0.0];
        let (values, logged) = logs_of(|| extract_template(9, &map, &[2, 0, 1]));
        assert_eq!(values.unwrap(), vec![3.0, 1.0, 2.0]);
        assert!(logged.is_empty(), "unexpected log output: {logged}");
    }

    #[test]
    fn test_extract_template_out_of_range() {
        let map = vec![0.0, 2.0, 3.0, 7.0];
        let err = extract_template(9, &map, &[4]).unwrap_err();
        assert_eq!(
            err,
            CoaddError::PixelOutOfRange {
                segment: 9,
                pixel: 4,
                npix: 4
            }
        );
    }

    #[test]
    fn test_memory_sources() {
        let seg = segment();
        let mut templates = MemoryTemplateSource::new(12);
        templates
            .insert_aligned(&seg, &[1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let segments: MemorySegmentSource = std::iter::once(seg.clone()).collect();

        let loaded = segments.load_segment(4).unwrap();
        assert_eq!(loaded, seg);
        let template = templates.load_template(4, loaded.pixels()).unwrap();
        assert_eq!(template, vec![1.0, 2.0, 3.0, 4.0]);

        assert!(matches!(
            segments.load_segment(5),
            Err(CoaddError::SegmentNotFound { id: 5, .. })
        ));
        assert!(matches!(
            templates.load_template(5, &[]),
            Err(CoaddError::TemplateNotFound { id: 5, .. })
        ));
    }
}

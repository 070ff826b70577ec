//! # Accumulation of calibrated segments into a map
//!
//! Accumulation is a reduction. Each segment is turned independently into a sparse
//! [`SegmentContribution`], a list of `(pixel, Δnumerator, Δdenominator)` entries, and a
//! [`MapAccumulator`] sums those lists into dense buffers. Addition is the only operation on
//! the buffers, so contributions can be built in any order or in parallel. They are added in
//! segment order so the floating-point sum is reproducible.
//!
//! For a surviving segment with calibration `(g, o)`, at every unmasked sample:
//!
//! ```text
//! calibrated = (raw − o) / g
//! residual   = max(calibrated − template, 0)
//! σc         = σ / |g|
//! Δnum       = residual / σc²
//! Δden       = 1 / σc²
//! ```
//!
//! Samples with `σc == 0` contribute nothing. A segment with `g == 0` or with only zero
//! uncertainties yields no contribution at all.
//!
//! Normalisation: `map = num / den`, `unc = 1 / den` where `den ≠ 0`, and `0` elsewhere.
use itertools::izip;

use crate::{
    calibration::CalibrationRecord,
    coadd_errors::CoaddError,
    constants::{PixelIndex, SegmentId},
    segments::MaskedSegment,
    skymap::SkyMap,
};

/// One pixel's share of a segment contribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelContribution {
    pub pixel: PixelIndex,
    pub numerator: f64,
    pub denominator: f64,
}

/// Sparse inverse-variance contribution of one calibrated segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentContribution {
    pub segment: SegmentId,
    pub entries: Vec<PixelContribution>,
}

/// Build the contribution of one masked segment under calibration `record`.
///
/// Arguments
/// -----------------
/// * `masked`: the segment after masking, with its masked template. The raw values are used,
///   never the previous-map-subtracted working data.
/// * `record`: the segment's calibration for this iteration.
///
/// Return
/// ----------
/// * `None` if the segment is skipped (`gain == 0` or all uncertainties zero).
pub fn segment_contribution(
    masked: &MaskedSegment,
    record: &CalibrationRecord,
) -> Option<SegmentContribution> {
    if record.is_degenerate() || masked.all_uncertainties_zero {
        return None;
    }
    let abs_gain = record.gain.abs();

    let entries = izip!(&masked.values, &masked.uncertainties, &masked.pixels, &masked.template)
        .filter_map(|(&raw, &sigma, &pixel, &template)| {
            let sigma_cal = sigma / abs_gain;
            if sigma_cal == 0.0 {
                return None;
            }
            let residual = (record.calibrate(raw) - template).max(0.0);
            let weight = 1.0 / (sigma_cal * sigma_cal);
            Some(PixelContribution {
                pixel,
                numerator: residual * weight,
                denominator: weight,
            })
        })
        .collect();

    Some(SegmentContribution {
        segment: masked.id,
        entries,
    })
}

/// Dense numerator and denominator buffers of one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct MapAccumulator {
    numerator: Vec<f64>,
    denominator: Vec<f64>,
}

impl MapAccumulator {
    /// Zero-filled buffers for `npix` pixels.
    pub fn new(npix: usize) -> Self {
        MapAccumulator {
            numerator: vec![0.0; npix],
            denominator: vec![0.0; npix],
        }
    }

    pub fn npix(&self) -> usize {
        self.numerator.len()
    }

    pub fn numerator(&self) -> &[f64] {
        &self.numerator
    }

    pub fn denominator(&self) -> &[f64] {
        &self.denominator
    }

    /// Sum a segment contribution into the buffers.
    ///
    /// Return
    /// ----------
    /// * `Err(CoaddError::PixelOutOfRange)` if an entry addresses a pixel outside the buffers.
    ///   The buffers are left untouched in that case.
    pub fn add(&mut self, contribution: &SegmentContribution) -> Result<(), CoaddError> {
        let npix = self.npix();
        if let Some(bad) = contribution.entries.iter().find(|e| e.pixel >= npix) {
            return Err(CoaddError::PixelOutOfRange {
                segment: contribution.segment,
                pixel: bad.pixel,
                npix,
            });
        }
        for entry in &contribution.entries {
            self.numerator[entry.pixel] += entry.numerator;
            self.denominator[entry.pixel] += entry.denominator;
        }
        Ok(())
    }

    /// Turn the buffers into the iteration's map.
    pub fn normalize(&self) -> SkyMap {
        let (values, uncertainties): (Vec<f64>, Vec<f64>) = self
            .numerator
            .iter()
            .zip(&self.denominator)
            .map(|(&num, &den)| {
                if den != 0.0 {
                    (num / den, 1.0 / den)
                } else {
                    (0.0, 0.0)
                }
            })
            .unzip();
        SkyMap::from_aligned(values, uncertainties)
    }
}

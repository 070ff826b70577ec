//! # Temporal smoothing of calibration parameters
//!
//! A post-stage decoupled from the outer loop: takes the per-segment gains and offsets of one
//! iteration and replaces their segment-to-segment scatter by a smooth function of time.
//!
//! ## Strategies
//! -----------------
//! * [`SmoothingStrategy::Spline`] – [`TemporalSmoother`]: z-score and moon-stripe rejection,
//!   then one degree-5 smoothing spline per parameter over the segments' median timestamps.
//!   The two [`SmoothCurve`]s are persisted as `gain_spline.json` / `offset_spline.json`
//!   ([`CalibrationCurves`]) for reuse by a later coaddition run.
//! * [`SmoothingStrategy::MovingAverage`] – orbit-size weighted moving average along the
//!   segment axis ([`moving_average`]), with a wrap or clamp boundary.
//!
//! Degenerate records (`gain == 0`) are never fed to a fit and stay degenerate.
//!
//! See also
//! ------------
//! * [`CalibrationSource`](crate::coadder::CalibrationSource) – how smoothed values are
//!   wired back into a coaddition run.
pub mod moving_average;
pub mod outliers;
pub mod spline;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    calibration::{archive::CalibrationArchive, CalibrationTable},
    coadd_errors::CoaddError,
    constants::{
        GAIN_SMOOTHING, GAIN_STRIPE_INTERVALS, MJD, OFFSET_SMOOTHING, OFFSET_STRIPE_INTERVALS,
        SPLINE_DEGREE, ZSCORE_THRESHOLD,
    },
};

use self::{
    moving_average::{weighted_moving_average, MovingAverageParams},
    outliers::reject_outliers,
    spline::{CurveFitOptions, SmoothCurve},
};

const GAIN_CURVE_FILE: &str = "gain_spline.json";
const OFFSET_CURVE_FILE: &str = "offset_spline.json";

/// Configuration of the spline smoother.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplineParams {
    pub degree: usize,
    /// Residual target of the gain curve.
    pub gain_smoothing: f64,
    /// Residual target of the offset curve.
    pub offset_smoothing: f64,
    pub zscore_threshold: f64,
    /// Closed MJD intervals removed before the gain fit.
    pub gain_intervals: Vec<(MJD, MJD)>,
    /// Closed MJD intervals removed before the offset fit.
    pub offset_intervals: Vec<(MJD, MJD)>,
    pub max_interior_knots: usize,
}

impl Default for SplineParams {
    fn default() -> Self {
        SplineParams {
            degree: SPLINE_DEGREE,
            gain_smoothing: GAIN_SMOOTHING,
            offset_smoothing: OFFSET_SMOOTHING,
            zscore_threshold: ZSCORE_THRESHOLD,
            gain_intervals: GAIN_STRIPE_INTERVALS.to_vec(),
            offset_intervals: OFFSET_STRIPE_INTERVALS.to_vec(),
            max_interior_knots: 30,
        }
    }
}

impl SplineParams {
    pub fn validate(&self) -> Result<(), CoaddError> {
        if self.degree == 0 {
            return Err(CoaddError::InvalidSmootherParameter(
                "degree must be >= 1".into(),
            ));
        }
        if !(self.gain_smoothing >= 0.0) || !(self.offset_smoothing >= 0.0) {
            return Err(CoaddError::InvalidSmootherParameter(
                "smoothing factors must be >= 0".into(),
            ));
        }
        if !(self.zscore_threshold > 0.0) {
            return Err(CoaddError::InvalidSmootherParameter(
                "zscore_threshold must be > 0".into(),
            ));
        }
        if let Some(&(a, b)) = self
            .gain_intervals
            .iter()
            .chain(&self.offset_intervals)
            .find(|(a, b)| !(a <= b))
        {
            return Err(CoaddError::InvalidSmootherParameter(format!(
                "exclusion interval [{a}, {b}] is reversed"
            )));
        }
        Ok(())
    }

    fn curve_options(&self, smoothing: f64) -> CurveFitOptions {
        CurveFitOptions {
            degree: self.degree,
            smoothing,
            max_interior_knots: self.max_interior_knots,
        }
    }
}

/// Gain and offset curves of one smoothing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCurves {
    pub gain: SmoothCurve,
    pub offset: SmoothCurve,
}

impl CalibrationCurves {
    pub fn gain_at(&self, time: MJD) -> f64 {
        self.gain.evaluate(time)
    }

    pub fn offset_at(&self, time: MJD) -> f64 {
        self.offset.evaluate(time)
    }

    pub fn gain_path(directory: &Utf8Path) -> Utf8PathBuf {
        directory.join(GAIN_CURVE_FILE)
    }

    pub fn offset_path(directory: &Utf8Path) -> Utf8PathBuf {
        directory.join(OFFSET_CURVE_FILE)
    }

    /// Write both curves as JSON into `directory`.
    pub fn save(&self, directory: &Utf8Path) -> Result<(), CoaddError> {
        std::fs::create_dir_all(directory)?;
        std::fs::write(
            Self::gain_path(directory),
            serde_json::to_string_pretty(&self.gain)?,
        )?;
        std::fs::write(
            Self::offset_path(directory),
            serde_json::to_string_pretty(&self.offset)?,
        )?;
        Ok(())
    }

    /// Read both curves written by [`CalibrationCurves::save`].
    pub fn load(directory: &Utf8Path) -> Result<Self, CoaddError> {
        let gain = serde_json::from_str(&std::fs::read_to_string(Self::gain_path(directory))?)?;
        let offset =
            serde_json::from_str(&std::fs::read_to_string(Self::offset_path(directory))?)?;
        Ok(CalibrationCurves { gain, offset })
    }
}

/// Spline fit of gains and offsets over time.
#[derive(Debug, Clone, Default)]
pub struct TemporalSmoother {
    params: SplineParams,
}

impl TemporalSmoother {
    pub fn new(params: SplineParams) -> Result<Self, CoaddError> {
        params.validate()?;
        Ok(TemporalSmoother { params })
    }

    pub fn params(&self) -> &SplineParams {
        &self.params
    }

    /// Fit the gain and offset curves.
    ///
    /// Arguments
    /// -----------------
    /// * `gains`, `offsets`: one value per segment.
    /// * `timestamps`: representative time of each segment, aligned with both sequences.
    ///
    /// Return
    /// ----------
    /// * The two curves, each fitted on the entries surviving its own z-score cut and its own
    ///   exclusion intervals.
    /// * `Err(CoaddError::InsufficientSplineData)` if too few entries survive.
    pub fn fit(
        &self,
        gains: &[f64],
        offsets: &[f64],
        timestamps: &[MJD],
    ) -> Result<CalibrationCurves, CoaddError> {
        if gains.len() != timestamps.len() || offsets.len() != timestamps.len() {
            return Err(CoaddError::InvalidSmootherParameter(format!(
                "{} gains, {} offsets for {} timestamps",
                gains.len(),
                offsets.len(),
                timestamps.len()
            )));
        }

        let (gain_times, gain_values) = reject_outliers(
            timestamps,
            gains,
            self.params.zscore_threshold,
            &self.params.gain_intervals,
        );
        let (offset_times, offset_values) = reject_outliers(
            timestamps,
            offsets,
            self.params.zscore_threshold,
            &self.params.offset_intervals,
        );
        info!(
            "Smoothing {} segments: {} gains and {} offsets kept",
            timestamps.len(),
            gain_values.len(),
            offset_values.len()
        );

        let gain = SmoothCurve::fit(
            &gain_times,
            &gain_values,
            &self.params.curve_options(self.params.gain_smoothing),
        )?;
        let offset = SmoothCurve::fit(
            &offset_times,
            &offset_values,
            &self.params.curve_options(self.params.offset_smoothing),
        )?;
        Ok(CalibrationCurves { gain, offset })
    }

    /// Fit the curves on the usable records of one calibration table.
    ///
    /// Degenerate records and records without a timestamp are left out.
    pub fn fit_table(&self, table: &CalibrationTable) -> Result<CalibrationCurves, CoaddError> {
        let mut gains = Vec::with_capacity(table.len());
        let mut offsets = Vec::with_capacity(table.len());
        let mut times = Vec::with_capacity(table.len());
        let mut untimed = 0;
        for record in table.records().iter().filter(|r| !r.is_degenerate()) {
            match record.timestamp {
                Some(t) => {
                    gains.push(record.gain);
                    offsets.push(record.offset);
                    times.push(t);
                }
                None => untimed += 1,
            }
        }
        if untimed > 0 {
            warn!(
                "Iteration {}: {untimed} segments without timestamp left out of the smoothing fit",
                table.iteration
            );
        }
        self.fit(&gains, &offsets, &times)
    }

    /// Load the table archived for `iteration`, fit it, and persist the curves in `output`.
    pub fn fit_archive(
        &self,
        archive: &dyn CalibrationArchive,
        iteration: usize,
        output: &Utf8Path,
    ) -> Result<CalibrationCurves, CoaddError> {
        let table = archive.load_iteration(iteration)?;
        let curves = self.fit_table(&table)?;
        curves.save(output)?;
        info!("Calibration curves of iteration {iteration} written to {output}");
        Ok(curves)
    }
}

/// Smoothing applied to one calibration table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SmoothingStrategy {
    Spline(SplineParams),
    MovingAverage(MovingAverageParams),
}

impl Default for SmoothingStrategy {
    fn default() -> Self {
        SmoothingStrategy::MovingAverage(MovingAverageParams::default())
    }
}

/// Output of [`SmoothingStrategy::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedCalibration {
    /// Input table with smoothed gains and offsets.
    pub table: CalibrationTable,
    /// Fitted curves, for the spline strategy.
    pub curves: Option<CalibrationCurves>,
}

impl SmoothingStrategy {
    pub fn validate(&self) -> Result<(), CoaddError> {
        match self {
            SmoothingStrategy::Spline(params) => params.validate(),
            SmoothingStrategy::MovingAverage(_) => Ok(()),
        }
    }

    /// Smooth the gains and offsets of `table`.
    ///
    /// Return
    /// ----------
    /// * A table with the same segments, sizes and timestamps; degenerate records unchanged.
    ///   With the spline strategy, records without timestamp keep their fitted values.
    pub fn apply(&self, table: &CalibrationTable) -> Result<SmoothedCalibration, CoaddError> {
        let (mut gains, mut offsets, curves) = match self {
            SmoothingStrategy::Spline(params) => {
                let curves = TemporalSmoother::new(params.clone())?.fit_table(table)?;
                let (gains, offsets) = table
                    .records()
                    .iter()
                    .map(|r| match r.timestamp {
                        Some(t) => (curves.gain_at(t), curves.offset_at(t)),
                        None => (r.gain, r.offset),
                    })
                    .unzip();
                (gains, offsets, Some(curves))
            }
            SmoothingStrategy::MovingAverage(params) => {
                let weights: Vec<f64> = table.orbit_sizes().iter().map(|&n| n as f64).collect();
                let gains =
                    weighted_moving_average(&table.gains(), &weights, params.window, params.boundary)?;
                let offsets = weighted_moving_average(
                    &table.offsets(),
                    &weights,
                    params.window,
                    params.boundary,
                )?;
                (gains, offsets, None)
            }
        };

        for (i, record) in table.records().iter().enumerate() {
            if record.is_degenerate() {
                gains[i] = record.gain;
                offsets[i] = record.offset;
            }
        }

        Ok(SmoothedCalibration {
            table: table.with_values(&gains, &offsets),
            curves,
        })
    }
}

//! # Map Coadder (outer loop)
//!
//! Iterative self-calibration and coaddition of a fixed universe of segments into one
//! full-sky map. Each outer iteration walks through
//!
//! ```text
//! Initializing → FittingSegments → AccumulatingSegments → Normalizing → Persisting
//! ```
//!
//! and the run ends in [`CoaddPhase::Completed`] after the configured number of iterations.
//!
//! ## One iteration
//! -----------------
//! * **Initializing** – zero-filled numerator and denominator buffers.
//! * **FittingSegments** – for every segment id in `0..num_segments`: load samples and
//!   template, drop masked samples, fit `(gain, offset)`. From the second iteration on the
//!   fit runs on `raw − previous_map[pixel] · previous_gain(segment)`. The resulting
//!   [`CalibrationTable`] is archived under the iteration number.
//! * **AccumulatingSegments** – each segment yields a sparse contribution
//!   ([`accumulate::segment_contribution`]) merged into the buffers in segment order.
//! * **Normalizing** – `map = num / den`, `unc = 1 / den`, zero where `den == 0`.
//! * **Persisting** – both arrays are written through the [`MapStore`]; the map becomes the
//!   previous map of the next iteration.
//!
//! ## Failures
//! -----------------
//! A segment or template that cannot be loaded aborts the run by default. With
//! [`CoaddParams::skip_failed_segments`] the failure is logged, the segment gets a neutral
//! `(0, 0)` record of size 0 and contributes nothing.
//!
//! ## Features
//! -----------------
//! * `parallel` – FittingSegments and contribution building run on `rayon`; results are
//!   merged in segment order, so the map does not depend on scheduling.
//! * `progress` – an `indicatif` bar over the segments of each iteration.
//!
//! See also
//! ------------
//! * [`fit_segment_with`] – per-segment calibration.
//! * [`SmoothingStrategy`] – optional smoothing between fitting and accumulation.
pub mod accumulate;

use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::{
    calibration::{
        archive::CalibrationArchive,
        fitter::fit_segment_with,
        nelder_mead::NelderMeadParams,
        CalibrationHistory, CalibrationRecord, CalibrationTable,
    },
    coadd_errors::CoaddError,
    constants::{
        SegmentId, DEFAULT_BAND, DEFAULT_ITERATIONS, DEFAULT_NUM_SEGMENTS,
        DEFAULT_REFINEMENT_STEPS,
    },
    mask::Mask,
    segments::{MaskedSegment, SegmentSource, TemplateSource},
    skymap::{MapKey, MapStore, SkyMap},
    smoothing::{CalibrationCurves, SmoothingStrategy},
};

use self::accumulate::{segment_contribution, MapAccumulator, SegmentContribution};

/// Where the calibration of each iteration comes from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CalibrationSource {
    /// Fit every segment against its template.
    #[default]
    Fitted,
    /// Fit, then smooth the table before accumulation.
    SmoothedEachIteration(SmoothingStrategy),
    /// Evaluate persisted curves at each segment's timestamp instead of fitting.
    Prior(CalibrationCurves),
}

/// Configuration of a coaddition run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoaddParams {
    /// Size of the segment universe, ids `0..num_segments`.
    pub num_segments: usize,
    /// Outer iterations.
    pub iterations: usize,
    /// Fit/adjust rounds of the per-segment fitter.
    pub refinement_steps: usize,
    /// Instrument band, used in output names.
    pub band: u8,
    pub minimizer: NelderMeadParams,
    /// Log and skip segments that fail to load instead of aborting.
    pub skip_failed_segments: bool,
    pub calibration_source: CalibrationSource,
}

impl Default for CoaddParams {
    fn default() -> Self {
        CoaddParams {
            num_segments: DEFAULT_NUM_SEGMENTS,
            iterations: DEFAULT_ITERATIONS,
            refinement_steps: DEFAULT_REFINEMENT_STEPS,
            band: DEFAULT_BAND,
            minimizer: NelderMeadParams::default(),
            skip_failed_segments: false,
            calibration_source: CalibrationSource::Fitted,
        }
    }
}

impl CoaddParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent builder, validated by [`CoaddParamsBuilder::build`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use skycoadd::coadder::CoaddParams;
    ///
    /// let params = CoaddParams::builder()
    ///     .num_segments(150)
    ///     .iterations(20)
    ///     .band(3)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(params.refinement_steps, 1);
    /// ```
    pub fn builder() -> CoaddParamsBuilder {
        CoaddParamsBuilder::new()
    }
}

/// Builder for [`CoaddParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct CoaddParamsBuilder {
    params: CoaddParams,
}

impl CoaddParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_segments(mut self, v: usize) -> Self {
        self.params.num_segments = v;
        self
    }
    pub fn iterations(mut self, v: usize) -> Self {
        self.params.iterations = v;
        self
    }
    pub fn refinement_steps(mut self, v: usize) -> Self {
        self.params.refinement_steps = v;
        self
    }
    pub fn band(mut self, v: u8) -> Self {
        self.params.band = v;
        self
    }
    pub fn minimizer(mut self, v: NelderMeadParams) -> Self {
        self.params.minimizer = v;
        self
    }
    pub fn skip_failed_segments(mut self, v: bool) -> Self {
        self.params.skip_failed_segments = v;
        self
    }
    pub fn calibration_source(mut self, v: CalibrationSource) -> Self {
        self.params.calibration_source = v;
        self
    }

    /// Finalize the builder.
    ///
    /// Validation rules
    /// -----------------
    /// * `iterations ≥ 1` and `refinement_steps ≥ 1`.
    /// * minimiser tolerances `> 0`, budgets `≥ 1`.
    /// * a smoothing strategy, if any, must itself be valid.
    ///
    /// An empty segment universe is accepted and produces all-zero maps.
    pub fn build(self) -> Result<CoaddParams, CoaddError> {
        let p = &self.params;
        if p.iterations == 0 {
            return Err(CoaddError::InvalidCoaddParameter(
                "iterations must be >= 1".into(),
            ));
        }
        if p.refinement_steps == 0 {
            return Err(CoaddError::InvalidCoaddParameter(
                "refinement_steps must be >= 1".into(),
            ));
        }
        p.minimizer.validate()?;
        if let CalibrationSource::SmoothedEachIteration(strategy) = &p.calibration_source {
            strategy.validate()?;
        }
        Ok(self.params)
    }
}

/// Current state of the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoaddPhase {
    Initializing,
    FittingSegments,
    AccumulatingSegments,
    Normalizing,
    Persisting,
    Completed,
}

impl fmt::Display for CoaddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoaddPhase::Initializing => "initializing",
            CoaddPhase::FittingSegments => "fitting segments",
            CoaddPhase::AccumulatingSegments => "accumulating segments",
            CoaddPhase::Normalizing => "normalizing",
            CoaddPhase::Persisting => "persisting",
            CoaddPhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Result of a full run.
#[derive(Debug, Clone, PartialEq)]
pub struct CoaddOutcome {
    pub history: CalibrationHistory,
    /// Map of the last iteration.
    pub final_map: SkyMap,
}

/// Per-segment result of the fitting phase.
#[derive(Debug, Clone)]
struct FittedSegment {
    record: CalibrationRecord,
    /// `None` for a skipped segment.
    masked: Option<MaskedSegment>,
}

/// Map and calibration of the previous iteration, borrowed read-only by the next one.
struct PreviousIteration {
    map: SkyMap,
    table: CalibrationTable,
}

/// Outer-loop driver.
///
/// The mask and sources are shared read-only; maps and calibration tables are written through
/// the injected store and archive.
pub struct Coadder<'a, S, T, M, A>
where
    S: SegmentSource,
    T: TemplateSource,
    M: MapStore,
    A: CalibrationArchive,
{
    params: CoaddParams,
    mask: &'a Mask,
    segments: &'a S,
    templates: &'a T,
    store: &'a mut M,
    archive: &'a mut A,
    phase: CoaddPhase,
}

impl<'a, S, T, M, A> Coadder<'a, S, T, M, A>
where
    S: SegmentSource,
    T: TemplateSource,
    M: MapStore,
    A: CalibrationArchive,
{
    pub fn new(
        params: CoaddParams,
        mask: &'a Mask,
        segments: &'a S,
        templates: &'a T,
        store: &'a mut M,
        archive: &'a mut A,
    ) -> Self {
        Coadder {
            params,
            mask,
            segments,
            templates,
            store,
            archive,
            phase: CoaddPhase::Initializing,
        }
    }

    pub fn params(&self) -> &CoaddParams {
        &self.params
    }

    pub fn phase(&self) -> CoaddPhase {
        self.phase
    }

    fn enter(&mut self, phase: CoaddPhase) {
        debug!("Coadder: {phase}");
        self.phase = phase;
    }

    /// Run every outer iteration.
    ///
    /// Return
    /// ----------
    /// * The calibration history (one table per iteration) and the last map.
    /// * The first fatal segment, template, store or archive error otherwise.
    pub fn run(&mut self) -> Result<CoaddOutcome, CoaddError> {
        let npix = self.mask.npix();
        let mut history = CalibrationHistory::new();
        let mut previous: Option<PreviousIteration> = None;

        info!(
            "Coadding {} segments over {} iterations (band {}, {} pixels)",
            self.params.num_segments, self.params.iterations, self.params.band, npix
        );

        for iteration in 0..self.params.iterations {
            self.enter(CoaddPhase::Initializing);
            let mut accumulator = MapAccumulator::new(npix);

            self.enter(CoaddPhase::FittingSegments);
            let context = FitContext {
                params: &self.params,
                mask: self.mask,
                segments: self.segments,
                templates: self.templates,
            };
            let fitted = context.fit_all(iteration, previous.as_ref())?;
            let table = self.calibration_table(iteration, &fitted)?;
            self.archive.save_iteration(&table)?;
            match table.stats() {
                Some(stats) => info!("{stats}"),
                None => warn!("Iteration {iteration}: every segment is degenerate"),
            }

            self.enter(CoaddPhase::AccumulatingSegments);
            for contribution in contributions(&fitted, &table) {
                accumulator.add(&contribution)?;
            }

            self.enter(CoaddPhase::Normalizing);
            let map = accumulator.normalize();

            self.enter(CoaddPhase::Persisting);
            let key = MapKey::new(self.params.band, iteration);
            self.store.save_map(&key, &map)?;
            info!(
                "Iteration {iteration}: {} saved, {} of {npix} pixels covered",
                key.map_name(),
                map.covered_pixels()
            );

            history.push(table.clone())?;
            previous = Some(PreviousIteration { map, table });
        }

        self.enter(CoaddPhase::Completed);
        let final_map = previous.map_or_else(|| SkyMap::zeros(npix), |p| p.map);
        Ok(CoaddOutcome { history, final_map })
    }

    fn calibration_table(
        &self,
        iteration: usize,
        fitted: &[FittedSegment],
    ) -> Result<CalibrationTable, CoaddError> {
        let table = CalibrationTable::new(iteration, fitted.iter().map(|f| f.record).collect());
        match &self.params.calibration_source {
            CalibrationSource::SmoothedEachIteration(strategy) => Ok(strategy.apply(&table)?.table),
            CalibrationSource::Fitted | CalibrationSource::Prior(_) => Ok(table),
        }
    }
}

/// Read-only view of a run used by the fitting phase, shareable across worker threads.
struct FitContext<'c, S: SegmentSource, T: TemplateSource> {
    params: &'c CoaddParams,
    mask: &'c Mask,
    segments: &'c S,
    templates: &'c T,
}

impl<S: SegmentSource, T: TemplateSource> FitContext<'_, S, T> {
    fn fit_all(
        &self,
        iteration: usize,
        previous: Option<&PreviousIteration>,
    ) -> Result<Vec<FittedSegment>, CoaddError> {
        let ids: Vec<SegmentId> = (0..self.params.num_segments).collect();

        #[cfg(feature = "progress")]
        let progress = crate::progress_bar::SegmentProgress::new(ids.len(), iteration);

        let fit = |&id: &SegmentId| {
            let result = self.fit_one(id, iteration, previous);
            #[cfg(feature = "progress")]
            progress.tick();
            result
        };

        // results keep segment order in both modes
        #[cfg(feature = "parallel")]
        let results: Result<Vec<FittedSegment>, CoaddError> = ids.par_iter().map(fit).collect();
        #[cfg(not(feature = "parallel"))]
        let results: Result<Vec<FittedSegment>, CoaddError> = ids.iter().map(fit).collect();

        #[cfg(feature = "progress")]
        progress.finish();

        results
    }

    fn fit_one(
        &self,
        id: SegmentId,
        iteration: usize,
        previous: Option<&PreviousIteration>,
    ) -> Result<FittedSegment, CoaddError> {
        match self.calibrate_segment(id, iteration, previous) {
            Ok(fitted) => Ok(fitted),
            Err(err) if self.params.skip_failed_segments => {
                warn!("Segment {id} skipped at iteration {iteration}: {err}");
                Ok(FittedSegment {
                    record: CalibrationRecord::neutral(id, 0, None),
                    masked: None,
                })
            }
            Err(err) => {
                error!("Segment {id} aborted iteration {iteration}: {err}");
                Err(err)
            }
        }
    }

    fn calibrate_segment(
        &self,
        id: SegmentId,
        iteration: usize,
        previous: Option<&PreviousIteration>,
    ) -> Result<FittedSegment, CoaddError> {
        let segment = self.segments.load_segment(id)?;
        let template = self.templates.load_template(id, segment.pixels())?;
        let masked = segment.apply_mask(&template, self.mask)?;

        let mut record = CalibrationRecord::neutral(id, masked.len(), masked.timestamp);
        if masked.is_empty() {
            debug!("Segment {id}: no unmasked sample");
            return Ok(FittedSegment {
                record,
                masked: Some(masked),
            });
        }

        match &self.params.calibration_source {
            CalibrationSource::Prior(curves) => {
                let time = masked.timestamp.ok_or(CoaddError::MissingTimestamp(id))?;
                record.gain = curves.gain_at(time);
                record.offset = curves.offset_at(time);
            }
            CalibrationSource::Fitted | CalibrationSource::SmoothedEachIteration(_) => {
                let data = match previous {
                    Some(prev) => {
                        masked.subtract_previous_map(prev.map.values(), prev.table.gain(id))
                    }
                    None => masked.values.clone(),
                };
                let fit = fit_segment_with(
                    &masked.template,
                    &data,
                    &masked.uncertainties,
                    self.params.refinement_steps,
                    &self.params.minimizer,
                );
                record.gain = fit.gain;
                record.offset = fit.offset;
            }
        }
        debug!(
            "Segment {id} iteration {iteration}: gain={:.6}, offset={:.6}, size={}",
            record.gain, record.offset, record.orbit_size
        );

        Ok(FittedSegment {
            record,
            masked: Some(masked),
        })
    }
}

/// Contributions of every surviving segment, in segment order.
fn contributions(fitted: &[FittedSegment], table: &CalibrationTable) -> Vec<SegmentContribution> {
    let build = |f: &FittedSegment| {
        let masked = f.masked.as_ref()?;
        let record = table.get(masked.id)?;
        segment_contribution(masked, record)
    };

    #[cfg(feature = "parallel")]
    let built: Vec<SegmentContribution> = fitted.par_iter().filter_map(build).collect();
    #[cfg(not(feature = "parallel"))]
    let built: Vec<SegmentContribution> = fitted.iter().filter_map(build).collect();
    built
}
